//! Data validation: counts, consistency, quality and behaviour
//!
//! Consistency and quality problems are errors; thin data is a warning.

use ca_common::time::to_db;
use ca_common::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::fmt::Write as _;

const MIN_USERS: i64 = 100;
const MIN_PRODUCTS: i64 = 50;
const MIN_EVENTS: i64 = 10_000;
const RECOMMENDED_USERS: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub check: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BasicCounts {
    pub users: i64,
    pub products: i64,
    pub events: i64,
    pub user_metrics: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub events_without_user: i64,
    pub events_without_product: i64,
    pub bot_commands_with_product: i64,
    pub future_events: i64,
    pub events_before_registration: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityReport {
    pub duplicate_telegram_ids: i64,
    pub negative_prices: i64,
    pub blank_product_names: i64,
    pub invalid_probabilities: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryRevenue {
    pub category: String,
    pub purchases: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BehaviourReport {
    pub active_users_7d: i64,
    pub active_users_30d: i64,
    pub events_by_type: BTreeMap<String, i64>,
    /// Users who added to cart / users who viewed
    pub view_to_cart_rate: f64,
    /// Users who purchased / users who added to cart
    pub cart_to_purchase_rate: f64,
    /// Users who purchased / users who viewed
    pub view_to_purchase_rate: f64,
    pub top_categories: Vec<CategoryRevenue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub counts: BasicCounts,
    pub consistency: ConsistencyReport,
    pub quality: QualityReport,
    pub behaviour: BehaviourReport,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Human-readable summary for the terminal
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let c = &self.counts;
        let _ = writeln!(out, "Record counts");
        let _ = writeln!(out, "  users:        {}", c.users);
        let _ = writeln!(out, "  products:     {}", c.products);
        let _ = writeln!(out, "  events:       {}", c.events);
        let _ = writeln!(out, "  user_metrics: {}", c.user_metrics);

        let k = &self.consistency;
        let _ = writeln!(out, "Consistency");
        let _ = writeln!(out, "  events without user:        {}", k.events_without_user);
        let _ = writeln!(out, "  events without product:     {}", k.events_without_product);
        let _ = writeln!(out, "  bot commands with product:  {}", k.bot_commands_with_product);
        let _ = writeln!(out, "  events in the future:       {}", k.future_events);
        let _ = writeln!(out, "  events before registration: {}", k.events_before_registration);

        let q = &self.quality;
        let _ = writeln!(out, "Quality");
        let _ = writeln!(out, "  duplicate telegram ids: {}", q.duplicate_telegram_ids);
        let _ = writeln!(out, "  negative prices:        {}", q.negative_prices);
        let _ = writeln!(out, "  blank product names:    {}", q.blank_product_names);
        let _ = writeln!(out, "  invalid probabilities:  {}", q.invalid_probabilities);

        let b = &self.behaviour;
        let _ = writeln!(out, "Behaviour");
        let _ = writeln!(out, "  active users (7d / 30d): {} / {}", b.active_users_7d, b.active_users_30d);
        for (kind, count) in &b.events_by_type {
            let _ = writeln!(out, "  {:<14} {}", kind, count);
        }
        let _ = writeln!(
            out,
            "  conversion: view->cart {:.1}%, cart->purchase {:.1}%, view->purchase {:.1}%",
            b.view_to_cart_rate * 100.0,
            b.cart_to_purchase_rate * 100.0,
            b.view_to_purchase_rate * 100.0
        );
        for category in &b.top_categories {
            let _ = writeln!(
                out,
                "  {}: {} purchases, revenue {:.2}",
                category.category, category.purchases, category.revenue
            );
        }

        if self.issues.is_empty() {
            let _ = writeln!(out, "No issues found");
        } else {
            let _ = writeln!(out, "Issues");
            for issue in &self.issues {
                let _ = writeln!(out, "  [{:?}] {}: {}", issue.severity, issue.check, issue.message);
            }
        }
        for recommendation in &self.recommendations {
            let _ = writeln!(out, "Recommendation: {}", recommendation);
        }

        out
    }
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

async fn count_at(pool: &SqlitePool, sql: &str, at: DateTime<Utc>) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).bind(to_db(at)).fetch_one(pool).await?)
}

pub async fn basic_counts(pool: &SqlitePool) -> Result<BasicCounts> {
    Ok(BasicCounts {
        users: count(pool, "SELECT COUNT(*) FROM users").await?,
        products: count(pool, "SELECT COUNT(*) FROM products").await?,
        events: count(pool, "SELECT COUNT(*) FROM events").await?,
        user_metrics: count(pool, "SELECT COUNT(*) FROM user_metrics").await?,
    })
}

pub async fn check_consistency(pool: &SqlitePool, now: DateTime<Utc>) -> Result<ConsistencyReport> {
    Ok(ConsistencyReport {
        events_without_user: count(
            pool,
            "SELECT COUNT(*) FROM events e LEFT JOIN users u ON e.user_id = u.user_id \
             WHERE u.user_id IS NULL",
        )
        .await?,
        events_without_product: count(
            pool,
            "SELECT COUNT(*) FROM events e LEFT JOIN products p ON e.product_id = p.product_id \
             WHERE e.product_id IS NOT NULL AND p.product_id IS NULL",
        )
        .await?,
        bot_commands_with_product: count(
            pool,
            "SELECT COUNT(*) FROM events WHERE event_type = 'bot_command' AND product_id IS NOT NULL",
        )
        .await?,
        future_events: count_at(pool, "SELECT COUNT(*) FROM events WHERE event_timestamp > ?", now)
            .await?,
        events_before_registration: count(
            pool,
            "SELECT COUNT(*) FROM events e JOIN users u ON e.user_id = u.user_id \
             WHERE e.event_timestamp < u.registration_date",
        )
        .await?,
    })
}

pub async fn check_quality(pool: &SqlitePool) -> Result<QualityReport> {
    Ok(QualityReport {
        duplicate_telegram_ids: count(
            pool,
            "SELECT COUNT(*) FROM (SELECT telegram_id FROM users \
             GROUP BY telegram_id HAVING COUNT(*) > 1)",
        )
        .await?,
        negative_prices: count(pool, "SELECT COUNT(*) FROM products WHERE price < 0").await?,
        blank_product_names: count(pool, "SELECT COUNT(*) FROM products WHERE TRIM(name) = ''")
            .await?,
        invalid_probabilities: count(
            pool,
            "SELECT COUNT(*) FROM user_metrics \
             WHERE churn_probability < 0 OR churn_probability > 1 \
             OR purchase_probability_30d < 0 OR purchase_probability_30d > 1",
        )
        .await?,
    })
}

pub async fn analyze_behaviour(pool: &SqlitePool, now: DateTime<Utc>) -> Result<BehaviourReport> {
    let active_since = "SELECT COUNT(DISTINCT user_id) FROM events WHERE event_timestamp >= ?";
    let active_users_7d = count_at(pool, active_since, now - Duration::days(7)).await?;
    let active_users_30d = count_at(pool, active_since, now - Duration::days(30)).await?;

    let rows = sqlx::query(
        "SELECT event_type, COUNT(*) AS n FROM events GROUP BY event_type ORDER BY event_type",
    )
    .fetch_all(pool)
    .await?;
    let mut events_by_type = BTreeMap::new();
    for row in &rows {
        events_by_type.insert(row.try_get::<String, _>("event_type")?, row.try_get("n")?);
    }

    let users_with = |types: &'static str| {
        format!(
            "SELECT COUNT(DISTINCT user_id) FROM events WHERE event_type IN ({})",
            types
        )
    };
    let viewers = count(pool, &users_with("'view', 'page_view', 'product_view'")).await?;
    let carters = count(pool, &users_with("'add_to_cart'")).await?;
    let buyers = count(pool, &users_with("'purchase'")).await?;

    let rows = sqlx::query(
        r#"
        SELECT p.category AS category,
               COUNT(*) AS purchases,
               COALESCE(SUM(CAST(json_extract(e.properties, '$.amount') AS REAL)), 0.0) AS revenue
        FROM events e
        JOIN products p ON e.product_id = p.product_id
        WHERE e.event_type = 'purchase'
        GROUP BY p.category
        ORDER BY revenue DESC
        LIMIT 5
        "#,
    )
    .fetch_all(pool)
    .await?;
    let top_categories = rows
        .iter()
        .map(|row| -> Result<CategoryRevenue> {
            Ok(CategoryRevenue {
                category: row.try_get("category")?,
                purchases: row.try_get("purchases")?,
                revenue: row.try_get("revenue")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BehaviourReport {
        active_users_7d,
        active_users_30d,
        events_by_type,
        view_to_cart_rate: ratio(carters, viewers),
        cart_to_purchase_rate: ratio(buyers, carters),
        view_to_purchase_rate: ratio(buyers, viewers),
        top_categories,
    })
}

fn ratio(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Issues and recommendations derived from the collected sections
fn assess(
    counts: &BasicCounts,
    consistency: &ConsistencyReport,
    quality: &QualityReport,
) -> (Vec<Issue>, Vec<String>) {
    let mut issues = Vec::new();
    let mut error = |check: &'static str, n: i64, what: &str| {
        if n > 0 {
            issues.push(Issue {
                severity: Severity::Error,
                check,
                message: format!("{} {}", n, what),
            });
        }
    };

    error("consistency", consistency.events_without_user, "events reference missing users");
    error("consistency", consistency.events_without_product, "events reference missing products");
    error("consistency", consistency.bot_commands_with_product, "bot commands carry a product");
    error("consistency", consistency.future_events, "events are in the future");
    error(
        "consistency",
        consistency.events_before_registration,
        "events precede the user's registration",
    );
    error("quality", quality.duplicate_telegram_ids, "telegram ids are duplicated");
    error("quality", quality.negative_prices, "products have negative prices");
    error("quality", quality.blank_product_names, "products have blank names");
    error("quality", quality.invalid_probabilities, "scores have probabilities outside [0, 1]");

    for (n, minimum, what) in [
        (counts.users, MIN_USERS, "users"),
        (counts.products, MIN_PRODUCTS, "products"),
        (counts.events, MIN_EVENTS, "events"),
    ] {
        if n < minimum {
            issues.push(Issue {
                severity: Severity::Warning,
                check: "counts",
                message: format!("Only {} {} (fewer than {})", n, what, minimum),
            });
        }
    }

    let mut recommendations = Vec::new();
    if counts.events < MIN_EVENTS {
        recommendations.push("Generate more events to train purchase and churn models".to_string());
    }
    if counts.users < RECOMMENDED_USERS {
        recommendations.push("Add more users to get stable segmentation".to_string());
    }

    (issues, recommendations)
}

/// Run every check against the database as of `now`
pub async fn validate(pool: &SqlitePool, now: DateTime<Utc>) -> Result<ValidationReport> {
    let counts = basic_counts(pool).await?;
    let consistency = check_consistency(pool, now).await?;
    let quality = check_quality(pool).await?;
    let behaviour = analyze_behaviour(pool, now).await?;
    let (issues, recommendations) = assess(&counts, &consistency, &quality);

    Ok(ValidationReport {
        generated_at: now,
        counts,
        consistency,
        quality,
        behaviour,
        issues,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assess_flags_errors_and_thin_data() {
        let counts = BasicCounts {
            users: 10,
            products: 60,
            events: 20_000,
            user_metrics: 0,
        };
        let consistency = ConsistencyReport {
            future_events: 3,
            ..Default::default()
        };
        let (issues, recommendations) = assess(&counts, &consistency, &QualityReport::default());

        let errors: Vec<&Issue> = issues.iter().filter(|i| i.severity == Severity::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "3 events are in the future");

        let warnings: Vec<&Issue> = issues.iter().filter(|i| i.severity == Severity::Warning).collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("users"));
        assert_eq!(recommendations.len(), 1);
    }

    #[test]
    fn test_ratio_handles_zero() {
        assert_eq!(ratio(5, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }
}
