//! Model training pipeline
//!
//! Segmentation uses every user's features as of now. The purchase and churn
//! classifiers use point-in-time snapshots: features are computed as of
//! `now - horizon` and labels come from what happened after that cutoff, so
//! the training rows never see their own outcome.

use crate::models::{
    profile_segments, silhouette_score, stratified_split, ClassificationMetrics, KMeans,
    LogisticModel, LogisticParams, ModelBundle, SegmentProfile, StandardScaler,
    TrainedClassifier,
};
use ca_common::db::{load_all_activity, EventType};
use ca_common::features::{UserActivity, UserSnapshot, FEATURE_NAMES};
use ca_common::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Instant;
use tracing::{debug, info};

/// Supervised rows required before the classifiers are trained
pub const MIN_SUPERVISED_SAMPLES: usize = 10;

/// Users required before cluster counts are compared
pub const MIN_USERS_FOR_OPTIMIZATION: usize = 10;

/// Fixed seed so repeated comparisons over the same data agree
pub const OPTIMIZATION_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub n_clusters: usize,
    /// Train on at most this many users (lowest ids first)
    pub limit: Option<i64>,
    pub horizon_days: i64,
    pub test_ratio: f64,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            limit: None,
            horizon_days: 30,
            test_ratio: 0.2,
            seed: 42,
        }
    }
}

impl TrainOptions {
    pub fn validate(&self) -> Result<()> {
        if !(crate::models::kmeans::MIN_CLUSTERS..=crate::models::kmeans::MAX_CLUSTERS)
            .contains(&self.n_clusters)
        {
            return Err(Error::InvalidInput(format!(
                "n_clusters must be between 2 and 20, got {}",
                self.n_clusters
            )));
        }
        if let Some(limit) = self.limit {
            if limit < 1 {
                return Err(Error::InvalidInput("limit must be positive".to_string()));
            }
        }
        if !(1..=365).contains(&self.horizon_days) {
            return Err(Error::InvalidInput(format!(
                "horizon_days must be between 1 and 365, got {}",
                self.horizon_days
            )));
        }
        if !(self.test_ratio > 0.0 && self.test_ratio <= 0.5) {
            return Err(Error::InvalidInput(format!(
                "test_ratio must be in (0, 0.5], got {}",
                self.test_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    pub segmentation_samples: usize,
    pub supervised_samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub purchase_positive_rate: f64,
    pub churn_positive_rate: f64,
    pub purchase_metrics: ClassificationMetrics,
    pub churn_metrics: ClassificationMetrics,
    pub silhouette_score: f64,
    pub segments: Vec<SegmentProfile>,
    pub duration_ms: u128,
}

impl TrainingReport {
    /// Compact metrics payload stored with each model run
    pub fn run_metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "purchase": self.purchase_metrics,
            "churn": self.churn_metrics,
            "silhouette_score": self.silhouette_score,
            "n_segments": self.segments.len(),
            "segmentation_samples": self.segmentation_samples,
            "supervised_samples": self.supervised_samples,
        })
    }
}

/// Load activity from the database and train on a blocking thread
pub async fn train_models(
    pool: &SqlitePool,
    options: TrainOptions,
) -> Result<(ModelBundle, TrainingReport)> {
    options.validate()?;

    let activities = load_all_activity(pool, options.limit).await?;
    info!(
        "Training on {} users (n_clusters={}, horizon={}d)",
        activities.len(),
        options.n_clusters,
        options.horizon_days
    );

    let now = ca_common::time::now();
    tokio::task::spawn_blocking(move || train_from_activity(&activities, now, &options))
        .await
        .map_err(|e| Error::Internal(format!("Training task failed: {}", e)))?
}

/// Supervised row: features at the cutoff plus the two outcomes after it
struct LabeledSnapshot {
    snapshot: UserSnapshot,
    purchased: bool,
    churned: bool,
}

fn label_snapshot(activity: &UserActivity, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> LabeledSnapshot {
    let outcome = activity.events_after(cutoff, now);
    LabeledSnapshot {
        snapshot: UserSnapshot::extract(&activity.snapshot(cutoff), cutoff),
        purchased: outcome.iter().any(|e| e.event_type == EventType::Purchase),
        churned: outcome.is_empty(),
    }
}

/// Train every model from in-memory activity as of `now`
pub fn train_from_activity(
    activities: &[UserActivity],
    now: DateTime<Utc>,
    options: &TrainOptions,
) -> Result<(ModelBundle, TrainingReport)> {
    options.validate()?;
    let started = Instant::now();

    let current: Vec<UserSnapshot> = activities
        .iter()
        .map(|a| UserSnapshot::extract(a, now))
        .collect();
    if current.len() < options.n_clusters {
        return Err(Error::InsufficientData(format!(
            "{} users cannot form {} segments",
            current.len(),
            options.n_clusters
        )));
    }

    let cutoff = now - Duration::days(options.horizon_days);
    let labeled: Vec<LabeledSnapshot> = activities
        .iter()
        .filter(|a| a.user.registration_date <= cutoff)
        .map(|a| label_snapshot(a, cutoff, now))
        .collect();
    if labeled.len() < MIN_SUPERVISED_SAMPLES {
        return Err(Error::InsufficientData(format!(
            "Need at least {} users registered before {}, found {}",
            MIN_SUPERVISED_SAMPLES,
            cutoff.date_naive(),
            labeled.len()
        )));
    }

    let segmentation_rows: Vec<Vec<f64>> = current.iter().map(|s| s.vector.values.clone()).collect();
    let supervised_rows: Vec<Vec<f64>> = labeled
        .iter()
        .map(|l| l.snapshot.vector.values.clone())
        .collect();

    let mut union = segmentation_rows.clone();
    union.extend(supervised_rows.iter().cloned());
    let scaler = StandardScaler::fit(&union)?;

    // Segmentation
    let scaled_segmentation = scaler.transform_all(&segmentation_rows);
    let kmeans = KMeans::fit(&scaled_segmentation, options.n_clusters, options.seed)?;
    let labels = kmeans.predict_all(&scaled_segmentation);
    let silhouette = silhouette_score(&scaled_segmentation, &labels);
    let segments = profile_segments(&current, &labels, options.n_clusters);
    debug!(
        "k-means converged in {} iterations, inertia {:.2}, silhouette {:.3}",
        kmeans.iterations, kmeans.inertia, silhouette
    );

    // Classifiers share one split, stratified on the purchase label
    let scaled_supervised = scaler.transform_all(&supervised_rows);
    let purchase_labels: Vec<bool> = labeled.iter().map(|l| l.purchased).collect();
    let churn_labels: Vec<bool> = labeled.iter().map(|l| l.churned).collect();
    let (train_idx, test_idx) = stratified_split(&purchase_labels, options.test_ratio, options.seed);

    let purchase = train_classifier(&scaled_supervised, &purchase_labels, &train_idx, &test_idx)?;
    let churn = train_classifier(&scaled_supervised, &churn_labels, &train_idx, &test_idx)?;

    let model_version = ModelBundle::version_for(now);
    let bundle = ModelBundle {
        model_version: model_version.clone(),
        trained_at: now,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        horizon_days: options.horizon_days,
        scaler,
        kmeans,
        silhouette_score: silhouette,
        segments: segments.clone(),
        purchase,
        churn,
        segmentation_samples: current.len(),
        supervised_samples: labeled.len(),
    };

    let report = TrainingReport {
        model_version,
        trained_at: now,
        segmentation_samples: current.len(),
        supervised_samples: labeled.len(),
        train_samples: train_idx.len(),
        test_samples: test_idx.len(),
        purchase_positive_rate: bundle.purchase.positive_rate,
        churn_positive_rate: bundle.churn.positive_rate,
        purchase_metrics: bundle.purchase.metrics,
        churn_metrics: bundle.churn.metrics,
        silhouette_score: silhouette,
        segments,
        duration_ms: started.elapsed().as_millis(),
    };

    info!(
        "Trained models {}: purchase f1={:.3} auc={:.3}, churn f1={:.3} auc={:.3}",
        report.model_version,
        report.purchase_metrics.f1,
        report.purchase_metrics.roc_auc,
        report.churn_metrics.f1,
        report.churn_metrics.roc_auc
    );

    Ok((bundle, report))
}

fn train_classifier(
    rows: &[Vec<f64>],
    labels: &[bool],
    train_idx: &[usize],
    test_idx: &[usize],
) -> Result<TrainedClassifier> {
    let pick_rows = |idx: &[usize]| idx.iter().map(|&i| rows[i].clone()).collect::<Vec<_>>();
    let pick_labels = |idx: &[usize]| idx.iter().map(|&i| labels[i]).collect::<Vec<_>>();

    let train_labels = pick_labels(train_idx);
    let model = LogisticModel::fit(&pick_rows(train_idx), &train_labels, LogisticParams::default())?;

    let test_labels = pick_labels(test_idx);
    let probabilities = model.predict_all(&pick_rows(test_idx));
    let metrics = ClassificationMetrics::compute(&test_labels, &probabilities);

    let positives = labels.iter().filter(|&&y| y).count();
    Ok(TrainedClassifier {
        model,
        metrics,
        positive_rate: positives as f64 / labels.len().max(1) as f64,
        train_samples: train_idx.len(),
        test_samples: test_idx.len(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterQuality {
    pub n_clusters: usize,
    pub silhouette_score: f64,
    pub inertia: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub samples: usize,
    pub results: Vec<ClusterQuality>,
    pub best_n_clusters: usize,
    pub best_silhouette_score: f64,
}

/// Fit k-means for every k in `min_k..=max_k` (capped at `rows - 1`) and
/// pick the k with the highest silhouette
pub fn optimize_segmentation(
    rows: &[Vec<f64>],
    min_k: usize,
    max_k: usize,
    seed: u64,
) -> Result<OptimizationReport> {
    let min_k = min_k.max(crate::models::kmeans::MIN_CLUSTERS);
    let max_k = max_k
        .min(rows.len().saturating_sub(1))
        .min(crate::models::kmeans::MAX_CLUSTERS);
    if min_k > max_k {
        return Err(Error::InsufficientData(format!(
            "{} samples are not enough to compare cluster counts from {}",
            rows.len(),
            min_k
        )));
    }

    let scaler = StandardScaler::fit(rows)?;
    let scaled = scaler.transform_all(rows);

    let mut results = Vec::new();
    for k in min_k..=max_k {
        let model = KMeans::fit(&scaled, k, seed)?;
        let labels = model.predict_all(&scaled);
        results.push(ClusterQuality {
            n_clusters: k,
            silhouette_score: silhouette_score(&scaled, &labels),
            inertia: model.inertia,
        });
    }

    let best = results
        .iter()
        .max_by(|a, b| a.silhouette_score.total_cmp(&b.silhouette_score))
        .ok_or_else(|| Error::Internal("No cluster counts evaluated".to_string()))?;

    Ok(OptimizationReport {
        samples: rows.len(),
        best_n_clusters: best.n_clusters,
        best_silhouette_score: best.silhouette_score,
        results,
    })
}

/// Compare cluster counts over current activity on a blocking thread
pub async fn optimize_from_database(
    pool: &SqlitePool,
    limit: Option<i64>,
    min_k: usize,
    max_k: usize,
) -> Result<OptimizationReport> {
    let activities = load_all_activity(pool, limit).await?;
    if activities.len() < MIN_USERS_FOR_OPTIMIZATION {
        return Err(Error::InsufficientData(format!(
            "Need at least {} users, found {}",
            MIN_USERS_FOR_OPTIMIZATION,
            activities.len()
        )));
    }

    let as_of = ca_common::time::now();
    tokio::task::spawn_blocking(move || {
        let rows: Vec<Vec<f64>> = activities
            .iter()
            .map(|a| UserSnapshot::extract(a, as_of).vector.values)
            .collect();
        optimize_segmentation(&rows, min_k, max_k, OPTIMIZATION_SEED)
    })
    .await
    .map_err(|e| Error::Internal(format!("Optimization task failed: {}", e)))?
}
