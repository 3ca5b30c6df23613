//! Synthetic users, products and funnel-shaped event histories
//!
//! Generation is deterministic for a given seed and reference time, so the
//! same options always produce the same dataset.

use ca_common::db::{
    clear_data, insert_events_batch, insert_products_batch, insert_users_batch,
    list_telegram_ids, EventType, NewEvent, NewProduct, NewUser,
};
use ca_common::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::info;

/// Rows per insert transaction
pub const INSERT_BATCH_SIZE: usize = 1000;

/// Longest registration spread accepted, about a century
pub const MAX_DAYS: i64 = 36_500;

/// Share of users that produce any events
const ACTIVE_USER_RATIO: f64 = 0.7;
const CART_PROBABILITY: f64 = 0.3;
const PURCHASE_PROBABILITY: f64 = 0.15;
const BOT_SESSION_PROBABILITY: f64 = 0.4;
const SESSION_MINUTES: i64 = 45;

/// Product categories with their price ranges
pub const CATEGORIES: [(&str, f64, f64); 12] = [
    ("Electronics", 5000.0, 150000.0),
    ("Clothing", 500.0, 15000.0),
    ("Books", 100.0, 2000.0),
    ("Home & Garden", 1000.0, 50000.0),
    ("Sports", 800.0, 25000.0),
    ("Beauty", 200.0, 8000.0),
    ("Automotive", 500.0, 30000.0),
    ("Kids", 300.0, 12000.0),
    ("Groceries", 50.0, 2000.0),
    ("Health", 100.0, 5000.0),
    ("Entertainment", 200.0, 5000.0),
    ("Stationery", 50.0, 1500.0),
];

const PRODUCT_NOUNS: [[&str; 5]; 12] = [
    ["Smartphone", "Tablet", "Laptop", "Headphones", "Camera"],
    ["T-shirt", "Jeans", "Dress", "Jacket", "Sneakers"],
    ["Novel", "Textbook", "Detective", "Sci-fi", "Biography"],
    ["Table", "Chair", "Sofa", "Lamp", "Planter"],
    ["Running shoes", "Ball", "Dumbbells", "Bicycle", "Skis"],
    ["Cream", "Shampoo", "Lipstick", "Perfume", "Mask"],
    ["Engine oil", "Filter", "Tyres", "Battery", "Headlights"],
    ["Toy", "Stroller", "Diapers", "Baby food", "Bodysuit"],
    ["Bread", "Milk", "Meat", "Vegetables", "Fruit"],
    ["Vitamins", "Thermometer", "Tonometer", "Face mask", "Spray"],
    ["Board game", "Puzzle", "Comic", "Film", "Album"],
    ["Pen", "Notebook", "Folder", "Staples", "Stapler"],
];

const PRODUCT_ADJECTIVES: [&str; 10] = [
    "Classic", "Smart", "Eco", "Premium", "Compact", "Pro", "Lite", "Urban", "Nordic", "Prime",
];

const FIRST_NAMES: [&str; 12] = [
    "Alexei", "Maria", "Ivan", "Olga", "Dmitri", "Anna", "Sergei", "Elena", "Nikolai", "Irina",
    "Pavel", "Daria",
];

const LAST_NAMES: [&str; 10] = [
    "Ivanov", "Smirnova", "Kuznetsov", "Popova", "Sokolov", "Lebedeva", "Kozlov", "Novikova",
    "Morozov", "Volkova",
];

const LANGUAGE_CODES: [&str; 4] = ["ru", "en", "uk", "kk"];

const CITIES: [&str; 6] = [
    "Moscow",
    "Saint Petersburg",
    "Kazan",
    "Novosibirsk",
    "Yekaterinburg",
    "Almaty",
];

pub const BOT_COMMANDS: [&str; 5] = ["/start", "/help", "/recommendations", "/profile", "/settings"];

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub users: usize,
    pub products: usize,
    pub seed: u64,
    /// Registration dates are spread over this many days before now
    pub days: i64,
    /// Delete existing users, products, events and scores first
    pub clear_existing: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            users: 1000,
            products: 150,
            seed: 42,
            days: 730,
            clear_existing: true,
        }
    }
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<()> {
        if self.users == 0 || self.products == 0 {
            return Err(Error::InvalidInput(
                "users and products must be positive".to_string(),
            ));
        }
        if !(1..=MAX_DAYS).contains(&self.days) {
            return Err(Error::InvalidInput(format!(
                "days must be between 1 and {}",
                MAX_DAYS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub users: usize,
    pub active_users: usize,
    pub products: usize,
    pub events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub duration_ms: u128,
}

/// Inserted user reference used when generating events
#[derive(Debug, Clone, Copy)]
pub struct UserRef {
    pub user_id: i64,
    pub registration_date: DateTime<Utc>,
}

/// Inserted product reference used when generating events
#[derive(Debug, Clone, Copy)]
pub struct ProductRef {
    pub product_id: i64,
    pub price: f64,
}

/// Seeded generator of synthetic rows
pub struct DataGenerator {
    rng: StdRng,
    now: DateTime<Utc>,
    /// Telegram ids that new users must not reuse
    taken_telegram_ids: HashSet<i64>,
}

impl DataGenerator {
    pub fn new(seed: u64, now: DateTime<Utc>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            now,
            taken_telegram_ids: HashSet::new(),
        }
    }

    /// Mark telegram ids already stored so appended users avoid them
    pub fn reserve_telegram_ids(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.taken_telegram_ids.extend(ids);
    }

    /// Users with unique telegram ids, registered within `days` before now
    pub fn users(&mut self, count: usize, days: i64) -> Vec<NewUser> {
        let mut users = Vec::with_capacity(count);
        let span_seconds = days * 86_400;

        while users.len() < count {
            let telegram_id = self.rng.gen_range(100_000_000i64..=999_999_999);
            if !self.taken_telegram_ids.insert(telegram_id) {
                continue;
            }

            let first_name = self.pick(&FIRST_NAMES);
            let username = self
                .rng
                .gen_bool(0.6)
                .then(|| format!("{}_{}", first_name.to_lowercase(), self.rng.gen_range(1..10_000)));
            let last_name = self.rng.gen_bool(0.8).then(|| self.pick(&LAST_NAMES).to_string());
            let registration_date =
                self.now - Duration::seconds(self.rng.gen_range(0..=span_seconds));

            let mut interests: Vec<&str> = CATEGORIES.iter().map(|c| c.0).collect();
            interests.shuffle(&mut self.rng);
            interests.truncate(self.rng.gen_range(1..=4));

            let profile_data = json!({
                "age": self.rng.gen_range(18..=65),
                "city": self.pick(&CITIES),
                "interests": interests,
                "preferred_price_range": self.pick(&["budget", "mid-range", "premium"]),
                "notification_preferences": {
                    "email": self.rng.gen_bool(0.5),
                    "telegram": true,
                    "sms": self.rng.gen_bool(0.5),
                },
            });

            users.push(NewUser {
                telegram_id,
                first_name: Some(first_name.to_string()),
                last_name,
                username,
                language_code: Some(self.pick(&LANGUAGE_CODES).to_string()),
                registration_date,
                profile_data,
            });
        }

        users
    }

    /// Products over all categories, priced within the category range
    pub fn products(&mut self, count: usize) -> Vec<NewProduct> {
        (0..count)
            .map(|_| {
                let index = self.rng.gen_range(0..CATEGORIES.len());
                let (category, min_price, max_price) = CATEGORIES[index];
                let noun = self.pick(&PRODUCT_NOUNS[index]);
                let name = format!(
                    "{} {} {}",
                    noun,
                    self.pick(&PRODUCT_ADJECTIVES),
                    self.rng.gen_range(1..=999)
                );
                let price = (self.rng.gen_range(min_price..=max_price) * 100.0).round() / 100.0;

                let mut attributes = json!({
                    "color": self.pick(&["red", "blue", "green", "black", "white", "grey"]),
                    "material": self.pick(&["plastic", "metal", "fabric", "leather", "glass", "wood"]),
                    "weight": (self.rng.gen_range(0.1..50.0f64) * 100.0).round() / 100.0,
                    "rating": (self.rng.gen_range(3.0..=5.0f64) * 10.0).round() / 10.0,
                    "in_stock": self.rng.gen_bool(0.5),
                });
                if category == "Clothing" {
                    attributes["size"] = json!(self.pick(&["XS", "S", "M", "L", "XL", "XXL"]));
                }

                NewProduct {
                    name,
                    category: category.to_string(),
                    price,
                    description: Some(format!("{} from the {} range", noun, category)),
                    attributes,
                }
            })
            .collect()
    }

    /// Session-based events for the active share of `users`
    ///
    /// Returns the events and the number of active users.
    pub fn events(&mut self, users: &[UserRef], products: &[ProductRef]) -> (Vec<NewEvent>, usize) {
        let mut active: Vec<&UserRef> = users.iter().collect();
        active.shuffle(&mut self.rng);
        active.truncate((users.len() as f64 * ACTIVE_USER_RATIO).round() as usize);

        let mut events = Vec::new();
        for user in &active {
            for _ in 0..self.rng.gen_range(1..=15) {
                self.session(user, products, &mut events);
            }
        }

        (events, active.len())
    }

    fn session(&mut self, user: &UserRef, products: &[ProductRef], events: &mut Vec<NewEvent>) {
        let span = (self.now - user.registration_date).num_seconds().max(0);
        let start = user.registration_date + Duration::seconds(self.rng.gen_range(0..=span));

        let length = self.rng.gen_range(3..=25usize).min(products.len());
        let visited: Vec<&ProductRef> = products.choose_multiple(&mut self.rng, length).collect();
        let mut cart: Vec<&ProductRef> = Vec::new();

        for (step, &product) in visited.iter().enumerate() {
            let at = self.event_time(start, SESSION_MINUTES);

            let (kind, target) = if step == 0 {
                (EventType::View, product)
            } else if self.rng.gen_bool(CART_PROBABILITY)
                && !cart.iter().any(|p| p.product_id == product.product_id)
            {
                cart.push(product);
                (EventType::AddToCart, product)
            } else if !cart.is_empty() && self.rng.gen_bool(PURCHASE_PROBABILITY) {
                (EventType::Purchase, cart.remove(0))
            } else {
                let kind = self.pick(&[EventType::View, EventType::Click, EventType::Scroll]);
                (kind, product)
            };

            let properties = self.properties(&kind, target);
            events.push(NewEvent {
                user_id: user.user_id,
                product_id: Some(target.product_id),
                event_type: kind,
                event_timestamp: at,
                properties,
            });
        }

        if self.rng.gen_bool(BOT_SESSION_PROBABILITY) {
            for _ in 0..self.rng.gen_range(1..=5) {
                let at = self.event_time(start, 30);
                events.push(NewEvent {
                    user_id: user.user_id,
                    product_id: None,
                    event_type: EventType::BotCommand,
                    event_timestamp: at,
                    properties: json!({
                        "command": self.pick(&BOT_COMMANDS),
                        "response_time_ms": self.rng.gen_range(100..=2000),
                    }),
                });
            }
        }
    }

    /// A moment within `minutes` after `start`, never later than now
    fn event_time(&mut self, start: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        (start + Duration::minutes(self.rng.gen_range(0..=minutes))).min(self.now)
    }

    fn properties(&mut self, kind: &EventType, product: &ProductRef) -> Value {
        match kind {
            EventType::Purchase => json!({
                "amount": product.price,
                "quantity": self.rng.gen_range(1..=3),
                "payment_method": self.pick(&["card", "cash", "online"]),
                "discount": if self.rng.gen_bool(0.3) {
                    (self.rng.gen_range(0.0..=0.3f64) * 100.0).round() / 100.0
                } else {
                    0.0
                },
            }),
            EventType::View => json!({
                "duration_seconds": self.rng.gen_range(5..=300),
                "scroll_depth": self.rng.gen::<f64>(),
                "source": self.pick(&["search", "recommendation", "category", "direct"]),
            }),
            EventType::AddToCart => json!({
                "quantity": self.rng.gen_range(1..=5),
                "source": self.pick(&["product_page", "search_results", "recommendations"]),
            }),
            _ => json!({}),
        }
    }

    fn pick<T: Clone>(&mut self, items: &[T]) -> T {
        items[self.rng.gen_range(0..items.len())].clone()
    }
}

/// Generate a full dataset and insert it
pub async fn generate(pool: &SqlitePool, options: &GenerateOptions) -> Result<GenerationSummary> {
    options.validate()?;
    let started = Instant::now();

    if options.clear_existing {
        clear_data(pool).await?;
        info!("Cleared existing data");
    }

    let mut generator = DataGenerator::new(options.seed, ca_common::time::now());
    if !options.clear_existing {
        let existing = list_telegram_ids(pool).await?;
        info!("Appending next to {} existing users", existing.len());
        generator.reserve_telegram_ids(existing);
    }

    let new_users = generator.users(options.users, options.days);
    let mut users = Vec::with_capacity(new_users.len());
    for batch in new_users.chunks(INSERT_BATCH_SIZE) {
        let ids = insert_users_batch(pool, batch).await?;
        users.extend(ids.into_iter().zip(batch).map(|(user_id, u)| UserRef {
            user_id,
            registration_date: u.registration_date,
        }));
    }
    info!("Inserted {} users", users.len());

    let new_products = generator.products(options.products);
    let mut products = Vec::with_capacity(new_products.len());
    for batch in new_products.chunks(INSERT_BATCH_SIZE) {
        let ids = insert_products_batch(pool, batch).await?;
        products.extend(ids.into_iter().zip(batch).map(|(product_id, p)| ProductRef {
            product_id,
            price: p.price,
        }));
    }
    info!("Inserted {} products", products.len());

    let (events, active_users) = generator.events(&users, &products);
    let mut events_by_type = BTreeMap::new();
    for event in &events {
        *events_by_type.entry(event.event_type.to_string()).or_insert(0) += 1;
    }

    let mut inserted = 0;
    for batch in events.chunks(INSERT_BATCH_SIZE) {
        inserted += insert_events_batch(pool, batch).await?;
        info!("Inserted {}/{} events", inserted, events.len());
    }

    Ok(GenerationSummary {
        users: users.len(),
        active_users,
        products: products.len(),
        events: events.len(),
        events_by_type,
        duration_ms: started.elapsed().as_millis(),
    })
}
