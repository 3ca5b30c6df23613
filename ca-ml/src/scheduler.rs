//! Background retraining and prediction refresh
//!
//! One tokio task sleeps until the earliest enabled job is due, or until it
//! is woken by a stop request or a configuration change. A job mutex keeps
//! scheduled, manual and API-triggered work from overlapping.

use crate::models::{ModelStore, SharedModels};
use crate::scoring::score_user;
use crate::training::{optimize_from_database, train_models, TrainOptions, TrainingReport};
use ca_common::db::{
    count_users, get_or_init_setting, load_activity_for, record_model_run, set_setting,
    upsert_user_metrics, users_needing_update,
};
use ca_common::time::now;
use ca_common::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Notify, RwLock};
use tracing::{error, info, warn};

/// Settings key holding the JSON-encoded [`SchedulerConfig`]
pub const CONFIG_SETTING_KEY: &str = "scheduler_config";

const HISTORY_LIMIT: usize = 20;

/// Cluster counts compared before an auto-optimised retrain
const AUTO_OPTIMIZE_MIN_K: usize = 2;
const AUTO_OPTIMIZE_MAX_K: usize = 8;

/// Sleep used when no job is enabled; any config change wakes the loop
const IDLE_SLEEP: std::time::Duration = std::time::Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub retraining_enabled: bool,
    pub retraining_frequency: Frequency,
    /// `HH:MM`, UTC
    pub retraining_time: String,
    /// 1 = Monday .. 7 = Sunday; used by weekly schedules
    pub retraining_weekday: u32,
    pub min_users_for_retraining: i64,
    /// Used as-is unless `auto_optimize_params` picks a better count
    pub n_clusters: usize,
    pub auto_optimize_params: bool,
    pub backup_previous_model: bool,

    pub prediction_update_enabled: bool,
    pub prediction_update_frequency: Frequency,
    pub prediction_update_time: String,
    pub prediction_batch_size: usize,
    pub update_threshold_hours: i64,
    pub max_users_per_update: i64,
    pub active_window_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retraining_enabled: true,
            retraining_frequency: Frequency::Daily,
            retraining_time: "02:00".to_string(),
            retraining_weekday: 1,
            min_users_for_retraining: 100,
            n_clusters: 4,
            auto_optimize_params: true,
            backup_previous_model: true,
            prediction_update_enabled: true,
            prediction_update_frequency: Frequency::Daily,
            prediction_update_time: "03:00".to_string(),
            prediction_batch_size: 1000,
            update_threshold_hours: 24,
            max_users_per_update: 10_000,
            active_window_days: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        parse_time(&self.retraining_time)?;
        parse_time(&self.prediction_update_time)?;

        let checks = [
            ((1..=7).contains(&self.retraining_weekday), "retraining_weekday must be 1..=7"),
            (self.min_users_for_retraining >= 1, "min_users_for_retraining must be positive"),
            ((2..=20).contains(&self.n_clusters), "n_clusters must be 2..=20"),
            (
                (1..=10_000).contains(&self.prediction_batch_size),
                "prediction_batch_size must be 1..=10000",
            ),
            (self.update_threshold_hours >= 1, "update_threshold_hours must be positive"),
            (self.max_users_per_update >= 1, "max_users_per_update must be positive"),
            (self.active_window_days >= 1, "active_window_days must be positive"),
        ];
        for (ok, message) in checks {
            if !ok {
                return Err(Error::InvalidInput(message.to_string()));
            }
        }
        Ok(())
    }

    /// Next due time of each enabled job
    pub fn next_runs(&self, now: DateTime<Utc>) -> Vec<(JobKind, DateTime<Utc>)> {
        let mut runs = Vec::new();
        if self.retraining_enabled {
            if let Ok(time) = parse_time(&self.retraining_time) {
                runs.push((
                    JobKind::Retrain,
                    next_run_after(now, self.retraining_frequency, time, self.retraining_weekday),
                ));
            }
        }
        if self.prediction_update_enabled {
            if let Ok(time) = parse_time(&self.prediction_update_time) {
                runs.push((
                    JobKind::UpdatePredictions,
                    next_run_after(now, self.prediction_update_frequency, time, 1),
                ));
            }
        }
        runs
    }
}

/// Partial update accepted by `PUT /api/scheduler/config`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfigUpdate {
    pub retraining_enabled: Option<bool>,
    pub retraining_frequency: Option<Frequency>,
    pub retraining_time: Option<String>,
    pub retraining_weekday: Option<u32>,
    pub min_users_for_retraining: Option<i64>,
    pub n_clusters: Option<usize>,
    pub auto_optimize_params: Option<bool>,
    pub backup_previous_model: Option<bool>,
    pub prediction_update_enabled: Option<bool>,
    pub prediction_update_frequency: Option<Frequency>,
    pub prediction_update_time: Option<String>,
    pub prediction_batch_size: Option<usize>,
    pub update_threshold_hours: Option<i64>,
    pub max_users_per_update: Option<i64>,
    pub active_window_days: Option<i64>,
}

impl SchedulerConfigUpdate {
    pub fn apply(self, base: &SchedulerConfig) -> SchedulerConfig {
        let mut c = base.clone();
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { c.$field = v; })*
            };
        }
        set!(
            retraining_enabled,
            retraining_frequency,
            retraining_time,
            retraining_weekday,
            min_users_for_retraining,
            n_clusters,
            auto_optimize_params,
            backup_previous_model,
            prediction_update_enabled,
            prediction_update_frequency,
            prediction_update_time,
            prediction_batch_size,
            update_threshold_hours,
            max_users_per_update,
            active_window_days
        );
        c
    }
}

/// Parse `HH:MM`
pub fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| Error::InvalidInput(format!("Invalid time '{}', expected HH:MM", value)))
}

/// First scheduled instant strictly after `now`
///
/// Hourly schedules use only the minute of `time`. `weekday` is 1 (Monday)
/// to 7 (Sunday) and only matters for weekly schedules.
pub fn next_run_after(
    now: DateTime<Utc>,
    frequency: Frequency,
    time: NaiveTime,
    weekday: u32,
) -> DateTime<Utc> {
    let today = now.date_naive();
    match frequency {
        Frequency::Hourly => {
            let hour_start = today
                .and_hms_opt(now.hour(), 0, 0)
                .map(|t| t.and_utc())
                .unwrap_or(now);
            let candidate = hour_start + Duration::minutes(time.minute() as i64);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::hours(1)
            }
        }
        Frequency::Daily => {
            let candidate = today.and_time(time).and_utc();
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(1)
            }
        }
        Frequency::Weekly => {
            let current = now.weekday().number_from_monday() as i64;
            let target = weekday.clamp(1, 7) as i64;
            let days_ahead = (target - current).rem_euclid(7);
            let candidate = (today + Duration::days(days_ahead)).and_time(time).and_utc();
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(7)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Retrain,
    UpdatePredictions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Scheduled,
    Manual,
    Api,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
            TriggerKind::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: JobKind,
    pub trigger: TriggerKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub job_in_progress: bool,
    pub next_retraining: Option<DateTime<Utc>>,
    pub next_prediction_update: Option<DateTime<Utc>>,
    pub config: SchedulerConfig,
    pub recent_jobs: Vec<JobOutcome>,
}

pub struct Scheduler {
    db: SqlitePool,
    store: ModelStore,
    models: SharedModels,
    config: RwLock<SchedulerConfig>,
    job_lock: Mutex<()>,
    history: Mutex<VecDeque<JobOutcome>>,
    running: AtomicBool,
    /// Incremented on every start so a stopped loop never resumes
    generation: AtomicU64,
    wake: Notify,
}

impl Scheduler {
    /// Load the persisted config (writing defaults on first run)
    pub async fn new(db: SqlitePool, store: ModelStore, models: SharedModels) -> Result<Arc<Self>> {
        let default_json = serde_json::to_string(&SchedulerConfig::default())?;
        let stored = get_or_init_setting(&db, CONFIG_SETTING_KEY, &default_json).await?;

        let config = match serde_json::from_str::<SchedulerConfig>(&stored) {
            Ok(config) if config.validate().is_ok() => config,
            Ok(_) | Err(_) => {
                warn!("Stored scheduler config is invalid, using defaults");
                SchedulerConfig::default()
            }
        };

        Ok(Arc::new(Self {
            db,
            store,
            models,
            config: RwLock::new(config),
            job_lock: Mutex::new(()),
            history: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            wake: Notify::new(),
        }))
    }

    pub async fn config(&self) -> SchedulerConfig {
        self.config.read().await.clone()
    }

    /// Validate, persist and apply a partial update
    ///
    /// The write lock is held from read to persist so concurrent updates
    /// apply one after the other.
    pub async fn update_config(&self, update: SchedulerConfigUpdate) -> Result<SchedulerConfig> {
        let mut config = self.config.write().await;
        let updated = update.apply(&config);
        updated.validate()?;

        set_setting(&self.db, CONFIG_SETTING_KEY, &serde_json::to_string(&updated)?).await?;
        *config = updated.clone();
        drop(config);
        info!("Scheduler config updated");

        self.wake.notify_waiters();
        Ok(updated)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the scheduling loop; returns false if it was already running
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_loop(generation).await });
        info!("Scheduler started");
        true
    }

    /// Stop the loop; a job already in progress runs to completion
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.wake.notify_waiters();
        info!("Scheduler stopped");
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_loop(self: Arc<Self>, generation: u64) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_current(generation) {
                break;
            }

            let config = self.config().await;
            let now = now();
            let runs = config.next_runs(now);
            let due_at = runs.iter().map(|(_, at)| *at).min();

            let sleep_for = due_at
                .map(|at| (at - now).to_std().unwrap_or_default())
                .unwrap_or(IDLE_SLEEP);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let Some(due_at) = due_at else { continue };
                    if !self.is_current(generation) {
                        break;
                    }
                    for (job, at) in runs {
                        if at <= due_at {
                            if self.run_job(job, TriggerKind::Scheduled).await.is_none() {
                                warn!("Skipping scheduled {:?}: another job is running", job);
                            }
                        }
                    }
                }
                _ = &mut notified => {}
            }
        }
        info!("Scheduler loop exited");
    }

    /// Exclusive job slot; `None` when another job holds it
    pub fn try_begin_job(&self) -> Option<MutexGuard<'_, ()>> {
        self.job_lock.try_lock().ok()
    }

    /// Run a job now; `None` if another job is in progress
    pub async fn run_job(&self, job: JobKind, trigger: TriggerKind) -> Option<JobOutcome> {
        let _guard = self.try_begin_job()?;
        let outcome = match job {
            JobKind::Retrain => self.run_retraining(trigger).await,
            JobKind::UpdatePredictions => self.run_prediction_update(trigger).await,
        };
        self.record(outcome.clone()).await;
        Some(outcome)
    }

    pub async fn record(&self, outcome: JobOutcome) {
        let mut history = self.history.lock().await;
        history.push_front(outcome);
        history.truncate(HISTORY_LIMIT);
    }

    pub async fn status(&self) -> SchedulerStatus {
        let config = self.config().await;
        let runs = config.next_runs(now());
        let next = |kind: JobKind| runs.iter().find(|(k, _)| *k == kind).map(|(_, at)| *at);

        SchedulerStatus {
            running: self.is_running(),
            job_in_progress: self.job_lock.try_lock().is_err(),
            next_retraining: next(JobKind::Retrain),
            next_prediction_update: next(JobKind::UpdatePredictions),
            recent_jobs: self.history.lock().await.iter().cloned().collect(),
            config,
        }
    }

    async fn run_retraining(&self, trigger: TriggerKind) -> JobOutcome {
        let started_at = now();
        let result = self.retrain(trigger).await;
        finish(JobKind::Retrain, trigger, started_at, result)
    }

    async fn run_prediction_update(&self, trigger: TriggerKind) -> JobOutcome {
        let started_at = now();
        let result = self.update_predictions().await;
        finish(JobKind::UpdatePredictions, trigger, started_at, result)
    }

    async fn retrain(&self, trigger: TriggerKind) -> Result<(JobStatus, String, Value)> {
        let config = self.config().await;

        let users = count_users(&self.db).await?;
        if users < config.min_users_for_retraining {
            return Ok((
                JobStatus::Skipped,
                format!(
                    "{} users, at least {} needed",
                    users, config.min_users_for_retraining
                ),
                json!({"users": users}),
            ));
        }

        let n_clusters = if config.auto_optimize_params {
            self.optimized_cluster_count(config.n_clusters).await
        } else {
            config.n_clusters
        };
        let options = TrainOptions {
            n_clusters,
            ..Default::default()
        };
        let report = train_and_publish(
            &self.db,
            &self.store,
            &self.models,
            options,
            config.backup_previous_model,
            trigger,
        )
        .await?;

        let mut details = report.run_metrics();
        details["n_clusters"] = json!(n_clusters);
        details["auto_optimized"] = json!(config.auto_optimize_params);
        Ok((
            JobStatus::Success,
            format!("Trained {}", report.model_version),
            details,
        ))
    }

    /// Best cluster count by silhouette, or `fallback` when it cannot be computed
    async fn optimized_cluster_count(&self, fallback: usize) -> usize {
        match optimize_from_database(&self.db, None, AUTO_OPTIMIZE_MIN_K, AUTO_OPTIMIZE_MAX_K).await {
            Ok(report) => {
                info!(
                    "Optimised cluster count: {} (silhouette {:.3})",
                    report.best_n_clusters, report.best_silhouette_score
                );
                report.best_n_clusters
            }
            Err(e) => {
                warn!("Cluster optimisation failed, keeping n_clusters={}: {}", fallback, e);
                fallback
            }
        }
    }

    async fn update_predictions(&self) -> Result<(JobStatus, String, Value)> {
        let config = self.config().await;

        let Some(bundle) = self.models.read().await.clone() else {
            return Ok((
                JobStatus::Skipped,
                "No trained model".to_string(),
                Value::Null,
            ));
        };

        let now = now();
        let candidates = users_needing_update(
            &self.db,
            now - Duration::hours(config.update_threshold_hours),
            now - Duration::days(config.active_window_days),
            config.max_users_per_update,
        )
        .await?;

        let mut updated = 0usize;
        let mut failed = 0usize;
        for batch in candidates.chunks(config.prediction_batch_size.max(1)) {
            let activities = load_activity_for(&self.db, batch).await?;
            failed += batch.len() - activities.len();
            for activity in &activities {
                let metrics = score_user(&bundle, activity, now).to_metrics(now);
                match upsert_user_metrics(&self.db, &metrics).await {
                    Ok(()) => updated += 1,
                    Err(e) => {
                        warn!("Failed to update metrics for user {}: {}", activity.user_id(), e);
                        failed += 1;
                    }
                }
            }
        }

        let success_rate = if candidates.is_empty() {
            1.0
        } else {
            updated as f64 / candidates.len() as f64
        };
        Ok((
            JobStatus::Success,
            format!("Updated {} of {} users", updated, candidates.len()),
            json!({
                "candidates": candidates.len(),
                "updated": updated,
                "failed": failed,
                "success_rate": success_rate,
                "model_version": bundle.model_version,
            }),
        ))
    }
}

fn finish(
    job: JobKind,
    trigger: TriggerKind,
    started_at: DateTime<Utc>,
    result: Result<(JobStatus, String, Value)>,
) -> JobOutcome {
    let (status, message, details) = match result {
        Ok(parts) => parts,
        Err(e) => {
            error!("{:?} job failed: {}", job, e);
            (JobStatus::Failed, e.to_string(), Value::Null)
        }
    };
    info!("{:?} ({}) finished: {:?} - {}", job, trigger.as_str(), status, message);

    JobOutcome {
        job,
        trigger,
        status,
        started_at,
        finished_at: now(),
        message,
        details,
    }
}

/// Train, save (with optional backup), swap the live bundle and record the run
pub async fn train_and_publish(
    db: &SqlitePool,
    store: &ModelStore,
    models: &SharedModels,
    options: TrainOptions,
    backup_previous: bool,
    trigger: TriggerKind,
) -> Result<TrainingReport> {
    let (bundle, report) = train_models(db, options).await?;

    store.save(&bundle, backup_previous).await?;
    record_model_run(
        db,
        &report.model_version,
        trigger.as_str(),
        report.supervised_samples as i64,
        &report.run_metrics(),
    )
    .await?;

    *models.write().await = Some(Arc::new(bundle));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_daily_next_run() {
        let now = at(2024, 6, 3, 1, 30);
        assert_eq!(next_run_after(now, Frequency::Daily, hm(2, 0), 1), at(2024, 6, 3, 2, 0));

        // Exactly at the scheduled time: strictly after means tomorrow
        let now = at(2024, 6, 3, 2, 0);
        assert_eq!(next_run_after(now, Frequency::Daily, hm(2, 0), 1), at(2024, 6, 4, 2, 0));
    }

    #[test]
    fn test_hourly_next_run() {
        let now = at(2024, 6, 3, 10, 20);
        assert_eq!(next_run_after(now, Frequency::Hourly, hm(0, 15), 1), at(2024, 6, 3, 11, 15));
        assert_eq!(next_run_after(now, Frequency::Hourly, hm(7, 45), 1), at(2024, 6, 3, 10, 45));
    }

    #[test]
    fn test_weekly_next_run() {
        // 2024-06-03 is a Monday
        let now = at(2024, 6, 3, 12, 0);
        assert_eq!(next_run_after(now, Frequency::Weekly, hm(2, 0), 3), at(2024, 6, 5, 2, 0));
        assert_eq!(next_run_after(now, Frequency::Weekly, hm(2, 0), 1), at(2024, 6, 10, 2, 0));
        assert_eq!(next_run_after(now, Frequency::Weekly, hm(18, 0), 1), at(2024, 6, 3, 18, 0));
        assert_eq!(next_run_after(now, Frequency::Weekly, hm(9, 0), 7), at(2024, 6, 9, 9, 0));
    }

    #[test]
    fn test_partial_update_and_validation() {
        let base = SchedulerConfig::default();
        let update: SchedulerConfigUpdate =
            serde_json::from_value(json!({"retraining_frequency": "weekly", "n_clusters": 6}))
                .unwrap();
        let updated = update.apply(&base);

        assert_eq!(updated.retraining_frequency, Frequency::Weekly);
        assert_eq!(updated.n_clusters, 6);
        assert_eq!(updated.prediction_update_time, "03:00");
        assert!(updated.validate().is_ok());

        let bad = SchedulerConfigUpdate {
            retraining_time: Some("25:99".to_string()),
            ..Default::default()
        }
        .apply(&base);
        assert!(matches!(bad.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_update_field_rejected() {
        let result = serde_json::from_value::<SchedulerConfigUpdate>(json!({"bogus": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_disabled_jobs_have_no_next_run() {
        let config = SchedulerConfig {
            retraining_enabled: false,
            ..Default::default()
        };
        let runs = config.next_runs(at(2024, 6, 3, 0, 0));
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, JobKind::UpdatePredictions);
    }
}
