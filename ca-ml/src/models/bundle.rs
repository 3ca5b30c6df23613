//! Trained model bundle and its on-disk store

use super::{ClassificationMetrics, KMeans, LogisticModel, SegmentProfile, StandardScaler};
use ca_common::config::RootFolder;
use ca_common::features::FeatureVector;
use ca_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const BUNDLE_FILE: &str = "model_bundle.json";

/// Live model slot shared by the HTTP handlers and the scheduler
pub type SharedModels = Arc<RwLock<Option<Arc<ModelBundle>>>>;

/// A trained binary classifier with its held-out evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub model: LogisticModel,
    pub metrics: ClassificationMetrics,
    /// Share of positive labels in the supervised set
    pub positive_rate: f64,
    pub train_samples: usize,
    pub test_samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub horizon_days: i64,
    pub scaler: StandardScaler,
    pub kmeans: KMeans,
    pub silhouette_score: f64,
    pub segments: Vec<SegmentProfile>,
    pub purchase: TrainedClassifier,
    pub churn: TrainedClassifier,
    pub segmentation_samples: usize,
    pub supervised_samples: usize,
}

impl ModelBundle {
    pub fn version_for(trained_at: DateTime<Utc>) -> String {
        format!("v{}", trained_at.timestamp())
    }

    fn scaled(&self, vector: &FeatureVector) -> Vec<f64> {
        self.scaler.transform(&vector.values)
    }

    pub fn purchase_probability(&self, vector: &FeatureVector) -> f64 {
        self.purchase.model.predict_proba(&self.scaled(vector))
    }

    pub fn churn_probability(&self, vector: &FeatureVector) -> f64 {
        self.churn.model.predict_proba(&self.scaled(vector))
    }

    pub fn segment_of(&self, vector: &FeatureVector) -> usize {
        self.kmeans.predict(&self.scaled(vector))
    }

    pub fn segment_name(&self, segment_id: usize) -> String {
        self.segments
            .iter()
            .find(|s| s.segment_id == segment_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("Segment {}", segment_id))
    }

    /// Feature names paired with normalised importance, largest first
    pub fn feature_importance(&self, classifier: &TrainedClassifier) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(classifier.model.feature_importance())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Persists the bundle as pretty JSON under `<root>/models`
#[derive(Debug, Clone)]
pub struct ModelStore {
    models_dir: PathBuf,
    backup_dir: PathBuf,
}

impl ModelStore {
    pub fn new(root: &RootFolder) -> Self {
        Self {
            models_dir: root.models_dir(),
            backup_dir: root.backup_dir(),
        }
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.models_dir.join(BUNDLE_FILE)
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// `None` when no bundle has been saved yet
    pub async fn load(&self) -> Result<Option<ModelBundle>> {
        let path = self.bundle_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bundle: ModelBundle = serde_json::from_str(&content)?;
        info!("Loaded model bundle {} from {}", bundle.model_version, path.display());
        Ok(Some(bundle))
    }

    /// Write the bundle, optionally copying the previous file to the backup
    /// directory first; returns the backup path when one was made
    pub async fn save(&self, bundle: &ModelBundle, backup_previous: bool) -> Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.models_dir).await?;
        let path = self.bundle_path();

        let mut backup_path = None;
        if backup_previous && tokio::fs::try_exists(&path).await? {
            tokio::fs::create_dir_all(&self.backup_dir).await?;
            let previous_version = match self.load().await {
                Ok(Some(previous)) => previous.model_version,
                Ok(None) => ModelBundle::version_for(ca_common::time::now()),
                Err(e) => {
                    warn!("Previous model bundle is unreadable ({}), backing up raw file", e);
                    format!("unreadable-{}", ca_common::time::now().timestamp())
                }
            };
            let target = self
                .backup_dir
                .join(format!("model_bundle-{}.json", previous_version));
            tokio::fs::copy(&path, &target).await?;
            info!("Backed up previous model bundle to {}", target.display());
            backup_path = Some(target);
        }

        let json = serde_json::to_string_pretty(bundle)?;
        let tmp = self.models_dir.join(format!("{}.tmp", BUNDLE_FILE));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Internal(format!("Failed to replace model bundle: {}", e)))?;

        info!("Saved model bundle {} to {}", bundle.model_version, path.display());
        Ok(backup_path)
    }
}
