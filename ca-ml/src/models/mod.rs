//! Hand-rolled learners and the persisted model bundle

pub mod bundle;
pub mod evaluation;
pub mod kmeans;
pub mod logistic;
pub mod scaler;
pub mod segments;

pub use bundle::{ModelBundle, ModelStore, SharedModels, TrainedClassifier};
pub use evaluation::{stratified_split, ClassificationMetrics};
pub use kmeans::{silhouette_score, KMeans};
pub use logistic::{LogisticModel, LogisticParams};
pub use scaler::StandardScaler;
pub use segments::{profile_segments, SegmentCharacteristics, SegmentProfile};
