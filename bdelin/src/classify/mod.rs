//! Boundary classification: a random forest over the segment attributes,
//! its persistence, and the train/apply workflow.

pub mod classification;
pub mod forest;
pub mod store;

pub use classification::{
    feature_vector, predict, train, Classification, PredictionReport, TrainedClassifier,
    TrainingReport, FEATURE_ATTRIBUTES, NO_DATA_SENTINEL,
};
pub use forest::{ForestParams, ProbabilityModel, RandomForest};
pub use store::{ClassifierRepository, ClassifierStore, LocalClassifierStore};

#[cfg(feature = "reqwest")]
pub use store::RemoteClassifierStore;
