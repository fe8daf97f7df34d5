pub mod features;
pub mod model;
pub mod persistence;
pub mod registry;

pub use features::{derive_features, FeatureColumn, FeatureConfig, FeatureRow, FeatureTable, TrainingSet};
pub use model::{FitReport, ForecastModel, ModelError, ModelKind, ModelSettings};
pub use persistence::{FileModelStore, ModelStore, ModelVersion, StoredModel};
#[cfg(test)]
pub(crate) use persistence::InMemoryModelStore;
pub use registry::{ModelRegistry, RegistryError};
