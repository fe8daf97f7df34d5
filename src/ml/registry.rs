use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use super::features::TrainingSet;
use super::model::{FitReport, ForecastModel, ModelError, ModelSettings};
use super::persistence::{ModelStore, ModelVersion, StoredModel};
use crate::types::CurrencyCode;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no model stored for {0}")]
    ModelNotFound(CurrencyCode),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Owns the lifecycle of the per-currency models: one model per currency
/// code, loaded from and saved to a [`ModelStore`].
pub struct ModelRegistry {
    store: Box<dyn ModelStore>,
    settings: ModelSettings,
}

impl ModelRegistry {
    pub fn new(store: Box<dyn ModelStore>, settings: ModelSettings) -> Self {
        Self { store, settings }
    }

    pub fn load(&self, currency: &CurrencyCode) -> Result<StoredModel, RegistryError> {
        self.store
            .load(currency)?
            .ok_or_else(|| RegistryError::ModelNotFound(currency.clone()))
    }

    /// Overwrites whatever is stored for the model's currency.
    pub fn save(&self, stored: &StoredModel) -> Result<(), RegistryError> {
        self.store.save(stored)?;
        Ok(())
    }

    /// Unfitted model of the configured kind.
    pub fn fresh(&self, currency: &CurrencyCode) -> StoredModel {
        StoredModel::unfitted(currency.clone(), ForecastModel::new(&self.settings))
    }

    /// The stored model, or a fresh one when the currency has none yet.
    pub fn load_or_fresh(&self, currency: &CurrencyCode) -> Result<StoredModel, RegistryError> {
        match self.load(currency) {
            Ok(stored) => Ok(stored),
            Err(RegistryError::ModelNotFound(_)) => {
                info!("No model for {}, starting a fresh {} model", currency, self.settings.kind);
                Ok(self.fresh(currency))
            }
            Err(e) => Err(e),
        }
    }

    /// Full batch refit. On success the version moves to 1.0.0 on first fit
    /// and bumps its patch on every later one; on failure the model is left
    /// untouched.
    pub fn fit(&self, stored: &mut StoredModel, set: &TrainingSet) -> Result<FitReport, RegistryError> {
        let mut model = stored.model.clone();
        let report = model.fit(set)?;

        stored.version = if stored.model.is_fitted() {
            stored.version.bump_patch()
        } else {
            ModelVersion::initial()
        };
        stored.model = model;
        stored.trained_at = Some(Utc::now());
        stored.report = Some(report.clone());

        debug!(
            "Refit {} {} model -> v{} on {} samples",
            stored.currency,
            stored.model.kind(),
            stored.version,
            report.samples
        );
        Ok(report)
    }
}
