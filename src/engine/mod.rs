pub mod cycle;
pub mod forecast;
pub mod ingest;
pub mod results;
pub mod retrain;

pub use cycle::*;
pub use forecast::*;
pub use ingest::*;
pub use results::*;
pub use retrain::*;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::ml::{ModelError, RegistryError};
use crate::types::{Currency, CurrencyCode, Observation, Prediction};

/// Observed rates of a currency, oldest first; empty when none are stored.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn history(&self, currency: &Currency) -> anyhow::Result<Vec<Observation>>;
}

/// The tracked currencies, in iteration order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CurrencyUniverse: Send + Sync {
    async fn currencies(&self) -> anyhow::Result<Vec<Currency>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionSink: Send + Sync {
    async fn record(&self, cycle_id: Uuid, predictions: &[Prediction]) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("no observations")]
    EmptyHistory,

    #[error("insufficient history: need {required} observations, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("no model stored for {0}")]
    ModelNotFound(CurrencyCode),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RegistryError> for ForecastError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ModelNotFound(code) => ForecastError::ModelNotFound(code),
            RegistryError::Model(e) => ForecastError::Model(e),
            RegistryError::Store(e) => ForecastError::Other(e),
        }
    }
}
