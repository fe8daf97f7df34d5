use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::ml::model::{FitReport, ForecastModel};
use crate::types::CurrencyCode;

/// Semantic version for models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn unfitted() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A currency's model together with its lifecycle metadata, as written to
/// disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredModel {
    pub currency: CurrencyCode,
    pub version: ModelVersion,
    pub trained_at: Option<DateTime<Utc>>,
    pub report: Option<FitReport>,
    pub model: ForecastModel,
}

impl StoredModel {
    pub fn unfitted(currency: CurrencyCode, model: ForecastModel) -> Self {
        Self {
            currency,
            version: ModelVersion::unfitted(),
            trained_at: None,
            report: None,
            model,
        }
    }
}

/// Durable home of per-currency models. `save` overwrites.
pub trait ModelStore: Send + Sync {
    fn load(&self, currency: &CurrencyCode) -> Result<Option<StoredModel>>;
    fn save(&self, stored: &StoredModel) -> Result<()>;
}

/// One JSON file per currency: `<models_dir>/model_<CODE>.json`.
pub struct FileModelStore {
    models_dir: PathBuf,
}

impl FileModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Ensure models directory exists
    pub fn ensure_models_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir).with_context(|| {
            format!("creating models directory {}", self.models_dir.display())
        })?;
        Ok(())
    }

    pub fn model_path(&self, currency: &CurrencyCode) -> PathBuf {
        self.models_dir.join(format!("model_{}.json", currency))
    }
}

impl ModelStore for FileModelStore {
    fn load(&self, currency: &CurrencyCode) -> Result<Option<StoredModel>> {
        let path = self.model_path(currency);
        if !path.exists() {
            debug!("No model file for {} at {}", currency, path.display());
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let stored: StoredModel = serde_json::from_str(&json)
            .with_context(|| format!("decoding {}", path.display()))?;
        if &stored.currency != currency {
            return Err(anyhow!(
                "Model file {} belongs to {}, not {}",
                path.display(),
                stored.currency,
                currency
            ));
        }

        debug!("Loaded {} model v{} from {}", currency, stored.version, path.display());
        Ok(Some(stored))
    }

    fn save(&self, stored: &StoredModel) -> Result<()> {
        self.ensure_models_dir()?;
        let path = self.model_path(&stored.currency);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(stored)?;
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {}", path.display()))?;

        info!(
            "Saved {} {} model v{} to {}",
            stored.currency,
            stored.model.kind(),
            stored.version,
            path.display()
        );
        Ok(())
    }
}


#[cfg(test)]
pub(crate) use memory::InMemoryModelStore;
