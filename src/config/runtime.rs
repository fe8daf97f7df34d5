use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::exchange::NBP_API;
use crate::ml::{FeatureConfig, ModelSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub models: ModelsConfig,
    pub features: FeatureConfig,
    pub model: ModelSettings,
    pub nbp: NbpConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url must not be empty".to_string());
        }
        if self.models.dir.as_os_str().is_empty() {
            errors.push("models.dir must not be empty".to_string());
        }

        if let Err(feature_errors) = self.features.validate() {
            errors.extend(feature_errors);
        }

        if !self.model.ridge_alpha.is_finite() || self.model.ridge_alpha <= 0.0 {
            errors.push("model.ridge_alpha must be a finite number > 0".to_string());
        }

        if !self.nbp.base_url.starts_with("http://") && !self.nbp.base_url.starts_with("https://") {
            errors.push("nbp.base_url must be an http(s) URL".to_string());
        }
        if self.nbp.requests_per_second == 0 {
            errors.push("nbp.requests_per_second must be > 0".to_string());
        }
        if self.nbp.timeout_secs == 0 {
            errors.push("nbp.timeout_secs must be > 0".to_string());
        }

        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            errors.push(format!("logging.level {:?} is not a log level", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://currencies.db`.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://currencies.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub dir: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NbpConfig {
    pub base_url: String,
    /// First day of the backfill run by `init`.
    pub history_start: NaiveDate,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for NbpConfig {
    fn default() -> Self {
        Self {
            base_url: NBP_API.to_string(),
            history_start: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
            requests_per_second: 10,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
