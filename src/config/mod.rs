pub mod runtime;

pub use runtime::*;

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing::debug;

pub const ENV_PREFIX: &str = "FX";

/// Layers the built-in defaults, an optional TOML file and `FX_`-prefixed
/// environment variables (`FX_NBP__TIMEOUT_SECS=60`), then validates.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = config::Config::builder()
        .add_source(config::Config::try_from(&AppConfig::default())?);

    builder = match path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            builder.add_source(config::File::from(path).required(true))
        }
        None => builder.add_source(config::File::with_name("fx_forecaster").required(false)),
    };

    let config: AppConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("reading configuration")?
        .try_deserialize()
        .context("decoding configuration")?;

    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration: {}", errors.join(", ")))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ModelKind;
    use std::io::Write;

    #[test]
    fn test_load_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[model]\nkind = \"persistence\"\nridge_alpha = 0.5\n\n[models]\ndir = \"/tmp/fx-models\""
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.model.kind, ModelKind::Persistence);
        assert_eq!(config.model.ridge_alpha, 0.5);
        assert_eq!(config.models.dir, std::path::PathBuf::from("/tmp/fx-models"));
        assert_eq!(config.features.period, 10);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[features]\nperiod = 1").unwrap();

        let err = load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("features.period"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/fx_forecaster.toml"))).is_err());
    }
}
