use serde::Serialize;
use tracing::{debug, info, warn};

use super::{BatchReport, ForecastEngine, ForecastError, ForecastReceipt};
use crate::ml::{derive_features, FitReport, ModelVersion};
use crate::types::{Currency, CurrencyCode};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainedModel {
    pub currency: CurrencyCode,
    pub version: ModelVersion,
    pub report: FitReport,
}

impl ForecastEngine {
    /// Refits every currency's model on its full history and persists it.
    /// Takes the receipt of the forecast that must precede it.
    pub async fn retrain_all(
        &self,
        currencies: &[Currency],
        receipt: ForecastReceipt,
    ) -> BatchReport<RetrainedModel> {
        info!(
            "Retraining {} models after forecast cycle {} (target {:?})",
            currencies.len(),
            receipt.cycle_id(),
            receipt.target_date()
        );

        let mut report = BatchReport::new();
        for currency in currencies {
            match self.retrain_one(currency).await {
                Ok(retrained) => {
                    debug!(
                        "{}: v{} fit on {} samples, rmse={:.6}",
                        currency.code, retrained.version, retrained.report.samples, retrained.report.rmse
                    );
                    report.complete(retrained);
                }
                Err(ForecastError::EmptyHistory) => report.skip(currency.code.clone()),
                Err(e) => {
                    warn!("Retrain failed for {}: {}", currency.code, e);
                    report.fail(currency.code.clone(), e);
                }
            }
        }

        info!(
            "Retrain after cycle {}: {} refit, {} skipped, {} failed",
            receipt.cycle_id(),
            report.completed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn retrain_one(&self, currency: &Currency) -> Result<RetrainedModel, ForecastError> {
        let history = self.history_provider().history(currency).await?;
        if history.is_empty() {
            return Err(ForecastError::EmptyHistory);
        }

        let set = derive_features(&history, self.features()).training_set();
        if set.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                required: self.features().min_history(),
                available: history.len(),
            });
        }

        let registry = self.registry();
        let mut stored = registry.load_or_fresh(&currency.code)?;
        let report = registry.fit(&mut stored, &set)?;
        registry.save(&stored)?;

        Ok(RetrainedModel {
            currency: currency.code.clone(),
            version: stored.version,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::forecast::tests::{currency, histories, persistence_model, ramp};
    use crate::ml::{
        FeatureConfig, InMemoryModelStore, ModelKind, ModelRegistry, ModelSettings, StoredModel,
    };
    use crate::types::{daily_series, Observation};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn wavy(n: usize) -> Vec<Observation> {
        let values: Vec<f64> = (0..n)
            .map(|i| 4.1 + 0.004 * i as f64 + 0.03 * ((i * 7 % 10) as f64 - 4.5) / 4.5)
            .collect();
        daily_series(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), &values)
    }

    fn engine(
        history: Arc<dyn crate::engine::HistoryProvider>,
        models: Vec<StoredModel>,
        kind: ModelKind,
    ) -> ForecastEngine {
        let registry = ModelRegistry::new(
            Box::new(InMemoryModelStore::with_models(models)),
            ModelSettings {
                kind,
                ..ModelSettings::default()
            },
        );
        ForecastEngine::new(history, registry, FeatureConfig::default())
    }

    #[tokio::test]
    async fn test_retrain_bootstraps_missing_models() {
        let engine = engine(histories(vec![("USD", wavy(40))]), vec![], ModelKind::Ridge);
        let usd = currency("USD");

        let before = engine.forecast_all(&[usd.clone()]).await;
        assert_eq!(before.report.failed.len(), 1);

        let report = engine.retrain_all(&[usd.clone()], before.receipt).await;
        assert!(report.is_clean());
        assert_eq!(report.completed[0].version, ModelVersion::initial());
        assert_eq!(report.completed[0].report.samples, 37);

        let after = engine.forecast_all(&[usd]).await;
        assert!(after.report.is_clean());
        assert_eq!(after.predictions().len(), 1);
    }

    #[tokio::test]
    async fn test_retrain_first_changes_the_forecast() {
        let full = wavy(60);
        let seed = engine(histories(vec![("EUR", full[..40].to_vec())]), vec![], ModelKind::Ridge);
        let eur = currency("EUR");
        let warmup = seed.forecast_all(&[eur.clone()]).await;
        seed.retrain_all(&[eur.clone()], warmup.receipt).await;
        let model = seed.registry().load(&eur.code).unwrap();

        let engine = engine(histories(vec![("EUR", full)]), vec![model], ModelKind::Ridge);
        let forecast_first = engine.forecast_all(&[eur.clone()]).await;
        let retrained = engine.retrain_all(&[eur.clone()], forecast_first.receipt).await;
        assert_eq!(retrained.completed[0].version, ModelVersion::new(1, 0, 1));

        let after_retrain = engine.forecast_all(&[eur]).await;
        let old = forecast_first.report.completed[0].value;
        let new = after_retrain.report.completed[0].value;
        assert!((old - new).abs() > 1e-9, "old={} new={}", old, new);
    }

    #[tokio::test]
    async fn test_retrain_reports_skips_and_failures() {
        let engine = engine(
            histories(vec![("USD", ramp(30)), ("CHF", ramp(8))]),
            vec![persistence_model("USD")],
            ModelKind::Persistence,
        );
        let universe = [currency("USD"), currency("AFN"), currency("CHF")];
        let outcome = engine.forecast_all(&universe).await;
        let report = engine.retrain_all(&universe, outcome.receipt).await;

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].version, ModelVersion::new(1, 0, 1));
        assert_eq!(report.skipped[0].as_str(), "AFN");
        assert_eq!(report.failed[0].currency.as_str(), "CHF");
        assert!(report.failed[0].error.starts_with("insufficient history"));
    }
}
