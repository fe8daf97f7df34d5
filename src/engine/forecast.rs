use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BatchReport, ForecastError, HistoryProvider};
use crate::ml::{derive_features, FeatureConfig, ModelRegistry};
use crate::types::{last_date, Currency, Observation, Prediction};

/// Proof that this cycle's forecast has run. Only [`ForecastEngine::forecast_all`]
/// creates one, and retraining consumes it.
#[must_use = "retraining needs the receipt of this cycle's forecast"]
#[derive(Debug)]
pub struct ForecastReceipt {
    cycle_id: Uuid,
    target_date: Option<NaiveDate>,
}

impl ForecastReceipt {
    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    pub fn target_date(&self) -> Option<NaiveDate> {
        self.target_date
    }
}

#[derive(Debug)]
pub struct ForecastOutcome {
    pub cycle_id: Uuid,
    /// Day after the latest observation across the universe; `None` when
    /// every history was empty.
    pub target_date: Option<NaiveDate>,
    pub report: BatchReport<Prediction>,
    pub receipt: ForecastReceipt,
}

impl ForecastOutcome {
    pub fn predictions(&self) -> &[Prediction] {
        &self.report.completed
    }
}

/// Runs the walk-forward cycle over the tracked currencies: next-day
/// forecasts with the stored models, then refits on the full history.
pub struct ForecastEngine {
    history: Arc<dyn HistoryProvider>,
    registry: ModelRegistry,
    features: FeatureConfig,
}

impl ForecastEngine {
    pub fn new(history: Arc<dyn HistoryProvider>, registry: ModelRegistry, features: FeatureConfig) -> Self {
        Self {
            history,
            registry,
            features,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn features(&self) -> &FeatureConfig {
        &self.features
    }

    pub(super) fn history_provider(&self) -> &dyn HistoryProvider {
        self.history.as_ref()
    }

    /// Predicts the next day for every currency, in universe order.
    pub async fn forecast_all(&self, currencies: &[Currency]) -> ForecastOutcome {
        let cycle_id = Uuid::new_v4();
        info!("Forecast cycle {} over {} currencies", cycle_id, currencies.len());

        let mut report = BatchReport::new();
        let mut values = Vec::with_capacity(currencies.len());
        let mut latest: Option<NaiveDate> = None;

        for currency in currencies {
            let history = match self.history.history(currency).await {
                Ok(history) => history,
                Err(e) => {
                    warn!("Loading history failed for {}: {:#}", currency.code, e);
                    report.fail(currency.code.clone(), ForecastError::from(e));
                    continue;
                }
            };
            let Some(last) = last_date(&history) else {
                debug!("{}: no observations, skipping", currency.code);
                report.skip(currency.code.clone());
                continue;
            };
            // Every observed day counts towards the target date, even when
            // this currency's forecast fails.
            latest = latest.max(Some(last));

            match self.forecast_one(currency, &history) {
                Ok(value) => {
                    debug!("{}: last observation {}, forecast {:.6}", currency.code, last, value);
                    values.push((currency.code.clone(), value));
                }
                Err(e) => {
                    warn!("Forecast failed for {}: {}", currency.code, e);
                    report.fail(currency.code.clone(), e);
                }
            }
        }

        let target_date = latest.and_then(|d| d.succ_opt());
        if let Some(target_date) = target_date {
            for (currency, value) in values {
                report.complete(Prediction {
                    currency,
                    target_date,
                    value,
                });
            }
        }

        info!(
            "Forecast cycle {}: {} predicted for {:?}, {} skipped, {} failed",
            cycle_id,
            report.completed.len(),
            target_date,
            report.skipped.len(),
            report.failed.len()
        );

        ForecastOutcome {
            cycle_id,
            target_date,
            report,
            receipt: ForecastReceipt {
                cycle_id,
                target_date,
            },
        }
    }

    /// Next-day value from a non-empty history and the stored model.
    fn forecast_one(&self, currency: &Currency, history: &[Observation]) -> Result<f64, ForecastError> {
        let table = derive_features(history, &self.features);
        let latest = table.latest().ok_or(ForecastError::EmptyHistory)?;
        let inputs = latest.feature_vector().ok_or_else(|| {
            debug!(
                "{}: {} of {} features undefined on {}",
                currency.code,
                latest.undefined_count(),
                table.columns().len(),
                latest.date
            );
            ForecastError::InsufficientHistory {
                required: self.features.min_history(),
                available: history.len(),
            }
        })?;

        let stored = self.registry.load(&currency.code)?;
        Ok(stored.model.predict(&inputs)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::MockHistoryProvider;
    use crate::ml::model::PersistenceModel;
    use crate::ml::{
        ForecastModel, InMemoryModelStore, ModelSettings, ModelVersion, StoredModel,
    };
    use crate::types::{daily_series, CurrencyCode, Observation, RateTable};
    use std::collections::HashMap;

    pub(crate) fn currency(code: &str) -> Currency {
        Currency::new(CurrencyCode::new(code).unwrap(), code.to_lowercase(), RateTable::A)
    }

    pub(crate) fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    pub(crate) fn ramp(n: usize) -> Vec<Observation> {
        let values: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        daily_series(day(1), &values)
    }

    pub(crate) fn histories(entries: Vec<(&str, Vec<Observation>)>) -> Arc<dyn HistoryProvider> {
        let series: HashMap<CurrencyCode, Vec<Observation>> = entries
            .into_iter()
            .map(|(code, h)| (CurrencyCode::new(code).unwrap(), h))
            .collect();
        let mut provider = MockHistoryProvider::new();
        provider
            .expect_history()
            .returning(move |c| Ok(series.get(&c.code).cloned().unwrap_or_default()));
        Arc::new(provider)
    }

    pub(crate) fn persistence_model(code: &str) -> StoredModel {
        let columns = FeatureConfig::default().columns();
        StoredModel {
            currency: CurrencyCode::new(code).unwrap(),
            version: ModelVersion::initial(),
            trained_at: None,
            report: None,
            model: ForecastModel::Persistence(PersistenceModel::for_columns(&columns).unwrap()),
        }
    }

    fn engine(history: Arc<dyn HistoryProvider>, models: Vec<StoredModel>) -> ForecastEngine {
        let registry = ModelRegistry::new(
            Box::new(InMemoryModelStore::with_models(models)),
            ModelSettings::default(),
        );
        ForecastEngine::new(history, registry, FeatureConfig::default())
    }

    #[tokio::test]
    async fn test_ramp_forecast_with_last_value_model() {
        let engine = engine(histories(vec![("USD", ramp(20))]), vec![persistence_model("USD")]);
        let outcome = engine.forecast_all(&[currency("USD")]).await;

        assert!(outcome.report.is_clean());
        assert_eq!(outcome.target_date, Some(day(21)));
        assert_eq!(
            outcome.predictions(),
            &[Prediction {
                currency: CurrencyCode::new("USD").unwrap(),
                target_date: day(21),
                value: 119.0,
            }]
        );
        assert_eq!(outcome.receipt.cycle_id(), outcome.cycle_id);
    }

    #[tokio::test]
    async fn test_empty_history_is_skipped() {
        let engine = engine(
            histories(vec![("USD", ramp(25)), ("AFN", Vec::new())]),
            vec![persistence_model("USD"), persistence_model("AFN")],
        );
        let outcome = engine.forecast_all(&[currency("AFN"), currency("USD")]).await;

        assert_eq!(outcome.report.skipped, vec![CurrencyCode::new("AFN").unwrap()]);
        assert_eq!(outcome.predictions().len(), 1);
        assert_eq!(outcome.predictions()[0].value, 124.0);
        assert!(outcome.report.is_clean());
    }

    #[tokio::test]
    async fn test_missing_model_fails_only_that_currency() {
        let engine = engine(
            histories(vec![("USD", ramp(30)), ("EUR", ramp(30))]),
            vec![persistence_model("EUR")],
        );
        let outcome = engine.forecast_all(&[currency("USD"), currency("EUR")]).await;

        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.report.failed[0].currency.as_str(), "USD");
        assert!(outcome.report.failed[0].error.contains("no model stored for USD"));
        assert_eq!(outcome.predictions().len(), 1);
        assert_eq!(outcome.predictions()[0].currency.as_str(), "EUR");
    }

    #[tokio::test]
    async fn test_short_history_is_reported_not_predicted() {
        let engine = engine(histories(vec![("CHF", ramp(12))]), vec![persistence_model("CHF")]);
        let outcome = engine.forecast_all(&[currency("CHF")]).await;

        assert!(outcome.predictions().is_empty());
        assert_eq!(
            outcome.report.failed[0].error,
            "insufficient history: need 20 observations, have 12"
        );
        // The cycle still has a target date from the observed data.
        assert_eq!(outcome.target_date, Some(day(13)));
    }

    #[tokio::test]
    async fn test_target_date_is_the_latest_across_currencies() {
        let mut eur = ramp(22);
        eur.push(Observation::new(day(25), 130.0));
        let engine = engine(
            histories(vec![("USD", ramp(20)), ("EUR", eur)]),
            vec![persistence_model("USD"), persistence_model("EUR")],
        );
        let outcome = engine.forecast_all(&[currency("USD"), currency("EUR")]).await;

        assert_eq!(outcome.target_date, Some(day(26)));
        assert!(outcome.predictions().iter().all(|p| p.target_date == day(26)));
        assert_eq!(outcome.predictions()[0].currency.as_str(), "USD");
    }

    #[tokio::test]
    async fn test_failed_currency_still_sets_target_date() {
        let engine = engine(
            histories(vec![("USD", ramp(25)), ("EUR", ramp(20))]),
            vec![persistence_model("EUR")],
        );
        let outcome = engine.forecast_all(&[currency("USD"), currency("EUR")]).await;

        assert_eq!(outcome.report.failed[0].currency.as_str(), "USD");
        assert_eq!(outcome.target_date, Some(day(26)));
        assert_eq!(outcome.receipt.target_date(), Some(day(26)));
        assert_eq!(outcome.predictions()[0].target_date, day(26));
        assert_eq!(outcome.predictions()[0].value, 119.0);
    }

    #[tokio::test]
    async fn test_history_error_fails_only_that_currency() {
        let mut provider = MockHistoryProvider::new();
        provider.expect_history().returning(|c| {
            if c.code.as_str() == "USD" {
                Err(anyhow::anyhow!("database is locked"))
            } else {
                Ok(ramp(20))
            }
        });
        let engine = engine(Arc::new(provider), vec![persistence_model("EUR")]);
        let outcome = engine.forecast_all(&[currency("USD"), currency("EUR")]).await;

        assert_eq!(outcome.report.failed[0].error, "database is locked");
        assert_eq!(outcome.predictions().len(), 1);
        assert_eq!(outcome.target_date, Some(day(21)));
    }

    #[tokio::test]
    async fn test_all_empty_histories() {
        let engine = engine(histories(vec![]), vec![]);
        let outcome = engine.forecast_all(&[currency("USD"), currency("EUR")]).await;

        assert_eq!(outcome.target_date, None);
        assert_eq!(outcome.report.skipped.len(), 2);
        assert!(outcome.receipt.target_date().is_none());
    }
}
