use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{BatchReport, CurrencyUniverse, ForecastEngine, PredictionSink, RetrainedModel};
use crate::types::Prediction;

#[derive(Debug, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub target_date: Option<NaiveDate>,
    pub forecast: BatchReport<Prediction>,
    pub retrain: BatchReport<RetrainedModel>,
}

/// One walk-forward cycle: forecast every tracked currency with its current
/// model, record the predictions, then refit on the full history.
///
/// When the predictions cannot be recorded the cycle stops before any model
/// is refit.
pub async fn run_cycle(
    engine: &ForecastEngine,
    universe: &dyn CurrencyUniverse,
    sink: &dyn PredictionSink,
) -> Result<CycleSummary> {
    let currencies = universe
        .currencies()
        .await
        .context("loading tracked currencies")?;
    if currencies.is_empty() {
        info!("No tracked currencies, nothing to forecast");
    }

    let outcome = engine.forecast_all(&currencies).await;
    let cycle_id = outcome.cycle_id;

    sink.record(cycle_id, outcome.predictions())
        .await
        .with_context(|| format!("recording predictions of cycle {}", cycle_id))?;

    let retrain = engine.retrain_all(&currencies, outcome.receipt).await;
    let forecast = outcome.report;

    info!(
        "Cycle {} finished: {} predictions, {} models refit",
        cycle_id,
        forecast.completed.len(),
        retrain.completed.len()
    );

    Ok(CycleSummary {
        cycle_id,
        target_date: outcome.target_date,
        forecast,
        retrain,
    })
}
