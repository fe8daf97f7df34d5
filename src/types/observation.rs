use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::CurrencyCode;

/// A single dated mid rate for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// One-day-ahead forecast for a currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub currency: CurrencyCode,
    pub target_date: NaiveDate,
    pub value: f64,
}

/// Builds a contiguous daily series starting at `start`.
#[cfg(test)]
pub fn daily_series(start: NaiveDate, values: &[f64]) -> Vec<Observation> {
    start
        .iter_days()
        .zip(values.iter())
        .map(|(date, &value)| Observation::new(date, value))
        .collect()
}

/// Latest date present in the series. Input is expected to be sorted
/// ascending but the maximum is taken anyway.
pub fn last_date(history: &[Observation]) -> Option<NaiveDate> {
    history.iter().map(|o| o.date).max()
}
