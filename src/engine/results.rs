use serde::Serialize;

use crate::types::CurrencyCode;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyFailure {
    pub currency: CurrencyCode,
    pub error: String,
}

/// Per-currency outcome of a batch. A failing currency never aborts the
/// batch; it is listed here with its reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport<T> {
    pub completed: Vec<T>,
    pub skipped: Vec<CurrencyCode>,
    pub failed: Vec<CurrencyFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&mut self, item: T) {
        self.completed.push(item);
    }

    pub fn skip(&mut self, currency: CurrencyCode) {
        self.skipped.push(currency);
    }

    pub fn fail(&mut self, currency: CurrencyCode, error: impl ToString) {
        self.failed.push(CurrencyFailure {
            currency,
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.skipped.len() + self.failed.len()
    }

    pub fn failed_codes(&self) -> Vec<&CurrencyCode> {
        self.failed.iter().map(|f| &f.currency).collect()
    }
}
