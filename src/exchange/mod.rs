pub mod nbp;

pub use nbp::*;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Currency, CurrencyCode, Observation, RateTable};

/// One mid rate from a published table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub code: CurrencyCode,
    pub name: String,
    pub mid: f64,
}

/// A rate table as published for one effective date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table: RateTable,
    pub effective_date: NaiveDate,
    pub rates: Vec<RateQuote>,
}

impl TableSnapshot {
    pub fn currencies(&self) -> Vec<Currency> {
        self.rates
            .iter()
            .map(|q| Currency::new(q.code.clone(), q.name.clone(), self.table))
            .collect()
    }

    pub fn observations(&self) -> impl Iterator<Item = (&CurrencyCode, Observation)> + '_ {
        self.rates
            .iter()
            .map(move |q| (&q.code, Observation::new(self.effective_date, q.mid)))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Most recently published table.
    async fn current_table(&self, table: RateTable) -> anyhow::Result<TableSnapshot>;

    /// Table published on `date`, or `None` when nothing was published that
    /// day.
    async fn table_on(&self, table: RateTable, date: NaiveDate) -> anyhow::Result<Option<TableSnapshot>>;
}

/// Every table published between `start` and `end` inclusive; days without a
/// publication are skipped.
pub async fn historical_tables(
    source: &dyn RateSource,
    table: RateTable,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<TableSnapshot>> {
    let mut tables = Vec::new();
    for date in start.iter_days().take_while(|d| *d <= end) {
        if let Some(snapshot) = source.table_on(table, date).await? {
            tables.push(snapshot);
        }
    }
    info!(
        "Fetched {} {} tables between {} and {}",
        tables.len(),
        table,
        start,
        end
    );
    Ok(tables)
}
