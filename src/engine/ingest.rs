use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::database::Database;
use crate::exchange::{historical_tables, RateSource};
use crate::types::RateTable;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestSummary {
    pub currencies: usize,
    pub tables: usize,
    pub rates_inserted: u64,
}

/// Rebuilds the store from scratch: empties every table, tracks the
/// currencies of today's `a` and `b` tables (in that order), then backfills
/// their rates from `start` to `end` inclusive.
pub async fn database_init(
    db: &Database,
    source: &dyn RateSource,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<IngestSummary> {
    db.reset_schema().await?;

    let mut currencies = Vec::new();
    for table in RateTable::all() {
        let snapshot = source
            .current_table(table)
            .await
            .with_context(|| format!("fetching current table {}", table))?;
        currencies.extend(snapshot.currencies());
    }
    db.replace_currencies(&currencies).await?;

    let mut summary = IngestSummary {
        currencies: currencies.len(),
        ..IngestSummary::default()
    };
    for table in RateTable::all() {
        let snapshots = historical_tables(source, table, start, end)
            .await
            .with_context(|| format!("backfilling table {}", table))?;
        for snapshot in &snapshots {
            summary.rates_inserted += db.insert_rates(snapshot.observations()).await?;
            summary.tables += 1;
        }
    }

    info!(
        "Database initialised: {} currencies, {} tables, {} rates from {} to {}",
        summary.currencies, summary.tables, summary.rates_inserted, start, end
    );
    Ok(summary)
}

/// Stores the latest published `a` and `b` tables. Rates of untracked
/// currencies and already stored days are ignored.
pub async fn ingest_latest(db: &Database, source: &dyn RateSource) -> Result<IngestSummary> {
    let mut summary = IngestSummary {
        currencies: db.known_currencies().await?.len(),
        ..IngestSummary::default()
    };

    for table in RateTable::all() {
        let snapshot = source
            .current_table(table)
            .await
            .with_context(|| format!("fetching current table {}", table))?;
        let inserted = db.insert_rates(snapshot.observations()).await?;
        info!(
            "Table {} of {}: {} new rates",
            table, snapshot.effective_date, inserted
        );
        summary.rates_inserted += inserted;
        summary.tables += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HistoryProvider;
    use crate::exchange::{MockRateSource, RateQuote, TableSnapshot};
    use crate::types::{Currency, CurrencyCode};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn snapshot(table: RateTable, date: NaiveDate, quotes: &[(&str, f64)]) -> TableSnapshot {
        TableSnapshot {
            table,
            effective_date: date,
            rates: quotes
                .iter()
                .map(|(code, mid)| RateQuote {
                    code: CurrencyCode::new(code).unwrap(),
                    name: code.to_lowercase(),
                    mid: *mid,
                })
                .collect(),
        }
    }

    fn source() -> MockRateSource {
        let mut source = MockRateSource::new();
        source.expect_current_table().returning(|table| {
            Ok(match table {
                RateTable::A => snapshot(RateTable::A, day(5), &[("USD", 4.05), ("EUR", 4.30)]),
                RateTable::B => snapshot(RateTable::B, day(3), &[("AFN", 0.055)]),
            })
        });
        source.expect_table_on().returning(|table, date| {
            // Table a skips the weekend of the 6th; table b is published on the 3rd only.
            Ok(match table {
                RateTable::A if date != day(6) && date != day(7) => {
                    Some(snapshot(RateTable::A, date, &[("USD", 4.0), ("EUR", 4.25), ("GBP", 5.0)]))
                }
                RateTable::B if date == day(3) => Some(snapshot(RateTable::B, date, &[("AFN", 0.054)])),
                _ => None,
            })
        });
        source
    }

    async fn db(dir: &tempfile::TempDir) -> Database {
        Database::new(&format!("sqlite://{}", dir.path().join("fx.db").display()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_database_init_backfills_tracked_currencies() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(&dir).await;

        let summary = database_init(&db, &source(), day(1), day(8)).await.unwrap();

        assert_eq!(summary.currencies, 3);
        // Table a on 6 of 8 days, table b once.
        assert_eq!(summary.tables, 7);
        // GBP is not in today's table and is never stored.
        assert_eq!(summary.rates_inserted, 6 * 2 + 1);

        let tracked = db.known_currencies().await.unwrap();
        let codes: Vec<&str> = tracked.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["USD", "EUR", "AFN"]);

        let afn = Currency::new(CurrencyCode::new("AFN").unwrap(), "afn", RateTable::B);
        assert_eq!(db.history(&afn).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_latest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(&dir).await;
        database_init(&db, &source(), day(1), day(4)).await.unwrap();

        let first = ingest_latest(&db, &source()).await.unwrap();
        // Table a of the 5th is new, table b of the 3rd is already stored.
        assert_eq!(first.rates_inserted, 2);
        assert_eq!(first.tables, 2);

        let second = ingest_latest(&db, &source()).await.unwrap();
        assert_eq!(second.rates_inserted, 0);

        let usd = db.rates_for(&CurrencyCode::new("USD").unwrap()).await.unwrap();
        assert_eq!(usd.last().unwrap().date, day(5));
        assert_eq!(usd.last().unwrap().value, 4.05);
    }
}
