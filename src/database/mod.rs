use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{CurrencyUniverse, HistoryProvider, PredictionSink};
use crate::types::{Currency, CurrencyCode, Observation, Prediction, RateTable};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Realised accuracy of stored predictions for one currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyRow {
    pub currency: CurrencyCode,
    pub count: usize,
    pub mae: f64,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database with schema
    pub async fn new(url: &str) -> Result<Self> {
        info!("Initializing SQLite database at: {}", url);

        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parsing database url {}", url))?
            .create_if_missing(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    /// Create database schema
    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS currencies (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                source_table TEXT NOT NULL,
                position INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_rates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                currency_code TEXT NOT NULL,
                date TEXT NOT NULL,
                value REAL NOT NULL,
                UNIQUE(currency_code, date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id TEXT NOT NULL,
                currency_code TEXT NOT NULL,
                date TEXT NOT NULL,
                value REAL NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_date ON predictions(date)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drops every table and recreates an empty schema.
    pub async fn reset_schema(&self) -> Result<()> {
        for table in ["predictions", "exchange_rates", "currencies"] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&self.pool)
                .await?;
        }
        self.create_schema().await?;
        info!("Database schema reset");
        Ok(())
    }

    /// Replaces the tracked universe; list order becomes the iteration order.
    pub async fn replace_currencies(&self, currencies: &[Currency]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM currencies").execute(&mut *tx).await?;

        for (position, currency) in currencies.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO currencies (code, name, source_table, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(currency.code.as_str())
            .bind(&currency.name)
            .bind(currency.table.as_str())
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Stored {} tracked currencies", currencies.len());
        Ok(())
    }

    pub async fn known_currencies(&self) -> Result<Vec<Currency>> {
        let rows = sqlx::query(
            r#"
            SELECT code, name, source_table
            FROM currencies
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut currencies = Vec::with_capacity(rows.len());
        for row in rows {
            let code: String = row.get("code");
            let table: String = row.get("source_table");
            currencies.push(Currency::new(
                CurrencyCode::new(&code)?,
                row.get::<String, _>("name"),
                RateTable::from_str(&table)?,
            ));
        }
        Ok(currencies)
    }

    /// Stores rates of tracked currencies; unknown currencies and already
    /// stored (currency, date) pairs are ignored. Returns the rows inserted.
    pub async fn insert_rates<'a, I>(&self, rates: I) -> Result<u64>
    where
        I: IntoIterator<Item = (&'a CurrencyCode, Observation)>,
    {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for (code, obs) in rates {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO exchange_rates (currency_code, date, value)
                SELECT ?, ?, ?
                WHERE EXISTS (SELECT 1 FROM currencies WHERE code = ?)
                "#,
            )
            .bind(code.as_str())
            .bind(obs.date.format(DATE_FORMAT).to_string())
            .bind(obs.value)
            .bind(code.as_str())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!("Inserted {} exchange rates", inserted);
        Ok(inserted)
    }

    /// Full history of one currency, oldest first.
    pub async fn rates_for(&self, code: &CurrencyCode) -> Result<Vec<Observation>> {
        let rows = sqlx::query(
            r#"
            SELECT date, value
            FROM exchange_rates
            WHERE currency_code = ?
            ORDER BY date ASC
            "#,
        )
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let date: String = row.get("date");
            history.push(Observation::new(
                NaiveDate::parse_from_str(&date, DATE_FORMAT)?,
                row.get("value"),
            ));
        }
        Ok(history)
    }

    pub async fn insert_predictions(&self, cycle_id: Uuid, predictions: &[Prediction]) -> Result<()> {
        let created_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for prediction in predictions {
            sqlx::query(
                r#"
                INSERT INTO predictions (cycle_id, currency_code, date, value, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(cycle_id.to_string())
            .bind(prediction.currency.as_str())
            .bind(prediction.target_date.format(DATE_FORMAT).to_string())
            .bind(prediction.value)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Stored {} predictions for cycle {}", predictions.len(), cycle_id);
        Ok(())
    }

    /// Compares stored predictions dated on or after `since` with the rates
    /// later observed for the same day. Predictions without a realised rate
    /// are left out.
    pub async fn prediction_accuracy(&self, since: NaiveDate) -> Result<Vec<AccuracyRow>> {
        let rows = sqlx::query(
            r#"
            SELECT p.currency_code AS code, p.value AS predicted, r.value AS actual
            FROM predictions p
            JOIN exchange_rates r
              ON r.currency_code = p.currency_code AND r.date = p.date
            WHERE p.date >= ?
            "#,
        )
        .bind(since.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        // (count, abs error sum, pct error sum, pct count)
        let mut totals: BTreeMap<String, (usize, f64, f64, usize)> = BTreeMap::new();
        for row in rows {
            let predicted: f64 = row.get("predicted");
            let actual: f64 = row.get("actual");
            let entry = totals.entry(row.get("code")).or_default();
            let err = (predicted - actual).abs();
            entry.0 += 1;
            entry.1 += err;
            if actual.abs() > f64::EPSILON {
                entry.2 += err / actual.abs();
                entry.3 += 1;
            }
        }

        totals
            .into_iter()
            .map(|(code, (count, abs_sum, pct_sum, pct_count))| -> Result<AccuracyRow> {
                Ok(AccuracyRow {
                    currency: CurrencyCode::new(&code)?,
                    count,
                    mae: abs_sum / count as f64,
                    mape: if pct_count > 0 {
                        pct_sum / pct_count as f64 * 100.0
                    } else {
                        0.0
                    },
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HistoryProvider for Database {
    async fn history(&self, currency: &Currency) -> Result<Vec<Observation>> {
        self.rates_for(&currency.code).await
    }
}

#[async_trait]
impl CurrencyUniverse for Database {
    async fn currencies(&self) -> Result<Vec<Currency>> {
        self.known_currencies().await
    }
}

#[async_trait]
impl PredictionSink for Database {
    async fn record(&self, cycle_id: Uuid, predictions: &[Prediction]) -> Result<()> {
        self.insert_predictions(cycle_id, predictions).await
    }
}
