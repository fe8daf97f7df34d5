use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RateQuote, RateSource, TableSnapshot};
use crate::config::NbpConfig;
use crate::types::{CurrencyCode, RateTable};

pub const NBP_API: &str = "https://api.nbp.pl/api/exchangerates";

/// Client for the NBP exchange-rate tables API.
pub struct NbpClient {
    client: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl NbpClient {
    pub fn new(config: &NbpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building HTTP client")?;
        let per_second = NonZeroU32::new(config.requests_per_second)
            .ok_or_else(|| anyhow!("nbp.requests_per_second must be > 0"))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn current_url(&self, table: RateTable) -> String {
        format!("{}/tables/{}?format=json", self.base_url, table)
    }

    pub fn dated_url(&self, table: RateTable, date: NaiveDate) -> String {
        format!(
            "{}/tables/{}/{}/?format=json",
            self.base_url,
            table,
            date.format("%Y-%m-%d")
        )
    }

    async fn fetch(&self, url: &str, table: RateTable) -> Result<Option<TableSnapshot>> {
        self.limiter.until_ready().await;
        debug!("GET {}", url);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting {}", url))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(anyhow!("NBP API error {} for {}", resp.status(), url));
        }

        let body = resp.text().await?;
        parse_table(&body, table).map(Some)
    }
}

#[async_trait]
impl RateSource for NbpClient {
    async fn current_table(&self, table: RateTable) -> Result<TableSnapshot> {
        let url = self.current_url(table);
        self.fetch(&url, table)
            .await?
            .ok_or_else(|| anyhow!("NBP has no current table {}", table))
    }

    async fn table_on(&self, table: RateTable, date: NaiveDate) -> Result<Option<TableSnapshot>> {
        let url = self.dated_url(table, date);
        self.fetch(&url, table).await
    }
}

/// Decodes a tables response: a JSON array whose first element is the table.
/// Entries with an unusable currency code are dropped.
pub fn parse_table(body: &str, table: RateTable) -> Result<TableSnapshot> {
    let tables: Vec<TableResponse> = serde_json::from_str(body).context("decoding NBP table")?;
    let first = tables
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("NBP returned an empty table list"))?;
    let effective_date = NaiveDate::parse_from_str(&first.effective_date, "%Y-%m-%d")
        .with_context(|| format!("parsing effectiveDate {:?}", first.effective_date))?;

    let mut rates = Vec::with_capacity(first.rates.len());
    for rate in first.rates {
        match CurrencyCode::new(&rate.code) {
            Ok(code) => rates.push(RateQuote {
                code,
                name: rate.currency,
                mid: rate.mid,
            }),
            Err(e) => warn!("Skipping NBP rate: {}", e),
        }
    }

    Ok(TableSnapshot {
        table,
        effective_date,
        rates,
    })
}

// API Response Types

#[derive(Debug, Deserialize)]
struct TableResponse {
    #[serde(rename = "effectiveDate")]
    effective_date: String,
    rates: Vec<RateResponse>,
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    currency: String,
    code: String,
    mid: f64,
}
