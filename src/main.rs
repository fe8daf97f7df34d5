mod config;
mod database;
mod engine;
mod exchange;
mod indicators;
mod ml;
mod types;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::AppConfig;
use database::Database;
use engine::{database_init, ingest_latest, run_cycle, CycleSummary, ForecastEngine, HistoryProvider};
use exchange::NbpClient;
use ml::{derive_features, FeatureColumn, FileModelStore, ModelRegistry};
use types::CurrencyCode;

#[derive(Parser)]
#[command(name = "fx-forecaster")]
#[command(version)]
#[command(about = "Next-day forecasts of NBP exchange rates, one model per currency", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ./fx_forecaster.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate the database and backfill rate history up to yesterday
    Init {
        /// First day of the backfill (YYYY-MM-DD), overrides nbp.history_start
        #[arg(short, long)]
        start: Option<NaiveDate>,
    },
    /// Store today's published rate tables
    Ingest,
    /// Forecast tomorrow for every currency, then retrain the models
    Cycle {
        /// Use the rates already stored instead of fetching today's tables
        #[arg(long)]
        skip_ingest: bool,
    },
    /// Print the derived feature rows of a currency as JSON
    Features {
        /// ISO currency code, e.g. USD
        #[arg(short, long)]
        currency: String,
        /// Number of most recent rows to print
        #[arg(short, long, default_value = "5")]
        tail: usize,
        /// Print a single column (e.g. trend, lag_1, rolling_5_std) instead of whole rows
        #[arg(long)]
        column: Option<FeatureColumn>,
    },
    /// Compare stored predictions with the rates observed since
    Accuracy {
        /// First prediction day to include (YYYY-MM-DD), defaults to 30 days ago
        #[arg(short, long)]
        since: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    init_logging(&config, cli.verbose)?;
    info!("fx-forecaster v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init { start } => {
            run_init(&config, start.unwrap_or(config.nbp.history_start)).await?;
        }
        Commands::Ingest => {
            let db = Database::new(&config.database.url).await?;
            let client = NbpClient::new(&config.nbp)?;
            let summary = ingest_latest(&db, &client).await?;
            db.close().await;
            info!(
                "Ingested {} tables, {} new rates",
                summary.tables, summary.rates_inserted
            );
        }
        Commands::Cycle { skip_ingest } => {
            run_forecast_cycle(&config, skip_ingest).await?;
        }
        Commands::Features {
            currency,
            tail,
            column,
        } => {
            show_features(&config, &currency, tail, column).await?;
        }
        Commands::Accuracy { since } => {
            let since = since.unwrap_or_else(|| Utc::now().date_naive() - Duration::days(30));
            show_accuracy(&config, since).await?;
        }
    }

    Ok(())
}

fn init_logging(config: &AppConfig, verbose: bool) -> Result<()> {
    let log_level = if verbose {
        Level::DEBUG
    } else {
        Level::from_str(&config.logging.level)
            .map_err(|_| anyhow!("invalid log level {}", config.logging.level))?
    };
    // RUST_LOG, when set, takes precedence over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));

    if config.logging.json {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn run_init(config: &AppConfig, start: NaiveDate) -> Result<()> {
    let end = Utc::now()
        .date_naive()
        .pred_opt()
        .ok_or_else(|| anyhow!("cannot compute yesterday's date"))?;
    if start > end {
        return Err(anyhow!("backfill start {} is after {}", start, end));
    }

    let db = Database::new(&config.database.url).await?;
    let client = NbpClient::new(&config.nbp)?;
    info!("Backfilling NBP tables from {} to {}", start, end);

    let summary = database_init(&db, &client, start, end).await?;
    db.close().await;
    println!(
        "Tracking {} currencies; stored {} rates from {} tables",
        summary.currencies, summary.rates_inserted, summary.tables
    );
    Ok(())
}

async fn run_forecast_cycle(config: &AppConfig, skip_ingest: bool) -> Result<()> {
    let db = Arc::new(Database::new(&config.database.url).await?);

    if skip_ingest {
        info!("Skipping ingest, forecasting from stored rates");
    } else {
        let client = NbpClient::new(&config.nbp)?;
        ingest_latest(&db, &client)
            .await
            .context("ingesting today's tables")?;
    }

    let models = FileModelStore::new(&config.models.dir);
    models.ensure_models_dir()?;
    info!("Loading models from {}", models.models_dir().display());
    let registry = ModelRegistry::new(Box::new(models), config.model.clone());
    let history: Arc<dyn HistoryProvider> = db.clone();
    let engine = ForecastEngine::new(history, registry, config.features.clone());

    let store: &Database = &db;
    let summary = run_cycle(&engine, store, store).await;
    db.close().await;
    let summary = summary?;
    print_cycle_summary(&summary);

    if !summary.forecast.is_clean() || !summary.retrain.is_clean() {
        warn!(
            "Cycle {} finished with failures: forecast {:?}, retrain {:?}",
            summary.cycle_id,
            summary.forecast.failed_codes(),
            summary.retrain.failed_codes()
        );
    }
    Ok(())
}

fn print_cycle_summary(summary: &CycleSummary) {
    println!("\n{}", "=".repeat(60));
    match summary.target_date {
        Some(date) => println!("  Forecast for {}  (cycle {})", date, summary.cycle_id),
        None => println!("  No forecast  (cycle {})", summary.cycle_id),
    }
    println!("{}", "=".repeat(60));

    for prediction in &summary.forecast.completed {
        println!("  {:<6} {:>14.6}", prediction.currency, prediction.value);
    }
    for code in &summary.forecast.skipped {
        println!("  {:<6} {:>14}", code, "no history");
    }
    for failure in &summary.forecast.failed {
        println!("  {:<6} FAILED: {}", failure.currency, failure.error);
    }

    println!("{}", "-".repeat(60));
    println!(
        "  Retrained {} of {} models, {} skipped, {} failed",
        summary.retrain.completed.len(),
        summary.retrain.total(),
        summary.retrain.skipped.len(),
        summary.retrain.failed.len()
    );
    for failure in &summary.retrain.failed {
        println!("  {:<6} FAILED: {}", failure.currency, failure.error);
    }
    println!("{}\n", "=".repeat(60));
}

async fn show_features(
    config: &AppConfig,
    currency: &str,
    tail: usize,
    column: Option<FeatureColumn>,
) -> Result<()> {
    let code = CurrencyCode::new(currency)?;
    let db = Database::new(&config.database.url).await?;
    let history = db.rates_for(&code).await?;
    db.close().await;

    let table = derive_features(&history, &config.features);
    if table.is_empty() {
        return Err(anyhow!("no rates stored for {}", code));
    }
    let from = table.len().saturating_sub(tail);
    let rows = &table.rows()[from..];

    let dump = match column {
        Some(column) => {
            let values = table
                .column(column)
                .ok_or_else(|| anyhow!("{} is not derived with this configuration", column))?;
            let cells: Vec<_> = rows
                .iter()
                .zip(&values[from..])
                .map(|(row, cell)| serde_json::json!({ "date": row.date, "value": cell }))
                .collect();
            serde_json::json!({
                "currency": code,
                "column": column,
                "rows": cells,
            })
        }
        None => serde_json::json!({
            "currency": code,
            "observations": history.len(),
            "columns": table.columns(),
            "rows": rows,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}

async fn show_accuracy(config: &AppConfig, since: NaiveDate) -> Result<()> {
    let db = Database::new(&config.database.url).await?;
    let rows = db.prediction_accuracy(since).await?;
    db.close().await;
    if rows.is_empty() {
        println!("No predictions with realised rates since {}", since);
        return Ok(());
    }

    println!("\n{:<6} {:>6} {:>14} {:>10}", "CODE", "N", "MAE", "MAPE %");
    println!("{}", "-".repeat(39));
    for row in rows {
        println!(
            "{:<6} {:>6} {:>14.6} {:>10.3}",
            row.currency, row.count, row.mae, row.mape
        );
    }
    Ok(())
}
