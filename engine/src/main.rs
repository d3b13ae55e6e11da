use anyhow::{bail, Context, Result};
use audit_ledger::{
    AuditAction, EntityType, InMemoryLedgerStore, LedgerQuery, LedgerStore, LotSelectionMethod, PostgresLedgerStore,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use engine::config::EngineConfig;
use engine::{logging, spawn_log_notifier, Engine, LedgerBackend, Scheduler, SnapshotProvider};
use execution::PaperExchange;
use serde::Serialize;
use signal_generation::MarketDataProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(about = "Signal-driven portfolio automation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides logging.level from the configuration
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scheduled evaluation cycles until interrupted
    Run,

    /// Run a single evaluation cycle
    Cycle {
        /// Evaluate and gate proposals without placing orders or writing the ledger
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify the audit chain
    Verify,

    /// Query audit ledger entries
    Ledger {
        /// analysis, proposal, order, circuit_breaker or system
        #[arg(long)]
        entity_type: Option<String>,

        #[arg(long)]
        entity_id: Option<String>,

        /// e.g. order_executed
        #[arg(long)]
        action: Option<String>,

        #[arg(long)]
        from_sequence: Option<u64>,

        #[arg(long)]
        to_sequence: Option<u64>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Replay historical bars through the configured strategies
    Backtest {
        /// JSON array of {timestamp, price, composite_score, moving_average?}
        bars: PathBuf,

        #[arg(short, long)]
        asset: Option<String>,
    },

    /// Realized gains for a period
    TaxReport {
        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the period, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,

        /// fifo, lifo, hifo or lowest_cost; defaults to tax.lot_method
        #[arg(short, long)]
        method: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.as_deref())?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    logging::init(level)?;

    match cli.command {
        Commands::Backtest { bars, asset } => {
            let asset = asset
                .or_else(|| config.assets.first().cloned())
                .context("No asset to backtest")?;
            let bars = backtest::load_bars(&bars)?;
            let result = backtest::Backtester::new(config.backtest_config(&asset))?.run(&bars)?;
            print_json(&result)
        }
        command => {
            let engine = Arc::new(build_engine(&config).await?);
            run_command(engine, &config, command).await
        }
    }
}

async fn run_command(engine: Arc<Engine>, config: &EngineConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Run => {
            let notifier = spawn_log_notifier(engine.bus());
            let (shutdown, scheduler) = Scheduler::new(engine.clone(), config.schedule.clone()).spawn();
            info!(assets = ?engine.assets(), "Engine running, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
            shutdown.shutdown();
            scheduler.await.context("Scheduler task failed")?;
            notifier.abort();
            Ok(())
        }
        Commands::Cycle { dry_run } => {
            let report = engine.run_cycle(dry_run).await?;
            print_json(&report)
        }
        Commands::Verify => {
            let report = engine.verify_chain().await?;
            print_json(&report)
        }
        Commands::Ledger {
            entity_type,
            entity_id,
            action,
            from_sequence,
            to_sequence,
            limit,
        } => {
            let mut query = LedgerQuery::all().with_range(from_sequence, to_sequence);
            if let Some(entity_type) = entity_type {
                query = query.with_entity_type(entity_type.parse::<EntityType>()?);
            }
            if let Some(entity_id) = entity_id {
                query = query.with_entity_id(entity_id);
            }
            if let Some(action) = action {
                query = query.with_action(action.parse::<AuditAction>()?);
            }
            if let Some(limit) = limit {
                query = query.with_limit(limit);
            }
            print_json(&engine.ledger_entries(&query).await?)
        }
        Commands::TaxReport { from, to, method } => {
            if to < from {
                bail!("--to must not be before --from");
            }
            let method = method
                .map(|m| m.parse::<LotSelectionMethod>())
                .transpose()?;
            let report = engine.tax_report(method, start_of_day(from)?, end_of_day(to)?).await?;
            print_json(&report)
        }
        Commands::Backtest { .. } => Ok(()),
    }
}

async fn build_engine(config: &EngineConfig) -> Result<Engine> {
    let store: Arc<dyn LedgerStore> = match config.ledger.backend {
        LedgerBackend::Memory => {
            warn!("Using the in-memory ledger; entries are lost on exit");
            Arc::new(InMemoryLedgerStore::new())
        }
        LedgerBackend::Postgres => {
            let url = config
                .ledger
                .database_url
                .as_deref()
                .context("ledger.database_url is required for the postgres backend")?;
            let store = PostgresLedgerStore::connect(url, config.ledger.max_connections).await?;
            store.initialize().await?;
            Arc::new(store)
        }
    };

    let provider: Arc<dyn MarketDataProvider> = match &config.market_data.snapshot_path {
        Some(path) => Arc::new(SnapshotProvider::load(path).await?),
        None => {
            warn!("No market_data.snapshot_path configured; every indicator is unavailable");
            Arc::new(SnapshotProvider::empty())
        }
    };
    let exchange = Arc::new(PaperExchange::new(config.exchange.clone()));

    Engine::new(config, provider, exchange, store).await
}

fn start_of_day(day: NaiveDate) -> Result<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .with_context(|| format!("Invalid date {}", day))
}

fn end_of_day(day: NaiveDate) -> Result<DateTime<Utc>> {
    day.and_hms_micro_opt(23, 59, 59, 999_999)
        .map(|t| t.and_utc())
        .with_context(|| format!("Invalid date {}", day))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
