//! Engine configuration
//!
//! One TOML document, optionally overridden by `SIGNAL_ENGINE__`-prefixed
//! environment variables (`SIGNAL_ENGINE__LOGGING__LEVEL=debug`). Loading
//! validates everything and fails on the first problem; nothing is corrected
//! silently.

use anyhow::{bail, Context, Result};
use audit_ledger::LotSelectionMethod;
use backtest::BacktestConfig;
use common::SignalCategory;
use execution::PaperExchangeConfig;
use portfolio_risk::RiskConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signal_generation::{ensure_unique_ids, AggregatorConfig, BandTable, StrategyConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "SIGNAL_ENGINE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Assets evaluated every cycle
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// Indicator categories enabled for aggregation
    #[serde(default = "default_categories")]
    pub categories: Vec<SignalCategory>,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Market-condition bands
    #[serde(default)]
    pub bands: BandTable,

    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub tax: TaxConfig,

    #[serde(default)]
    pub exchange: PaperExchangeConfig,

    #[serde(default)]
    pub market_data: MarketDataConfig,

    #[serde(default)]
    pub backtest: BacktestSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            assets: default_assets(),
            categories: default_categories(),
            aggregator: AggregatorConfig::default(),
            bands: BandTable::default(),
            strategies: Vec::new(),
            risk: RiskConfig::default(),
            schedule: ScheduleConfig::default(),
            ledger: LedgerConfig::default(),
            tax: TaxConfig::default(),
            exchange: PaperExchangeConfig::default(),
            market_data: MarketDataConfig::default(),
            backtest: BacktestSettings::default(),
        }
    }
}

fn default_assets() -> Vec<String> {
    vec!["BTC".to_string()]
}

fn default_categories() -> Vec<SignalCategory> {
    SignalCategory::ALL.to_vec()
}

impl EngineConfig {
    /// Load from an optional TOML file plus environment overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read engine configuration")?;

        let config: EngineConfig = settings
            .try_deserialize()
            .context("Failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml_source(content)?
            .try_deserialize()
            .context("Failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.assets.is_empty() {
            bail!("at least one asset must be configured");
        }
        if self.categories.is_empty() {
            bail!("at least one indicator category must be enabled");
        }
        self.aggregator
            .validate()
            .context("Invalid aggregator configuration")?;
        for category in &self.categories {
            if !self.aggregator.category_weights.contains_key(category) {
                bail!(
                    "category {} is enabled but has no entry in aggregator.category_weights",
                    category
                );
            }
        }
        ensure_unique_ids(&self.strategies).context("Invalid strategy configuration")?;
        for strategy in &self.strategies {
            strategy
                .validate()
                .with_context(|| format!("Invalid strategy {}", strategy.id()))?;
        }
        self.risk.validate().context("Invalid risk configuration")?;
        self.schedule.validate()?;
        self.ledger.validate()?;
        if self.exchange.fee_rate < Decimal::ZERO || self.exchange.initial_cash < Decimal::ZERO {
            bail!("paper exchange fee rate and initial cash must not be negative");
        }
        Ok(())
    }

    /// Backtest configuration sharing this engine's bands, strategies and limits
    pub fn backtest_config(&self, asset: &str) -> BacktestConfig {
        BacktestConfig {
            asset: asset.to_string(),
            initial_cash: self.backtest.initial_cash,
            fee_rate: self.backtest.fee_rate,
            moving_average_window: self.backtest.moving_average_window,
            bands: self.bands.clone(),
            strategies: self.strategies.clone(),
            risk_limits: self.risk.risk_limits.clone(),
            risk_free_rate: self.backtest.risk_free_rate,
            periods_per_year: self.backtest.periods_per_year,
        }
    }
}

fn toml_source(content: &str) -> Result<config::Config> {
    config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Toml))
        .build()
        .context("Failed to read engine configuration")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What a scheduled cycle does when the previous one is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    Skip,
    /// Wait for the running cycle; at most one cycle waits
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub overlap: OverlapPolicy,

    /// Verify the audit chain before each cycle
    #[serde(default = "default_verify_before_cycle")]
    pub verify_before_cycle: bool,

    /// Upper bound on a single order placement
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,

    /// Cycles of price history behind the live moving average
    #[serde(default = "default_moving_average_window")]
    pub moving_average_window: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            overlap: OverlapPolicy::default(),
            verify_before_cycle: default_verify_before_cycle(),
            execution_timeout_ms: default_execution_timeout_ms(),
            moving_average_window: default_moving_average_window(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("schedule.interval_secs must be positive");
        }
        if self.execution_timeout_ms == 0 {
            bail!("schedule.execution_timeout_ms must be positive");
        }
        if self.moving_average_window == 0 {
            bail!("schedule.moving_average_window must be at least 1");
        }
        Ok(())
    }
}

fn default_interval_secs() -> u64 {
    86_400
}

fn default_verify_before_cycle() -> bool {
    true
}

fn default_execution_timeout_ms() -> u64 {
    10_000
}

fn default_moving_average_window() -> usize {
    20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl LedgerConfig {
    fn validate(&self) -> Result<()> {
        if self.backend == LedgerBackend::Postgres && self.database_url.is_none() {
            bail!("ledger.database_url is required for the postgres backend");
        }
        if self.max_connections == 0 {
            bail!("ledger.max_connections must be at least 1");
        }
        Ok(())
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxConfig {
    #[serde(default)]
    pub lot_method: LotSelectionMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// JSON file of indicator readings per asset
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_backtest_cash")]
    pub initial_cash: Decimal,

    #[serde(default = "default_backtest_fee_rate")]
    pub fee_rate: Decimal,

    #[serde(default = "default_moving_average_window")]
    pub moving_average_window: usize,

    #[serde(default)]
    pub risk_free_rate: f64,

    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_cash: default_backtest_cash(),
            fee_rate: default_backtest_fee_rate(),
            moving_average_window: default_moving_average_window(),
            risk_free_rate: 0.0,
            periods_per_year: default_periods_per_year(),
        }
    }
}

fn default_backtest_cash() -> Decimal {
    Decimal::from(10_000)
}

fn default_backtest_fee_rate() -> Decimal {
    Decimal::new(1, 3)
}

fn default_periods_per_year() -> f64 {
    365.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.overlap, OverlapPolicy::Skip);
        assert_eq!(config.tax.lot_method, LotSelectionMethod::Fifo);
        assert_eq!(config.categories.len(), 8);
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            assets = ["eth"]

            [logging]
            level = "debug"

            [schedule]
            interval_secs = 3600
            overlap = "queue"

            [tax]
            lot_method = "hifo"

            [[strategies]]
            type = "dca"
            id = "eth-dca"
            base_amount = 100

            [risk.risk_limits]
            max_risk_per_trade_pct = 0.02
            "#,
        )
        .unwrap();

        assert_eq!(config.assets, vec!["eth".to_string()]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.schedule.overlap, OverlapPolicy::Queue);
        assert_eq!(config.tax.lot_method, LotSelectionMethod::Hifo);
        assert_eq!(config.strategies.len(), 1);
        assert_eq!(config.risk.risk_limits.max_risk_per_trade_pct, 0.02);
        assert_eq!(config.risk.risk_limits.max_position_pct, 0.50);
    }

    #[test]
    fn test_invalid_weights_fail_fast() {
        let mut config = EngineConfig::default();
        config.aggregator.category_weights.insert(SignalCategory::Technical, 0.9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_category_needs_weight() {
        let mut config = EngineConfig::default();
        config.aggregator.category_weights.remove(&SignalCategory::Mining);
        config.aggregator.category_weights.insert(SignalCategory::SmartMoney, 0.10);
        config
            .aggregator
            .indicators
            .retain(|spec| spec.category != SignalCategory::Mining);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mining"));

        config.categories.retain(|c| *c != SignalCategory::Mining);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_strategy_ids_fail_fast() {
        let result = EngineConfig::from_toml_str(
            r#"
            [[strategies]]
            type = "dca"
            id = "same"
            base_amount = 100

            [[strategies]]
            type = "dca"
            id = "same"
            base_amount = 50
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_postgres_requires_url() {
        let mut config = EngineConfig::default();
        config.ledger.backend = LedgerBackend::Postgres;
        assert!(config.validate().is_err());
        config.ledger.database_url = Some("postgres://localhost/ledger".to_string());
        assert!(config.validate().is_ok());
    }
}
