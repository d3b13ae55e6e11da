//! Backtest inputs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use portfolio_risk::RiskLimits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signal_generation::{BandTable, StrategyConfig};
use std::path::Path;

/// One point of the historical series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub composite_score: f64,
    /// Computed from trailing bar prices when absent
    #[serde(default)]
    pub moving_average: Option<Decimal>,
}

impl HistoricalBar {
    pub fn new(timestamp: DateTime<Utc>, price: Decimal, composite_score: f64) -> Self {
        Self {
            timestamp,
            price,
            composite_score,
            moving_average: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_asset")]
    pub asset: String,

    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,

    /// Fee per fill as a fraction of notional
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Bars in the trailing moving average
    #[serde(default = "default_moving_average_window")]
    pub moving_average_window: usize,

    #[serde(default)]
    pub bands: BandTable,

    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,

    #[serde(default)]
    pub risk_limits: RiskLimits,

    /// Annual risk-free rate for the Sharpe ratio
    #[serde(default)]
    pub risk_free_rate: f64,

    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            asset: default_asset(),
            initial_cash: default_initial_cash(),
            fee_rate: default_fee_rate(),
            moving_average_window: default_moving_average_window(),
            bands: BandTable::default(),
            strategies: Vec::new(),
            risk_limits: RiskLimits::default(),
            risk_free_rate: 0.0,
            periods_per_year: default_periods_per_year(),
        }
    }
}

fn default_asset() -> String {
    "BTC".to_string()
}

fn default_initial_cash() -> Decimal {
    Decimal::from(10_000)
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3)
}

fn default_moving_average_window() -> usize {
    20
}

fn default_periods_per_year() -> f64 {
    365.0
}

/// Read a JSON array of bars
pub fn load_bars(path: impl AsRef<Path>) -> Result<Vec<HistoricalBar>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bars from {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse bars in {}", path.display()))
}
