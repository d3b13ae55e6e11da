//! Risk management configuration

use serde::{Deserialize, Serialize};

/// Overall risk management configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskConfig {
    /// Static position, exposure and loss limits
    #[serde(default)]
    pub risk_limits: RiskLimits,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), RiskConfigError> {
        self.risk_limits.validate()?;
        self.circuit_breaker.validate()
    }
}

/// Static limits, all expressed as fractions of total equity (0.05 = 5%).
///
/// Read-only at runtime; only an explicit reconfiguration changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum value of a single asset position after a buy
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    /// Maximum notional of a single buy
    #[serde(default = "default_max_risk_per_trade_pct")]
    pub max_risk_per_trade_pct: f64,

    /// Buys stop once the day's loss reaches this
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Buys stop once drawdown from peak equity reaches this
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Cash that must remain after any buy
    #[serde(default = "default_min_cash_reserve_pct")]
    pub min_cash_reserve_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_pct: default_max_position_pct(),
            max_risk_per_trade_pct: default_max_risk_per_trade_pct(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            min_cash_reserve_pct: default_min_cash_reserve_pct(),
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), RiskConfigError> {
        let limits = [
            ("max_position_pct", self.max_position_pct),
            ("max_risk_per_trade_pct", self.max_risk_per_trade_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
        ];
        for (name, value) in limits {
            if !(value > 0.0 && value <= 1.0) {
                return Err(RiskConfigError::InvalidLimit { name, value });
            }
        }
        // A zero reserve is allowed, a full reserve would forbid every buy
        if !(0.0..1.0).contains(&self.min_cash_reserve_pct) {
            return Err(RiskConfigError::InvalidLimit {
                name: "min_cash_reserve_pct",
                value: self.min_cash_reserve_pct,
            });
        }
        Ok(())
    }
}

fn default_max_position_pct() -> f64 {
    0.50
}

fn default_max_risk_per_trade_pct() -> f64 {
    0.05
}

fn default_max_daily_loss_pct() -> f64 {
    0.05
}

fn default_max_drawdown_pct() -> f64 {
    0.20
}

fn default_min_cash_reserve_pct() -> f64 {
    0.10
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Whether the breaker is armed
    #[serde(default = "default_breaker_enabled")]
    pub enabled: bool,

    /// Execution failures inside the window that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Trailing window for counting failures (seconds)
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// Time spent Open before a trial is allowed (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_breaker_enabled(),
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), RiskConfigError> {
        if self.failure_threshold == 0 {
            return Err(RiskConfigError::InvalidBreaker(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.failure_window_secs == 0 {
            return Err(RiskConfigError::InvalidBreaker(
                "failure_window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_breaker_enabled() -> bool {
    true
}

fn default_failure_threshold() -> usize {
    3
}

fn default_failure_window_secs() -> u64 {
    3600
}

fn default_cooldown_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskConfigError {
    #[error("risk limit {name} = {value} is outside the allowed range")]
    InvalidLimit { name: &'static str, value: f64 },

    #[error("invalid circuit breaker configuration: {0}")]
    InvalidBreaker(String),
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<RiskConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: RiskConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &RiskConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
