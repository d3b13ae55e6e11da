//! Performance metrics calculation module

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Summary performance metrics for an equity series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Total return as a percentage of starting equity
    pub total_return_pct: f64,

    /// Maximum drawdown as a percentage of peak equity
    pub max_drawdown_pct: f64,

    /// Longest run of periods spent below a previous equity peak
    pub max_drawdown_periods: usize,

    /// Sharpe ratio of per-period returns (0.0 when undefined)
    pub sharpe_ratio: f64,
}

impl PerformanceMetrics {
    /// Compute metrics from an equity series sampled once per period
    pub fn from_equity(equity: &[Decimal], risk_free_rate: f64, periods_per_year: f64) -> Self {
        let (first, last) = match (equity.first(), equity.last()) {
            (Some(first), Some(last)) if *first > Decimal::ZERO => (*first, *last),
            _ => return Self::default(),
        };

        let mut drawdown = DrawdownTracker::new();
        let mut sharpe = SharpeCalculator::new(risk_free_rate, periods_per_year);
        for window in equity.windows(2) {
            if window[0] > Decimal::ZERO {
                sharpe.add_return(((window[1] - window[0]) / window[0]).to_f64().unwrap_or(0.0));
            }
        }
        for value in equity {
            drawdown.observe(*value);
        }

        Self {
            total_return_pct: ((last - first) / first * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0),
            max_drawdown_pct: drawdown.max_drawdown() * 100.0,
            max_drawdown_periods: drawdown.max_underwater_periods(),
            sharpe_ratio: sharpe.calculate().unwrap_or(0.0),
        }
    }
}

/// Decline from `peak` to `equity` as a fraction of `peak`, 0.0 at or above it
pub fn drawdown_fraction(peak: Decimal, equity: Decimal) -> f64 {
    if peak <= Decimal::ZERO {
        return 0.0;
    }
    ((peak - equity) / peak).to_f64().unwrap_or(0.0).max(0.0)
}

/// Running peak, deepest drawdown and longest stretch spent below the peak
/// over an equity series
#[derive(Debug, Clone, Default)]
pub struct DrawdownTracker {
    peak: Option<Decimal>,
    current: f64,
    max: f64,
    underwater: usize,
    max_underwater: usize,
}

impl DrawdownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, equity: Decimal) {
        let peak = match self.peak {
            Some(peak) if peak >= equity => peak,
            _ => equity,
        };
        self.peak = Some(peak);

        self.current = drawdown_fraction(peak, equity);
        self.max = self.max.max(self.current);
        if equity < peak {
            self.underwater += 1;
            self.max_underwater = self.max_underwater.max(self.underwater);
        } else {
            self.underwater = 0;
        }
    }

    /// Deepest drawdown seen, as a fraction of the peak before it
    pub fn max_drawdown(&self) -> f64 {
        self.max
    }

    pub fn current_drawdown(&self) -> f64 {
        self.current
    }

    /// Longest run of consecutive observations below the running peak
    pub fn max_underwater_periods(&self) -> usize {
        self.max_underwater
    }
}

/// Sharpe ratio calculation helper
#[derive(Debug, Clone)]
pub struct SharpeCalculator {
    returns: Vec<f64>,
    /// Annualized risk-free rate
    risk_free_rate: f64,
    periods_per_year: f64,
}

impl SharpeCalculator {
    pub fn new(risk_free_rate: f64, periods_per_year: f64) -> Self {
        Self {
            returns: Vec::new(),
            risk_free_rate,
            periods_per_year,
        }
    }

    /// Add a per-period return
    pub fn add_return(&mut self, return_value: f64) {
        self.returns.push(return_value);
    }

    /// Annualized Sharpe ratio. `None` with fewer than two returns.
    pub fn calculate(&self) -> Option<f64> {
        if self.returns.len() < 2 {
            return None;
        }

        let mean = self.returns.iter().mean();
        let std_dev = self.returns.iter().population_std_dev();

        if std_dev == 0.0 || std_dev.is_nan() {
            return Some(0.0);
        }

        let annualized_mean = mean * self.periods_per_year;
        let annualized_std = std_dev * self.periods_per_year.sqrt();

        Some((annualized_mean - self.risk_free_rate) / annualized_std)
    }
}
