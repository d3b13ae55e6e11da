//! Deterministic replay of a historical series

use crate::config::{BacktestConfig, HistoricalBar};
use chrono::{DateTime, Utc};
use common::{CompositeAnalysis, Fill, MarketSnapshot, OrderSide, PriceConstraint, StrategyProposal};
use portfolio_risk::{PerformanceMetrics, Portfolio, RiskChecker, RiskConfigError};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use signal_generation::{ConfigError, DecisionEngine, StrategyRegistry};
use std::collections::VecDeque;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BacktestError {
    #[error("invalid strategy or band configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid risk limits: {0}")]
    RiskLimits(#[from] RiskConfigError),

    #[error("moving average window must be at least 1")]
    InvalidWindow,

    #[error("historical series is empty")]
    EmptySeries,

    #[error("bar {index} is not after the previous bar")]
    OutOfOrder { index: usize },

    #[error("bar {index} has non-positive price {price}")]
    InvalidPrice { index: usize, price: Decimal },
}

/// A simulated fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub timestamp: DateTime<Utc>,
    pub strategy_id: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub band: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Outcome of one run. Identical inputs produce an identical result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_ids: Vec<String>,
    pub asset: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
    pub trade_count: usize,
    /// Proposals refused by the static limit checks or by the simulated account
    pub rejected_count: usize,
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<BacktestTrade>,
}

/// Replays bars through the decision engine, the strategies and the static
/// risk checks against a simulated portfolio. Never touches the live risk
/// gate or the audit ledger, and never reads the wall clock.
pub struct Backtester {
    config: BacktestConfig,
    decision: DecisionEngine,
    registry: StrategyRegistry,
    checker: RiskChecker,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        config.risk_limits.validate()?;
        if config.moving_average_window == 0 {
            return Err(BacktestError::InvalidWindow);
        }
        let registry = StrategyRegistry::from_configs(&config.strategies)?;
        Ok(Self {
            decision: DecisionEngine::new(config.bands.clone()),
            checker: RiskChecker::new(config.risk_limits.clone()),
            registry,
            config,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(&self, bars: &[HistoricalBar]) -> Result<BacktestResult, BacktestError> {
        validate_series(bars)?;
        let asset = self.config.asset.as_str();
        let limits = self.checker.limits();

        let mut portfolio = Portfolio::new(self.config.initial_cash);
        let mut window: VecDeque<Decimal> = VecDeque::with_capacity(self.config.moving_average_window);
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut trades = Vec::new();
        let mut rejected_count = 0;
        let mut current_day = None;

        for (index, bar) in bars.iter().enumerate() {
            let day = bar.timestamp.date_naive();
            if current_day.is_some_and(|d| d != day) {
                portfolio.begin_day();
            }
            current_day = Some(day);

            if window.len() == self.config.moving_average_window {
                window.pop_front();
            }
            window.push_back(bar.price);
            portfolio.mark_price(asset, bar.price);

            let market = MarketSnapshot {
                price: bar.price,
                moving_average: bar.moving_average.or_else(|| self.trailing_average(&window)),
            };
            let analysis = self.analysis(index, bar);
            let holdings = portfolio.holdings();

            for proposal in self.registry.evaluate(&analysis, &market, &holdings, limits) {
                if let Err(violation) = self.checker.check_proposal(&proposal, &portfolio) {
                    debug!(bar = index, strategy = %proposal.strategy_id, %violation, "Backtest proposal rejected");
                    rejected_count += 1;
                    continue;
                }
                let Some(fill) = self.simulate_fill(&proposal, bar, trades.len()) else {
                    rejected_count += 1;
                    continue;
                };
                match portfolio.apply_fill(&fill) {
                    Ok(_) => trades.push(BacktestTrade {
                        timestamp: bar.timestamp,
                        strategy_id: proposal.strategy_id.clone(),
                        side: fill.side,
                        quantity: fill.quantity,
                        price: fill.price,
                        fee: fill.fee,
                        band: analysis.market_condition.clone(),
                    }),
                    Err(e) => {
                        debug!(bar = index, error = %e, "Backtest fill refused by simulated account");
                        rejected_count += 1;
                    }
                }
            }

            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity: portfolio.equity(),
            });
        }

        let series: Vec<Decimal> = equity_curve.iter().map(|p| p.equity).collect();
        let metrics = PerformanceMetrics::from_equity(&series, self.config.risk_free_rate, self.config.periods_per_year);

        let (start, end) = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Err(BacktestError::EmptySeries),
        };

        info!(
            asset,
            bars = bars.len(),
            trades = trades.len(),
            rejected = rejected_count,
            total_return_pct = metrics.total_return_pct,
            max_drawdown_pct = metrics.max_drawdown_pct,
            "Backtest complete"
        );

        Ok(BacktestResult {
            strategy_ids: self.registry.ids().into_iter().map(String::from).collect(),
            asset: asset.to_string(),
            start,
            end,
            metrics,
            trade_count: trades.len(),
            rejected_count,
            initial_equity: self.config.initial_cash,
            final_equity: portfolio.equity(),
            equity_curve,
            trades,
        })
    }

    fn trailing_average(&self, window: &VecDeque<Decimal>) -> Option<Decimal> {
        if window.len() < self.config.moving_average_window {
            return None;
        }
        let sum: Decimal = window.iter().sum();
        Some((sum / Decimal::from(window.len())).round_dp(8))
    }

    /// Analysis record for a bar. Ids derive from the bar index.
    fn analysis(&self, index: usize, bar: &HistoricalBar) -> CompositeAnalysis {
        let recommendation = self.decision.decide(bar.composite_score);
        CompositeAnalysis {
            id: Uuid::from_u128(index as u128),
            asset: self.config.asset.clone(),
            timestamp: bar.timestamp,
            composite_score: common::clamp_score(bar.composite_score),
            category_scores: Vec::new(),
            market_condition: recommendation.band.clone(),
            recommendation,
            signals: Vec::new(),
            coverage: 1.0,
        }
    }

    /// Fill at the bar price. `None` when a limit is not marketable or the
    /// size rounds to nothing.
    fn simulate_fill(&self, proposal: &StrategyProposal, bar: &HistoricalBar, sequence: usize) -> Option<Fill> {
        if let PriceConstraint::Limit(limit) = proposal.price {
            let marketable = match proposal.side {
                OrderSide::Buy => bar.price <= limit,
                OrderSide::Sell => bar.price >= limit,
            };
            if !marketable {
                return None;
            }
        }

        let quantity = proposal
            .size
            .quantity_at(bar.price)?
            .round_dp(8);
        if quantity <= Decimal::ZERO {
            return None;
        }
        let fee = (quantity * bar.price * self.config.fee_rate).round_dp(8);

        Some(Fill {
            order_id: Uuid::from_u128(sequence as u128),
            proposal_id: proposal.id,
            asset: proposal.asset.clone(),
            side: proposal.side,
            quantity,
            price: bar.price,
            fee,
            exchange: "backtest".to_string(),
            executed_at: bar.timestamp,
        })
    }
}

fn validate_series(bars: &[HistoricalBar]) -> Result<(), BacktestError> {
    if bars.is_empty() {
        return Err(BacktestError::EmptySeries);
    }
    for (index, bar) in bars.iter().enumerate() {
        if bar.price <= Decimal::ZERO {
            return Err(BacktestError::InvalidPrice { index, price: bar.price });
        }
        if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
            return Err(BacktestError::OutOfOrder { index });
        }
    }
    Ok(())
}
