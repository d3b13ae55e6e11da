//! Risk checking and circuit breaker implementation

use crate::config::{CircuitBreakerConfig, RiskLimits};
use crate::portfolio::Portfolio;
use chrono::{DateTime, Duration, Utc};
use common::{BreakerState, OrderSide, StrategyProposal};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Static limit checks applied to every proposal before it may execute
#[derive(Debug, Clone)]
pub struct RiskChecker {
    risk_limits: RiskLimits,
}

impl RiskChecker {
    pub fn new(risk_limits: RiskLimits) -> Self {
        Self { risk_limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.risk_limits
    }

    /// Check if a proposal violates any risk limit
    pub fn check_proposal(
        &self,
        proposal: &StrategyProposal,
        portfolio: &Portfolio,
    ) -> Result<(), RiskViolation> {
        let quantity = proposal.quantity().ok_or_else(|| RiskViolation::InvalidProposal {
            reason: format!("cannot size order at price {}", proposal.execution_price()),
        })?;
        if quantity <= Decimal::ZERO {
            return Err(RiskViolation::InvalidProposal {
                reason: "order quantity must be positive".to_string(),
            });
        }

        match proposal.side {
            OrderSide::Buy => self.check_buy(proposal, portfolio),
            OrderSide::Sell => {
                let available = portfolio.quantity(&proposal.asset);
                if quantity > available {
                    return Err(RiskViolation::InsufficientHoldings {
                        asset: proposal.asset.clone(),
                        requested: quantity,
                        available,
                    });
                }
                Ok(())
            }
        }
    }

    fn check_buy(&self, proposal: &StrategyProposal, portfolio: &Portfolio) -> Result<(), RiskViolation> {
        let equity = portfolio.equity();
        if equity <= Decimal::ZERO {
            return Err(RiskViolation::InvalidProposal {
                reason: "portfolio has no equity".to_string(),
            });
        }

        let notional = proposal.notional();
        let fraction = |value: Decimal| (value / equity).to_f64().unwrap_or(f64::MAX);

        // Per-trade risk
        let trade_pct = fraction(notional);
        if trade_pct > self.risk_limits.max_risk_per_trade_pct {
            return Err(RiskViolation::TradeRiskExceeded {
                proposed_pct: trade_pct,
                limit: self.risk_limits.max_risk_per_trade_pct,
            });
        }

        // Daily loss limit
        let daily_loss = -portfolio.daily_pnl_pct();
        if daily_loss >= self.risk_limits.max_daily_loss_pct {
            return Err(RiskViolation::DailyLossLimitExceeded {
                daily_loss_pct: daily_loss,
                limit: self.risk_limits.max_daily_loss_pct,
            });
        }

        // Max drawdown
        let drawdown = portfolio.drawdown_pct();
        if drawdown >= self.risk_limits.max_drawdown_pct {
            return Err(RiskViolation::MaxDrawdownExceeded {
                current: drawdown,
                limit: self.risk_limits.max_drawdown_pct,
            });
        }

        // Position size after the buy
        let position_pct = fraction(portfolio.position_value(&proposal.asset) + notional);
        if position_pct > self.risk_limits.max_position_pct {
            return Err(RiskViolation::MaxPositionExceeded {
                asset: proposal.asset.clone(),
                proposed_pct: position_pct,
                limit: self.risk_limits.max_position_pct,
            });
        }

        // Cash reserve after the buy
        let remaining_pct = fraction(portfolio.cash() - notional);
        if remaining_pct < self.risk_limits.min_cash_reserve_pct {
            return Err(RiskViolation::CashReserveBreached {
                remaining_pct,
                limit: self.risk_limits.min_cash_reserve_pct,
            });
        }

        Ok(())
    }
}

/// Risk violation types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskViolation {
    InvalidProposal {
        reason: String,
    },
    TradeRiskExceeded {
        proposed_pct: f64,
        limit: f64,
    },
    MaxPositionExceeded {
        asset: String,
        proposed_pct: f64,
        limit: f64,
    },
    DailyLossLimitExceeded {
        daily_loss_pct: f64,
        limit: f64,
    },
    MaxDrawdownExceeded {
        current: f64,
        limit: f64,
    },
    CashReserveBreached {
        remaining_pct: f64,
        limit: f64,
    },
    InsufficientHoldings {
        asset: String,
        requested: Decimal,
        available: Decimal,
    },
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskViolation::InvalidProposal { reason } => write!(f, "Invalid proposal: {}", reason),
            RiskViolation::TradeRiskExceeded { proposed_pct, limit } => {
                write!(
                    f,
                    "Trade size {:.2}% of equity exceeds per-trade limit {:.2}%",
                    proposed_pct * 100.0,
                    limit * 100.0
                )
            }
            RiskViolation::MaxPositionExceeded { asset, proposed_pct, limit } => {
                write!(
                    f,
                    "Position in {} would be {:.2}% of equity, limit {:.2}%",
                    asset,
                    proposed_pct * 100.0,
                    limit * 100.0
                )
            }
            RiskViolation::DailyLossLimitExceeded { daily_loss_pct, limit } => {
                write!(
                    f,
                    "Daily loss {:.2}% reached limit {:.2}%",
                    daily_loss_pct * 100.0,
                    limit * 100.0
                )
            }
            RiskViolation::MaxDrawdownExceeded { current, limit } => {
                write!(
                    f,
                    "Drawdown {:.2}% reached limit {:.2}%",
                    current * 100.0,
                    limit * 100.0
                )
            }
            RiskViolation::CashReserveBreached { remaining_pct, limit } => {
                write!(
                    f,
                    "Cash after trade {:.2}% below reserve {:.2}%",
                    remaining_pct * 100.0,
                    limit * 100.0
                )
            }
            RiskViolation::InsufficientHoldings { asset, requested, available } => {
                write!(f, "Cannot sell {} {}: only {} held", requested, asset, available)
            }
        }
    }
}

impl std::error::Error for RiskViolation {}

/// Snapshot of the breaker for queries and audit records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: BreakerState,
    pub failure_count: usize,
    pub last_failure: Option<DateTime<Utc>>,
}

/// A state change the caller should log and publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub failures: usize,
}

/// Permission to execute one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPermit {
    /// The single Half-Open probe
    pub trial: bool,
}

/// Circuit breaker over execution failures.
///
/// Closed -> Open once `failure_threshold` failures fall inside the trailing
/// window; Open -> HalfOpen after the cooldown; HalfOpen -> Closed on a
/// successful trial, HalfOpen -> Open on a failed one. Time is passed in so
/// transitions are deterministic; the owner serializes access.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: BreakerState,
    failures: VecDeque<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            last_failure: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            state: self.state,
            failure_count: self.failures.len(),
            last_failure: self.last_failure,
        }
    }

    /// Apply the cooldown timer. Open -> HalfOpen once it has elapsed.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Option<BreakerTransition> {
        if self.state != BreakerState::Open {
            return None;
        }
        let opened_at = self.opened_at?;
        if now - opened_at >= self.cooldown() {
            self.trial_in_flight = false;
            return Some(self.transition(BreakerState::HalfOpen));
        }
        None
    }

    /// Whether `acquire` would currently succeed, without changing state
    pub fn would_admit(&self, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => !self.trial_in_flight,
            BreakerState::Open => self
                .opened_at
                .map(|opened_at| now - opened_at >= self.cooldown())
                .unwrap_or(false),
        }
    }

    /// Acquire permission for one execution. In HalfOpen only one trial may be outstanding.
    pub fn acquire(&mut self) -> Result<BreakerPermit, BreakerState> {
        if !self.config.enabled {
            return Ok(BreakerPermit { trial: false });
        }
        match self.state {
            BreakerState::Closed => Ok(BreakerPermit { trial: false }),
            BreakerState::HalfOpen if !self.trial_in_flight => {
                self.trial_in_flight = true;
                Ok(BreakerPermit { trial: true })
            }
            state => Err(state),
        }
    }

    /// Give back a trial permit that was not used for an execution
    pub fn release(&mut self, permit: BreakerPermit) {
        if permit.trial && self.state == BreakerState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    pub fn record_success(&mut self, _now: DateTime<Utc>) -> Option<BreakerTransition> {
        if !self.config.enabled {
            return None;
        }
        // Only consecutive failures count towards the threshold
        self.failures.clear();
        match self.state {
            BreakerState::HalfOpen => {
                self.trial_in_flight = false;
                self.opened_at = None;
                Some(self.transition(BreakerState::Closed))
            }
            _ => None,
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<BreakerTransition> {
        if !self.config.enabled {
            return None;
        }
        self.last_failure = Some(now);
        self.failures.push_back(now);
        self.prune(now);

        match self.state {
            BreakerState::Closed if self.failures.len() >= self.config.failure_threshold => {
                self.opened_at = Some(now);
                let transition = self.transition(BreakerState::Open);
                tracing::error!(
                    failures = transition.failures,
                    "Circuit breaker TRIGGERED - automated execution halted"
                );
                Some(transition)
            }
            BreakerState::HalfOpen => {
                self.trial_in_flight = false;
                self.opened_at = Some(now);
                let transition = self.transition(BreakerState::Open);
                tracing::warn!("Circuit breaker trial failed - reopening");
                Some(transition)
            }
            _ => None,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.config.failure_window_secs as i64);
        while let Some(first) = self.failures.front() {
            if *first < cutoff {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.config.cooldown_secs as i64)
    }

    fn transition(&mut self, to: BreakerState) -> BreakerTransition {
        let from = self.state;
        self.state = to;
        BreakerTransition {
            from,
            to,
            failures: self.failures.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Fill, OrderSize, Uuid};
    use rust_decimal_macros::dec;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 3,
            failure_window_secs: 600,
            cooldown_secs: 300,
        })
    }

    fn buy(notional: Decimal) -> StrategyProposal {
        StrategyProposal::new("dca", "BTC", OrderSide::Buy, OrderSize::Notional(notional), dec!(20000))
    }

    #[test]
    fn test_breaker_full_cycle() {
        let mut cb = breaker();
        let t0 = Utc::now();
        assert_eq!(cb.state(), BreakerState::Closed);

        assert!(cb.record_failure(t0).is_none());
        assert!(cb.record_failure(t0 + Duration::seconds(10)).is_none());
        let tripped = cb.record_failure(t0 + Duration::seconds(20)).unwrap();
        assert_eq!(tripped.from, BreakerState::Closed);
        assert_eq!(tripped.to, BreakerState::Open);
        assert_eq!(cb.acquire(), Err(BreakerState::Open));

        // Cooldown not yet elapsed
        assert!(cb.advance(t0 + Duration::seconds(200)).is_none());
        assert!(!cb.would_admit(t0 + Duration::seconds(200)));

        let half_open = cb.advance(t0 + Duration::seconds(320)).unwrap();
        assert_eq!(half_open.to, BreakerState::HalfOpen);

        // Exactly one trial
        assert_eq!(cb.acquire(), Ok(BreakerPermit { trial: true }));
        assert_eq!(cb.acquire(), Err(BreakerState::HalfOpen));

        let closed = cb.record_success(t0 + Duration::seconds(330)).unwrap();
        assert_eq!(closed.to, BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.acquire(), Ok(BreakerPermit { trial: false }));
    }

    #[test]
    fn test_failed_trial_reopens() {
        let mut cb = breaker();
        let t0 = Utc::now();
        for i in 0..3 {
            cb.record_failure(t0 + Duration::seconds(i));
        }
        assert_eq!(cb.state(), BreakerState::Open);

        cb.advance(t0 + Duration::seconds(400));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.acquire().unwrap();

        let reopened = cb.record_failure(t0 + Duration::seconds(401)).unwrap();
        assert_eq!(reopened.from, BreakerState::HalfOpen);
        assert_eq!(reopened.to, BreakerState::Open);

        // Cooldown restarts from the failed trial
        assert!(cb.advance(t0 + Duration::seconds(600)).is_none());
        assert!(cb.advance(t0 + Duration::seconds(701)).is_some());
    }

    #[test]
    fn test_failures_outside_window_do_not_trip() {
        let mut cb = breaker();
        let t0 = Utc::now();
        cb.record_failure(t0);
        cb.record_failure(t0 + Duration::seconds(100));
        // First failure has aged out of the 600s window
        assert!(cb.record_failure(t0 + Duration::seconds(700)).is_none());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 2);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut cb = breaker();
        let t0 = Utc::now();
        cb.record_failure(t0);
        cb.record_failure(t0);
        cb.record_success(t0);
        assert!(cb.record_failure(t0).is_none());
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_released_trial_can_be_reacquired() {
        let mut cb = breaker();
        let t0 = Utc::now();
        for _ in 0..3 {
            cb.record_failure(t0);
        }
        cb.advance(t0 + Duration::seconds(300));
        let permit = cb.acquire().unwrap();
        cb.release(permit);
        assert_eq!(cb.acquire(), Ok(BreakerPermit { trial: true }));
    }

    #[test]
    fn test_disabled_breaker_always_admits() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            enabled: false,
            ..Default::default()
        });
        for _ in 0..10 {
            assert!(cb.record_failure(Utc::now()).is_none());
        }
        assert!(cb.acquire().is_ok());
    }

    #[test]
    fn test_limits_accept_small_buy() {
        let checker = RiskChecker::new(RiskLimits::default());
        let portfolio = Portfolio::new(dec!(10000));
        assert!(checker.check_proposal(&buy(dec!(300)), &portfolio).is_ok());
    }

    #[test]
    fn test_limits_reject_large_trade() {
        let checker = RiskChecker::new(RiskLimits::default());
        let portfolio = Portfolio::new(dec!(10000));
        let result = checker.check_proposal(&buy(dec!(600)), &portfolio);
        assert!(matches!(result, Err(RiskViolation::TradeRiskExceeded { .. })));
    }

    #[test]
    fn test_limits_reject_position_and_cash() {
        let limits = RiskLimits {
            max_risk_per_trade_pct: 1.0,
            max_position_pct: 0.3,
            ..Default::default()
        };
        let checker = RiskChecker::new(limits);
        let portfolio = Portfolio::new(dec!(10000));
        let result = checker.check_proposal(&buy(dec!(4000)), &portfolio);
        assert!(matches!(result, Err(RiskViolation::MaxPositionExceeded { .. })));

        let limits = RiskLimits {
            max_risk_per_trade_pct: 1.0,
            max_position_pct: 1.0,
            min_cash_reserve_pct: 0.2,
            ..Default::default()
        };
        let checker = RiskChecker::new(limits);
        let result = checker.check_proposal(&buy(dec!(8500)), &portfolio);
        assert!(matches!(result, Err(RiskViolation::CashReserveBreached { .. })));
    }

    #[test]
    fn test_drawdown_blocks_buys_but_not_sells() {
        let checker = RiskChecker::new(RiskLimits::default());
        let mut portfolio = Portfolio::new(dec!(10000));
        portfolio
            .apply_fill(&Fill {
                order_id: Uuid::new_v4(),
                proposal_id: Uuid::new_v4(),
                asset: "BTC".to_string(),
                side: OrderSide::Buy,
                quantity: dec!(0.4),
                price: dec!(20000),
                fee: Decimal::ZERO,
                exchange: "paper".to_string(),
                executed_at: Utc::now(),
            })
            .unwrap();
        // Equity 10000 -> 6000: 40% drawdown, 40% daily loss
        portfolio.mark_price("BTC", dec!(10000));

        let result = checker.check_proposal(&buy(dec!(100)), &portfolio);
        assert!(matches!(result, Err(RiskViolation::DailyLossLimitExceeded { .. })));

        let sell = StrategyProposal::new("swing", "BTC", OrderSide::Sell, OrderSize::Quantity(dec!(0.1)), dec!(10000));
        assert!(checker.check_proposal(&sell, &portfolio).is_ok());

        let oversell = StrategyProposal::new("swing", "BTC", OrderSide::Sell, OrderSize::Quantity(dec!(1)), dec!(10000));
        assert!(matches!(
            checker.check_proposal(&oversell, &portfolio),
            Err(RiskViolation::InsufficientHoldings { .. })
        ));
    }
}
