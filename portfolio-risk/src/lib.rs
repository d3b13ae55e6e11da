//! Portfolio & Risk Management (Risk Gate)
//!
//! Every strategy proposal passes through the [`RiskGate`] before it may reach
//! the exchange. The gate enforces static limits (a breach rejects only that
//! proposal), owns the circuit breaker that suspends automated execution after
//! repeated execution failures, and carries the integrity halt raised when the
//! audit chain fails verification.

mod config;
mod metrics;
mod portfolio;
mod risk;

pub use config::{load_config, save_config, CircuitBreakerConfig, RiskConfig, RiskConfigError, RiskLimits};
pub use metrics::{drawdown_fraction, DrawdownTracker, PerformanceMetrics, SharpeCalculator};
pub use portfolio::{Portfolio, Position};
pub use risk::{
    BreakerPermit, BreakerTransition, CircuitBreaker, CircuitBreakerState, RiskChecker, RiskViolation,
};

use chrono::{DateTime, Utc};
use common::{BreakerState, StrategyProposal};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Why the gate refused a proposal
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateRejection {
    #[error("automated execution halted: {reason}")]
    IntegrityHalt { reason: String },

    #[error("circuit breaker is {state}")]
    BreakerOpen { state: BreakerState },

    #[error("risk limit breached: {0}")]
    LimitBreach(RiskViolation),
}

/// Permission to execute one approved proposal.
///
/// Must be handed back through [`RiskGate::record_execution`] or
/// [`RiskGate::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePermit {
    breaker: BreakerPermit,
    /// Cooldown transition applied while admitting, if any
    pub transition: Option<BreakerTransition>,
}

impl GatePermit {
    pub fn is_trial(&self) -> bool {
        self.breaker.trial
    }
}

/// Risk gate: static limits, circuit breaker and integrity halt.
///
/// Breaker reads and transitions happen under one mutex so concurrent cycles
/// cannot race a Closed -> Open flip.
#[derive(Debug)]
pub struct RiskGate {
    checker: RiskChecker,
    breaker: Mutex<CircuitBreaker>,
    halt: RwLock<Option<String>>,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            checker: RiskChecker::new(config.risk_limits),
            breaker: Mutex::new(CircuitBreaker::new(config.circuit_breaker)),
            halt: RwLock::new(None),
        }
    }

    /// Gate built around an existing breaker, e.g. one restored from a snapshot
    pub fn with_breaker(risk_limits: RiskLimits, breaker: CircuitBreaker) -> Self {
        Self {
            checker: RiskChecker::new(risk_limits),
            breaker: Mutex::new(breaker),
            halt: RwLock::new(None),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        self.checker.limits()
    }

    /// Admit a proposal for execution
    pub async fn admit(
        &self,
        proposal: &StrategyProposal,
        portfolio: &Portfolio,
        now: DateTime<Utc>,
    ) -> Result<GatePermit, GateRejection> {
        self.check_halt().await?;
        self.checker
            .check_proposal(proposal, portfolio)
            .map_err(GateRejection::LimitBreach)?;

        let mut breaker = self.breaker.lock().await;
        let transition = breaker.advance(now);
        if let Some(t) = &transition {
            info!(from = %t.from, to = %t.to, "Circuit breaker cooldown elapsed");
        }
        let permit = breaker
            .acquire()
            .map_err(|state| GateRejection::BreakerOpen { state })?;

        Ok(GatePermit {
            breaker: permit,
            transition,
        })
    }

    /// Dry-run admission: same checks, no breaker state change
    pub async fn preview(
        &self,
        proposal: &StrategyProposal,
        portfolio: &Portfolio,
        now: DateTime<Utc>,
    ) -> Result<(), GateRejection> {
        self.check_halt().await?;
        self.checker
            .check_proposal(proposal, portfolio)
            .map_err(GateRejection::LimitBreach)?;

        let breaker = self.breaker.lock().await;
        if breaker.would_admit(now) {
            Ok(())
        } else {
            Err(GateRejection::BreakerOpen {
                state: breaker.state(),
            })
        }
    }

    /// Report the outcome of an admitted execution
    pub async fn record_execution(
        &self,
        _permit: GatePermit,
        success: bool,
        now: DateTime<Utc>,
    ) -> Option<BreakerTransition> {
        let mut breaker = self.breaker.lock().await;
        if success {
            breaker.record_success(now)
        } else {
            breaker.record_failure(now)
        }
    }

    /// Return a permit whose proposal was never executed
    pub async fn release(&self, permit: GatePermit) {
        self.breaker.lock().await.release(permit.breaker);
    }

    pub async fn breaker_state(&self) -> CircuitBreakerState {
        self.breaker.lock().await.snapshot()
    }

    /// Refuse every proposal until [`RiskGate::clear_halt`] is called
    pub async fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "Risk gate halted");
        *self.halt.write().await = Some(reason);
    }

    pub async fn clear_halt(&self) {
        info!("Risk gate halt cleared");
        *self.halt.write().await = None;
    }

    pub async fn is_halted(&self) -> bool {
        self.halt.read().await.is_some()
    }

    async fn check_halt(&self) -> Result<(), GateRejection> {
        match self.halt.read().await.as_ref() {
            Some(reason) => Err(GateRejection::IntegrityHalt {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{OrderSide, OrderSize};
    use rust_decimal_macros::dec;

    fn gate() -> RiskGate {
        RiskGate::new(RiskConfig {
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 2,
                failure_window_secs: 600,
                cooldown_secs: 60,
            },
            ..Default::default()
        })
    }

    fn proposal(notional: rust_decimal::Decimal) -> StrategyProposal {
        StrategyProposal::new("dca", "BTC", OrderSide::Buy, OrderSize::Notional(notional), dec!(25000))
    }

    #[tokio::test]
    async fn test_limit_breach_does_not_trip_breaker() {
        let gate = gate();
        let portfolio = Portfolio::new(dec!(10000));
        let now = Utc::now();

        for _ in 0..5 {
            let result = gate.admit(&proposal(dec!(5000)), &portfolio, now).await;
            assert!(matches!(result, Err(GateRejection::LimitBreach(_))));
        }
        assert_eq!(gate.breaker_state().await.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_execution_failures_trip_and_recover() {
        let gate = gate();
        let portfolio = Portfolio::new(dec!(10000));
        let t0 = Utc::now();

        for i in 0..2 {
            let permit = gate.admit(&proposal(dec!(100)), &portfolio, t0).await.unwrap();
            let transition = gate.record_execution(permit, false, t0 + Duration::seconds(i)).await;
            if i == 1 {
                assert_eq!(transition.unwrap().to, BreakerState::Open);
            }
        }

        let rejected = gate.admit(&proposal(dec!(100)), &portfolio, t0 + Duration::seconds(10)).await;
        assert_eq!(
            rejected,
            Err(GateRejection::BreakerOpen {
                state: BreakerState::Open
            })
        );

        let later = t0 + Duration::seconds(120);
        let trial = gate.admit(&proposal(dec!(100)), &portfolio, later).await.unwrap();
        assert!(trial.is_trial());
        assert_eq!(trial.transition.unwrap().to, BreakerState::HalfOpen);

        // A second caller cannot probe concurrently
        let busy = gate.admit(&proposal(dec!(100)), &portfolio, later).await;
        assert!(matches!(busy, Err(GateRejection::BreakerOpen { state: BreakerState::HalfOpen })));

        let closed = gate.record_execution(trial, true, later).await.unwrap();
        assert_eq!(closed.to, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_halt_rejects_everything() {
        let gate = gate();
        let portfolio = Portfolio::new(dec!(10000));
        gate.halt("chain diverged at sequence 4").await;

        let result = gate.admit(&proposal(dec!(100)), &portfolio, Utc::now()).await;
        assert!(matches!(result, Err(GateRejection::IntegrityHalt { .. })));
        assert!(gate.preview(&proposal(dec!(100)), &portfolio, Utc::now()).await.is_err());

        gate.clear_halt().await;
        assert!(gate.admit(&proposal(dec!(100)), &portfolio, Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_preview_leaves_trial_available() {
        let gate = gate();
        let portfolio = Portfolio::new(dec!(10000));
        let t0 = Utc::now();
        for _ in 0..2 {
            let permit = gate.admit(&proposal(dec!(100)), &portfolio, t0).await.unwrap();
            gate.record_execution(permit, false, t0).await;
        }

        let later = t0 + Duration::seconds(61);
        assert!(gate.preview(&proposal(dec!(100)), &portfolio, later).await.is_ok());
        assert_eq!(gate.breaker_state().await.state, BreakerState::Open);
        assert!(gate.admit(&proposal(dec!(100)), &portfolio, later).await.unwrap().is_trial());
    }
}
