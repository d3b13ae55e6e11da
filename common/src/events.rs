//! Structured events published to external notifiers

use crate::order::Fill;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Trading allowed
    Closed,
    /// Trading suspended after repeated execution failures
    Open,
    /// A single trial action may probe recovery
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    BandChanged {
        asset: String,
        from: Option<String>,
        to: String,
        score: f64,
    },
    BreakerTransition {
        from: BreakerState,
        to: BreakerState,
        failures: usize,
    },
    ProposalRejected {
        asset: String,
        strategy_id: String,
        reason: String,
    },
    OrderExecuted {
        fill: Fill,
    },
    ExecutionFailed {
        asset: String,
        strategy_id: String,
        reason: String,
    },
    IntegrityHalted {
        sequence: u64,
        reason: String,
    },
    CycleCompleted {
        assets: usize,
        executed: usize,
        rejected: usize,
        dry_run: bool,
    },
}

impl EngineEvent {
    /// Breaker trips are the transitions into `Open`
    pub fn is_breaker_trip(&self) -> bool {
        matches!(
            self,
            EngineEvent::BreakerTransition {
                to: BreakerState::Open,
                ..
            }
        )
    }
}
