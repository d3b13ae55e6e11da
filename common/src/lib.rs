//! Shared data model for the signal-driven portfolio automation engine.
//!
//! Every crate in the workspace speaks in these types: indicator signals and
//! composite analyses produced by the aggregator, proposals produced by
//! strategies, fills returned by the exchange boundary and the events the
//! engine publishes to external notifiers.

pub mod analysis;
pub mod events;
pub mod order;

pub use analysis::{
    CategoryScore, CompositeAnalysis, Recommendation, Signal, SignalCategory, TradeAction,
};
pub use events::{BreakerState, EngineEvent};
pub use order::{
    AssetHolding, Fill, Holdings, MarketSnapshot, OrderSide, OrderSize, PriceConstraint,
    StrategyProposal,
};

pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

/// Lower bound of every normalized score in the system.
pub const SCORE_MIN: f64 = -100.0;

/// Upper bound of every normalized score in the system.
pub const SCORE_MAX: f64 = 100.0;

/// Clamp a score into `[SCORE_MIN, SCORE_MAX]`. NaN collapses to neutral.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(SCORE_MIN, SCORE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(150.0), 100.0);
        assert_eq!(clamp_score(-250.0), -100.0);
        assert_eq!(clamp_score(42.5), 42.5);
        assert_eq!(clamp_score(f64::NAN), 0.0);
    }
}
