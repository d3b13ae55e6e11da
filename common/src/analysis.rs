//! Signals, category scores and the composite analysis record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Indicator category. Category weights are configuration keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Technical,
    Sentiment,
    OnChain,
    Derivatives,
    Macro,
    Mining,
    Institutional,
    SmartMoney,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 8] = [
        SignalCategory::Technical,
        SignalCategory::Sentiment,
        SignalCategory::OnChain,
        SignalCategory::Derivatives,
        SignalCategory::Macro,
        SignalCategory::Mining,
        SignalCategory::Institutional,
        SignalCategory::SmartMoney,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Technical => "technical",
            SignalCategory::Sentiment => "sentiment",
            SignalCategory::OnChain => "on_chain",
            SignalCategory::Derivatives => "derivatives",
            SignalCategory::Macro => "macro",
            SignalCategory::Mining => "mining",
            SignalCategory::Institutional => "institutional",
            SignalCategory::SmartMoney => "smart_money",
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indicator reading for one cycle.
///
/// Immutable once recorded. An unavailable signal keeps its slot in the
/// analysis (so coverage can be reported) but carries no score weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub category: SignalCategory,
    pub name: String,
    pub raw_value: Option<f64>,
    /// Normalized score in [-100, 100]; 0.0 when unavailable
    pub score: f64,
    pub available: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Signal {
    pub fn available(
        category: SignalCategory,
        name: impl Into<String>,
        raw_value: f64,
        score: f64,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            raw_value: Some(raw_value),
            score: crate::clamp_score(score),
            available: true,
            fetched_at,
        }
    }

    pub fn unavailable(
        category: SignalCategory,
        name: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            raw_value: None,
            score: 0.0,
            available: false,
            fetched_at,
        }
    }
}

/// Aggregate of the available signals of one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: SignalCategory,
    pub score: f64,
    /// Configured category weight (not derived from data)
    pub weight: f64,
    pub available_signals: usize,
    pub total_signals: usize,
}

impl CategoryScore {
    pub fn has_data(&self) -> bool {
        self.available_signals > 0
    }
}

/// Recommended action attached to a market-condition band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    Reduce,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Hold => "hold",
            TradeAction::Reduce => "reduce",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: TradeAction,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// Position-size multiplier of the matched band
    pub multiplier: f64,
    pub band: String,
    pub rationale: String,
}

/// One asset, one evaluation cycle. Never mutated; new cycles create new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeAnalysis {
    pub id: Uuid,
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub composite_score: f64,
    pub category_scores: Vec<CategoryScore>,
    /// Market-condition band label
    pub market_condition: String,
    pub recommendation: Recommendation,
    pub signals: Vec<Signal>,
    /// Fraction of requested signals that were available
    pub coverage: f64,
}

impl CompositeAnalysis {
    pub fn category(&self, category: SignalCategory) -> Option<&CategoryScore> {
        self.category_scores.iter().find(|c| c.category == category)
    }

    pub fn unavailable_signals(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter().filter(|s| !s.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_constructors() {
        let now = Utc::now();
        let signal = Signal::available(SignalCategory::Sentiment, "fear_greed", 12.0, -140.0, now);
        assert!(signal.available);
        assert_eq!(signal.score, -100.0);

        let missing = Signal::unavailable(SignalCategory::OnChain, "mvrv", now);
        assert!(!missing.available);
        assert_eq!(missing.raw_value, None);
        assert_eq!(missing.score, 0.0);
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&SignalCategory::SmartMoney).unwrap();
        assert_eq!(json, "\"smart_money\"");
        let parsed: SignalCategory = serde_json::from_str("\"on_chain\"").unwrap();
        assert_eq!(parsed, SignalCategory::OnChain);
        assert_eq!(SignalCategory::OnChain.to_string(), "on_chain");
    }
}
