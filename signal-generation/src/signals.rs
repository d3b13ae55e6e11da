// Indicator definitions
// Maps raw provider readings onto the common [-100, 100] fear/greed scale

use common::{clamp_score, SignalCategory, SCORE_MAX, SCORE_MIN};
use serde::{Deserialize, Serialize};

/// How a raw indicator reading is mapped onto the score scale.
///
/// Negative scores mean fear, positive scores mean greed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Normalization {
    /// `min` maps to -100, `max` maps to +100
    Linear { min: f64, max: f64 },
    /// `min` maps to +100, `max` maps to -100
    Inverted { min: f64, max: f64 },
    /// Reading is already on the score scale
    Score,
}

impl Normalization {
    /// Normalize a raw reading. `None` for non-finite input.
    pub fn apply(&self, raw: f64) -> Option<f64> {
        if !raw.is_finite() {
            return None;
        }

        let score = match self {
            Normalization::Linear { min, max } => linear(raw, *min, *max),
            Normalization::Inverted { min, max } => -linear(raw, *min, *max),
            Normalization::Score => raw,
        };
        Some(clamp_score(score))
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Normalization::Linear { min, max } | Normalization::Inverted { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err("range bounds must be finite".to_string());
                }
                if min >= max {
                    return Err(format!("range min {} must be below max {}", min, max));
                }
                Ok(())
            }
            Normalization::Score => Ok(()),
        }
    }
}

fn linear(raw: f64, min: f64, max: f64) -> f64 {
    let fraction = (raw - min) / (max - min);
    SCORE_MIN + fraction * (SCORE_MAX - SCORE_MIN)
}

/// One configured indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    /// Identifier passed to the market data provider
    pub id: String,
    pub category: SignalCategory,
    /// Weight within its category
    #[serde(default = "default_indicator_weight")]
    pub weight: f64,
    pub normalization: Normalization,
}

fn default_indicator_weight() -> f64 {
    1.0
}

impl IndicatorSpec {
    pub fn new(id: impl Into<String>, category: SignalCategory, normalization: Normalization) -> Self {
        Self {
            id: id.into(),
            category,
            weight: default_indicator_weight(),
            normalization,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn normalize(&self, raw: f64) -> Option<f64> {
        self.normalization.apply(raw)
    }

    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        let invalid = |reason: String| crate::ConfigError::InvalidIndicator {
            indicator: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty indicator id".to_string()));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(invalid(format!("weight {} must be positive", self.weight)));
        }
        self.normalization.validate().map_err(invalid)
    }
}

/// Default indicator set, two or fewer readings per category
pub fn default_indicators() -> Vec<IndicatorSpec> {
    use Normalization::*;
    use SignalCategory::*;

    vec![
        IndicatorSpec::new("rsi_14", Technical, Linear { min: 0.0, max: 100.0 }),
        IndicatorSpec::new("price_vs_sma200_pct", Technical, Linear { min: -50.0, max: 50.0 }),
        IndicatorSpec::new("fear_greed_index", Sentiment, Linear { min: 0.0, max: 100.0 }).with_weight(2.0),
        IndicatorSpec::new("social_sentiment", Sentiment, Score),
        IndicatorSpec::new("mvrv_z_score", OnChain, Linear { min: -1.0, max: 7.0 }),
        IndicatorSpec::new("exchange_netflow", OnChain, Inverted { min: -10_000.0, max: 10_000.0 }),
        IndicatorSpec::new("funding_rate_pct", Derivatives, Linear { min: -0.1, max: 0.1 }),
        IndicatorSpec::new("open_interest_change_pct", Derivatives, Linear { min: -20.0, max: 20.0 }),
        IndicatorSpec::new("dxy_change_pct", Macro, Inverted { min: -5.0, max: 5.0 }),
        IndicatorSpec::new("hash_ribbon", Mining, Score),
        IndicatorSpec::new("etf_netflow_musd", Institutional, Linear { min: -500.0, max: 500.0 }),
        IndicatorSpec::new("whale_accumulation", SmartMoney, Score),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_normalization() {
        let norm = Normalization::Linear { min: 0.0, max: 100.0 };
        assert_eq!(norm.apply(0.0), Some(-100.0));
        assert_eq!(norm.apply(50.0), Some(0.0));
        assert_eq!(norm.apply(100.0), Some(100.0));
        // Out-of-range readings are clamped
        assert_eq!(norm.apply(150.0), Some(100.0));
    }

    #[test]
    fn test_inverted_normalization() {
        let norm = Normalization::Inverted { min: -5.0, max: 5.0 };
        assert_eq!(norm.apply(-5.0), Some(100.0));
        assert_eq!(norm.apply(5.0), Some(-100.0));
    }

    #[test]
    fn test_non_finite_reading_is_rejected() {
        assert_eq!(Normalization::Score.apply(f64::NAN), None);
        assert_eq!(Normalization::Score.apply(f64::INFINITY), None);
        assert_eq!(Normalization::Score.apply(-250.0), Some(-100.0));
    }

    #[test]
    fn test_indicator_validation() {
        let bad_range = IndicatorSpec::new("x", SignalCategory::Macro, Normalization::Linear { min: 1.0, max: 1.0 });
        assert!(bad_range.validate().is_err());

        let bad_weight = IndicatorSpec::new("y", SignalCategory::Macro, Normalization::Score).with_weight(0.0);
        assert!(bad_weight.validate().is_err());

        for spec in default_indicators() {
            assert!(spec.validate().is_ok(), "{} should be valid", spec.id);
        }
    }

    #[test]
    fn test_spec_deserializes_from_toml() {
        let spec: IndicatorSpec = toml::from_str(
            r#"
            id = "rsi_14"
            category = "technical"
            normalization = { type = "linear", min = 0.0, max = 100.0 }
            "#,
        )
        .unwrap();
        assert_eq!(spec.weight, 1.0);
        assert_eq!(spec.normalize(25.0), Some(-50.0));
    }
}
