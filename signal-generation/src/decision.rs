// Decision Engine
// Maps a composite score onto a market-condition band and a recommendation

use crate::ConfigError;
use common::{clamp_score, Recommendation, TradeAction, SCORE_MAX, SCORE_MIN};
use serde::{Deserialize, Serialize};

/// Contiguous score interval `[lower, upper)`; the top band also includes +100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    /// Position-size multiplier applied by scaling strategies
    pub multiplier: f64,
    pub action: TradeAction,
}

impl Band {
    pub fn new(label: impl Into<String>, lower: f64, upper: f64, multiplier: f64, action: TradeAction) -> Self {
        Self {
            label: label.into(),
            lower,
            upper,
            multiplier,
            action,
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.lower && (score < self.upper || (self.upper == SCORE_MAX && score == SCORE_MAX))
    }
}

/// Validated band table: a partition of [-100, 100] with no gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Band>", into = "Vec<Band>")]
pub struct BandTable {
    bands: Vec<Band>,
}

impl BandTable {
    /// Sort and validate a set of bands
    pub fn new(mut bands: Vec<Band>) -> Result<Self, ConfigError> {
        bands.sort_by(|a, b| a.lower.total_cmp(&b.lower));
        validate_partition(&bands)?;
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// Band containing `score` (clamped first)
    pub fn band_for(&self, score: f64) -> &Band {
        let score = clamp_score(score);
        // Validated tables start at SCORE_MIN, so some band always matches
        let index = self
            .bands
            .iter()
            .rposition(|band| band.lower <= score)
            .unwrap_or(0);
        &self.bands[index]
    }
}

impl Default for BandTable {
    fn default() -> Self {
        Self {
            bands: vec![
                Band::new("extreme_fear", -100.0, -60.0, 3.0, TradeAction::Buy),
                Band::new("fear", -60.0, -20.0, 2.0, TradeAction::Buy),
                Band::new("neutral", -20.0, 20.0, 1.0, TradeAction::Hold),
                Band::new("greed", 20.0, 60.0, 0.5, TradeAction::Reduce),
                Band::new("extreme_greed", 60.0, 100.0, 0.0, TradeAction::Sell),
            ],
        }
    }
}

impl TryFrom<Vec<Band>> for BandTable {
    type Error = ConfigError;

    fn try_from(bands: Vec<Band>) -> Result<Self, Self::Error> {
        BandTable::new(bands)
    }
}

impl From<BandTable> for Vec<Band> {
    fn from(table: BandTable) -> Self {
        table.bands
    }
}

fn validate_partition(bands: &[Band]) -> Result<(), ConfigError> {
    let (first, last) = match (bands.first(), bands.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ConfigError::EmptyBandTable),
    };

    if first.lower != SCORE_MIN || last.upper != SCORE_MAX {
        return Err(ConfigError::BandCoverage {
            expected_lower: SCORE_MIN,
            expected_upper: SCORE_MAX,
            lower: first.lower,
            upper: last.upper,
        });
    }

    let mut labels = std::collections::HashSet::new();
    for band in bands {
        let invalid = |reason: &str| ConfigError::InvalidBand {
            label: band.label.clone(),
            reason: reason.to_string(),
        };
        if band.label.trim().is_empty() {
            return Err(invalid("empty label"));
        }
        if !labels.insert(band.label.as_str()) {
            return Err(invalid("duplicate label"));
        }
        if !(band.lower < band.upper) {
            return Err(invalid("lower bound must be below upper bound"));
        }
        if !band.multiplier.is_finite() || band.multiplier < 0.0 {
            return Err(invalid("multiplier must be a non-negative number"));
        }
    }

    for pair in bands.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.lower > prev.upper {
            return Err(ConfigError::BandGap { at: prev.upper });
        }
        if next.lower < prev.upper {
            return Err(ConfigError::BandOverlap { at: next.lower });
        }
    }

    Ok(())
}

/// Stateless band lookup. Same score and table, same recommendation.
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    table: BandTable,
}

impl DecisionEngine {
    pub fn new(table: BandTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &BandTable {
        &self.table
    }

    pub fn band_for(&self, score: f64) -> &Band {
        self.table.band_for(score)
    }

    /// Recommendation for a composite score. Confidence is |score| / 100.
    pub fn decide(&self, score: f64) -> Recommendation {
        let score = clamp_score(score);
        let band = self.table.band_for(score);
        Recommendation {
            action: band.action,
            confidence: score.abs() / SCORE_MAX,
            multiplier: band.multiplier,
            band: band.label.clone(),
            rationale: format!(
                "composite score {:.1} in {} band [{}, {}): {} at {}x",
                score, band.label, band.lower, band.upper, band.action, band.multiplier
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let table = BandTable::default();
        assert!(BandTable::new(table.bands().to_vec()).is_ok());
    }

    #[test]
    fn test_every_score_maps_to_exactly_one_band() {
        let table = BandTable::default();
        let mut score = -100.0;
        while score <= 100.0 {
            let matching = table.bands().iter().filter(|b| b.contains(score)).count();
            assert_eq!(matching, 1, "score {} matched {} bands", score, matching);
            assert!(table.band_for(score).contains(score));
            score += 0.5;
        }
    }

    #[test]
    fn test_boundaries_belong_to_upper_band() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.band_for(-60.0).label, "fear");
        assert_eq!(engine.band_for(-60.0001).label, "extreme_fear");
        assert_eq!(engine.band_for(20.0).label, "greed");
        assert_eq!(engine.band_for(100.0).label, "extreme_greed");
        assert_eq!(engine.band_for(-100.0).label, "extreme_fear");
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let engine = DecisionEngine::default();
        assert_eq!(engine.band_for(-250.0).label, "extreme_fear");
        assert_eq!(engine.band_for(f64::NAN).label, "neutral");
        assert_eq!(engine.decide(400.0).confidence, 1.0);
    }

    #[test]
    fn test_multipliers_decrease_toward_greed() {
        let table = BandTable::default();
        for pair in table.bands().windows(2) {
            assert!(pair[0].multiplier > pair[1].multiplier);
        }
    }

    #[test]
    fn test_decide() {
        let engine = DecisionEngine::default();
        let rec = engine.decide(-70.0);
        assert_eq!(rec.action, TradeAction::Buy);
        assert_eq!(rec.band, "extreme_fear");
        assert_eq!(rec.multiplier, 3.0);
        assert!((rec.confidence - 0.7).abs() < 1e-12);

        // Pure: same input, same output
        assert_eq!(engine.decide(-70.0), rec);
    }

    #[test]
    fn test_gap_and_overlap_rejected() {
        let gap = vec![
            Band::new("low", -100.0, 0.0, 1.0, TradeAction::Buy),
            Band::new("high", 10.0, 100.0, 0.5, TradeAction::Sell),
        ];
        assert_eq!(BandTable::new(gap), Err(ConfigError::BandGap { at: 0.0 }));

        let overlap = vec![
            Band::new("low", -100.0, 10.0, 1.0, TradeAction::Buy),
            Band::new("high", 0.0, 100.0, 0.5, TradeAction::Sell),
        ];
        assert_eq!(BandTable::new(overlap), Err(ConfigError::BandOverlap { at: 0.0 }));

        let short = vec![Band::new("all", -100.0, 90.0, 1.0, TradeAction::Hold)];
        assert!(matches!(BandTable::new(short), Err(ConfigError::BandCoverage { .. })));

        assert_eq!(BandTable::new(Vec::new()), Err(ConfigError::EmptyBandTable));
    }

    #[test]
    fn test_negative_multiplier_rejected() {
        let bands = vec![Band::new("all", -100.0, 100.0, -1.0, TradeAction::Hold)];
        assert!(matches!(BandTable::new(bands), Err(ConfigError::InvalidBand { .. })));
    }

    #[test]
    fn test_table_deserialization_validates() {
        let json = r#"[
            {"label": "high", "lower": 0.0, "upper": 100.0, "multiplier": 0.5, "action": "sell"},
            {"label": "low", "lower": -100.0, "upper": 0.0, "multiplier": 2.0, "action": "buy"}
        ]"#;
        let table: BandTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.bands()[0].label, "low");

        let bad = r#"[{"label": "low", "lower": -100.0, "upper": 0.0, "multiplier": 2.0, "action": "buy"}]"#;
        assert!(serde_json::from_str::<BandTable>(bad).is_err());
    }
}
