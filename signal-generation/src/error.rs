// Configuration and aggregation errors

use common::SignalCategory;

/// Invalid configuration. Raised at startup, never silently corrected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("category weights sum to {sum}, expected 1.0")]
    WeightSum { sum: f64 },

    #[error("category {category} has invalid weight {weight}")]
    InvalidCategoryWeight { category: SignalCategory, weight: f64 },

    #[error("indicator {indicator} belongs to category {category} which has no weight")]
    MissingCategoryWeight {
        indicator: String,
        category: SignalCategory,
    },

    #[error("invalid indicator {indicator}: {reason}")]
    InvalidIndicator { indicator: String, reason: String },

    #[error("band table is empty")]
    EmptyBandTable,

    #[error("band table must cover [{expected_lower}, {expected_upper}], found [{lower}, {upper}]")]
    BandCoverage {
        expected_lower: f64,
        expected_upper: f64,
        lower: f64,
        upper: f64,
    },

    #[error("gap between bands at {at}")]
    BandGap { at: f64 },

    #[error("bands overlap at {at}")]
    BandOverlap { at: f64 },

    #[error("invalid band {label}: {reason}")]
    InvalidBand { label: String, reason: String },

    #[error("duplicate strategy id {0}")]
    DuplicateStrategy(String),

    #[error("invalid strategy {id}: {reason}")]
    InvalidStrategy { id: String, reason: String },
}

/// Aggregation failure for one asset. Other assets in the cycle are unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("no categories enabled for {asset}")]
    NoCategoriesEnabled { asset: String },

    #[error("no indicator data available for {asset}")]
    NoSignalsAvailable { asset: String },
}
