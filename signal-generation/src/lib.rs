// Signal Generation Framework (Layer 2)
// Turns raw market indicators into a composite fear/greed score, a
// market-condition recommendation and strategy order proposals

pub mod aggregator;
pub mod cache;
pub mod decision;
pub mod error;
pub mod provider;
pub mod signals;
pub mod storage;
pub mod strategies;

pub use aggregator::{AggregatedScore, AggregatorConfig, SignalAggregator};
pub use cache::{CachedReading, SignalCache};
pub use decision::{Band, BandTable, DecisionEngine};
pub use error::{AggregationError, ConfigError};
pub use provider::{IndicatorValue, MarketDataProvider, StaticProvider};
pub use signals::{default_indicators, IndicatorSpec, Normalization};
pub use storage::{AnalysisStorage, InMemoryAnalysisStorage};
pub use strategies::{
    ensure_unique_ids, merge_proposals, DcaConfig, GridConfig, MeanReversionConfig, RebalanceConfig, Strategy,
    StrategyConfig, StrategyRegistry, SwingConfig, MERGED_STRATEGY_ID,
};
