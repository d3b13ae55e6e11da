// Signal Aggregator
// Fans out indicator fetches for one asset, normalizes readings and combines
// them into category scores and a single composite score

use crate::cache::{CachedReading, SignalCache};
use crate::decision::DecisionEngine;
use crate::provider::{IndicatorValue, MarketDataProvider};
use crate::signals::{default_indicators, IndicatorSpec};
use crate::{AggregationError, ConfigError};
use chrono::{DateTime, Utc};
use common::{clamp_score, CategoryScore, CompositeAnalysis, Signal, SignalCategory};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_indicators")]
    pub indicators: Vec<IndicatorSpec>,

    /// Must sum to 1.0
    #[serde(default = "default_category_weights")]
    pub category_weights: BTreeMap<SignalCategory, f64>,

    /// Per-indicator fetch timeout
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// 0 disables caching
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_category_weights() -> BTreeMap<SignalCategory, f64> {
    use SignalCategory::*;
    BTreeMap::from([
        (Technical, 0.20),
        (Sentiment, 0.20),
        (OnChain, 0.20),
        (Derivatives, 0.10),
        (Macro, 0.10),
        (Mining, 0.05),
        (Institutional, 0.10),
        (SmartMoney, 0.05),
    ])
}

fn default_fetch_timeout_ms() -> u64 {
    5000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            indicators: default_indicators(),
            category_weights: default_category_weights(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (category, weight) in &self.category_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::InvalidCategoryWeight {
                    category: *category,
                    weight: *weight,
                });
            }
        }

        let sum: f64 = self.category_weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightSum { sum });
        }

        let mut ids = HashSet::new();
        for spec in &self.indicators {
            spec.validate()?;
            if !ids.insert(spec.id.as_str()) {
                return Err(ConfigError::InvalidIndicator {
                    indicator: spec.id.clone(),
                    reason: "duplicate indicator id".to_string(),
                });
            }
            if !self.category_weights.contains_key(&spec.category) {
                return Err(ConfigError::MissingCategoryWeight {
                    indicator: spec.id.clone(),
                    category: spec.category,
                });
            }
        }

        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Composite score and its category breakdown, before band classification
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedScore {
    pub composite_score: f64,
    pub category_scores: Vec<CategoryScore>,
    pub signals: Vec<Signal>,
    pub coverage: f64,
}

/// Signal aggregator for any number of assets
pub struct SignalAggregator {
    config: AggregatorConfig,
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<SignalCache>,
    decision: Arc<DecisionEngine>,
}

impl SignalAggregator {
    /// Validates the configuration; an invalid one never reaches a cycle
    pub fn new(
        config: AggregatorConfig,
        provider: Arc<dyn MarketDataProvider>,
        decision: Arc<DecisionEngine>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = Arc::new(SignalCache::new(config.cache_ttl()));
        info!(
            indicators = config.indicators.len(),
            categories = config.category_weights.len(),
            "Signal aggregator configured"
        );
        Ok(Self {
            config,
            provider,
            cache,
            decision,
        })
    }

    /// Share a cache between aggregators
    pub fn with_cache(mut self, cache: Arc<SignalCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &SignalCache {
        &self.cache
    }

    pub fn decision_engine(&self) -> &DecisionEngine {
        &self.decision
    }

    /// Fetch every indicator of the enabled categories concurrently.
    ///
    /// Missing, failed, timed-out and non-finite readings come back as
    /// unavailable signals.
    pub async fn collect_signals(&self, asset: &str, categories: &[SignalCategory]) -> Vec<Signal> {
        let specs = self
            .config
            .indicators
            .iter()
            .filter(|spec| categories.contains(&spec.category));
        join_all(specs.map(|spec| self.fetch(asset, spec))).await
    }

    async fn fetch(&self, asset: &str, spec: &IndicatorSpec) -> Signal {
        if let Some(cached) = self.cache.get(asset, &spec.id) {
            if let Some(score) = spec.normalize(cached.raw_value) {
                debug!(asset, indicator = %spec.id, "Indicator served from cache");
                return Signal::available(spec.category, &spec.id, cached.raw_value, score, cached.fetched_at);
            }
        }

        let fetched_at = Utc::now();
        let result = tokio::time::timeout(
            self.config.fetch_timeout(),
            self.provider.get_indicator(asset, &spec.id),
        )
        .await;

        let raw = match result {
            Ok(Ok(IndicatorValue::Available(value))) => value,
            Ok(Ok(IndicatorValue::Unavailable)) => {
                debug!(asset, indicator = %spec.id, "Indicator unavailable");
                return Signal::unavailable(spec.category, &spec.id, fetched_at);
            }
            Ok(Err(e)) => {
                warn!(asset, indicator = %spec.id, error = %e, "Indicator fetch failed");
                return Signal::unavailable(spec.category, &spec.id, fetched_at);
            }
            Err(_) => {
                warn!(
                    asset,
                    indicator = %spec.id,
                    timeout_ms = self.config.fetch_timeout_ms,
                    "Indicator fetch timed out"
                );
                return Signal::unavailable(spec.category, &spec.id, fetched_at);
            }
        };

        match spec.normalize(raw) {
            Some(score) => {
                self.cache.insert(
                    asset,
                    &spec.id,
                    CachedReading {
                        raw_value: raw,
                        fetched_at,
                    },
                );
                Signal::available(spec.category, &spec.id, raw, score, fetched_at)
            }
            None => {
                warn!(asset, indicator = %spec.id, raw, "Discarding non-finite reading");
                Signal::unavailable(spec.category, &spec.id, fetched_at)
            }
        }
    }

    /// Combine signals into category scores and a composite score.
    ///
    /// Categories without data are reported but excluded; the remaining
    /// category weights are re-normalized to sum to 1.
    pub fn score(
        &self,
        asset: &str,
        categories: &[SignalCategory],
        signals: Vec<Signal>,
    ) -> Result<AggregatedScore, AggregationError> {
        if categories.is_empty() {
            return Err(AggregationError::NoCategoriesEnabled {
                asset: asset.to_string(),
            });
        }

        let mut enabled: Vec<SignalCategory> = categories.to_vec();
        enabled.sort();
        enabled.dedup();

        let category_scores: Vec<CategoryScore> = enabled
            .iter()
            .map(|category| self.category_score(*category, &signals))
            .collect();

        let (weighted, weight_total) = category_scores
            .iter()
            .filter(|c| c.has_data() && c.weight > 0.0)
            .fold((0.0, 0.0), |(sum, total), c| (sum + c.score * c.weight, total + c.weight));

        if weight_total <= 0.0 {
            return Err(AggregationError::NoSignalsAvailable {
                asset: asset.to_string(),
            });
        }

        let available = signals.iter().filter(|s| s.available).count();
        let coverage = if signals.is_empty() {
            0.0
        } else {
            available as f64 / signals.len() as f64
        };

        Ok(AggregatedScore {
            composite_score: clamp_score(weighted / weight_total),
            category_scores,
            signals,
            coverage,
        })
    }

    fn category_score(&self, category: SignalCategory, signals: &[Signal]) -> CategoryScore {
        let weight = self.config.category_weights.get(&category).copied().unwrap_or(0.0);
        let mut total_signals = 0;
        let mut available_signals = 0;
        let mut weighted = 0.0;
        let mut weight_total = 0.0;

        for signal in signals.iter().filter(|s| s.category == category) {
            total_signals += 1;
            if !signal.available {
                continue;
            }
            available_signals += 1;
            let indicator_weight = self
                .config
                .indicators
                .iter()
                .find(|spec| spec.id == signal.name)
                .map(|spec| spec.weight)
                .unwrap_or(1.0);
            weighted += signal.score * indicator_weight;
            weight_total += indicator_weight;
        }

        let score = if weight_total > 0.0 {
            clamp_score(weighted / weight_total)
        } else {
            0.0
        };

        CategoryScore {
            category,
            score,
            weight,
            available_signals,
            total_signals,
        }
    }

    /// Full analysis for one asset: fetch, score, classify.
    pub async fn analyze(
        &self,
        asset: &str,
        categories: &[SignalCategory],
    ) -> Result<CompositeAnalysis, AggregationError> {
        let signals = self.collect_signals(asset, categories).await;
        let aggregated = self.score(asset, categories, signals)?;
        Ok(self.classify(asset, aggregated, Utc::now()))
    }

    /// Attach the band recommendation to an aggregated score
    pub fn classify(&self, asset: &str, aggregated: AggregatedScore, timestamp: DateTime<Utc>) -> CompositeAnalysis {
        let recommendation = self.decision.decide(aggregated.composite_score);

        let unavailable = aggregated.signals.iter().filter(|s| !s.available).count();
        if unavailable > 0 {
            info!(
                asset,
                unavailable,
                coverage = aggregated.coverage,
                "Composite computed with partial coverage"
            );
        }
        debug!(
            asset,
            score = aggregated.composite_score,
            band = %recommendation.band,
            "Composite analysis complete"
        );

        CompositeAnalysis {
            id: Uuid::new_v4(),
            asset: asset.to_string(),
            timestamp,
            composite_score: aggregated.composite_score,
            category_scores: aggregated.category_scores,
            market_condition: recommendation.band.clone(),
            recommendation,
            signals: aggregated.signals,
            coverage: aggregated.coverage,
        }
    }
}
