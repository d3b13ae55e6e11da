// Market data provider interface

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Result of one indicator lookup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum IndicatorValue {
    Available(f64),
    Unavailable,
}

impl IndicatorValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            IndicatorValue::Available(v) => Some(*v),
            IndicatorValue::Unavailable => None,
        }
    }
}

impl From<Option<f64>> for IndicatorValue {
    fn from(value: Option<f64>) -> Self {
        value.map(IndicatorValue::Available).unwrap_or(IndicatorValue::Unavailable)
    }
}

/// Source of raw indicator readings.
///
/// Errors are treated like `Unavailable` by the aggregator; they never fail
/// the cycle.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_indicator(&self, asset: &str, indicator_id: &str) -> Result<IndicatorValue>;
}

/// Provider backed by a fixed table of readings (testing and replay)
#[derive(Debug, Default)]
pub struct StaticProvider {
    readings: RwLock<HashMap<(String, String), f64>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, asset: &str, indicator_id: &str, value: f64) {
        self.readings
            .write()
            .await
            .insert((asset.to_string(), indicator_id.to_string()), value);
    }

    pub async fn remove(&self, asset: &str, indicator_id: &str) {
        self.readings
            .write()
            .await
            .remove(&(asset.to_string(), indicator_id.to_string()));
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn get_indicator(&self, asset: &str, indicator_id: &str) -> Result<IndicatorValue> {
        let readings = self.readings.read().await;
        Ok(readings
            .get(&(asset.to_string(), indicator_id.to_string()))
            .copied()
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticProvider::new();
        provider.set("BTC", "rsi_14", 28.0).await;

        let value = provider.get_indicator("BTC", "rsi_14").await.unwrap();
        assert_eq!(value, IndicatorValue::Available(28.0));

        let missing = provider.get_indicator("ETH", "rsi_14").await.unwrap();
        assert_eq!(missing, IndicatorValue::Unavailable);
        assert_eq!(missing.value(), None);
    }
}
