//! Indicator readings loaded from a JSON snapshot
//!
//! The file maps asset -> indicator id -> reading; `null` marks a reading
//! as unavailable:
//!
//! ```json
//! { "BTC": { "rsi_14": 28.5, "fear_greed_index": 12, "mvrv_z_score": null } }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use signal_generation::{IndicatorValue, MarketDataProvider};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

type Snapshot = HashMap<String, HashMap<String, Option<f64>>>;

pub struct SnapshotProvider {
    path: Option<PathBuf>,
    readings: RwLock<Snapshot>,
}

impl SnapshotProvider {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let readings = read_snapshot(&path).await?;
        Ok(Self {
            path: Some(path),
            readings: RwLock::new(readings),
        })
    }

    /// Provider with no readings; every indicator is unavailable
    pub fn empty() -> Self {
        Self {
            path: None,
            readings: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let readings: Snapshot = serde_json::from_str(content).context("Invalid indicator snapshot")?;
        Ok(Self {
            path: None,
            readings: RwLock::new(readings),
        })
    }

    /// Re-read the snapshot file, if the provider was loaded from one
    pub async fn reload(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let readings = read_snapshot(path).await?;
            *self.readings.write().await = readings;
        }
        Ok(())
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read indicator snapshot {}", path.display()))?;
    let readings: Snapshot = serde_json::from_str(&content)
        .with_context(|| format!("Invalid indicator snapshot {}", path.display()))?;
    info!(path = %path.display(), assets = readings.len(), "Indicator snapshot loaded");
    Ok(readings)
}

#[async_trait]
impl MarketDataProvider for SnapshotProvider {
    async fn get_indicator(&self, asset: &str, indicator_id: &str) -> Result<IndicatorValue> {
        let readings = self.readings.read().await;
        let value = readings
            .get(asset)
            .and_then(|indicators| indicators.get(indicator_id))
            .copied()
            .flatten();
        Ok(IndicatorValue::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_lookup() {
        let provider =
            SnapshotProvider::from_json(r#"{"BTC": {"rsi_14": 28.5, "mvrv_z_score": null}}"#).unwrap();

        assert_eq!(
            provider.get_indicator("BTC", "rsi_14").await.unwrap(),
            IndicatorValue::Available(28.5)
        );
        assert_eq!(
            provider.get_indicator("BTC", "mvrv_z_score").await.unwrap(),
            IndicatorValue::Unavailable
        );
        assert_eq!(
            provider.get_indicator("ETH", "rsi_14").await.unwrap(),
            IndicatorValue::Unavailable
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        assert!(SnapshotProvider::load("/nonexistent/snapshot.json").await.is_err());
        assert!(SnapshotProvider::empty().reload().await.is_ok());
    }
}
