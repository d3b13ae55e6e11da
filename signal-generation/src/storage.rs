// Analysis Storage Interface
// Keeps composite analyses for status queries and band-change detection

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::CompositeAnalysis;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for analysis storage backends
#[async_trait::async_trait]
pub trait AnalysisStorage: Send + Sync {
    /// Store an analysis
    async fn store(&self, analysis: &CompositeAnalysis) -> Result<()>;

    /// Most recent analysis for an asset
    async fn latest(&self, asset: &str) -> Result<Option<CompositeAnalysis>>;

    /// Retrieve an analysis by ID
    async fn get(&self, id: Uuid) -> Result<Option<CompositeAnalysis>>;

    /// Analyses for an asset within a time range, oldest first
    async fn get_by_time_range(
        &self,
        asset: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CompositeAnalysis>>;

    /// Latest analysis of every asset
    async fn latest_all(&self) -> Result<Vec<CompositeAnalysis>>;
}

/// In-memory storage with bounded history per asset
pub struct InMemoryAnalysisStorage {
    history: RwLock<HashMap<String, VecDeque<CompositeAnalysis>>>,
    max_per_asset: usize,
}

impl InMemoryAnalysisStorage {
    pub fn new(max_per_asset: usize) -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            max_per_asset: max_per_asset.max(1),
        }
    }
}

impl Default for InMemoryAnalysisStorage {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait::async_trait]
impl AnalysisStorage for InMemoryAnalysisStorage {
    async fn store(&self, analysis: &CompositeAnalysis) -> Result<()> {
        let mut history = self.history.write().await;
        let entries = history.entry(analysis.asset.clone()).or_default();
        entries.push_back(analysis.clone());
        while entries.len() > self.max_per_asset {
            entries.pop_front();
        }
        Ok(())
    }

    async fn latest(&self, asset: &str) -> Result<Option<CompositeAnalysis>> {
        let history = self.history.read().await;
        Ok(history.get(asset).and_then(|entries| entries.back().cloned()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<CompositeAnalysis>> {
        let history = self.history.read().await;
        Ok(history.values().flatten().find(|a| a.id == id).cloned())
    }

    async fn get_by_time_range(
        &self,
        asset: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CompositeAnalysis>> {
        let history = self.history.read().await;
        Ok(history
            .get(asset)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|a| a.timestamp >= start && a.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_all(&self) -> Result<Vec<CompositeAnalysis>> {
        let history = self.history.read().await;
        let mut latest: Vec<CompositeAnalysis> = history.values().filter_map(|e| e.back().cloned()).collect();
        latest.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::analysis;

    #[tokio::test]
    async fn test_latest_and_history_bound() {
        let storage = InMemoryAnalysisStorage::new(2);
        let first = analysis("BTC", -70.0);
        storage.store(&first).await.unwrap();
        storage.store(&analysis("BTC", -10.0)).await.unwrap();
        storage.store(&analysis("BTC", 30.0)).await.unwrap();

        let latest = storage.latest("BTC").await.unwrap().unwrap();
        assert_eq!(latest.composite_score, 30.0);
        assert!(storage.get(first.id).await.unwrap().is_none());
        assert!(storage.latest("ETH").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_all_sorted() {
        let storage = InMemoryAnalysisStorage::default();
        storage.store(&analysis("ETH", 0.0)).await.unwrap();
        storage.store(&analysis("BTC", 0.0)).await.unwrap();

        let assets: Vec<String> = storage.latest_all().await.unwrap().into_iter().map(|a| a.asset).collect();
        assert_eq!(assets, vec!["BTC".to_string(), "ETH".to_string()]);
    }
}
