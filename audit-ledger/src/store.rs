//! Ledger persistence interface and the in-memory backend

use crate::entry::{AuditAction, AuditEntry, EntityType, GENESIS_CHECKSUM};
use crate::tax::TaxLot;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Filter for ledger reads. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    /// Inclusive
    pub from_sequence: Option<u64>,
    /// Inclusive
    pub to_sequence: Option<u64>,
    pub limit: Option<usize>,
}

impl LedgerQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_range(mut self, from_sequence: Option<u64>, to_sequence: Option<u64>) -> Self {
        self.from_sequence = from_sequence;
        self.to_sequence = to_sequence;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.entity_type.map_or(true, |t| t == entry.entity_type)
            && self.entity_id.as_ref().map_or(true, |id| *id == entry.entity_id)
            && self.action.map_or(true, |a| a == entry.action)
            && self.from_sequence.map_or(true, |from| entry.sequence >= from)
            && self.to_sequence.map_or(true, |to| entry.sequence <= to)
    }
}

/// Storage backend for audit entries and tax lots.
///
/// `append` is all-or-nothing and must refuse a batch that does not continue
/// the stored chain. Reads return entries in ascending sequence order.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Last stored entry
    async fn head(&self) -> Result<Option<AuditEntry>>;

    /// Append a contiguous batch atomically
    async fn append(&self, entries: &[AuditEntry]) -> Result<()>;

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<AuditEntry>>;

    async fn len(&self) -> Result<u64>;

    /// Insert or replace lots by id
    async fn save_lots(&self, lots: &[TaxLot]) -> Result<()>;

    async fn load_lots(&self) -> Result<Vec<TaxLot>>;
}

/// Reject a batch that does not continue `head`
pub(crate) fn check_continuation(head: Option<&AuditEntry>, batch: &[AuditEntry]) -> Result<()> {
    let (mut sequence, mut checksum) = match head {
        Some(h) => (h.sequence, h.checksum.as_str()),
        None => (0, GENESIS_CHECKSUM),
    };
    for entry in batch {
        if entry.sequence != sequence + 1 {
            bail!(
                "append out of order: expected sequence {}, got {}",
                sequence + 1,
                entry.sequence
            );
        }
        if entry.previous_checksum != checksum {
            bail!("entry {} does not link to the stored chain head", entry.sequence);
        }
        sequence = entry.sequence;
        checksum = entry.checksum.as_str();
    }
    Ok(())
}

/// In-memory ledger store (for testing, dry runs and backtests)
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    entries: RwLock<Vec<AuditEntry>>,
    lots: RwLock<Vec<TaxLot>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn head(&self) -> Result<Option<AuditEntry>> {
        Ok(self.entries.read().await.last().cloned())
    }

    async fn append(&self, batch: &[AuditEntry]) -> Result<()> {
        let mut entries = self.entries.write().await;
        check_continuation(entries.last(), batch)?;
        entries.extend_from_slice(batch);
        Ok(())
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        let matching = entries.iter().filter(|e| query.matches(e)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn save_lots(&self, updated: &[TaxLot]) -> Result<()> {
        let mut lots = self.lots.write().await;
        for lot in updated {
            match lots.iter_mut().find(|l| l.id == lot.id) {
                Some(existing) => *existing = lot.clone(),
                None => lots.push(lot.clone()),
            }
        }
        Ok(())
    }

    async fn load_lots(&self) -> Result<Vec<TaxLot>> {
        Ok(self.lots.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditDraft;
    use chrono::Utc;

    fn chain(n: u64) -> Vec<AuditEntry> {
        let mut previous = GENESIS_CHECKSUM.to_string();
        (1..=n)
            .map(|sequence| {
                let draft = AuditDraft::new(EntityType::System, format!("e{}", sequence), AuditAction::AnalysisRecorded);
                let entry = AuditEntry::seal(draft, sequence, Utc::now(), &previous);
                previous = entry.checksum.clone();
                entry
            })
            .collect()
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let store = InMemoryLedgerStore::new();
        store.append(&chain(3)).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 3);

        let by_id = store.query(&LedgerQuery::all().with_entity_id("e2")).await.unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].sequence, 2);

        let range = store.query(&LedgerQuery::all().with_range(Some(2), None)).await.unwrap();
        assert_eq!(range.len(), 2);

        let limited = store.query(&LedgerQuery::all().with_limit(1)).await.unwrap();
        assert_eq!(limited[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_rejects_non_contiguous_batch() {
        let store = InMemoryLedgerStore::new();
        let entries = chain(3);
        store.append(&entries[..1]).await.unwrap();

        assert!(store.append(&entries[2..]).await.is_err());
        assert_eq!(store.len().await.unwrap(), 1);

        store.append(&entries[1..]).await.unwrap();
        assert_eq!(store.head().await.unwrap().unwrap().sequence, 3);
    }
}
