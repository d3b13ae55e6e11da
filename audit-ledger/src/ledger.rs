//! Append-only hash-chained ledger

use crate::entry::{AuditDraft, AuditEntry, GENESIS_CHECKSUM};
use crate::store::{LedgerQuery, LedgerStore};
use crate::tax::{LotSelectionMethod, TaxReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Why the chain failed verification. Every variant names the first
/// divergent sequence number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainVerificationError {
    #[error("sequence {sequence}: expected this position, found entry numbered {found}")]
    SequenceGap { sequence: u64, found: u64 },

    #[error("sequence {sequence}: previous checksum does not match the preceding entry")]
    BrokenLink { sequence: u64 },

    #[error("sequence {sequence}: content does not match its checksum")]
    ChecksumMismatch { sequence: u64 },
}

impl ChainVerificationError {
    pub fn first_divergent_sequence(&self) -> u64 {
        match self {
            ChainVerificationError::SequenceGap { sequence, .. }
            | ChainVerificationError::BrokenLink { sequence }
            | ChainVerificationError::ChecksumMismatch { sequence } => *sequence,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("failed to serialize ledger value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit chain verification failed: {0}")]
    Integrity(#[from] ChainVerificationError),

    #[error(transparent)]
    Tax(#[from] crate::tax::TaxError),
}

/// Successful verification summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub entries: u64,
    pub head_checksum: String,
}

/// Recompute a chain from genesis
pub fn verify_entries(entries: &[AuditEntry]) -> Result<ChainReport, ChainVerificationError> {
    let mut previous = GENESIS_CHECKSUM;
    for (index, entry) in entries.iter().enumerate() {
        let expected = index as u64 + 1;
        if entry.sequence != expected {
            return Err(ChainVerificationError::SequenceGap {
                sequence: expected,
                found: entry.sequence,
            });
        }
        if entry.previous_checksum != previous {
            return Err(ChainVerificationError::BrokenLink { sequence: expected });
        }
        if !entry.has_valid_checksum() {
            return Err(ChainVerificationError::ChecksumMismatch { sequence: expected });
        }
        previous = &entry.checksum;
    }

    Ok(ChainReport {
        entries: entries.len() as u64,
        head_checksum: previous.to_string(),
    })
}

/// Single-writer audit ledger.
///
/// Appends are serialized by one mutex held across reading the head,
/// sealing the batch and storing it. Reads go straight to the store.
pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    writer: Mutex<()>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, LedgerError> {
        let mut entries = self.append_batch(vec![draft]).await?;
        entries
            .pop()
            .ok_or_else(|| LedgerError::Storage(anyhow::anyhow!("append produced no entry")))
    }

    /// Append several entries atomically, in order
    pub async fn append_batch(&self, drafts: Vec<AuditDraft>) -> Result<Vec<AuditEntry>, LedgerError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.writer.lock().await;
        let head = self.store.head().await?;
        let (mut sequence, mut previous) = match head {
            Some(h) => (h.sequence, h.checksum),
            None => (0, GENESIS_CHECKSUM.to_string()),
        };

        let now = Utc::now();
        let mut sealed = Vec::with_capacity(drafts.len());
        for draft in drafts {
            sequence += 1;
            let entry = AuditEntry::seal(draft, sequence, now, &previous);
            previous = entry.checksum.clone();
            sealed.push(entry);
        }

        self.store.append(&sealed).await?;
        for entry in &sealed {
            debug!(
                sequence = entry.sequence,
                action = %entry.action,
                entity_id = %entry.entity_id,
                "Ledger entry appended"
            );
        }
        Ok(sealed)
    }

    /// Recompute the stored chain from genesis
    pub async fn verify_chain(&self) -> Result<ChainReport, LedgerError> {
        let entries = self.store.query(&LedgerQuery::all()).await?;
        match verify_entries(&entries) {
            Ok(report) => {
                info!(entries = report.entries, "Audit chain verified");
                Ok(report)
            }
            Err(e) => {
                error!(
                    first_divergent_sequence = e.first_divergent_sequence(),
                    error = %e,
                    "Audit chain verification failed"
                );
                Err(LedgerError::Integrity(e))
            }
        }
    }

    pub async fn entries(&self, query: &LedgerQuery) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(self.store.query(query).await?)
    }

    pub async fn len(&self) -> Result<u64, LedgerError> {
        Ok(self.store.len().await?)
    }

    pub async fn head(&self) -> Result<Option<AuditEntry>, LedgerError> {
        Ok(self.store.head().await?)
    }

    /// Tax report rebuilt from the executed orders on the ledger
    pub async fn tax_report(
        &self,
        method: LotSelectionMethod,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<TaxReport, LedgerError> {
        let query = LedgerQuery::all().with_action(crate::entry::AuditAction::OrderExecuted);
        let entries = self.store.query(&query).await?;
        Ok(TaxReport::from_entries(&entries, method, from, to)?)
    }
}
