//! Audit entries and checksum computation

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Previous checksum of the first entry
pub const GENESIS_CHECKSUM: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Kind of entity an entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Analysis,
    Proposal,
    Order,
    CircuitBreaker,
    System,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Analysis => "analysis",
            EntityType::Proposal => "proposal",
            EntityType::Order => "order",
            EntityType::CircuitBreaker => "circuit_breaker",
            EntityType::System => "system",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(EntityType::Analysis),
            "proposal" => Ok(EntityType::Proposal),
            "order" => Ok(EntityType::Order),
            "circuit_breaker" => Ok(EntityType::CircuitBreaker),
            "system" => Ok(EntityType::System),
            other => anyhow::bail!("unknown entity type: {}", other),
        }
    }
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AnalysisRecorded,
    ProposalApproved,
    ProposalRejected,
    OrderExecuted,
    OrderFailed,
    BreakerTransition,
    IntegrityHalt,
    HaltCleared,
}

impl AuditAction {
    pub const ALL: [AuditAction; 8] = [
        AuditAction::AnalysisRecorded,
        AuditAction::ProposalApproved,
        AuditAction::ProposalRejected,
        AuditAction::OrderExecuted,
        AuditAction::OrderFailed,
        AuditAction::BreakerTransition,
        AuditAction::IntegrityHalt,
        AuditAction::HaltCleared,
    ];

    /// Stable storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AnalysisRecorded => "analysis_recorded",
            AuditAction::ProposalApproved => "proposal_approved",
            AuditAction::ProposalRejected => "proposal_rejected",
            AuditAction::OrderExecuted => "order_executed",
            AuditAction::OrderFailed => "order_failed",
            AuditAction::BreakerTransition => "breaker_transition",
            AuditAction::IntegrityHalt => "integrity_halt",
            AuditAction::HaltCleared => "halt_cleared",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().replace('_', " "))
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    /// Accepts the storage key or its spaced display form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().replace(' ', "_");
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == key)
            .ok_or_else(|| anyhow::anyhow!("unknown audit action: {}", s))
    }
}

/// Content of an entry before it is chained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDraft {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
}

impl AuditDraft {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>, action: AuditAction) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            action,
            old_value: None,
            new_value: None,
        }
    }

    pub fn with_old_value<T: Serialize>(mut self, value: &T) -> serde_json::Result<Self> {
        self.old_value = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn with_new_value<T: Serialize>(mut self, value: &T) -> serde_json::Result<Self> {
        self.new_value = Some(serde_json::to_value(value)?);
        Ok(self)
    }
}

/// One chained ledger record. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// 1-based position in the chain
    pub sequence: u64,
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub previous_checksum: String,
    pub checksum: String,
}

impl AuditEntry {
    /// Chain a draft after `previous_checksum`
    pub fn seal(draft: AuditDraft, sequence: u64, timestamp: DateTime<Utc>, previous_checksum: &str) -> Self {
        let mut entry = Self {
            sequence,
            id: Uuid::new_v4(),
            timestamp: timestamp.trunc_subsecs(6),
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            action: draft.action,
            old_value: draft.old_value,
            new_value: draft.new_value,
            previous_checksum: previous_checksum.to_string(),
            checksum: String::new(),
        };
        entry.checksum = entry.compute_checksum();
        entry
    }

    /// SHA-256 of previous checksum followed by canonical content JSON, hex encoded.
    ///
    /// Content keys are serialized in sorted order, so the digest is
    /// independent of how the entry was stored.
    pub fn compute_checksum(&self) -> String {
        let content = serde_json::json!({
            "sequence": self.sequence,
            "id": self.id.to_string(),
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "entity_type": self.entity_type.as_str(),
            "entity_id": self.entity_id,
            "action": self.action.as_str(),
            "old_value": self.old_value,
            "new_value": self.new_value,
        });

        let mut hasher = Sha256::new();
        hasher.update(self.previous_checksum.as_bytes());
        hasher.update(canonical(&content).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn has_valid_checksum(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    /// Deserialize `new_value` into a typed record
    pub fn new_value_as<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        self.new_value.clone().map(serde_json::from_value).transpose()
    }
}

/// Copy of `value` with every object's keys in sorted order
fn canonical(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), canonical(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> AuditDraft {
        AuditDraft::new(EntityType::Proposal, "p-1", AuditAction::ProposalApproved)
            .with_new_value(&serde_json::json!({"notional": "300", "asset": "BTC"}))
            .unwrap()
    }

    #[test]
    fn test_seal_is_deterministic_for_content() {
        let now = Utc::now();
        let entry = AuditEntry::seal(draft(), 1, now, GENESIS_CHECKSUM);
        assert_eq!(entry.checksum.len(), 64);
        assert!(entry.has_valid_checksum());
        assert_eq!(entry.compute_checksum(), entry.checksum);
    }

    #[test]
    fn test_checksum_depends_on_previous() {
        let now = Utc::now();
        let mut a = AuditEntry::seal(draft(), 1, now, GENESIS_CHECKSUM);
        let original = a.checksum.clone();
        a.previous_checksum = "f".repeat(64);
        assert_ne!(a.compute_checksum(), original);
    }

    #[test]
    fn test_timestamp_truncated_to_micros() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = AuditEntry::seal(draft(), 1, ts, GENESIS_CHECKSUM);
        assert_eq!(entry.timestamp.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn test_checksum_survives_json_round_trip() {
        let entry = AuditEntry::seal(draft(), 7, Utc::now(), GENESIS_CHECKSUM);
        let json = serde_json::to_string(&entry).unwrap();
        let restored: AuditEntry = serde_json::from_str(&json).unwrap();
        assert!(restored.has_valid_checksum());
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let now = Utc::now();
        let a = AuditDraft::new(EntityType::Order, "o-1", AuditAction::OrderExecuted)
            .with_new_value(&serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}}))
            .unwrap();
        let mut entry = AuditEntry::seal(a, 1, now, GENESIS_CHECKSUM);
        let reordered: serde_json::Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        entry.new_value = Some(reordered);
        assert!(entry.has_valid_checksum());
    }

    #[test]
    fn test_action_names() {
        assert_eq!(AuditAction::ProposalApproved.to_string(), "proposal approved");
        assert_eq!("order executed".parse::<AuditAction>().unwrap(), AuditAction::OrderExecuted);
        assert_eq!("order_failed".parse::<AuditAction>().unwrap(), AuditAction::OrderFailed);
        assert!("bogus".parse::<AuditAction>().is_err());
        assert_eq!("circuit_breaker".parse::<EntityType>().unwrap(), EntityType::CircuitBreaker);
    }
}
