use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single factory → kind mapping, as configured by the operator
/// (spec §3 Factory Registry, §6 Configuration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryEntry {
    pub factory_id: String,
    pub kind: String,
}

/// The configured, process-lifetime-static set of factory contracts this
/// indexer recognizes (spec §3, §4.4.1). Lookup is by contract ID; the
/// registry never changes after startup.
#[derive(Debug, Clone, Default)]
pub struct FactoryRegistry {
    by_id: HashMap<String, String>,
}

impl FactoryRegistry {
    pub fn new(entries: impl IntoIterator<Item = FactoryEntry>) -> Self {
        FactoryRegistry {
            by_id: entries.into_iter().map(|e| (e.factory_id, e.kind)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Kind for a factory ID, if this factory is known.
    pub fn kind_of(&self, factory_id: &str) -> Option<&str> {
        self.by_id.get(factory_id).map(|s| s.as_str())
    }

    /// The first known factory ID among the given contract IDs, and its
    /// kind, in the order the IDs were supplied (spec §4.4.1 "scan the
    /// transaction's contract-ID list for any ID present in F").
    pub fn match_any<'a>(&self, contract_ids: &'a [String]) -> Option<(&'a str, &str)> {
        contract_ids
            .iter()
            .find_map(|id| self.kind_of(id).map(|kind| (id.as_str(), kind)))
    }
}

/// A contract produced by a known factory (spec §3 Deployed Contract).
/// Append-only: never mutated once inserted (Repository contract, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeployedContract {
    pub contract_id: String,
    pub factory_id: String,
    pub kind: String,
    pub deployer: String,
    pub deployment_ledger: i64,
    pub deployment_time: DateTime<Utc>,
    pub deployment_tx_hash: String,
    /// Decoded initialization parameters, if the factory's return value
    /// carried them (spec §4.4.1: "two-element vector whose ... second
    /// element is a map of initialization parameters").
    pub init_params: Option<serde_json::Value>,
    pub cost_cpu_insns: i64,
    pub cost_mem_bytes: i64,
    pub memo: Option<String>,
}

/// A contract event retained because it matched the tracked contract and
/// the configured event-type prefix (spec §3 Contract Event, §4.4.3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContractEvent {
    pub contract_id: String,
    pub tx_hash: String,
    pub event_index: i32,
    pub event_type: String,
    pub topics: serde_json::Value,
    pub data: serde_json::Value,
    pub ledger_sequence: i64,
    pub close_time: DateTime<Utc>,
    pub success: bool,
}

/// Storage durability class, mirrored from the Soroban ledger-entry
/// durability flag (temporary entries expire; persistent ones don't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Temporary,
    Persistent,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::Temporary => "temporary",
            Durability::Persistent => "persistent",
        }
    }
}

/// The net transition a compacted storage change represents (spec §4.4.4
/// change-kind derivation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageChangeKind {
    Created,
    Updated,
    Removed,
    /// Pre absent, post present, with a restore marker — kept distinct
    /// from `Created` per spec §4.4.4.
    Restored,
}

impl StorageChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageChangeKind::Created => "created",
            StorageChangeKind::Updated => "updated",
            StorageChangeKind::Removed => "removed",
            StorageChangeKind::Restored => "restored",
        }
    }
}

/// A persisted, post-compaction storage change (spec §3 Storage Change,
/// §4.4.4). At most one row per (contract ID, key) per ledger, per
/// invariant I3.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StorageChange {
    pub contract_id: String,
    pub ledger_sequence: i64,
    pub tx_hash: String,
    pub key_raw: String,
    pub key_decoded: serde_json::Value,
    pub value_decoded: Option<serde_json::Value>,
    pub previous_value_decoded: Option<serde_json::Value>,
    pub value_raw: Option<String>,
    pub previous_raw: Option<String>,
    pub durability: String,
    pub kind: String,
    pub close_time: DateTime<Utc>,
}

/// Whether an activity row records a deployment or a regular invocation
/// (spec §3 Contract Activity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Deployment,
    Invocation,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Deployment => "deployment",
            ActivityKind::Invocation => "invocation",
        }
    }
}

/// An append-only activity row for a tracked contract (spec §3 Contract
/// Activity, §4.4.2).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContractActivity {
    pub tx_hash: String,
    pub activity_index: i32,
    pub contract_id: String,
    pub kind: String,
    pub invoker: Option<String>,
    pub function_name: Option<String>,
    pub params: Option<serde_json::Value>,
    pub return_value: Option<serde_json::Value>,
    pub success: bool,
    pub fee: i64,
    pub cost_cpu_insns: i64,
    pub cost_mem_bytes: i64,
    pub ledger_sequence: i64,
    pub close_time: DateTime<Utc>,
}

/// The singleton progress row (spec §3 Progress, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Progress {
    pub last_ledger_sequence: i64,
    pub updated_at: DateTime<Utc>,
}

/// Optional filters accepted by the Repository's paginated list
/// operations (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct ContractListFilter {
    pub kind: Option<String>,
    pub deployer: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl ContractListFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(kind: Option<String>, deployer: Option<String>, limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        ContractListFilter { kind, deployer, limit, offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_registry_matches_first_known_id_in_order() {
        let registry = FactoryRegistry::new(vec![
            FactoryEntry { factory_id: "CFACTORY1".into(), kind: "token".into() },
            FactoryEntry { factory_id: "CFACTORY2".into(), kind: "pool".into() },
        ]);

        let ids = vec!["COTHER".to_string(), "CFACTORY2".to_string(), "CFACTORY1".to_string()];
        let (matched_id, kind) = registry.match_any(&ids).unwrap();
        assert_eq!(matched_id, "CFACTORY2");
        assert_eq!(kind, "pool");
    }

    #[test]
    fn factory_registry_no_match_returns_none() {
        let registry = FactoryRegistry::new(vec![FactoryEntry {
            factory_id: "CFACTORY1".into(),
            kind: "token".into(),
        }]);
        assert!(registry.match_any(&["CUNRELATED".to_string()]).is_none());
    }

    #[test]
    fn contract_list_filter_clamps_limit() {
        let f = ContractListFilter::new(None, None, Some(500), Some(-5));
        assert_eq!(f.limit, ContractListFilter::MAX_LIMIT);
        assert_eq!(f.offset, 0);
    }

    #[test]
    fn contract_list_filter_default_limit() {
        let f = ContractListFilter::new(None, None, None, None);
        assert_eq!(f.limit, ContractListFilter::DEFAULT_LIMIT);
    }
}
