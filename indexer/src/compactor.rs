/// Compactor (spec §4.4.4, §8 P4). Collapses multiple pre/post storage
/// changes to the same (contract, key) within one ledger into a single net
/// transition, using the ledger's reader order to decide "first" and
/// "last".
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{DecodedValue, StorageChangeKind};

use crate::source::{Durability, RawLedgerEntryChange};

/// Metadata attached to a raw change at the point it was observed (spec §9
/// Open Question (b): the last-observed metadata wins after compaction).
#[derive(Debug, Clone)]
pub struct ChangeMetadata {
    pub tx_hash: String,
    pub ledger_sequence: i64,
    pub close_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BufferedChange {
    change: RawLedgerEntryChange,
    metadata: ChangeMetadata,
}

/// A compacted, net storage change ready to persist (spec §3 Storage
/// Change).
#[derive(Debug, Clone)]
pub struct CompactedChange {
    pub contract_id: String,
    pub key_raw: String,
    pub key_decoded: DecodedValue,
    pub value_raw: Option<String>,
    pub value_decoded: Option<DecodedValue>,
    pub previous_raw: Option<String>,
    pub previous_decoded: Option<DecodedValue>,
    pub durability: Durability,
    pub kind: StorageChangeKind,
    pub metadata: ChangeMetadata,
}

/// Per-ledger accumulator; reset on every flush.
#[derive(Default)]
pub struct Compactor {
    buffer: Vec<BufferedChange>,
}

impl Compactor {
    pub fn new() -> Self {
        Compactor { buffer: Vec::new() }
    }

    pub fn push(&mut self, change: RawLedgerEntryChange, metadata: ChangeMetadata) {
        self.buffer.push(BufferedChange { change, metadata });
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Collapses the buffer into net per-key changes and resets it.
    /// Returns `(compacted, raw_count)` so callers can derive the
    /// reduction-ratio metric (spec §4.4.4).
    pub fn flush(&mut self) -> (Vec<CompactedChange>, usize) {
        let raw_count = self.buffer.len();
        let mut groups: HashMap<(String, String), Vec<BufferedChange>> = HashMap::new();

        for buffered in self.buffer.drain(..) {
            let key = (buffered.change.contract_id.clone(), buffered.change.key_raw.clone());
            groups.entry(key).or_default().push(buffered);
        }

        let mut compacted = Vec::new();
        for (_, mut group) in groups {
            // Reader order within the ledger is preserved by push order;
            // stable sort by nothing needed, group already in insertion order.
            let first = group.first().expect("non-empty group");
            let last = group.last().expect("non-empty group").clone();

            let overall_pre = first.change.pre.clone();
            let overall_post = last.change.post.clone();
            let restored = last.change.restored;

            let kind = match (&overall_pre, &overall_post) {
                (None, None) => continue, // net no-op, e.g. create-then-remove (P4)
                (None, Some(_)) if restored => StorageChangeKind::Restored,
                (None, Some(_)) => StorageChangeKind::Created,
                (Some(_), Some(_)) => StorageChangeKind::Updated,
                (Some(_), None) => StorageChangeKind::Removed,
            };

            compacted.push(CompactedChange {
                contract_id: last.change.contract_id.clone(),
                key_raw: last.change.key_raw.clone(),
                key_decoded: last.change.key_decoded.clone(),
                value_raw: overall_post.as_ref().map(|s| s.value_raw.clone()),
                value_decoded: overall_post.as_ref().map(|s| s.value_decoded.clone()),
                previous_raw: overall_pre.as_ref().map(|s| s.value_raw.clone()),
                previous_decoded: overall_pre.as_ref().map(|s| s.value_decoded.clone()),
                durability: last.change.durability,
                kind,
                metadata: last.metadata.clone(),
            });

            drop(group.drain(..));
        }

        (compacted, raw_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tx: &str) -> ChangeMetadata {
        ChangeMetadata { tx_hash: tx.to_string(), ledger_sequence: 100, close_time: Utc::now() }
    }

    fn state(v: &str) -> crate::source::RawEntryState {
        crate::source::RawEntryState { value_raw: v.to_string(), value_decoded: DecodedValue::Void }
    }

    fn change(contract: &str, key: &str, pre: Option<&str>, post: Option<&str>, restored: bool) -> RawLedgerEntryChange {
        RawLedgerEntryChange {
            contract_id: contract.to_string(),
            key_raw: key.to_string(),
            key_decoded: DecodedValue::Void,
            durability: Durability::Persistent,
            pre: pre.map(state),
            post: post.map(state),
            restored,
        }
    }

    #[test]
    fn create_then_remove_yields_no_row() {
        let mut c = Compactor::new();
        c.push(change("C1", "k", None, Some("v1"), false), meta("tx1"));
        c.push(change("C1", "k", Some("v1"), None, false), meta("tx2"));
        let (compacted, raw) = c.flush();
        assert_eq!(raw, 2);
        assert!(compacted.is_empty());
    }

    #[test]
    fn create_update_update_collapses_to_single_created_row() {
        let mut c = Compactor::new();
        c.push(change("C1", "k", None, Some("v1"), false), meta("tx1"));
        c.push(change("C1", "k", Some("v1"), Some("v2"), false), meta("tx2"));
        c.push(change("C1", "k", Some("v2"), Some("v3"), false), meta("tx3"));
        let (compacted, raw) = c.flush();
        assert_eq!(raw, 3);
        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].kind, StorageChangeKind::Created);
        assert_eq!(compacted[0].value_raw.as_deref(), Some("v3"));
        assert_eq!(compacted[0].metadata.tx_hash, "tx3");
    }

    #[test]
    fn independent_keys_compact_independently() {
        let mut c = Compactor::new();
        c.push(change("C1", "k1", None, Some("v1"), false), meta("tx1"));
        c.push(change("C1", "k2", Some("v0"), None, false), meta("tx1"));
        let (compacted, _) = c.flush();
        assert_eq!(compacted.len(), 2);
    }

    #[test]
    fn restored_marker_is_preserved_distinct_from_created() {
        let mut c = Compactor::new();
        c.push(change("C1", "k", None, Some("v1"), true), meta("tx1"));
        let (compacted, _) = c.flush();
        assert_eq!(compacted[0].kind, StorageChangeKind::Restored);
    }

    #[test]
    fn flush_resets_the_buffer() {
        let mut c = Compactor::new();
        c.push(change("C1", "k", None, Some("v1"), false), meta("tx1"));
        c.flush();
        assert!(c.is_empty());
    }
}
