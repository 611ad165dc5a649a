/// Extractor (spec §4.5). Pure, stateless transforms over a decoded
/// transaction; no I/O, no persistence, no retries.
use shared::DecodedValue;

use crate::source::{split_factory_return, DecodedTransaction, RawEvent, RawLedgerEntryChange};

/// Union of read-only + read-write footprint, deduplicated, preserving
/// insertion (discovery) order (spec §4.5 extract-all-contract-IDs).
pub fn extract_all_contract_ids(tx: &DecodedTransaction) -> Vec<String> {
    let mut seen = Vec::new();
    for id in tx.read_only_footprint.iter().chain(tx.read_write_footprint.iter()) {
        if !seen.contains(id) {
            seen.push(id.clone());
        }
    }
    seen
}

/// A parsed deployment: the new contract's ID plus optional init params
/// (spec §4.4.1, §4.5 extract-deployment).
#[derive(Debug, Clone)]
pub struct ExtractedDeployment {
    pub contract_id: String,
    pub init_params: Option<DecodedValue>,
}

/// Parses a factory transaction's return value into a deployment record.
/// Handles both the direct-address shape and the two-element
/// `[address, init_params]` vector shape (spec §4.4.1).
pub fn extract_deployment(return_value: &DecodedValue) -> Option<ExtractedDeployment> {
    let (address, init_params) = split_factory_return(return_value);
    let contract_id = match address? {
        DecodedValue::Address(id) => id.clone(),
        _ => return None,
    };
    Some(ExtractedDeployment { contract_id, init_params: init_params.cloned() })
}

/// All events on the transaction whose contract ID is `contract_id` and
/// whose event type (first topic, decoded as a symbol) begins with
/// `prefix` (spec §4.4.3, §4.5 extract-events).
pub fn extract_events<'a>(
    events: &'a [RawEvent],
    contract_id: &str,
    prefix: &str,
) -> Vec<(&'a RawEvent, String)> {
    events
        .iter()
        .filter(|e| e.contract_id == contract_id)
        .filter_map(|e| {
            let event_type = e.topics.first()?.as_symbol()?;
            if event_type.starts_with(prefix) {
                Some((e, event_type.to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// Raw contract-data changes touching `contract_id` (spec §4.5
/// extract-raw-changes).
pub fn extract_raw_changes<'a>(
    changes: &'a [RawLedgerEntryChange],
    contract_id: &str,
) -> Vec<&'a RawLedgerEntryChange> {
    changes.iter().filter(|c| c.contract_id == contract_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Durability, MetaVersion, RawEntryState, SorobanMeta};

    fn tx(read_only: &[&str], read_write: &[&str]) -> DecodedTransaction {
        DecodedTransaction {
            hash: "deadbeef".into(),
            success: true,
            is_soroban: true,
            read_only_footprint: read_only.iter().map(|s| s.to_string()).collect(),
            read_write_footprint: read_write.iter().map(|s| s.to_string()).collect(),
            fee_charged: 100,
            invoker: Some("GDEPLOYER".into()),
            meta: Some(SorobanMeta { version: MetaVersion::V3, return_value: None, events: vec![], changes: vec![] }),
        }
    }

    #[test]
    fn dedups_contract_ids_preserving_first_seen_order() {
        let t = tx(&["A", "B"], &["B", "C"]);
        assert_eq!(extract_all_contract_ids(&t), vec!["A", "B", "C"]);
    }

    #[test]
    fn extracts_deployment_from_direct_address() {
        let v = DecodedValue::Address("CCONTRACT1".into());
        let d = extract_deployment(&v).unwrap();
        assert_eq!(d.contract_id, "CCONTRACT1");
        assert!(d.init_params.is_none());
    }

    #[test]
    fn extracts_deployment_from_address_and_params_vector() {
        let v = DecodedValue::Vec(vec![
            DecodedValue::Address("CCONTRACT1".into()),
            DecodedValue::Map(vec![(DecodedValue::Symbol("admin".into()), DecodedValue::Address("GADMIN".into()))]),
        ]);
        let d = extract_deployment(&v).unwrap();
        assert_eq!(d.contract_id, "CCONTRACT1");
        assert!(d.init_params.is_some());
    }

    #[test]
    fn extract_deployment_rejects_non_address_shapes() {
        assert!(extract_deployment(&DecodedValue::Void).is_none());
    }

    #[test]
    fn extract_events_filters_by_contract_and_prefix() {
        let events = vec![
            RawEvent {
                contract_id: "C1".into(),
                topics: vec![DecodedValue::Symbol("tw_init".into())],
                data: DecodedValue::Void,
            },
            RawEvent {
                contract_id: "C1".into(),
                topics: vec![DecodedValue::Symbol("other_event".into())],
                data: DecodedValue::Void,
            },
            RawEvent {
                contract_id: "C2".into(),
                topics: vec![DecodedValue::Symbol("tw_transfer".into())],
                data: DecodedValue::Void,
            },
        ];
        let matched = extract_events(&events, "C1", "tw_");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].1, "tw_init");
    }

    #[test]
    fn extract_raw_changes_filters_by_contract() {
        let changes = vec![
            RawLedgerEntryChange {
                contract_id: "C1".into(),
                key_raw: "aa".into(),
                key_decoded: DecodedValue::Void,
                durability: Durability::Persistent,
                pre: None,
                post: Some(RawEntryState { value_raw: "bb".into(), value_decoded: DecodedValue::Void }),
                restored: false,
            },
            RawLedgerEntryChange {
                contract_id: "C2".into(),
                key_raw: "cc".into(),
                key_decoded: DecodedValue::Void,
                durability: Durability::Persistent,
                pre: None,
                post: None,
                restored: false,
            },
        ];
        let result = extract_raw_changes(&changes, "C1");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key_raw, "aa");
    }
}
