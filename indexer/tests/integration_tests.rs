//! Integration tests exercising the Processor → Orchestrator → Services
//! chain end-to-end, without a live database (spec §10.4 ambient test
//! tooling). Stub services stand in for the Repository-backed ones so
//! these tests assert orchestration, extraction and compaction behavior
//! directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use indexer::compactor::{ChangeMetadata, Compactor};
use indexer::extractor::{extract_all_contract_ids, extract_deployment, extract_events, extract_raw_changes};
use indexer::orchestrator::Orchestrator;
use indexer::processor::{NormalizedTransaction, Processor};
use indexer::repository::RepositoryError;
use indexer::services::{Flushable, Service, ServiceError};
use indexer::source::{
    DecodedLedger, DecodedTransaction, Durability, MetaVersion, RawEntryState, RawEvent, RawLedgerEntryChange,
    SorobanMeta,
};
use shared::DecodedValue;
use tokio_util::sync::CancellationToken;

/// Records every transaction it sees and every flush boundary, standing
/// in for a Repository-backed service in tests that only care about
/// orchestration order (spec §4.3).
struct RecordingService {
    name: &'static str,
    seen: StdMutex<Vec<String>>,
    flushes: AtomicUsize,
}

impl RecordingService {
    fn new(name: &'static str) -> Self {
        RecordingService { name, seen: StdMutex::new(Vec::new()), flushes: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Service for RecordingService {
    async fn process(&self, tx: &NormalizedTransaction, _new_deployments: &mut Vec<String>) -> Result<(), ServiceError> {
        self.seen.lock().unwrap().push(tx.hash.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn as_flushable(&self) -> Option<&dyn Flushable> {
        Some(self)
    }
}

#[async_trait]
impl Flushable for RecordingService {
    async fn flush_ledger(&self) -> Result<(), ServiceError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn close_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn soroban_tx(hash: &str, success: bool, read_write: &[&str]) -> DecodedTransaction {
    DecodedTransaction {
        hash: hash.to_string(),
        success,
        is_soroban: true,
        read_only_footprint: Vec::new(),
        read_write_footprint: read_write.iter().map(|s| s.to_string()).collect(),
        fee_charged: 100,
        invoker: Some("GDEPLOYER".into()),
        meta: Some(SorobanMeta { version: MetaVersion::V4, return_value: None, events: vec![], changes: vec![] }),
    }
}

/// Scenario 1 (spec §8): two ledgers, each with one successful Soroban
/// transaction, plus one unsuccessful transaction that must be skipped.
/// Verifies reader-order dispatch and a flush exactly at the ledger
/// boundary, not before or after.
#[tokio::test]
async fn processor_dispatches_in_order_and_flushes_only_at_ledger_boundaries() {
    let service = Arc::new(RecordingService::new("recorder"));
    let mut orchestrator = Orchestrator::new(vec![service.clone()]);
    let processor = Processor::new(CancellationToken::new(), "sequential");

    let ledger_a = DecodedLedger {
        sequence: 1_000_000,
        close_time: close_time(),
        transactions: vec![
            soroban_tx("tx-a1", true, &["C1"]),
            soroban_tx("tx-a2", false, &["C1"]),
            soroban_tx("tx-a3", true, &["C1"]),
        ],
    };
    let ledger_b = DecodedLedger {
        sequence: 1_000_001,
        close_time: close_time(),
        transactions: vec![soroban_tx("tx-b1", true, &["C1"])],
    };

    processor.process(&ledger_a, &mut orchestrator).await.unwrap();
    assert_eq!(service.flushes.load(Ordering::SeqCst), 0, "no boundary crossed yet");

    processor.process(&ledger_b, &mut orchestrator).await.unwrap();
    assert_eq!(service.flushes.load(Ordering::SeqCst), 1, "exactly one boundary crossed");

    let seen = service.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["tx-a1", "tx-a3", "tx-b1"], "unsuccessful tx skipped, reader order preserved");
}

/// A service error must not stop the ledger or the orchestrator (spec
/// §4.3 "service errors are logged and swallowed").
#[tokio::test]
async fn orchestrator_swallows_service_errors_and_continues() {
    struct FailingService;

    #[async_trait]
    impl Service for FailingService {
        async fn process(&self, _tx: &NormalizedTransaction, _new_deployments: &mut Vec<String>) -> Result<(), ServiceError> {
            Err(ServiceError::Repository(RepositoryError::Database(sqlx::Error::RowNotFound)))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    let recorder = Arc::new(RecordingService::new("recorder"));
    let mut orchestrator = Orchestrator::new(vec![Arc::new(FailingService), recorder.clone()]);
    let processor = Processor::new(CancellationToken::new(), "sequential");

    let ledger = DecodedLedger {
        sequence: 42,
        close_time: close_time(),
        transactions: vec![soroban_tx("tx-1", true, &["C1"])],
    };

    let result = processor.process(&ledger, &mut orchestrator).await;
    assert!(result.is_ok());
    assert_eq!(recorder.seen.lock().unwrap().len(), 1, "downstream service still ran");
}

/// Scenario 5 (spec §8): create→update→update→remove on one key within a
/// ledger collapses to zero persisted rows, exercising extraction and
/// compaction together the way StorageChangeService does internally.
#[tokio::test]
async fn extraction_and_compaction_pipeline_matches_create_then_remove_scenario() {
    fn state(v: &str) -> RawEntryState {
        RawEntryState { value_raw: v.to_string(), value_decoded: DecodedValue::String(v.to_string()) }
    }
    fn change(pre: Option<&str>, post: Option<&str>) -> RawLedgerEntryChange {
        RawLedgerEntryChange {
            contract_id: "C1".to_string(),
            key_raw: "balance".to_string(),
            key_decoded: DecodedValue::Symbol("balance".to_string()),
            durability: Durability::Persistent,
            pre: pre.map(state),
            post: post.map(state),
            restored: false,
        }
    }

    let changes = vec![
        change(None, Some("v1")),
        change(Some("v1"), Some("v2")),
        change(Some("v2"), Some("v3")),
        change(Some("v3"), None),
    ];

    let raw_for_c1 = extract_raw_changes(&changes, "C1");
    assert_eq!(raw_for_c1.len(), 4);

    let mut compactor = Compactor::new();
    for c in raw_for_c1 {
        compactor.push(
            c.clone(),
            ChangeMetadata { tx_hash: "tx-1".into(), ledger_sequence: 100, close_time: close_time() },
        );
    }
    let (compacted, raw_count) = compactor.flush();
    assert_eq!(raw_count, 4);
    assert!(compacted.is_empty(), "net no-op must yield zero rows (P4)");
}

/// P6 (spec §8): the extractor's event filter only matches events on the
/// named contract whose first-topic symbol begins with the configured
/// prefix.
#[tokio::test]
async fn event_extraction_filters_by_contract_and_type_prefix() {
    let events = vec![
        RawEvent {
            contract_id: "C1".into(),
            topics: vec![DecodedValue::Symbol("tw_init".into())],
            data: DecodedValue::Map(vec![(
                DecodedValue::Symbol("admin".into()),
                DecodedValue::Address("GADMIN".into()),
            )]),
        },
        RawEvent {
            contract_id: "C1".into(),
            topics: vec![DecodedValue::Symbol("unrelated".into())],
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

    // P8: the matched event's topics round-trip byte-identically through
    // the persisted JSON representation.
    let (event, _) = matched[0];
    let round_tripped: Vec<DecodedValue> =
        serde_json::from_value(serde_json::to_value(&event.topics).unwrap()).unwrap();
    assert_eq!(round_tripped, event.topics);
}

/// Deployment extraction must handle both factory-return shapes named in
/// spec §4.4.1: a bare address, and a `[address, init_params]` vector.
#[tokio::test]
async fn deployment_extraction_handles_both_return_value_shapes() {
    let direct = DecodedValue::Address("CCONTRACT".into());
    assert_eq!(extract_deployment(&direct).unwrap().contract_id, "CCONTRACT");

    let with_params = DecodedValue::Vec(vec![
        DecodedValue::Address("CCONTRACT".into()),
        DecodedValue::Map(vec![(DecodedValue::Symbol("supply".into()), DecodedValue::int_u64(1_000))]),
    ]);
    let parsed = extract_deployment(&with_params).unwrap();
    assert_eq!(parsed.contract_id, "CCONTRACT");
    assert!(matches!(parsed.init_params, Some(DecodedValue::Map(_))));
}

/// Footprint union must dedup while preserving discovery order, the
/// contract-ID source every downstream service keys off (spec §4.5).
#[tokio::test]
async fn contract_id_extraction_dedups_footprint_preserving_order() {
    let mut tx = soroban_tx("tx-1", true, &["C1"]);
    tx.read_only_footprint = vec!["C2".into(), "C1".into()];
    tx.read_write_footprint = vec!["C1".into(), "C3".into()];

    assert_eq!(extract_all_contract_ids(&tx), vec!["C2", "C1", "C3"]);
}

/// Cancellation observed mid-ledger stops processing the remaining
/// transactions immediately (spec §4.2, §5 suspension points).
#[tokio::test]
async fn cancellation_is_observed_per_transaction() {
    let recorder = Arc::new(RecordingService::new("recorder"));
    let mut orchestrator = Orchestrator::new(vec![recorder.clone()]);
    let cancel = CancellationToken::new();
    let processor = Processor::new(cancel.clone(), "sequential");

    let ledger = DecodedLedger {
        sequence: 7,
        close_time: close_time(),
        transactions: vec![soroban_tx("tx-1", true, &["C1"]), soroban_tx("tx-2", true, &["C1"])],
    };

    cancel.cancel();
    let result = processor.process(&ledger, &mut orchestrator).await;
    assert!(result.is_err(), "cancellation must surface as an error");
    assert!(recorder.seen.lock().unwrap().is_empty(), "no transaction processed once cancelled");
}
