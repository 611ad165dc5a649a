/// StorageChangeService (spec §4.4.4, Flushable). Buffers raw per-key
/// storage changes across a ledger's transactions and collapses them to a
/// net set on flush.
use async_trait::async_trait;
use shared::{Durability as SharedDurability, StorageChange};
use tokio::sync::Mutex;

use crate::compactor::{ChangeMetadata, Compactor};
use crate::extractor::extract_raw_changes;
use crate::metrics::{COMPACTOR_FLUSH_SECONDS, COMPACTOR_REDUCTION_PERCENT, STORAGE_CHANGES_WRITTEN};
use crate::processor::NormalizedTransaction;
use crate::repository::Repository;
use crate::services::{Flushable, Service, ServiceError};
use crate::source::Durability;
use crate::tracked_set::TrackedSet;

pub struct StorageChangeService {
    repository: Repository,
    tracked: TrackedSet,
    compactor: Mutex<Compactor>,
}

impl StorageChangeService {
    pub fn new(repository: Repository, tracked: TrackedSet) -> Self {
        StorageChangeService { repository, tracked, compactor: Mutex::new(Compactor::new()) }
    }

    pub fn tracked_set(&self) -> TrackedSet {
        self.tracked.clone()
    }
}

#[async_trait]
impl Service for StorageChangeService {
    async fn process(&self, tx: &NormalizedTransaction, _new_deployments: &mut Vec<String>) -> Result<(), ServiceError> {
        let Some(meta) = &tx.meta else { return Ok(()) };

        let mut compactor = self.compactor.lock().await;
        for contract_id in &tx.contract_ids {
            if !self.tracked.contains(contract_id).await {
                continue;
            }
            let raw = extract_raw_changes(&meta.changes, contract_id);
            for change in raw {
                compactor.push(
                    change.clone(),
                    ChangeMetadata {
                        tx_hash: tx.hash.clone(),
                        ledger_sequence: tx.ledger_sequence,
                        close_time: tx.close_time,
                    },
                );
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "storage_change"
    }

    fn as_flushable(&self) -> Option<&dyn Flushable> {
        Some(self)
    }
}

#[async_trait]
impl Flushable for StorageChangeService {
    async fn flush_ledger(&self) -> Result<(), ServiceError> {
        let timer = COMPACTOR_FLUSH_SECONDS.start_timer();
        let (compacted, raw_count) = {
            let mut compactor = self.compactor.lock().await;
            compactor.flush()
        };
        timer.observe_duration();

        if raw_count == 0 {
            return Ok(());
        }

        let rows: Vec<StorageChange> = compacted
            .iter()
            .map(|c| StorageChange {
                contract_id: c.contract_id.clone(),
                ledger_sequence: c.metadata.ledger_sequence,
                tx_hash: c.metadata.tx_hash.clone(),
                key_raw: c.key_raw.clone(),
                key_decoded: serde_json::to_value(&c.key_decoded).unwrap_or(serde_json::Value::Null),
                value_decoded: c.value_decoded.as_ref().and_then(|v| serde_json::to_value(v).ok()),
                previous_value_decoded: c.previous_decoded.as_ref().and_then(|v| serde_json::to_value(v).ok()),
                value_raw: c.value_raw.clone(),
                previous_raw: c.previous_raw.clone(),
                durability: to_shared_durability(c.durability).as_str().to_string(),
                kind: c.kind.as_str().to_string(),
                close_time: c.metadata.close_time,
            })
            .collect();

        let reduction_percent = if raw_count > 0 {
            (1.0 - (rows.len() as f64 / raw_count as f64)) * 100.0
        } else {
            0.0
        };
        COMPACTOR_REDUCTION_PERCENT.set(reduction_percent);

        for row in &rows {
            STORAGE_CHANGES_WRITTEN.with_label_values(&[&row.kind]).inc();
        }

        self.repository.save_storage_changes(&rows).await?;
        Ok(())
    }
}

fn to_shared_durability(d: Durability) -> SharedDurability {
    match d {
        Durability::Temporary => SharedDurability::Temporary,
        Durability::Persistent => SharedDurability::Persistent,
    }
}
