/// EventService (spec §4.4.3). Filters emitted events to the tracked
/// contract set and a configured event-type prefix, with a
/// Repository-backed fallback that self-heals a cold in-memory cache.
use async_trait::async_trait;
use shared::ContractEvent;

use crate::extractor::extract_events;
use crate::metrics::EVENTS_WRITTEN;
use crate::processor::NormalizedTransaction;
use crate::repository::Repository;
use crate::services::{Service, ServiceError};
use crate::tracked_set::TrackedSet;

pub struct EventService {
    repository: Repository,
    tracked: TrackedSet,
    event_type_prefix: String,
}

impl EventService {
    pub fn new(repository: Repository, tracked: TrackedSet, event_type_prefix: String) -> Self {
        EventService { repository, tracked, event_type_prefix }
    }

    pub fn tracked_set(&self) -> TrackedSet {
        self.tracked.clone()
    }
}

#[async_trait]
impl Service for EventService {
    async fn process(&self, tx: &NormalizedTransaction, _new_deployments: &mut Vec<String>) -> Result<(), ServiceError> {
        let Some(meta) = &tx.meta else { return Ok(()) };

        let mut persisted = Vec::new();
        for contract_id in &tx.contract_ids {
            let mut is_tracked = self.tracked.contains(contract_id).await;
            if !is_tracked && self.repository.contract_exists(contract_id).await? {
                self.tracked.insert(contract_id.clone()).await;
                is_tracked = true;
            }
            if !is_tracked {
                continue;
            }

            let matched = extract_events(&meta.events, contract_id, &self.event_type_prefix);
            for (index, (event, event_type)) in matched.into_iter().enumerate() {
                persisted.push(ContractEvent {
                    contract_id: contract_id.clone(),
                    tx_hash: tx.hash.clone(),
                    event_index: index as i32,
                    event_type,
                    topics: serde_json::to_value(&event.topics).unwrap_or(serde_json::Value::Null),
                    data: serde_json::to_value(&event.data).unwrap_or(serde_json::Value::Null),
                    ledger_sequence: tx.ledger_sequence,
                    close_time: tx.close_time,
                    success: tx.success,
                });
            }
        }

        if persisted.is_empty() {
            return Ok(());
        }

        for event in &persisted {
            EVENTS_WRITTEN.with_label_values(&[&event.event_type]).inc();
        }
        self.repository.save_events(&persisted).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "event"
    }
}
