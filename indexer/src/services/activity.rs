/// ActivityService (spec §4.4.2). Records one activity row per tracked
/// contract touched by a transaction; no longer owns event or storage
/// extraction, which live in their own services.
use async_trait::async_trait;
use shared::{ActivityKind, ContractActivity};

use crate::processor::NormalizedTransaction;
use crate::repository::Repository;
use crate::services::{Service, ServiceError};
use crate::tracked_set::TrackedSet;

pub struct ActivityService {
    repository: Repository,
    tracked: TrackedSet,
}

impl ActivityService {
    pub fn new(repository: Repository, tracked: TrackedSet) -> Self {
        ActivityService { repository, tracked }
    }

    pub fn tracked_set(&self) -> TrackedSet {
        self.tracked.clone()
    }
}

#[async_trait]
impl Service for ActivityService {
    async fn process(&self, tx: &NormalizedTransaction, new_deployments: &mut Vec<String>) -> Result<(), ServiceError> {
        let mut activities = Vec::new();

        for (idx, contract_id) in tx.contract_ids.iter().enumerate() {
            if !self.tracked.contains(contract_id).await {
                continue;
            }

            let kind = if new_deployments.iter().any(|id| id == contract_id) {
                ActivityKind::Deployment
            } else {
                ActivityKind::Invocation
            };

            let (function_name, params, return_value) = tx
                .meta
                .as_ref()
                .and_then(|m| m.return_value.as_ref())
                .map(|v| (None, None, serde_json::to_value(v).ok()))
                .unwrap_or((None, None, None));

            activities.push(ContractActivity {
                tx_hash: tx.hash.clone(),
                activity_index: idx as i32,
                contract_id: contract_id.clone(),
                kind: kind.as_str().to_string(),
                invoker: tx.invoker.clone(),
                function_name,
                params,
                return_value,
                success: tx.success,
                fee: tx.fee_charged,
                cost_cpu_insns: 0,
                cost_mem_bytes: 0,
                ledger_sequence: tx.ledger_sequence,
                close_time: tx.close_time,
            });
        }

        self.repository.save_activities(&activities).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "activity"
    }
}
