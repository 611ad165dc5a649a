/// FactoryService (spec §4.4.1). Detects deployments produced by a known
/// factory contract, persists the Deployed Contract row, and seeds every
/// downstream tracked-contract set so the same transaction's events and
/// storage changes are picked up by the services that run after it.
use async_trait::async_trait;
use shared::{DeployedContract, FactoryRegistry};
use tracing::{info, warn};

use crate::extractor::extract_deployment;
use crate::metrics::DEPLOYMENTS_DETECTED;
use crate::processor::NormalizedTransaction;
use crate::repository::Repository;
use crate::services::{Service, ServiceError};
use crate::tracked_set::TrackedSet;

pub struct FactoryService {
    repository: Repository,
    registry: FactoryRegistry,
    downstream_tracked_sets: Vec<TrackedSet>,
}

impl FactoryService {
    pub fn new(repository: Repository, registry: FactoryRegistry, downstream_tracked_sets: Vec<TrackedSet>) -> Self {
        FactoryService { repository, registry, downstream_tracked_sets }
    }
}

#[async_trait]
impl Service for FactoryService {
    async fn process(&self, tx: &NormalizedTransaction, new_deployments: &mut Vec<String>) -> Result<(), ServiceError> {
        let Some((factory_id, kind)) = self.registry.match_any(&tx.contract_ids) else {
            return Ok(());
        };

        let Some(meta) = &tx.meta else { return Ok(()) };
        let Some(return_value) = &meta.return_value else { return Ok(()) };

        let Some(deployment) = extract_deployment(return_value) else {
            warn!(tx_hash = %tx.hash, factory_id, "factory transaction return value did not parse as a deployment");
            return Ok(());
        };

        let contract = DeployedContract {
            contract_id: deployment.contract_id.clone(),
            factory_id: factory_id.to_string(),
            kind: kind.to_string(),
            deployer: tx.invoker.clone().unwrap_or_default(),
            deployment_ledger: tx.ledger_sequence,
            deployment_time: tx.close_time,
            deployment_tx_hash: tx.hash.clone(),
            init_params: deployment.init_params.as_ref().and_then(|v| serde_json::to_value(v).ok()),
            cost_cpu_insns: 0,
            cost_mem_bytes: 0,
            memo: None,
        };

        self.repository.save_deployed_contract(&contract).await?;
        DEPLOYMENTS_DETECTED.with_label_values(&[kind]).inc();
        info!(contract_id = %deployment.contract_id, kind, "deployment detected");

        for set in &self.downstream_tracked_sets {
            set.insert(deployment.contract_id.clone()).await;
        }
        new_deployments.push(deployment.contract_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        "factory"
    }
}
