/// Services (spec §4.4). Modeled as a capability set rather than a deep
/// inheritance hierarchy (spec §9): every service implements `Service`;
/// the one service that also needs ledger-boundary flushing additionally
/// implements `Flushable` and advertises it through `as_flushable`, which
/// the Orchestrator checks before invoking flush.
use async_trait::async_trait;

use crate::processor::NormalizedTransaction;
use crate::repository::RepositoryError;

pub mod activity;
pub mod event;
pub mod factory;
pub mod storage_change;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait Service: Send + Sync {
    /// `new_deployments` accumulates contract IDs newly deployed by this
    /// transaction, written by FactoryService and read by downstream
    /// services that need to tell a deployment-activity row from a plain
    /// invocation (spec §3 Contract Activity "kind").
    async fn process(&self, tx: &NormalizedTransaction, new_deployments: &mut Vec<String>) -> Result<(), ServiceError>;

    fn name(&self) -> &'static str;

    fn as_flushable(&self) -> Option<&dyn Flushable> {
        None
    }
}

#[async_trait]
pub trait Flushable: Send + Sync {
    async fn flush_ledger(&self) -> Result<(), ServiceError>;
}
