/// Worker (spec §4.7, parallel mode). An independent Processor +
/// Orchestrator + Service instances, with no state shared with any other
/// worker or with the sequential-mode pipeline; reseeded from the
/// database at construction (spec §9 "tracked-contract set duplication
/// across workers").
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ServiceConfig;
use crate::orchestrator::Orchestrator;
use crate::processor::Processor;
use crate::repository::{Repository, RepositoryError};
use crate::services::activity::ActivityService;
use crate::services::event::EventService;
use crate::services::factory::FactoryService;
use crate::services::storage_change::StorageChangeService;
use crate::services::Service;
use crate::source::DecodedLedger;
use crate::tracked_set::TrackedSet;

#[derive(Debug, Clone)]
pub struct WorkerCompletion {
    pub sequence: u32,
    pub worker_id: usize,
    pub duration: Duration,
}

pub struct Worker {
    id: usize,
    repository: Repository,
    config: Arc<ServiceConfig>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(id: usize, repository: Repository, config: Arc<ServiceConfig>, cancel: CancellationToken) -> Self {
        Worker { id, repository, config, cancel }
    }

    async fn build_orchestrator(&self) -> Result<Orchestrator, RepositoryError> {
        let seed = self.repository.all_deployed_contract_ids().await?;

        let activity_tracked = TrackedSet::new(seed.clone());
        let event_tracked = TrackedSet::new(seed.clone());
        let storage_tracked = TrackedSet::new(seed);

        let activity = Arc::new(ActivityService::new(self.repository.clone(), activity_tracked));
        let event = Arc::new(EventService::new(self.repository.clone(), event_tracked, self.config.event_type_prefix.clone()));
        let storage_change = Arc::new(StorageChangeService::new(self.repository.clone(), storage_tracked));
        let factory = Arc::new(FactoryService::new(
            self.repository.clone(),
            self.config.factories.clone(),
            vec![activity.tracked_set(), event.tracked_set(), storage_change.tracked_set()],
        ));

        let services: Vec<Arc<dyn Service>> = vec![factory, activity, event, storage_change];
        Ok(Orchestrator::new(services))
    }

    /// Processes ledgers from `inbound` until the channel closes or
    /// cancellation fires, emitting one completion per ledger to
    /// `outbound` (spec §4.7 Worker). The orchestrator (and its tracked
    /// sets) is built once at worker startup, not per ledger — each
    /// worker owns its Processor+Orchestrator+Services for its whole
    /// lifetime, reseeded from the database only at construction.
    pub async fn run(self, mut inbound: mpsc::Receiver<DecodedLedger>, outbound: mpsc::Sender<WorkerCompletion>) {
        let mut orchestrator = match self.build_orchestrator().await {
            Ok(o) => o,
            Err(e) => {
                error!(worker = self.id, error = %e, "failed to build worker orchestrator, worker exiting");
                return;
            }
        };
        let processor = Processor::new(self.cancel.clone(), "parallel");

        while let Some(ledger) = inbound.recv().await {
            if self.cancel.is_cancelled() {
                break;
            }

            let sequence = ledger.sequence;
            let started = Instant::now();

            if let Err(e) = processor.process(&ledger, &mut orchestrator).await {
                error!(worker = self.id, sequence, error = %e, "worker processing error");
                continue;
            }
            orchestrator.flush_all().await;

            let completion = WorkerCompletion { sequence, worker_id: self.id, duration: started.elapsed() };
            info!(worker = self.id, sequence, duration_ms = completion.duration.as_millis(), "ledger processed");

            if outbound.send(completion).await.is_err() {
                break;
            }
        }
    }
}
