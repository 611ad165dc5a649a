/// Streamer (spec §4.1). The top of the pipeline: prepares an unbounded
/// range on the ledger source, fetches one ledger at a time under the
/// retry strategy, and either processes it sequentially or dispatches it
/// to the parallel pipeline depending on the mode last decided.
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::metrics::{CURRENT_LAG, PIPELINE_LAG, TRACKED_CONTRACTS};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{decide_mode, Pipeline};
use crate::processor::Processor;
use crate::repository::{Repository, RepositoryError};
use crate::retry::with_retry;
use crate::services::activity::ActivityService;
use crate::services::event::EventService;
use crate::services::factory::FactoryService;
use crate::services::storage_change::StorageChangeService;
use crate::services::Service;
use crate::source::LedgerSource;
use crate::tracked_set::TrackedSet;

#[derive(Error, Debug)]
pub enum StreamerError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Source(#[from] crate::retry::RetryExhausted<crate::source::SourceError>),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Mode-decision interval, evaluated every 50 iterations (spec §4.1 step 2).
const MODE_DECISION_INTERVAL: u64 = 50;

pub struct Streamer {
    source: Arc<dyn LedgerSource>,
    repository: Repository,
    config: Arc<ServiceConfig>,
    cancel: CancellationToken,
    pipeline: Pipeline,
    progress_lock: Arc<Mutex<()>>,
}

impl Streamer {
    pub fn new(
        source: Arc<dyn LedgerSource>,
        repository: Repository,
        config: Arc<ServiceConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let queue_capacity = config.pipeline.results_buffer;
        Streamer {
            source,
            repository,
            config,
            cancel,
            pipeline: Pipeline::new(queue_capacity),
            progress_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Builds a fresh Factory/Activity/Event/StorageChange service chain
    /// seeded from the database snapshot (spec §2, §4.4, §9 "tracked
    /// contract set duplication across workers" — the sequential-mode
    /// streamer is itself just one more consumer of that same seeding
    /// rule).
    async fn build_orchestrator(&self) -> Result<Orchestrator, RepositoryError> {
        let seed = self.repository.all_deployed_contract_ids().await?;
        TRACKED_CONTRACTS.set(seed.len() as f64);

        let activity_tracked = TrackedSet::new(seed.clone());
        let event_tracked = TrackedSet::new(seed.clone());
        let storage_tracked = TrackedSet::new(seed);

        let activity = Arc::new(ActivityService::new(self.repository.clone(), activity_tracked));
        let event = Arc::new(EventService::new(
            self.repository.clone(),
            event_tracked,
            self.config.event_type_prefix.clone(),
        ));
        let storage_change = Arc::new(StorageChangeService::new(self.repository.clone(), storage_tracked));
        let factory = Arc::new(FactoryService::new(
            self.repository.clone(),
            self.config.factories.clone(),
            vec![activity.tracked_set(), event.tracked_set(), storage_change.tracked_set()],
        ));

        let services: Vec<Arc<dyn Service>> = vec![factory, activity, event, storage_change];
        Ok(Orchestrator::new(services))
    }

    /// Drives the main loop from `from` forward, unbounded, until
    /// cancelled or a non-recoverable fetch error occurs (spec §4.1).
    pub async fn run(&mut self, from: u32) -> Result<(), StreamerError> {
        self.source.prepare_range(from).await?;

        let mut orchestrator = self.build_orchestrator().await?;
        let processor = Processor::new(self.cancel.clone(), "sequential");

        let mut sequence = from;
        let mut iteration: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                if self.pipeline.is_running() {
                    self.pipeline.stop().await;
                }
                return Err(StreamerError::Cancelled);
            }

            iteration += 1;
            if iteration % MODE_DECISION_INTERVAL == 0 {
                self.evaluate_mode(sequence).await;
            }

            let ledger = match with_retry(&self.config.retry, &self.cancel, "get_ledger", || {
                self.source.get_ledger(sequence)
            })
            .await
            {
                Ok(l) => l,
                Err(e) => {
                    error!(sequence, error = %e, "non-recoverable fetch error, stopping stream");
                    if self.pipeline.is_running() {
                        self.pipeline.stop().await;
                    }
                    return Err(StreamerError::Source(e));
                }
            };

            if self.pipeline.is_running() {
                match self.pipeline.try_submit(ledger) {
                    Ok(()) => {}
                    Err(ledger) => {
                        warn!(sequence, "parallel queue full, falling back to inline sequential processing");
                        self.process_sequential(&mut orchestrator, &processor, ledger, sequence).await;
                    }
                }
            } else {
                self.process_sequential(&mut orchestrator, &processor, ledger, sequence).await;
            }

            sequence += 1;
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn process_sequential(
        &self,
        orchestrator: &mut Orchestrator,
        processor: &Processor,
        ledger: crate::source::DecodedLedger,
        sequence: u32,
    ) {
        let result = with_retry(&self.config.retry, &self.cancel, "process_ledger", || {
            processor.process(&ledger, orchestrator)
        })
        .await;
        if let Err(e) = result {
            warn!(sequence, error = %e, "processor error, ledger not checkpointed this iteration");
            return;
        }

        if should_checkpoint(sequence, self.config.checkpoint_interval) {
            let _guard = self.progress_lock.lock().await;
            if let Err(e) = self.repository.save_progress(sequence as i64).await {
                warn!(sequence, error = %e, "progress save failed, stream continues");
            } else {
                info!(sequence, "checkpoint saved");
            }
        }
    }

    /// Mode decision (spec §4.7): polls source health, computes lag,
    /// enables/disables the parallel pipeline. Keeps the current mode if
    /// the health fetch fails.
    async fn evaluate_mode(&mut self, current_sequence: u32) {
        let health = match self.source.health().await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "health check failed, keeping current pipeline mode");
                return;
            }
        };

        let lag = health.latest_ledger.saturating_sub(current_sequence);
        CURRENT_LAG.set(lag as f64);
        PIPELINE_LAG.set(lag as f64);

        let currently_parallel = self.pipeline.is_running();
        let should_be_parallel = decide_mode(
            currently_parallel,
            lag,
            self.config.pipeline.auto_enable_lag,
            self.config.pipeline.auto_disable_lag,
        );

        if should_be_parallel && !currently_parallel {
            info!(lag, "enabling parallel pipeline");
            self.pipeline.start(
                self.config.pipeline.worker_count,
                current_sequence,
                self.repository.clone(),
                self.config.clone(),
                self.cancel.clone(),
                self.progress_lock.clone(),
            );
        } else if !should_be_parallel && currently_parallel {
            info!(lag, "disabling parallel pipeline");
            self.pipeline.stop().await;
        }
    }
}

/// Whether `sequence` falls on a checkpoint boundary (spec §4.1 step 4).
/// `interval == 0` disables periodic checkpointing entirely.
fn should_checkpoint(sequence: u32, interval: u32) -> bool {
    interval > 0 && sequence % interval == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoints_only_on_interval_boundary() {
        assert!(should_checkpoint(100, 50));
        assert!(!should_checkpoint(101, 50));
        assert!(should_checkpoint(150, 50));
    }

    #[test]
    fn zero_interval_disables_checkpointing() {
        assert!(!should_checkpoint(100, 0));
        assert!(!should_checkpoint(0, 0));
    }
}
