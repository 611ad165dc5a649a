/// Pipeline (spec §4.7). N workers + 1 orderer + one bounded inbound
/// ledger queue + one bounded results queue; started and stopped as a
/// unit by the Streamer's mode decision.
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServiceConfig;
use crate::metrics::{PIPELINE_MODE, PIPELINE_QUEUE_DEPTH, PIPELINE_WORKER_COUNT};
use crate::orderer::Orderer;
use crate::repository::Repository;
use crate::source::DecodedLedger;
use crate::worker::Worker;

/// Mode decision (spec §4.7): evaluated every 50 ledgers by the Streamer
/// using freshly polled lag.
pub fn decide_mode(currently_parallel: bool, lag: u32, auto_enable_lag: u32, auto_disable_lag: u32) -> bool {
    if !currently_parallel && lag > auto_enable_lag {
        true
    } else if currently_parallel && lag < auto_disable_lag {
        false
    } else {
        currently_parallel
    }
}

pub struct Pipeline {
    queue_capacity: usize,
    inbound_tx: Option<mpsc::Sender<DecodedLedger>>,
    dispatch_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    orderer_handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(queue_capacity: usize) -> Self {
        Pipeline {
            queue_capacity,
            inbound_tx: None,
            dispatch_handle: None,
            worker_handles: Vec::new(),
            orderer_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inbound_tx.is_some()
    }

    pub fn start(
        &mut self,
        worker_count: usize,
        start_sequence: u32,
        repository: Repository,
        config: Arc<ServiceConfig>,
        cancel: CancellationToken,
        progress_lock: Arc<Mutex<()>>,
    ) {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<DecodedLedger>(self.queue_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);

        let mut worker_txs = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel::<DecodedLedger>(self.queue_capacity);
            worker_txs.push(tx);
            let worker = Worker::new(id, repository.clone(), config.clone(), cancel.clone());
            let outbound_tx = outbound_tx.clone();
            handles.push(tokio::spawn(worker.run(rx, outbound_tx)));
        }
        drop(outbound_tx);

        let dispatch_handle = tokio::spawn(async move {
            let mut next = 0usize;
            while let Some(ledger) = inbound_rx.recv().await {
                let idx = next % worker_txs.len();
                if worker_txs[idx].send(ledger).await.is_err() {
                    break;
                }
                next += 1;
            }
        });

        let orderer = Orderer::new(repository, config.checkpoint_interval, progress_lock);
        let orderer_handle = tokio::spawn(orderer.run(outbound_rx, start_sequence));

        info!(worker_count, start_sequence, "parallel pipeline started");
        PIPELINE_MODE.set(1.0);
        PIPELINE_WORKER_COUNT.set(worker_count as f64);

        self.inbound_tx = Some(inbound_tx);
        self.dispatch_handle = Some(dispatch_handle);
        self.worker_handles = handles;
        self.orderer_handle = Some(orderer_handle);
    }

    /// Non-blocking submit; the caller falls back to immediate sequential
    /// processing if this returns an error (spec §4.1 step 4, §5
    /// backpressure policy).
    pub fn try_submit(&self, ledger: DecodedLedger) -> Result<(), DecodedLedger> {
        match &self.inbound_tx {
            Some(tx) => {
                PIPELINE_QUEUE_DEPTH.set((self.queue_capacity - tx.capacity()) as f64);
                tx.try_send(ledger).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(l) => l,
                    mpsc::error::TrySendError::Closed(l) => l,
                })
            }
            None => Err(ledger),
        }
    }

    /// Closes the inbound queue, lets workers drain, then the orderer
    /// (spec §5 cancellation: "streamer stops the parallel pipeline by
    /// closing the inbound queue; workers drain and exit; orderer drains
    /// its results queue and exits").
    pub async fn stop(&mut self) {
        if let Some(tx) = self.inbound_tx.take() {
            drop(tx);
        }
        if let Some(h) = self.dispatch_handle.take() {
            let _ = h.await;
        }
        for h in self.worker_handles.drain(..) {
            let _ = h.await;
        }
        if let Some(h) = self.orderer_handle.take() {
            let _ = h.await;
        }
        PIPELINE_MODE.set(0.0);
        PIPELINE_WORKER_COUNT.set(0.0);
        PIPELINE_QUEUE_DEPTH.set(0.0);
        info!("parallel pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enables_parallel_when_lag_exceeds_threshold() {
        assert!(decide_mode(false, 60, 50, 20));
    }

    #[test]
    fn stays_sequential_when_lag_below_enable_threshold() {
        assert!(!decide_mode(false, 40, 50, 20));
    }

    #[test]
    fn disables_parallel_when_lag_drops_below_disable_threshold() {
        assert!(!decide_mode(true, 10, 50, 20));
    }

    #[test]
    fn stays_parallel_between_disable_and_enable_thresholds() {
        assert!(decide_mode(true, 30, 50, 20));
    }

    #[test]
    fn mode_transition_sequence_from_scenario_6() {
        let mut parallel = false;
        let lags = [20, 60, 80, 40, 10];
        let expected = [false, true, true, true, false];
        for (lag, expect) in lags.iter().zip(expected.iter()) {
            parallel = decide_mode(parallel, *lag, 50, 20);
            assert_eq!(parallel, *expect, "lag={lag}");
        }
    }
}
