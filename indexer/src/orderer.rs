/// Orderer (spec §4.7, parallel mode). Receives worker completion notices
/// out of order, buffers them, and advances a sequential checkpoint
/// cursor only once the contiguous prefix of completions has grown to
/// include it (spec §8 P5).
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::repository::Repository;
use crate::worker::WorkerCompletion;

pub struct Orderer {
    repository: Repository,
    checkpoint_interval: u32,
    progress_lock: Arc<Mutex<()>>,
}

impl Orderer {
    pub fn new(repository: Repository, checkpoint_interval: u32, progress_lock: Arc<Mutex<()>>) -> Self {
        Orderer { repository, checkpoint_interval, progress_lock }
    }

    /// Drains `inbound` until it closes, maintaining `next_expected`
    /// starting at `start_sequence` (spec §4.7 Orderer).
    pub async fn run(self, mut inbound: mpsc::Receiver<WorkerCompletion>, start_sequence: u32) {
        let mut next_expected = start_sequence;
        let mut pending: HashMap<u32, WorkerCompletion> = HashMap::new();

        while let Some(completion) = inbound.recv().await {
            pending.insert(completion.sequence, completion);

            while let Some(completion) = pending.remove(&next_expected) {
                if self.checkpoint_interval > 0 && next_expected % self.checkpoint_interval == 0 {
                    let _guard = self.progress_lock.lock().await;
                    if let Err(e) = self.repository.save_progress(next_expected as i64).await {
                        warn!(sequence = next_expected, error = %e, "progress save failed, will retry at next checkpoint");
                    } else {
                        info!(sequence = next_expected, worker = completion.worker_id, "checkpoint saved");
                    }
                }
                next_expected += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn completion(sequence: u32) -> WorkerCompletion {
        WorkerCompletion { sequence, worker_id: 0, duration: Duration::from_millis(1) }
    }

    #[test]
    fn pending_map_releases_contiguous_prefix_only() {
        let mut pending: HashMap<u32, WorkerCompletion> = HashMap::new();
        pending.insert(102, completion(102));
        pending.insert(101, completion(101));

        let mut next_expected = 100u32;
        let mut released = Vec::new();
        while let Some(c) = pending.remove(&next_expected) {
            released.push(c.sequence);
            next_expected += 1;
        }

        assert!(released.is_empty());
        assert_eq!(next_expected, 100);

        pending.insert(100, completion(100));
        while let Some(c) = pending.remove(&next_expected) {
            released.push(c.sequence);
            next_expected += 1;
        }
        assert_eq!(released, vec![100, 101, 102]);
        assert_eq!(next_expected, 103);
    }
}
