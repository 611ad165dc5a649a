/// Orchestrator (spec §4.3). Holds the fixed-order service chain and a
/// "current ledger" cursor; detects ledger boundaries from the cursor
/// change and invokes flush on every Flushable service before advancing.
use std::sync::Arc;

use tracing::warn;

use crate::processor::NormalizedTransaction;
use crate::services::Service;

pub struct Orchestrator {
    services: Vec<Arc<dyn Service>>,
    cursor: Option<i64>,
}

impl Orchestrator {
    pub fn new(services: Vec<Arc<dyn Service>>) -> Self {
        Orchestrator { services, cursor: None }
    }

    pub async fn process_transaction(&mut self, tx: NormalizedTransaction) -> Result<(), anyhow::Error> {
        if let Some(cursor) = self.cursor {
            if cursor != tx.ledger_sequence {
                self.flush_all().await;
            }
        }
        self.cursor = Some(tx.ledger_sequence);

        let mut new_deployments = Vec::new();
        for service in &self.services {
            if let Err(e) = service.process(&tx, &mut new_deployments).await {
                warn!(service = service.name(), tx_hash = %tx.hash, error = %e, "service error, continuing");
            }
        }
        Ok(())
    }

    /// Explicit flush, used at ledger boundaries and, in parallel mode, at
    /// the end of a worker's single ledger (spec §4.7: "each ledger is
    /// self-contained in a worker").
    pub async fn flush_all(&self) {
        for service in &self.services {
            if let Some(flushable) = service.as_flushable() {
                if let Err(e) = flushable.flush_ledger().await {
                    warn!(service = service.name(), error = %e, "flush error, continuing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Flushable, ServiceError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        processed: AtomicUsize,
        flushed: AtomicUsize,
    }

    #[async_trait]
    impl Service for CountingService {
        async fn process(&self, _tx: &NormalizedTransaction, _new_deployments: &mut Vec<String>) -> Result<(), ServiceError> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }

        fn as_flushable(&self) -> Option<&dyn Flushable> {
            Some(self)
        }
    }

    #[async_trait]
    impl Flushable for CountingService {
        async fn flush_ledger(&self) -> Result<(), ServiceError> {
            self.flushed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tx(ledger_sequence: i64) -> NormalizedTransaction {
        NormalizedTransaction {
            hash: "h".into(),
            ledger_sequence,
            close_time: Utc::now(),
            success: true,
            is_soroban: true,
            invoker: None,
            fee_charged: 0,
            contract_ids: vec![],
            meta: None,
        }
    }

    #[tokio::test]
    async fn flushes_on_ledger_boundary_change() {
        let service = Arc::new(CountingService { processed: AtomicUsize::new(0), flushed: AtomicUsize::new(0) });
        let mut orchestrator = Orchestrator::new(vec![service.clone()]);

        orchestrator.process_transaction(tx(100)).await.unwrap();
        orchestrator.process_transaction(tx(100)).await.unwrap();
        assert_eq!(service.flushed.load(Ordering::SeqCst), 0);

        orchestrator.process_transaction(tx(101)).await.unwrap();
        assert_eq!(service.flushed.load(Ordering::SeqCst), 1);
        assert_eq!(service.processed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn explicit_flush_all_invokes_flushable_services() {
        let service = Arc::new(CountingService { processed: AtomicUsize::new(0), flushed: AtomicUsize::new(0) });
        let mut orchestrator = Orchestrator::new(vec![service.clone()]);
        orchestrator.process_transaction(tx(1)).await.unwrap();
        orchestrator.flush_all().await;
        assert_eq!(service.flushed.load(Ordering::SeqCst), 1);
    }
}
