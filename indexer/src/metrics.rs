/// Prometheus metrics (spec §6 Metrics, §10.5), served over a minimal axum
/// router alongside the `/health` liveness endpoint.
use std::net::SocketAddr;

use axum::{routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec, CounterVec,
    Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub static LEDGERS_PROCESSED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "indexer_ledgers_processed_total",
        "Ledgers processed, by outcome",
        &["outcome"]
    )
    .expect("metric registration")
});

pub static TRANSACTIONS_PROCESSED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "indexer_transactions_processed_total",
        "Transactions processed, by outcome",
        &["outcome"]
    )
    .expect("metric registration")
});

pub static DEPLOYMENTS_DETECTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "indexer_deployments_detected_total",
        "Contract deployments detected, by factory kind",
        &["kind"]
    )
    .expect("metric registration")
});

pub static STORAGE_CHANGES_WRITTEN: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "indexer_storage_changes_written_total",
        "Storage change rows written, by change kind",
        &["change_kind"]
    )
    .expect("metric registration")
});

pub static EVENTS_WRITTEN: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("indexer_events_written_total", "Contract event rows written", &["event_type"])
        .expect("metric registration")
});

pub static RPC_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("indexer_rpc_errors_total", "Ledger-source errors, by classification", &["class"])
        .expect("metric registration")
});

pub static CURRENT_LAG: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_current_lag", "Ledgers between the source's latest and our last processed")
        .expect("metric registration")
});

pub static PIPELINE_MODE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_pipeline_mode", "0 = sequential, 1 = parallel").expect("metric registration")
});

pub static LEDGER_PROCESSING_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "indexer_ledger_processing_seconds",
        "Time to process a single ledger end-to-end",
        &["mode"]
    )
    .expect("metric registration")
});

pub static DB_BATCH_INSERT_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "indexer_db_batch_insert_seconds",
        "Duration of a batch insert, by table",
        &["table"]
    )
    .expect("metric registration")
});

pub static COMPACTOR_FLUSH_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!("indexer_compactor_flush_seconds", "Duration of a per-ledger compactor flush")
        .expect("metric registration")
});

pub static BATCH_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!("indexer_batch_size", "Row count of a persisted batch, by table", &["table"])
        .expect("metric registration")
});

pub static TRACKED_CONTRACTS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_tracked_contracts", "Contracts currently in the tracked-contract set")
        .expect("metric registration")
});

pub static BUFFER_SIZE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_buffer_size", "Configured inbound ledger queue capacity").expect("metric registration")
});

pub static COMPACTOR_REDUCTION_PERCENT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_compactor_reduction_percent", "Percentage of raw storage changes collapsed by the last flush")
        .expect("metric registration")
});

pub static PIPELINE_WORKER_COUNT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_pipeline_worker_count", "Number of active parallel-mode workers").expect("metric registration")
});

pub static PIPELINE_QUEUE_DEPTH: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_pipeline_queue_depth", "Current depth of the inbound ledger queue").expect("metric registration")
});

pub static PIPELINE_LAG: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_pipeline_lag", "Ledgers between the source's latest and our last processed, as last polled")
        .expect("metric registration")
});

pub static CURRENT_LEDGER: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("indexer_current_ledger", "Sequence number of the ledger currently being processed")
        .expect("metric registration")
});

fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
}

/// Starts the metrics/health HTTP server; returns once `cancel` fires.
pub async fn serve(port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let app = router();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

async fn health_handler() -> &'static str {
    "ok"
}
