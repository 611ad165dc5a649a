//! Stellar/Soroban contract-activity indexer service.
//!
//! Continuously streams closed ledgers from a Soroban RPC source,
//! detects factory deployments, tracks subsequent contract activity, and
//! persists a normalized view to Postgres (spec §1). The companion read
//! API is a separate, out-of-scope process that projects the same
//! tables (spec §1, §6).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indexer::config::ServiceConfig;
use indexer::source::{HttpLedgerSource, LedgerSource};
use indexer::{metrics, Repository, Streamer, StreamerError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "indexer", about = "Soroban contract-activity ingestion pipeline")]
struct Cli {
    /// Load configuration, validate it, and exit without connecting to
    /// anything (spec §7 Configuration errors are fatal at startup; this
    /// flag lets an operator check that before committing to a run).
    #[arg(long)]
    config_check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "indexer=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig::from_env().context("loading configuration")?;
    info!(network = config.source.network, "configuration loaded");

    if cli.config_check {
        println!("configuration ok");
        return Ok(());
    }

    metrics::BUFFER_SIZE.set(config.buffer_size as f64);

    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    let repository = Repository::connect(&config.database.connection_string, config.database.max_connections)
        .await
        .context("connecting to database")?;

    let source: Arc<dyn LedgerSource> =
        Arc::new(HttpLedgerSource::new(&config.source).context("building ledger source client")?);

    let start = determine_start_ledger(&repository, source.as_ref(), config.start_ledger)
        .await
        .context("determining start ledger")?;
    info!(start, "resolved start ledger");

    let metrics_cancel = cancel.clone();
    let metrics_port = config.metrics_port;
    let metrics_handle = tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_port, metrics_cancel).await {
            error!(error = %e, "metrics server exited with error");
        }
    });

    let mut streamer = Streamer::new(source.clone(), repository, config.clone(), cancel.clone());
    let mut run_handle = tokio::spawn(async move { streamer.run(start).await });

    let shutdown_signal = create_shutdown_signal();
    tokio::pin!(shutdown_signal);

    let run_result = tokio::select! {
        result = &mut run_handle => result.context("streamer task panicked")?,
        _ = &mut shutdown_signal => {
            info!("received shutdown signal, stopping stream");
            cancel.cancel();
            // Grace period for the in-flight loop iteration, parallel
            // pipeline drain, and ambient HTTP surface to wind down
            // (spec §5).
            match tokio::time::timeout(std::time::Duration::from_secs(5), &mut run_handle).await {
                Ok(result) => result.context("streamer task panicked")?,
                Err(_) => {
                    warn!("streamer did not stop within the shutdown grace period");
                    Err(StreamerError::Cancelled)
                }
            }
        }
    };

    source.close().await;
    cancel.cancel();
    let _ = metrics_handle.await;

    match run_result {
        Ok(()) | Err(StreamerError::Cancelled) => {
            info!("indexer stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "indexer stopped with a non-recoverable error");
            Err(e.into())
        }
    }
}

/// Resolves the first ledger to fetch (spec §6 `START_LEDGER`, §8
/// scenario 2 "resume after crash"): a persisted progress row always
/// wins (resume at last checkpoint + 1); otherwise the configured value,
/// where 0 means "latest minus 10" as a safety margin.
async fn determine_start_ledger(
    repository: &Repository,
    source: &dyn LedgerSource,
    configured: u32,
) -> Result<u32> {
    if let Some(progress) = repository.load_progress().await.context("loading progress row")? {
        let resumed = progress.last_ledger_sequence as u32 + 1;
        info!(resumed, "resuming from persisted checkpoint");
        return Ok(resumed);
    }

    if configured == 0 {
        let health = source.health().await.context("fetching source health for safety-margin start")?;
        let start = health.latest_ledger.saturating_sub(10);
        warn!(latest = health.latest_ledger, start, "no persisted progress; starting at latest minus safety margin");
        return Ok(start);
    }

    Ok(configured)
}

fn create_shutdown_signal() -> impl std::future::Future<Output = ()> {
    async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }

        #[cfg(windows)]
        {
            tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
            tracing::info!("received Ctrl+C");
        }
    }
}
