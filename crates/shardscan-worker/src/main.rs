//! shardscan-worker binary: scans one primary-key chunk of a table on every
//! shard and reports what each shard delivered.

mod config;
mod fanout;
mod health;

use anyhow::Result;
use shardscan_connectors::{PgDialer, ReaderMetrics, ScanContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::WorkerConfig;
use fanout::ScanJob;
use health::HealthState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;
    info!(
        "Starting shardscan-worker {} (table={} chunk={}, {} tablets)",
        config.worker_id,
        config.table.name,
        config.chunk,
        config.tablets.len()
    );

    let metrics = ReaderMetrics::new();

    // Health/readiness state
    let ready = Arc::new(AtomicBool::new(false));
    let health_state = Arc::new(HealthState {
        metrics: metrics.clone(),
        ready: ready.clone(),
    });

    // Start metrics/health HTTP server
    let metrics_port = config.metrics_port;
    let health_router = health::health_router(health_state);
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", metrics_port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server on {}: {}", addr, e);
                return;
            }
        };
        info!("Metrics server listening on {}", addr);
        if let Err(e) = axum::serve(listener, health_router).await {
            error!("Metrics server stopped: {}", e);
        }
    });

    // Cancel in-flight reads on Ctrl-C
    let ctx = ScanContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling shard scans");
            interrupt.cancel();
        }
    });

    let providers = fanout::providers_by_shard(&config.tablets);
    let job = Arc::new(ScanJob {
        ctx,
        dialer: Arc::new(PgDialer::new(config.pg_batch_size)),
        table: Arc::new(config.table.clone()),
        chunk: config.chunk.clone(),
        options: config.reader_options(),
        metrics,
    });

    ready.store(true, Ordering::Relaxed);
    let output = fanout::scan_shards(job, providers).await;
    ready.store(false, Ordering::Relaxed);

    let mut shards: Vec<_> = output.responses.iter().collect();
    shards.sort_by(|a, b| a.0.cmp(b.0));
    for (shard, summary) in shards {
        info!("shard={} summary={}", shard, serde_json::to_string(summary)?);
    }

    match output.first_error {
        Some(e) => Err(e),
        None => {
            info!("All shards scanned");
            Ok(())
        }
    }
}
