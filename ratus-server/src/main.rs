//! # Ratus Server
//!
//! RESTful asynchronous task queue server.
//!
//! ## Overview
//!
//! Producers publish idempotent units of work; consumers claim those units
//! with time-bounded promises, execute them, then acknowledge completion
//! with commits. The server provides:
//!
//! - **At-least-once execution** across competing consumers via nonce-based
//!   optimistic concurrency control
//! - **Deadline-based recovery**: tasks claimed by dead consumers return to
//!   the queue automatically
//! - **Unified scheduling**: time-based scheduling and priority queuing in
//!   a single state machine
//! - **Pluggable storage**: an in-memory engine with optional snapshots and
//!   a MongoDB engine with atomic and optimistic update paths
//!
//! ## Architecture
//!
//! The server is built on Axum and uses a storage engine selected at
//! startup as the single source of truth. A background chore loop recovers
//! timed-out tasks and expires completed ones. Prometheus metrics are
//! served on `/metrics`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ratus_core::engine::{Engine, MemDbEngine, MongoDbEngine};
use ratus_server::infra::app_state::AppState;
use ratus_server::infra::chore::{self, ChoreSettings};
use ratus_server::infra::config::Config;
use ratus_server::infra::metrics::Metrics;
use ratus_server::routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap resolves environment fallbacks.
    dotenv::dotenv().ok();
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting ratus");

    // Create a storage engine instance of the specified type.
    let engine: Arc<dyn Engine> = match config.engine.to_lowercase().as_str() {
        "memdb" => Arc::new(MemDbEngine::new(config.memdb())),
        "mongodb" => Arc::new(
            MongoDbEngine::new(config.mongodb())
                .await
                .context("failed to create the mongodb engine")?,
        ),
        other => anyhow::bail!("unknown storage engine: {other}"),
    };
    engine.open().await.context("failed to open the storage engine")?;
    info!(engine = %config.engine, "storage engine opened");

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    let state = AppState {
        engine: engine.clone(),
        pagination: config.pagination(),
        metrics: metrics.clone(),
    };
    let app = routes::create_app(state);

    // Run background jobs alongside the API server. Either can be disabled
    // to split instances into serving and housekeeping roles.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let chore_handle = tokio::spawn(chore::run(
        engine.clone(),
        metrics,
        ChoreSettings {
            interval: config.chore_interval,
            initial_delay: config.chore_initial_delay,
            initial_random: config.chore_initial_random,
        },
        shutdown_rx,
    ));

    if config.port > 0 {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("start listening on {addr}");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("stop listening on {addr}");
    } else {
        warn!("api server is disabled, running background jobs only");
        shutdown_signal().await;
    }

    // Stop the chore loop before closing the engine so the final snapshot
    // of the in-memory engine observes a quiescent table.
    shutdown_tx.send(true).ok();
    chore_handle.await.ok();
    engine.close().await.context("failed to close the storage engine")?;

    info!("shut down gracefully");
    Ok(())
}

/// Resolve when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install the interrupt signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install the termination signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
