//! OPML Worker - Main Entry Point
//!
//! Loads the node config, wires both engines behind the result registry,
//! starts the heartbeat and serves the question API until SIGINT/SIGTERM.

use anyhow::Context;
use opml_common::{NodeConfig, METRICS};
use opml_worker::{
    router, AppState, CallbackClient, Dispatcher, EngineSlot, HeartbeatReporter, LlamaEngine, OrphanSweeper,
    ReplayEngine, ResultRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for in-flight callbacks and engine runs
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::load().context("failed to load node config")?;
    init_tracing(&config);

    let node_id = config
        .node_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(
        node_id = %node_id,
        worker = %config.worker_name(),
        model = %config.model_name,
        dispatcher = %config.dispatcher_url,
        "Starting OPML worker"
    );

    // Force the metrics registry so every series exists before the first scrape
    METRICS.questions.pending_records.set(0);

    let tasks = TaskTracker::new();
    let notifier = Arc::new(CallbackClient::new(node_id.clone(), config.callback_timeout())?);
    let registry = Arc::new(ResultRegistry::new(notifier, tasks.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        EngineSlot::new(Arc::new(LlamaEngine::new(&config.llm)), config.llm.max_jobs, config.llm_timeout()),
        EngineSlot::new(
            Arc::new(ReplayEngine::new(&config.replay)),
            config.replay.max_jobs,
            config.replay_timeout(),
        ),
        Arc::clone(&registry),
        tasks.clone(),
    ));

    // Background loops
    let cancel = CancellationToken::new();

    let heartbeat = HeartbeatReporter::new(
        &config.dispatcher_url,
        config.worker_name(),
        dispatcher.controllers().to_vec(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
    )?;
    let heartbeat_handle = tokio::spawn(heartbeat.run(cancel.clone()));

    let sweep_handle = config.orphan_sweep.as_ref().map(|sweep| {
        let sweeper = OrphanSweeper::new(Arc::clone(&registry), sweep);
        tokio::spawn(sweeper.run(cancel.clone()))
    });

    // HTTP server
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind_address, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Listening");

    let app = router(AppState::new(Arc::clone(&dispatcher), node_id));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = heartbeat_handle.await;
    if let Some(handle) = sweep_handle {
        let _ = handle.await;
    }

    tasks.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
        warn!(
            pending_tasks = tasks.len(),
            pending_records = registry.len(),
            "Shutdown grace period elapsed with work still in flight"
        );
    }

    info!("OPML worker shutdown complete");
    Ok(())
}

fn init_tracing(config: &NodeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("opml_worker={},tower_http=info", config.observability.log_level).into()
    });

    if config.observability.structured_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
