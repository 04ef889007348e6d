//! API Gateway entry point.
//!
//! Startup order: tracing → config → stores/queue → worker pool → router →
//! listener. Shutdown on SIGINT/SIGTERM stops accepting connections and
//! gives in-flight requests a bounded grace window, then stops the worker
//! pool, closes the queue and closes the stores.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_gateway::services::worker::WorkerPool;
use api_gateway::{build_router, AppState, Config};

/// How long in-flight connections get to drain after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("starting API Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!(
        port = config.port,
        targets = config.targets.len(),
        async_enabled = config.async_tasks.enabled,
        "configuration loaded"
    );

    let state = AppState::new(config.clone()).await?;

    let background = CancellationToken::new();
    let sweeper = state.rate_limiter.clone().spawn_sweeper(background.clone());

    let worker_pool = match &state.task_queue {
        Some(queue) => {
            let pool = Arc::new(WorkerPool::new(
                config.async_tasks.worker_count,
                queue.clone(),
                state.task_repo.clone(),
            )?);
            pool.start();
            Some(pool)
        }
        None => None,
    };

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API Gateway listening on {addr}");

    let shutdown_token = CancellationToken::new();
    let serve_token = shutdown_token.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_token.cancelled().await })
            .await
    });

    let exited_early = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut server => {
            result??;
            true
        }
    };

    info!("shutting down");

    // Stop accepting new connections; in-flight requests get a bounded
    // grace window to drain before the listener is torn down.
    if !exited_early {
        shutdown_token.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => info!("listener drained"),
            Ok(Ok(Err(err))) => error!(error = %err, "server error while draining"),
            Ok(Err(err)) => error!(error = %err, "server task failed while draining"),
            Err(_) => {
                warn!(
                    "connections did not drain within {:?}, aborting",
                    SHUTDOWN_GRACE
                );
                server.abort();
            }
        }
    }

    // Stop the worker pool; each worker finishes its in-flight task first.
    if let Some(pool) = worker_pool {
        pool.shutdown().await;
    }

    // Close the queue.
    if let Some(queue) = &state.task_queue {
        queue.close().await;
    }

    background.cancel();
    sweeper.abort();

    // Close the stores.
    if let Some(client) = state.db_client.clone() {
        client.shutdown().await;
        info!("document store closed");
    }

    info!("server exited");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_gateway=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            warn!("received SIGTERM, shutting down gracefully");
        },
    }
}
