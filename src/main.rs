mod backend;
mod catalog;
mod config;
mod error;
mod handlers;
mod logging;
mod metrics;
mod middleware;
mod models;
mod policy;
mod registry;
mod relay;
mod state;
mod summary;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backend::OpenAiBackend;
use crate::catalog::DockerModelRunner;
use crate::config::{Args, Settings};
use crate::handlers::{app_router, metrics_router};
use crate::metrics::Metrics;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();
    logging::init(&args.log_level, args.log_pretty);

    let metrics = Arc::new(Metrics::new().context("failed to declare metrics")?);
    let backend = Arc::new(OpenAiBackend::new(
        reqwest::Client::new(),
        &args.base_url,
        &args.api_key,
    ));
    let state = Arc::new(AppState::new(
        metrics,
        backend,
        Arc::new(DockerModelRunner::default()),
        Settings::from(&args),
    ));

    if args.tracing_enabled {
        // spans are emitted through the log subscriber, nothing is exported
        info!(endpoint = %args.otlp_endpoint, "request tracing enabled");
    }

    let app = app_router(state.clone(), args.tracing_enabled);
    let scrape = metrics_router(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api = serve("api", args.port, app, shutdown_rx.clone()).await?;
    let metrics_server = serve("metrics", args.metrics_port, scrape, shutdown_rx).await?;

    info!(
        port = args.port,
        metrics_port = args.metrics_port,
        base_url = %args.base_url,
        model = %args.model,
        "aiwatch running"
    );

    shutdown_signal().await;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [("api", api), ("metrics", metrics_server)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(server = name, error = %err, "server failed"),
            Err(err) => error!(server = name, error = %err, "server task panicked"),
        }
    }
    Ok(())
}

// Binds before returning so a taken port fails startup.
async fn serve(
    name: &'static str,
    port: u16,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<std::io::Result<()>>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {name} listener on {addr}"))?;
    info!(server = name, %addr, "listening");

    Ok(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
