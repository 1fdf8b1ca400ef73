// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use notary_node::config::NodeConfig;
use notary_node::server::build_router;
use notary_node::{runtime, telemetry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_telemetry();

    let cfg = NodeConfig::from_env().context("invalid NOTARY_* configuration")?;
    tracing::info!(node = %cfg.node_name, backend = ?cfg.backend, data_dir = ?cfg.data_dir, "Initializing notary node");

    let cancel = CancellationToken::new();
    let node = runtime::start(&cfg, cancel.clone()).context("failed to start notary backend")?;
    let app = build_router(node.state, cfg.auth_token.clone());

    let addr = cfg.bind_addr;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    cancel.cancel();
    for task in node.tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Replica task ended abnormally");
        }
    }
    Ok(())
}
