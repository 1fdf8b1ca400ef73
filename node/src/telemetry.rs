// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Tracing (Logs)
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notary_node=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    // 2. Metrics (Prometheus)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
    }

    describe_metrics();
    metrics::gauge!("notary_node_up", 1.0);
}

fn describe_metrics() {
    metrics::describe_histogram!("notary_commit_duration_seconds", "Time taken to answer a commit request");
    metrics::describe_counter!("notary_commits_total", "Commit requests answered, by outcome");
    metrics::describe_counter!("notary_conflicts_total", "States reported as already consumed");
    metrics::describe_counter!("notary_db_retries_total", "Database transactions retried after a transient error");
    metrics::describe_counter!("notary_db_rollbacks_total", "Request savepoints rolled back on constraint violation");
    metrics::describe_gauge!("notary_db_queue_depth", "Requests waiting for the database worker");
    metrics::describe_histogram!("notary_db_batch_size", "Requests processed per database transaction");
    metrics::describe_counter!("notary_cache_hits_total", "Requests whose states were all known unspent");
    metrics::describe_counter!("notary_cache_misses_total", "Requests with at least one untracked or spent state");
    metrics::describe_gauge!("notary_raft_term", "Current Raft term");
    metrics::describe_gauge!("notary_raft_commit_index", "Highest committed Raft log index");
    metrics::describe_counter!("notary_raft_elections_total", "Elections started by this node");
    metrics::describe_counter!("notary_raft_snapshots_total", "Snapshots taken or installed");
    metrics::describe_counter!("notary_raft_redirects_total", "Proposals re-routed to another node");
    metrics::describe_counter!("notary_bft_view_changes_total", "View changes completed by this replica");
    metrics::describe_counter!("notary_bft_executed_total", "Requests executed in total order");
    metrics::describe_counter!("notary_bft_rejected_replies_total", "Client replies dropped for a bad signature");
}

/// Render metrics for the /metrics endpoint.
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
