// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::api::{HealthResponse, NotariseResponse};
use crate::bft::{BftEnvelope, BftHandle, BftMessage, ReplyDesk};
use crate::errors::ProviderError;
use crate::raft::{Envelope, ProposeOutcome, RaftHandle};
use crate::service::NotaryService;
use axum::extract::{Request as AxumRequest, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use notary_kernel::CommitRequest;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Local BFT replica plus the reply desk of this node's client.
#[derive(Clone)]
pub struct BftEndpoint {
    pub replica: BftHandle,
    pub desk: Arc<ReplyDesk>,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NotaryService>,
    pub node_name: String,
    pub raft: Option<RaftHandle>,
    pub bft: Option<BftEndpoint>,
}

impl AppState {
    pub fn new(service: Arc<NotaryService>, node_name: impl Into<String>) -> Self {
        Self { service, node_name: node_name.into(), raft: None, bft: None }
    }
}

async fn auth_guard(
    State(token): State<Arc<String>>,
    req: AxumRequest,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "));

    match provided {
        Some(provided) if provided == token.as_str() => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn build_router(state: AppState, auth_token: Option<String>) -> Router {
    let mut app = Router::new()
        .route("/v1/notarise", post(notarise))
        .route("/v1/raft/message", post(raft_message))
        .route("/v1/raft/propose", post(raft_propose))
        .route("/v1/bft/message", post(bft_message))
        .route("/v1/health", get(health))
        // Observability
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    if let Some(token) = auth_token {
        tracing::info!("Auth Enabled: Bearer token required");
        app = app.layer(from_fn_with_state(Arc::new(token), auth_guard));
    } else {
        tracing::warn!("Auth Disabled: No token configured");
    }

    app.layer(TraceLayer::new_for_http())
}

async fn notarise(
    State(state): State<AppState>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<NotariseResponse>, ProviderError> {
    let tx_id = request.tx_id;
    let result = state.service.commit(request).await?;
    Ok(Json(NotariseResponse::new(tx_id, result)))
}

async fn raft_message(State(state): State<AppState>, Json(envelope): Json<Envelope>) -> StatusCode {
    match &state.raft {
        Some(raft) => {
            raft.deliver(envelope);
            StatusCode::ACCEPTED
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn raft_propose(
    State(state): State<AppState>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<ProposeOutcome>, ProviderError> {
    let raft = state
        .raft
        .as_ref()
        .ok_or_else(|| ProviderError::Unavailable("this node runs no raft replica".into()))?;
    Ok(Json(raft.propose(request).await))
}

async fn bft_message(State(state): State<AppState>, Json(envelope): Json<BftEnvelope>) -> StatusCode {
    let Some(bft) = &state.bft else {
        return StatusCode::NOT_FOUND;
    };
    if matches!(envelope.signed.message, BftMessage::Reply { .. }) {
        bft.desk.deliver(envelope.signed);
    } else {
        bft.replica.deliver(envelope.signed);
    }
    StatusCode::ACCEPTED
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let raft = match &state.raft {
        Some(raft) => raft.status().await.ok(),
        None => None,
    };
    let bft = match &state.bft {
        Some(bft) => bft.replica.status().await.ok(),
        None => None,
    };
    Json(HealthResponse {
        status: "ok",
        node: state.node_name.clone(),
        backend: state.service.backend(),
        raft,
        bft,
    })
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}
