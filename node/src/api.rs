// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::bft::BftStatus;
use crate::raft::RaftStatus;
use notary_kernel::{SecureHash, UniquenessResult};
use serde::{Deserialize, Serialize};

// `POST /v1/notarise` takes a `notary_kernel::CommitRequest` as its body.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotariseResponse {
    pub tx_id: SecureHash,
    /// `success`, `conflict` or `time_window_invalid`.
    pub outcome: String,
    pub result: UniquenessResult,
}

impl NotariseResponse {
    pub fn new(tx_id: SecureHash, result: UniquenessResult) -> Self {
        Self { tx_id, outcome: result.outcome().to_string(), result }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node: String,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raft: Option<RaftStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bft: Option<BftStatus>,
}
