// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Snapshot encoding.
//!
//! ```text
//! [MAGIC "NTRY"][VERSION u32][APPLIED u64][STATE HASH 32B][BODY]
//! ```
//! BODY is bincode of the commit-log entries in key order, then the
//! notarised transaction ids, then the request log in append order.
//! Readers consume the body in the same order.

use crate::error::{KernelError, Result};
use crate::request::RequestRecord;
use crate::snapshot::{hash_state_blake3, HEADER_LEN, MAGIC, SCHEMA_VERSION};
use crate::state::commit_log::CommitLogState;
use crate::types::{ConsumingTxInfo, SecureHash, StateRef};
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub(crate) struct SnapshotBody {
    pub(crate) committed: Vec<(StateRef, ConsumingTxInfo)>,
    pub(crate) notarised: Vec<SecureHash>,
    pub(crate) requests: Vec<RequestRecord>,
}

pub fn encode_state(state: &CommitLogState) -> Result<Vec<u8>> {
    let body = SnapshotBody {
        committed: state.committed.iter().map(|(k, v)| (*k, v.clone())).collect(),
        notarised: state.notarised.iter().copied().collect(),
        requests: state.requests.clone(),
    };

    let body_bytes = bincode::serde::encode_to_vec(&body, bincode::config::standard())
        .map_err(|e| KernelError::Encoding(alloc::format!("{}", e)))?;

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    LittleEndian::write_u32(&mut header[4..8], SCHEMA_VERSION);
    LittleEndian::write_u64(&mut header[8..16], state.applied);
    header[16..48].copy_from_slice(&hash_state_blake3(state));

    let mut out = Vec::with_capacity(HEADER_LEN + body_bytes.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&body_bytes);
    Ok(out)
}
