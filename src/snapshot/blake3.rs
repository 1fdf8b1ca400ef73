// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical BLAKE3 state hash.
//!
//! Replicas compare this hash to detect divergence, and snapshots carry it
//! so a restore can reject a body that does not match its header.
//!
//! # Hash Input Structure
//! ```text
//! applied (u64 LE)
//! ↓
//! For each commit-log entry (StateRef order):
//!   txhash (32B) index (u32 LE)
//!   consuming_tx (32B) input_index (u32 LE)
//!   party_len (u32 LE) party bytes
//! ↓
//! For each notarised tx id (sorted): 32B
//! ↓
//! For each request record (append order):
//!   consuming_tx (32B) party_len party bytes
//!   signature_len (u32 LE) signature bytes
//!   request_time (u64 LE)
//! ```

use crate::state::commit_log::CommitLogState;

pub fn hash_state_blake3(state: &CommitLogState) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();

    hasher.update(&state.applied.to_le_bytes());

    hasher.update(&(state.committed.len() as u64).to_le_bytes());
    for (state_ref, info) in state.committed.iter() {
        hasher.update(state_ref.txhash.as_bytes());
        hasher.update(&state_ref.index.to_le_bytes());
        hasher.update(info.consuming_tx.as_bytes());
        hasher.update(&info.input_index.to_le_bytes());
        write_bytes(&mut hasher, info.requesting_party.name().as_bytes());
    }

    hasher.update(&(state.notarised.len() as u64).to_le_bytes());
    for tx in state.notarised.iter() {
        hasher.update(tx.as_bytes());
    }

    hasher.update(&(state.requests.len() as u64).to_le_bytes());
    for record in state.requests.iter() {
        hasher.update(record.consuming_tx.as_bytes());
        write_bytes(&mut hasher, record.requesting_party.name().as_bytes());
        write_bytes(&mut hasher, record.request_signature.as_bytes());
        hasher.update(&record.request_time.to_le_bytes());
    }

    *hasher.finalize().as_bytes()
}

fn write_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}
