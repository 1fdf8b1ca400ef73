// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Snapshot decoding.

use crate::error::{KernelError, Result};
use crate::snapshot::encode::SnapshotBody;
use crate::snapshot::{hash_state_blake3, HEADER_LEN, MAGIC, SCHEMA_VERSION};
use crate::state::commit_log::CommitLogState;
use byteorder::{ByteOrder, LittleEndian};

/// Decode a snapshot and check it against the state hash in its header.
pub fn decode_state(buf: &[u8]) -> Result<CommitLogState> {
    if buf.len() < HEADER_LEN {
        return Err(KernelError::Truncated { expected: HEADER_LEN, found: buf.len() });
    }
    if &buf[0..4] != MAGIC {
        return Err(KernelError::InvalidMagic);
    }
    let version = LittleEndian::read_u32(&buf[4..8]);
    if version != SCHEMA_VERSION {
        return Err(KernelError::UnsupportedVersion(version));
    }
    let applied = LittleEndian::read_u64(&buf[8..16]);
    let mut expected_hash = [0u8; 32];
    expected_hash.copy_from_slice(&buf[16..48]);

    let (body, _): (SnapshotBody, usize) =
        bincode::serde::decode_from_slice(&buf[HEADER_LEN..], bincode::config::standard())
            .map_err(|e| KernelError::Decoding(alloc::format!("{}", e)))?;

    let state = CommitLogState::from_parts(
        body.committed.into_iter().collect(),
        body.notarised.into_iter().collect(),
        body.requests,
        applied,
    );

    if hash_state_blake3(&state) != expected_hash {
        return Err(KernelError::StateHashMismatch);
    }

    Ok(state)
}

/// Applied-command count recorded in a snapshot header, without decoding the body.
pub fn peek_applied(buf: &[u8]) -> Result<u64> {
    if buf.len() < HEADER_LEN {
        return Err(KernelError::Truncated { expected: HEADER_LEN, found: buf.len() });
    }
    if &buf[0..4] != MAGIC {
        return Err(KernelError::InvalidMagic);
    }
    Ok(LittleEndian::read_u64(&buf[8..16]))
}
