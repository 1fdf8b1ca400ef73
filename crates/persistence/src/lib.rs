// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable files for notary nodes.
//!
//! - `log`: append-only, CRC64-framed record log (replicated log, request log)
//! - `record`: single checksummed record replaced atomically (Raft hard state)
//! - `snapshot`: commit-log snapshot files
pub mod error;
pub mod log;
pub mod record;
pub mod snapshot;

pub use error::{PersistenceError, Result};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// bincode (standard config) used for every typed payload on disk.
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| PersistenceError::Codec(e.to_string()))
}

pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| PersistenceError::Codec(e.to_string()))?;
    Ok(value)
}
