// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Commit-log snapshots: header, bincode body, canonical state hash.
pub mod encode;
pub mod decode;
pub mod blake3;

pub use self::blake3::hash_state_blake3;
pub use decode::decode_state;
pub use encode::encode_state;

pub const MAGIC: &[u8; 4] = b"NTRY";
pub const SCHEMA_VERSION: u32 = 1;
/// magic + version + applied + state hash
pub const HEADER_LEN: usize = 4 + 4 + 8 + 32;
