// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use alloc::string::String;
use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Value could not be encoded.
    Encoding(String),
    /// Bytes could not be decoded into a value.
    Decoding(String),
    /// Snapshot header carries the wrong magic bytes.
    InvalidMagic,
    /// Snapshot written by an unknown format version.
    UnsupportedVersion(u32),
    /// Buffer shorter than the fixed header.
    Truncated { expected: usize, found: usize },
    /// Decoded state does not hash to the value recorded in the header.
    StateHashMismatch,
    /// Hex string is not a 32 byte digest.
    InvalidHash,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Encoding(msg) => write!(f, "encoding failed: {}", msg),
            KernelError::Decoding(msg) => write!(f, "decoding failed: {}", msg),
            KernelError::InvalidMagic => write!(f, "invalid snapshot magic"),
            KernelError::UnsupportedVersion(v) => write!(f, "unsupported snapshot version {}", v),
            KernelError::Truncated { expected, found } => {
                write!(f, "buffer truncated: expected at least {} bytes, found {}", expected, found)
            }
            KernelError::StateHashMismatch => write!(f, "snapshot state hash mismatch"),
            KernelError::InvalidHash => write!(f, "invalid secure hash"),
        }
    }
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
pub type Result<T> = KernelResult<T>;
