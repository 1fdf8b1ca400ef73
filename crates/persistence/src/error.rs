// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use notary_kernel::error::KernelError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("File does not start with a commit log or snapshot magic")]
    InvalidMagic,
    #[error("Unsupported file version {0}")]
    UnsupportedVersion(u32),
    #[error("Frame checksum mismatch: stored {expected:#018x}, computed {found:#018x}")]
    ChecksumMismatch {
        expected: u64,
        found: u64,
    },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Malformed frame: {0}")]
    InvalidFormat(String),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Snapshot state error: {0}")]
    State(KernelError),
}

impl From<KernelError> for PersistenceError {
    fn from(e: KernelError) -> Self {
        PersistenceError::State(e)
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
