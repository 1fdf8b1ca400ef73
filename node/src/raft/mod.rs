// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Crash-fault-tolerant backend: the commit log replicated with Raft.
//!
//! `core` is the pure protocol, `node` drives it on a tokio task, and
//! `provider` turns proposals into `UniquenessProvider` answers by chasing
//! the current leader.

pub mod core;
pub mod log;
pub mod message;
pub mod node;
pub mod provider;
pub mod storage;
pub mod transport;

pub use self::core::{RaftCore, RaftStatus, Role};
pub use message::{Envelope, ProposeOutcome};
pub use node::{RaftHandle, RaftNode};
pub use provider::{LocalRoutes, PeerRoutes, ProposalRoutes, RaftProvider};
pub use storage::{FileStorage, MemoryStorage, RaftStorage};
pub use transport::{HttpTransport, MemoryRouter, RaftTransport};

use crate::errors::ProviderError;
use notary_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
    #[error("Snapshot error: {0}")]
    Snapshot(String),
    #[error("Raft node stopped")]
    Stopped,
}

impl From<RaftError> for ProviderError {
    fn from(e: RaftError) -> Self {
        match e {
            RaftError::Stopped => ProviderError::Stopped,
            other => ProviderError::Storage(other.to_string()),
        }
    }
}
