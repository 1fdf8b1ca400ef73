// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Byzantine-fault-tolerant backend.
//!
//! `n >= 3f + 1` replicas order requests with a PBFT-style protocol and
//! each applies them to its own commit log. Clients accept an answer once
//! a quorum of replicas sent equivalent signed replies.

pub mod message;
pub mod node;
pub mod provider;
pub mod quorum;
pub mod replica;
pub mod signer;
pub mod transport;

pub use message::{BftEnvelope, BftMessage, SignedMessage};
pub use node::{BftHandle, BftNode};
pub use provider::{BftOutcome, BftProvider};
pub use quorum::{reply_quorum, QuorumCollector};
pub use replica::{BftReplica, BftStatus};
pub use signer::{KeyedSigner, Signature, Signer};
pub use transport::{BftHttpTransport, BftRouter, BftTransport, ReplyDesk};

use crate::config::BftSettings;
use crate::errors::ProviderError;
use notary_kernel::SecureHash;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BftError {
    #[error("Only {received} of {quorum} matching replies for {tx_id} before timeout")]
    NoQuorum { received: usize, quorum: usize, tx_id: SecureHash },
    #[error("BFT replica stopped")]
    Stopped,
}

impl From<BftError> for ProviderError {
    fn from(e: BftError) -> Self {
        match e {
            BftError::Stopped => ProviderError::Stopped,
            other => ProviderError::NoQuorum(other.to_string()),
        }
    }
}

/// Ticks of `tick_interval` a backup waits on a stalled primary.
pub fn timeout_ticks(settings: &BftSettings) -> u32 {
    let tick = settings.tick_interval.as_millis().max(1);
    (settings.view_change_timeout.as_millis() / tick).max(1) as u32
}
