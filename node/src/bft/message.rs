// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! BFT wire messages.

use super::signer::Signature;
use crate::config::NodeId;
use notary_kernel::{Command, CommitRequest, NotaryError, SecureHash};
use serde::{Deserialize, Serialize};

pub type View = u64;
pub type Seq = u64;

/// A commit request as broadcast by a client node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Node that collects the replies.
    pub client: NodeId,
    /// Distinguishes retries of the same commit from new submissions.
    pub nonce: u64,
    pub request: CommitRequest,
}

impl ClientRequest {
    pub fn id(&self) -> SecureHash {
        digest_of(self)
    }
}

/// What the primary orders at one sequence number. `request: None` is a
/// null request filling a gap left by a view change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub request: Option<ClientRequest>,
    pub request_time: u64,
}

impl Proposal {
    pub fn null() -> Self {
        Self { request: None, request_time: 0 }
    }

    pub fn digest(&self) -> SecureHash {
        digest_of(self)
    }

    pub fn command(&self) -> Command {
        match &self.request {
            Some(req) => Command::Commit { request: req.request.clone(), request_time: self.request_time },
            None => Command::Noop,
        }
    }
}

/// Evidence that `proposal` prepared at (`view`, `seq`): 2f signed
/// prepares from backups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCert {
    pub view: View,
    pub seq: Seq,
    pub proposal: Proposal,
    pub prepares: Vec<SignedMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyBody {
    /// The replica notarised the transaction; signature over its id.
    Signature(Signature),
    Error(NotaryError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BftMessage {
    Request(ClientRequest),
    PrePrepare {
        view: View,
        seq: Seq,
        proposal: Proposal,
    },
    Prepare {
        view: View,
        seq: Seq,
        digest: SecureHash,
    },
    Commit {
        view: View,
        seq: Seq,
        digest: SecureHash,
    },
    ViewChange {
        new_view: View,
        last_executed: Seq,
        prepared: Vec<PreparedCert>,
    },
    NewView {
        view: View,
        view_changes: Vec<SignedMessage>,
        pre_prepares: Vec<(Seq, Proposal)>,
    },
    Reply {
        view: View,
        request_id: SecureHash,
        tx_id: SecureHash,
        body: ReplyBody,
    },
}

impl BftMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            BftMessage::Request(_) => "Request",
            BftMessage::PrePrepare { .. } => "PrePrepare",
            BftMessage::Prepare { .. } => "Prepare",
            BftMessage::Commit { .. } => "Commit",
            BftMessage::ViewChange { .. } => "ViewChange",
            BftMessage::NewView { .. } => "NewView",
            BftMessage::Reply { .. } => "Reply",
        }
    }
}

/// A message and its sender's signature over (`from`, `message`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub from: NodeId,
    pub message: BftMessage,
    pub signature: Signature,
}

impl SignedMessage {
    pub fn signing_bytes(from: NodeId, message: &BftMessage) -> Vec<u8> {
        // Serialising these plain data types does not fail
        bincode::serde::encode_to_vec((from, message), bincode::config::standard()).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BftEnvelope {
    pub to: NodeId,
    pub signed: SignedMessage,
}

fn digest_of<T: Serialize>(value: &T) -> SecureHash {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard()).unwrap_or_default();
    SecureHash::hash_of(&bytes)
}
