// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Raft wire messages.

use crate::config::NodeId;
use notary_kernel::{Command, UniquenessResult};
use serde::{Deserialize, Serialize};

pub type Term = u64;
pub type LogIndex = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Command,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    RequestVote {
        term: Term,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    RequestVoteResponse {
        term: Term,
        granted: bool,
    },
    AppendEntries {
        term: Term,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<Entry>,
        leader_commit: LogIndex,
    },
    AppendEntriesResponse {
        term: Term,
        success: bool,
        /// On success the last index now matching the leader; on failure
        /// the follower's hint of where matching may resume.
        match_index: LogIndex,
    },
    InstallSnapshot {
        term: Term,
        last_index: LogIndex,
        last_term: Term,
        data: Vec<u8>,
        /// CRC32 of `data`.
        checksum: u32,
    },
    InstallSnapshotResponse {
        term: Term,
        last_index: LogIndex,
    },
}

impl Message {
    pub fn term(&self) -> Term {
        match self {
            Message::RequestVote { term, .. }
            | Message::RequestVoteResponse { term, .. }
            | Message::AppendEntries { term, .. }
            | Message::AppendEntriesResponse { term, .. }
            | Message::InstallSnapshot { term, .. }
            | Message::InstallSnapshotResponse { term, .. } => *term,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestVote { .. } => "RequestVote",
            Message::RequestVoteResponse { .. } => "RequestVoteResponse",
            Message::AppendEntries { .. } => "AppendEntries",
            Message::AppendEntriesResponse { .. } => "AppendEntriesResponse",
            Message::InstallSnapshot { .. } => "InstallSnapshot",
            Message::InstallSnapshotResponse { .. } => "InstallSnapshotResponse",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message,
}

/// Answer to a proposal made to one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposeOutcome {
    /// Committed by a majority and applied; the state machine's answer.
    Applied(UniquenessResult),
    NotLeader { leader_hint: Option<NodeId> },
    /// The entry's fate is unknown (leadership lost, timeout). Retrying
    /// the same request is safe.
    Unknown(String),
}
