// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replicated command language.
//!
//! Every mutation of a replicated commit log is one `Command`. Replicas that
//! apply the same commands in the same order reach the same state, so a
//! command carries everything apply needs, including the request time.

use crate::request::CommitRequest;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Run the commit decision for `request` as of `request_time`.
    Commit {
        request: CommitRequest,
        request_time: u64,
    },
    /// Fills a log slot without touching state (leader term start,
    /// sequence numbers abandoned during a view change).
    Noop,
}

impl Command {
    pub fn command_type(&self) -> &'static str {
        match self {
            Command::Commit { .. } => "Commit",
            Command::Noop => "Noop",
        }
    }
}
