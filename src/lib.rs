// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![no_std]

//! notary-kernel: deterministic, no_std core of the uniqueness service.
//!
//! Holds the shared vocabulary (state references, conflicts, time windows),
//! the commit decision every backend runs, and the commit-log state machine
//! that replicated backends apply in log order.

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod error;
pub mod types;
pub mod result;
pub mod request;
pub mod commit;
pub mod state;
pub mod snapshot;

pub use commit::{decide, CommitIndex, Decision};
pub use request::{CommitRequest, RequestRecord};
pub use result::{ConsumedStateType, NotaryError, StateConsumptionDetails, UniquenessResult};
pub use state::command::Command;
pub use state::commit_log::CommitLogState;
pub use types::{ConsumingTxInfo, Party, RequestSignature, SecureHash, StateRef, TimeWindow};

#[cfg(test)]
pub mod tests;
