// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Commit decision shared by every backend.
//!
//! The decision only reads. Backends apply an `Accept` themselves, inside
//! whatever atomic unit their storage offers (a lock, a database
//! transaction, or the application of one replicated log entry).
//!
//! # Order of checks
//! 1. Already notarised transaction whose inputs it already owns → replay success
//! 2. Time window against `now` (commit log untouched on failure)
//! 3. Reference states consumed by another transaction
//! 4. Input states consumed by another transaction
//!
//! A notarised transaction that comes back with an input it does not own
//! yet is decided like a new request, so that input is checked and claimed.
//!
//! When a state is both a reference and an input of the same request and
//! another transaction consumed it, the input conflict is reported.

use crate::request::CommitRequest;
use crate::result::{NotaryError, StateConsumptionDetails, UniquenessResult};
use crate::types::{ConsumingTxInfo, SecureHash, StateRef};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

/// Read access to a commit log.
pub trait CommitIndex {
    type Error;

    /// Transaction that consumed `state`, if any.
    fn consumer_of(&self, state: &StateRef) -> Result<Option<SecureHash>, Self::Error>;

    /// Whether `tx_id` was ever notarised successfully.
    fn is_notarised(&self, tx_id: &SecureHash) -> Result<bool, Self::Error>;

    /// Whether any output of `tx_id` has been consumed. Indexes that cannot
    /// answer cheaply say `true`.
    fn has_consumed_outputs(&self, _tx_id: &SecureHash) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// A previous request for the same transaction already succeeded.
    AlreadyNotarised,
    /// No conflicts. `inserts` holds the inputs not yet in the log.
    /// `fresh_outputs` is set when this is the first notarisation of the
    /// transaction and none of its outputs were consumed beforehand.
    Accept { inserts: Vec<(StateRef, ConsumingTxInfo)>, fresh_outputs: bool },
    Reject(NotaryError),
}

impl Decision {
    pub fn fresh_outputs(&self) -> bool {
        matches!(self, Decision::Accept { fresh_outputs: true, .. })
    }

    pub fn to_result(&self) -> UniquenessResult {
        match self {
            Decision::AlreadyNotarised | Decision::Accept { .. } => UniquenessResult::Success,
            Decision::Reject(e) => UniquenessResult::Failure(e.clone()),
        }
    }

    pub fn into_result(self) -> UniquenessResult {
        match self {
            Decision::AlreadyNotarised | Decision::Accept { .. } => UniquenessResult::Success,
            Decision::Reject(e) => UniquenessResult::Failure(e),
        }
    }
}

/// Decide `request` against `index` at service time `now`.
pub fn decide<I>(request: &CommitRequest, now: u64, index: &I) -> Result<Decision, I::Error>
where
    I: CommitIndex + ?Sized,
{
    let notarised = index.is_notarised(&request.tx_id)?;
    if notarised && owns_all_inputs(request, index)? {
        return Ok(Decision::AlreadyNotarised);
    }

    if let Some(window) = request.time_window {
        if !window.contains(now) {
            return Ok(Decision::Reject(NotaryError::TimeWindowInvalid {
                current_time: now,
                tx_time_window: window,
            }));
        }
    }

    let mut conflicts = BTreeMap::new();

    for reference in &request.references {
        if let Some(consumer) = index.consumer_of(reference)? {
            if consumer != request.tx_id {
                conflicts.insert(*reference, StateConsumptionDetails::reference(consumer));
            }
        }
    }

    let mut inserts = Vec::new();
    let mut seen = BTreeSet::new();
    for (position, state) in request.states.iter().enumerate() {
        if !seen.insert(*state) {
            continue;
        }
        match index.consumer_of(state)? {
            Some(consumer) if consumer == request.tx_id => {}
            Some(consumer) => {
                conflicts.insert(*state, StateConsumptionDetails::input(consumer));
            }
            None => inserts.push((
                *state,
                ConsumingTxInfo {
                    consuming_tx: request.tx_id,
                    input_index: position as u32,
                    requesting_party: request.caller.clone(),
                },
            )),
        }
    }

    if !conflicts.is_empty() {
        return Ok(Decision::Reject(NotaryError::Conflict {
            tx_id: request.tx_id,
            consumed_states: conflicts,
        }));
    }

    let fresh_outputs = !notarised && !index.has_consumed_outputs(&request.tx_id)?;
    Ok(Decision::Accept { inserts, fresh_outputs })
}

fn owns_all_inputs<I>(request: &CommitRequest, index: &I) -> Result<bool, I::Error>
where
    I: CommitIndex + ?Sized,
{
    for state in &request.states {
        if index.consumer_of(state)? != Some(request.tx_id) {
            return Ok(false);
        }
    }
    Ok(true)
}
