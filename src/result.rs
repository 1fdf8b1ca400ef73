// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Commit outcomes.
//!
//! Conflicts and time-window failures are ordinary values here, not errors:
//! they are the expected answer to a uniqueness check. Infrastructure
//! failures live in the node crate.

use crate::types::{SecureHash, StateRef, TimeWindow};
use alloc::collections::BTreeMap;
use core::fmt;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumedStateType {
    InputState,
    ReferenceInputState,
}

/// What a conflict report reveals about the earlier consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConsumptionDetails {
    pub hash_of_transaction_id: SecureHash,
    pub kind: ConsumedStateType,
}

impl StateConsumptionDetails {
    pub fn input(consuming_tx: SecureHash) -> Self {
        Self { hash_of_transaction_id: consuming_tx.rehash(), kind: ConsumedStateType::InputState }
    }

    pub fn reference(consuming_tx: SecureHash) -> Self {
        Self {
            hash_of_transaction_id: consuming_tx.rehash(),
            kind: ConsumedStateType::ReferenceInputState,
        }
    }

    /// True when these details point at `tx_id`.
    pub fn cites(&self, tx_id: &SecureHash) -> bool {
        self.hash_of_transaction_id == tx_id.rehash()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotaryError {
    /// One or more requested states were consumed by another transaction.
    Conflict {
        tx_id: SecureHash,
        #[serde(with = "pairs")]
        consumed_states: BTreeMap<StateRef, StateConsumptionDetails>,
    },
    /// The service clock was outside the requested window.
    TimeWindowInvalid {
        current_time: u64,
        tx_time_window: TimeWindow,
    },
}

impl NotaryError {
    /// Discriminant used when replicas vote on a failure.
    pub fn kind(&self) -> &'static str {
        match self {
            NotaryError::Conflict { .. } => "Conflict",
            NotaryError::TimeWindowInvalid { .. } => "TimeWindowInvalid",
        }
    }
}

impl fmt::Display for NotaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotaryError::Conflict { tx_id, consumed_states } => {
                write!(f, "transaction {} conflicts on {} state(s)", tx_id, consumed_states.len())
            }
            NotaryError::TimeWindowInvalid { current_time, tx_time_window } => write!(
                f,
                "current time {} is outside time window {:?}..{:?}",
                current_time, tx_time_window.from_time, tx_time_window.until_time
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UniquenessResult {
    Success,
    Failure(NotaryError),
}

impl UniquenessResult {
    pub fn is_success(&self) -> bool {
        matches!(self, UniquenessResult::Success)
    }

    pub fn error(&self) -> Option<&NotaryError> {
        match self {
            UniquenessResult::Success => None,
            UniquenessResult::Failure(e) => Some(e),
        }
    }

    /// Conflict map, if this is a conflict.
    pub fn conflicts(&self) -> Option<&BTreeMap<StateRef, StateConsumptionDetails>> {
        match self {
            UniquenessResult::Failure(NotaryError::Conflict { consumed_states, .. }) => {
                Some(consumed_states)
            }
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            UniquenessResult::Success => "success",
            UniquenessResult::Failure(NotaryError::Conflict { .. }) => "conflict",
            UniquenessResult::Failure(NotaryError::TimeWindowInvalid { .. }) => "time_window_invalid",
        }
    }
}

/// Maps keyed by `StateRef` travel as sequences of pairs so that formats
/// limited to string keys (JSON) can carry them.
pub(crate) mod pairs {
    use alloc::collections::BTreeMap;
    use alloc::vec::Vec;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        let entries: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
