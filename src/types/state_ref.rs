// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Pointers to transaction outputs and the record of who consumed them.

use crate::types::{Party, SecureHash};
use core::fmt;
use serde::{Deserialize, Serialize};

/// One output of one transaction. Ordered by `(txhash, index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub txhash: SecureHash,
    pub index: u32,
}

impl StateRef {
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        Self { txhash, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash, self.index)
    }
}

/// Commit-log value: the transaction that consumed a state, the position of
/// the state in that transaction's inputs, and the party that asked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumingTxInfo {
    pub consuming_tx: SecureHash,
    pub input_index: u32,
    pub requesting_party: Party,
}
