// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod commit_tests;
pub mod serde_tests;

use crate::types::{Party, SecureHash, StateRef};

pub(crate) fn tx(n: u8) -> SecureHash {
    SecureHash::hash_of(&[n])
}

pub(crate) fn state(n: u8, index: u32) -> StateRef {
    StateRef::new(SecureHash::hash_of(&[0xAA, n]), index)
}

pub(crate) fn alice() -> Party {
    Party::new("O=Alice,L=London,C=GB")
}
