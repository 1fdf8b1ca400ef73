// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Opaque caller identity and request signature. Neither is verified here.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Party(pub String);

impl Party {
    pub fn new(name: impl Into<String>) -> Self {
        Party(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Party({})", self.0)
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestSignature(pub Vec<u8>);

impl RequestSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
