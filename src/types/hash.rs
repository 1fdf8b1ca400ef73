// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! 32 byte BLAKE3 digests used as transaction ids.

use crate::error::{KernelError, Result};
use alloc::string::String;
use core::fmt;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Transaction id, or any other digest handled by the core.
///
/// Human-readable encodings (JSON) carry the digest as lowercase hex;
/// binary encodings carry the raw 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct SecureHash(pub [u8; 32]);

impl SecureHash {
    pub const ZERO: SecureHash = SecureHash([0u8; 32]);

    /// Digest of arbitrary bytes.
    pub fn hash_of(data: &[u8]) -> Self {
        SecureHash(*blake3::hash(data).as_bytes())
    }

    /// Digest of this digest. Conflict reports expose this instead of the
    /// consuming transaction id itself.
    pub fn rehash(&self) -> Self {
        Self::hash_of(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| KernelError::InvalidHash)?;
        Ok(SecureHash(out))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KernelError::InvalidHash)?;
        Ok(SecureHash(arr))
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight bytes are enough to tell ids apart in logs.
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Serialize for SecureHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for SecureHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            SecureHash::from_hex(&s).map_err(D::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(SecureHash)
        }
    }
}
