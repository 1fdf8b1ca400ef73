// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Message authentication for replicas and clients.
//!
//! Each node's key is derived with BLAKE3 from a secret the cluster shares
//! and the node id, and messages carry a keyed BLAKE3 MAC.

use super::message::{BftMessage, SignedMessage};
use crate::config::NodeId;
use serde::{Deserialize, Serialize};

const KEY_CONTEXT: &str = "notary-node 2025 bft replica message key";

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub [u8; 32]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

pub trait Signer: Send + Sync {
    fn id(&self) -> NodeId;

    fn sign(&self, bytes: &[u8]) -> Signature;

    fn verify(&self, from: NodeId, bytes: &[u8], signature: &Signature) -> bool;

    fn sign_message(&self, message: BftMessage) -> SignedMessage {
        let signature = self.sign(&SignedMessage::signing_bytes(self.id(), &message));
        SignedMessage { from: self.id(), message, signature }
    }

    fn verify_message(&self, signed: &SignedMessage) -> bool {
        let bytes = SignedMessage::signing_bytes(signed.from, &signed.message);
        self.verify(signed.from, &bytes, &signed.signature)
    }
}

pub struct KeyedSigner {
    id: NodeId,
    secret: Vec<u8>,
    key: [u8; 32],
}

impl KeyedSigner {
    pub fn new(id: NodeId, secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref().to_vec();
        let key = derive(&secret, id);
        Self { id, secret, key }
    }
}

fn derive(secret: &[u8], id: NodeId) -> [u8; 32] {
    let mut material = Vec::with_capacity(secret.len() + 8);
    material.extend_from_slice(secret);
    material.extend_from_slice(&id.to_le_bytes());
    blake3::derive_key(KEY_CONTEXT, &material)
}

impl Signer for KeyedSigner {
    fn id(&self) -> NodeId {
        self.id
    }

    fn sign(&self, bytes: &[u8]) -> Signature {
        Signature(*blake3::keyed_hash(&self.key, bytes).as_bytes())
    }

    fn verify(&self, from: NodeId, bytes: &[u8], signature: &Signature) -> bool {
        let key = if from == self.id { self.key } else { derive(&self.secret, from) };
        // blake3::Hash equality is constant time
        blake3::keyed_hash(&key, bytes) == blake3::Hash::from(signature.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_kernel::SecureHash;

    fn prepare() -> BftMessage {
        BftMessage::Prepare { view: 0, seq: 1, digest: SecureHash::hash_of(b"p") }
    }

    #[test]
    fn test_signed_message_verifies_across_nodes() {
        let a = KeyedSigner::new(1, "secret");
        let b = KeyedSigner::new(2, "secret");
        let signed = a.sign_message(prepare());
        assert!(b.verify_message(&signed));
    }

    #[test]
    fn test_forged_sender_rejected() {
        let a = KeyedSigner::new(1, "secret");
        let b = KeyedSigner::new(2, "secret");
        let mut signed = a.sign_message(prepare());
        signed.from = 3;
        assert!(!b.verify_message(&signed));
    }

    #[test]
    fn test_other_secret_rejected() {
        let a = KeyedSigner::new(1, "secret");
        let outsider = KeyedSigner::new(1, "other");
        let signed = outsider.sign_message(prepare());
        assert!(!a.verify_message(&signed));
    }

    #[test]
    fn test_tampered_message_rejected() {
        let a = KeyedSigner::new(1, "secret");
        let mut signed = a.sign_message(prepare());
        signed.message = BftMessage::Prepare { view: 0, seq: 2, digest: SecureHash::hash_of(b"p") };
        assert!(!a.verify_message(&signed));
    }
}
