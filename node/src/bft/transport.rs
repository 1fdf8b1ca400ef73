// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Moving BFT messages between replicas and clients.
//!
//! Replies go to the addressee's `ReplyDesk`, everything else to its
//! replica.

use super::message::{BftEnvelope, BftMessage, SignedMessage};
use super::node::BftHandle;
use crate::config::NodeId;
use crate::network::PeerClient;
use notary_kernel::SecureHash;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::mpsc;

pub const MESSAGE_PATH: &str = "/v1/bft/message";

pub trait BftTransport: Send + Sync + 'static {
    fn send(&self, envelope: BftEnvelope);
}

/// Routes replies to the client call waiting for them.
#[derive(Default)]
pub struct ReplyDesk {
    waiting: Mutex<HashMap<SecureHash, mpsc::UnboundedSender<SignedMessage>>>,
}

impl ReplyDesk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SecureHash, mpsc::UnboundedSender<SignedMessage>>> {
        self.waiting.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn deliver(&self, signed: SignedMessage) {
        let BftMessage::Reply { request_id, .. } = &signed.message else {
            return;
        };
        if let Some(tx) = self.lock().get(request_id) {
            let _ = tx.send(signed);
        }
    }

    pub(crate) fn register(self: &Arc<Self>, request_id: SecureHash) -> Registration {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(request_id, tx);
        Registration { desk: Arc::clone(self), request_id, replies: rx }
    }
}

/// Open reply slot; removed from the desk on drop.
pub(crate) struct Registration {
    desk: Arc<ReplyDesk>,
    request_id: SecureHash,
    pub(crate) replies: mpsc::UnboundedReceiver<SignedMessage>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.desk.lock().remove(&self.request_id);
    }
}

#[derive(Default)]
struct RouterInner {
    replicas: HashMap<NodeId, BftHandle>,
    desks: HashMap<NodeId, Arc<ReplyDesk>>,
    down: BTreeSet<NodeId>,
    /// Senders that stay silent but still receive.
    muted: BTreeSet<NodeId>,
}

/// In-process transport with crash injection.
#[derive(Clone, Default)]
pub struct BftRouter {
    inner: Arc<Mutex<RouterInner>>,
}

impl BftRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RouterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_replica(&self, handle: BftHandle) {
        self.lock().replicas.insert(handle.id(), handle);
    }

    pub fn register_desk(&self, id: NodeId, desk: Arc<ReplyDesk>) {
        self.lock().desks.insert(id, desk);
    }

    /// Drop every message to or from `id`.
    pub fn crash(&self, id: NodeId) {
        self.lock().down.insert(id);
    }

    /// Drop messages sent by `id` but keep delivering to it.
    pub fn mute(&self, id: NodeId) {
        self.lock().muted.insert(id);
    }

    pub fn restore(&self, id: NodeId) {
        let mut inner = self.lock();
        inner.down.remove(&id);
        inner.muted.remove(&id);
    }
}

impl BftTransport for BftRouter {
    fn send(&self, envelope: BftEnvelope) {
        let inner = self.lock();
        let from = envelope.signed.from;
        if inner.down.contains(&envelope.to) || inner.down.contains(&from) || inner.muted.contains(&from) {
            return;
        }
        if matches!(envelope.signed.message, BftMessage::Reply { .. }) {
            if let Some(desk) = inner.desks.get(&envelope.to) {
                desk.deliver(envelope.signed);
            }
        } else if let Some(replica) = inner.replicas.get(&envelope.to) {
            replica.deliver(envelope.signed);
        }
    }
}

/// Transport over the members' HTTP endpoints.
pub struct BftHttpTransport {
    peers: BTreeMap<NodeId, PeerClient>,
    /// Messages addressed to this node skip the network.
    local_id: NodeId,
    local_replica: OnceLock<BftHandle>,
    local_desk: Arc<ReplyDesk>,
}

impl BftHttpTransport {
    pub fn new(local_id: NodeId, peers: BTreeMap<NodeId, PeerClient>, local_desk: Arc<ReplyDesk>) -> Self {
        Self { peers, local_id, local_replica: OnceLock::new(), local_desk }
    }

    /// The replica is started with this transport, so it is attached after.
    pub fn attach_replica(&self, handle: BftHandle) {
        if self.local_replica.set(handle).is_err() {
            tracing::warn!("Local BFT replica already attached");
        }
    }
}

impl BftTransport for BftHttpTransport {
    fn send(&self, envelope: BftEnvelope) {
        if envelope.to == self.local_id {
            if matches!(envelope.signed.message, BftMessage::Reply { .. }) {
                self.local_desk.deliver(envelope.signed);
            } else if let Some(replica) = self.local_replica.get() {
                replica.deliver(envelope.signed);
            } else {
                tracing::warn!("No local replica for BFT message");
            }
            return;
        }
        let Some(peer) = self.peers.get(&envelope.to).cloned() else {
            tracing::warn!(to = envelope.to, "No address for BFT peer");
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = peer.notify(MESSAGE_PATH, &envelope).await {
                tracing::trace!(to = envelope.to, kind = envelope.signed.message.kind(), error = %e, "BFT message dropped");
            }
        });
    }
}
