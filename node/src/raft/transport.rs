// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Moving Raft messages between nodes.
//!
//! Delivery is best effort. Raft retries through heartbeats, so a
//! transport may drop, delay or reorder messages.

use super::message::Envelope;
use super::node::RaftHandle;
use crate::config::NodeId;
use crate::network::PeerClient;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

pub const MESSAGE_PATH: &str = "/v1/raft/message";

pub trait RaftTransport: Send + Sync + 'static {
    fn send(&self, envelope: Envelope);
}

#[derive(Default)]
struct RouterInner {
    inboxes: HashMap<NodeId, RaftHandle>,
    /// Directed links that drop everything.
    cut: BTreeSet<(NodeId, NodeId)>,
}

/// In-process transport with fault injection.
#[derive(Clone, Default)]
pub struct MemoryRouter {
    inner: Arc<Mutex<RouterInner>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, handle: RaftHandle) {
        self.lock().inboxes.insert(handle.id(), handle);
    }

    /// Cut `id` off from every other node.
    pub fn isolate(&self, id: NodeId) {
        let mut inner = self.lock();
        let others: Vec<NodeId> = inner.inboxes.keys().copied().filter(|o| *o != id).collect();
        for other in others {
            inner.cut.insert((id, other));
            inner.cut.insert((other, id));
        }
    }

    /// Cut every link between groups `a` and `b`.
    pub fn partition(&self, a: &[NodeId], b: &[NodeId]) {
        let mut inner = self.lock();
        for x in a {
            for y in b {
                inner.cut.insert((*x, *y));
                inner.cut.insert((*y, *x));
            }
        }
    }

    pub fn heal(&self) {
        self.lock().cut.clear();
    }
}

impl RaftTransport for MemoryRouter {
    fn send(&self, envelope: Envelope) {
        let target = {
            let inner = self.lock();
            if inner.cut.contains(&(envelope.from, envelope.to)) {
                return;
            }
            inner.inboxes.get(&envelope.to).cloned()
        };
        if let Some(handle) = target {
            handle.deliver(envelope);
        }
    }
}

/// Transport over the peers' HTTP endpoints.
pub struct HttpTransport {
    peers: BTreeMap<NodeId, PeerClient>,
}

impl HttpTransport {
    pub fn new(peers: BTreeMap<NodeId, PeerClient>) -> Self {
        Self { peers }
    }
}

impl RaftTransport for HttpTransport {
    fn send(&self, envelope: Envelope) {
        let Some(peer) = self.peers.get(&envelope.to).cloned() else {
            tracing::warn!(to = envelope.to, "No address for Raft peer");
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = peer.notify(MESSAGE_PATH, &envelope).await {
                tracing::trace!(to = envelope.to, kind = envelope.message.kind(), error = %e, "Raft message dropped");
            }
        });
    }
}
