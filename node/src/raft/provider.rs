// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Raft-backed `UniquenessProvider`.
//!
//! A commit is proposed to the node believed to lead. Followers answer with
//! a leader hint, which the provider follows up to `max_redirects` times.
//! Re-proposing after an unknown outcome is safe: a transaction that
//! already committed is answered from the notarised set.

use super::message::ProposeOutcome;
use super::node::RaftHandle;
use crate::config::{NodeId, RaftSettings};
use crate::errors::ProviderError;
use crate::network::PeerClient;
use crate::provider::{CommitFuture, UniquenessProvider};
use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::increment_counter;
use notary_kernel::CommitRequest;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const PROPOSE_PATH: &str = "/v1/raft/propose";

/// How a proposal reaches a given cluster member.
pub trait ProposalRoutes: Send + Sync {
    fn members(&self) -> Vec<NodeId>;

    fn propose(
        &self,
        node: NodeId,
        request: CommitRequest,
    ) -> BoxFuture<'_, Result<ProposeOutcome, ProviderError>>;
}

/// Every member runs in this process.
#[derive(Clone, Default)]
pub struct LocalRoutes {
    handles: BTreeMap<NodeId, RaftHandle>,
}

impl LocalRoutes {
    pub fn new(handles: impl IntoIterator<Item = RaftHandle>) -> Self {
        Self { handles: handles.into_iter().map(|h| (h.id(), h)).collect() }
    }
}

impl ProposalRoutes for LocalRoutes {
    fn members(&self) -> Vec<NodeId> {
        self.handles.keys().copied().collect()
    }

    fn propose(
        &self,
        node: NodeId,
        request: CommitRequest,
    ) -> BoxFuture<'_, Result<ProposeOutcome, ProviderError>> {
        async move {
            let handle = self
                .handles
                .get(&node)
                .ok_or_else(|| ProviderError::Unavailable(format!("unknown raft member {}", node)))?;
            Ok::<_, ProviderError>(handle.propose(request).await)
        }
        .boxed()
    }
}

/// The local node directly, other members over HTTP.
pub struct PeerRoutes {
    local: RaftHandle,
    peers: BTreeMap<NodeId, PeerClient>,
}

impl PeerRoutes {
    pub fn new(local: RaftHandle, peers: BTreeMap<NodeId, PeerClient>) -> Self {
        Self { local, peers }
    }
}

impl ProposalRoutes for PeerRoutes {
    fn members(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.keys().copied().collect();
        ids.push(self.local.id());
        ids.sort_unstable();
        ids
    }

    fn propose(
        &self,
        node: NodeId,
        request: CommitRequest,
    ) -> BoxFuture<'_, Result<ProposeOutcome, ProviderError>> {
        async move {
            if node == self.local.id() {
                return Ok::<_, ProviderError>(self.local.propose(request).await);
            }
            let peer = self
                .peers
                .get(&node)
                .ok_or_else(|| ProviderError::Unavailable(format!("unknown raft member {}", node)))?;
            peer.call(PROPOSE_PATH, &request).await
        }
        .boxed()
    }
}

pub struct RaftProvider {
    routes: Arc<dyn ProposalRoutes>,
    settings: RaftSettings,
    /// Last node that answered as leader; 0 when unknown.
    leader: AtomicU64,
    members: Vec<NodeId>,
}

impl RaftProvider {
    pub fn new(routes: Arc<dyn ProposalRoutes>, settings: RaftSettings) -> Self {
        let members = routes.members();
        Self { routes, settings, leader: AtomicU64::new(0), members }
    }

    fn first_target(&self) -> Option<NodeId> {
        match self.leader.load(Ordering::Relaxed) {
            0 => self.members.first().copied(),
            id => Some(id),
        }
    }

    fn next_member(&self, after: NodeId) -> NodeId {
        let pos = self.members.iter().position(|m| *m == after).unwrap_or(0);
        self.members[(pos + 1) % self.members.len()]
    }

    /// Wait roughly one election before trying again.
    async fn pause(&self) {
        let ticks = self.settings.election_ticks.0.max(1);
        tokio::time::sleep(self.settings.tick_interval * ticks).await;
    }

    async fn commit_inner(&self, request: CommitRequest) -> Result<notary_kernel::UniquenessResult, ProviderError> {
        let Some(mut target) = self.first_target() else {
            return Err(ProviderError::Unavailable("raft cluster has no members".to_string()));
        };
        let mut last_reason = String::from("no attempt made");

        for attempt in 0..=self.settings.max_redirects {
            let answer =
                tokio::time::timeout(self.settings.proposal_timeout, self.routes.propose(target, request.clone()))
                    .await;

            match answer {
                Ok(Ok(ProposeOutcome::Applied(result))) => {
                    self.leader.store(target, Ordering::Relaxed);
                    return Ok(result);
                }
                Ok(Ok(ProposeOutcome::NotLeader { leader_hint: Some(hint) })) if hint != target => {
                    tracing::debug!(from = target, to = hint, attempt, "Following leader hint");
                    increment_counter!("notary_raft_redirects_total");
                    target = hint;
                    last_reason = format!("redirected to {}", hint);
                }
                Ok(Ok(ProposeOutcome::NotLeader { .. })) => {
                    last_reason = "no leader elected".to_string();
                    target = self.next_member(target);
                    self.pause().await;
                }
                Ok(Ok(ProposeOutcome::Unknown(reason))) => {
                    tracing::debug!(node = target, attempt, reason = %reason, "Proposal outcome unknown, retrying");
                    last_reason = reason;
                    self.pause().await;
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::debug!(node = target, attempt, error = %e, "Raft member unreachable");
                    last_reason = e.to_string();
                    target = self.next_member(target);
                    self.pause().await;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_reason = format!("node {} did not answer in time", target);
                    target = self.next_member(target);
                }
            }
        }

        self.leader.store(0, Ordering::Relaxed);
        Err(ProviderError::Unavailable(format!(
            "no raft leader reachable after {} attempts: {}",
            self.settings.max_redirects + 1,
            last_reason
        )))
    }
}

impl UniquenessProvider for RaftProvider {
    fn commit(&self, request: CommitRequest) -> CommitFuture<'_> {
        self.commit_inner(request).boxed()
    }

    fn name(&self) -> &'static str {
        "raft"
    }
}
