// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! BFT-backed `UniquenessProvider`.
//!
//! The request is broadcast to every replica and re-broadcast every
//! `view_change_timeout` until a quorum of equivalent replies arrives or
//! `request_timeout` passes. Two `Signature` replies are equivalent; two
//! `Error` replies are equivalent when their error kinds match.

use super::message::{BftEnvelope, BftMessage, ClientRequest, ReplyBody, SignedMessage};
use super::quorum::{reply_quorum, QuorumCollector};
use super::signer::{Signature, Signer};
use super::transport::{BftTransport, ReplyDesk};
use super::BftError;
use crate::config::{BftSettings, NodeId};
use crate::errors::ProviderError;
use crate::provider::{CommitFuture, UniquenessProvider};
use futures::FutureExt;
use metrics::increment_counter;
use notary_kernel::{CommitRequest, NotaryError, UniquenessResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval_at, sleep_until, Instant};

/// Aggregated answer: the result and, on success, the replica signatures
/// over the transaction id that formed the quorum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BftOutcome {
    pub result: UniquenessResult,
    pub signatures: Vec<(NodeId, Signature)>,
}

fn equivalent(a: &ReplyBody, b: &ReplyBody) -> bool {
    match (a, b) {
        (ReplyBody::Signature(_), ReplyBody::Signature(_)) => true,
        (ReplyBody::Error(x), ReplyBody::Error(y)) => x.kind() == y.kind(),
        _ => false,
    }
}

fn aggregate(group: &[(NodeId, ReplyBody)]) -> BftOutcome {
    let errors: Vec<&NotaryError> = group
        .iter()
        .filter_map(|(_, body)| match body {
            ReplyBody::Error(e) => Some(e),
            ReplyBody::Signature(_) => None,
        })
        .collect();

    // Report the error most replicas agree on verbatim
    let most_common = errors
        .iter()
        .copied()
        .max_by_key(|e| errors.iter().filter(|other| **other == *e).count())
        .cloned();

    match most_common {
        Some(error) => BftOutcome { result: UniquenessResult::Failure(error), signatures: Vec::new() },
        None => BftOutcome {
            result: UniquenessResult::Success,
            signatures: group
                .iter()
                .filter_map(|(id, body)| match body {
                    ReplyBody::Signature(sig) => Some((*id, *sig)),
                    ReplyBody::Error(_) => None,
                })
                .collect(),
        },
    }
}

pub struct BftProvider {
    client: NodeId,
    replicas: Vec<NodeId>,
    quorum: usize,
    signer: Arc<dyn Signer>,
    transport: Arc<dyn BftTransport>,
    desk: Arc<ReplyDesk>,
    settings: BftSettings,
    nonce: AtomicU64,
}

impl BftProvider {
    pub fn new(
        signer: Arc<dyn Signer>,
        replicas: Vec<NodeId>,
        max_faulty: usize,
        transport: Arc<dyn BftTransport>,
        desk: Arc<ReplyDesk>,
        settings: BftSettings,
    ) -> Self {
        let quorum = settings.reply_quorum.unwrap_or_else(|| reply_quorum(replicas.len(), max_faulty));
        Self {
            client: signer.id(),
            replicas,
            quorum,
            signer,
            transport,
            desk,
            settings,
            nonce: AtomicU64::new(1),
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    fn broadcast(&self, request: &SignedMessage) {
        for &to in &self.replicas {
            self.transport.send(BftEnvelope { to, signed: request.clone() });
        }
    }

    pub async fn commit_signed(&self, request: CommitRequest) -> Result<BftOutcome, BftError> {
        let tx_id = request.tx_id;
        let request = ClientRequest { client: self.client, nonce: self.nonce.fetch_add(1, Ordering::Relaxed), request };
        let request_id = request.id();

        let mut registration = self.desk.register(request_id);
        let signed = self.signer.sign_message(BftMessage::Request(request));
        self.broadcast(&signed);

        let mut collector = QuorumCollector::new(self.quorum, equivalent);
        let deadline = Instant::now() + self.settings.request_timeout;
        let every = self.settings.view_change_timeout;
        let mut resend = interval_at(Instant::now() + every, every);

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    return Err(BftError::NoQuorum { received: collector.received(), quorum: self.quorum, tx_id });
                }
                _ = resend.tick() => {
                    tracing::debug!(tx = %tx_id, received = collector.received(), "Re-broadcasting request");
                    self.broadcast(&signed);
                }
                reply = registration.replies.recv() => {
                    let Some(reply) = reply else {
                        return Err(BftError::Stopped);
                    };
                    if !self.replicas.contains(&reply.from) || !self.signer.verify_message(&reply) {
                        increment_counter!("notary_bft_rejected_replies_total");
                        continue;
                    }
                    let from = reply.from;
                    let BftMessage::Reply { request_id: answered, tx_id: reply_tx, body, .. } = reply.message else {
                        continue;
                    };
                    if answered != request_id || reply_tx != tx_id {
                        continue;
                    }
                    if let ReplyBody::Signature(sig) = &body {
                        if !self.signer.verify(from, tx_id.as_bytes(), sig) {
                            increment_counter!("notary_bft_rejected_replies_total");
                            continue;
                        }
                    }
                    if let Some(group) = collector.add(from, body) {
                        return Ok(aggregate(group));
                    }
                }
            }
        }
    }
}

impl UniquenessProvider for BftProvider {
    fn commit(&self, request: CommitRequest) -> CommitFuture<'_> {
        async move {
            let outcome = self.commit_signed(request).await.map_err(ProviderError::from)?;
            Ok::<_, ProviderError>(outcome.result)
        }
        .boxed()
    }

    fn name(&self) -> &'static str {
        "bft"
    }
}
