// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! PBFT-style replica.
//!
//! Pure state transitions like `raft::core`: inputs are signed messages and
//! ticks, outputs are envelopes to send. The primary of view `v` is
//! `members[v % n]`. A proposal executes once 2f backups prepared it and
//! 2f+1 replicas committed it, strictly in sequence order.
//!
//! # Invariants
//! - Every replica executes the same proposal at a given sequence number
//! - Execution never skips a sequence number
//! - A new view re-proposes every proposal that may have committed before it
//!
//! There are no checkpoints: a replica that misses a committed slot does
//! not catch up until it is restarted from a peer's state.
//!
//! Backups refuse a pre-prepare whose service time is further than
//! `max_clock_skew_ms` from their own clock and vote the primary out.

use super::message::{BftEnvelope, BftMessage, ClientRequest, PreparedCert, Proposal, ReplyBody, Seq, SignedMessage, View};
use super::signer::Signer;
use crate::config::NodeId;
use metrics::increment_counter;
use notary_kernel::{CommitLogState, SecureHash, UniquenessResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Executed slots whose prepared certificates and replies are kept.
const CERT_WINDOW: Seq = 1024;

const DEFAULT_MAX_CLOCK_SKEW_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Normal,
    ViewChange { target: View, elapsed: u32 },
}

#[derive(Default)]
struct Slot {
    proposal: Option<Proposal>,
    digest: Option<SecureHash>,
    prepares: BTreeMap<NodeId, SignedMessage>,
    commits: BTreeMap<NodeId, SecureHash>,
    prepared: bool,
    committed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BftStatus {
    pub id: NodeId,
    pub view: View,
    pub primary: NodeId,
    pub in_view_change: bool,
    pub last_executed: Seq,
}

pub struct BftReplica {
    id: NodeId,
    members: Vec<NodeId>,
    f: usize,
    signer: Arc<dyn Signer>,
    timeout_ticks: u32,
    max_clock_skew_ms: u64,

    view: View,
    mode: Mode,
    now: u64,
    next_seq: Seq,
    last_executed: Seq,
    stalled_ticks: u32,

    slots: BTreeMap<(View, Seq), Slot>,
    ready: BTreeMap<Seq, Proposal>,
    certs: BTreeMap<Seq, PreparedCert>,
    view_changes: BTreeMap<View, BTreeMap<NodeId, SignedMessage>>,
    new_view_sent: BTreeSet<View>,

    /// Known requests not yet executed, by request id.
    waiting: BTreeMap<SecureHash, ClientRequest>,
    /// Request ids ordered in this view and not yet executed.
    assigned: BTreeSet<SecureHash>,
    replies: BTreeMap<SecureHash, (NodeId, SignedMessage)>,
    /// Execution order of `replies`, oldest first.
    replied: VecDeque<(Seq, SecureHash)>,

    machine: CommitLogState,
    out: Vec<BftEnvelope>,
}

impl BftReplica {
    pub fn new(id: NodeId, members: &[NodeId], f: usize, signer: Arc<dyn Signer>, timeout_ticks: u32) -> Self {
        let mut members = members.to_vec();
        members.sort_unstable();
        members.dedup();
        Self {
            id,
            members,
            f,
            signer,
            timeout_ticks: timeout_ticks.max(1),
            max_clock_skew_ms: DEFAULT_MAX_CLOCK_SKEW_MS,
            view: 0,
            mode: Mode::Normal,
            now: 0,
            next_seq: 0,
            last_executed: 0,
            stalled_ticks: 0,
            slots: BTreeMap::new(),
            ready: BTreeMap::new(),
            certs: BTreeMap::new(),
            view_changes: BTreeMap::new(),
            new_view_sent: BTreeSet::new(),
            waiting: BTreeMap::new(),
            assigned: BTreeSet::new(),
            replies: BTreeMap::new(),
            replied: VecDeque::new(),
            machine: CommitLogState::new(),
            out: Vec::new(),
        }
    }

    pub fn with_max_clock_skew(mut self, skew_ms: u64) -> Self {
        self.max_clock_skew_ms = skew_ms;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn primary(&self, view: View) -> NodeId {
        self.members[(view % self.members.len() as u64) as usize]
    }

    pub fn is_primary(&self) -> bool {
        self.primary(self.view) == self.id
    }

    pub fn in_view_change(&self) -> bool {
        matches!(self.mode, Mode::ViewChange { .. })
    }

    pub fn last_executed(&self) -> Seq {
        self.last_executed
    }

    pub fn state(&self) -> &CommitLogState {
        &self.machine
    }

    pub fn status(&self) -> BftStatus {
        BftStatus {
            id: self.id,
            view: self.view,
            primary: self.primary(self.view),
            in_view_change: self.in_view_change(),
            last_executed: self.last_executed,
        }
    }

    fn prepare_quorum(&self) -> usize {
        2 * self.f
    }

    fn commit_quorum(&self) -> usize {
        2 * self.f + 1
    }

    // --- Inputs ---

    pub fn step(&mut self, signed: SignedMessage, now: u64) -> Vec<BftEnvelope> {
        self.now = now;
        if !self.signer.verify_message(&signed) {
            tracing::warn!(id = self.id, from = signed.from, kind = signed.message.kind(), "Dropping message with bad signature");
            return Vec::new();
        }
        let from = signed.from;
        let is_member = self.members.contains(&from);

        match &signed.message {
            BftMessage::Request(request) => self.on_request(from, request.clone()),
            _ if !is_member => {
                tracing::warn!(id = self.id, from, kind = signed.message.kind(), "Dropping message from non-member");
            }
            BftMessage::PrePrepare { view, seq, proposal } => {
                self.on_pre_prepare(from, *view, *seq, proposal.clone())
            }
            BftMessage::Prepare { view, seq, .. } => self.on_prepare(*view, *seq, signed.clone()),
            BftMessage::Commit { view, seq, digest } => self.on_commit(from, *view, *seq, *digest),
            BftMessage::ViewChange { new_view, .. } => self.on_view_change(*new_view, signed.clone()),
            BftMessage::NewView { view, view_changes, pre_prepares } => {
                self.on_new_view(from, *view, view_changes, pre_prepares)
            }
            BftMessage::Reply { .. } => {}
        }
        self.take_out()
    }

    pub fn tick(&mut self, now: u64) -> Vec<BftEnvelope> {
        self.now = now;
        match self.mode {
            Mode::Normal => {
                if self.waiting.is_empty() || self.is_primary() {
                    self.stalled_ticks = 0;
                } else {
                    self.stalled_ticks += 1;
                    if self.stalled_ticks >= self.timeout_ticks {
                        tracing::info!(id = self.id, view = self.view, "Primary stalled, requesting view change");
                        self.start_view_change(self.view + 1);
                    }
                }
            }
            Mode::ViewChange { target, elapsed } => {
                let elapsed = elapsed + 1;
                if elapsed >= 2 * self.timeout_ticks {
                    self.start_view_change(target + 1);
                } else {
                    self.mode = Mode::ViewChange { target, elapsed };
                }
            }
        }
        self.take_out()
    }

    // --- Normal case ---

    fn on_request(&mut self, from: NodeId, request: ClientRequest) {
        if request.client != from {
            tracing::warn!(id = self.id, from, client = request.client, "Request relayed under another sender");
            return;
        }
        let request_id = request.id();
        if let Some((client, reply)) = self.replies.get(&request_id) {
            self.out.push(BftEnvelope { to: *client, signed: reply.clone() });
            return;
        }
        self.waiting.entry(request_id).or_insert_with(|| request.clone());

        if self.mode == Mode::Normal && self.is_primary() && !self.assigned.contains(&request_id) {
            let proposal = Proposal { request: Some(request), request_time: self.now };
            self.assign(proposal);
        }
    }

    fn assign(&mut self, proposal: Proposal) {
        let seq = self.next_seq + 1;
        self.next_seq = seq;
        let view = self.view;
        if let Some(request) = &proposal.request {
            self.assigned.insert(request.id());
        }

        let slot = self.slots.entry((view, seq)).or_default();
        slot.digest = Some(proposal.digest());
        slot.proposal = Some(proposal.clone());

        self.broadcast(BftMessage::PrePrepare { view, seq, proposal });
        self.check_prepared(view, seq);
    }

    fn on_pre_prepare(&mut self, from: NodeId, view: View, seq: Seq, proposal: Proposal) {
        if self.mode != Mode::Normal || view != self.view || from != self.primary(view) || seq <= self.last_executed {
            return;
        }
        if proposal.request.is_some() && proposal.request_time.abs_diff(self.now) > self.max_clock_skew_ms {
            tracing::warn!(
                id = self.id,
                view,
                seq,
                proposed = proposal.request_time,
                local = self.now,
                "Primary proposed a time outside the allowed skew"
            );
            increment_counter!("notary_bft_rejected_proposals_total");
            self.start_view_change(view + 1);
            return;
        }
        let digest = proposal.digest();
        let slot = self.slots.entry((view, seq)).or_default();
        match slot.digest {
            Some(existing) if existing != digest => {
                tracing::warn!(id = self.id, view, seq, "Primary sent conflicting pre-prepares");
                return;
            }
            Some(_) => return,
            None => {}
        }
        slot.digest = Some(digest);
        slot.proposal = Some(proposal.clone());

        self.next_seq = self.next_seq.max(seq);
        if let Some(request) = proposal.request {
            self.waiting.entry(request.id()).or_insert(request);
        }

        let prepare = self.broadcast(BftMessage::Prepare { view, seq, digest });
        self.slots.entry((view, seq)).or_default().prepares.insert(self.id, prepare);
        self.check_prepared(view, seq);
    }

    fn on_prepare(&mut self, view: View, seq: Seq, signed: SignedMessage) {
        if view < self.view || seq <= self.last_executed || signed.from == self.primary(view) {
            return;
        }
        self.slots.entry((view, seq)).or_default().prepares.insert(signed.from, signed);
        self.check_prepared(view, seq);
    }

    fn on_commit(&mut self, from: NodeId, view: View, seq: Seq, digest: SecureHash) {
        if view < self.view || seq <= self.last_executed {
            return;
        }
        self.slots.entry((view, seq)).or_default().commits.insert(from, digest);
        self.check_committed(view, seq);
    }

    fn check_prepared(&mut self, view: View, seq: Seq) {
        if view != self.view || self.mode != Mode::Normal {
            return;
        }
        let quorum = self.prepare_quorum();
        let Some(slot) = self.slots.get_mut(&(view, seq)) else {
            return;
        };
        let (Some(digest), Some(proposal)) = (slot.digest, slot.proposal.clone()) else {
            return;
        };
        if slot.prepared {
            return;
        }
        let matching: Vec<SignedMessage> =
            slot.prepares.values().filter(|p| prepare_digest(p) == Some(digest)).cloned().collect();
        if matching.len() < quorum {
            return;
        }
        slot.prepared = true;
        slot.commits.insert(self.id, digest);

        self.certs.insert(seq, PreparedCert { view, seq, proposal, prepares: matching });
        self.broadcast(BftMessage::Commit { view, seq, digest });
        self.check_committed(view, seq);
    }

    fn check_committed(&mut self, view: View, seq: Seq) {
        if view != self.view {
            return;
        }
        let quorum = self.commit_quorum();
        let Some(slot) = self.slots.get_mut(&(view, seq)) else {
            return;
        };
        if !slot.prepared || slot.committed {
            return;
        }
        let Some(digest) = slot.digest else {
            return;
        };
        if slot.commits.values().filter(|d| **d == digest).count() < quorum {
            return;
        }
        slot.committed = true;
        if let Some(proposal) = slot.proposal.clone() {
            self.ready.insert(seq, proposal);
        }
        self.try_execute();
    }

    fn try_execute(&mut self) {
        while let Some(proposal) = self.ready.remove(&(self.last_executed + 1)) {
            self.execute(self.last_executed + 1, proposal);
        }
    }

    fn execute(&mut self, seq: Seq, proposal: Proposal) {
        self.last_executed = seq;
        self.stalled_ticks = 0;
        let result = self.machine.apply(&proposal.command());
        increment_counter!("notary_bft_executed_total");

        if let (Some(request), Some(result)) = (proposal.request, result) {
            let request_id = request.id();
            self.waiting.remove(&request_id);
            self.assigned.remove(&request_id);
            let tx_id = request.request.tx_id;
            let body = match result {
                UniquenessResult::Success => ReplyBody::Signature(self.signer.sign(tx_id.as_bytes())),
                UniquenessResult::Failure(e) => ReplyBody::Error(e),
            };
            tracing::debug!(id = self.id, seq, tx = %tx_id, "Executed request");

            let reply = self.signer.sign_message(BftMessage::Reply { view: self.view, request_id, tx_id, body });
            self.out.push(BftEnvelope { to: request.client, signed: reply.clone() });
            self.replies.insert(request_id, (request.client, reply));
            self.replied.push_back((seq, request_id));
        }

        self.slots.retain(|(_, s), _| *s > seq);
        let floor = seq.saturating_sub(CERT_WINDOW);
        self.certs.retain(|s, _| *s > floor);
        while let Some((executed, request_id)) = self.replied.front().copied() {
            if executed > floor {
                break;
            }
            self.replied.pop_front();
            self.replies.remove(&request_id);
        }
    }

    // --- View change ---

    fn start_view_change(&mut self, target: View) {
        if target <= self.view {
            return;
        }
        if let Mode::ViewChange { target: current, .. } = self.mode {
            if current >= target {
                return;
            }
        }
        self.mode = Mode::ViewChange { target, elapsed: 0 };
        let prepared: Vec<PreparedCert> = self.certs.values().cloned().collect();
        let signed = self.broadcast(BftMessage::ViewChange {
            new_view: target,
            last_executed: self.last_executed,
            prepared,
        });
        self.view_changes.entry(target).or_default().insert(self.id, signed);
        tracing::info!(id = self.id, from_view = self.view, target, "Entering view change");
        self.check_new_view(target);
    }

    fn on_view_change(&mut self, new_view: View, signed: SignedMessage) {
        if new_view <= self.view {
            return;
        }
        let votes = {
            let votes = self.view_changes.entry(new_view).or_default();
            votes.insert(signed.from, signed);
            votes.len()
        };
        // f+1 replicas cannot all be faulty: join them
        let behind = match self.mode {
            Mode::Normal => true,
            Mode::ViewChange { target, .. } => target < new_view,
        };
        if behind && votes > self.f {
            self.start_view_change(new_view);
        }
        self.check_new_view(new_view);
    }

    fn check_new_view(&mut self, view: View) {
        if self.primary(view) != self.id || self.new_view_sent.contains(&view) {
            return;
        }
        if !matches!(self.mode, Mode::ViewChange { target, .. } if target == view) {
            return;
        }
        let needed = self.commit_quorum();
        let Some(votes) = self.view_changes.get(&view) else {
            return;
        };
        if votes.len() < needed {
            return;
        }
        let view_changes: Vec<SignedMessage> = votes.values().take(needed).cloned().collect();
        let pre_prepares = self.select_proposals(&view_changes);

        self.new_view_sent.insert(view);
        self.broadcast(BftMessage::NewView { view, view_changes, pre_prepares: pre_prepares.clone() });
        self.enter_view(view, pre_prepares);
    }

    fn on_new_view(&mut self, from: NodeId, view: View, view_changes: &[SignedMessage], pre_prepares: &[(Seq, Proposal)]) {
        if view <= self.view || from != self.primary(view) {
            return;
        }
        let mut senders = BTreeSet::new();
        for vc in view_changes {
            let for_view = matches!(&vc.message, BftMessage::ViewChange { new_view, .. } if *new_view == view);
            if for_view && self.members.contains(&vc.from) && self.signer.verify_message(vc) {
                senders.insert(vc.from);
            }
        }
        if senders.len() < self.commit_quorum() || senders.len() != view_changes.len() {
            tracing::warn!(id = self.id, from, view, "Rejecting new view without a view-change quorum");
            return;
        }
        if self.select_proposals(view_changes) != pre_prepares {
            tracing::warn!(id = self.id, from, view, "Rejecting new view with altered proposals");
            return;
        }
        self.enter_view(view, pre_prepares.to_vec());
    }

    /// Proposals the new primary must re-issue: for each sequence number
    /// after the lowest executed one, the proposal prepared in the highest
    /// view, or a null request.
    fn select_proposals(&self, view_changes: &[SignedMessage]) -> Vec<(Seq, Proposal)> {
        let mut low = Seq::MAX;
        let mut best: BTreeMap<Seq, (View, Proposal)> = BTreeMap::new();
        for vc in view_changes {
            let BftMessage::ViewChange { last_executed, prepared, .. } = &vc.message else {
                continue;
            };
            low = low.min(*last_executed);
            for cert in prepared.iter().filter(|c| self.valid_cert(c)) {
                let newer = best.get(&cert.seq).map_or(true, |(v, _)| cert.view > *v);
                if newer {
                    best.insert(cert.seq, (cert.view, cert.proposal.clone()));
                }
            }
        }
        if low == Seq::MAX {
            low = 0;
        }
        let high = best.keys().next_back().copied().unwrap_or(low).max(low);
        (low + 1..=high)
            .map(|seq| {
                let proposal = best.get(&seq).map(|(_, p)| p.clone()).unwrap_or_else(Proposal::null);
                (seq, proposal)
            })
            .collect()
    }

    fn valid_cert(&self, cert: &PreparedCert) -> bool {
        let digest = cert.proposal.digest();
        let primary = self.primary(cert.view);
        let signers: BTreeSet<NodeId> = cert
            .prepares
            .iter()
            .filter(|p| p.from != primary && self.members.contains(&p.from))
            .filter(|p| {
                matches!(&p.message, BftMessage::Prepare { view, seq, digest: d }
                    if *view == cert.view && *seq == cert.seq && *d == digest)
            })
            .filter(|p| self.signer.verify_message(p))
            .map(|p| p.from)
            .collect();
        signers.len() >= self.prepare_quorum()
    }

    fn enter_view(&mut self, view: View, pre_prepares: Vec<(Seq, Proposal)>) {
        self.view = view;
        self.mode = Mode::Normal;
        self.stalled_ticks = 0;
        self.slots.retain(|(v, _), _| *v >= view);
        self.ready.clear();
        self.assigned.clear();
        self.view_changes.retain(|v, _| *v > view);
        self.new_view_sent.retain(|v| *v >= view);
        self.next_seq = pre_prepares.last().map_or(self.last_executed, |(s, _)| *s).max(self.last_executed);

        increment_counter!("notary_bft_view_changes_total");
        tracing::info!(id = self.id, view, primary = self.primary(view), reissued = pre_prepares.len(), "Entered new view");

        let primary = self.is_primary();
        for (seq, proposal) in pre_prepares {
            if seq <= self.last_executed {
                continue;
            }
            let digest = proposal.digest();
            if let Some(request) = &proposal.request {
                self.assigned.insert(request.id());
                self.waiting.entry(request.id()).or_insert_with(|| request.clone());
            }
            let slot = self.slots.entry((view, seq)).or_default();
            slot.digest = Some(digest);
            slot.proposal = Some(proposal);
            if !primary {
                let prepare = self.broadcast(BftMessage::Prepare { view, seq, digest });
                self.slots.entry((view, seq)).or_default().prepares.insert(self.id, prepare);
            }
        }

        // Prepares and commits for this view may have arrived first
        let seqs: Vec<Seq> = self.slots.keys().filter(|(v, _)| *v == view).map(|(_, s)| *s).collect();
        for seq in seqs {
            self.check_prepared(view, seq);
        }

        if primary {
            let queued: Vec<ClientRequest> = self
                .waiting
                .iter()
                .filter(|(id, _)| !self.assigned.contains(*id))
                .map(|(_, r)| r.clone())
                .collect();
            for request in queued {
                self.assign(Proposal { request: Some(request), request_time: self.now });
            }
        }
    }

    // --- Output ---

    fn broadcast(&mut self, message: BftMessage) -> SignedMessage {
        let signed = self.signer.sign_message(message);
        let id = self.id;
        for &to in &self.members {
            if to != id {
                self.out.push(BftEnvelope { to, signed: signed.clone() });
            }
        }
        signed
    }

    fn take_out(&mut self) -> Vec<BftEnvelope> {
        std::mem::take(&mut self.out)
    }
}

fn prepare_digest(signed: &SignedMessage) -> Option<SecureHash> {
    match &signed.message {
        BftMessage::Prepare { digest, .. } => Some(*digest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::signer::KeyedSigner;
    use notary_kernel::{CommitRequest, NotaryError, Party, StateRef, TimeWindow};
    use std::collections::VecDeque;

    const CLIENT: NodeId = 100;
    const SECRET: &str = "test-secret";

    struct Net {
        replicas: BTreeMap<NodeId, BftReplica>,
        down: BTreeSet<NodeId>,
        queue: VecDeque<BftEnvelope>,
        replies: Vec<SignedMessage>,
        client: KeyedSigner,
        nonce: u64,
        now: u64,
    }

    impl Net {
        fn new(n: u64) -> Self {
            let members: Vec<NodeId> = (1..=n).collect();
            let f = (members.len() - 1) / 3;
            let replicas = members
                .iter()
                .map(|id| {
                    let signer: Arc<dyn Signer> = Arc::new(KeyedSigner::new(*id, SECRET));
                    (*id, BftReplica::new(*id, &members, f, signer, 5))
                })
                .collect();
            Self {
                replicas,
                down: BTreeSet::new(),
                queue: VecDeque::new(),
                replies: Vec::new(),
                client: KeyedSigner::new(CLIENT, SECRET),
                nonce: 0,
                now: 1_000,
            }
        }

        fn run(&mut self) {
            while let Some(env) = self.queue.pop_front() {
                if self.down.contains(&env.to) || self.down.contains(&env.signed.from) {
                    continue;
                }
                if env.to == CLIENT {
                    self.replies.push(env.signed);
                    continue;
                }
                let now = self.now;
                if let Some(replica) = self.replicas.get_mut(&env.to) {
                    let out = replica.step(env.signed, now);
                    self.queue.extend(out);
                }
            }
        }

        fn submit(&mut self, request: CommitRequest) -> SecureHash {
            self.nonce += 1;
            let request = ClientRequest { client: CLIENT, nonce: self.nonce, request };
            let id = request.id();
            let signed = self.client.sign_message(BftMessage::Request(request));
            for to in self.replicas.keys().copied().collect::<Vec<_>>() {
                self.queue.push_back(BftEnvelope { to, signed: signed.clone() });
            }
            self.run();
            id
        }

        fn tick(&mut self, ticks: u32) {
            for _ in 0..ticks {
                let now = self.now;
                let ids: Vec<NodeId> = self.replicas.keys().copied().collect();
                for id in ids {
                    if self.down.contains(&id) {
                        continue;
                    }
                    if let Some(replica) = self.replicas.get_mut(&id) {
                        let out = replica.tick(now);
                        self.queue.extend(out);
                    }
                }
                self.run();
            }
        }

        fn bodies(&self, request_id: SecureHash) -> BTreeMap<NodeId, ReplyBody> {
            self.replies
                .iter()
                .filter_map(|r| match &r.message {
                    BftMessage::Reply { request_id: id, body, .. } if *id == request_id => Some((r.from, body.clone())),
                    _ => None,
                })
                .collect()
        }
    }

    fn spend(tx: u8, state: u8) -> CommitRequest {
        let s = StateRef::new(SecureHash::hash_of(&[0xBB, state]), 0);
        CommitRequest::new(vec![s], SecureHash::hash_of(&[tx]), Party::new("O=Bank,L=Paris,C=FR"))
    }

    #[test]
    fn test_all_replicas_execute_and_reply() {
        let mut net = Net::new(4);
        let id = net.submit(spend(1, 1));
        let bodies = net.bodies(id);
        assert_eq!(bodies.len(), 4);
        assert!(bodies.values().all(|b| matches!(b, ReplyBody::Signature(_))));
        for replica in net.replicas.values() {
            assert_eq!(replica.last_executed(), 1);
            assert_eq!(replica.state().len(), 1);
        }
    }

    #[test]
    fn test_double_spend_rejected_everywhere() {
        let mut net = Net::new(4);
        net.submit(spend(1, 1));
        let second = net.submit(spend(2, 1));
        let bodies = net.bodies(second);
        assert_eq!(bodies.len(), 4);
        for body in bodies.values() {
            match body {
                ReplyBody::Error(NotaryError::Conflict { consumed_states, .. }) => {
                    assert!(consumed_states.values().all(|d| d.cites(&SecureHash::hash_of(&[1]))));
                }
                other => panic!("expected conflict, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_progress_with_crashed_backup() {
        let mut net = Net::new(4);
        net.down.insert(4);
        let id = net.submit(spend(1, 1));
        assert_eq!(net.bodies(id).len(), 3);
    }

    #[test]
    fn test_no_progress_with_two_crashed() {
        let mut net = Net::new(4);
        net.down.insert(3);
        net.down.insert(4);
        let id = net.submit(spend(1, 1));
        assert!(net.bodies(id).is_empty());
    }

    #[test]
    fn test_view_change_after_primary_crash() {
        let mut net = Net::new(4);
        net.submit(spend(1, 1));
        net.down.insert(1);

        let id = net.submit(spend(2, 2));
        assert!(net.bodies(id).is_empty());

        net.tick(12);
        let bodies = net.bodies(id);
        assert_eq!(bodies.len(), 3);
        for id in [2, 3, 4] {
            let replica = &net.replicas[&id];
            assert_eq!(replica.view(), 1);
            assert_eq!(replica.primary(1), 2);
            assert_eq!(replica.last_executed(), 2);
        }
    }

    #[test]
    fn test_retransmitted_request_gets_cached_reply() {
        let mut net = Net::new(4);
        let request = ClientRequest { client: CLIENT, nonce: 9, request: spend(1, 1) };
        let signed = net.client.sign_message(BftMessage::Request(request.clone()));
        for to in 1..=4 {
            net.queue.push_back(BftEnvelope { to, signed: signed.clone() });
        }
        net.run();
        net.replies.clear();

        for to in 1..=4 {
            net.queue.push_back(BftEnvelope { to, signed: signed.clone() });
        }
        net.run();
        assert_eq!(net.bodies(request.id()).len(), 4);
        assert!(net.replicas.values().all(|r| r.last_executed() == 1));
    }

    #[test]
    fn test_forged_message_dropped() {
        let mut net = Net::new(4);
        let forger = KeyedSigner::new(2, "wrong-secret");
        let proposal = Proposal { request: None, request_time: 0 };
        let forged = forger.sign_message(BftMessage::PrePrepare { view: 0, seq: 1, proposal });
        let replica = net.replicas.get_mut(&3).unwrap();
        assert!(replica.step(forged, 0).is_empty());
    }

    #[test]
    fn test_pre_prepare_from_backup_ignored() {
        let mut net = Net::new(4);
        let backup = KeyedSigner::new(2, SECRET);
        let proposal = Proposal { request: None, request_time: 0 };
        let msg = backup.sign_message(BftMessage::PrePrepare { view: 0, seq: 1, proposal });
        let replica = net.replicas.get_mut(&3).unwrap();
        assert!(replica.step(msg, 0).is_empty());
    }

    #[test]
    fn test_backdated_pre_prepare_is_refused() {
        let mut net = Net::new(4);
        net.now = 100_000;
        let request = spend(8, 7).with_time_window(TimeWindow::until_only(50_000));
        let client_request = ClientRequest { client: CLIENT, nonce: 1, request };
        let primary = KeyedSigner::new(1, SECRET);
        let proposal = Proposal { request: Some(client_request.clone()), request_time: 0 };
        let pre_prepare = primary.sign_message(BftMessage::PrePrepare { view: 0, seq: 1, proposal });

        for to in [2, 3, 4] {
            let out = net.replicas.get_mut(&to).unwrap().step(pre_prepare.clone(), net.now);
            assert!(out.iter().all(|e| !matches!(e.signed.message, BftMessage::Prepare { .. })));
            net.queue.extend(out);
        }
        net.down.insert(1);
        net.run();

        for id in [2, 3, 4] {
            let replica = &net.replicas[&id];
            assert_eq!(replica.view(), 1);
            assert_eq!(replica.last_executed(), 0);
        }
        assert!(net.bodies(client_request.id()).is_empty());

        // The honest primary of view 1 orders it at its own time
        let signed = net.client.sign_message(BftMessage::Request(client_request.clone()));
        for to in [2, 3, 4] {
            net.queue.push_back(BftEnvelope { to, signed: signed.clone() });
        }
        net.run();
        let bodies = net.bodies(client_request.id());
        assert_eq!(bodies.len(), 3);
        assert!(bodies.values().all(|b| matches!(b, ReplyBody::Error(NotaryError::TimeWindowInvalid { current_time: 100_000, .. }))));
    }

    #[test]
    fn test_reply_cache_stays_within_window() {
        let mut net = Net::new(4);
        let total = CERT_WINDOW + 200;
        for n in 0..total {
            let input = StateRef::new(SecureHash::hash_of(&n.to_le_bytes()), 0);
            let id = SecureHash::hash_of(&(n + 1_000_000).to_le_bytes());
            net.submit(CommitRequest::new(vec![input], id, Party::new("O=Bank,L=Paris,C=FR")));
            net.replies.clear();
        }
        for replica in net.replicas.values() {
            assert_eq!(replica.last_executed(), total);
            assert!(replica.replies.len() <= CERT_WINDOW as usize);
            assert_eq!(replica.replies.len(), replica.replied.len());
            assert!(replica.assigned.is_empty());
            assert!(replica.waiting.is_empty());
        }
    }
}
