// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Raft protocol core.
//!
//! Pure state transitions: inputs are ticks, proposals and messages;
//! outputs are `Action`s for the driver to carry out in order (persist
//! before send). No clocks, sockets or files in here.
//!
//! # Invariants
//! - At most one leader per term (one vote per term, persisted before it is sent)
//! - Only entries of the current term are committed by counting replicas
//! - `commit_index` and `last_applied` never move backwards

use super::log::RaftLog;
use super::message::{Entry, Envelope, LogIndex, Message, Term};
use crate::config::{NodeId, RaftSettings};
use notary_kernel::Command;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// State that must survive a restart before any message reflecting it is sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub term: Term,
    pub voted_for: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub last_index: LogIndex,
    pub last_term: Term,
    /// Encoded commit-log state.
    pub data: Arc<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Send(Envelope),
    PersistHardState(HardState),
    /// New log entries. Each replaces any stored entry at its index or later.
    PersistEntries(Vec<Entry>),
    /// Committed entries, in order, to run through the state machine.
    Apply(Vec<Entry>),
    /// Replace the state machine with a snapshot received from the leader.
    RestoreSnapshot(SnapshotMeta),
    /// This node stopped being leader; its open proposals are in doubt.
    SteppedDown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RaftStatus {
    pub id: NodeId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub last_log_index: LogIndex,
    pub snapshot_index: LogIndex,
}

pub struct RaftCore {
    id: NodeId,
    peers: Vec<NodeId>,
    settings: RaftSettings,

    role: Role,
    term: Term,
    voted_for: Option<NodeId>,
    leader: Option<NodeId>,

    log: RaftLog,
    snapshot: Option<SnapshotMeta>,
    commit_index: LogIndex,
    last_applied: LogIndex,

    election_elapsed: u32,
    election_timeout: u32,
    heartbeat_elapsed: u32,
    timeout_draws: u64,

    votes: BTreeSet<NodeId>,
    next_index: BTreeMap<NodeId, LogIndex>,
    match_index: BTreeMap<NodeId, LogIndex>,

    out: Vec<Action>,
}

impl RaftCore {
    pub fn new(id: NodeId, members: &[NodeId], settings: RaftSettings) -> Self {
        let peers = members.iter().copied().filter(|m| *m != id).collect();
        let mut core = Self {
            id,
            peers,
            settings,
            role: Role::Follower,
            term: 0,
            voted_for: None,
            leader: None,
            log: RaftLog::new(),
            snapshot: None,
            commit_index: 0,
            last_applied: 0,
            election_elapsed: 0,
            election_timeout: 0,
            heartbeat_elapsed: 0,
            timeout_draws: 0,
            votes: BTreeSet::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            out: Vec::new(),
        };
        core.election_timeout = core.draw_election_timeout();
        core
    }

    /// Load durable state after a restart. The state machine must already
    /// hold `snapshot`; entries after it are re-applied once committed.
    pub fn restore(&mut self, hard: HardState, snapshot: Option<SnapshotMeta>, entries: Vec<Entry>) {
        self.term = hard.term;
        self.voted_for = hard.voted_for;
        if let Some(snap) = &snapshot {
            self.log.reset(snap.last_index, snap.last_term);
            self.commit_index = snap.last_index;
            self.last_applied = snap.last_index;
        }
        for entry in entries {
            if entry.index > self.log.last_index() {
                self.log.append(entry);
            }
        }
        self.snapshot = snapshot;
    }

    // --- Read APIs ---

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.leader
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    pub fn snapshot(&self) -> Option<&SnapshotMeta> {
        self.snapshot.as_ref()
    }

    pub fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    pub fn status(&self) -> RaftStatus {
        RaftStatus {
            id: self.id,
            role: self.role,
            term: self.term,
            leader: self.leader,
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            last_log_index: self.log.last_index(),
            snapshot_index: self.log.offset_index(),
        }
    }

    // --- Inputs ---

    pub fn tick(&mut self) -> Vec<Action> {
        match self.role {
            Role::Leader => {
                self.heartbeat_elapsed += 1;
                if self.heartbeat_elapsed >= self.settings.heartbeat_ticks {
                    self.heartbeat_elapsed = 0;
                    self.broadcast_append();
                }
            }
            Role::Follower | Role::Candidate => {
                self.election_elapsed += 1;
                if self.election_elapsed >= self.election_timeout {
                    self.start_election();
                }
            }
        }
        self.take_actions()
    }

    /// Append `command` if leader. Otherwise returns the known leader.
    pub fn propose(&mut self, command: Command) -> Result<(LogIndex, Term, Vec<Action>), Option<NodeId>> {
        if self.role != Role::Leader {
            return Err(self.leader);
        }
        let index = self.append_local(command);
        self.advance_commit();
        self.broadcast_append();
        Ok((index, self.term, self.take_actions()))
    }

    pub fn step(&mut self, envelope: Envelope) -> Vec<Action> {
        let Envelope { from, message, .. } = envelope;
        if !self.peers.contains(&from) {
            tracing::warn!(from, kind = message.kind(), "Dropping message from non-member");
            return Vec::new();
        }

        if message.term() > self.term {
            let leader = match &message {
                Message::AppendEntries { .. } | Message::InstallSnapshot { .. } => Some(from),
                _ => None,
            };
            self.become_follower(message.term(), leader);
        }

        match message {
            Message::RequestVote { term, last_log_index, last_log_term } => {
                self.on_vote_request(from, term, last_log_index, last_log_term)
            }
            Message::RequestVoteResponse { term, granted } => {
                if self.role == Role::Candidate && term == self.term && granted {
                    self.votes.insert(from);
                    if self.votes.len() >= self.quorum() {
                        self.become_leader();
                    }
                }
            }
            Message::AppendEntries { term, prev_log_index, prev_log_term, entries, leader_commit } => {
                self.on_append(from, term, prev_log_index, prev_log_term, entries, leader_commit)
            }
            Message::AppendEntriesResponse { term, success, match_index } => {
                if self.role == Role::Leader && term == self.term {
                    self.on_append_response(from, success, match_index);
                }
            }
            Message::InstallSnapshot { term, last_index, last_term, data, checksum } => {
                self.on_install_snapshot(from, term, last_index, last_term, data, checksum)
            }
            Message::InstallSnapshotResponse { term, last_index } => {
                if self.role == Role::Leader && term == self.term {
                    self.record_match(from, last_index);
                    self.send_append(from);
                }
            }
        }
        self.take_actions()
    }

    /// Fold applied entries up to `index` into a snapshot of the state
    /// machine. `data` must be the state after applying `index`.
    pub fn compact(&mut self, index: LogIndex, data: Vec<u8>) -> Option<SnapshotMeta> {
        if index <= self.log.offset_index() || index > self.last_applied {
            return None;
        }
        let term = self.log.term_at(index)?;
        self.log.compact(index, term);
        let meta = SnapshotMeta { last_index: index, last_term: term, data: Arc::new(data) };
        self.snapshot = Some(meta.clone());
        Some(meta)
    }

    // --- Elections ---

    fn draw_election_timeout(&mut self) -> u32 {
        // Deterministic per (node, term, draw) so simulations replay exactly.
        self.timeout_draws += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.id.to_le_bytes());
        hasher.update(&self.term.to_le_bytes());
        hasher.update(&self.timeout_draws.to_le_bytes());
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);

        let (lo, hi) = self.settings.election_ticks;
        let span = (hi.saturating_sub(lo) as u64) + 1;
        lo + (u64::from_le_bytes(word) % span) as u32
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        self.election_timeout = self.draw_election_timeout();
    }

    fn start_election(&mut self) {
        self.term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.id);
        self.leader = None;
        self.votes = BTreeSet::from([self.id]);
        self.reset_election_timer();
        self.persist_hard_state();
        tracing::debug!(id = self.id, term = self.term, "Starting election");

        if self.votes.len() >= self.quorum() {
            self.become_leader();
            return;
        }
        let message = Message::RequestVote {
            term: self.term,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in self.peers.clone() {
            self.send(peer, message.clone());
        }
    }

    fn become_follower(&mut self, term: Term, leader: Option<NodeId>) {
        let was_leader = self.role == Role::Leader;
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.persist_hard_state();
        }
        self.role = Role::Follower;
        self.leader = leader;
        self.votes.clear();
        self.reset_election_timer();
        if was_leader {
            self.out.push(Action::SteppedDown);
        }
    }

    fn become_leader(&mut self) {
        tracing::info!(id = self.id, term = self.term, "Became leader");
        self.role = Role::Leader;
        self.leader = Some(self.id);
        self.heartbeat_elapsed = 0;
        let next = self.log.last_index() + 1;
        for peer in &self.peers {
            self.next_index.insert(*peer, next);
            self.match_index.insert(*peer, 0);
        }
        // An entry of the new term lets earlier entries commit.
        self.append_local(Command::Noop);
        self.advance_commit();
        self.broadcast_append();
    }

    fn on_vote_request(&mut self, from: NodeId, term: Term, last_log_index: LogIndex, last_log_term: Term) {
        let up_to_date = last_log_term > self.log.last_term()
            || (last_log_term == self.log.last_term() && last_log_index >= self.log.last_index());
        let free = self.voted_for.map_or(true, |v| v == from);
        let granted = term == self.term && free && up_to_date;

        if granted {
            self.voted_for = Some(from);
            self.persist_hard_state();
            self.reset_election_timer();
        }
        self.send(from, Message::RequestVoteResponse { term: self.term, granted });
    }

    // --- Replication ---

    fn append_local(&mut self, command: Command) -> LogIndex {
        let entry = Entry { term: self.term, index: self.log.last_index() + 1, command };
        let index = entry.index;
        self.log.append(entry.clone());
        self.out.push(Action::PersistEntries(vec![entry]));
        index
    }

    fn broadcast_append(&mut self) {
        for peer in self.peers.clone() {
            self.send_append(peer);
        }
    }

    fn send_append(&mut self, peer: NodeId) {
        let next = self.next_index.get(&peer).copied().unwrap_or(self.log.last_index() + 1);

        if next <= self.log.offset_index() {
            if let Some(snap) = &self.snapshot {
                let message = Message::InstallSnapshot {
                    term: self.term,
                    last_index: snap.last_index,
                    last_term: snap.last_term,
                    data: snap.data.as_ref().clone(),
                    checksum: crc32fast::hash(&snap.data),
                };
                self.send(peer, message);
            }
            return;
        }

        let prev_log_index = next - 1;
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
        let entries = self.log.entries_from(next, self.settings.max_entries_per_append);
        let message = Message::AppendEntries {
            term: self.term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
        };
        self.send(peer, message);
    }

    fn on_append(
        &mut self,
        from: NodeId,
        term: Term,
        mut prev_log_index: LogIndex,
        mut prev_log_term: Term,
        mut entries: Vec<Entry>,
        leader_commit: LogIndex,
    ) {
        if term < self.term {
            let reply = Message::AppendEntriesResponse { term: self.term, success: false, match_index: 0 };
            self.send(from, reply);
            return;
        }
        if self.role != Role::Follower {
            self.become_follower(term, Some(from));
        }
        self.leader = Some(from);
        self.reset_election_timer();

        // Prefix already folded into our snapshot
        let offset = self.log.offset_index();
        if prev_log_index < offset {
            entries.retain(|e| e.index > offset);
            prev_log_index = offset;
            prev_log_term = self.log.offset_term();
        }

        if self.log.term_at(prev_log_index) != Some(prev_log_term) {
            let hint = if prev_log_index > self.log.last_index() {
                self.log.last_index()
            } else {
                prev_log_index.saturating_sub(1).max(self.commit_index)
            };
            let reply = Message::AppendEntriesResponse { term: self.term, success: false, match_index: hint };
            self.send(from, reply);
            return;
        }

        let last_new = prev_log_index + entries.len() as LogIndex;
        let mut fresh = Vec::new();
        for entry in entries {
            match self.log.term_at(entry.index) {
                Some(t) if t == entry.term => continue,
                Some(_) => {
                    self.log.truncate_from(entry.index);
                    self.log.append(entry.clone());
                    fresh.push(entry);
                }
                None => {
                    self.log.append(entry.clone());
                    fresh.push(entry);
                }
            }
        }
        if !fresh.is_empty() {
            self.out.push(Action::PersistEntries(fresh));
        }

        let commit = leader_commit.min(last_new);
        if commit > self.commit_index {
            self.commit_index = commit;
            self.apply_committed();
        }

        let reply = Message::AppendEntriesResponse { term: self.term, success: true, match_index: last_new };
        self.send(from, reply);
    }

    fn on_append_response(&mut self, from: NodeId, success: bool, match_index: LogIndex) {
        if success {
            self.record_match(from, match_index);
            if self.next_index.get(&from).copied().unwrap_or(0) <= self.log.last_index() {
                self.send_append(from);
            }
        } else {
            let matched = self.match_index.get(&from).copied().unwrap_or(0);
            let next = self.next_index.get(&from).copied().unwrap_or(1);
            let retry = next.saturating_sub(1).min(match_index + 1).max(matched + 1).max(1);
            self.next_index.insert(from, retry);
            self.send_append(from);
        }
    }

    fn record_match(&mut self, from: NodeId, index: LogIndex) {
        let matched = self.match_index.entry(from).or_insert(0);
        if index > *matched {
            *matched = index;
        }
        let next = self.next_index.entry(from).or_insert(1);
        if *next < index + 1 {
            *next = index + 1;
        }
        self.advance_commit();
    }

    fn advance_commit(&mut self) {
        let quorum = self.quorum();
        let mut n = self.log.last_index();
        while n > self.commit_index {
            match self.log.term_at(n) {
                Some(t) if t == self.term => {
                    let replicas = 1 + self.match_index.values().filter(|m| **m >= n).count();
                    if replicas >= quorum {
                        self.commit_index = n;
                        break;
                    }
                }
                // Older terms only commit through a current-term entry
                _ => break,
            }
            n -= 1;
        }
        self.apply_committed();
    }

    fn apply_committed(&mut self) {
        if self.commit_index > self.last_applied {
            let entries = self.log.slice(self.last_applied + 1, self.commit_index);
            self.last_applied = self.commit_index;
            if !entries.is_empty() {
                self.out.push(Action::Apply(entries));
            }
        }
    }

    // --- Snapshots ---

    fn on_install_snapshot(
        &mut self,
        from: NodeId,
        term: Term,
        last_index: LogIndex,
        last_term: Term,
        data: Vec<u8>,
        checksum: u32,
    ) {
        if term < self.term {
            self.send(from, Message::InstallSnapshotResponse { term: self.term, last_index: 0 });
            return;
        }
        if self.role != Role::Follower {
            self.become_follower(term, Some(from));
        }
        self.leader = Some(from);
        self.reset_election_timer();

        if crc32fast::hash(&data) != checksum {
            tracing::warn!(from, last_index, "Snapshot checksum mismatch, ignoring");
            return;
        }
        if last_index <= self.commit_index {
            let reply = Message::InstallSnapshotResponse { term: self.term, last_index: self.commit_index };
            self.send(from, reply);
            return;
        }

        if self.log.term_at(last_index) == Some(last_term) {
            self.log.compact(last_index, last_term);
        } else {
            self.log.reset(last_index, last_term);
        }
        self.commit_index = last_index;
        self.last_applied = last_index;

        let meta = SnapshotMeta { last_index, last_term, data: Arc::new(data) };
        self.snapshot = Some(meta.clone());
        self.out.push(Action::RestoreSnapshot(meta));
        self.send(from, Message::InstallSnapshotResponse { term: self.term, last_index });
    }

    // --- Output ---

    fn send(&mut self, to: NodeId, message: Message) {
        self.out.push(Action::Send(Envelope { from: self.id, to, message }));
    }

    fn persist_hard_state(&mut self) {
        self.out.push(Action::PersistHardState(HardState { term: self.term, voted_for: self.voted_for }));
    }

    fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_kernel::{CommitLogState, CommitRequest, Party, SecureHash, StateRef};
    use std::collections::VecDeque;

    /// Lock-step cluster: messages are delivered in FIFO order, state
    /// machines are real commit logs.
    struct Sim {
        nodes: BTreeMap<NodeId, RaftCore>,
        machines: BTreeMap<NodeId, CommitLogState>,
        inflight: VecDeque<Envelope>,
        down: BTreeSet<NodeId>,
    }

    impl Sim {
        fn new(n: u64) -> Self {
            let ids: Vec<NodeId> = (1..=n).collect();
            let nodes = ids.iter().map(|id| (*id, RaftCore::new(*id, &ids, RaftSettings::default()))).collect();
            let machines = ids.iter().map(|id| (*id, CommitLogState::new())).collect();
            Self { nodes, machines, inflight: VecDeque::new(), down: BTreeSet::new() }
        }

        fn run(&mut self, id: NodeId, actions: Vec<Action>) {
            for action in actions {
                match action {
                    Action::Send(env) => self.inflight.push_back(env),
                    Action::Apply(entries) => {
                        let machine = self.machines.get_mut(&id).unwrap();
                        for e in entries {
                            machine.apply(&e.command);
                        }
                    }
                    Action::RestoreSnapshot(meta) => {
                        let state = notary_kernel::snapshot::decode_state(&meta.data).unwrap();
                        self.machines.insert(id, state);
                    }
                    Action::PersistHardState(_) | Action::PersistEntries(_) | Action::SteppedDown => {}
                }
            }
        }

        fn deliver_all(&mut self) {
            let mut budget = 10_000;
            while let Some(env) = self.inflight.pop_front() {
                budget -= 1;
                assert!(budget > 0, "message storm");
                if self.down.contains(&env.to) || self.down.contains(&env.from) {
                    continue;
                }
                let to = env.to;
                let actions = self.nodes.get_mut(&to).unwrap().step(env);
                self.run(to, actions);
            }
        }

        fn tick_all(&mut self, ticks: u32) {
            for _ in 0..ticks {
                let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
                for id in ids {
                    if self.down.contains(&id) {
                        continue;
                    }
                    let actions = self.nodes.get_mut(&id).unwrap().tick();
                    self.run(id, actions);
                }
                self.deliver_all();
            }
        }

        fn leaders(&self) -> Vec<NodeId> {
            self.nodes
                .values()
                .filter(|n| n.is_leader() && !self.down.contains(&n.id()))
                .map(|n| n.id())
                .collect()
        }

        fn elect(&mut self) -> NodeId {
            for _ in 0..200 {
                self.tick_all(1);
                let leaders = self.leaders();
                if leaders.len() == 1 {
                    return leaders[0];
                }
            }
            panic!("no leader elected");
        }

        fn propose(&mut self, id: NodeId, command: Command) -> LogIndex {
            let (index, _, actions) = self.nodes.get_mut(&id).unwrap().propose(command).unwrap();
            self.run(id, actions);
            self.deliver_all();
            index
        }
    }

    fn commit_cmd(n: u8, tx: u8) -> Command {
        let request = CommitRequest::new(
            vec![StateRef::new(SecureHash::hash_of(&[0xAB, n]), 0)],
            SecureHash::hash_of(&[tx]),
            Party::new("O=Client"),
        );
        Command::Commit { request, request_time: 1_000 }
    }

    #[test]
    fn test_single_node_commits_immediately() {
        let mut sim = Sim::new(1);
        let leader = sim.elect();
        let index = sim.propose(leader, commit_cmd(1, 1));
        assert_eq!(sim.nodes[&leader].commit_index(), index);
        assert_eq!(sim.machines[&leader].len(), 1);
    }

    #[test]
    fn test_three_nodes_elect_one_leader_and_replicate() {
        let mut sim = Sim::new(3);
        let leader = sim.elect();
        assert_eq!(sim.leaders(), vec![leader]);

        let index = sim.propose(leader, commit_cmd(1, 1));
        sim.tick_all(3);

        for node in sim.nodes.values() {
            assert!(node.commit_index() >= index);
            assert_eq!(node.leader(), Some(leader));
        }
        let states: Vec<_> = sim.machines.values().cloned().collect();
        assert!(states.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(states[0].len(), 1);
    }

    #[test]
    fn test_follower_rejects_proposal_with_hint() {
        let mut sim = Sim::new(3);
        let leader = sim.elect();
        sim.tick_all(3);
        let follower = *sim.nodes.keys().find(|id| **id != leader).unwrap();
        let err = sim.nodes.get_mut(&follower).unwrap().propose(Command::Noop).unwrap_err();
        assert_eq!(err, Some(leader));
    }

    #[test]
    fn test_leader_failover_keeps_committed_entries() {
        let mut sim = Sim::new(3);
        let old = sim.elect();
        sim.propose(old, commit_cmd(1, 1));
        sim.tick_all(3);

        sim.down.insert(old);
        let new = sim.elect();
        assert_ne!(new, old);
        assert!(sim.nodes[&new].term() > sim.nodes[&old].term());

        sim.propose(new, commit_cmd(2, 2));
        sim.tick_all(3);

        // Old leader rejoins and converges
        sim.down.remove(&old);
        sim.tick_all(30);
        assert!(!sim.nodes[&old].is_leader() || sim.leaders() == vec![old]);
        let reference = sim.machines[&new].clone();
        assert_eq!(reference.len(), 2);
        for machine in sim.machines.values() {
            assert_eq!(machine.committed(), reference.committed());
        }
    }

    #[test]
    fn test_minority_cannot_commit() {
        let mut sim = Sim::new(3);
        let leader = sim.elect();
        for id in sim.nodes.keys().copied().collect::<Vec<_>>() {
            if id != leader {
                sim.down.insert(id);
            }
        }
        let before = sim.nodes[&leader].commit_index();
        sim.propose(leader, commit_cmd(1, 1));
        sim.tick_all(5);
        assert_eq!(sim.nodes[&leader].commit_index(), before);
        assert!(sim.machines[&leader].is_empty());
    }

    #[test]
    fn test_lagging_follower_receives_snapshot() {
        let mut sim = Sim::new(3);
        let leader = sim.elect();
        let lagging = *sim.nodes.keys().find(|id| **id != leader).unwrap();
        sim.down.insert(lagging);

        for n in 0..10u8 {
            sim.propose(leader, commit_cmd(n, n));
        }
        sim.tick_all(2);

        let applied = sim.nodes[&leader].last_applied();
        let data = notary_kernel::snapshot::encode_state(&sim.machines[&leader]).unwrap();
        assert!(sim.nodes.get_mut(&leader).unwrap().compact(applied, data).is_some());
        assert_eq!(sim.nodes[&leader].log().offset_index(), applied);

        sim.down.remove(&lagging);
        sim.tick_all(10);

        assert_eq!(sim.nodes[&lagging].log().offset_index(), applied);
        assert_eq!(sim.machines[&lagging].committed(), sim.machines[&leader].committed());

        // Replication continues past the snapshot
        sim.propose(leader, commit_cmd(50, 50));
        sim.tick_all(3);
        assert_eq!(sim.machines[&lagging].len(), 11);
    }

    #[test]
    fn test_stale_term_vote_is_refused() {
        let mut core = RaftCore::new(1, &[1, 2, 3], RaftSettings::default());
        core.restore(HardState { term: 5, voted_for: None }, None, Vec::new());

        let actions = core.step(Envelope {
            from: 2,
            to: 1,
            message: Message::RequestVote { term: 4, last_log_index: 10, last_log_term: 4 },
        });
        assert_eq!(
            actions,
            vec![Action::Send(Envelope {
                from: 1,
                to: 2,
                message: Message::RequestVoteResponse { term: 5, granted: false },
            })]
        );
    }

    #[test]
    fn test_one_vote_per_term() {
        let mut core = RaftCore::new(1, &[1, 2, 3], RaftSettings::default());
        let vote = |from| Envelope {
            from,
            to: 1,
            message: Message::RequestVote { term: 1, last_log_index: 0, last_log_term: 0 },
        };

        let first = core.step(vote(2));
        assert!(first.contains(&Action::PersistHardState(HardState { term: 1, voted_for: Some(2) })));
        let second = core.step(vote(3));
        assert!(second.iter().any(|a| matches!(
            a,
            Action::Send(Envelope { message: Message::RequestVoteResponse { granted: false, .. }, .. })
        )));
    }

    #[test]
    fn test_conflicting_suffix_is_replaced() {
        let mut core = RaftCore::new(2, &[1, 2, 3], RaftSettings::default());
        let append = |term, prev: LogIndex, prev_term, entries: Vec<Entry>, commit| Envelope {
            from: 1,
            to: 2,
            message: Message::AppendEntries {
                term,
                prev_log_index: prev,
                prev_log_term: prev_term,
                entries,
                leader_commit: commit,
            },
        };
        let e = |index, term| Entry { term, index, command: Command::Noop };

        core.step(append(1, 0, 0, vec![e(1, 1), e(2, 1), e(3, 1)], 1));
        assert_eq!(core.log().last_index(), 3);

        // New leader in term 2 overwrote index 2 onwards
        let actions = core.step(append(2, 1, 1, vec![e(2, 2)], 2));
        assert_eq!(core.log().last_index(), 2);
        assert_eq!(core.log().term_at(2), Some(2));
        assert!(actions.contains(&Action::PersistEntries(vec![e(2, 2)])));
        assert_eq!(core.commit_index(), 2);
    }
}
