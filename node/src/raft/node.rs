// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Async driver around `RaftCore`.
//!
//! One task owns the core, the commit-log state machine and the storage.
//! Everything else talks to it through a `RaftHandle`. Actions are carried
//! out in the order the core emits them, so state is on disk before any
//! message that depends on it leaves the node.

use super::core::{Action, HardState, RaftCore, RaftStatus, SnapshotMeta};
use super::message::{Entry, Envelope, LogIndex, ProposeOutcome, Term};
use super::storage::RaftStorage;
use super::transport::RaftTransport;
use super::RaftError;
use crate::clock::Clock;
use crate::config::{NodeId, RaftSettings};
use metrics::{gauge, increment_counter};
use notary_kernel::snapshot::{decode_state, encode_state};
use notary_kernel::{Command, CommitLogState, CommitRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const INBOX_CAPACITY: usize = 4096;

enum Input {
    Message(Envelope),
    Propose {
        request: CommitRequest,
        reply: oneshot::Sender<ProposeOutcome>,
    },
    Status(oneshot::Sender<RaftStatus>),
    State(oneshot::Sender<CommitLogState>),
}

/// Cheap, cloneable access to a running node.
#[derive(Clone)]
pub struct RaftHandle {
    id: NodeId,
    inbox: mpsc::Sender<Input>,
}

impl RaftHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Hand over a message from a peer. Dropped when the inbox is full.
    pub fn deliver(&self, envelope: Envelope) {
        if let Err(e) = self.inbox.try_send(Input::Message(envelope)) {
            tracing::debug!(id = self.id, error = %e, "Raft inbox rejected message");
        }
    }

    /// Propose a commit to this node. Followers answer `NotLeader`.
    pub async fn propose(&self, request: CommitRequest) -> ProposeOutcome {
        let (reply, rx) = oneshot::channel();
        if self.inbox.send(Input::Propose { request, reply }).await.is_err() {
            return ProposeOutcome::Unknown("raft node stopped".to_string());
        }
        rx.await
            .unwrap_or_else(|_| ProposeOutcome::Unknown("raft node stopped".to_string()))
    }

    pub async fn status(&self) -> Result<RaftStatus, RaftError> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(Input::Status(tx)).await.map_err(|_| RaftError::Stopped)?;
        rx.await.map_err(|_| RaftError::Stopped)
    }

    /// Copy of the applied commit-log state.
    pub async fn state(&self) -> Result<CommitLogState, RaftError> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(Input::State(tx)).await.map_err(|_| RaftError::Stopped)?;
        rx.await.map_err(|_| RaftError::Stopped)
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

pub struct RaftNode {
    core: RaftCore,
    machine: CommitLogState,
    storage: Box<dyn RaftStorage>,
    transport: Arc<dyn RaftTransport>,
    clock: Arc<dyn Clock>,
    settings: RaftSettings,
    /// Open proposals by log index, with the term they were appended in.
    pending: BTreeMap<LogIndex, (Term, oneshot::Sender<ProposeOutcome>)>,
    last_self_vote: Term,
    inbox: mpsc::Receiver<Input>,
}

impl RaftNode {
    /// Recover from `storage` and start driving the node on a tokio task.
    pub fn start(
        id: NodeId,
        members: &[NodeId],
        settings: RaftSettings,
        mut storage: Box<dyn RaftStorage>,
        transport: Arc<dyn RaftTransport>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Result<(RaftHandle, JoinHandle<()>), RaftError> {
        let recovered = storage.load()?;

        let mut core = RaftCore::new(id, members, settings.clone());
        let (snapshot, machine) = match recovered.snapshot {
            Some((meta, state)) => (Some(meta), state),
            None => (None, CommitLogState::new()),
        };
        tracing::info!(
            id,
            term = recovered.hard_state.term,
            snapshot_index = snapshot.as_ref().map_or(0, |s| s.last_index),
            entries = recovered.entries.len(),
            "Raft node recovered"
        );
        core.restore(recovered.hard_state, snapshot, recovered.entries);

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let node = RaftNode {
            core,
            machine,
            storage,
            transport,
            clock,
            settings,
            pending: BTreeMap::new(),
            last_self_vote: 0,
            inbox: rx,
        };
        let task = tokio::spawn(node.run(cancel));
        Ok((RaftHandle { id, inbox: tx }, task))
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let actions = self.core.tick();
                    self.execute(actions)
                }
                input = self.inbox.recv() => match input {
                    Some(input) => self.handle(input),
                    None => break,
                },
            };
            if let Err(e) = step {
                tracing::error!(id = self.core.id(), error = %e, "Raft node halted");
                break;
            }
        }

        self.fail_pending(|_| true, "raft node stopped");
        tracing::info!(id = self.core.id(), "Raft node stopped");
    }

    fn handle(&mut self, input: Input) -> Result<(), RaftError> {
        match input {
            Input::Message(envelope) => {
                let actions = self.core.step(envelope);
                self.execute(actions)
            }
            Input::Propose { request, reply } => {
                // The leader fixes the time so every replica decides alike.
                let command = Command::Commit { request, request_time: self.clock.now_millis() };
                match self.core.propose(command) {
                    Ok((index, term, actions)) => {
                        self.pending.insert(index, (term, reply));
                        self.execute(actions)
                    }
                    Err(leader_hint) => {
                        let _ = reply.send(ProposeOutcome::NotLeader { leader_hint });
                        Ok(())
                    }
                }
            }
            Input::Status(tx) => {
                let _ = tx.send(self.core.status());
                Ok(())
            }
            Input::State(tx) => {
                let _ = tx.send(self.machine.clone());
                Ok(())
            }
        }
    }

    fn execute(&mut self, actions: Vec<Action>) -> Result<(), RaftError> {
        for action in actions {
            match action {
                Action::Send(envelope) => self.transport.send(envelope),
                Action::PersistHardState(hard) => self.persist_hard_state(hard)?,
                Action::PersistEntries(entries) => self.storage.append(&entries)?,
                Action::Apply(entries) => {
                    for entry in entries {
                        self.apply(entry);
                    }
                    self.maybe_snapshot()?;
                }
                Action::RestoreSnapshot(meta) => self.restore_snapshot(meta)?,
                Action::SteppedDown => self.fail_pending(|_| true, "leadership lost"),
            }
        }

        gauge!("notary_raft_term", self.core.term() as f64);
        gauge!("notary_raft_commit_index", self.core.commit_index() as f64);
        Ok(())
    }

    fn persist_hard_state(&mut self, hard: HardState) -> Result<(), RaftError> {
        if hard.voted_for == Some(self.core.id()) && hard.term > self.last_self_vote {
            self.last_self_vote = hard.term;
            increment_counter!("notary_raft_elections_total");
        }
        self.storage.save_hard_state(hard)?;
        Ok(())
    }

    fn apply(&mut self, entry: Entry) {
        let result = self.machine.apply(&entry.command);
        let Some((term, reply)) = self.pending.remove(&entry.index) else {
            return;
        };
        let outcome = match result {
            Some(result) if term == entry.term => ProposeOutcome::Applied(result),
            _ => ProposeOutcome::Unknown("entry replaced by a newer leader".to_string()),
        };
        let _ = reply.send(outcome);
    }

    fn maybe_snapshot(&mut self) -> Result<(), RaftError> {
        let applied = self.core.last_applied();
        if applied.saturating_sub(self.core.log().offset_index()) < self.settings.snapshot_threshold {
            return Ok(());
        }
        let data = encode_state(&self.machine).map_err(|e| RaftError::Snapshot(e.to_string()))?;
        let Some(meta) = self.core.compact(applied, data) else {
            return Ok(());
        };
        let remaining = self.core.log().entries_from(meta.last_index + 1, usize::MAX);
        self.storage.save_snapshot(&meta, &self.machine, &remaining)?;

        increment_counter!("notary_raft_snapshots_total");
        tracing::info!(id = self.core.id(), index = meta.last_index, "Raft log compacted");
        Ok(())
    }

    fn restore_snapshot(&mut self, meta: SnapshotMeta) -> Result<(), RaftError> {
        let state = decode_state(&meta.data).map_err(|e| RaftError::Snapshot(e.to_string()))?;
        self.machine = state;
        let remaining = self.core.log().entries_from(meta.last_index + 1, usize::MAX);
        self.storage.save_snapshot(&meta, &self.machine, &remaining)?;

        // Proposals covered by the snapshot were decided elsewhere.
        self.fail_pending(|index| index <= meta.last_index, "superseded by snapshot");
        tracing::info!(id = self.core.id(), index = meta.last_index, "Installed snapshot from leader");
        Ok(())
    }

    fn fail_pending(&mut self, covers: impl Fn(LogIndex) -> bool, reason: &str) {
        let doomed: Vec<LogIndex> = self.pending.keys().copied().filter(|i| covers(*i)).collect();
        for index in doomed {
            if let Some((_, reply)) = self.pending.remove(&index) {
                let _ = reply.send(ProposeOutcome::Unknown(reason.to_string()));
            }
        }
    }
}
