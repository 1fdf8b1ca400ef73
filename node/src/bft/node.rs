// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Async driver around `BftReplica`.

use super::message::{BftEnvelope, SignedMessage};
use super::replica::{BftReplica, BftStatus};
use super::transport::BftTransport;
use super::BftError;
use crate::clock::Clock;
use crate::config::NodeId;
use notary_kernel::CommitLogState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const INBOX_CAPACITY: usize = 4096;

enum Input {
    Message(SignedMessage),
    Status(oneshot::Sender<BftStatus>),
    State(oneshot::Sender<CommitLogState>),
}

#[derive(Clone)]
pub struct BftHandle {
    id: NodeId,
    inbox: mpsc::Sender<Input>,
}

impl BftHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn deliver(&self, signed: SignedMessage) {
        if let Err(e) = self.inbox.try_send(Input::Message(signed)) {
            tracing::debug!(id = self.id, error = %e, "Replica inbox rejected message");
        }
    }

    pub async fn status(&self) -> Result<BftStatus, BftError> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(Input::Status(tx)).await.map_err(|_| BftError::Stopped)?;
        rx.await.map_err(|_| BftError::Stopped)
    }

    /// Copy of the replica's commit-log state.
    pub async fn state(&self) -> Result<CommitLogState, BftError> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(Input::State(tx)).await.map_err(|_| BftError::Stopped)?;
        rx.await.map_err(|_| BftError::Stopped)
    }
}

pub struct BftNode {
    replica: BftReplica,
    transport: Arc<dyn BftTransport>,
    clock: Arc<dyn Clock>,
    inbox: mpsc::Receiver<Input>,
}

impl BftNode {
    pub fn start(
        replica: BftReplica,
        transport: Arc<dyn BftTransport>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> (BftHandle, JoinHandle<()>) {
        let id = replica.id();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let node = BftNode { replica, transport, clock, inbox: rx };
        let task = tokio::spawn(node.run(tick_interval, cancel));
        (BftHandle { id, inbox: tx }, task)
    }

    async fn run(mut self, tick_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(id = self.replica.id(), "BFT replica started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let out = self.replica.tick(self.clock.now_millis());
                    self.send_all(out);
                }
                input = self.inbox.recv() => match input {
                    Some(Input::Message(signed)) => {
                        let out = self.replica.step(signed, self.clock.now_millis());
                        self.send_all(out);
                    }
                    Some(Input::Status(tx)) => {
                        let _ = tx.send(self.replica.status());
                    }
                    Some(Input::State(tx)) => {
                        let _ = tx.send(self.replica.state().clone());
                    }
                    None => break,
                },
            }
        }
        tracing::info!(id = self.replica.id(), "BFT replica stopped");
    }

    fn send_all(&self, out: Vec<BftEnvelope>) {
        for envelope in out {
            self.transport.send(envelope);
        }
    }
}
