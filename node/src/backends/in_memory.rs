// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Single-process provider.
//!
//! Owns its commit log; the whole read-check-write of a request runs under
//! one async mutex, so two callers can never both claim a state.

use crate::clock::{Clock, SystemClock};
use crate::provider::{CommitFuture, CommitReceipt, ReceiptFuture, UniquenessProvider};
use notary_kernel::{CommitLogState, CommitRequest};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct InMemoryProvider {
    state: Mutex<CommitLogState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::from_state(CommitLogState::new(), clock)
    }

    pub fn from_state(state: CommitLogState, clock: Arc<dyn Clock>) -> Self {
        Self { state: Mutex::new(state), clock }
    }

    /// Read the commit log under the lock.
    pub async fn with_state<R>(&self, f: impl FnOnce(&CommitLogState) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl UniquenessProvider for InMemoryProvider {
    fn commit(&self, request: CommitRequest) -> CommitFuture<'_> {
        let pending = self.commit_with_receipt(request);
        Box::pin(async move { Ok(pending.await?.result) })
    }

    fn commit_with_receipt(&self, request: CommitRequest) -> ReceiptFuture<'_> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let decision = state.settle(&request, self.clock.now_millis());
            Ok(CommitReceipt { fresh_outputs: decision.fresh_outputs(), result: decision.into_result() })
        })
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
