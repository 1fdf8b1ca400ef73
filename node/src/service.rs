// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Front door for commit requests.
//!
//! Wraps a provider with request validation, the unspent-states cache,
//! the out-of-band request log (for providers that cannot write it
//! themselves) and metrics.

use crate::audit::RequestLog;
use crate::cache::UnspentStatesCache;
use crate::clock::{Clock, SystemClock};
use crate::errors::ProviderError;
use crate::provider::{CommitReceipt, UniquenessProvider};
use metrics::{counter, histogram, increment_counter};
use notary_kernel::{CommitRequest, UniquenessResult};
use std::sync::Arc;
use std::time::Instant;

pub struct NotaryService {
    provider: Arc<dyn UniquenessProvider>,
    cache: Option<Arc<UnspentStatesCache>>,
    request_log: Option<Arc<RequestLog>>,
    clock: Arc<dyn Clock>,
}

impl NotaryService {
    pub fn new(provider: Arc<dyn UniquenessProvider>) -> Self {
        Self { provider, cache: None, request_log: None, clock: Arc::new(SystemClock) }
    }

    pub fn with_cache(mut self, cache: Arc<UnspentStatesCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_request_log(mut self, log: Arc<RequestLog>) -> Self {
        self.request_log = Some(log);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend(&self) -> &'static str {
        self.provider.name()
    }

    pub fn cache(&self) -> Option<&UnspentStatesCache> {
        self.cache.as_deref()
    }

    pub fn request_log(&self) -> Option<&RequestLog> {
        self.request_log.as_deref()
    }

    pub async fn commit(&self, request: CommitRequest) -> Result<UniquenessResult, ProviderError> {
        if let Some(log) = &self.request_log {
            log.append(request.record(self.clock.now_millis()))?;
        }

        if let Some(window) = &request.time_window {
            if !window.is_bounded() {
                return Err(ProviderError::InvalidRequest("time window has neither bound".into()));
            }
        }

        let tx_id = request.tx_id;
        let inputs = request.states.clone();
        // Hit rate only: a consuming commit always goes to the backend.
        let stamp = self.cache.as_ref().map(|cache| {
            if cache.is_all_unspent(&inputs) && cache.is_all_unspent(&request.references) {
                increment_counter!("notary_cache_hits_total");
            } else {
                increment_counter!("notary_cache_misses_total");
            }
            cache.stamp()
        });

        let start = Instant::now();
        let receipt = self.provider.commit_with_receipt(request).await;
        histogram!("notary_commit_duration_seconds", start.elapsed().as_secs_f64());

        match &receipt {
            Ok(CommitReceipt { result: outcome, fresh_outputs }) => {
                counter!("notary_commits_total", 1, "outcome" => outcome.outcome());
                if let Some(conflicts) = outcome.conflicts() {
                    counter!("notary_conflicts_total", conflicts.len() as u64);
                    tracing::info!(tx = %tx_id, conflicts = conflicts.len(), "Commit rejected");
                } else if let Some(error) = outcome.error() {
                    tracing::info!(tx = %tx_id, error = %error, "Commit rejected");
                } else {
                    tracing::debug!(tx = %tx_id, inputs = inputs.len(), backend = self.provider.name(), "Commit accepted");
                }

                if let (true, Some(cache), Some(stamp)) = (outcome.is_success(), &self.cache, stamp) {
                    cache.mark_all_as_spent(&inputs);
                    // Replays and late first commits may have spent outputs
                    if *fresh_outputs && !cache.track_since(tx_id, stamp) {
                        tracing::debug!(tx = %tx_id, "Outputs spent while untracked, not caching");
                    }
                }
            }
            Err(e) => {
                counter!("notary_commits_total", 1, "outcome" => "error");
                tracing::warn!(tx = %tx_id, error = %e, backend = self.provider.name(), "Commit failed");
            }
        }

        receipt.map(|r| r.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryProvider;
    use crate::clock::ManualClock;
    use notary_kernel::{Party, SecureHash, StateRef, TimeWindow};

    fn service() -> NotaryService {
        let clock = Arc::new(ManualClock::new(1_000));
        NotaryService::new(Arc::new(InMemoryProvider::new(clock.clone())))
            .with_cache(Arc::new(UnspentStatesCache::new(64)))
            .with_clock(clock)
    }

    fn tx(n: u8) -> SecureHash {
        SecureHash::hash_of(&[n])
    }

    fn request(states: Vec<StateRef>, id: SecureHash) -> CommitRequest {
        CommitRequest::new(states, id, Party::new("O=Bob,L=Zurich,C=CH"))
    }

    #[tokio::test]
    async fn test_unbounded_window_rejected() {
        let svc = service().with_request_log(Arc::new(RequestLog::in_memory("svc-0")));
        let mut req = request(vec![StateRef::new(tx(1), 0)], tx(2));
        req.time_window = Some(TimeWindow { from_time: None, until_time: None });
        assert!(matches!(svc.commit(req).await, Err(ProviderError::InvalidRequest(_))));

        // The rejected attempt is still on record
        let rows = svc.request_log().unwrap().memory_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.consuming_tx, tx(2));
    }

    #[tokio::test]
    async fn test_success_updates_cache() {
        let svc = service();
        let cache = svc.cache().unwrap();
        cache.mark_unspent(tx(1));

        let input = StateRef::new(tx(1), 0);
        assert!(cache.is_all_unspent(&[input]));
        let result = svc.commit(request(vec![input], tx(2))).await.unwrap();
        assert!(result.is_success());

        assert!(!cache.is_all_unspent(&[input]));
        assert!(cache.is_all_unspent(&[StateRef::new(tx(1), 1)]));
        assert!(cache.is_tracked(&tx(2)));
        assert!(cache.is_all_unspent(&[StateRef::new(tx(2), 0)]));
    }

    #[tokio::test]
    async fn test_conflict_leaves_cache_alone() {
        let svc = service();
        let input = StateRef::new(tx(1), 0);
        svc.commit(request(vec![input], tx(2))).await.unwrap();
        let result = svc.commit(request(vec![input], tx(3))).await.unwrap();
        assert!(!result.is_success());
        assert!(!svc.cache().unwrap().is_tracked(&tx(3)));
    }

    #[tokio::test]
    async fn test_replay_after_eviction_does_not_revive_spent_output() {
        let clock = Arc::new(ManualClock::new(1_000));
        let svc = NotaryService::new(Arc::new(InMemoryProvider::new(clock.clone())))
            .with_cache(Arc::new(UnspentStatesCache::new(1)))
            .with_clock(clock);
        let cache = svc.cache().unwrap();

        let t2 = request(vec![StateRef::new(tx(1), 0)], tx(2));
        assert!(svc.commit(t2.clone()).await.unwrap().is_success());
        assert!(cache.is_tracked(&tx(2)));

        // Churn until tx(2) falls out of the cache
        for n in 0..10_000u32 {
            if !cache.is_tracked(&tx(2)) {
                break;
            }
            cache.mark_unspent(SecureHash::hash_of(&n.to_le_bytes()));
        }
        assert!(!cache.is_tracked(&tx(2)));

        let spent = StateRef::new(tx(2), 0);
        assert!(svc.commit(request(vec![spent], tx(3))).await.unwrap().is_success());
        assert!(svc.commit(t2).await.unwrap().is_success());

        assert!(!cache.is_all_unspent(&[spent]));
    }

    #[tokio::test]
    async fn test_output_spent_before_its_transaction_is_not_cached() {
        let svc = service();
        let cache = svc.cache().unwrap();

        // tx(3) spends an output of tx(2) before tx(2) is notarised
        let early = StateRef::new(tx(2), 0);
        assert!(svc.commit(request(vec![early], tx(3))).await.unwrap().is_success());
        assert!(svc.commit(request(vec![StateRef::new(tx(1), 0)], tx(2))).await.unwrap().is_success());

        assert!(!cache.is_all_unspent(&[early]));
    }

    #[tokio::test]
    async fn test_request_log_written_per_attempt() {
        let svc = service().with_request_log(Arc::new(RequestLog::in_memory("svc-0")));
        let input = StateRef::new(tx(1), 0);
        svc.commit(request(vec![input], tx(2))).await.unwrap();
        svc.commit(request(vec![input], tx(3))).await.unwrap();

        let rows = svc.request_log().unwrap().memory_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].record.consuming_tx, tx(3));
        assert_eq!(rows[1].record.request_time, 1_000);
        assert!(rows.iter().all(|r| r.worker == "svc-0"));
    }
}
