// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Unspent states cache.
//!
//! Tracks, per transaction, which outputs have been spent. It is an
//! accelerator only: an untracked transaction means "unknown", never
//! "unspent", and eviction simply forgets. The commit log stays the source
//! of truth.
//!
//! Spends of untracked transactions are remembered for a while, stamped
//! with a sequence number. `track_since` refuses to start tracking a
//! transaction that had an output spent after the caller's stamp, or when
//! the history no longer reaches back that far.

use notary_kernel::{SecureHash, StateRef};
use quick_cache::sync::Cache as QuickCache;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Untracked spends remembered for `track_since`.
const RECENT_SPENDS: usize = 4096;

/// Spent flags for the outputs of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpentBits {
    words: Vec<u64>,
}

impl SpentBits {
    pub fn is_set(&self, index: u32) -> bool {
        let (word, bit) = ((index / 64) as usize, index % 64);
        self.words.get(word).map_or(false, |w| w & (1u64 << bit) != 0)
    }

    pub fn set(&mut self, index: u32) {
        let (word, bit) = ((index / 64) as usize, index % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << bit;
    }
}

#[derive(Default)]
struct RecentSpends {
    seq: u64,
    /// Highest sequence number pushed out of `spends`.
    horizon: u64,
    spends: VecDeque<(u64, SecureHash)>,
}

pub struct UnspentStatesCache {
    entries: QuickCache<SecureHash, SpentBits>,
    // Serialises read-modify-write so no bit is lost between get and insert.
    recent: Mutex<RecentSpends>,
}

impl UnspentStatesCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: QuickCache::new(capacity.max(1)),
            recent: Mutex::new(RecentSpends::default()),
        }
    }

    /// Start tracking `tx` with every output unspent. No-op if tracked.
    pub fn mark_unspent(&self, tx: SecureHash) {
        let _guard = self.lock();
        if self.entries.get(&tx).is_none() {
            self.entries.insert(tx, SpentBits::default());
        }
    }

    /// Stamp to pass to `track_since`, taken before the commit is sent.
    pub fn stamp(&self) -> u64 {
        self.lock().seq
    }

    /// `mark_unspent`, unless an output of `tx` was spent while untracked
    /// after `stamp`. Returns whether `tx` is tracked afterwards.
    pub fn track_since(&self, tx: SecureHash, stamp: u64) -> bool {
        let recent = self.lock();
        if self.entries.get(&tx).is_some() {
            return true;
        }
        if recent.horizon > stamp || recent.spends.iter().any(|(seq, h)| *seq > stamp && *h == tx) {
            return false;
        }
        self.entries.insert(tx, SpentBits::default());
        true
    }

    /// True only when every ref's transaction is tracked and its output
    /// is not marked spent.
    pub fn is_all_unspent(&self, refs: &[StateRef]) -> bool {
        refs.iter().all(|r| match self.entries.get(&r.txhash) {
            Some(bits) => !bits.is_set(r.index),
            None => false,
        })
    }

    /// Mark outputs spent for transactions that are tracked, and remember
    /// the rest for `track_since`.
    pub fn mark_all_as_spent(&self, refs: &[StateRef]) {
        let mut recent = self.lock();
        for r in refs {
            match self.entries.get(&r.txhash) {
                Some(mut bits) => {
                    bits.set(r.index);
                    self.entries.insert(r.txhash, bits);
                }
                None => {
                    recent.seq += 1;
                    let seq = recent.seq;
                    recent.spends.push_back((seq, r.txhash));
                    if recent.spends.len() > RECENT_SPENDS {
                        if let Some((dropped, _)) = recent.spends.pop_front() {
                            recent.horizon = dropped;
                        }
                    }
                }
            }
        }
    }

    pub fn is_tracked(&self, tx: &SecureHash) -> bool {
        self.entries.get(tx).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecentSpends> {
        // Every update to RecentSpends is complete before it can panic.
        self.recent.lock().unwrap_or_else(|e| e.into_inner())
    }
}
