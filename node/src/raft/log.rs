// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory Raft log with a snapshot offset.
//!
//! Entries up to and including `offset_index` live only in the snapshot.
//! Index 0 with term 0 is the empty prefix every log shares.

use super::message::{Entry, LogIndex, Term};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RaftLog {
    offset_index: LogIndex,
    offset_term: Term,
    entries: Vec<Entry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(offset_index: LogIndex, offset_term: Term) -> Self {
        Self { offset_index, offset_term, entries: Vec::new() }
    }

    pub fn offset_index(&self) -> LogIndex {
        self.offset_index
    }

    pub fn offset_term(&self) -> Term {
        self.offset_term
    }

    pub fn last_index(&self) -> LogIndex {
        self.offset_index + self.entries.len() as LogIndex
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map_or(self.offset_term, |e| e.term)
    }

    /// Term of the entry at `index`; `None` if compacted away or absent.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == self.offset_index {
            return Some(self.offset_term);
        }
        self.get(index).map(|e| e.term)
    }

    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        if index <= self.offset_index {
            return None;
        }
        self.entries.get((index - self.offset_index - 1) as usize)
    }

    /// Up to `max` entries starting at `from`.
    pub fn entries_from(&self, from: LogIndex, max: usize) -> Vec<Entry> {
        if from <= self.offset_index {
            return Vec::new();
        }
        let start = (from - self.offset_index - 1) as usize;
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    /// Entries in `from..=to`.
    pub fn slice(&self, from: LogIndex, to: LogIndex) -> Vec<Entry> {
        if to < from {
            return Vec::new();
        }
        self.entries_from(from, (to - from + 1) as usize)
    }

    pub fn append(&mut self, entry: Entry) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.entries.push(entry);
    }

    /// Drop `from` and everything after it.
    pub fn truncate_from(&mut self, from: LogIndex) {
        if from <= self.offset_index {
            self.entries.clear();
            return;
        }
        self.entries.truncate((from - self.offset_index - 1) as usize);
    }

    /// Forget entries up to `index`, now covered by a snapshot.
    pub fn compact(&mut self, index: LogIndex, term: Term) {
        if index <= self.offset_index {
            return;
        }
        if index >= self.last_index() {
            self.entries.clear();
        } else {
            self.entries.drain(..(index - self.offset_index) as usize);
        }
        self.offset_index = index;
        self.offset_term = term;
    }

    /// Replace everything with a snapshot boundary.
    pub fn reset(&mut self, index: LogIndex, term: Term) {
        self.entries.clear();
        self.offset_index = index;
        self.offset_term = term;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
