// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Generic reply collection.

use crate::config::NodeId;
use std::collections::BTreeSet;

/// Default client reply quorum for `n` replicas tolerating `f` faults.
pub fn reply_quorum(n: usize, f: usize) -> usize {
    (n + f) / 2 + 1
}

/// Groups replies by an equivalence relation and reports the first group
/// to reach `quorum` distinct senders.
pub struct QuorumCollector<T, F> {
    quorum: usize,
    equivalent: F,
    groups: Vec<Vec<(NodeId, T)>>,
    senders: BTreeSet<NodeId>,
}

impl<T, F> QuorumCollector<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    pub fn new(quorum: usize, equivalent: F) -> Self {
        Self { quorum, equivalent, groups: Vec::new(), senders: BTreeSet::new() }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Replies counted so far (one per sender).
    pub fn received(&self) -> usize {
        self.senders.len()
    }

    /// Add a reply. Later replies from the same sender are ignored.
    pub fn add(&mut self, from: NodeId, reply: T) -> Option<&[(NodeId, T)]> {
        if !self.senders.insert(from) {
            return None;
        }
        let position = self.groups.iter().position(|g| (self.equivalent)(&g[0].1, &reply));
        let index = match position {
            Some(i) => {
                self.groups[i].push((from, reply));
                i
            }
            None => {
                self.groups.push(vec![(from, reply)]);
                self.groups.len() - 1
            }
        };
        let group = &self.groups[index];
        (group.len() >= self.quorum).then_some(group.as_slice())
    }
}
