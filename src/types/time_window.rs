// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Caller-declared validity interval.

use serde::{Deserialize, Serialize};

/// Instants are milliseconds since the UNIX epoch.
///
/// `from_time` is inclusive and `until_time` exclusive, so a window
/// contains `now` when `from_time <= now < until_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from_time: Option<u64>,
    pub until_time: Option<u64>,
}

impl TimeWindow {
    pub fn between(from_time: u64, until_time: u64) -> Self {
        Self { from_time: Some(from_time), until_time: Some(until_time) }
    }

    pub fn from_only(from_time: u64) -> Self {
        Self { from_time: Some(from_time), until_time: None }
    }

    pub fn until_only(until_time: u64) -> Self {
        Self { from_time: None, until_time: Some(until_time) }
    }

    pub fn contains(&self, now: u64) -> bool {
        let after_start = self.from_time.map_or(true, |from| now >= from);
        let before_end = self.until_time.map_or(true, |until| now < until);
        after_start && before_end
    }

    /// A window with neither bound says nothing and is rejected upstream.
    pub fn is_bounded(&self) -> bool {
        self.from_time.is_some() || self.until_time.is_some()
    }
}
