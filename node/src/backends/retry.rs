// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Retry classification and exponential backoff for storage operations.

use rusqlite::ErrorCode;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient: the same operation may succeed if repeated.
    Retry,
    Fatal,
}

/// SQLite busy and locked errors are transient; everything else is fatal.
pub fn classify_sqlite(err: &rusqlite::Error) -> RetryClass {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => RetryClass::Retry,
        _ => RetryClass::Fatal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Backoff {
    const MAX_SHIFT: u32 = 10;

    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    /// Delay before retry number `retry` (0-based): base, 2·base, 4·base …
    pub fn delay(&self, retry: u32) -> Duration {
        self.base.saturating_mul(1u32 << retry.min(Self::MAX_SHIFT))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    Fatal(E),
    Exhausted { attempts: u32, last: E },
}

/// Run `op` until it succeeds, fails fatally, or the retries run out.
/// Blocks the calling thread between attempts.
pub fn with_retry<T, E, F, C>(backoff: &Backoff, classify: C, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    C: Fn(&E) -> RetryClass,
{
    let mut retry = 0;
    loop {
        match op(retry) {
            Ok(v) => return Ok(v),
            Err(e) => match classify(&e) {
                RetryClass::Fatal => return Err(RetryError::Fatal(e)),
                RetryClass::Retry if retry >= backoff.max_retries => {
                    return Err(RetryError::Exhausted { attempts: retry + 1, last: e })
                }
                RetryClass::Retry => {
                    metrics::increment_counter!("notary_db_retries_total");
                    std::thread::sleep(backoff.delay(retry));
                    retry += 1;
                }
            },
        }
    }
}
