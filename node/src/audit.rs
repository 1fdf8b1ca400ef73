// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Notary request log kept outside the commit log.
//!
//! Backends whose storage cannot take the audit row in the same atomic
//! unit as the decision (BFT) have the service layer write it here.
//! The file is a `notary_persistence::log` stream of bincode rows.

use crate::errors::ProviderError;
use notary_kernel::RequestRecord;
use notary_persistence::log::{read_stream, LogWriter};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRow {
    /// Node that accepted the request.
    pub worker: String,
    pub record: RequestRecord,
}

enum Sink {
    File(LogWriter),
    Memory(Vec<AuditRow>),
}

pub struct RequestLog {
    worker: String,
    inner: Mutex<(Sink, u64)>,
}

impl RequestLog {
    /// Open (or create) a file-backed log, continuing its sequence.
    pub fn open(path: impl AsRef<Path>, worker: impl Into<String>) -> Result<Self, ProviderError> {
        let (writer, existing) = LogWriter::open(path, true)?;
        let next = existing.last().map_or(0, |e| e.index() + 1);
        Ok(Self { worker: worker.into(), inner: Mutex::new((Sink::File(writer), next)) })
    }

    pub fn in_memory(worker: impl Into<String>) -> Self {
        Self { worker: worker.into(), inner: Mutex::new((Sink::Memory(Vec::new()), 0)) }
    }

    pub fn append(&self, record: RequestRecord) -> Result<(), ProviderError> {
        let row = AuditRow { worker: self.worker.clone(), record };
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (sink, next) = &mut *guard;
        match sink {
            Sink::File(writer) => writer.append_value(*next, &row)?,
            Sink::Memory(rows) => rows.push(row),
        }
        *next += 1;
        Ok(())
    }

    /// Number of rows written through this handle or found on open.
    pub fn len(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows held by an in-memory log. File logs are read with `read_rows`.
    pub fn memory_rows(&self) -> Vec<AuditRow> {
        match &self.inner.lock().unwrap_or_else(|e| e.into_inner()).0 {
            Sink::Memory(rows) => rows.clone(),
            Sink::File(_) => Vec::new(),
        }
    }
}

pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<AuditRow>, ProviderError> {
    let mut rows = Vec::new();
    for entry in read_stream(path)? {
        rows.push(entry?.decode()?);
    }
    Ok(rows)
}
