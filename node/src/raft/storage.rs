// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable Raft state: hard state, log entries and the latest snapshot.

use super::core::{HardState, SnapshotMeta};
use super::message::{Entry, LogIndex};
use notary_kernel::CommitLogState;
use notary_persistence::log::LogWriter;
use notary_persistence::{record, snapshot, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a node needs to resume.
#[derive(Debug, Default)]
pub struct Recovered {
    pub hard_state: HardState,
    pub snapshot: Option<(SnapshotMeta, CommitLogState)>,
    pub entries: Vec<Entry>,
}

pub trait RaftStorage: Send + 'static {
    fn load(&mut self) -> Result<Recovered>;
    fn save_hard_state(&mut self, hard: HardState) -> Result<()>;
    /// Append entries; an entry discards any stored entry at its index or later.
    fn append(&mut self, entries: &[Entry]) -> Result<()>;
    /// Persist a snapshot and drop log entries it covers. `remaining` is
    /// the in-memory log after the snapshot point.
    fn save_snapshot(&mut self, meta: &SnapshotMeta, state: &CommitLogState, remaining: &[Entry]) -> Result<()>;
}

/// Volatile storage for tests and throwaway clusters.
#[derive(Debug, Default)]
pub struct MemoryStorage;

impl RaftStorage for MemoryStorage {
    fn load(&mut self) -> Result<Recovered> {
        Ok(Recovered::default())
    }

    fn save_hard_state(&mut self, _hard: HardState) -> Result<()> {
        Ok(())
    }

    fn append(&mut self, _entries: &[Entry]) -> Result<()> {
        Ok(())
    }

    fn save_snapshot(&mut self, _meta: &SnapshotMeta, _state: &CommitLogState, _remaining: &[Entry]) -> Result<()> {
        Ok(())
    }
}

/// Files under one directory:
/// - `hard_state`: term and vote
/// - `raft.log`: entry stream
/// - `snapshot.bin`: latest state snapshot
pub struct FileStorage {
    dir: PathBuf,
    log: Option<LogWriter>,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf(), log: None })
    }

    fn hard_state_path(&self) -> PathBuf {
        self.dir.join("hard_state")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("raft.log")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("snapshot.bin")
    }

    fn writer(&mut self) -> Result<&mut LogWriter> {
        let writer = match self.log.take() {
            Some(writer) => writer,
            None => LogWriter::open(self.log_path(), true)?.0,
        };
        Ok(self.log.insert(writer))
    }
}

impl RaftStorage for FileStorage {
    fn load(&mut self) -> Result<Recovered> {
        let hard_state = record::load(self.hard_state_path())?.unwrap_or_default();

        let snapshot = match snapshot::load_state(self.snapshot_path())? {
            Some((header, state)) => {
                let data = notary_kernel::snapshot::encode_state(&state)?;
                let meta = SnapshotMeta {
                    last_index: header.last_index,
                    last_term: header.last_term,
                    data: Arc::new(data),
                };
                Some((meta, state))
            }
            None => None,
        };
        let floor: LogIndex = snapshot.as_ref().map_or(0, |(meta, _)| meta.last_index);

        let (writer, stored) = LogWriter::open(self.log_path(), true)?;
        self.log = Some(writer);

        let mut entries: Vec<Entry> = Vec::new();
        for raw in stored {
            let entry: Entry = raw.decode()?;
            if entry.index <= floor {
                continue;
            }
            // A rewritten index replaces the old suffix
            while entries.last().map_or(false, |last| last.index >= entry.index) {
                entries.pop();
            }
            let expected = entries.last().map_or(floor + 1, |last| last.index + 1);
            if entry.index != expected {
                return Err(notary_persistence::PersistenceError::InvalidFormat(format!(
                    "raft log gap: expected index {}, found {}",
                    expected, entry.index
                )));
            }
            entries.push(entry);
        }

        Ok(Recovered { hard_state, snapshot, entries })
    }

    fn save_hard_state(&mut self, hard: HardState) -> Result<()> {
        record::store(self.hard_state_path(), &hard)
    }

    fn append(&mut self, entries: &[Entry]) -> Result<()> {
        let writer = self.writer()?;
        for entry in entries {
            writer.append_value(entry.index, entry)?;
        }
        Ok(())
    }

    fn save_snapshot(&mut self, meta: &SnapshotMeta, state: &CommitLogState, remaining: &[Entry]) -> Result<()> {
        snapshot::save_state(self.snapshot_path(), state, meta.last_index, meta.last_term)?;

        let encoded = remaining
            .iter()
            .map(|e| notary_persistence::encode_value(e).map(|bytes| (e.index, bytes)))
            .collect::<Result<Vec<_>>>()?;
        self.writer()?.rewrite(encoded.iter().map(|(i, b)| (*i, b.as_slice())))
    }
}
