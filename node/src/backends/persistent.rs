// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! SQLite-backed provider.
//!
//! One worker thread owns the write connection and drains the request queue
//! in batches. A batch is one `BEGIN IMMEDIATE` transaction; each request
//! inside it runs in its own savepoint, so a conflicting request leaves no
//! trace except its request-log row, and later requests in the batch see
//! the states claimed by earlier ones.
//!
//! # Tables
//! - `notary_committed_states`: one row per consumed state, keyed by
//!   `(issue_transaction_id, issue_transaction_output_index)`
//! - `notary_committed_transactions`: notarised transaction ids
//! - `notary_request_log`: one row per attempt

use crate::backends::retry::{classify_sqlite, with_retry, Backoff, RetryError};
use crate::clock::Clock;
use crate::errors::ProviderError;
use crate::provider::{CommitFuture, CommitReceipt, ReceiptFuture, UniquenessProvider};
use notary_kernel::{
    decide, CommitIndex, CommitRequest, ConsumingTxInfo, Decision, Party, SecureHash, StateRef,
    UniquenessResult,
};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

const QUEUE_CAPACITY: usize = 100_000;
const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS notary_committed_states (
    issue_transaction_id BLOB NOT NULL,
    issue_transaction_output_index INTEGER NOT NULL,
    consuming_transaction_id BLOB NOT NULL,
    consuming_input_index INTEGER NOT NULL,
    consuming_party TEXT NOT NULL,
    commit_time INTEGER NOT NULL,
    PRIMARY KEY (issue_transaction_id, issue_transaction_output_index)
);
CREATE TABLE IF NOT EXISTS notary_committed_transactions (
    transaction_id BLOB PRIMARY KEY,
    commit_time INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS notary_request_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    consuming_transaction_id BLOB NOT NULL,
    requesting_party TEXT NOT NULL,
    request_signature BLOB NOT NULL,
    request_timestamp INTEGER NOT NULL,
    worker_node_name TEXT NOT NULL
);
";

#[derive(Debug, Clone)]
pub struct PersistentSettings {
    pub path: PathBuf,
    pub worker_name: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub backoff: Backoff,
}

type Reply = oneshot::Sender<Result<CommitReceipt, ProviderError>>;

struct Job {
    request: CommitRequest,
    reply: Reply,
}

pub struct PersistentProvider {
    path: PathBuf,
    queue: Option<SyncSender<Job>>,
    depth: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl PersistentProvider {
    /// Open (or create) the database and start the worker thread.
    pub fn open(settings: PersistentSettings, clock: Arc<dyn Clock>) -> Result<Self, ProviderError> {
        let conn = open_connection(&settings.path, true).map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;

        let (queue, rx) = mpsc::sync_channel::<Job>(QUEUE_CAPACITY);
        let depth = Arc::new(AtomicUsize::new(0));
        let worker = Worker { conn, clock, settings: settings.clone(), depth: depth.clone() };

        let handle = std::thread::Builder::new()
            .name("notary-db-worker".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| ProviderError::Storage(e.to_string()))?;

        tracing::info!(path = ?settings.path, batch_size = settings.batch_size, "Persistent provider started");
        Ok(Self { path: settings.path, queue: Some(queue), depth, worker: Some(handle) })
    }

    fn reader(&self) -> Result<Connection, ProviderError> {
        open_connection(&self.path, false).map_err(storage)
    }

    /// Commit-log entry for `state`, read through a separate connection.
    pub fn lookup(&self, state: &StateRef) -> Result<Option<ConsumingTxInfo>, ProviderError> {
        let conn = self.reader()?;
        conn.query_row(
            "SELECT consuming_transaction_id, consuming_input_index, consuming_party
             FROM notary_committed_states
             WHERE issue_transaction_id = ?1 AND issue_transaction_output_index = ?2",
            params![blob(&state.txhash), state.index],
            |row| {
                Ok(ConsumingTxInfo {
                    consuming_tx: SecureHash(row.get::<_, [u8; 32]>(0)?),
                    input_index: row.get(1)?,
                    requesting_party: Party::new(row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(storage)
    }

    pub fn committed_count(&self) -> Result<u64, ProviderError> {
        self.count("notary_committed_states")
    }

    pub fn request_count(&self) -> Result<u64, ProviderError> {
        self.count("notary_request_log")
    }

    fn count(&self, table: &str) -> Result<u64, ProviderError> {
        let conn = self.reader()?;
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(storage)?;
        Ok(n as u64)
    }

    /// Worker names recorded in the request log, in insertion order.
    pub fn request_workers(&self) -> Result<Vec<String>, ProviderError> {
        let conn = self.reader()?;
        let mut stmt = conn
            .prepare("SELECT worker_node_name FROM notary_request_log ORDER BY id")
            .map_err(storage)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(storage)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(storage)
    }
}

impl UniquenessProvider for PersistentProvider {
    fn commit(&self, request: CommitRequest) -> CommitFuture<'_> {
        let pending = self.commit_with_receipt(request);
        Box::pin(async move { Ok(pending.await?.result) })
    }

    fn commit_with_receipt(&self, request: CommitRequest) -> ReceiptFuture<'_> {
        Box::pin(async move {
            let queue = self.queue.as_ref().ok_or(ProviderError::Stopped)?;
            let (reply, rx) = oneshot::channel();

            self.depth.fetch_add(1, Ordering::Relaxed);
            match queue.try_send(Job { request, reply }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    return Err(ProviderError::Unavailable("request queue full".into()));
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    return Err(ProviderError::Stopped);
                }
            }
            metrics::gauge!("notary_db_queue_depth", self.depth.load(Ordering::Relaxed) as f64);

            rx.await.map_err(|_| ProviderError::Stopped)?
        })
    }

    fn name(&self) -> &'static str {
        "persistent"
    }
}

impl Drop for PersistentProvider {
    fn drop(&mut self) {
        // Closing the queue stops the worker after its current batch.
        self.queue.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Database worker panicked");
            }
        }
    }
}

struct Worker {
    conn: Connection,
    clock: Arc<dyn Clock>,
    settings: PersistentSettings,
    depth: Arc<AtomicUsize>,
}

impl Worker {
    fn run(mut self, rx: mpsc::Receiver<Job>) {
        while let Ok(first) = rx.recv() {
            let mut batch = vec![first];
            let deadline = Instant::now() + self.settings.batch_timeout;
            while batch.len() < self.settings.batch_size {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(job) => batch.push(job),
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            self.depth.fetch_sub(batch.len(), Ordering::Relaxed);
            metrics::histogram!("notary_db_batch_size", batch.len() as f64);

            let requests: Vec<&CommitRequest> = batch.iter().map(|j| &j.request).collect();
            let outcome = self.process(&requests);

            match outcome {
                Ok(receipts) => {
                    for (job, receipt) in batch.into_iter().zip(receipts) {
                        let _ = job.reply.send(Ok(receipt));
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, size = batch.len(), "Batch failed");
                    for job in batch {
                        let _ = job.reply.send(Err(e.clone()));
                    }
                }
            }
        }
        tracing::info!("Database worker stopped");
    }

    fn process(&mut self, requests: &[&CommitRequest]) -> Result<Vec<CommitReceipt>, ProviderError> {
        let backoff = self.settings.backoff;
        let clock = self.clock.clone();
        let worker_name = self.settings.worker_name.clone();
        let conn = &mut self.conn;

        with_retry(&backoff, classify_sqlite, |attempt| {
            if attempt > 0 {
                tracing::warn!(attempt, "Retrying batch after transient database error");
            }
            run_batch(conn, requests, clock.as_ref(), &worker_name)
        })
        .map_err(|e| match e {
            RetryError::Fatal(e) => storage(e),
            RetryError::Exhausted { attempts, last } => {
                ProviderError::RetriesExhausted { attempts, last: last.to_string() }
            }
        })
    }
}

/// Commit-log reads against an open connection or transaction.
struct SqlIndex<'a>(&'a Connection);

impl CommitIndex for SqlIndex<'_> {
    type Error = rusqlite::Error;

    fn consumer_of(&self, state: &StateRef) -> Result<Option<SecureHash>, rusqlite::Error> {
        self.0
            .query_row(
                "SELECT consuming_transaction_id FROM notary_committed_states
                 WHERE issue_transaction_id = ?1 AND issue_transaction_output_index = ?2",
                params![blob(&state.txhash), state.index],
                |row| row.get::<_, [u8; 32]>(0),
            )
            .optional()
            .map(|found| found.map(SecureHash))
    }

    fn is_notarised(&self, tx_id: &SecureHash) -> Result<bool, rusqlite::Error> {
        self.0
            .query_row(
                "SELECT 1 FROM notary_committed_transactions WHERE transaction_id = ?1",
                params![blob(tx_id)],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
    }

    fn has_consumed_outputs(&self, tx_id: &SecureHash) -> Result<bool, rusqlite::Error> {
        self.0
            .query_row(
                "SELECT 1 FROM notary_committed_states WHERE issue_transaction_id = ?1 LIMIT 1",
                params![blob(tx_id)],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
    }
}

fn run_batch(
    conn: &mut Connection,
    requests: &[&CommitRequest],
    clock: &dyn Clock,
    worker_name: &str,
) -> rusqlite::Result<Vec<CommitReceipt>> {
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut receipts = Vec::with_capacity(requests.len());

    for request in requests {
        let now = clock.now_millis();
        // Logged outside the savepoint: kept whatever the outcome.
        tx.execute(
            "INSERT INTO notary_request_log
             (consuming_transaction_id, requesting_party, request_signature, request_timestamp, worker_node_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                blob(&request.tx_id),
                request.caller.name(),
                request.signature.as_bytes(),
                now as i64,
                worker_name
            ],
        )?;

        let settled = {
            let mut sp = tx.savepoint()?;
            match decide(request, now, &SqlIndex(&sp))? {
                Decision::Accept { inserts, fresh_outputs } => match insert_states(&sp, &inserts, request.tx_id, now) {
                    Ok(()) => {
                        sp.commit()?;
                        Some(CommitReceipt { result: UniquenessResult::Success, fresh_outputs })
                    }
                    Err(e) if is_constraint_violation(&e) => {
                        sp.rollback()?;
                        None
                    }
                    Err(e) => return Err(e),
                },
                other => Some(CommitReceipt { result: other.into_result(), fresh_outputs: false }),
            }
        };
        let receipt = match settled {
            Some(receipt) => receipt,
            None => {
                metrics::increment_counter!("notary_db_rollbacks_total");
                tracing::debug!(tx_id = ?request.tx_id, "Insert hit a claimed state, recomputing conflicts");
                let result = decide(request, now, &SqlIndex(&tx))?.into_result();
                CommitReceipt { result, fresh_outputs: false }
            }
        };
        receipts.push(receipt);
    }

    tx.commit()?;
    Ok(receipts)
}

fn insert_states(
    conn: &Connection,
    inserts: &[(StateRef, ConsumingTxInfo)],
    tx_id: SecureHash,
    now: u64,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO notary_committed_states
         (issue_transaction_id, issue_transaction_output_index, consuming_transaction_id,
          consuming_input_index, consuming_party, commit_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (state, info) in inserts {
        stmt.execute(params![
            blob(&state.txhash),
            state.index,
            blob(&info.consuming_tx),
            info.input_index,
            info.requesting_party.name(),
            now as i64
        ])?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO notary_committed_transactions (transaction_id, commit_time) VALUES (?1, ?2)",
        params![blob(&tx_id), now as i64],
    )?;
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn open_connection(path: &Path, create: bool) -> rusqlite::Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let conn = Connection::open_with_flags(path, flags)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    Ok(conn)
}

fn blob(hash: &SecureHash) -> &[u8] {
    &hash.0
}

fn storage(e: rusqlite::Error) -> ProviderError {
    ProviderError::Storage(e.to_string())
}
