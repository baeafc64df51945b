//! Priority buffer for write intents that failed transiently.
//!
//! # Responsibility
//! - Park retryable writes until the connection is usable again.
//! - Replay them strictly by priority, FIFO inside one priority class.
//! - Persist leftovers across restarts via `pending_operations`, or a JSON
//!   spill file next to the database when it cannot be reached.
//!
//! # Invariants
//! - HIGH drains before MEDIUM, MEDIUM before LOW; classes never interleave.
//! - An operation leaves the queue only on success, or after reaching
//!   `max_retries`, which produces a HIGH-severity error record.

use crate::clock::now_epoch_ms;
use crate::error::{ClassifiedError, ErrorClassifier, ErrorContext, ErrorKind, RawFailure, Severity};
use crate::value::SqlValue;
use log::{error, info, warn};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, ErrorKind as IoErrorKind};
use std::path::Path;
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Replay priority of a parked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPriority {
    High,
    Medium,
    Low,
}

impl OperationPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// One parked write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub statement: String,
    pub params: Vec<SqlValue>,
    /// Epoch ms of the first enqueue; kept across retries.
    pub enqueued_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: OperationPriority,
}

impl QueuedOperation {
    pub fn new(
        statement: impl Into<String>,
        params: Vec<SqlValue>,
        priority: OperationPriority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: format!("op_{}", Uuid::new_v4().simple()),
            statement: statement.into(),
            params,
            enqueued_at: now_epoch_ms(),
            retry_count: 0,
            max_retries: max_retries.max(1),
            priority,
        }
    }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub succeeded: usize,
    pub requeued: usize,
    /// Ids dropped after reaching `max_retries`.
    pub abandoned: Vec<String>,
    /// Replay stopped early because storage became unreachable.
    pub halted: bool,
}

#[derive(Debug, Default)]
pub struct OperationQueue {
    high: VecDeque<QueuedOperation>,
    medium: VecDeque<QueuedOperation>,
    low: VecDeque<QueuedOperation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends to the tail of the operation's priority class.
    pub fn enqueue(&mut self, operation: QueuedOperation) -> String {
        let id = operation.id.clone();
        info!(
            "event=queue_enqueue module=queue status=ok id={} priority={} retry_count={}",
            id,
            operation.priority.as_str(),
            operation.retry_count
        );
        self.class_mut(operation.priority).push_back(operation);
        id
    }

    /// Next operation by priority, then FIFO.
    pub fn dequeue(&mut self) -> Option<QueuedOperation> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    /// Pending operations in dequeue order.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.high
            .iter()
            .chain(self.medium.iter())
            .chain(self.low.iter())
            .cloned()
            .collect()
    }

    /// Tries every pending operation once, in dequeue order.
    ///
    /// Failed operations keep their position; those reaching `max_retries`
    /// are dropped and recorded as HIGH severity. A CONNECTION_LOST failure
    /// halts the pass and leaves the rest untouched.
    pub fn replay(
        &mut self,
        mut execute: impl FnMut(&QueuedOperation) -> Result<(), ClassifiedError>,
        classifier: &ErrorClassifier,
    ) -> ReplayReport {
        let mut report = ReplayReport::default();
        let mut batch = VecDeque::with_capacity(self.len());
        while let Some(operation) = self.dequeue() {
            batch.push_back(operation);
        }

        while let Some(mut operation) = batch.pop_front() {
            let failure = match execute(&operation) {
                Ok(()) => {
                    report.succeeded += 1;
                    continue;
                }
                Err(err) => err,
            };

            operation.retry_count += 1;
            let halt = failure.kind == ErrorKind::ConnectionLost;
            if operation.retry_count >= operation.max_retries {
                abandon(&operation, &failure, classifier);
                report.abandoned.push(operation.id);
            } else {
                warn!(
                    "event=queue_replay module=queue status=retry id={} retry_count={} max_retries={}",
                    operation.id, operation.retry_count, operation.max_retries
                );
                report.requeued += 1;
                self.class_mut(operation.priority).push_back(operation);
            }

            if halt {
                report.halted = true;
                break;
            }
        }

        for operation in batch {
            self.class_mut(operation.priority).push_back(operation);
        }

        info!(
            "event=queue_replay module=queue status=done succeeded={} requeued={} abandoned={} halted={} remaining={}",
            report.succeeded,
            report.requeued,
            report.abandoned.len(),
            report.halted,
            self.len()
        );
        report
    }

    /// Writes every pending operation to `pending_operations` and empties
    /// the queue. Replaces previously persisted rows.
    pub fn persist(&mut self, conn: &mut Connection) -> rusqlite::Result<usize> {
        let pending = self.snapshot();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pending_operations;", [])?;
        for operation in &pending {
            let params_json = serde_json::to_string(&operation.params)
                .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
            tx.execute(
                "INSERT INTO pending_operations (
                    id,
                    statement,
                    params_json,
                    enqueued_at,
                    retry_count,
                    max_retries,
                    priority
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    operation.id,
                    operation.statement,
                    params_json,
                    operation.enqueued_at,
                    operation.retry_count,
                    operation.max_retries,
                    operation.priority.as_str(),
                ],
            )?;
        }
        tx.commit()?;

        self.high.clear();
        self.medium.clear();
        self.low.clear();
        info!(
            "event=queue_persist module=queue status=ok count={}",
            pending.len()
        );
        Ok(pending.len())
    }

    /// Loads and removes persisted operations, restoring FIFO by
    /// `enqueued_at` inside each priority class.
    ///
    /// Rows that cannot be decoded are dropped and recorded as HIGH.
    pub fn restore(conn: &mut Connection, classifier: &ErrorClassifier) -> rusqlite::Result<Self> {
        let tx = conn.transaction()?;
        let mut queue = Self::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, statement, params_json, enqueued_at, retry_count, max_retries, priority
                 FROM pending_operations
                 ORDER BY enqueued_at ASC, rowid ASC;",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let statement: String = row.get(1)?;
                let params_json: String = row.get(2)?;
                let priority_text: String = row.get(6)?;
                let params = match serde_json::from_str::<Vec<SqlValue>>(&params_json) {
                    Ok(params) => params,
                    Err(err) => {
                        discard_row(classifier, &id, &statement, &format!("invalid params: {err}"));
                        continue;
                    }
                };
                let Some(priority) = OperationPriority::parse(&priority_text) else {
                    discard_row(
                        classifier,
                        &id,
                        &statement,
                        &format!("unknown priority `{priority_text}`"),
                    );
                    continue;
                };
                queue.class_mut(priority).push_back(QueuedOperation {
                    id,
                    statement,
                    params,
                    enqueued_at: row.get(3)?,
                    retry_count: row.get(4)?,
                    max_retries: row.get(5)?,
                    priority,
                });
            }
        }
        tx.execute("DELETE FROM pending_operations;", [])?;
        tx.commit()?;

        if !queue.is_empty() {
            info!(
                "event=queue_restore module=queue status=ok count={}",
                queue.len()
            );
        }
        Ok(queue)
    }

    /// Moves every pending operation into the JSON file at `path` and
    /// empties the queue. Operations already spilled there are kept.
    pub fn spill_to_file(&mut self, path: &Path) -> io::Result<usize> {
        let mut spilled = read_spill(path)?.unwrap_or_default();
        let count = self.len();
        spilled.extend(self.snapshot());

        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(&spilled)?)?;
        fs::rename(&staging, path)?;

        self.high.clear();
        self.medium.clear();
        self.low.clear();
        warn!(
            "event=queue_spill module=queue status=ok count={count} path={}",
            path.display()
        );
        Ok(count)
    }

    /// Takes back operations spilled to `path` and deletes the file.
    /// Returns how many were added; a missing file adds none.
    pub fn absorb_spill(&mut self, path: &Path) -> io::Result<usize> {
        let Some(spilled) = read_spill(path)? else {
            return Ok(0);
        };
        let count = spilled.len();
        for operation in spilled {
            self.class_mut(operation.priority).push_back(operation);
        }
        for class in [&mut self.high, &mut self.medium, &mut self.low] {
            class
                .make_contiguous()
                .sort_by_key(|operation| operation.enqueued_at);
        }
        fs::remove_file(path)?;
        info!(
            "event=queue_absorb module=queue status=ok count={count} path={}",
            path.display()
        );
        Ok(count)
    }

    fn class_mut(&mut self, priority: OperationPriority) -> &mut VecDeque<QueuedOperation> {
        match priority {
            OperationPriority::High => &mut self.high,
            OperationPriority::Medium => &mut self.medium,
            OperationPriority::Low => &mut self.low,
        }
    }
}

fn read_spill(path: &Path) -> io::Result<Option<Vec<QueuedOperation>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn discard_row(classifier: &ErrorClassifier, id: &str, statement: &str, reason: &str) {
    error!("event=queue_restore module=queue status=error id={id} error={reason}");
    classifier.classify(
        &RawFailure::new(format!("persisted write {id} dropped on restore: {reason}")),
        ErrorContext::new(ErrorKind::QueryFailed)
            .with_statement(statement, &[])
            .with_min_severity(Severity::High),
    );
}

fn abandon(operation: &QueuedOperation, failure: &ClassifiedError, classifier: &ErrorClassifier) {
    error!(
        "event=queue_abandon module=queue status=error id={} retry_count={} last_error_id={}",
        operation.id, operation.retry_count, failure.error_id
    );
    classifier.classify(
        &RawFailure::new(format!(
            "queued write {} abandoned after {} attempts; last failure {} ({})",
            operation.id, operation.retry_count, failure.error_id, failure.kind
        )),
        ErrorContext::new(ErrorKind::QueryFailed)
            .with_statement(&operation.statement, &operation.params)
            .with_retry_count(operation.retry_count)
            .with_min_severity(Severity::High),
    );
}
