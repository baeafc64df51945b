//! Caller-facing facade over the data-access layer.
//!
//! # Responsibility
//! - Own the supervised connection behind one mutex, the serialization
//!   point for caller queries, transactions, health ticks and backups.
//! - Park retryable writes, replay them after recovery, and persist them
//!   across shutdown, spilling to a file when the database is unreachable.
//! - Run the health and auto-backup workers.
//!
//! # Invariants
//! - Lock order is connection, then queue, then config.
//! - Every failure returned from here is a `ClassifiedError`, except config
//!   rejection which reports the violated bound.

use crate::background::{BackgroundWorkers, Cadence, WORKER_RESOLUTION};
use crate::backup::{BackupRecord, BackupScheduler, BackupType};
use crate::config::{validate_config, ConfigError, StoreConfig};
use crate::connection::{
    ConnectionState, ConnectionStateWatch, ConnectionSupervisor, Connector, Sleeper,
    SqliteConnector, ThreadSleeper,
};
use crate::error::{
    ClassifiedError, ErrorClassifier, ErrorContext, ErrorFilter, ErrorKind, ErrorRecord,
    ErrorStats, RawFailure, Severity,
};
use crate::health::{HealthMonitor, HealthSnapshot, QueryMetrics};
use crate::queue::{
    OperationPriority, OperationQueue, QueuedOperation, ReplayReport, DEFAULT_MAX_RETRIES,
};
use crate::transaction::{TransactionRunner, WriteStep};
use crate::value::{QueryRows, SqlValue};
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single write that may be parked when storage is unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub statement: String,
    pub params: Vec<SqlValue>,
    pub priority: OperationPriority,
    pub max_retries: u32,
}

impl WriteRequest {
    pub fn new(statement: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            statement: statement.into(),
            params,
            priority: OperationPriority::Medium,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_priority(mut self, priority: OperationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied { affected_rows: usize },
    /// Parked for replay; the id matches `QueuedOperation::id`.
    Queued { operation_id: String },
}

/// Why a store could not be opened.
#[derive(Debug)]
pub enum StoreOpenError {
    Config(ConfigError),
    Storage(ClassifiedError),
}

impl Display for StoreOpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid store configuration: {err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StoreOpenError {}

impl From<ConfigError> for StoreOpenError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ClassifiedError> for StoreOpenError {
    fn from(value: ClassifiedError) -> Self {
        Self::Storage(value)
    }
}

/// Options for opening a `GameStore`.
pub struct StoreBuilder {
    config: StoreConfig,
    connector: Arc<dyn Connector>,
    sleeper: Arc<dyn Sleeper>,
    background: bool,
}

impl StoreBuilder {
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Health and auto-backup threads; enabled by default.
    pub fn background_workers(mut self, enabled: bool) -> Self {
        self.background = enabled;
        self
    }

    /// Validates the config, connects, restores parked writes and starts
    /// the workers.
    pub fn open(self) -> Result<GameStore, StoreOpenError> {
        validate_config(&self.config).map_err(|err| {
            warn!("event=store_open module=store status=rejected error={err}");
            err
        })?;

        let classifier = Arc::new(ErrorClassifier::new());
        let metrics = Arc::new(QueryMetrics::default());
        let mut supervisor = ConnectionSupervisor::open(
            self.config.clone(),
            self.connector,
            self.sleeper,
            Arc::clone(&classifier),
            Arc::clone(&metrics),
        )?;

        let queue = restore_queue(&mut supervisor, &classifier);
        let backups = BackupScheduler::new();
        backups.restore_summary(&mut supervisor);

        let inner = Arc::new(StoreInner {
            state: supervisor.state_watch(),
            seen_connects: AtomicU64::new(supervisor.connect_count()),
            supervisor: Mutex::new(supervisor),
            config: RwLock::new(self.config),
            classifier,
            metrics,
            queue: Mutex::new(queue),
            backups,
            health: HealthMonitor::new(),
            closed: AtomicBool::new(false),
        });

        let workers = if self.background {
            Some(start_workers(&inner))
        } else {
            None
        };
        info!(
            "event=store_open module=store status=ok path={} workers={} pending={}",
            inner.config.read().path,
            workers.as_ref().map_or(0, BackgroundWorkers::len),
            inner.queue.lock().len()
        );

        Ok(GameStore {
            inner,
            workers: Mutex::new(workers),
        })
    }
}

struct StoreInner {
    supervisor: Mutex<ConnectionSupervisor>,
    state: ConnectionStateWatch,
    /// Mirror of the supervisor's config for readers that must not wait
    /// on the connection.
    config: RwLock<StoreConfig>,
    classifier: Arc<ErrorClassifier>,
    metrics: Arc<QueryMetrics>,
    queue: Mutex<OperationQueue>,
    backups: BackupScheduler,
    health: HealthMonitor,
    seen_connects: AtomicU64,
    closed: AtomicBool,
}

impl StoreInner {
    /// Runs `op` under the connection lock, then replays parked writes if
    /// the supervisor reconnected meanwhile.
    fn with_supervisor<T>(&self, op: impl FnOnce(&mut ConnectionSupervisor) -> T) -> T {
        let (value, connects) = {
            let mut supervisor = self.supervisor.lock();
            let value = op(&mut supervisor);
            (value, supervisor.connect_count())
        };

        let previous = self.seen_connects.swap(connects, Ordering::AcqRel);
        if connects != previous
            && self.state.get() == ConnectionState::Connected
            && !self.queue.lock().is_empty()
        {
            info!("event=queue_replay module=store status=start trigger=reconnect");
            self.replay_pending();
        }
        value
    }

    fn replay_pending(&self) -> ReplayReport {
        let mut supervisor = self.supervisor.lock();
        if supervisor.state() != ConnectionState::Connected {
            return ReplayReport {
                halted: true,
                ..ReplayReport::default()
            };
        }
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return ReplayReport::default();
        }
        queue.replay(
            |operation| {
                supervisor
                    .execute_query(&operation.statement, &operation.params)
                    .map(|_| ())
            },
            &self.classifier,
        )
    }

    fn health_tick(&self) -> HealthSnapshot {
        if self.closed.load(Ordering::Acquire) {
            return self.health.record(
                self.state.get(),
                None,
                &self.metrics,
                &self.backups,
                self.queue.lock().len(),
            );
        }
        let lock_wait = Duration::from_millis(self.config.read().connection_timeout_ms);
        let pending = self.queue.lock().len();
        let snapshot = self.health.tick(
            &self.supervisor,
            &self.metrics,
            &self.backups,
            pending,
            lock_wait,
        );
        if snapshot.connection_status == ConnectionState::Connected && pending > 0 {
            self.replay_pending();
        }
        snapshot
    }

    fn automatic_backup(&self) {
        let mut supervisor = self.supervisor.lock();
        if let Err(err) = self
            .backups
            .run_backup(&mut supervisor, BackupType::Automatic, None)
        {
            warn!(
                "event=backup_auto module=store status=error kind={} error_id={}",
                err.kind, err.error_id
            );
        }
    }

    fn ensure_open(&self) -> Result<(), ClassifiedError> {
        if !self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        Err(self.classifier.classify(
            &RawFailure::new("connection lost: store is shut down"),
            ErrorContext::new(ErrorKind::ConnectionLost),
        ))
    }
}

/// Resilient store handle. Cheap to share behind `Arc`; every method takes
/// `&self`.
pub struct GameStore {
    inner: Arc<StoreInner>,
    workers: Mutex<Option<BackgroundWorkers>>,
}

impl GameStore {
    /// Opens with the real SQLite connector and background workers.
    pub fn open(config: StoreConfig) -> Result<Self, StoreOpenError> {
        Self::builder(config).open()
    }

    pub fn builder(config: StoreConfig) -> StoreBuilder {
        StoreBuilder {
            config,
            connector: Arc::new(SqliteConnector),
            sleeper: Arc::new(ThreadSleeper),
            background: true,
        }
    }

    /// Runs one statement with transient-failure retries.
    pub fn execute_query(
        &self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<QueryRows, ClassifiedError> {
        self.inner.ensure_open()?;
        self.inner
            .with_supervisor(|supervisor| supervisor.execute_query(statement, params))
    }

    /// Like `execute_query`, but aborts the statement after `timeout`.
    pub fn execute_query_with_timeout(
        &self,
        statement: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> Result<QueryRows, ClassifiedError> {
        self.inner.ensure_open()?;
        self.inner.with_supervisor(|supervisor| {
            supervisor.execute_query_with_timeout(statement, params, timeout)
        })
    }

    /// Runs every step or none of them. Returns total affected rows.
    pub fn execute_transaction(&self, steps: &[WriteStep]) -> Result<usize, ClassifiedError> {
        self.inner.ensure_open()?;
        self.inner
            .with_supervisor(|supervisor| TransactionRunner::new(supervisor).run(steps))
    }

    /// Applies a write, or parks it when it fails transiently.
    ///
    /// HIGH and CRITICAL failures are never parked; they are returned.
    pub fn execute_write(&self, request: WriteRequest) -> Result<WriteOutcome, ClassifiedError> {
        self.inner.ensure_open()?;
        let result = self.inner.with_supervisor(|supervisor| {
            supervisor.execute_query(&request.statement, &request.params)
        });

        match result {
            Ok(rows) => Ok(WriteOutcome::Applied {
                affected_rows: rows.affected_rows,
            }),
            Err(err) if err.retryable && !err.must_surface() => {
                let operation = QueuedOperation::new(
                    request.statement,
                    request.params,
                    request.priority,
                    request.max_retries,
                );
                let operation_id = self.inner.queue.lock().enqueue(operation);
                info!(
                    "event=write_parked module=store status=queued id={operation_id} cause={}",
                    err.error_id
                );
                Ok(WriteOutcome::Queued { operation_id })
            }
            Err(err) => Err(err),
        }
    }

    pub fn get_connection_state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Latest snapshot; computes one when no tick has run yet.
    pub fn get_health(&self) -> HealthSnapshot {
        self.inner
            .health
            .latest()
            .unwrap_or_else(|| self.inner.health_tick())
    }

    /// Runs a health tick now, including replay of parked writes.
    pub fn run_health_check(&self) -> HealthSnapshot {
        self.inner.health_tick()
    }

    pub fn backup_now(&self, requested_by: Option<&str>) -> Result<BackupRecord, ClassifiedError> {
        self.inner.ensure_open()?;
        self.inner.with_supervisor(|supervisor| {
            self.inner
                .backups
                .run_backup(supervisor, BackupType::Manual, requested_by)
        })
    }

    /// Newest first.
    pub fn list_backups(&self, limit: usize) -> Result<Vec<BackupRecord>, ClassifiedError> {
        self.inner.ensure_open()?;
        self.inner
            .with_supervisor(|supervisor| self.inner.backups.list_backups(supervisor, limit))
    }

    /// Replaces the configuration as a unit.
    ///
    /// An invalid candidate is rejected and the running config is untouched.
    /// A changed `path` reconnects; a failed reconnect leaves the store
    /// DEGRADED with the new config applied.
    pub fn reload_config(&self, candidate: StoreConfig) -> Result<(), ConfigError> {
        if let Err(err) = validate_config(&candidate) {
            warn!("event=config_reload module=store status=rejected error={err}");
            return Err(err);
        }

        let applied = self.inner.with_supervisor(|supervisor| {
            let previous_keep = supervisor.config().max_backups;
            let keep = candidate.max_backups;
            let applied = supervisor.apply_config(candidate.clone());
            *self.inner.config.write() = candidate;
            if applied.is_ok() && keep < previous_keep {
                if let Err(err) = self.inner.backups.enforce_retention(supervisor, keep) {
                    warn!(
                        "event=config_reload module=store status=retention_error kind={} error_id={}",
                        err.kind, err.error_id
                    );
                }
            }
            applied
        });
        match applied {
            Ok(()) => info!("event=config_reload module=store status=ok"),
            Err(err) => warn!(
                "event=config_reload module=store status=applied_with_error kind={} error_id={} state={}",
                err.kind,
                err.error_id,
                self.get_connection_state().as_str()
            ),
        }
        Ok(())
    }

    pub fn config(&self) -> StoreConfig {
        self.inner.config.read().clone()
    }

    /// Newest first.
    pub fn get_error_history(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        self.inner.classifier.history(filter)
    }

    pub fn mark_error_resolved(&self, error_id: &str) -> bool {
        self.inner.classifier.mark_resolved(error_id)
    }

    pub fn clear_error_history(&self) -> usize {
        self.inner.classifier.clear_history()
    }

    pub fn error_stats(&self) -> ErrorStats {
        self.inner.classifier.stats()
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    /// Parked writes in replay order.
    pub fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.inner.queue.lock().snapshot()
    }

    /// Tries every parked write once.
    pub fn replay_pending(&self) -> ReplayReport {
        self.inner.replay_pending()
    }

    /// Stops workers, waits for the in-flight operation, flushes or
    /// persists parked writes, and closes the connection. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("event=store_shutdown module=store status=start");
        if let Some(workers) = self.workers.lock().take() {
            workers.stop();
        }

        let classifier = Arc::clone(&self.inner.classifier);
        let mut supervisor = self.inner.supervisor.lock();
        let mut queue = self.inner.queue.lock();

        if !queue.is_empty() && supervisor.state() == ConnectionState::Connected {
            queue.replay(
                |operation| {
                    supervisor
                        .execute_query(&operation.statement, &operation.params)
                        .map(|_| ())
                },
                &classifier,
            );
        }

        if !queue.is_empty() {
            let pending = queue.len();
            let context = ErrorContext::new(ErrorKind::QueryFailed);
            let persisted = match supervisor.connection_for(&context) {
                Ok(conn) => queue.persist(conn).map_err(|err| {
                    classifier.classify(
                        &RawFailure::from(&err),
                        context.clone().with_min_severity(Severity::High),
                    )
                }),
                Err(err) => Err(err),
            };
            if let Err(err) = persisted {
                warn!(
                    "event=store_shutdown module=store status=spill pending={pending} error_id={}",
                    err.error_id
                );
                let spill_path = supervisor
                    .pending_spill_path()
                    .map(Path::to_path_buf)
                    .or_else(|| supervisor.config().pending_spill_path());
                let spilled = match spill_path {
                    Some(path) => queue.spill_to_file(&path).map_err(|err| err.to_string()),
                    None => Err("in-memory store has no spill location".to_string()),
                };
                if let Err(reason) = spilled {
                    error!(
                        "event=store_shutdown module=store status=error pending={pending} error={reason}"
                    );
                    classifier.classify(
                        &RawFailure::new(format!(
                            "{pending} pending operations could not be persisted at shutdown: {reason}"
                        )),
                        context.with_min_severity(Severity::High),
                    );
                }
            }
        }

        supervisor.close();
        info!("event=store_shutdown module=store status=ok");
    }
}

impl Drop for GameStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Parked writes from `pending_operations` plus any spill file left by a
/// shutdown that could not reach the database.
fn restore_queue(supervisor: &mut ConnectionSupervisor, classifier: &ErrorClassifier) -> OperationQueue {
    let context = ErrorContext::new(ErrorKind::QueryFailed);
    let spill_path = supervisor.config().pending_spill_path();
    let mut queue = match supervisor.connection_for(&context) {
        Ok(conn) => OperationQueue::restore(conn, classifier).unwrap_or_else(|err| {
            classifier.classify(
                &RawFailure::from(&err),
                context.clone().with_min_severity(Severity::High),
            );
            OperationQueue::new()
        }),
        Err(_) => OperationQueue::new(),
    };

    if let Some(path) = spill_path {
        if let Err(err) = queue.absorb_spill(&path) {
            classifier.classify(
                &RawFailure::from(&err),
                context.with_min_severity(Severity::High),
            );
        }
    }
    queue
}

fn start_workers(inner: &Arc<StoreInner>) -> BackgroundWorkers {
    let mut workers = BackgroundWorkers::new();
    let started_at = Instant::now();

    let health_inner = Arc::clone(inner);
    let mut health_cadence = Cadence::starting_at(started_at);
    let health = workers.spawn("health", WORKER_RESOLUTION, move || {
        let (enabled, interval) = {
            let config = health_inner.config.read();
            (
                config.enable_health_monitoring,
                Duration::from_millis(config.health_check_interval_ms),
            )
        };
        if enabled && health_cadence.due(Instant::now(), interval) {
            health_inner.health_tick();
        }
    });

    let backup_inner = Arc::clone(inner);
    let mut backup_cadence = Cadence::starting_at(started_at);
    let backup = workers.spawn("backup", WORKER_RESOLUTION, move || {
        let (enabled, interval) = {
            let config = backup_inner.config.read();
            (
                config.enable_auto_backup,
                Duration::from_millis(config.backup_interval_ms),
            )
        };
        if enabled && backup_cadence.due(Instant::now(), interval) {
            backup_inner.automatic_backup();
        }
    });

    for (name, spawned) in [("health", health), ("backup", backup)] {
        if let Err(err) = spawned {
            error!("event=worker_start module=store status=error worker={name} error={err}");
        }
    }
    workers
}
