//! Supervision of the single store connection.
//!
//! # Responsibility
//! - Own the only `rusqlite::Connection` and its connectivity state.
//! - Detect loss, reconnect with exponential backoff, and fall back to
//!   DEGRADED when attempts are exhausted.
//! - Retry transient statement failures through the same policy.
//!
//! # Invariants
//! - State transitions are written only here; everyone else observes them
//!   through `ConnectionStateWatch`.
//! - While DEGRADED every storage call fails fast with CONNECTION_LOST.
//! - Retry waits are the only places this module blocks on purpose.

use crate::config::{RetryPolicy, StoreConfig};
use crate::db::{apply_pragmas, open_db, DbError, DbResult};
use crate::error::{ClassifiedError, ErrorClassifier, ErrorContext, ErrorKind, RawFailure};
use crate::health::QueryMetrics;
use crate::value::{run_statement, QueryRows, SqlValue};
use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod retry;

pub use retry::{backoff_delay, backoff_schedule, Sleeper, ThreadSleeper};

/// Connectivity of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Degraded,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Degraded => "DEGRADED",
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Reconnecting => 1,
            Self::Degraded => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::Reconnecting,
            _ => Self::Degraded,
        }
    }
}

/// Read-only view of the supervisor state; never blocks on the connection.
#[derive(Debug, Clone)]
pub struct ConnectionStateWatch {
    raw: Arc<AtomicU8>,
}

impl ConnectionStateWatch {
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_raw(self.raw.load(Ordering::Acquire))
    }
}

/// Produces fresh connections for the supervisor.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &StoreConfig) -> DbResult<Connection>;
}

/// Opens the configured SQLite database with pragmas and migrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, config: &StoreConfig) -> DbResult<Connection> {
        open_db(config)
    }
}

/// Owner of the store connection and its retry state machine.
pub struct ConnectionSupervisor {
    conn: Option<Connection>,
    state: Arc<AtomicU8>,
    config: StoreConfig,
    policy: RetryPolicy,
    connector: Arc<dyn Connector>,
    sleeper: Arc<dyn Sleeper>,
    classifier: Arc<ErrorClassifier>,
    metrics: Arc<QueryMetrics>,
    /// Successful connects, including the first one.
    connects: u64,
    /// Spill file of the database most recently connected to.
    spill_path: Option<PathBuf>,
}

impl ConnectionSupervisor {
    /// Opens the first connection, retrying per the configured policy.
    ///
    /// # Errors
    /// Returns the last classified failure when no attempt succeeds; the
    /// supervisor is not constructed in that case.
    pub fn open(
        config: StoreConfig,
        connector: Arc<dyn Connector>,
        sleeper: Arc<dyn Sleeper>,
        classifier: Arc<ErrorClassifier>,
        metrics: Arc<QueryMetrics>,
    ) -> Result<Self, ClassifiedError> {
        let policy = config.effective_retry_policy();
        let mut supervisor = Self {
            conn: None,
            state: Arc::new(AtomicU8::new(ConnectionState::Reconnecting.to_raw())),
            config,
            policy,
            connector,
            sleeper,
            classifier,
            metrics,
            connects: 0,
            spill_path: None,
        };
        supervisor.reconnect()?;
        Ok(supervisor)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn state_watch(&self) -> ConnectionStateWatch {
        ConnectionStateWatch {
            raw: Arc::clone(&self.state),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub(crate) fn metrics(&self) -> &Arc<QueryMetrics> {
        &self.metrics
    }

    /// Where parked writes go when this database is unreachable at shutdown.
    ///
    /// Follows the last database that accepted a connection, so a reload
    /// to a path that never opened does not strand them.
    pub fn pending_spill_path(&self) -> Option<&Path> {
        self.spill_path.as_deref()
    }

    /// Number of successful connects so far; grows on every reconnection.
    pub fn connect_count(&self) -> u64 {
        self.connects
    }

    /// Cheap round-trip on the live connection.
    pub fn probe(&self) -> bool {
        match &self.conn {
            Some(conn) => conn
                .query_row("SELECT 1;", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            None => false,
        }
    }

    /// Drops the current connection and reconnects with backoff.
    ///
    /// Each failed attempt is classified; after the last one the state
    /// becomes DEGRADED and the final classified error is returned.
    pub fn reconnect(&mut self) -> Result<(), ClassifiedError> {
        self.conn = None;
        self.set_state(ConnectionState::Reconnecting);

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..max_attempts {
            if attempt > 0 {
                self.sleeper.sleep(backoff_delay(&self.policy, attempt - 1));
            }

            match self.connector.connect(&self.config) {
                Ok(conn) => {
                    self.attach(conn);
                    info!(
                        "event=db_reconnect module=connection status=ok attempt={} max_attempts={max_attempts}",
                        attempt + 1
                    );
                    return Ok(());
                }
                Err(err) => {
                    let kind = open_failure_kind(&err);
                    let classified = self.classifier.classify(
                        &RawFailure::from(&err),
                        ErrorContext::new(kind).with_retry_count(attempt),
                    );
                    warn!(
                        "event=db_reconnect module=connection status=error attempt={} max_attempts={max_attempts} kind={kind}",
                        attempt + 1
                    );
                    last_error = Some(classified);
                    if kind != ErrorKind::ConnectionLost {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Degraded);
        error!(
            "event=db_degraded module=connection status=error max_attempts={max_attempts} path={}",
            self.config.path
        );
        Err(match last_error {
            Some(classified) => classified,
            None => self.unavailable(&ErrorContext::new(ErrorKind::ConnectionLost)),
        })
    }

    /// Verifies connectivity and repairs it when possible.
    ///
    /// CONNECTED runs a probe and reconnects on failure. DEGRADED makes a
    /// single connection attempt and returns to CONNECTED on success.
    pub fn check_connection(&mut self) -> ConnectionState {
        match self.state() {
            ConnectionState::Connected => {
                if !self.probe() {
                    warn!("event=db_probe module=connection status=error state=CONNECTED");
                    let _ = self.reconnect();
                }
            }
            ConnectionState::Degraded => match self.connector.connect(&self.config) {
                Ok(conn) => {
                    self.attach(conn);
                    info!("event=db_restored module=connection status=ok");
                }
                Err(err) => {
                    info!("event=db_probe module=connection status=error state=DEGRADED error={err}");
                }
            },
            ConnectionState::Reconnecting => {
                let _ = self.reconnect();
            }
        }
        self.state()
    }

    /// Runs a read or write statement with transient-failure retries.
    pub fn execute_query(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<QueryRows, ClassifiedError> {
        let context = ErrorContext::new(ErrorKind::QueryFailed).with_statement(statement, params);
        self.run(context, |conn| run_statement(conn, statement, params))
    }

    /// Like `execute_query`, but interrupts the statement after `timeout`.
    ///
    /// A timed-out statement is classified QUERY_FAILED and the connection
    /// stays open.
    pub fn execute_query_with_timeout(
        &mut self,
        statement: &str,
        params: &[SqlValue],
        timeout: Duration,
    ) -> Result<QueryRows, ClassifiedError> {
        let context = ErrorContext::new(ErrorKind::QueryFailed).with_statement(statement, params);
        self.run(context, |conn| {
            run_with_deadline(conn, timeout, |conn| run_statement(conn, statement, params))
        })
    }

    /// Runs `op` against the connection, retrying transient failures.
    ///
    /// HIGH and CRITICAL failures are returned on the first occurrence.
    /// Between attempts the connection is probed; a dead connection goes
    /// through `reconnect`, a live one waits out the backoff delay.
    pub fn run<T>(
        &mut self,
        context: ErrorContext,
        mut op: impl FnMut(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, ClassifiedError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let started_at = Instant::now();
            let result = match self.available_connection() {
                Some(conn) => op(conn),
                None => return Err(self.unavailable(&context)),
            };

            let err = match result {
                Ok(value) => {
                    self.metrics.record(started_at.elapsed(), true);
                    return Ok(value);
                }
                Err(err) => err,
            };
            self.metrics.record(started_at.elapsed(), false);

            let classified = self.classifier.classify(
                &RawFailure::from(&err),
                context.clone().with_retry_count(attempt),
            );
            attempt += 1;
            if !classified.retryable || classified.must_surface() || attempt >= max_attempts {
                return Err(classified);
            }

            if self.probe() {
                self.sleeper.sleep(backoff_delay(&self.policy, attempt - 1));
            } else {
                self.reconnect()?;
            }
        }
    }

    /// Connection for a single unretried unit of work.
    ///
    /// Fails fast with CONNECTION_LOST unless CONNECTED.
    pub(crate) fn connection_for(
        &mut self,
        context: &ErrorContext,
    ) -> Result<&mut Connection, ClassifiedError> {
        let state = self.state();
        let classifier = Arc::clone(&self.classifier);
        match self.conn.as_mut() {
            Some(conn) if state == ConnectionState::Connected => Ok(conn),
            _ => Err(fail_fast(&classifier, state, context)),
        }
    }

    /// After a transient failure outside `run`, repair a dead connection.
    pub(crate) fn recover_if_lost(&mut self) {
        if self.state() == ConnectionState::Connected && !self.probe() {
            let _ = self.reconnect();
        }
    }

    /// Hot-applies `config`; reconnects only when the path changed.
    pub fn apply_config(&mut self, config: StoreConfig) -> Result<(), ClassifiedError> {
        let needs_reconnect = self.config.requires_reconnect(&config);
        self.policy = config.effective_retry_policy();
        self.config = config;

        if needs_reconnect {
            info!(
                "event=config_apply module=connection status=reconnect path={}",
                self.config.path
            );
            return self.reconnect();
        }

        let applied = match &self.conn {
            Some(conn) => apply_pragmas(conn, &self.config),
            None => Ok(()),
        };
        applied.map_err(|err| {
            self.classifier.classify(
                &RawFailure::from(&err),
                ErrorContext::new(ErrorKind::QueryFailed),
            )
        })
    }

    /// Database size in bytes from page accounting, if reachable.
    pub fn database_size_bytes(&self) -> Option<u64> {
        let conn = self.conn.as_ref()?;
        let page_count: i64 = conn
            .query_row("PRAGMA page_count;", [], |row| row.get(0))
            .ok()?;
        let page_size: i64 = conn
            .query_row("PRAGMA page_size;", [], |row| row.get(0))
            .ok()?;
        u64::try_from(page_count.saturating_mul(page_size)).ok()
    }

    /// Releases the connection and enters DEGRADED. Later calls fail fast.
    pub fn close(&mut self) {
        self.set_state(ConnectionState::Degraded);
        if let Some(conn) = self.conn.take() {
            if let Err((_conn, err)) = conn.close() {
                error!("event=db_close module=connection status=error error={err}");
                return;
            }
        }
        info!("event=db_close module=connection status=ok");
    }

    fn attach(&mut self, conn: Connection) {
        self.conn = Some(conn);
        self.connects += 1;
        self.spill_path = self.config.pending_spill_path();
        self.set_state(ConnectionState::Connected);
    }

    fn available_connection(&mut self) -> Option<&mut Connection> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.conn.as_mut()
    }

    fn unavailable(&self, context: &ErrorContext) -> ClassifiedError {
        fail_fast(&self.classifier, self.state(), context)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = ConnectionState::from_raw(self.state.swap(next.to_raw(), Ordering::AcqRel));
        if previous != next {
            info!(
                "event=connection_state module=connection status=ok from={} to={}",
                previous.as_str(),
                next.as_str()
            );
        }
    }
}

fn fail_fast(
    classifier: &ErrorClassifier,
    state: ConnectionState,
    context: &ErrorContext,
) -> ClassifiedError {
    let mut lost = ErrorContext::new(ErrorKind::ConnectionLost).with_retry_count(context.retry_count);
    lost.statement = context.statement.clone();
    lost.params = context.params.clone();
    classifier.classify(
        &RawFailure::new(format!("connection lost: store is {}", state.as_str())),
        lost,
    )
}

fn open_failure_kind(err: &DbError) -> ErrorKind {
    match err {
        DbError::Sqlite(_) => ErrorKind::ConnectionLost,
        DbError::UnsupportedSchemaVersion { .. } => ErrorKind::MigrationFailed,
        DbError::MissingRequiredTable(_) | DbError::MissingRequiredColumn { .. } => {
            ErrorKind::SchemaMismatch
        }
    }
}

fn run_with_deadline<T>(
    conn: &Connection,
    timeout: Duration,
    op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let interrupt = conn.get_interrupt_handle();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let watchdog = thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
            interrupt.interrupt();
        }
    });

    let result = op(conn);
    let _ = done_tx.send(());
    let _ = watchdog.join();
    result
}

#[cfg(test)]
mod tests {
    use super::{ConnectionState, ConnectionSupervisor, Connector, Sleeper, SqliteConnector};
    use crate::config::{RetryPolicy, StoreConfig};
    use crate::db::{open_db, DbError, DbResult};
    use crate::error::{ErrorClassifier, ErrorFilter, ErrorKind, Severity};
    use crate::health::QueryMetrics;
    use parking_lot::Mutex;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.waits.lock().push(duration);
        }
    }

    /// Fails the next `failures` connects, then opens normally.
    struct FlakyConnector {
        failures: AtomicU32,
    }

    impl FlakyConnector {
        fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
            }
        }

        fn fail_next(&self, failures: u32) {
            self.failures.store(failures, Ordering::SeqCst);
        }
    }

    impl Connector for FlakyConnector {
        fn connect(&self, config: &StoreConfig) -> DbResult<Connection> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some("unable to open database file".to_string()),
                )));
            }
            open_db(config)
        }
    }

    fn memory_config(policy: RetryPolicy) -> StoreConfig {
        StoreConfig {
            retry_policy: Some(policy),
            ..StoreConfig::with_path(":memory:")
        }
    }

    fn scenario_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }

    fn open_with(
        connector: Arc<dyn Connector>,
        sleeper: Arc<RecordingSleeper>,
        classifier: Arc<ErrorClassifier>,
    ) -> Result<ConnectionSupervisor, crate::error::ClassifiedError> {
        ConnectionSupervisor::open(
            memory_config(scenario_policy()),
            connector,
            sleeper,
            classifier,
            Arc::new(QueryMetrics::default()),
        )
    }

    fn connection_lost_count(classifier: &ErrorClassifier) -> usize {
        classifier
            .history(&ErrorFilter {
                kind: Some(ErrorKind::ConnectionLost),
                ..ErrorFilter::default()
            })
            .len()
    }

    #[test]
    fn two_failures_then_success_follows_backoff_schedule() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let classifier = Arc::new(ErrorClassifier::new());
        let supervisor = open_with(
            Arc::new(FlakyConnector::failing(2)),
            Arc::clone(&sleeper),
            Arc::clone(&classifier),
        )
        .expect("third attempt connects");

        assert_eq!(supervisor.state(), ConnectionState::Connected);
        // Attempts land at t=0, t=1000 and t=3000.
        assert_eq!(
            *sleeper.waits.lock(),
            vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
        );
        assert_eq!(connection_lost_count(&classifier), 2);
    }

    #[test]
    fn exhausted_attempts_end_degraded() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let classifier = Arc::new(ErrorClassifier::new());
        let connector = Arc::new(FlakyConnector::failing(0));
        let mut supervisor = open_with(
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&sleeper),
            Arc::clone(&classifier),
        )
        .expect("first attempt connects");

        connector.fail_next(10);
        let err = supervisor.reconnect().expect_err("every attempt fails");
        assert_eq!(err.kind, ErrorKind::ConnectionLost);
        assert_eq!(supervisor.state(), ConnectionState::Degraded);
        assert_eq!(connection_lost_count(&classifier), 3);

        let fast = supervisor
            .execute_query("SELECT 1", &[])
            .expect_err("degraded store fails fast");
        assert_eq!(fast.kind, ErrorKind::ConnectionLost);
    }

    #[test]
    fn degraded_returns_to_connected_when_probe_succeeds() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let classifier = Arc::new(ErrorClassifier::new());
        let connector = Arc::new(FlakyConnector::failing(0));
        let mut supervisor = open_with(
            Arc::clone(&connector) as Arc<dyn Connector>,
            sleeper,
            classifier,
        )
        .expect("connects");

        connector.fail_next(3);
        assert!(supervisor.reconnect().is_err());
        assert_eq!(supervisor.state(), ConnectionState::Degraded);

        assert_eq!(supervisor.check_connection(), ConnectionState::Connected);
        supervisor
            .execute_query("SELECT 1", &[])
            .expect("queries work again");
    }

    #[test]
    fn state_watch_observes_transitions() {
        let connector = Arc::new(FlakyConnector::failing(0));
        let mut supervisor = open_with(
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::new(RecordingSleeper::default()),
            Arc::new(ErrorClassifier::new()),
        )
        .expect("connects");
        let watch = supervisor.state_watch();
        assert_eq!(watch.get(), ConnectionState::Connected);

        connector.fail_next(3);
        let _ = supervisor.reconnect();
        assert_eq!(watch.get(), ConnectionState::Degraded);
    }

    #[test]
    fn non_retryable_query_error_is_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let classifier = Arc::new(ErrorClassifier::new());
        let mut supervisor = open_with(
            Arc::new(SqliteConnector),
            Arc::clone(&sleeper),
            Arc::clone(&classifier),
        )
        .expect("connects");

        let err = supervisor
            .execute_query("SELECT * FROM missing_table", &[])
            .expect_err("unknown table fails");
        assert_eq!(err.kind, ErrorKind::QueryFailed);
        assert!(!err.retryable);
        assert!(sleeper.waits.lock().is_empty());
        assert_eq!(classifier.history(&ErrorFilter::default()).len(), 1);
    }

    #[test]
    fn transient_failures_retry_with_backoff_then_surface() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let classifier = Arc::new(ErrorClassifier::new());
        let mut supervisor = open_with(
            Arc::new(SqliteConnector),
            Arc::clone(&sleeper),
            Arc::clone(&classifier),
        )
        .expect("connects");

        let mut calls = 0;
        let err = supervisor
            .run(
                crate::error::ErrorContext::new(ErrorKind::QueryFailed),
                |_conn| -> rusqlite::Result<()> {
                    calls += 1;
                    Err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                        Some("database is locked".to_string()),
                    ))
                },
            )
            .expect_err("always busy");

        assert_eq!(calls, 3);
        assert!(err.retryable);
        assert_eq!(
            *sleeper.waits.lock(),
            vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
        );
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[test]
    fn critical_transient_failure_is_surfaced_without_retry() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let classifier = Arc::new(ErrorClassifier::new());
        let mut supervisor = open_with(
            Arc::new(SqliteConnector),
            Arc::clone(&sleeper),
            Arc::clone(&classifier),
        )
        .expect("connects");

        let mut calls = 0;
        let err = supervisor
            .run(
                crate::error::ErrorContext::new(ErrorKind::QueryFailed),
                |_conn| -> rusqlite::Result<()> {
                    calls += 1;
                    if calls == 1 {
                        return Err(rusqlite::Error::SqliteFailure(
                            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
                            Some("disk I/O error: No space left on device".to_string()),
                        ));
                    }
                    Ok(())
                },
            )
            .expect_err("critical failure reaches the caller");

        assert_eq!(calls, 1);
        assert_eq!(err.severity, Severity::Critical);
        assert!(sleeper.waits.lock().is_empty());
        let critical = classifier.history(&ErrorFilter {
            severity: Some(Severity::Critical),
            ..ErrorFilter::default()
        });
        assert_eq!(critical.len(), 1);
    }

    #[test]
    fn timeout_interrupts_statement_and_keeps_connection() {
        let mut supervisor = open_with(
            Arc::new(SqliteConnector),
            Arc::new(RecordingSleeper::default()),
            Arc::new(ErrorClassifier::new()),
        )
        .expect("connects");

        let err = supervisor
            .execute_query_with_timeout(
                "WITH RECURSIVE counter(x) AS (
                    SELECT 1 UNION ALL SELECT x + 1 FROM counter LIMIT 2000000000
                 ) SELECT count(*) FROM counter",
                &[],
                Duration::from_millis(50),
            )
            .expect_err("statement is interrupted");
        assert_eq!(err.kind, ErrorKind::QueryFailed);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        supervisor
            .execute_query("SELECT 1", &[])
            .expect("connection still usable");
    }

    #[test]
    fn schema_failures_stop_retrying_immediately() {
        struct FutureSchemaConnector;
        impl Connector for FutureSchemaConnector {
            fn connect(&self, _config: &StoreConfig) -> DbResult<Connection> {
                Err(DbError::UnsupportedSchemaVersion {
                    db_version: 99,
                    latest_supported: 1,
                })
            }
        }

        let sleeper = Arc::new(RecordingSleeper::default());
        let err = open_with(
            Arc::new(FutureSchemaConnector),
            Arc::clone(&sleeper),
            Arc::new(ErrorClassifier::new()),
        )
        .err()
        .expect("open fails");
        assert_eq!(err.kind, ErrorKind::MigrationFailed);
        assert!(sleeper.waits.lock().is_empty());
    }
}
