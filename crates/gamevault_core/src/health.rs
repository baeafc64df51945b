//! Query counters and periodic health snapshots.
//!
//! # Responsibility
//! - Count statement outcomes and keep a moving response-time average.
//! - Build a `HealthSnapshot` per tick and retain only the latest one.
//!
//! # Invariants
//! - Readers of the latest snapshot never touch the connection lock.
//! - `error_rate` is failures / total since the last reset, `0.0` when idle.

use crate::backup::{BackupScheduler, BackupStatus};
use crate::clock::now_epoch_ms;
use crate::connection::{ConnectionState, ConnectionSupervisor};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::time::Duration;

/// Weight of the newest sample in the response-time average.
const RESPONSE_TIME_ALPHA: f64 = 0.2;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    queries: u64,
    failures: u64,
    average_ms: Option<f64>,
}

/// Counters shared by the supervisor and the health monitor.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    counters: Mutex<Counters>,
}

/// Point-in-time copy of `QueryMetrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub query_count: u64,
    pub failure_count: u64,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
}

impl QueryMetrics {
    /// Records one attempt.
    pub fn record(&self, elapsed: Duration, success: bool) {
        let sample = elapsed.as_secs_f64() * 1_000.0;
        let mut counters = self.counters.lock();
        counters.queries += 1;
        if !success {
            counters.failures += 1;
        }
        counters.average_ms = Some(match counters.average_ms {
            Some(average) => average + RESPONSE_TIME_ALPHA * (sample - average),
            None => sample,
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = *self.counters.lock();
        let error_rate = if counters.queries == 0 {
            0.0
        } else {
            counters.failures as f64 / counters.queries as f64
        };
        MetricsSnapshot {
            query_count: counters.queries,
            failure_count: counters.failures,
            error_rate,
            average_response_time_ms: counters.average_ms.unwrap_or(0.0),
        }
    }

    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
        info!("event=metrics_reset module=health status=ok");
    }
}

/// Latest observed health of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Epoch ms.
    pub timestamp: i64,
    pub connection_status: ConnectionState,
    pub query_count: u64,
    pub error_rate: f64,
    pub average_response_time_ms: f64,
    /// Bytes; `None` when the connection could not be sampled.
    pub database_size: Option<u64>,
    /// `None` until the first backup attempt.
    pub backup_status: Option<BackupStatus>,
    pub last_backup: Option<i64>,
    pub pending_operations: usize,
}

#[derive(Debug, Default)]
pub struct HealthMonitor {
    latest: RwLock<Option<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot, if any tick ran.
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.latest.read().clone()
    }

    /// Probes connectivity, samples size and backup status, and replaces
    /// the retained snapshot.
    ///
    /// Waits at most `lock_wait` for the connection; when a long caller
    /// operation holds it, the tick reports the observed state without
    /// probing.
    pub fn tick(
        &self,
        supervisor: &Mutex<ConnectionSupervisor>,
        metrics: &QueryMetrics,
        backups: &BackupScheduler,
        pending_operations: usize,
        lock_wait: Duration,
    ) -> HealthSnapshot {
        let (connection_status, database_size) = match supervisor.try_lock_for(lock_wait) {
            Some(mut guard) => {
                let state = guard.check_connection();
                (state, guard.database_size_bytes())
            }
            None => {
                warn!("event=health_tick module=health status=busy lock_wait_ms={}", lock_wait.as_millis());
                let state = self
                    .latest()
                    .map_or(ConnectionState::Connected, |snapshot| snapshot.connection_status);
                (state, None)
            }
        };

        self.record(connection_status, database_size, metrics, backups, pending_operations)
    }

    /// Builds and retains a snapshot from already-observed connectivity.
    pub fn record(
        &self,
        connection_status: ConnectionState,
        database_size: Option<u64>,
        metrics: &QueryMetrics,
        backups: &BackupScheduler,
        pending_operations: usize,
    ) -> HealthSnapshot {
        let counters = metrics.snapshot();
        let backup = backups.summary();
        let snapshot = HealthSnapshot {
            timestamp: now_epoch_ms(),
            connection_status,
            query_count: counters.query_count,
            error_rate: counters.error_rate,
            average_response_time_ms: counters.average_response_time_ms,
            database_size,
            backup_status: backup.status,
            last_backup: backup.last_backup,
            pending_operations,
        };

        info!(
            "event=health_tick module=health status=ok connection={} queries={} error_rate={:.4} avg_ms={:.2} size={} pending={}",
            snapshot.connection_status.as_str(),
            snapshot.query_count,
            snapshot.error_rate,
            snapshot.average_response_time_ms,
            snapshot.database_size.map_or(-1, |size| size as i64),
            snapshot.pending_operations
        );
        *self.latest.write() = Some(snapshot.clone());
        snapshot
    }
}
