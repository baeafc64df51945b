//! Resilient data-access layer for GameVault.
//!
//! This crate owns the single SQLite connection used to persist game state and
//! keeps it usable through lock contention, I/O errors and disk pressure.
//! Game-domain code talks to storage only through [`GameStore`].

pub mod backup;
pub mod background;
mod clock;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod health;
pub mod logging;
pub mod queue;
pub mod store;
pub mod transaction;
pub mod value;

pub use backup::{BackupRecord, BackupScheduler, BackupStatus, BackupSummary, BackupType};
pub use config::{validate_config, ConfigError, RetryPolicy, StoreConfig};
pub use connection::{
    ConnectionState, ConnectionStateWatch, ConnectionSupervisor, Connector, Sleeper,
    SqliteConnector, ThreadSleeper,
};
pub use error::{
    ClassifiedError, ErrorClassifier, ErrorContext, ErrorFilter, ErrorKind, ErrorRecord,
    ErrorStats, RawFailure, Severity,
};
pub use health::{HealthMonitor, HealthSnapshot, MetricsSnapshot, QueryMetrics};
pub use logging::{default_log_level, init_logging, logging_status};
pub use queue::{OperationPriority, OperationQueue, QueuedOperation, ReplayReport};
pub use store::{GameStore, StoreBuilder, StoreOpenError, WriteOutcome, WriteRequest};
pub use transaction::{TransactionRunner, WriteStep};
pub use value::{QueryRows, SqlValue};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
