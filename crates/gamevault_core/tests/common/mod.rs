#![allow(dead_code)]

use gamevault_core::db::{open_db, DbError, DbResult};
use gamevault_core::{Connector, Sleeper, StoreConfig};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Records requested waits instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    pub waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits_ms(&self) -> Vec<u64> {
        self.waits
            .lock()
            .iter()
            .map(|wait| wait.as_millis() as u64)
            .collect()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.lock().push(duration);
    }
}

/// Always opens `target`, failing the next `failures` attempts with
/// SQLITE_CANTOPEN.
pub struct FlakyConnector {
    target: StoreConfig,
    failures: AtomicU32,
}

impl FlakyConnector {
    pub fn new(target: StoreConfig, failures: u32) -> Self {
        Self {
            target,
            failures: AtomicU32::new(failures),
        }
    }

    pub fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }
}

impl Connector for FlakyConnector {
    fn connect(&self, _config: &StoreConfig) -> DbResult<Connection> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                Some("unable to open database file".to_string()),
            )));
        }
        open_db(&self.target)
    }
}

/// File-backed config under `dir` with backups in `dir/backups`.
pub fn file_config(dir: &Path) -> StoreConfig {
    StoreConfig {
        backup_dir: Some(dir.join("backups").to_string_lossy().into_owned()),
        ..StoreConfig::with_path(dir.join("game.db").to_string_lossy().into_owned())
    }
}
