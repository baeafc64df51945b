//! Database snapshots and their retention.
//!
//! Backups are written with `VACUUM INTO` through the supervised connection,
//! recorded in `backup_records` together with the directory they landed in,
//! and pruned oldest-first by `created_at`.

use crate::clock::now_epoch_ms;
use crate::connection::ConnectionSupervisor;
use crate::error::{ClassifiedError, ErrorClassifier, ErrorContext, ErrorKind, RawFailure, Severity};
use log::{error, info, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Who initiated a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Automatic,
    Manual,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Outcome of the most recent backup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    Success,
    Failed,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: i64,
    pub filename: String,
    /// Directory the file was written to; empty for records that predate
    /// directory tracking.
    pub directory: String,
    /// Epoch ms.
    pub created_at: i64,
    /// Absent for automatic backups.
    pub created_by: Option<String>,
    pub size: u64,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
}

impl BackupRecord {
    /// Location of the backup file, resolving legacy records under `fallback`.
    pub fn path_or(&self, fallback: &Path) -> PathBuf {
        if self.directory.is_empty() {
            fallback.join(&self.filename)
        } else {
            Path::new(&self.directory).join(&self.filename)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub status: Option<BackupStatus>,
    /// Epoch ms of the last successful backup.
    pub last_backup: Option<i64>,
}

#[derive(Debug, Default)]
pub struct BackupScheduler {
    summary: Mutex<BackupSummary>,
}

impl BackupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> BackupSummary {
        *self.summary.lock()
    }

    /// Seeds `last_backup` from the newest persisted record.
    pub(crate) fn restore_summary(&self, supervisor: &mut ConnectionSupervisor) {
        let context = ErrorContext::new(ErrorKind::QueryFailed);
        let latest = supervisor.run(context, |conn| {
            conn.query_row("SELECT MAX(created_at) FROM backup_records;", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
        });
        if let Ok(Some(created_at)) = latest {
            let mut summary = self.summary.lock();
            summary.status = Some(BackupStatus::Success);
            summary.last_backup = Some(created_at);
        }
    }

    /// Writes a backup, records it, and enforces retention.
    ///
    /// # Errors
    /// BACKUP_FAILED (at least HIGH) when the file cannot be produced or is
    /// absent afterwards; CONNECTION_LOST when the store is not connected.
    pub fn run_backup(
        &self,
        supervisor: &mut ConnectionSupervisor,
        backup_type: BackupType,
        requested_by: Option<&str>,
    ) -> Result<BackupRecord, ClassifiedError> {
        self.set_status(BackupStatus::InProgress);
        let result = self.write_backup(supervisor, backup_type, requested_by);
        match &result {
            Ok(record) => {
                let mut summary = self.summary.lock();
                summary.status = Some(BackupStatus::Success);
                summary.last_backup = Some(record.created_at);
            }
            Err(_) => self.set_status(BackupStatus::Failed),
        }
        result
    }

    /// Newest first; ties on `created_at` resolve by insertion order.
    pub fn list_backups(
        &self,
        supervisor: &mut ConnectionSupervisor,
        limit: usize,
    ) -> Result<Vec<BackupRecord>, ClassifiedError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        supervisor.run(ErrorContext::new(ErrorKind::QueryFailed), |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, directory, created_at, created_by, size, type
                 FROM backup_records
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1;",
            )?;
            let rows = stmt.query_map([limit], map_record)?;
            rows.collect()
        })
    }

    /// Removes every backup beyond the `keep` newest, wherever their files
    /// were written. Returns the removed records.
    pub(crate) fn enforce_retention(
        &self,
        supervisor: &mut ConnectionSupervisor,
        keep: u32,
    ) -> Result<Vec<BackupRecord>, ClassifiedError> {
        let directory = supervisor.config().backup_directory();
        let classifier = Arc::clone(supervisor.classifier());
        let context = ErrorContext::new(ErrorKind::BackupFailed);
        let conn = supervisor.connection_for(&context)?;
        prune(conn, &directory, keep).map_err(|err| {
            classifier.classify(&RawFailure::from(&err), context.with_min_severity(Severity::High))
        })
    }

    fn write_backup(
        &self,
        supervisor: &mut ConnectionSupervisor,
        backup_type: BackupType,
        requested_by: Option<&str>,
    ) -> Result<BackupRecord, ClassifiedError> {
        let directory = supervisor.config().backup_directory();
        let keep = supervisor.config().max_backups;
        let classifier = Arc::clone(supervisor.classifier());
        let context = ErrorContext::new(ErrorKind::BackupFailed).with_min_severity(Severity::High);
        let failed = |raw: RawFailure| classifier.classify(&raw, context.clone());

        if let Err(err) = fs::create_dir_all(&directory) {
            return Err(failed(RawFailure::from(&err)));
        }
        let directory = fs::canonicalize(&directory).unwrap_or(directory);

        let created_at = now_epoch_ms();
        let filename = backup_filename(created_at);
        let target = directory.join(&filename);
        info!(
            "event=backup_write module=backup status=start type={} target={}",
            backup_type.as_str(),
            target.display()
        );

        let target_text = target.to_string_lossy().into_owned();
        let conn = supervisor.connection_for(&context)?;
        if let Err(err) = conn.execute("VACUUM INTO ?1;", [target_text.as_str()]) {
            return Err(failed(RawFailure::from(&err)));
        }

        let size = match fs::metadata(&target) {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => {
                return Err(failed(RawFailure::new(format!(
                    "backup file {} is absent after write",
                    target.display()
                ))));
            }
        };

        let record = BackupRecord {
            id: 0,
            filename,
            directory: directory.to_string_lossy().into_owned(),
            created_at,
            created_by: requested_by.map(str::to_string),
            size,
            backup_type,
        };
        let inserted = conn.execute(
            "INSERT INTO backup_records (filename, directory, created_at, created_by, size, type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                record.filename,
                record.directory,
                record.created_at,
                record.created_by,
                i64::try_from(record.size).unwrap_or(i64::MAX),
                record.backup_type.as_str(),
            ],
        );
        if let Err(err) = inserted {
            remove_backup_file(&target);
            return Err(failed(RawFailure::from(&err)));
        }
        let record = BackupRecord {
            id: conn.last_insert_rowid(),
            ..record
        };
        info!(
            "event=backup_write module=backup status=ok id={} filename={} size={}",
            record.id, record.filename, record.size
        );

        if let Err(err) = prune(conn, &directory, keep) {
            report_retention_failure(&classifier, &err);
        }
        Ok(record)
    }

    fn set_status(&self, status: BackupStatus) {
        self.summary.lock().status = Some(status);
    }
}

fn prune(conn: &Connection, fallback: &Path, keep: u32) -> rusqlite::Result<Vec<BackupRecord>> {
    let expired: Vec<BackupRecord> = {
        let mut stmt = conn.prepare(
            "SELECT id, filename, directory, created_at, created_by, size, type
             FROM backup_records
             ORDER BY created_at DESC, id DESC
             LIMIT -1 OFFSET ?1;",
        )?;
        let rows = stmt.query_map([i64::from(keep)], map_record)?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut removed = Vec::with_capacity(expired.len());
    for record in expired {
        if !remove_backup_file(&record.path_or(fallback)) {
            continue;
        }
        conn.execute("DELETE FROM backup_records WHERE id = ?1;", [record.id])?;
        info!(
            "event=backup_retention module=backup status=ok removed={} created_at={}",
            record.filename, record.created_at
        );
        removed.push(record);
    }
    Ok(removed)
}

/// `true` once the file is gone, including when it already was.
fn remove_backup_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == IoErrorKind::NotFound => true,
        Err(err) => {
            warn!(
                "event=backup_remove module=backup status=error path={} error={err}",
                path.display()
            );
            false
        }
    }
}

fn report_retention_failure(classifier: &ErrorClassifier, err: &rusqlite::Error) {
    error!("event=backup_retention module=backup status=error error={err}");
    classifier.classify(
        &RawFailure::from(err),
        ErrorContext::new(ErrorKind::BackupFailed).with_min_severity(Severity::High),
    );
}

fn backup_filename(created_at: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("gamevault-{created_at}-{}.db", &suffix[..8])
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<BackupRecord> {
    let type_text: String = row.get(6)?;
    let backup_type = BackupType::parse(&type_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown backup type `{type_text}`").into(),
        )
    })?;
    let size: i64 = row.get(5)?;
    Ok(BackupRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        directory: row.get(2)?,
        created_at: row.get(3)?,
        created_by: row.get(4)?,
        size: u64::try_from(size).unwrap_or(0),
        backup_type,
    })
}

#[cfg(test)]
mod tests {
    use super::{BackupScheduler, BackupStatus, BackupType};
    use crate::config::StoreConfig;
    use crate::connection::{ConnectionSupervisor, SqliteConnector, ThreadSleeper};
    use crate::error::{ErrorClassifier, ErrorFilter, ErrorKind, Severity};
    use crate::health::QueryMetrics;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir, max_backups: u32) -> ConnectionSupervisor {
        let config = StoreConfig {
            max_backups,
            backup_dir: Some(dir.path().join("backups").to_string_lossy().into_owned()),
            ..StoreConfig::with_path(dir.path().join("game.db").to_string_lossy().into_owned())
        };
        ConnectionSupervisor::open(
            config,
            Arc::new(SqliteConnector),
            Arc::new(ThreadSleeper),
            Arc::new(ErrorClassifier::new()),
            Arc::new(QueryMetrics::default()),
        )
        .expect("file store opens")
    }

    #[test]
    fn manual_backup_writes_file_and_record() {
        let dir = TempDir::new().expect("temp dir");
        let mut supervisor = supervisor(&dir, 10);
        supervisor
            .execute_query("CREATE TABLE nations (name TEXT)", &[])
            .expect("create table");
        let scheduler = BackupScheduler::new();

        let record = scheduler
            .run_backup(&mut supervisor, BackupType::Manual, Some("admin"))
            .expect("backup succeeds");
        assert_eq!(record.created_by.as_deref(), Some("admin"));
        assert_eq!(record.backup_type, BackupType::Manual);
        assert!(record.size > 0);

        let path = record.path_or(&supervisor.config().backup_directory());
        assert!(path.is_file());
        let copy = rusqlite::Connection::open(&path).expect("backup opens");
        let tables: i64 = copy
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'nations'",
                [],
                |row| row.get(0),
            )
            .expect("query backup");
        assert_eq!(tables, 1);

        let summary = scheduler.summary();
        assert_eq!(summary.status, Some(BackupStatus::Success));
        assert_eq!(summary.last_backup, Some(record.created_at));
    }

    #[test]
    fn retention_keeps_newest_and_deletes_files() {
        let dir = TempDir::new().expect("temp dir");
        let mut supervisor = supervisor(&dir, 3);
        let scheduler = BackupScheduler::new();

        let mut created = Vec::new();
        for _ in 0..5 {
            created.push(
                scheduler
                    .run_backup(&mut supervisor, BackupType::Automatic, None)
                    .expect("backup succeeds"),
            );
        }

        let listed = scheduler
            .list_backups(&mut supervisor, 100)
            .expect("list backups");
        let listed_ids: Vec<i64> = listed.iter().map(|record| record.id).collect();
        let newest: Vec<i64> = created.iter().rev().take(3).map(|record| record.id).collect();
        assert_eq!(listed_ids, newest);

        let directory = supervisor.config().backup_directory();
        for old in &created[..2] {
            assert!(!old.path_or(&directory).exists());
        }
        for kept in &listed {
            assert!(kept.path_or(&directory).is_file());
            assert!(kept.created_by.is_none());
        }
    }

    #[test]
    fn degraded_store_reports_failed_status() {
        let dir = TempDir::new().expect("temp dir");
        let mut supervisor = supervisor(&dir, 3);
        supervisor.close();
        let scheduler = BackupScheduler::new();

        let err = scheduler
            .run_backup(&mut supervisor, BackupType::Manual, None)
            .expect_err("no connection");
        assert_eq!(err.kind, ErrorKind::ConnectionLost);
        assert_eq!(scheduler.summary().status, Some(BackupStatus::Failed));
    }

    #[test]
    fn unwritable_target_is_high_severity_backup_failure() {
        let dir = TempDir::new().expect("temp dir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").expect("write blocker");
        let config = StoreConfig {
            backup_dir: Some(blocker.join("nested").to_string_lossy().into_owned()),
            ..StoreConfig::with_path(":memory:")
        };
        let classifier = Arc::new(ErrorClassifier::new());
        let mut supervisor = ConnectionSupervisor::open(
            config,
            Arc::new(SqliteConnector),
            Arc::new(ThreadSleeper),
            Arc::clone(&classifier),
            Arc::new(QueryMetrics::default()),
        )
        .expect("memory store opens");
        let scheduler = BackupScheduler::new();

        let err = scheduler
            .run_backup(&mut supervisor, BackupType::Manual, None)
            .expect_err("directory cannot be created");
        assert_eq!(err.kind, ErrorKind::BackupFailed);
        assert!(err.severity >= Severity::High);
        assert_eq!(
            classifier
                .history(&ErrorFilter {
                    kind: Some(ErrorKind::BackupFailed),
                    ..ErrorFilter::default()
                })
                .len(),
            1
        );
        assert!(scheduler
            .list_backups(&mut supervisor, 10)
            .expect("list")
            .is_empty());
    }
}
