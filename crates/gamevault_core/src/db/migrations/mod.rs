//! Forward-only schema steps tracked by `PRAGMA user_version`.
//!
//! # Invariants
//! - Step versions are strictly increasing and never reused.
//! - Each pending step and its version bump commit together.

use super::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "init",
        sql: include_str!("0001_init.sql"),
    },
    SchemaStep {
        version: 2,
        name: "pending_replay_index",
        sql: include_str!("0002_pending_order.sql"),
    },
    SchemaStep {
        version: 3,
        name: "backup_directory",
        sql: include_str!("0003_backup_directory.sql"),
    },
];

/// Newest schema version this build understands.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Brings the database up to `latest_version()`. Returns how many steps ran.
///
/// # Errors
/// `UnsupportedSchemaVersion` when the file was written by a newer build.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let found: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();
    if found > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: found,
            latest_supported: latest,
        });
    }

    let pending: Vec<&SchemaStep> = STEPS.iter().filter(|step| step.version > found).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;
    Ok(pending.len())
}
