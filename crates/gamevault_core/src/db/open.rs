//! Connection bootstrap for the configured SQLite database.
//!
//! # Invariants
//! - Returned connections carry the pragmas requested by the config.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::schema::validate_schema;
use super::{DbError, DbResult};
use crate::config::StoreConfig;
use log::{error, info};
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Opens the database named by `config.path` and prepares it for use.
///
/// # Side effects
/// - Creates the database file when it does not exist.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(config: &StoreConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = if config.is_in_memory() { "memory" } else { "file" };
    info!("event=db_open module=db status=start mode={mode}");

    let result = connect(config).and_then(|mut conn| {
        bootstrap_connection(&mut conn, config)?;
        Ok(conn)
    });
    let duration_ms = started_at.elapsed().as_millis();
    match &result {
        Ok(_) => info!("event=db_open module=db status=ok mode={mode} duration_ms={duration_ms}"),
        Err(err) => error!(
            "event=db_open module=db status=error mode={mode} duration_ms={duration_ms} error_code={} error={err}",
            failure_code(err)
        ),
    }
    result
}

fn connect(config: &StoreConfig) -> DbResult<Connection> {
    let conn = if config.is_in_memory() {
        Connection::open_in_memory()?
    } else {
        Connection::open(config.path.trim())?
    };
    Ok(conn)
}

fn failure_code(err: &DbError) -> &'static str {
    match err {
        DbError::Sqlite(_) => "db_open_failed",
        _ => "db_bootstrap_failed",
    }
}

/// Applies journal mode, foreign-key enforcement and busy timeout.
///
/// Safe to call on a live connection; used again on config hot reload.
pub fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> DbResult<()> {
    let foreign_keys = if config.enable_foreign_keys { "ON" } else { "OFF" };
    conn.pragma_update(None, "foreign_keys", foreign_keys)?;

    if !config.is_in_memory() {
        let journal_mode = if config.enable_wal { "WAL" } else { "DELETE" };
        let _applied: String =
            conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))?;
    }

    conn.busy_timeout(Duration::from_millis(config.connection_timeout_ms))?;
    Ok(())
}

fn bootstrap_connection(conn: &mut Connection, config: &StoreConfig) -> DbResult<()> {
    apply_pragmas(conn, config)?;
    apply_migrations(conn)?;
    if config.enable_schema_validation {
        validate_schema(conn)?;
    }
    Ok(())
}
