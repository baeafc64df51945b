//! Required-schema checks run on every (re)connection.

use super::{DbError, DbResult};
use rusqlite::Connection;

const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "backup_records",
        &[
            "id",
            "filename",
            "directory",
            "created_at",
            "created_by",
            "size",
            "type",
        ],
    ),
    (
        "pending_operations",
        &[
            "id",
            "statement",
            "params_json",
            "enqueued_at",
            "retry_count",
            "max_retries",
            "priority",
        ],
    ),
];

/// Fails when a table or column the store depends on is missing.
pub fn validate_schema(conn: &Connection) -> DbResult<()> {
    for &(table, columns) in REQUIRED_COLUMNS {
        if !table_exists(conn, table)? {
            return Err(DbError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(DbError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
