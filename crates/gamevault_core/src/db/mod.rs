//! SQLite bootstrap, pragmas and schema migrations.
//!
//! # Responsibility
//! - Open and configure the store connection from a `StoreConfig`.
//! - Apply schema migrations in deterministic order.
//! - Verify required tables before the connection is handed out.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No caller reads or writes before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;
pub mod schema;

pub use open::{apply_pragmas, open_db};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "schema mismatch: required table `{table}` is missing")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "schema mismatch: required column `{column}` is missing from `{table}`"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
