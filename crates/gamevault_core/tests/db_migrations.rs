mod common;

use common::file_config;
use gamevault_core::db::migrations::latest_version;
use gamevault_core::db::open_db;
use gamevault_core::{ErrorKind, GameStore, StoreConfig, StoreOpenError};
use rusqlite::Connection;
use tempfile::TempDir;

fn user_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn open_error_kind(config: StoreConfig) -> ErrorKind {
    match GameStore::builder(config).background_workers(false).open() {
        Err(StoreOpenError::Storage(err)) => err.kind,
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("open should fail"),
    }
}

#[test]
fn fresh_database_is_migrated_to_latest() {
    let dir = TempDir::new().unwrap();
    let conn = open_db(&file_config(dir.path())).unwrap();
    assert_eq!(user_version(&conn), latest_version());

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(tables.contains(&"backup_records".to_string()));
    assert!(tables.contains(&"pending_operations".to_string()));
}

#[test]
fn reopening_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = file_config(dir.path());
    drop(open_db(&config).unwrap());
    let conn = open_db(&config).unwrap();
    assert_eq!(user_version(&conn), latest_version());
}

#[test]
fn newer_schema_is_a_migration_failure() {
    let dir = TempDir::new().unwrap();
    let config = file_config(dir.path());
    {
        let conn = Connection::open(&config.path).unwrap();
        conn.execute_batch(&format!("PRAGMA user_version = {};", latest_version() + 1))
            .unwrap();
    }

    assert_eq!(open_error_kind(config), ErrorKind::MigrationFailed);
}

#[test]
fn missing_table_is_a_schema_mismatch_unless_validation_is_off() {
    let dir = TempDir::new().unwrap();
    let config = file_config(dir.path());
    {
        let conn = open_db(&config).unwrap();
        conn.execute_batch("DROP TABLE pending_operations;").unwrap();
    }

    assert_eq!(open_error_kind(config.clone()), ErrorKind::SchemaMismatch);

    let relaxed = StoreConfig {
        enable_schema_validation: false,
        ..config
    };
    let conn = open_db(&relaxed).unwrap();
    assert_eq!(user_version(&conn), latest_version());
}
