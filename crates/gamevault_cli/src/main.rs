//! CLI smoke entry point.
//!
//! Opens a store (from an optional JSON config path, else in memory), runs a
//! probe query and prints the health snapshot and backup list as JSON.

use gamevault_core::{core_version, init_logging, GameStore, StoreConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("gamevault_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => StoreConfig::load(&path).map_err(|err| err.to_string())?,
        None => StoreConfig::with_path(":memory:"),
    };
    if let Ok(log_dir) = std::env::var("GAMEVAULT_LOG_DIR") {
        init_logging("info", &log_dir)?;
    }

    println!("gamevault_core version={}", core_version());
    let store = GameStore::builder(config)
        .background_workers(false)
        .open()
        .map_err(|err| err.to_string())?;

    let probe = store
        .execute_query("SELECT 1 AS ok", &[])
        .map_err(|err| err.to_string())?;
    log::info!("event=cli_probe module=cli status=ok rows={}", probe.len());

    let health = store.run_health_check();
    let backups = store.list_backups(10).map_err(|err| err.to_string())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&health).map_err(|err| err.to_string())?
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&backups).map_err(|err| err.to_string())?
    );

    store.shutdown();
    Ok(())
}
