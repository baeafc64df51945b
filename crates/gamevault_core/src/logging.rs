//! Process-wide log bootstrap for the storage layer.
//!
//! # Responsibility
//! - Start the rolling file logger exactly once per process.
//! - Provide the sanitizer used before raw storage text reaches a log line.
//!
//! # Invariants
//! - Repeated init with the same level and directory is a no-op.
//! - Init with a different level or directory is rejected, never applied.
//! - Nothing in this module panics.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::path::PathBuf;

const LOG_FILE_BASENAME: &str = "gamevault";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;
pub(crate) const MAX_LOGGED_ERROR_CHARS: usize = 240;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Level and directory a logger writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogTarget {
    level: &'static str,
    dir: PathBuf,
}

impl LogTarget {
    fn parse(level: &str, dir: &str) -> Result<Self, String> {
        let level = match level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            "error" => "error",
            other => {
                return Err(format!(
                    "unsupported log level `{other}`; expected trace|debug|info|warn|error"
                ))
            }
        };

        let dir = dir.trim();
        if dir.is_empty() {
            return Err("log_dir cannot be empty".to_string());
        }
        let dir = PathBuf::from(dir);
        if !dir.is_absolute() {
            return Err(format!(
                "log_dir must be an absolute path, got `{}`",
                dir.display()
            ));
        }
        Ok(Self { level, dir })
    }

    /// Describes why `requested` cannot replace `self`, if it differs.
    fn conflict(&self, requested: &LogTarget) -> Option<String> {
        if self.dir != requested.dir {
            return Some(format!(
                "logging already writes to `{}`; refusing to switch to `{}`",
                self.dir.display(),
                requested.dir.display()
            ));
        }
        (self.level != requested.level).then(|| {
            format!(
                "logging already runs at `{}`; refusing to switch to `{}`",
                self.level, requested.level
            )
        })
    }

    fn start(&self) -> Result<LoggerHandle, String> {
        std::fs::create_dir_all(&self.dir).map_err(|err| {
            format!("cannot create log directory `{}`: {err}", self.dir.display())
        })?;

        let files = FileSpec::default()
            .directory(self.dir.as_path())
            .basename(LOG_FILE_BASENAME);
        Logger::try_with_str(self.level)
            .map_err(|err| format!("invalid log level `{}`: {err}", self.level))?
            .log_to_file(files)
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| format!("logger backend refused to start: {err}"))
    }
}

struct ActiveLogger {
    target: LogTarget,
    _handle: LoggerHandle,
}

/// Starts file logging at `level` under `log_dir`.
///
/// # Errors
/// - `level` is not one of `trace|debug|info|warn|error`.
/// - `log_dir` is blank, relative, or cannot be created.
/// - Logging is already active with another level or directory.
/// - The logger backend refuses to start.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let requested = LogTarget::parse(level, log_dir)?;

    let active = ACTIVE_LOGGER.get_or_try_init(|| {
        let handle = requested.start()?;
        install_panic_hook();
        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} version={}",
            requested.level,
            requested.dir.display(),
            env!("CARGO_PKG_VERSION")
        );
        Ok::<_, String>(ActiveLogger {
            target: requested.clone(),
            _handle: handle,
        })
    })?;

    match active.target.conflict(&requested) {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}

/// Returns `(level, log_dir)` of the active logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE_LOGGER
        .get()
        .map(|active| (active.target.level, active.target.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Collapses newlines and caps length so one log event stays on one line.
pub(crate) fn sanitize_message(value: &str, max_chars: usize) -> String {
    let mut flattened: String = value
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .take(max_chars)
        .collect();
    if value.chars().nth(max_chars).is_some() {
        flattened.push_str("...");
    }
    flattened
}

fn panic_payload(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            let location = panic_info.location().map_or_else(
                || "unknown".to_string(),
                |loc| format!("{}:{}", loc.file(), loc.line()),
            );
            error!(
                "event=panic_captured module=logging status=error location={} payload={}",
                location,
                sanitize_message(panic_payload(panic_info.payload()), MAX_PANIC_PAYLOAD_CHARS)
            );
            previous(panic_info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::{init_logging, logging_status, sanitize_message, LogTarget};

    #[test]
    fn target_accepts_level_aliases_and_case() {
        let target = LogTarget::parse(" WARNING ", "/var/log/gamevault").expect("warning is accepted");
        assert_eq!(target.level, "warn");
        assert_eq!(
            LogTarget::parse("Error", "/tmp").expect("error is accepted").level,
            "error"
        );
        assert!(LogTarget::parse("verbose", "/tmp").is_err());
    }

    #[test]
    fn target_requires_absolute_directory() {
        let err = LogTarget::parse("info", "logs").expect_err("relative dir must be rejected");
        assert!(err.contains("absolute"));
        assert!(LogTarget::parse("info", "   ").is_err());
    }

    #[test]
    fn sanitize_message_flattens_and_caps() {
        assert_eq!(sanitize_message("disk\nfull\rnow", 6), "disk f...");
        assert_eq!(sanitize_message("short", 10), "short");
        assert_eq!(sanitize_message("exact", 5), "exact");
    }

    #[test]
    fn init_logging_is_idempotent_and_rejects_conflicts() {
        let dir = tempfile::tempdir().expect("temp dir");
        let other = tempfile::tempdir().expect("temp dir");
        let dir_str = dir.path().to_str().expect("utf-8 path").to_string();
        let other_str = other.path().to_str().expect("utf-8 path").to_string();

        init_logging("info", &dir_str).expect("first init succeeds");
        init_logging("INFO", &dir_str).expect("same target is idempotent");

        let level_err = init_logging("debug", &dir_str).expect_err("level switch rejected");
        assert!(level_err.contains("refusing to switch"));
        let dir_err = init_logging("info", &other_str).expect_err("dir switch rejected");
        assert!(dir_err.contains("refusing to switch"));

        let (level, active_dir) = logging_status().expect("logging is active");
        assert_eq!(level, "info");
        assert_eq!(active_dir, dir.path());
    }
}
