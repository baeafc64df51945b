//! Store configuration and its validator.
//!
//! # Responsibility
//! - Enumerate every recognized option with its documented default.
//! - Validate a candidate configuration as one unit.
//!
//! # Invariants
//! - A configuration is either valid as a whole or rejected as a whole.
//! - `RetryPolicy::max_delay_ms >= RetryPolicy::base_delay_ms` always holds
//!   for an accepted policy.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const MIN_CONNECTION_TIMEOUT_MS: u64 = 1_000;
pub const MAX_CONNECTION_TIMEOUT_MS: u64 = 60_000;
pub const MIN_RETRY_ATTEMPTS: u32 = 1;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const MIN_BACKUP_INTERVAL_MS: u64 = 60_000;
pub const MIN_HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;
pub const MIN_MAX_BACKUPS: u32 = 1;
pub const MIN_BASE_DELAY_MS: u64 = 100;

const IN_MEMORY_PATH: &str = ":memory:";
const BACKUP_DIR_NAME: &str = "backups";
const PENDING_SPILL_SUFFIX: &str = ".pending.json";

/// Why a candidate configuration was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyPath,
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    InvalidRetryPolicy(String),
    Parse(String),
    Io(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "config `path` must be a non-empty string"),
            Self::OutOfRange {
                field,
                value,
                expected,
            } => write!(f, "config `{field}` = {value} is out of range; expected {expected}"),
            Self::InvalidRetryPolicy(reason) => write!(f, "invalid retry policy: {reason}"),
            Self::Parse(reason) => write!(f, "config could not be parsed: {reason}"),
            Self::Io(reason) => write!(f, "config could not be read: {reason}"),
        }
    }
}

impl Error for ConfigError {}

/// Backoff parameters for reconnection and transient-failure retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(rename = "baseDelay")]
    pub base_delay_ms: u64,
    #[serde(rename = "maxDelay")]
    pub max_delay_ms: u64,
    #[serde(rename = "backoffMultiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Every option the store recognizes.
///
/// | key                      | default          |
/// |--------------------------|------------------|
/// | `path`                   | `gamevault.db`   |
/// | `enableWAL`              | `true`           |
/// | `enableForeignKeys`      | `true`           |
/// | `connectionTimeout`      | `5000` ms        |
/// | `retryAttempts`          | `3`              |
/// | `backupInterval`         | `3600000` ms     |
/// | `healthCheckInterval`    | `30000` ms       |
/// | `maxBackups`             | `10`             |
/// | `enableHealthMonitoring` | `true`           |
/// | `enableAutoBackup`       | `true`           |
/// | `enableSchemaValidation` | `true`           |
/// | `backupDir`              | `<path dir>/backups` |
/// | `retryPolicy`            | derived from `retryAttempts` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: String,
    #[serde(rename = "enableWAL")]
    pub enable_wal: bool,
    #[serde(rename = "enableForeignKeys")]
    pub enable_foreign_keys: bool,
    #[serde(rename = "connectionTimeout")]
    pub connection_timeout_ms: u64,
    #[serde(rename = "retryAttempts")]
    pub retry_attempts: u32,
    #[serde(rename = "backupInterval")]
    pub backup_interval_ms: u64,
    #[serde(rename = "healthCheckInterval")]
    pub health_check_interval_ms: u64,
    #[serde(rename = "maxBackups")]
    pub max_backups: u32,
    #[serde(rename = "enableHealthMonitoring")]
    pub enable_health_monitoring: bool,
    #[serde(rename = "enableAutoBackup")]
    pub enable_auto_backup: bool,
    #[serde(rename = "enableSchemaValidation")]
    pub enable_schema_validation: bool,
    #[serde(rename = "backupDir")]
    pub backup_dir: Option<String>,
    #[serde(rename = "retryPolicy")]
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "gamevault.db".to_string(),
            enable_wal: true,
            enable_foreign_keys: true,
            connection_timeout_ms: 5_000,
            retry_attempts: 3,
            backup_interval_ms: 3_600_000,
            health_check_interval_ms: 30_000,
            max_backups: 10,
            enable_health_monitoring: true,
            enable_auto_backup: true,
            enable_schema_validation: true,
            backup_dir: None,
            retry_policy: None,
        }
    }
}

impl StoreConfig {
    /// Default options pointing at `path`.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON configuration object.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            ConfigError::Io(format!("{}: {err}", path.as_ref().display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.trim() == IN_MEMORY_PATH
    }

    /// Retry policy in force: the explicit one, or the default with
    /// `max_attempts = retry_attempts`.
    pub fn effective_retry_policy(&self) -> RetryPolicy {
        match &self.retry_policy {
            Some(policy) => policy.clone(),
            None => RetryPolicy {
                max_attempts: self.retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }

    /// File that takes parked writes when the database cannot be reached
    /// at shutdown. `None` for in-memory stores.
    pub fn pending_spill_path(&self) -> Option<PathBuf> {
        if self.is_in_memory() {
            return None;
        }
        Some(PathBuf::from(format!(
            "{}{PENDING_SPILL_SUFFIX}",
            self.path.trim()
        )))
    }

    /// Directory that receives backup files.
    pub fn backup_directory(&self) -> PathBuf {
        if let Some(dir) = self.backup_dir.as_deref().map(str::trim) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        if self.is_in_memory() {
            return std::env::temp_dir().join("gamevault").join(BACKUP_DIR_NAME);
        }
        match Path::new(self.path.trim()).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(BACKUP_DIR_NAME),
            _ => PathBuf::from(BACKUP_DIR_NAME),
        }
    }

    /// Whether moving from `self` to `next` needs a fresh connection.
    pub fn requires_reconnect(&self, next: &StoreConfig) -> bool {
        self.path.trim() != next.path.trim()
    }
}

/// Accepts `config` only if every field is within its declared bound.
pub fn validate_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.path.trim().is_empty() {
        return Err(ConfigError::EmptyPath);
    }

    check_range(
        "connectionTimeout",
        config.connection_timeout_ms,
        MIN_CONNECTION_TIMEOUT_MS,
        MAX_CONNECTION_TIMEOUT_MS,
        "1000..=60000 ms",
    )?;
    check_range(
        "retryAttempts",
        u64::from(config.retry_attempts),
        u64::from(MIN_RETRY_ATTEMPTS),
        u64::from(MAX_RETRY_ATTEMPTS),
        "1..=10",
    )?;
    check_range(
        "backupInterval",
        config.backup_interval_ms,
        MIN_BACKUP_INTERVAL_MS,
        u64::MAX,
        ">= 60000 ms",
    )?;
    check_range(
        "healthCheckInterval",
        config.health_check_interval_ms,
        MIN_HEALTH_CHECK_INTERVAL_MS,
        u64::MAX,
        ">= 5000 ms",
    )?;
    check_range(
        "maxBackups",
        u64::from(config.max_backups),
        u64::from(MIN_MAX_BACKUPS),
        u64::MAX,
        ">= 1",
    )?;

    if let Some(policy) = &config.retry_policy {
        validate_retry_policy(policy)?;
    }

    Ok(())
}

/// Accepts `policy` only if its bounds hold and the multiplier is a
/// finite value above 1.
pub fn validate_retry_policy(policy: &RetryPolicy) -> Result<(), ConfigError> {
    if !(MIN_RETRY_ATTEMPTS..=MAX_RETRY_ATTEMPTS).contains(&policy.max_attempts) {
        return Err(ConfigError::InvalidRetryPolicy(format!(
            "maxAttempts {} must be within 1..=10",
            policy.max_attempts
        )));
    }
    if policy.base_delay_ms < MIN_BASE_DELAY_MS {
        return Err(ConfigError::InvalidRetryPolicy(format!(
            "baseDelay {} ms must be at least {MIN_BASE_DELAY_MS} ms",
            policy.base_delay_ms
        )));
    }
    if policy.max_delay_ms < policy.base_delay_ms {
        return Err(ConfigError::InvalidRetryPolicy(format!(
            "maxDelay {} ms is below baseDelay {} ms",
            policy.max_delay_ms, policy.base_delay_ms
        )));
    }
    if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier <= 1.0 {
        return Err(ConfigError::InvalidRetryPolicy(format!(
            "backoffMultiplier {} must be finite and greater than 1",
            policy.backoff_multiplier
        )));
    }
    Ok(())
}

fn check_range(
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_config, validate_retry_policy, ConfigError, RetryPolicy, StoreConfig};
    use std::path::PathBuf;

    #[test]
    fn defaults_are_valid() {
        validate_config(&StoreConfig::default()).expect("defaults must validate");
        validate_retry_policy(&RetryPolicy::default()).expect("default policy must validate");
    }

    #[test]
    fn bounds_are_inclusive() {
        let config = StoreConfig {
            connection_timeout_ms: 60_000,
            retry_attempts: 10,
            backup_interval_ms: 60_000,
            health_check_interval_ms: 5_000,
            max_backups: 1,
            ..StoreConfig::default()
        };
        validate_config(&config).expect("upper/lower bounds are accepted");
    }

    #[test]
    fn each_out_of_range_field_is_rejected() {
        let cases: Vec<(&str, StoreConfig)> = vec![
            (
                "connectionTimeout",
                StoreConfig {
                    connection_timeout_ms: 999,
                    ..StoreConfig::default()
                },
            ),
            (
                "connectionTimeout",
                StoreConfig {
                    connection_timeout_ms: 60_001,
                    ..StoreConfig::default()
                },
            ),
            (
                "retryAttempts",
                StoreConfig {
                    retry_attempts: 0,
                    ..StoreConfig::default()
                },
            ),
            (
                "retryAttempts",
                StoreConfig {
                    retry_attempts: 11,
                    ..StoreConfig::default()
                },
            ),
            (
                "backupInterval",
                StoreConfig {
                    backup_interval_ms: 59_999,
                    ..StoreConfig::default()
                },
            ),
            (
                "healthCheckInterval",
                StoreConfig {
                    health_check_interval_ms: 4_999,
                    ..StoreConfig::default()
                },
            ),
            (
                "maxBackups",
                StoreConfig {
                    max_backups: 0,
                    ..StoreConfig::default()
                },
            ),
        ];

        for (expected_field, config) in cases {
            match validate_config(&config) {
                Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected rejection of {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_path_is_rejected() {
        let config = StoreConfig::with_path("   ");
        assert_eq!(validate_config(&config), Err(ConfigError::EmptyPath));
    }

    #[test]
    fn retry_policy_bounds_are_enforced() {
        let inverted = RetryPolicy {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..RetryPolicy::default()
        };
        assert!(matches!(
            validate_retry_policy(&inverted),
            Err(ConfigError::InvalidRetryPolicy(_))
        ));

        for multiplier in [f64::NAN, f64::INFINITY, 1.0, 0.5] {
            let policy = RetryPolicy {
                backoff_multiplier: multiplier,
                ..RetryPolicy::default()
            };
            assert!(validate_retry_policy(&policy).is_err(), "multiplier {multiplier}");
        }

        let too_fast = RetryPolicy {
            base_delay_ms: 99,
            ..RetryPolicy::default()
        };
        assert!(validate_retry_policy(&too_fast).is_err());

        let config = StoreConfig {
            retry_policy: Some(inverted),
            ..StoreConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn json_uses_documented_keys_and_defaults() {
        let config = StoreConfig::from_json_str(
            r#"{
                "path": "/srv/game/world.db",
                "enableWAL": false,
                "maxBackups": 4,
                "retryPolicy": { "maxAttempts": 5, "baseDelay": 200, "maxDelay": 800, "backoffMultiplier": 1.5 }
            }"#,
        )
        .expect("config parses");

        assert_eq!(config.path, "/srv/game/world.db");
        assert!(!config.enable_wal);
        assert!(config.enable_foreign_keys);
        assert_eq!(config.max_backups, 4);
        assert_eq!(config.connection_timeout_ms, 5_000);
        assert_eq!(config.effective_retry_policy().max_attempts, 5);
        assert_eq!(config.backup_directory(), PathBuf::from("/srv/game/backups"));
    }

    #[test]
    fn json_rejects_unknown_and_negative_values() {
        assert!(matches!(
            StoreConfig::from_json_str(r#"{ "path": "a.db", "turbo": true }"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            StoreConfig::from_json_str(r#"{ "path": "a.db", "maxBackups": -1 }"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            StoreConfig::from_json_str(r#"{ "path": "" }"#),
            Err(ConfigError::EmptyPath)
        ));
    }

    #[test]
    fn effective_policy_follows_retry_attempts_when_absent() {
        let config = StoreConfig {
            retry_attempts: 7,
            ..StoreConfig::default()
        };
        let policy = config.effective_retry_policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay_ms, 1_000);
    }

    #[test]
    fn only_path_changes_require_reconnect() {
        let current = StoreConfig::with_path("world.db");
        let tuned = StoreConfig {
            max_backups: 3,
            ..current.clone()
        };
        assert!(!current.requires_reconnect(&tuned));
        assert!(current.requires_reconnect(&StoreConfig::with_path("other.db")));
    }
}
