//! Failure taxonomy shared by every storage component.
//!
//! # Responsibility
//! - Define the error kinds, severities and the classified error surfaced to
//!   callers.
//! - Carry raw storage failures into classification without leaking their
//!   text to users.
//!
//! # Invariants
//! - `ClassifiedError` displays only the fixed per-kind template.
//! - Raw storage text lives only in `ErrorRecord::message` and log lines.

use crate::db::DbError;
use crate::value::SqlValue;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod classifier;
mod history;

pub use classifier::ErrorClassifier;
pub use history::{ErrorFilter, ErrorHistory, ErrorStats, ERROR_HISTORY_CAPACITY};

/// Storage failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectionLost,
    QueryFailed,
    SchemaMismatch,
    TransactionFailed,
    CorruptionDetected,
    BackupFailed,
    MigrationFailed,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        Self::ConnectionLost,
        Self::QueryFailed,
        Self::SchemaMismatch,
        Self::TransactionFailed,
        Self::CorruptionDetected,
        Self::BackupFailed,
        Self::MigrationFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::QueryFailed => "QUERY_FAILED",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::TransactionFailed => "TRANSACTION_FAILED",
            Self::CorruptionDetected => "CORRUPTION_DETECTED",
            Self::BackupFailed => "BACKUP_FAILED",
            Self::MigrationFailed => "MIGRATION_FAILED",
        }
    }

    /// Parses the wire label (`CONNECTION_LOST`, ...). Case-insensitive.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(label))
    }

    fn user_template(self) -> &'static str {
        match self {
            Self::ConnectionLost => {
                "The game database is temporarily unavailable. Please try again shortly."
            }
            Self::QueryFailed => "The requested game data could not be read or saved.",
            Self::SchemaMismatch => {
                "The game database layout does not match this version of the game."
            }
            Self::TransactionFailed => {
                "Your action could not be completed and no changes were saved."
            }
            Self::CorruptionDetected => "The game database appears to be damaged.",
            Self::BackupFailed => "The game database backup could not be created.",
            Self::MigrationFailed => "The game database could not be upgraded to this version.",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency level; ordering is `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity used when no message pattern overrides it.
    ///
    /// `None` stands for a kind label this build does not recognize.
    pub fn default_for(kind: Option<ErrorKind>) -> Self {
        match kind {
            Some(ErrorKind::CorruptionDetected) => Self::Critical,
            Some(ErrorKind::MigrationFailed | ErrorKind::BackupFailed) => Self::High,
            Some(ErrorKind::ConnectionLost | ErrorKind::TransactionFailed) => Self::Medium,
            Some(ErrorKind::QueryFailed | ErrorKind::SchemaMismatch) => Self::Low,
            None => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    fn escalation_clause(self) -> Option<&'static str> {
        match self {
            Self::Critical => Some("Please contact support immediately."),
            Self::High => Some("Please contact an administrator."),
            Self::Medium | Self::Low => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed user-facing text for `kind` at `severity`.
pub fn user_message(kind: ErrorKind, severity: Severity) -> String {
    match severity.escalation_clause() {
        Some(clause) => format!("{} {clause}", kind.user_template()),
        None => kind.user_template().to_string(),
    }
}

/// Raw failure as reported by the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFailure {
    /// Structured SQLite result code, when the engine supplied one.
    pub code: Option<rusqlite::ErrorCode>,
    pub message: String,
}

impl RawFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: rusqlite::ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl From<&rusqlite::Error> for RawFailure {
    fn from(value: &rusqlite::Error) -> Self {
        Self {
            code: value.sqlite_error_code(),
            message: value.to_string(),
        }
    }
}

impl From<&DbError> for RawFailure {
    fn from(value: &DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::new(other.to_string()),
        }
    }
}

impl From<&std::io::Error> for RawFailure {
    fn from(value: &std::io::Error) -> Self {
        Self::new(format!("I/O error: {value}"))
    }
}

/// What the failing caller was doing.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    pub statement: Option<String>,
    pub params: Option<Vec<SqlValue>>,
    pub retry_count: u32,
    /// Lower bound applied after severity derivation.
    pub min_severity: Option<Severity>,
}

impl ErrorContext {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            statement: None,
            params: None,
            retry_count: 0,
            min_severity: None,
        }
    }

    pub fn with_statement(mut self, statement: &str, params: &[SqlValue]) -> Self {
        self.statement = Some(statement.to_string());
        self.params = Some(params.to_vec());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }
}

/// One classified failure kept in the bounded history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: String,
    /// Epoch ms.
    pub timestamp: i64,
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Underlying engine message; never shown to players.
    pub message: String,
    pub statement: Option<String>,
    pub params: Option<Vec<SqlValue>>,
    pub resolved: bool,
    pub retry_count: u32,
}

/// The only error type returned across the store API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub user_message: String,
    /// Id of the matching `ErrorRecord`.
    pub error_id: String,
}

impl ClassifiedError {
    /// HIGH and CRITICAL failures always reach the caller.
    pub fn must_surface(&self) -> bool {
        self.severity >= Severity::High
    }
}

impl Display for ClassifiedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message)
    }
}

impl Error for ClassifiedError {}

#[cfg(test)]
mod tests {
    use super::{user_message, ErrorKind, Severity};

    #[test]
    fn default_severity_follows_kind() {
        assert_eq!(
            Severity::default_for(Some(ErrorKind::CorruptionDetected)),
            Severity::Critical
        );
        assert_eq!(
            Severity::default_for(Some(ErrorKind::MigrationFailed)),
            Severity::High
        );
        assert_eq!(
            Severity::default_for(Some(ErrorKind::BackupFailed)),
            Severity::High
        );
        assert_eq!(
            Severity::default_for(Some(ErrorKind::ConnectionLost)),
            Severity::Medium
        );
        assert_eq!(
            Severity::default_for(Some(ErrorKind::TransactionFailed)),
            Severity::Medium
        );
        assert_eq!(
            Severity::default_for(Some(ErrorKind::QueryFailed)),
            Severity::Low
        );
        assert_eq!(
            Severity::default_for(Some(ErrorKind::SchemaMismatch)),
            Severity::Low
        );
        assert_eq!(Severity::default_for(ErrorKind::parse("WORMHOLE")), Severity::Medium);
    }

    #[test]
    fn kind_labels_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(
            ErrorKind::parse(" backup_failed "),
            Some(ErrorKind::BackupFailed)
        );
    }

    #[test]
    fn escalation_clause_depends_on_severity() {
        let critical = user_message(ErrorKind::CorruptionDetected, Severity::Critical);
        assert!(critical.ends_with("Please contact support immediately."));
        let high = user_message(ErrorKind::BackupFailed, Severity::High);
        assert!(high.ends_with("Please contact an administrator."));
        let low = user_message(ErrorKind::QueryFailed, Severity::Low);
        assert!(!low.contains("contact"));
    }
}
