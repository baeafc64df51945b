//! Failure classification and severity escalation.
//!
//! # Responsibility
//! - Turn a raw storage failure into kind, severity, retryability and the
//!   fixed user message.
//! - Record every classification in the owned bounded history and log it at
//!   the level matching its severity.
//!
//! # Invariants
//! - Message-pattern overrides beat kind defaults; overrides only raise.
//! - `CORRUPTION_DETECTED` is always CRITICAL and never retryable.

use super::history::{ErrorFilter, ErrorHistory, ErrorStats, ERROR_HISTORY_CAPACITY};
use super::{
    user_message, ClassifiedError, ErrorContext, ErrorKind, ErrorRecord, RawFailure, Severity,
};
use crate::clock::now_epoch_ms;
use crate::logging::{sanitize_message, MAX_LOGGED_ERROR_CHARS};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::ErrorCode;
use uuid::Uuid;

static TRANSIENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(locked|lock contention|busy|i/o error|temporary failure|temporarily unavailable|connection lost)")
        .expect("valid transient regex")
});
static CORRUPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(corrupt|malformed)").expect("valid corruption regex"));
static DISK_FULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(disk full|no space)").expect("valid disk full regex"));

/// Classifies failures and owns the error history they produce.
pub struct ErrorClassifier {
    history: Mutex<ErrorHistory>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::with_capacity(ERROR_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: Mutex::new(ErrorHistory::new(capacity)),
        }
    }

    /// Classifies `raw`, appends an `ErrorRecord` and logs it.
    pub fn classify(&self, raw: &RawFailure, context: ErrorContext) -> ClassifiedError {
        let kind = refine_kind(context.kind, raw);
        let mut severity = derive_severity(kind, raw);
        if let Some(floor) = context.min_severity {
            severity = severity.max(floor);
        }
        let retryable = kind != ErrorKind::CorruptionDetected && is_transient(raw);
        let timestamp = now_epoch_ms();
        let id = new_error_id(timestamp);

        log_classified(&id, kind, severity, retryable, context.retry_count, raw);

        self.history.lock().push(ErrorRecord {
            id: id.clone(),
            timestamp,
            kind,
            severity,
            message: raw.message.clone(),
            statement: context.statement,
            params: context.params,
            resolved: false,
            retry_count: context.retry_count,
        });

        ClassifiedError {
            kind,
            severity,
            retryable,
            user_message: user_message(kind, severity),
            error_id: id,
        }
    }

    /// History records matching `filter`, newest first.
    pub fn history(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        self.history.lock().query(filter)
    }

    pub fn mark_resolved(&self, error_id: &str) -> bool {
        self.history.lock().mark_resolved(error_id)
    }

    /// Operator action: drops every record. Returns how many were removed.
    pub fn clear_history(&self) -> usize {
        let removed = self.history.lock().clear();
        info!("event=error_history_cleared module=error status=ok removed={removed}");
        removed
    }

    pub fn stats(&self) -> ErrorStats {
        self.history.lock().stats()
    }
}

/// Whether `raw` carries a transient-failure signature.
pub(crate) fn is_transient(raw: &RawFailure) -> bool {
    let transient_code = matches!(
        raw.code,
        Some(
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
        )
    );
    transient_code || TRANSIENT_RE.is_match(&raw.message)
}

fn is_corruption(raw: &RawFailure) -> bool {
    matches!(
        raw.code,
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    ) || CORRUPTION_RE.is_match(&raw.message)
}

fn is_disk_full(raw: &RawFailure) -> bool {
    matches!(raw.code, Some(ErrorCode::DiskFull)) || DISK_FULL_RE.is_match(&raw.message)
}

fn refine_kind(kind: ErrorKind, raw: &RawFailure) -> ErrorKind {
    if is_corruption(raw) {
        ErrorKind::CorruptionDetected
    } else {
        kind
    }
}

fn derive_severity(kind: ErrorKind, raw: &RawFailure) -> Severity {
    if is_corruption(raw) || is_disk_full(raw) {
        return Severity::Critical;
    }
    Severity::default_for(Some(kind))
}

fn new_error_id(timestamp: i64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("err_{timestamp}_{}", &random[..8])
}

fn log_classified(
    id: &str,
    kind: ErrorKind,
    severity: Severity,
    retryable: bool,
    retry_count: u32,
    raw: &RawFailure,
) {
    let message = sanitize_message(&raw.message, MAX_LOGGED_ERROR_CHARS);
    match severity {
        Severity::Critical | Severity::High => error!(
            "event=error_classified module=error status=error id={id} kind={kind} severity={severity} retryable={retryable} retry_count={retry_count} message={message}"
        ),
        Severity::Medium => warn!(
            "event=error_classified module=error status=warn id={id} kind={kind} severity={severity} retryable={retryable} retry_count={retry_count} message={message}"
        ),
        Severity::Low => info!(
            "event=error_classified module=error status=info id={id} kind={kind} severity={severity} retryable={retryable} retry_count={retry_count} message={message}"
        ),
    }
}
