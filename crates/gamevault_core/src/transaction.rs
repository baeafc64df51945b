//! All-or-nothing execution of ordered write steps.
//!
//! # Invariants
//! - Steps run in order inside one IMMEDIATE transaction on the supervised
//!   connection; the first failure rolls every prior step back.
//! - A rolled-back transaction is never retried here; the caller decides.

use crate::connection::ConnectionSupervisor;
use crate::error::{ClassifiedError, ErrorContext, ErrorKind, RawFailure};
use crate::value::SqlValue;
use log::{error, info, warn};
use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use std::sync::Arc;
use std::time::Instant;

/// One statement of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStep {
    pub statement: String,
    pub params: Vec<SqlValue>,
}

impl WriteStep {
    pub fn new(statement: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            statement: statement.into(),
            params,
        }
    }
}

struct StepFailure {
    /// `None` when BEGIN or COMMIT failed.
    step: Option<usize>,
    error: rusqlite::Error,
}

/// Borrows the supervisor for the duration of one transaction.
pub struct TransactionRunner<'a> {
    supervisor: &'a mut ConnectionSupervisor,
}

impl<'a> TransactionRunner<'a> {
    pub fn new(supervisor: &'a mut ConnectionSupervisor) -> Self {
        Self { supervisor }
    }

    /// Executes `steps` atomically and returns the total affected rows.
    ///
    /// # Errors
    /// TRANSACTION_FAILED (or a content-derived kind such as
    /// CORRUPTION_DETECTED) after rollback; CONNECTION_LOST when the store
    /// is not connected.
    pub fn run(&mut self, steps: &[WriteStep]) -> Result<usize, ClassifiedError> {
        let context = ErrorContext::new(ErrorKind::TransactionFailed);
        let classifier = Arc::clone(self.supervisor.classifier());
        let metrics = Arc::clone(self.supervisor.metrics());
        let started_at = Instant::now();

        let outcome = {
            let conn = self.supervisor.connection_for(&context)?;
            execute_steps(conn, steps)
        };

        match outcome {
            Ok(affected) => {
                metrics.record(started_at.elapsed(), true);
                info!(
                    "event=transaction module=transaction status=ok steps={} affected={affected}",
                    steps.len()
                );
                Ok(affected)
            }
            Err(failure) => {
                metrics.record(started_at.elapsed(), false);
                let context = match failure.step.and_then(|index| steps.get(index)) {
                    Some(step) => context.with_statement(&step.statement, &step.params),
                    None => context,
                };
                let classified = classifier.classify(&RawFailure::from(&failure.error), context);
                warn!(
                    "event=transaction module=transaction status=rolled_back steps={} failed_step={} error_id={}",
                    steps.len(),
                    failure.step.map_or(-1, |index| index as i64 + 1),
                    classified.error_id
                );
                if classified.retryable {
                    self.supervisor.recover_if_lost();
                }
                Err(classified)
            }
        }
    }
}

fn execute_steps(conn: &mut Connection, steps: &[WriteStep]) -> Result<usize, StepFailure> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|error| StepFailure { step: None, error })?;

    let mut affected = 0;
    for (index, step) in steps.iter().enumerate() {
        match tx.execute(&step.statement, params_from_iter(step.params.iter())) {
            Ok(rows) => affected += rows,
            Err(error) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!("event=transaction_rollback module=transaction status=error error={rollback_err}");
                }
                return Err(StepFailure {
                    step: Some(index),
                    error,
                });
            }
        }
    }

    tx.commit()
        .map_err(|error| StepFailure { step: None, error })?;
    Ok(affected)
}
