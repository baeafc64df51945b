//! Bounded in-memory error history.

use super::{ErrorKind, ErrorRecord, Severity};
use serde::Serialize;
use std::collections::VecDeque;

pub const ERROR_HISTORY_CAPACITY: usize = 100;

/// Selection applied by `ErrorHistory::query`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFilter {
    pub kind: Option<ErrorKind>,
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    pub limit: Option<usize>,
}

/// Aggregate counts over the retained records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorStats {
    pub total: usize,
    pub unresolved: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

/// Ring buffer of classified failures; evicts the oldest record when full.
#[derive(Debug)]
pub struct ErrorHistory {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: ErrorRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Matching records, newest first.
    pub fn query(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        self.records
            .iter()
            .rev()
            .filter(|record| filter.kind.map_or(true, |kind| record.kind == kind))
            .filter(|record| {
                filter
                    .severity
                    .map_or(true, |severity| record.severity == severity)
            })
            .filter(|record| {
                filter
                    .resolved
                    .map_or(true, |resolved| record.resolved == resolved)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Flags the record as acknowledged. `false` when the id is unknown.
    pub fn mark_resolved(&mut self, error_id: &str) -> bool {
        match self.records.iter_mut().find(|record| record.id == error_id) {
            Some(record) => {
                record.resolved = true;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        removed
    }

    pub fn stats(&self) -> ErrorStats {
        let mut stats = ErrorStats {
            total: self.records.len(),
            ..ErrorStats::default()
        };
        for record in &self.records {
            if !record.resolved {
                stats.unresolved += 1;
            }
            match record.severity {
                Severity::Low => stats.low += 1,
                Severity::Medium => stats.medium += 1,
                Severity::High => stats.high += 1,
                Severity::Critical => stats.critical += 1,
            }
        }
        stats
    }
}
