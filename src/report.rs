//! Per-chunk results and the run-level summary they fold into.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;

use crate::constants::STATEMENT_PREVIEW_CHARS;
use crate::statement::preview;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Cancelled | RunPhase::Failed
        )
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            RunPhase::Pending => 0,
            RunPhase::Running => 1,
            RunPhase::Completed => 2,
            RunPhase::Cancelled => 3,
            RunPhase::Failed => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => RunPhase::Running,
            2 => RunPhase::Completed,
            3 => RunPhase::Cancelled,
            4 => RunPhase::Failed,
            _ => RunPhase::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The stream could not be read; fatal for the run.
    Decode,
    TransientExecution,
    PermanentExecution,
    PoolExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkError {
    pub kind: ErrorKind,
    pub message: String,
    /// Preview of the first offending statement, when known.
    pub statement: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResult {
    pub chunk_id: u64,
    pub success: bool,
    pub rows_affected: u64,
    pub error: Option<ChunkError>,
    pub elapsed: Duration,
    pub attempts: u32,
    pub statements: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub phase: RunPhase,
    pub success: bool,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub failed_chunks: u64,
    /// Chunks never executed because cancellation was observed first.
    pub skipped_chunks: u64,
    pub total_rows: u64,
    pub statements_extracted: u64,
    pub statements_dropped: u64,
    pub elapsed: Duration,
    /// Distinct errors, at most `max_error_messages` of them.
    pub errors: Vec<ChunkError>,
    /// Errors not listed because they were duplicates or over the cap.
    pub suppressed_errors: u64,
    pub encoding: Option<String>,
    pub table_name: Option<String>,
}

impl ImportResult {
    /// A run that ended before any chunk was dispatched.
    pub fn fatal(kind: ErrorKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            phase: RunPhase::Failed,
            success: false,
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            skipped_chunks: 0,
            total_rows: 0,
            statements_extracted: 0,
            statements_dropped: 0,
            elapsed,
            errors: vec![ChunkError {
                kind,
                message: message.into(),
                statement: None,
            }],
            suppressed_errors: 0,
            encoding: None,
            table_name: None,
        }
    }
}

/// Folds chunk results into an [`ImportResult`].
///
/// Errors are de-duplicated on kind plus offending statement (or message
/// when no statement is known) and capped.
pub struct ImportAggregator {
    max_errors: usize,
    completed: u64,
    failed: u64,
    skipped: u64,
    rows: u64,
    errors: Vec<ChunkError>,
    seen: HashSet<(ErrorKind, String)>,
    suppressed: u64,
    fatal: Option<ChunkError>,
}

impl ImportAggregator {
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            completed: 0,
            failed: 0,
            skipped: 0,
            rows: 0,
            errors: Vec::new(),
            seen: HashSet::new(),
            suppressed: 0,
            fatal: None,
        }
    }

    pub fn record(&mut self, result: ChunkResult) {
        if result.success {
            self.completed += 1;
            self.rows += result.rows_affected;
        } else {
            self.failed += 1;
        }
        if let Some(err) = result.error {
            self.push_error(err);
        }
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Record an error that ends the run.
    pub fn record_fatal(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let err = ChunkError {
            kind,
            message: message.into(),
            statement: None,
        };
        self.fatal = Some(err.clone());
        self.push_error(err);
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn push_error(&mut self, err: ChunkError) {
        let key = match &err.statement {
            Some(stmt) => preview(stmt, STATEMENT_PREVIEW_CHARS),
            None => err.message.clone(),
        };
        if !self.seen.insert((err.kind, key)) || self.errors.len() >= self.max_errors {
            self.suppressed += 1;
            return;
        }
        self.errors.push(err);
    }

    pub fn finish(
        self,
        phase: RunPhase,
        statements_extracted: u64,
        statements_dropped: u64,
        elapsed: Duration,
    ) -> ImportResult {
        ImportResult {
            phase,
            success: phase == RunPhase::Completed && self.failed == 0 && self.fatal.is_none(),
            total_chunks: self.completed + self.failed,
            completed_chunks: self.completed,
            failed_chunks: self.failed,
            skipped_chunks: self.skipped,
            total_rows: self.rows,
            statements_extracted,
            statements_dropped,
            elapsed,
            errors: self.errors,
            suppressed_errors: self.suppressed,
            encoding: None,
            table_name: None,
        }
    }
}
