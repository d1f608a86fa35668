//! # Target store
//!
//! The narrow capability surface the loader needs from a backend driver.
//! Everything above this module is agnostic to which relational store sits
//! behind it.

pub mod sqlite;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::statement::Statement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorClass {
    /// Infrastructure trouble; worth retrying on a fresh connection.
    Transient,
    /// Data or syntax trouble; retrying cannot help.
    Permanent,
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("{}", describe_statement_error(.code, .index, .message))]
    Statement {
        /// Backend error code, when the driver exposes one.
        code: Option<String>,
        /// Position of the offending statement inside the executed batch.
        index: Option<usize>,
        message: String,
    },
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
}

fn describe_statement_error(
    code: &Option<String>,
    index: &Option<usize>,
    message: &str,
) -> String {
    match (code, index) {
        (Some(code), Some(index)) => format!("statement {index} failed ({code}): {message}"),
        (Some(code), None) => format!("statement failed ({code}): {message}"),
        (None, Some(index)) => format!("statement {index} failed: {message}"),
        (None, None) => format!("statement failed: {message}"),
    }
}

impl StoreError {
    pub fn statement(code: Option<&str>, index: Option<usize>, message: impl Into<String>) -> Self {
        StoreError::Statement {
            code: code.map(str::to_string),
            index,
            message: message.into(),
        }
    }

    /// The connection may be mid-transaction or dead after this error.
    pub fn leaves_connection_unknown(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }

    pub fn statement_index(&self) -> Option<usize> {
        match self {
            StoreError::Statement { index, .. } => *index,
            _ => None,
        }
    }
}

/// Fallback classification: connection loss and timeouts are transient,
/// anything the backend did not recognise fails fast.
pub fn default_classification(err: &StoreError) -> ErrorClass {
    match err {
        StoreError::Connection(_) | StoreError::Timeout(_) => ErrorClass::Transient,
        StoreError::Statement { .. } => ErrorClass::Permanent,
    }
}

/// A live connection to the target store.
pub trait TargetConnection: Send {
    /// Execute `batch` in order as one best-effort unit and return the number
    /// of affected rows. Must give up once `timeout` has elapsed.
    fn execute(&mut self, batch: &[Statement], timeout: Duration) -> Result<u64, StoreError>;

    /// Cheap liveness check.
    fn health_check(&mut self) -> bool;

    fn close(&mut self) {}
}

/// Opens connections and knows how to read the backend's errors.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn TargetConnection>, StoreError>;

    fn classify(&self, err: &StoreError) -> ErrorClass {
        default_classification(err)
    }

    fn describe(&self) -> String {
        "target".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_classification_fails_fast_on_statements() {
        assert_eq!(
            default_classification(&StoreError::Connection("reset".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            default_classification(&StoreError::Timeout(Duration::from_secs(1))),
            ErrorClass::Transient
        );
        assert_eq!(
            default_classification(&StoreError::statement(Some("23505"), Some(2), "duplicate")),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn statement_error_message_mentions_code_and_index() {
        let err = StoreError::statement(Some("SQLITE_CONSTRAINT"), Some(3), "UNIQUE failed");
        assert_eq!(
            err.to_string(),
            "statement 3 failed (SQLITE_CONSTRAINT): UNIQUE failed"
        );
        assert_eq!(err.statement_index(), Some(3));
        assert!(!err.leaves_connection_unknown());
    }
}
