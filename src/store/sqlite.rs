//! SQLite backend. Each chunk runs inside one transaction; the per-attempt
//! deadline is enforced through SQLite's progress handler.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::{Batch, Connection, ErrorCode, OpenFlags, TransactionBehavior};
use tracing::{debug, warn};

use super::{ConnectionFactory, ErrorClass, StoreError, TargetConnection, default_classification};
use crate::statement::Statement;

// Virtual-machine instructions between deadline checks.
const PROGRESS_OPS: i32 = 1000;

pub struct SqliteFactory {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteFactory {
    pub fn new(path: &Path, busy_timeout: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            busy_timeout,
        }
    }
}

impl ConnectionFactory for SqliteFactory {
    fn connect(&self) -> Result<Box<dyn TargetConnection>, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        match conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        }) {
            Ok(mode) => debug!("sqlite journal_mode={mode}"),
            Err(err) => warn!("could not enable WAL on {}: {err}", self.path.display()),
        }
        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }

    fn classify(&self, err: &StoreError) -> ErrorClass {
        match err {
            StoreError::Statement {
                code: Some(code), ..
            } if code == "SQLITE_BUSY" || code == "SQLITE_LOCKED" => ErrorClass::Transient,
            other => default_classification(other),
        }
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

pub struct SqliteConnection {
    conn: Option<Connection>,
}

impl SqliteConnection {
    fn run_batch(
        conn: &mut Connection,
        batch: &[Statement],
        timeout: Duration,
    ) -> Result<u64, StoreError> {
        // Lock upgrades inside a deferred transaction bypass the busy handler.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| map_error(e, None, timeout))?;
        let mut rows = 0u64;
        for (idx, stmt) in batch.iter().enumerate() {
            // Every statement in the text runs, not only the first one.
            let mut statements = Batch::new(&tx, &stmt.text);
            while let Some(mut prepared) = statements
                .next()
                .map_err(|e| map_error(e, Some(idx), timeout))?
            {
                let changed = prepared
                    .execute([])
                    .map_err(|e| map_error(e, Some(idx), timeout))?;
                rows += changed as u64;
            }
        }
        tx.commit().map_err(|e| map_error(e, None, timeout))?;
        Ok(rows)
    }
}

impl TargetConnection for SqliteConnection {
    fn execute(&mut self, batch: &[Statement], timeout: Duration) -> Result<u64, StoreError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| StoreError::Connection("connection already closed".into()))?;

        let deadline = Instant::now() + timeout;
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = Self::run_batch(conn, batch, timeout);
        conn.progress_handler(0, None::<fn() -> bool>);
        result
    }

    fn health_check(&mut self) -> bool {
        match &self.conn {
            Some(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|v| v == 1)
                .unwrap_or(false),
            None => false,
        }
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                warn!("sqlite close failed: {err}");
            }
        }
    }
}

fn map_error(err: rusqlite::Error, index: Option<usize>, timeout: Duration) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::OperationInterrupted => StoreError::Timeout(timeout),
                ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure => {
                    StoreError::Connection(message)
                }
                ErrorCode::DatabaseBusy => StoreError::statement(Some("SQLITE_BUSY"), index, message),
                ErrorCode::DatabaseLocked => {
                    StoreError::statement(Some("SQLITE_LOCKED"), index, message)
                }
                ErrorCode::ConstraintViolation => {
                    StoreError::statement(Some("SQLITE_CONSTRAINT"), index, message)
                }
                other => StoreError::statement(Some(&format!("{other:?}")), index, message),
            }
        }
        _ => StoreError::statement(None, index, err.to_string()),
    }
}
