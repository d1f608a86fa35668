//! # Schema inference boundary
//!
//! Creating the target table is delegated to an outside service: it gets
//! a small sample of statements and answers with a create-table statement
//! and a confidence score. This module builds the request, defines the
//! response, and applies an accepted response to the target. It does not
//! retry or validate the service call.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::encoding::EncodingDetector;
use crate::extract::{ExtractError, StatementExtractor};
use crate::pipeline::ImportOptions;
use crate::pool::{ConnectionPool, PoolError, PoolOptions};
use crate::sanitize::Sanitized;
use crate::source::{DumpSource, read_prefix};
use crate::statement::{QuoteState, Statement, scan_line};
use crate::store::{ConnectionFactory, StoreError};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("schema response has no create-table statement")]
    Empty,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the inference service is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRequest {
    pub table_name: String,
    pub sample_statements: Vec<String>,
    pub estimated_rows: u64,
    pub encoding: String,
}

/// What the inference service answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub create_table: String,
    pub confidence: f32,
}

pub trait SchemaInference {
    fn infer(&self, request: &SchemaRequest) -> Result<SchemaResponse, SchemaError>;
}

/// A hand-written DDL file standing in for the service.
#[derive(Debug, Clone)]
pub struct StaticSchema {
    ddl: String,
}

impl StaticSchema {
    pub fn new(ddl: impl Into<String>) -> Self {
        Self { ddl: ddl.into() }
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let ddl = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(ddl))
    }
}

impl SchemaInference for StaticSchema {
    fn infer(&self, _request: &SchemaRequest) -> Result<SchemaResponse, SchemaError> {
        if self.ddl.trim().is_empty() {
            return Err(SchemaError::Empty);
        }
        Ok(SchemaResponse {
            create_table: self.ddl.clone(),
            confidence: 1.0,
        })
    }
}

/// Build a request from the first `sample_size` statements that survive
/// sanitisation.
pub fn collect_sample(
    source: Arc<dyn DumpSource>,
    opts: &ImportOptions,
    sample_size: usize,
) -> Result<SchemaRequest, ExtractError> {
    let prefix = read_prefix(source.as_ref(), opts.encoding_sample_bytes)?;
    let guess = EncodingDetector::new(opts.candidates.clone()).detect(&prefix);
    let mut extractor =
        StatementExtractor::new(source, &guess, opts.extract, opts.sanitizer.clone(), None)?;

    let mut sample_statements = Vec::with_capacity(sample_size);
    while sample_statements.len() < sample_size {
        let Some(item) = extractor.next() else {
            break;
        };
        if let Sanitized::Kept(stmt) = opts.sanitizer.clean(item?) {
            sample_statements.push(stmt.text);
        }
    }

    Ok(SchemaRequest {
        table_name: extractor.table_name(),
        sample_statements,
        estimated_rows: extractor.estimated_statements(),
        encoding: extractor.encoding().name().to_string(),
    })
}

/// Split DDL text into statements on unquoted terminators.
pub fn split_statements(ddl: &str) -> Vec<Statement> {
    let mut out = Vec::new();
    let mut acc = String::new();
    let mut state = QuoteState::Outside;
    let mut first_line = 1u64;

    for (idx, line) in ddl.lines().enumerate() {
        let line_no = idx as u64 + 1;
        if acc.is_empty() {
            if line.trim().is_empty() || line.trim_start().starts_with("--") {
                continue;
            }
            first_line = line_no;
        }
        let scan = scan_line(line, state, false);
        state = scan.end_state;
        if !acc.is_empty() {
            acc.push('\n');
        }
        acc.push_str(&scan.text);
        if scan.terminated {
            out.push(Statement::new(std::mem::take(&mut acc), first_line, line_no));
            state = QuoteState::Outside;
        }
    }
    if !acc.trim().is_empty() {
        let last = ddl.lines().count() as u64;
        out.push(Statement::new(acc, first_line, last));
    }
    out
}

/// Execute an accepted create-table response against the target.
pub fn apply_schema(
    factory: Arc<dyn ConnectionFactory>,
    response: &SchemaResponse,
    timeout: Duration,
) -> Result<u64, SchemaError> {
    let statements = split_statements(&response.create_table);
    if statements.is_empty() {
        return Err(SchemaError::Empty);
    }
    let pool = ConnectionPool::new(
        factory,
        PoolOptions {
            size: 1,
            ..PoolOptions::default()
        },
    );
    let mut lease = pool.acquire()?;
    let result = lease.execute(&statements, timeout);
    drop(lease);
    pool.close_all();
    let rows = result?;
    info!(
        "applied {} schema statement(s) confidence={:.2}",
        statements.len(),
        response.confidence
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawSource;
    use crate::store::sqlite::SqliteFactory;

    #[test]
    fn sample_skips_dropped_statements() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("patients.sql");
        std::fs::write(
            &path,
            "SET DEFINE OFF;\nINSERT INTO HIS.PATIENT VALUES (1, '张三');\nINSERT INTO HIS.PATIENT VALUES (2, '李四');\nINSERT INTO HIS.PATIENT VALUES (3, '王五');\n",
        )
        .expect("write");
        let source: Arc<dyn DumpSource> = Arc::new(RawSource::open(&path).expect("open"));

        let request = collect_sample(source, &ImportOptions::default(), 2).expect("sample");
        assert_eq!(request.table_name, "PATIENT");
        assert_eq!(
            request.sample_statements,
            vec![
                "INSERT INTO PATIENT VALUES (1, '张三');",
                "INSERT INTO PATIENT VALUES (2, '李四');",
            ]
        );
        assert_eq!(request.encoding, "UTF-8");
        assert!(request.estimated_rows >= 3);

        let json = serde_json::to_string(&request).expect("json");
        let back: SchemaRequest = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, request);
    }

    #[test]
    fn ddl_is_split_on_unquoted_terminators() {
        let ddl = "-- patients\nCREATE TABLE P (\n  ID INTEGER,\n  NOTE TEXT DEFAULT 'a;b'\n);\nCREATE INDEX P_ID ON P (ID);\n";
        let statements = split_statements(ddl);
        assert_eq!(statements.len(), 2);
        assert_eq!((statements[0].first_line, statements[0].last_line), (2, 5));
        assert!(statements[1].text.starts_with("CREATE INDEX"));
    }

    #[test]
    fn static_schema_is_applied_to_sqlite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = Arc::new(SqliteFactory::new(
            &dir.path().join("target.db"),
            Duration::from_secs(5),
        ));
        let schema = StaticSchema::new("CREATE TABLE PATIENT (ID INTEGER PRIMARY KEY, NAME TEXT);");
        let request = SchemaRequest {
            table_name: "PATIENT".into(),
            sample_statements: Vec::new(),
            estimated_rows: 0,
            encoding: "UTF-8".into(),
        };
        let response = schema.infer(&request).expect("infer");
        apply_schema(factory.clone(), &response, Duration::from_secs(5)).expect("apply");

        let mut conn = factory.connect().expect("connect");
        let rows = conn
            .execute(
                &[Statement::new("INSERT INTO PATIENT VALUES (1, 'x');", 1, 1)],
                Duration::from_secs(5),
            )
            .expect("insert into created table");
        assert_eq!(rows, 1);
    }

    #[test]
    fn empty_ddl_is_rejected() {
        assert!(matches!(
            StaticSchema::new("  ").infer(&SchemaRequest {
                table_name: "T".into(),
                sample_statements: Vec::new(),
                estimated_rows: 0,
                encoding: "UTF-8".into(),
            }),
            Err(SchemaError::Empty)
        ));
    }
}
