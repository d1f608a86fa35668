//! Shared test infrastructure for import tests.
//!
//! `MemoryFactory` is a scripted in-memory target: it records every batch
//! that commits, tracks how many batches run at once, and fails batches
//! matching a rule as many times as the rule allows.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bulkload::chunk::ChunkLimits;
use bulkload::pipeline::{ImportOptions, RetryPolicy};
use bulkload::pool::PoolOptions;
use bulkload::source::{DumpSource, RawSource};
use bulkload::statement::Statement;
use bulkload::store::{ConnectionFactory, StoreError, TargetConnection};

// ============================================================================
// Scripted target
// ============================================================================

struct FailureRule {
    needle: String,
    error: StoreError,
    remaining: usize,
    hits: usize,
}

#[derive(Default)]
pub struct MemoryTarget {
    batches: Mutex<Vec<Vec<String>>>,
    rules: Mutex<Vec<FailureRule>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    connects: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MemoryTarget {
    /// Committed batches, in commit order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().expect("batches").clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// How many times the rule for `needle` has fired.
    pub fn failures_for(&self, needle: &str) -> usize {
        self.rules
            .lock()
            .expect("rules")
            .iter()
            .filter(|rule| rule.needle == needle)
            .map(|rule| rule.hits)
            .sum()
    }

    fn run(&self, batch: &[Statement]) -> Result<u64, StoreError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("delay");
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let failure = {
            let mut rules = self.rules.lock().expect("rules");
            rules.iter_mut().find_map(|rule| {
                let index = batch.iter().position(|s| s.text.contains(&rule.needle))?;
                if rule.remaining == 0 {
                    return None;
                }
                rule.remaining -= 1;
                rule.hits += 1;
                Some(match &rule.error {
                    StoreError::Statement { code, message, .. } => StoreError::Statement {
                        code: code.clone(),
                        index: Some(index),
                        message: message.clone(),
                    },
                    other => other.clone(),
                })
            })
        };

        let result = match failure {
            Some(err) => Err(err),
            None => {
                self.batches
                    .lock()
                    .expect("batches")
                    .push(batch.iter().map(|s| s.text.clone()).collect());
                Ok(batch.len() as u64)
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct MemoryFactory {
    pub target: Arc<MemoryTarget>,
}

impl MemoryFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            target: Arc::new(MemoryTarget::default()),
        })
    }

    /// Every batch takes at least `delay` to execute.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let factory = Self::new();
        *factory.target.delay.lock().expect("delay") = delay;
        factory
    }

    /// Fail batches containing `needle` with `error`, at most `times` times.
    pub fn fail_when_contains(&self, needle: &str, error: StoreError, times: usize) {
        self.target.rules.lock().expect("rules").push(FailureRule {
            needle: needle.to_string(),
            error,
            remaining: times,
            hits: 0,
        });
    }
}

struct MemoryConnection {
    target: Arc<MemoryTarget>,
}

impl TargetConnection for MemoryConnection {
    fn execute(&mut self, batch: &[Statement], _timeout: Duration) -> Result<u64, StoreError> {
        self.target.run(batch)
    }

    fn health_check(&mut self) -> bool {
        true
    }
}

impl ConnectionFactory for MemoryFactory {
    fn connect(&self) -> Result<Box<dyn TargetConnection>, StoreError> {
        self.target.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            target: self.target.clone(),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Dump and option helpers
// ============================================================================

pub fn write_dump(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write dump");
    path
}

pub fn open_source(path: &Path) -> Arc<dyn DumpSource> {
    Arc::new(RawSource::open(path).expect("open dump"))
}

/// `count` single-row inserts into `EMP`, one per line, ids from 1.
pub fn emp_inserts(count: usize) -> String {
    (1..=count)
        .map(|id| format!("INSERT INTO EMP (ID) VALUES ({id});\n"))
        .collect()
}

/// Options with small, fast retries suitable for tests.
pub fn options(workers: usize, pool_size: usize, statements_per_chunk: usize) -> ImportOptions {
    ImportOptions {
        max_workers: workers,
        pool: PoolOptions {
            size: pool_size,
            acquire_timeout: Duration::from_secs(10),
            ..PoolOptions::default()
        },
        chunk_limits: ChunkLimits::new(statements_per_chunk, 1024 * 1024),
        retry: RetryPolicy {
            retry_count: 3,
            backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        execute_timeout: Duration::from_secs(5),
        ..ImportOptions::default()
    }
}

/// Numeric id from `... VALUES (n);`.
pub fn id_of(statement: &str) -> u64 {
    let start = statement.rfind('(').expect("open paren") + 1;
    let end = statement.rfind(')').expect("close paren");
    statement[start..end].trim().parse().expect("numeric id")
}
