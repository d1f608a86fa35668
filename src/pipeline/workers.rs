//! # Pipeline Workers
//!
//! Chunk execution threads and the collector that folds their results.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::constants::STATEMENT_PREVIEW_CHARS;
use crate::pool::{ConnectionPool, PoolError};
use crate::report::{ChunkError, ChunkResult, ErrorKind, ImportAggregator};
use crate::store::ErrorClass;

use super::events::{ExecutionProgress, ProgressEvent, ProgressSink};
use super::{RetryPolicy, RunState};

const CANCEL_POLL: Duration = Duration::from_millis(20);

/// A chunk handed to the worker set.
pub struct ChunkJob {
    pub chunk: Chunk,
}

pub enum ChunkOutcome {
    Finished(ChunkResult),
    /// Dequeued after cancellation; never executed.
    Skipped { chunk_id: u64, statements: usize },
}

/// Spawn `workers` threads executing chunks from `rx`.
pub fn spawn_chunk_workers(
    workers: usize,
    rx: Receiver<ChunkJob>,
    result_tx: Sender<ChunkOutcome>,
    pool: ConnectionPool,
    retry: RetryPolicy,
    execute_timeout: Duration,
    state: Arc<RunState>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();
    let worker_count = workers.max(1);

    for worker in 0..worker_count {
        let rx = rx.clone();
        let result_tx = result_tx.clone();
        let pool = pool.clone();
        let state = state.clone();

        handles.push(thread::spawn(move || {
            for job in rx {
                let outcome = if state.is_cancelled() {
                    debug!("worker {worker} skipping chunk {} after cancel", job.chunk.id);
                    ChunkOutcome::Skipped {
                        chunk_id: job.chunk.id,
                        statements: job.chunk.len(),
                    }
                } else {
                    ChunkOutcome::Finished(execute_chunk(
                        &job.chunk,
                        &pool,
                        &retry,
                        execute_timeout,
                        &state,
                    ))
                };
                if result_tx.send(outcome).is_err() {
                    warn!("worker {worker}: result collector is gone");
                    break;
                }
            }
        }));
    }

    handles
}

/// Execute one chunk with retries.
///
/// Transient failures invalidate the connection and try again on a fresh
/// one after a backoff; permanent failures end the chunk immediately.
/// A cancelled run gets no further attempts, and a pending backoff is cut
/// short.
pub fn execute_chunk(
    chunk: &Chunk,
    pool: &ConnectionPool,
    retry: &RetryPolicy,
    execute_timeout: Duration,
    state: &RunState,
) -> ChunkResult {
    let started = Instant::now();
    let max_attempts = retry.max_attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let (error, retryable) = match pool.acquire() {
            Ok(mut lease) => match lease.execute(&chunk.statements, execute_timeout) {
                Ok(rows) => {
                    lease.release();
                    return ChunkResult {
                        chunk_id: chunk.id,
                        success: true,
                        rows_affected: rows,
                        error: None,
                        elapsed: started.elapsed(),
                        attempts: attempt,
                        statements: chunk.len(),
                    };
                }
                Err(err) => {
                    let class = pool.factory().classify(&err);
                    if class == ErrorClass::Transient || err.leaves_connection_unknown() {
                        lease.invalidate();
                    } else {
                        lease.release();
                    }
                    let statement = err
                        .statement_index()
                        .and_then(|idx| chunk.statements.get(idx))
                        .map(|stmt| stmt.preview(STATEMENT_PREVIEW_CHARS));
                    let kind = match class {
                        ErrorClass::Transient => ErrorKind::TransientExecution,
                        ErrorClass::Permanent => ErrorKind::PermanentExecution,
                    };
                    (
                        ChunkError {
                            kind,
                            message: err.to_string(),
                            statement,
                        },
                        class == ErrorClass::Transient,
                    )
                }
            },
            Err(err @ PoolError::Exhausted(_)) => (
                ChunkError {
                    kind: ErrorKind::PoolExhausted,
                    message: err.to_string(),
                    statement: None,
                },
                true,
            ),
            Err(err @ PoolError::Connect(_)) => (
                ChunkError {
                    kind: ErrorKind::TransientExecution,
                    message: err.to_string(),
                    statement: None,
                },
                true,
            ),
            Err(err @ PoolError::Closed) => (
                ChunkError {
                    kind: ErrorKind::PermanentExecution,
                    message: err.to_string(),
                    statement: None,
                },
                false,
            ),
        };

        if !retryable || attempt >= max_attempts {
            warn!(
                "chunk {} failed after {attempt} attempt(s): {}",
                chunk.id, error.message
            );
            return failed(chunk, error, started, attempt);
        }

        let delay = retry.delay(attempt);
        warn!(
            "chunk {} attempt {attempt}/{max_attempts} failed: {}; retrying in {delay:?}",
            chunk.id, error.message
        );
        if !backoff(delay, state) {
            debug!("chunk {} not retried: run cancelled", chunk.id);
            return failed(chunk, error, started, attempt);
        }
    }
}

fn failed(chunk: &Chunk, error: ChunkError, started: Instant, attempts: u32) -> ChunkResult {
    ChunkResult {
        chunk_id: chunk.id,
        success: false,
        rows_affected: 0,
        error: Some(error),
        elapsed: started.elapsed(),
        attempts,
        statements: chunk.len(),
    }
}

// Sleep for `delay` in short slices; false once the run is cancelled.
fn backoff(delay: Duration, state: &RunState) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if state.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

/// Spawn the thread that folds worker outcomes into the run totals.
pub fn spawn_result_collector(
    rx: Receiver<ChunkOutcome>,
    mut aggregator: ImportAggregator,
    state: Arc<RunState>,
    progress: Option<ProgressSink>,
) -> thread::JoinHandle<ImportAggregator> {
    thread::spawn(move || {
        for outcome in rx {
            match outcome {
                ChunkOutcome::Finished(result) => {
                    let chunk_id = result.chunk_id;
                    let success = result.success;
                    if success {
                        state.chunks_completed.fetch_add(1, Ordering::Relaxed);
                        state
                            .rows_imported
                            .fetch_add(result.rows_affected, Ordering::Relaxed);
                    } else {
                        state.chunks_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    aggregator.record(result);

                    if let Some(sink) = &progress {
                        let snapshot = state.snapshot();
                        sink.emit(ProgressEvent::Chunk(ExecutionProgress {
                            chunk_id,
                            success,
                            chunks_completed: snapshot.chunks_completed,
                            chunks_failed: snapshot.chunks_failed,
                            rows_imported: snapshot.rows_imported,
                            percent: snapshot.completion_pct,
                        }));
                    }
                }
                ChunkOutcome::Skipped {
                    chunk_id,
                    statements,
                } => {
                    debug!("chunk {chunk_id} skipped ({statements} statements)");
                    state.chunks_skipped.fetch_add(1, Ordering::Relaxed);
                    aggregator.record_skipped();
                }
            }
        }
        aggregator
    })
}
