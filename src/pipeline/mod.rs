//! # Pipeline Module
//!
//! Orchestrates one import: encoding sniffing, statement extraction,
//! sanitisation and chunking on the calling thread, chunk execution on a
//! bounded worker set, and result aggregation on a collector thread.

pub mod events;
pub mod workers;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded};
use encoding_rs::Encoding;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::chunk::{Chunk, ChunkBuilder, ChunkLimits};
use crate::constants::{CHANNEL_CAPACITY_MULTIPLIER, MIB, MIN_CHANNEL_CAPACITY};
use crate::encoding::{EncodingDetector, default_fallbacks};
use crate::extract::{ExtractOptions, StatementExtractor};
use crate::pool::{ConnectionPool, PoolOptions};
use crate::report::{ErrorKind, ImportAggregator, ImportResult, RunPhase};
use crate::sanitize::{DropReason, Sanitized, StatementSanitizer};
use crate::source::{DumpSource, read_prefix};
use crate::store::ConnectionFactory;

use events::{ProgressEvent, ProgressSink};
use workers::{ChunkJob, ChunkOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retry_count: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Delay before the attempt following `attempt` (1-based): doubles each
    /// time, capped at `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub max_workers: usize,
    /// Queued chunks per worker before the feeder blocks.
    pub queue_capacity_per_worker: usize,
    pub pool: PoolOptions,
    pub chunk_limits: ChunkLimits,
    pub retry: RetryPolicy,
    pub execute_timeout: Duration,
    pub extract: ExtractOptions,
    pub encoding_sample_bytes: u64,
    pub candidates: Vec<&'static Encoding>,
    pub max_error_messages: usize,
    pub sanitizer: StatementSanitizer,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_workers: 8,
            queue_capacity_per_worker: CHANNEL_CAPACITY_MULTIPLIER,
            pool: PoolOptions::default(),
            chunk_limits: ChunkLimits::new(1000, (30 * MIB) as usize),
            retry: RetryPolicy::default(),
            execute_timeout: Duration::from_secs(300),
            extract: ExtractOptions::default(),
            encoding_sample_bytes: 100 * 1024,
            candidates: default_fallbacks(),
            max_error_messages: 20,
            sanitizer: StatementSanitizer::default(),
        }
    }
}

/// Shared state of one run. Counters are monotonic and read for display.
#[derive(Debug)]
pub struct RunState {
    cancel: Arc<AtomicBool>,
    phase: AtomicU8,
    pub(crate) chunks_dispatched: AtomicU64,
    pub(crate) chunks_completed: AtomicU64,
    pub(crate) chunks_failed: AtomicU64,
    pub(crate) chunks_skipped: AtomicU64,
    pub(crate) rows_imported: AtomicU64,
    pub(crate) statements_extracted: AtomicU64,
    pub(crate) statements_dropped: AtomicU64,
    pub(crate) estimated_chunks: AtomicU64,
    started: Instant,
}

impl Default for RunState {
    fn default() -> Self {
        Self::with_cancel_flag(Arc::new(AtomicBool::new(false)))
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an externally owned cancel flag (e.g. one set by Ctrl+C).
    pub fn with_cancel_flag(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            phase: AtomicU8::new(RunPhase::Pending.as_u8()),
            chunks_dispatched: AtomicU64::new(0),
            chunks_completed: AtomicU64::new(0),
            chunks_failed: AtomicU64::new(0),
            chunks_skipped: AtomicU64::new(0),
            rows_imported: AtomicU64::new(0),
            statements_extracted: AtomicU64::new(0),
            statements_dropped: AtomicU64::new(0),
            estimated_chunks: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn set_phase(&self, phase: RunPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let dispatched = self.chunks_dispatched.load(Ordering::Relaxed);
        let completed = self.chunks_completed.load(Ordering::Relaxed);
        let failed = self.chunks_failed.load(Ordering::Relaxed);
        let estimated = self.estimated_chunks.load(Ordering::Relaxed).max(dispatched);
        let phase = self.phase();
        let completion_pct = if phase == RunPhase::Completed {
            100.0
        } else if estimated == 0 {
            0.0
        } else {
            ((completed + failed) as f64 / estimated as f64 * 100.0).min(100.0)
        };
        ProgressSnapshot {
            phase,
            chunks_dispatched: dispatched,
            chunks_completed: completed,
            chunks_failed: failed,
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            rows_imported: self.rows_imported.load(Ordering::Relaxed),
            statements_extracted: self.statements_extracted.load(Ordering::Relaxed),
            statements_dropped: self.statements_dropped.load(Ordering::Relaxed),
            estimated_chunks: estimated,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            completion_pct,
        }
    }
}

/// Point-in-time view of a run's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub phase: RunPhase,
    pub chunks_dispatched: u64,
    pub chunks_completed: u64,
    pub chunks_failed: u64,
    pub chunks_skipped: u64,
    pub rows_imported: u64,
    pub statements_extracted: u64,
    pub statements_dropped: u64,
    pub estimated_chunks: u64,
    pub elapsed_seconds: f64,
    /// Completion percentage (0.0 - 100.0)
    pub completion_pct: f64,
}

/// Run an import to completion on the calling thread.
pub fn run_import(
    source: Arc<dyn DumpSource>,
    factory: Arc<dyn ConnectionFactory>,
    opts: &ImportOptions,
) -> ImportResult {
    run_import_with_state(source, factory, opts, Arc::new(RunState::new()), None)
}

/// Run an import against caller-owned state, so it can be cancelled and
/// observed from other threads.
pub fn run_import_with_state(
    source: Arc<dyn DumpSource>,
    factory: Arc<dyn ConnectionFactory>,
    opts: &ImportOptions,
    state: Arc<RunState>,
    progress: Option<ProgressSink>,
) -> ImportResult {
    ImportRunner {
        source,
        factory,
        opts,
        state,
        progress,
    }
    .run()
}

#[derive(Default)]
struct FeedOutcome {
    cancelled: bool,
    fatal: Option<String>,
    encoding: Option<String>,
    table_name: Option<String>,
    drops: HashMap<DropReason, u64>,
}

struct ImportRunner<'a> {
    source: Arc<dyn DumpSource>,
    factory: Arc<dyn ConnectionFactory>,
    opts: &'a ImportOptions,
    state: Arc<RunState>,
    progress: Option<ProgressSink>,
}

impl ImportRunner<'_> {
    fn run(self) -> ImportResult {
        let started = Instant::now();
        info!(
            "import source={} bytes={} target={} workers={} pool_size={}",
            self.source.name(),
            self.source.len(),
            self.factory.describe(),
            self.opts.max_workers,
            self.opts.pool.size
        );

        let prefix = match read_prefix(self.source.as_ref(), self.opts.encoding_sample_bytes) {
            Ok(prefix) => prefix,
            Err(err) => return self.abort(err.to_string(), started),
        };
        let guess = EncodingDetector::new(self.opts.candidates.clone()).detect(&prefix);
        info!(
            "encoding guess={} confidence={:.2} sample_bytes={}",
            guess.name(),
            guess.confidence,
            prefix.len()
        );

        let extractor = match StatementExtractor::new(
            self.source.clone(),
            &guess,
            self.opts.extract,
            self.opts.sanitizer.clone(),
            self.progress.clone(),
        ) {
            Ok(extractor) => extractor,
            Err(err) => return self.abort(err.to_string(), started),
        };

        let pool = ConnectionPool::new(self.factory.clone(), self.opts.pool);
        let worker_count = self.opts.max_workers.max(1);
        if pool.size() < worker_count {
            warn!(
                "pool_size={} is below max_workers={worker_count}; workers will wait on acquire",
                pool.size()
            );
        }
        let channel_cap = worker_count
            .saturating_mul(self.opts.queue_capacity_per_worker)
            .max(MIN_CHANNEL_CAPACITY);
        let (job_tx, job_rx) = bounded::<ChunkJob>(channel_cap);
        let (result_tx, result_rx) = bounded::<ChunkOutcome>(channel_cap * 2);

        let collector = workers::spawn_result_collector(
            result_rx,
            ImportAggregator::new(self.opts.max_error_messages),
            self.state.clone(),
            self.progress.clone(),
        );
        let handles = workers::spawn_chunk_workers(
            worker_count,
            job_rx,
            result_tx,
            pool.clone(),
            self.opts.retry,
            self.opts.execute_timeout,
            self.state.clone(),
        );

        let feed = self.feed(extractor, &job_tx);
        drop(job_tx);

        for handle in handles {
            if handle.join().is_err() {
                error!("chunk worker panicked");
            }
        }
        let mut aggregator = match collector.join() {
            Ok(aggregator) => aggregator,
            Err(_) => {
                error!("result collector panicked");
                let mut aggregator = ImportAggregator::new(self.opts.max_error_messages);
                aggregator.record_fatal(ErrorKind::PermanentExecution, "result collector panicked");
                aggregator
            }
        };
        let pool_stats = pool.stats();
        pool.close_all();
        debug!(
            "pool created={} recycled={} discarded={} peak_in_use={}",
            pool_stats.created, pool_stats.recycled, pool_stats.discarded, pool_stats.peak_in_use
        );

        if let Some(message) = &feed.fatal {
            aggregator.record_fatal(ErrorKind::Decode, message.clone());
        }
        let skipped = self.state.chunks_skipped.load(Ordering::Relaxed);
        let phase = if aggregator.has_fatal() {
            RunPhase::Failed
        } else if feed.cancelled || skipped > 0 {
            RunPhase::Cancelled
        } else {
            RunPhase::Completed
        };
        self.state.set_phase(phase);

        let mut result = aggregator.finish(
            phase,
            self.state.statements_extracted.load(Ordering::Relaxed),
            self.state.statements_dropped.load(Ordering::Relaxed),
            started.elapsed(),
        );
        result.encoding = feed.encoding;
        result.table_name = feed.table_name;

        if !feed.drops.is_empty() {
            debug!("dropped statements by reason: {:?}", feed.drops);
        }
        info!(
            "run_summary phase={:?} chunks={} completed={} failed={} skipped={} rows={} dropped={} elapsed={:.2}s",
            result.phase,
            result.total_chunks,
            result.completed_chunks,
            result.failed_chunks,
            result.skipped_chunks,
            result.total_rows,
            result.statements_dropped,
            result.elapsed.as_secs_f64()
        );
        self.emit(ProgressEvent::Finished { phase });
        result
    }

    // Single-threaded: extract, sanitise, chunk and dispatch in order.
    fn feed(&self, mut extractor: StatementExtractor, job_tx: &Sender<ChunkJob>) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        let mut builder = ChunkBuilder::new(self.opts.chunk_limits);

        while let Some(item) = extractor.next() {
            let stmt = match item {
                Ok(stmt) => stmt,
                Err(err) => {
                    error!("extraction aborted: {err}");
                    outcome.fatal = Some(err.to_string());
                    break;
                }
            };
            self.state.statements_extracted.fetch_add(1, Ordering::Relaxed);
            match self.opts.sanitizer.clean(stmt) {
                Sanitized::Kept(stmt) => {
                    if let Some(chunk) = builder.push(stmt) {
                        if !self.dispatch(chunk, job_tx, extractor.fraction_consumed()) {
                            outcome.cancelled = true;
                            break;
                        }
                    }
                }
                Sanitized::Dropped(reason) => {
                    self.state.statements_dropped.fetch_add(1, Ordering::Relaxed);
                    *outcome.drops.entry(reason).or_default() += 1;
                }
            }
        }

        if !outcome.cancelled && outcome.fatal.is_none() {
            if let Some(chunk) = builder.finish() {
                if !self.dispatch(chunk, job_tx, 1.0) {
                    outcome.cancelled = true;
                }
            }
        }
        if outcome.cancelled {
            info!(
                "cancellation observed after {} chunk(s) dispatched; no further chunks will start",
                self.state.chunks_dispatched.load(Ordering::Relaxed)
            );
        }

        let stats = extractor.stats();
        debug!(
            "extraction encoding={} attempts={} statements={} lines={} replaced_chars={}",
            stats.encoding, stats.attempts, stats.statements, stats.lines, stats.replaced_chars
        );
        outcome.encoding = Some(stats.encoding.to_string());
        outcome.table_name = Some(stats.table_name);
        outcome
    }

    fn dispatch(&self, chunk: Chunk, job_tx: &Sender<ChunkJob>, fraction: f64) -> bool {
        if self.state.is_cancelled() {
            return false;
        }
        if self.state.phase() == RunPhase::Pending {
            self.state.set_phase(RunPhase::Running);
        }
        let dispatched = self.state.chunks_dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        if fraction > 0.0 {
            let estimate = (dispatched as f64 / fraction).ceil() as u64;
            self.state
                .estimated_chunks
                .store(estimate.max(dispatched), Ordering::Relaxed);
        }
        if job_tx.send(ChunkJob { chunk }).is_err() {
            warn!("chunk workers are gone; stopping dispatch");
            return false;
        }
        true
    }

    fn abort(&self, message: String, started: Instant) -> ImportResult {
        error!("import aborted before dispatch: {message}");
        self.state.set_phase(RunPhase::Failed);
        self.emit(ProgressEvent::Finished {
            phase: RunPhase::Failed,
        });
        ImportResult::fatal(ErrorKind::Decode, message, started.elapsed())
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink.emit(event);
        }
    }
}
