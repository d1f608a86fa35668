//! # Pipeline Events
//!
//! Progress events emitted while a run is in flight. Delivery is
//! best-effort: a slow consumer loses events, never stalls the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;
use tracing::info;

use crate::report::RunPhase;

/// Where the extractor currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtractStage {
    /// Statements are held back until the encoding has been confirmed.
    Probation,
    Streaming,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionProgress {
    pub stage: ExtractStage,
    /// Human-readable one-line status.
    pub message: String,
    /// Target table, once the first insert has named it.
    pub table_name: Option<String>,
    pub statements: u64,
    pub bytes_consumed: u64,
    pub total_bytes: u64,
    pub estimated_statements: u64,
    /// Fraction of the source consumed, `0.0..=1.0`.
    pub fraction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionProgress {
    pub chunk_id: u64,
    pub success: bool,
    pub chunks_completed: u64,
    pub chunks_failed: u64,
    pub rows_imported: u64,
    /// Completion against the chunks dispatched so far, `0.0..=100.0`.
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub enum ProgressEvent {
    EncodingSelected {
        encoding: String,
        confidence: f32,
        attempt: u32,
    },
    /// Extraction gave up on an encoding and restarts from the top.
    EncodingRestart {
        abandoned: String,
        next: String,
        invalid_ratio: f64,
    },
    Extraction(ExtractionProgress),
    Chunk(ExecutionProgress),
    Finished {
        phase: RunPhase,
    },
}

/// Non-blocking sender for [`ProgressEvent`]s.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Sender<ProgressEvent>,
    dropped: Arc<AtomicU64>,
}

impl ProgressSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn emit(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Nobody is listening any more.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Events lost because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain progress events into the log until every sink is dropped.
pub fn spawn_progress_logger(rx: Receiver<ProgressEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            match event {
                ProgressEvent::EncodingSelected {
                    encoding,
                    confidence,
                    attempt,
                } => info!(
                    "encoding selected encoding={encoding} confidence={confidence:.2} attempt={attempt}"
                ),
                ProgressEvent::EncodingRestart {
                    abandoned,
                    next,
                    invalid_ratio,
                } => info!(
                    "encoding {abandoned} abandoned invalid_ratio={invalid_ratio:.3}; restarting with {next}"
                ),
                ProgressEvent::Extraction(p) => info!(
                    "{} (stage={:?} table={} estimated={})",
                    p.message,
                    p.stage,
                    p.table_name.as_deref().unwrap_or("-"),
                    p.estimated_statements
                ),
                ProgressEvent::Chunk(p) => info!(
                    "chunk={} ok={} completed={} failed={} rows={} progress={:.1}%",
                    p.chunk_id,
                    p.success,
                    p.chunks_completed,
                    p.chunks_failed,
                    p.rows_imported,
                    p.percent
                ),
                ProgressEvent::Finished { phase } => info!("import finished phase={phase:?}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, rx) = ProgressSink::bounded(1);
        sink.emit(ProgressEvent::Finished {
            phase: RunPhase::Running,
        });
        sink.emit(ProgressEvent::Finished {
            phase: RunPhase::Completed,
        });
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn emitting_without_receiver_is_silent() {
        let (sink, rx) = ProgressSink::bounded(4);
        drop(rx);
        sink.emit(ProgressEvent::Finished {
            phase: RunPhase::Failed,
        });
        assert_eq!(sink.dropped(), 0);
    }
}
