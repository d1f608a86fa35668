//! # Import engine
//!
//! Control surface for running imports in the background. Each run gets a
//! [`RunHandle`] indexing into the engine's run arena; the engine itself
//! holds no other state, so several imports may run side by side.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::pipeline::events::ProgressSink;
use crate::pipeline::{ImportOptions, ProgressSnapshot, RunState, run_import_with_state};
use crate::report::{ErrorKind, ImportResult, RunPhase};
use crate::source::{DumpSource, RawSource, SourceError};
use crate::store::ConnectionFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunHandle(usize);

impl RunHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown run handle {0:?}")]
    UnknownRun(RunHandle),
    #[error(transparent)]
    Source(#[from] SourceError),
}

struct RunEntry {
    state: Arc<RunState>,
    thread: Mutex<Option<JoinHandle<ImportResult>>>,
    result: OnceLock<ImportResult>,
}

impl RunEntry {
    // Blocks until the run thread has returned.
    fn resolve(&self) -> &ImportResult {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        self.result.get_or_init(|| match thread.take() {
            Some(join) => join.join().unwrap_or_else(|_| {
                error!("import thread panicked");
                self.state.set_phase(RunPhase::Failed);
                ImportResult::fatal(
                    ErrorKind::PermanentExecution,
                    "import thread panicked",
                    Duration::from_secs_f64(self.state.snapshot().elapsed_seconds),
                )
            }),
            None => ImportResult::fatal(
                ErrorKind::PermanentExecution,
                "run result unavailable",
                Duration::ZERO,
            ),
        })
    }

    fn is_finished(&self) -> bool {
        if self.result.get().is_some() {
            return true;
        }
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        thread.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

#[derive(Default)]
pub struct ImportEngine {
    runs: Mutex<Vec<Arc<RunEntry>>>,
}

impl ImportEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an import on a background thread.
    pub fn start(
        &self,
        source: Arc<dyn DumpSource>,
        factory: Arc<dyn ConnectionFactory>,
        opts: ImportOptions,
        progress: Option<ProgressSink>,
    ) -> RunHandle {
        let state = Arc::new(RunState::new());
        let run_state = state.clone();
        let source_name = source.name().to_string();
        let thread = thread::spawn(move || {
            run_import_with_state(source, factory, &opts, run_state, progress)
        });

        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.push(Arc::new(RunEntry {
            state,
            thread: Mutex::new(Some(thread)),
            result: OnceLock::new(),
        }));
        let handle = RunHandle(runs.len() - 1);
        info!("run {} started for {source_name}", handle.0);
        handle
    }

    /// Open `path` and start importing it. Open errors are returned here,
    /// before any thread is spawned.
    pub fn start_file(
        &self,
        path: &Path,
        factory: Arc<dyn ConnectionFactory>,
        opts: ImportOptions,
        progress: Option<ProgressSink>,
    ) -> Result<RunHandle, EngineError> {
        let source = RawSource::open(path)?;
        Ok(self.start(Arc::new(source), factory, opts, progress))
    }

    fn entry(&self, handle: RunHandle) -> Result<Arc<RunEntry>, EngineError> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(handle.0)
            .cloned()
            .ok_or(EngineError::UnknownRun(handle))
    }

    /// Request cooperative cancellation: no chunk starts after this.
    pub fn cancel(&self, handle: RunHandle) -> Result<(), EngineError> {
        let entry = self.entry(handle)?;
        if !entry.state.is_cancelled() {
            info!("run {} cancellation requested", handle.0);
        }
        entry.state.cancel();
        Ok(())
    }

    /// Cancel every run that has not finished yet.
    pub fn cancel_all(&self) {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in runs.iter().filter(|entry| !entry.state.phase().is_terminal()) {
            entry.state.cancel();
        }
    }

    /// Block until the run reaches a terminal phase and return its result.
    /// Later calls return the same result immediately.
    pub fn result(&self, handle: RunHandle) -> Result<ImportResult, EngineError> {
        let entry = self.entry(handle)?;
        Ok(entry.resolve().clone())
    }

    /// The result if the run has already finished, without blocking.
    pub fn try_result(&self, handle: RunHandle) -> Result<Option<ImportResult>, EngineError> {
        let entry = self.entry(handle)?;
        if entry.is_finished() {
            Ok(Some(entry.resolve().clone()))
        } else {
            Ok(None)
        }
    }

    pub fn phase(&self, handle: RunHandle) -> Result<RunPhase, EngineError> {
        Ok(self.entry(handle)?.state.phase())
    }

    pub fn snapshot(&self, handle: RunHandle) -> Result<ProgressSnapshot, EngineError> {
        Ok(self.entry(handle)?.state.snapshot())
    }
}
