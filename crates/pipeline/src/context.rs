//! Per-run mutable state and the immutable result summary.
//!
//! One [`RunContext`] exists per run, owned exclusively by the
//! orchestrator; two runs never share one. The counters and warning sink
//! sit behind a mutex because extraction and export workers report into
//! them concurrently.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tabpipe_core::error::CoreError;
use tabpipe_core::run::{RunStatus, Stage};
use tabpipe_core::types::{RunId, Timestamp};

// ---------------------------------------------------------------------------
// RunWarning / ArtifactDescriptor
// ---------------------------------------------------------------------------

/// A recoverable problem recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunWarning {
    pub stage: Stage,
    pub message: String,
}

/// A produced output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub format: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    files_processed: u64,
    files_failed: u64,
    rows_processed: u64,
    warnings: Vec<RunWarning>,
}

/// Mutable state for one pipeline execution.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: Timestamp,
    status: Mutex<RunStatus>,
    current_stage: Mutex<Option<Stage>>,
    counters: Mutex<Counters>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            status: Mutex::new(RunStatus::Pending),
            current_stage: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn status(&self) -> RunStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move the run to a new status, enforcing the state machine.
    pub fn transition(&self, to: RunStatus) -> Result<(), CoreError> {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status
            .validate_transition(to)
            .map_err(CoreError::State)?;
        *status = to;
        Ok(())
    }

    pub fn set_stage(&self, stage: Stage) {
        *self
            .current_stage
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(stage);
    }

    pub fn current_stage(&self) -> Option<Stage> {
        *self
            .current_stage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_file_processed(&self) {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .files_processed += 1;
    }

    pub fn record_file_failed(&self) {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .files_failed += 1;
    }

    pub fn set_rows_processed(&self, rows: u64) {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .rows_processed = rows;
    }

    /// Record a recoverable problem. Also logged, so an operator tailing
    /// the run sees it in real time.
    pub fn warn(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(stage = %stage, "{message}");
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .warnings
            .push(RunWarning { stage, message });
    }

    pub fn files_processed(&self) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .files_processed
    }

    pub fn rows_processed(&self) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .rows_processed
    }

    /// Consume the context into the immutable result summary.
    pub fn into_result(
        self,
        artifacts: Vec<ArtifactDescriptor>,
        error: Option<String>,
        audit_log: Option<PathBuf>,
    ) -> RunResult {
        let status = self.status();
        let counters = self
            .counters
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        RunResult {
            run_id: self.run_id,
            status,
            started_at: self.started_at,
            finished_at: chrono::Utc::now(),
            files_processed: counters.files_processed,
            rows_processed: counters.rows_processed,
            artifacts,
            warnings: counters.warnings,
            error,
            audit_log,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// Immutable, JSON-serializable summary returned to the caller.
///
/// Callers must inspect `warnings` even when `status` is `completed`:
/// partial success is a first-class outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub files_processed: u64,
    pub rows_processed: u64,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub warnings: Vec<RunWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Path of the run's audit log file, when one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
