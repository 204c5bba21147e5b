//! Durable audit trail: append-only, line-delimited JSON, one file per run.
//!
//! Stages and workers append concurrently, so the writer sits behind a
//! mutex (single-writer discipline). Records are flushed as they are
//! appended and the file is never rewritten.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_jsonlines::JsonLinesWriter;
use tabpipe_core::audit::AuditRecord;
use tabpipe_core::types::RunId;

/// Append-only JSONL sink for one run's [`AuditRecord`]s.
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<JsonLinesWriter<BufWriter<File>>>,
}

impl AuditLog {
    /// Create the log file `audit_<run_id>.jsonl` inside `dir`.
    pub fn create(dir: &Path, run_id: RunId) -> std::io::Result<Self> {
        let path = dir.join(format!("audit_{run_id}.jsonl"));
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(JsonLinesWriter::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk.
    ///
    /// Failures are logged rather than propagated: a full disk must not
    /// turn a healthy run into a failed one mid-stage.
    pub fn append(&self, record: &AuditRecord) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writer.write(record).and_then(|_| writer.flush()) {
            tracing::error!(error = %e, event = %record.event, "Failed to append audit record");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
