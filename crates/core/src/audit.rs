//! Audit trail record type and event name constants.
//!
//! Records are append-only: every stage writes one as a side effect and
//! nothing mutates them afterwards. The pipeline crate persists them as
//! line-delimited JSON, one file per run.

use serde::{Deserialize, Serialize};

use crate::run::Stage;
use crate::types::{RunId, Timestamp};

// ---------------------------------------------------------------------------
// Event name constants
// ---------------------------------------------------------------------------

/// Known audit event names.
pub mod events {
    pub const RUN_STARTED: &str = "run_started";
    pub const STAGE_COMPLETED: &str = "stage_completed";
    pub const FILE_EXTRACTED: &str = "file_extracted";
    pub const FILE_FAILED: &str = "file_failed";
    pub const ROWS_CLEANED: &str = "rows_cleaned";
    pub const RULES_APPLIED: &str = "rules_applied";
    pub const KPIS_COMPUTED: &str = "kpis_computed";
    pub const ARTIFACT_WRITTEN: &str = "artifact_written";
    pub const EXPORT_FAILED: &str = "export_failed";
    pub const RUN_COMPLETED: &str = "run_completed";
    pub const RUN_FAILED: &str = "run_failed";
    pub const RUN_CANCELLED: &str = "run_cancelled";
}

// ---------------------------------------------------------------------------
// AuditRecord
// ---------------------------------------------------------------------------

/// One append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: RunId,
    pub stage: Stage,
    pub timestamp: Timestamp,
    /// One of the [`events`] constants, or a free-form detail string.
    pub event: String,
    /// Row count the event affected (0 where not meaningful).
    pub rows: u64,
    /// Optional human-readable detail (file path, artifact name, reason).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(run_id: RunId, stage: Stage, event: impl Into<String>, rows: u64) -> Self {
        Self {
            run_id,
            stage,
            timestamp: chrono::Utc::now(),
            event: event.into(),
            rows,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
