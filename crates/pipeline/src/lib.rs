//! Pipeline orchestration for the tabular reporting engine.
//!
//! This crate sequences the pure stages from `tabpipe-core` into a run
//! with state, progress events, and a durable audit trail:
//!
//! - [`Pipeline`] — the orchestrator; one [`RunContext`] per run.
//! - [`extract`] — the extraction adapter interface, built-in CSV reader,
//!   and bounded concurrent fan-out.
//! - [`export`] — the export writer interface, built-in `csv`/`summary`
//!   writers, and the coordinator.
//! - [`AuditLog`] — append-only JSONL audit trail, one file per run.
//! - [`RunResult`] — the JSON-serializable summary handed to dashboards.

pub mod audit_log;
pub mod context;
pub mod error;
pub mod export;
pub mod extract;
pub mod orchestrator;

pub use audit_log::AuditLog;
pub use context::{ArtifactDescriptor, RunContext, RunResult, RunWarning};
pub use error::{ExportError, ExtractError, PipelineError};
pub use export::{ExportCoordinator, ExportWriter, ReportBundle, StylingHints};
pub use extract::{AdapterRegistry, CsvAdapter, ExtractionAdapter};
pub use orchestrator::{InputSpec, Pipeline, PipelineOptions};
