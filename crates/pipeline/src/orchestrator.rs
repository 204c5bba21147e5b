//! The pipeline orchestrator: sequences extraction → cleaning → rules →
//! KPI/aggregation → export over one run context, publishing progress
//! events and appending the audit trail at every stage boundary.
//!
//! Configuration errors abort before any row is processed and leave no
//! partial artifacts. Row-level problems accumulate as warnings next to a
//! `completed` status — partial success is a first-class outcome.

use std::path::PathBuf;
use std::sync::Arc;

use tabpipe_core::aggregate::aggregate;
use tabpipe_core::audit::{events, AuditRecord};
use tabpipe_core::clean::clean;
use tabpipe_core::config::{CompiledConfig, TransformationConfig};
use tabpipe_core::dataset::Dataset;
use tabpipe_core::derive::add_calculated_fields;
use tabpipe_core::kpi::compute_kpis;
use tabpipe_core::rules::apply_rules;
use tabpipe_core::run::{RunStatus, Stage};
use tabpipe_core::types::RunId;
use tabpipe_events::{EventBus, RunEvent, RunEventKind};
use tokio_util::sync::CancellationToken;

use crate::audit_log::AuditLog;
use crate::context::{ArtifactDescriptor, RunContext, RunResult};
use crate::error::PipelineError;
use crate::export::{ExportCoordinator, ExportWriter, ReportBundle, StylingHints};
use crate::extract::{
    discover_files, extract_all, AdapterRegistry, ExtractionAdapter, ExtractionOptions,
};

// ---------------------------------------------------------------------------
// Options / input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Output formats to produce, in order.
    pub formats: Vec<String>,
    /// Bound on concurrent extraction and export workers.
    pub concurrency_limit: usize,
    /// Append a `source_file` provenance column during extraction.
    pub add_source_column: bool,
    /// Presentation hints forwarded to styled writers.
    pub styling: StylingHints,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            formats: vec!["csv".to_string(), "summary".to_string()],
            concurrency_limit: 4,
            add_source_column: true,
            styling: StylingHints::default(),
        }
    }
}

/// Where the input files come from.
#[derive(Debug, Clone)]
pub enum InputSpec {
    /// Every supported file directly inside a directory.
    Directory(PathBuf),
    /// An explicit file list, extracted in the given order.
    Files(Vec<PathBuf>),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One configured pipeline. [`Pipeline::run`] creates a fresh
/// [`RunContext`] per call, so concurrent runs of the same pipeline are
/// fully independent apart from the output directory (artifact names embed
/// the run id to keep them collision-free).
pub struct Pipeline {
    output_dir: PathBuf,
    options: PipelineOptions,
    registry: AdapterRegistry,
    coordinator: ExportCoordinator,
    bus: Arc<EventBus>,
}

impl Pipeline {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            options: PipelineOptions::default(),
            registry: AdapterRegistry::with_defaults(),
            coordinator: ExportCoordinator::with_defaults(),
            bus: Arc::new(EventBus::default()),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Register an external extraction adapter (spreadsheet readers).
    pub fn register_adapter(mut self, adapter: Arc<dyn ExtractionAdapter>) -> Self {
        self.registry.register(adapter);
        self
    }

    /// Register an external export writer (styled Excel, PDF).
    pub fn register_writer(mut self, writer: Arc<dyn ExportWriter>) -> Self {
        self.coordinator.register(writer);
        self
    }

    /// Bus carrying progress events; subscribe before calling
    /// [`Pipeline::run`] to observe the whole run.
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Execute one run.
    ///
    /// Cancellation is honoured between stage boundaries: in-flight
    /// per-file workers finish, no further stage begins, and the run
    /// reports `failed` with a cancellation reason.
    pub async fn run(
        &self,
        input: InputSpec,
        config: &TransformationConfig,
        cancel: CancellationToken,
    ) -> RunResult {
        let ctx = RunContext::new();
        let run_id = ctx.run_id;
        tracing::info!(run_id = %run_id, "Pipeline run starting");

        // Compile the configuration before anything else: invalid specs
        // abort with no partial artifacts.
        let compiled = match config.compile() {
            Ok(compiled) => compiled,
            Err(e) => return self.reject(ctx, e.to_string()),
        };

        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            return self.reject(ctx, format!("Cannot create output directory: {e}"));
        }
        let audit = match AuditLog::create(&self.output_dir, run_id) {
            Ok(audit) => Arc::new(audit),
            Err(e) => return self.reject(ctx, format!("Cannot create audit log: {e}")),
        };

        let _ = ctx.transition(RunStatus::Running);
        self.publish(run_id, RunEventKind::RunStarted);
        audit.append(&AuditRecord::new(
            run_id,
            Stage::Extraction,
            events::RUN_STARTED,
            0,
        ));

        match self.execute(&ctx, &audit, input, compiled, &cancel).await {
            Ok(artifacts) => {
                let _ = ctx.transition(RunStatus::Completed);
                audit.append(&AuditRecord::new(
                    run_id,
                    Stage::Export,
                    events::RUN_COMPLETED,
                    ctx.rows_processed(),
                ));
                self.publish(run_id, RunEventKind::RunCompleted);
                tracing::info!(
                    run_id = %run_id,
                    rows = ctx.rows_processed(),
                    files = ctx.files_processed(),
                    "Pipeline run completed"
                );
                ctx.into_result(artifacts, None, Some(audit.path().to_path_buf()))
            }
            Err(e) => {
                let stage = ctx.current_stage().unwrap_or(Stage::Extraction);
                let event = match e {
                    PipelineError::Cancelled(_) => events::RUN_CANCELLED,
                    _ => events::RUN_FAILED,
                };
                let reason = e.to_string();
                tracing::error!(run_id = %run_id, stage = %stage, "{reason}");
                audit.append(
                    &AuditRecord::new(run_id, stage, event, 0).with_detail(reason.clone()),
                );
                self.publish(run_id, RunEventKind::RunFailed { reason: reason.clone() });
                let _ = ctx.transition(RunStatus::Failed);
                ctx.into_result(Vec::new(), Some(reason), Some(audit.path().to_path_buf()))
            }
        }
    }

    /// The staged body of a run. Fatal problems propagate as
    /// [`PipelineError`]; recoverable ones go through `ctx.warn`.
    async fn execute(
        &self,
        ctx: &RunContext,
        audit: &Arc<AuditLog>,
        input: InputSpec,
        compiled: CompiledConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArtifactDescriptor>, PipelineError> {
        let run_id = ctx.run_id;
        let registry = Arc::new(self.registry.clone());

        // -- Stage: extraction ----------------------------------------------
        check_cancelled(cancel, Stage::Extraction)?;
        ctx.set_stage(Stage::Extraction);

        let files = match &input {
            InputSpec::Directory(dir) => discover_files(dir, &registry)?,
            InputSpec::Files(files) => files.clone(),
        };
        if files.is_empty() {
            return Err(PipelineError::NoData);
        }

        let extraction_options = ExtractionOptions {
            add_source_column: self.options.add_source_column,
            concurrency_limit: self.options.concurrency_limit,
        };
        let extractions = extract_all(
            Arc::clone(&registry),
            files,
            &extraction_options,
            Arc::clone(audit),
            run_id,
        )
        .await;

        let mut datasets: Vec<Dataset> = Vec::new();
        for extraction in extractions {
            match extraction.outcome {
                Ok(dataset) => {
                    ctx.record_file_processed();
                    datasets.push(dataset);
                }
                Err(e) => {
                    ctx.record_file_failed();
                    ctx.warn(Stage::Extraction, e.to_string());
                }
            }
        }
        if datasets.is_empty() {
            return Err(PipelineError::NoData);
        }
        let dataset = Dataset::union(datasets);
        self.stage_done(ctx, audit, Stage::Extraction, dataset.row_count());

        // -- Stage: cleaning -------------------------------------------------
        check_cancelled(cancel, Stage::Cleaning)?;
        ctx.set_stage(Stage::Cleaning);
        let (dataset, cleaning_report) = clean(dataset, &compiled.cleaning)?;
        audit.append(
            &AuditRecord::new(
                run_id,
                Stage::Cleaning,
                events::ROWS_CLEANED,
                dataset.row_count() as u64,
            )
            .with_detail(
                serde_json::to_string(&cleaning_report).unwrap_or_default(),
            ),
        );
        self.stage_done(ctx, audit, Stage::Cleaning, dataset.row_count());

        // -- Stage: calculated fields + business rules -----------------------
        check_cancelled(cancel, Stage::Rules)?;
        ctx.set_stage(Stage::Rules);
        let (dataset, derive_report) =
            add_calculated_fields(dataset, &compiled.calculated_fields)?;
        for warning in &derive_report.warnings {
            ctx.warn(Stage::Rules, warning.clone());
        }
        let (dataset, rule_report) = apply_rules(dataset, &compiled.rules)?;
        for warning in &rule_report.warnings {
            ctx.warn(Stage::Rules, warning.clone());
        }
        audit.append(
            &AuditRecord::new(
                run_id,
                Stage::Rules,
                events::RULES_APPLIED,
                dataset.row_count() as u64,
            )
            .with_detail(format!(
                "dropped={} tagged={}",
                rule_report.rows_dropped, rule_report.rows_tagged
            )),
        );
        ctx.set_rows_processed(dataset.row_count() as u64);
        self.stage_done(ctx, audit, Stage::Rules, dataset.row_count());

        // -- Stage: KPIs + aggregation ---------------------------------------
        check_cancelled(cancel, Stage::Kpi)?;
        ctx.set_stage(Stage::Kpi);
        let (kpis, kpi_warnings) = compute_kpis(&dataset, &compiled.kpis);
        for warning in kpi_warnings {
            ctx.warn(Stage::Kpi, warning);
        }
        let aggregated = match &compiled.aggregation {
            Some(spec) => Some(aggregate(&dataset, spec)?),
            None => None,
        };
        audit.append(&AuditRecord::new(
            run_id,
            Stage::Kpi,
            events::KPIS_COMPUTED,
            kpis.len() as u64,
        ));
        self.stage_done(ctx, audit, Stage::Kpi, dataset.row_count());

        // -- Stage: export ---------------------------------------------------
        check_cancelled(cancel, Stage::Export)?;
        ctx.set_stage(Stage::Export);
        let bundle = Arc::new(ReportBundle {
            dataset,
            aggregated,
            kpis,
        });
        let base_name = format!("report_{run_id}");
        let (artifacts, export_warnings) = self
            .coordinator
            .export_all(
                bundle,
                &self.options.formats,
                &self.output_dir,
                &base_name,
                &self.options.styling,
                self.options.concurrency_limit,
                Arc::clone(audit),
                run_id,
            )
            .await;
        for warning in export_warnings {
            ctx.warn(Stage::Export, warning);
        }
        self.stage_done(ctx, audit, Stage::Export, artifacts.len());

        Ok(artifacts)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn publish(&self, run_id: RunId, kind: RunEventKind) {
        self.bus.publish(RunEvent::new(run_id, kind));
    }

    /// Failure before the audit log exists (bad config, unusable output
    /// directory): fail the run with nothing written.
    fn reject(&self, ctx: RunContext, reason: String) -> RunResult {
        tracing::error!(run_id = %ctx.run_id, "{reason}");
        let _ = ctx.transition(RunStatus::Failed);
        self.publish(ctx.run_id, RunEventKind::RunFailed { reason: reason.clone() });
        ctx.into_result(Vec::new(), Some(reason), None)
    }

    fn stage_done(&self, ctx: &RunContext, audit: &AuditLog, stage: Stage, rows: usize) {
        audit.append(&AuditRecord::new(
            ctx.run_id,
            stage,
            events::STAGE_COMPLETED,
            rows as u64,
        ));
        let percent = stage.progress_percent();
        tracing::info!(run_id = %ctx.run_id, stage = %stage, percent, rows, "Stage completed");
        self.publish(
            ctx.run_id,
            RunEventKind::StageCompleted {
                stage: stage.to_string(),
                percent,
            },
        );
    }
}

/// Between-stage cancellation check: in-flight per-file tasks are allowed
/// to finish, but the named stage never begins.
fn check_cancelled(cancel: &CancellationToken, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled(format!("before {stage} stage")))
    } else {
        Ok(())
    }
}
