//! Export coordination: dispatch the transformed dataset, aggregation, and
//! KPI results to one writer per requested output format.
//!
//! A `csv` writer and a JSON `summary` writer ship built in; styled Excel
//! and PDF writers are external capabilities registered by the embedder.
//! Per-format failure is a warning, never fatal, and artifact file names
//! embed the run id so concurrent runs cannot collide.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tabpipe_core::audit::{events, AuditRecord};
use tabpipe_core::dataset::Dataset;
use tabpipe_core::expr::{reduce, AggFunc};
use tabpipe_core::kpi::KpiValue;
use tabpipe_core::run::Stage;
use tabpipe_core::types::RunId;
use tabpipe_core::value::Value;
use tokio::sync::Semaphore;

use crate::audit_log::AuditLog;
use crate::context::ArtifactDescriptor;
use crate::error::ExportError;
use crate::extract::SOURCE_FILE_COLUMN;

// ---------------------------------------------------------------------------
// Writer interface
// ---------------------------------------------------------------------------

/// Presentation hints forwarded to styled writers. The built-in writers
/// ignore most of them; Excel/PDF writers use them for header styling and
/// column sizing.
#[derive(Debug, Clone)]
pub struct StylingHints {
    pub title: Option<String>,
    pub header_bold: bool,
    pub autofit_columns: bool,
}

impl Default for StylingHints {
    fn default() -> Self {
        Self {
            title: None,
            header_bold: true,
            autofit_columns: true,
        }
    }
}

/// Everything a writer may render: the transformed dataset, the optional
/// aggregation table, and the computed KPIs.
pub struct ReportBundle {
    pub dataset: Dataset,
    pub aggregated: Option<Dataset>,
    pub kpis: IndexMap<String, KpiValue>,
}

/// Writes one output format. Implementations are synchronous; the export
/// fan-out runs them on blocking worker threads.
pub trait ExportWriter: Send + Sync {
    /// Format name requested in configuration (e.g. `"csv"`,
    /// `"excel_styled"`).
    fn format(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn write(
        &self,
        bundle: &ReportBundle,
        path: &Path,
        styling: &StylingHints,
    ) -> Result<(), ExportError>;
}

// ---------------------------------------------------------------------------
// Built-in writers
// ---------------------------------------------------------------------------

/// Plain CSV of the transformed dataset. Nulls render as empty cells.
pub struct CsvWriter;

impl ExportWriter for CsvWriter {
    fn format(&self) -> &'static str {
        "csv"
    }

    fn file_extension(&self) -> &'static str {
        "csv"
    }

    fn write(
        &self,
        bundle: &ReportBundle,
        path: &Path,
        _styling: &StylingHints,
    ) -> Result<(), ExportError> {
        let fail = |e: &dyn std::fmt::Display| ExportError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let mut writer = csv::Writer::from_path(path).map_err(|e| fail(&e))?;
        let header: Vec<&str> = bundle
            .dataset
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        writer.write_record(&header).map_err(|e| fail(&e))?;
        for row in bundle.dataset.rows() {
            let record: Vec<String> = row.iter().map(Value::render).collect();
            writer.write_record(&record).map_err(|e| fail(&e))?;
        }
        writer.flush().map_err(|e| fail(&e))
    }
}

/// JSON summary report: dataset statistics, KPI values, and the
/// aggregation table when present.
pub struct SummaryWriter;

impl ExportWriter for SummaryWriter {
    fn format(&self) -> &'static str {
        "summary"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn write(
        &self,
        bundle: &ReportBundle,
        path: &Path,
        styling: &StylingHints,
    ) -> Result<(), ExportError> {
        let fail = |e: &dyn std::fmt::Display| ExportError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut summary = serde_json::Map::new();
        if let Some(title) = &styling.title {
            summary.insert("title".into(), serde_json::Value::String(title.clone()));
        }
        summary.insert("dataset".into(), dataset_statistics(&bundle.dataset));

        let kpis: serde_json::Map<String, serde_json::Value> = bundle
            .kpis
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        summary.insert("kpis".into(), serde_json::Value::Object(kpis));

        if let Some(aggregated) = &bundle.aggregated {
            summary.insert("aggregated".into(), aggregated.to_json_rows());
        }

        let text = serde_json::to_string_pretty(&serde_json::Value::Object(summary))
            .map_err(|e| fail(&e))?;
        std::fs::write(path, text).map_err(|e| fail(&e))
    }
}

/// Per-column statistics in the shape the original summary sheets carried:
/// totals/averages/extremes for numeric columns, distinct counts for
/// categorical ones. Provenance columns are skipped.
fn dataset_statistics(dataset: &Dataset) -> serde_json::Value {
    let missing: usize = dataset
        .rows()
        .iter()
        .map(|row| row.iter().filter(|v| v.is_null()).count())
        .sum();

    let mut columns = Vec::new();
    for (idx, column) in dataset.columns().iter().enumerate() {
        if column.name == SOURCE_FILE_COLUMN {
            continue;
        }
        let mut entry = serde_json::Map::new();
        entry.insert("name".into(), serde_json::Value::String(column.name.clone()));
        entry.insert(
            "type".into(),
            serde_json::Value::String(column.data_type.to_string()),
        );

        let numeric = dataset.column_values(idx).any(|v| v.as_f64().is_some());
        if numeric {
            for func in [AggFunc::Sum, AggFunc::Mean, AggFunc::Min, AggFunc::Max] {
                let reduced = reduce(func, dataset.column_values(idx));
                entry.insert(func.as_str().into(), reduced.to_json());
            }
        } else {
            let distinct: std::collections::HashSet<_> = dataset
                .column_values(idx)
                .filter(|v| !v.is_null())
                .map(|v| v.group_key())
                .collect();
            entry.insert(
                "unique_values".into(),
                serde_json::Value::from(distinct.len()),
            );
        }
        columns.push(serde_json::Value::Object(entry));
    }

    serde_json::json!({
        "rows": dataset.row_count(),
        "columns": dataset.column_count(),
        "missing_values": missing,
        "column_stats": columns,
    })
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Dispatches one write per requested format, concurrently and bounded.
pub struct ExportCoordinator {
    writers: Vec<Arc<dyn ExportWriter>>,
}

impl ExportCoordinator {
    /// Coordinator with the built-in `csv` and `summary` writers.
    pub fn with_defaults() -> Self {
        Self {
            writers: vec![Arc::new(CsvWriter), Arc::new(SummaryWriter)],
        }
    }

    /// Register an external writer (styled Excel, PDF). Later
    /// registrations win on format-name clashes.
    pub fn register(&mut self, writer: Arc<dyn ExportWriter>) {
        self.writers.push(writer);
    }

    fn writer_for(&self, format: &str) -> Option<Arc<dyn ExportWriter>> {
        self.writers.iter().rev().find(|w| w.format() == format).cloned()
    }

    /// Write every requested format. Failures come back as warnings; the
    /// successful artifact descriptors list what was produced.
    #[allow(clippy::too_many_arguments)]
    pub async fn export_all(
        &self,
        bundle: Arc<ReportBundle>,
        formats: &[String],
        output_dir: &Path,
        base_name: &str,
        styling: &StylingHints,
        concurrency_limit: usize,
        audit: Arc<AuditLog>,
        run_id: RunId,
    ) -> (Vec<ArtifactDescriptor>, Vec<String>) {
        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
        let mut handles = Vec::new();
        let mut warnings = Vec::new();

        for format in formats {
            let Some(writer) = self.writer_for(format) else {
                let err = ExportError::UnknownFormat(format.clone());
                warnings.push(err.to_string());
                audit.append(
                    &AuditRecord::new(run_id, Stage::Export, events::EXPORT_FAILED, 0)
                        .with_detail(err.to_string()),
                );
                continue;
            };

            let path = output_dir.join(format!(
                "{base_name}_{}.{}",
                writer.format(),
                writer.file_extension()
            ));
            let bundle = Arc::clone(&bundle);
            let styling = styling.clone();
            let semaphore = Arc::clone(&semaphore);
            let audit = Arc::clone(&audit);
            let format = format.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let blocking_path = path.clone();
                let blocking_writer = Arc::clone(&writer);
                let write = tokio::task::spawn_blocking(move || {
                    blocking_writer.write(&bundle, &blocking_path, &styling)
                })
                .await;

                let outcome = match write {
                    Ok(result) => result,
                    Err(e) => Err(ExportError::WriteFailed {
                        path: path.display().to_string(),
                        reason: format!("writer task failed: {e}"),
                    }),
                };

                match outcome {
                    Ok(()) => {
                        let size_bytes = std::fs::metadata(&path)
                            .map(|m| m.len())
                            .unwrap_or(0);
                        let descriptor = ArtifactDescriptor {
                            name: path
                                .file_name()
                                .map(|n| n.to_string_lossy().to_string())
                                .unwrap_or_else(|| format.clone()),
                            format: format.clone(),
                            size_bytes,
                            path,
                        };
                        audit.append(
                            &AuditRecord::new(
                                run_id,
                                Stage::Export,
                                events::ARTIFACT_WRITTEN,
                                0,
                            )
                            .with_detail(descriptor.name.clone()),
                        );
                        Ok(descriptor)
                    }
                    Err(e) => {
                        audit.append(
                            &AuditRecord::new(run_id, Stage::Export, events::EXPORT_FAILED, 0)
                                .with_detail(e.to_string()),
                        );
                        Err(e.to_string())
                    }
                }
            }));
        }

        let mut artifacts = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(descriptor)) => artifacts.push(descriptor),
                Ok(Err(warning)) => warnings.push(warning),
                Err(e) => warnings.push(format!("export worker panicked: {e}")),
            }
        }
        (artifacts, warnings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
