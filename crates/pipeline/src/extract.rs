//! Extraction: normalise heterogeneous source files into provenance-tagged
//! datasets.
//!
//! Real readers plug in behind [`ExtractionAdapter`]; a CSV adapter ships
//! built in, spreadsheet readers register from outside. Per-file failure
//! is never fatal — the file is skipped and recorded as a warning.
//! Independent files extract concurrently under a bounded semaphore.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tabpipe_core::audit::{events, AuditRecord};
use tabpipe_core::dataset::{Column, Dataset, Provenance};
use tabpipe_core::run::Stage;
use tabpipe_core::types::RunId;
use tabpipe_core::value::{DataType, Value};
use tokio::sync::Semaphore;

use crate::audit_log::AuditLog;
use crate::error::ExtractError;

/// Provenance column appended to extracted rows when enabled.
pub const SOURCE_FILE_COLUMN: &str = "source_file";

// ---------------------------------------------------------------------------
// Adapter interface
// ---------------------------------------------------------------------------

/// Reads one tabular file into a [`Dataset`].
///
/// Implementations are synchronous; the extraction fan-out runs them on
/// blocking worker threads.
pub trait ExtractionAdapter: Send + Sync {
    /// Format name recorded in provenance (e.g. `"csv"`).
    fn format(&self) -> &'static str;

    /// Lowercase file extensions this adapter handles.
    fn extensions(&self) -> &'static [&'static str];

    fn read(&self, path: &Path) -> Result<Dataset, ExtractError>;
}

/// Extension-keyed adapter lookup.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ExtractionAdapter>>,
}

impl AdapterRegistry {
    /// Registry with the built-in CSV adapter.
    pub fn with_defaults() -> Self {
        Self {
            adapters: vec![Arc::new(CsvAdapter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Register an adapter. Later registrations win on extension clashes,
    /// so embedders can override the built-ins.
    pub fn register(&mut self, adapter: Arc<dyn ExtractionAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn ExtractionAdapter>> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())?;
        self.adapters
            .iter()
            .rev()
            .find(|a| a.extensions().contains(&extension.as_str()))
            .cloned()
    }

    /// All extensions any registered adapter handles.
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .adapters
            .iter()
            .flat_map(|a| a.extensions().iter().copied())
            .collect();
        extensions.sort_unstable();
        extensions.dedup();
        extensions
    }
}

// ---------------------------------------------------------------------------
// Built-in CSV adapter
// ---------------------------------------------------------------------------

/// CSV reader: first record is the header, cell types are inferred
/// (integers, floats, booleans; everything else stays text, datetimes are
/// left to the declared `type_mapping`).
pub struct CsvAdapter;

impl ExtractionAdapter for CsvAdapter {
    fn format(&self) -> &'static str {
        "csv"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv"]
    }

    fn read(&self, path: &Path) -> Result<Dataset, ExtractError> {
        let display = path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| ExtractError::Unreadable {
                path: display.clone(),
                reason: e.to_string(),
            })?;

        let headers = reader
            .headers()
            .map_err(|e| ExtractError::Malformed {
                path: display.clone(),
                reason: e.to_string(),
            })?
            .clone();

        let columns: Vec<Column> = headers
            .iter()
            .map(|name| Column::new(name.trim(), DataType::String))
            .collect();
        let width = columns.len();
        let mut dataset = Dataset::new(columns);

        for record in reader.records() {
            let record = record.map_err(|e| ExtractError::Malformed {
                path: display.clone(),
                reason: e.to_string(),
            })?;
            // Short records pad with null, long records truncate.
            let mut row: Vec<Value> = record.iter().take(width).map(Value::infer).collect();
            row.resize(width, Value::Null);
            dataset.push_row(row).map_err(|e| ExtractError::Malformed {
                path: display.clone(),
                reason: e.to_string(),
            })?;
        }

        infer_column_types(&mut dataset);
        Ok(dataset)
    }
}

/// Set each column's declared type from its first non-null value.
fn infer_column_types(dataset: &mut Dataset) {
    for idx in 0..dataset.column_count() {
        let inferred = dataset
            .column_values(idx)
            .find(|v| !v.is_null())
            .map(|v| match v {
                Value::Int(_) => DataType::Integer,
                Value::Num(_) => DataType::Numeric,
                Value::Bool(_) => DataType::Boolean,
                Value::DateTime(_) => DataType::Datetime,
                Value::Str(_) | Value::Null => DataType::String,
            });
        if let Some(data_type) = inferred {
            dataset.set_column_type(idx, data_type);
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Find every supported file directly inside `dir`, sorted by path for a
/// deterministic extraction order.
pub fn discover_files(dir: &Path, registry: &AdapterRegistry) -> std::io::Result<Vec<PathBuf>> {
    let supported = registry.supported_extensions();
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|e| supported.contains(&e.to_string_lossy().to_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    files.dedup();
    Ok(files)
}

// ---------------------------------------------------------------------------
// Concurrent fan-out
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Append a `source_file` column carrying each row's origin file name.
    pub add_source_column: bool,
    /// Maximum files extracted concurrently.
    pub concurrency_limit: usize,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            add_source_column: true,
            concurrency_limit: 4,
        }
    }
}

/// One file's extraction outcome, in input order.
pub struct FileExtraction {
    pub path: PathBuf,
    pub outcome: Result<Dataset, ExtractError>,
}

/// Extract every file concurrently (bounded by the options' limit),
/// appending per-file audit records as workers finish.
///
/// Results come back in input-file order regardless of completion order,
/// so the downstream merge is deterministic.
pub async fn extract_all(
    registry: Arc<AdapterRegistry>,
    files: Vec<PathBuf>,
    options: &ExtractionOptions,
    audit: Arc<AuditLog>,
    run_id: RunId,
) -> Vec<FileExtraction> {
    let semaphore = Arc::new(Semaphore::new(options.concurrency_limit.max(1)));
    let add_source_column = options.add_source_column;

    let mut handles = Vec::with_capacity(files.len());
    for path in files {
        let registry = Arc::clone(&registry);
        let audit = Arc::clone(&audit);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            // The semaphore is never closed while workers run.
            let _permit = semaphore.acquire_owned().await;
            let outcome = read_one(&registry, &path, add_source_column).await;
            match &outcome {
                Ok(dataset) => audit.append(
                    &AuditRecord::new(
                        run_id,
                        Stage::Extraction,
                        events::FILE_EXTRACTED,
                        dataset.row_count() as u64,
                    )
                    .with_detail(path.display().to_string()),
                ),
                Err(e) => audit.append(
                    &AuditRecord::new(run_id, Stage::Extraction, events::FILE_FAILED, 0)
                        .with_detail(e.to_string()),
                ),
            }
            FileExtraction { path, outcome }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(extraction) => results.push(extraction),
            Err(e) => tracing::error!(error = %e, "Extraction worker panicked"),
        }
    }
    results
}

async fn read_one(
    registry: &AdapterRegistry,
    path: &Path,
    add_source_column: bool,
) -> Result<Dataset, ExtractError> {
    let display = path.display().to_string();
    let Some(adapter) = registry.for_path(path) else {
        return Err(ExtractError::Unsupported {
            path: display,
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default(),
        });
    };

    let format = adapter.format();
    let blocking_path = path.to_path_buf();
    let read = tokio::task::spawn_blocking(move || adapter.read(&blocking_path));
    let mut dataset = match read.await {
        Ok(result) => result?,
        Err(e) => {
            return Err(ExtractError::Unreadable {
                path: display,
                reason: format!("reader task failed: {e}"),
            })
        }
    };

    if add_source_column && dataset.column_index(SOURCE_FILE_COLUMN).is_none() {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| display.clone());
        let values = vec![Value::Str(file_name); dataset.row_count()];
        let _ = dataset.push_column(Column::new(SOURCE_FILE_COLUMN, DataType::String), values);
    }

    Ok(dataset.with_provenance(Provenance {
        source_path: display,
        format: format.to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
