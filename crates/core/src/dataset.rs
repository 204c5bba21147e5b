//! In-memory tabular value: ordered, typed columns plus ordered rows.
//!
//! Datasets move by value between pipeline stages; no stage keeps a
//! reference after handing one off. Every row holds exactly one value (or
//! null) per schema column, and column order is stable across a run.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::value::{DataType, Value};

// ---------------------------------------------------------------------------
// Column / Provenance
// ---------------------------------------------------------------------------

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Where an extracted dataset came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_path: String,
    pub format: String,
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Ordered columns + ordered rows. Rows are stored row-major; each row is a
/// `Vec<Value>` aligned with the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    pub provenance: Option<Provenance>,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Index of a column by name, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell accessor. Out-of-range indices return null rather than panic;
    /// the invariants make that unreachable for well-formed datasets.
    pub fn value(&self, row: usize, col: usize) -> &Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&Value::Null)
    }

    /// Append a row. The row must carry exactly one value per column.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), CoreError> {
        if row.len() != self.columns.len() {
            return Err(CoreError::Schema(format!(
                "Row has {} values but the schema has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a new column with one value per existing row.
    pub fn push_column(
        &mut self,
        column: Column,
        values: Vec<Value>,
    ) -> Result<(), CoreError> {
        if values.len() != self.rows.len() {
            return Err(CoreError::Schema(format!(
                "Column \"{}\" has {} values but the dataset has {} rows",
                column.name,
                values.len(),
                self.rows.len()
            )));
        }
        if self.column_index(&column.name).is_some() {
            return Err(CoreError::Schema(format!(
                "Column \"{}\" already exists",
                column.name
            )));
        }
        self.columns.push(column);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Rename a column in place (cleaning-stage standardisation).
    pub fn rename_column(&mut self, index: usize, name: String) {
        if let Some(col) = self.columns.get_mut(index) {
            col.name = name;
        }
    }

    /// Update a column's declared type (after coercion).
    pub fn set_column_type(&mut self, index: usize, data_type: DataType) {
        if let Some(col) = self.columns.get_mut(index) {
            col.data_type = data_type;
        }
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, col: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[col])
    }

    /// Consume the dataset, yielding its rows. The schema travels
    /// separately via [`Dataset::columns`] cloned beforehand.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Rebuild from a schema and pre-validated rows (stage outputs).
    pub fn from_parts(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            provenance: None,
        }
    }

    /// Rows as JSON objects keyed by column name, for exporters and KPI
    /// tables.
    pub fn to_json_rows(&self) -> serde_json::Value {
        let objects: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, value)| (col.name.clone(), value.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect();
        serde_json::Value::Array(objects)
    }

    /// Union-merge several datasets into one.
    ///
    /// The merged schema takes columns in first-seen order; a column's type
    /// comes from the dataset that introduced it. Rows keep their input
    /// order (dataset order, then row order) and missing columns fill with
    /// null.
    pub fn union(datasets: Vec<Dataset>) -> Dataset {
        let mut columns: Vec<Column> = Vec::new();
        for ds in &datasets {
            for col in ds.columns() {
                if !columns.iter().any(|c| c.name == col.name) {
                    columns.push(col.clone());
                }
            }
        }

        let mut merged = Dataset::new(columns);
        for ds in datasets {
            // Map each merged column to the source column index, if any.
            let mapping: Vec<Option<usize>> = merged
                .columns
                .iter()
                .map(|c| ds.column_index(&c.name))
                .collect();
            for row in ds.rows {
                let out: Vec<Value> = mapping
                    .iter()
                    .map(|idx| match idx {
                        Some(i) => row[*i].clone(),
                        None => Value::Null,
                    })
                    .collect();
                merged.rows.push(out);
            }
        }
        merged
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
