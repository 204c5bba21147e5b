//! Cleaning stage: column-name standardisation, type coercion,
//! missing-value handling, and stable duplicate removal.
//!
//! Cleaning is idempotent: running it twice with the same spec over its own
//! output drops, coerces, and fills nothing further.

use std::collections::HashSet;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::CoreError;
use crate::value::{DataType, GroupKey, Value};

// ---------------------------------------------------------------------------
// Spec types
// ---------------------------------------------------------------------------

/// Per-column missing-value handling.
#[derive(Debug, Clone, PartialEq)]
pub enum MissingValueStrategy {
    /// Keep the null (default).
    LeaveNull,
    /// Drop any row where this column is null.
    DropRow,
    /// Replace nulls with a fixed value.
    FillDefault(Value),
    /// Replace nulls with a column statistic.
    FillStatistic(FillStatistic),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStatistic {
    Mean,
    Median,
    Mode,
}

/// Duplicate-removal behaviour.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DedupSpec {
    /// No deduplication (default).
    #[default]
    Off,
    /// Deduplicate by full-row equality.
    FullRow,
    /// Deduplicate by equality of the named key columns.
    Keys(Vec<String>),
}

/// Everything the cleaning stage needs, assembled by configuration
/// compilation.
#[derive(Debug, Clone)]
pub struct CleaningSpec {
    /// Lowercase/underscore column names before anything else.
    pub standardize_columns: bool,
    /// Column → declared coercion target. Columns absent from the dataset
    /// are skipped, matching the source workflows this replaces.
    pub type_mapping: IndexMap<String, DataType>,
    /// Column → strategy. Columns not listed use `default_strategy`.
    pub missing_values: IndexMap<String, MissingValueStrategy>,
    /// Strategy for columns without an explicit entry.
    pub default_strategy: MissingValueStrategy,
    pub dedup: DedupSpec,
}

impl Default for CleaningSpec {
    fn default() -> Self {
        Self {
            standardize_columns: true,
            type_mapping: IndexMap::new(),
            missing_values: IndexMap::new(),
            default_strategy: MissingValueStrategy::LeaveNull,
            dedup: DedupSpec::Off,
        }
    }
}

/// Counts reported back to the run context and audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleaningReport {
    pub columns_renamed: usize,
    pub values_coerced: usize,
    pub coercion_failures: usize,
    pub cells_filled: usize,
    pub rows_dropped_missing: usize,
    pub rows_deduplicated: usize,
}

// ---------------------------------------------------------------------------
// Column-name standardisation
// ---------------------------------------------------------------------------

/// Normalise a column name: lowercase, non-alphanumerics to underscores,
/// runs collapsed, edges trimmed.
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let re = Regex::new(r"[^a-z0-9_]+").unwrap();
    let replaced = re.replace_all(&lowered, "_");
    let re_runs = Regex::new(r"_+").unwrap();
    let collapsed = re_runs.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

/// Clean a dataset according to the spec.
///
/// Coercion failures never fail a column: each failed value becomes null
/// and is counted. The only error path is a configuration problem (a dedup
/// key naming a column the dataset does not have).
pub fn clean(
    mut dataset: Dataset,
    spec: &CleaningSpec,
) -> Result<(Dataset, CleaningReport), CoreError> {
    let mut report = CleaningReport::default();

    if spec.standardize_columns {
        standardize_columns(&mut dataset, &mut report);
    }
    let dataset = coerce_columns(dataset, spec, &mut report);
    let dataset = handle_missing(dataset, spec, &mut report);
    let dataset = deduplicate(dataset, &spec.dedup, &mut report)?;

    Ok((dataset, report))
}

fn standardize_columns(dataset: &mut Dataset, report: &mut CleaningReport) {
    let mut used: HashSet<String> = HashSet::new();
    for idx in 0..dataset.column_count() {
        let original = dataset.columns()[idx].name.clone();
        let mut name = normalize_column_name(&original);
        if name.is_empty() {
            name = format!("column_{idx}");
        }
        // Keep names unique if two normalise to the same text.
        let mut candidate = name.clone();
        let mut suffix = 2;
        while used.contains(&candidate) {
            candidate = format!("{name}_{suffix}");
            suffix += 1;
        }
        used.insert(candidate.clone());
        if candidate != original {
            dataset.rename_column(idx, candidate);
            report.columns_renamed += 1;
        }
    }
}

fn coerce_columns(dataset: Dataset, spec: &CleaningSpec, report: &mut CleaningReport) -> Dataset {
    let mut columns = dataset.columns().to_vec();
    let mut rows = dataset.into_rows();
    for (name, target) in &spec.type_mapping {
        let Some(idx) = columns.iter().position(|c| c.name == *name) else {
            continue;
        };
        for row in &mut rows {
            let value = &row[idx];
            if value.is_null() {
                continue;
            }
            match value.coerce(*target) {
                Some(coerced) => {
                    if coerced != *value {
                        report.values_coerced += 1;
                        row[idx] = coerced;
                    }
                }
                None => {
                    report.coercion_failures += 1;
                    row[idx] = Value::Null;
                }
            }
        }
        columns[idx].data_type = *target;
    }
    Dataset::from_parts(columns, rows)
}

fn handle_missing(dataset: Dataset, spec: &CleaningSpec, report: &mut CleaningReport) -> Dataset {
    let columns = dataset.columns().to_vec();

    // Resolve each column's strategy, computing fill statistics up front
    // from the pre-fill column contents. Fill values are coerced to the
    // column's declared target type so cleaning stays idempotent: an
    // un-coercible fill (a fractional mean for an integer column) leaves
    // the nulls in place.
    let resolved: Vec<MissingValueStrategy> = columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let strategy = spec
                .missing_values
                .get(&col.name)
                .unwrap_or(&spec.default_strategy);
            let fill = match strategy {
                MissingValueStrategy::FillStatistic(stat) => {
                    match column_statistic(&dataset, idx, *stat) {
                        Some(value) => value,
                        // Statistic unavailable (no usable values): leave nulls.
                        None => return MissingValueStrategy::LeaveNull,
                    }
                }
                MissingValueStrategy::FillDefault(value) => value.clone(),
                other => return other.clone(),
            };
            match spec.type_mapping.get(&col.name) {
                Some(target) => match fill.coerce(*target) {
                    Some(coerced) => MissingValueStrategy::FillDefault(coerced),
                    None => MissingValueStrategy::LeaveNull,
                },
                None => MissingValueStrategy::FillDefault(fill),
            }
        })
        .collect();

    let mut out_rows = Vec::with_capacity(dataset.row_count());
    'rows: for row in dataset.into_rows() {
        for (idx, strategy) in resolved.iter().enumerate() {
            if row[idx].is_null() && *strategy == MissingValueStrategy::DropRow {
                report.rows_dropped_missing += 1;
                continue 'rows;
            }
        }
        let mut row = row;
        for (idx, strategy) in resolved.iter().enumerate() {
            if let MissingValueStrategy::FillDefault(fill) = strategy {
                if row[idx].is_null() {
                    row[idx] = fill.clone();
                    report.cells_filled += 1;
                }
            }
        }
        out_rows.push(row);
    }

    Dataset::from_parts(columns, out_rows)
}

fn column_statistic(dataset: &Dataset, col: usize, stat: FillStatistic) -> Option<Value> {
    match stat {
        FillStatistic::Mean => {
            let values: Vec<f64> = dataset
                .column_values(col)
                .filter_map(Value::as_f64)
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(Value::Num(values.iter().sum::<f64>() / values.len() as f64))
            }
        }
        FillStatistic::Median => {
            let mut values: Vec<f64> = dataset
                .column_values(col)
                .filter_map(Value::as_f64)
                .collect();
            if values.is_empty() {
                return None;
            }
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = values.len() / 2;
            let median = if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            };
            Some(Value::Num(median))
        }
        FillStatistic::Mode => {
            let mut counts: IndexMap<GroupKey, (Value, usize)> = IndexMap::new();
            for value in dataset.column_values(col) {
                if value.is_null() {
                    continue;
                }
                counts
                    .entry(value.group_key())
                    .and_modify(|(_, n)| *n += 1)
                    .or_insert_with(|| (value.clone(), 1));
            }
            // Highest count wins; ties break to the smaller value so the
            // result is deterministic regardless of row order.
            counts
                .into_values()
                .max_by(|(va, na), (vb, nb)| {
                    na.cmp(nb).then_with(|| vb.sort_cmp(va))
                })
                .map(|(value, _)| value)
        }
    }
}

fn deduplicate(
    dataset: Dataset,
    dedup: &DedupSpec,
    report: &mut CleaningReport,
) -> Result<Dataset, CoreError> {
    let key_indices: Vec<usize> = match dedup {
        DedupSpec::Off => return Ok(dataset),
        DedupSpec::FullRow => (0..dataset.column_count()).collect(),
        DedupSpec::Keys(keys) => keys
            .iter()
            .map(|key| {
                dataset.column_index(key).ok_or_else(|| {
                    CoreError::Config(format!("Dedup key \"{key}\" is not a column"))
                })
            })
            .collect::<Result<_, _>>()?,
    };

    let columns = dataset.columns().to_vec();
    let mut seen: HashSet<Vec<GroupKey>> = HashSet::new();
    let mut out_rows = Vec::with_capacity(dataset.row_count());
    for row in dataset.into_rows() {
        let key: Vec<GroupKey> = key_indices.iter().map(|i| row[*i].group_key()).collect();
        if seen.insert(key) {
            out_rows.push(row);
        } else {
            report.rows_deduplicated += 1;
        }
    }

    Ok(Dataset::from_parts(columns, out_rows))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;

    fn dataset(rows: Vec<Vec<Value>>) -> Dataset {
        let columns = vec![
            Column::new("a", DataType::String),
            Column::new("b", DataType::String),
        ];
        let mut ds = Dataset::new(columns);
        for row in rows {
            ds.push_row(row).unwrap();
        }
        ds
    }

    // -- column standardisation ----------------------------------------------

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_column_name("Sales Amount"), "sales_amount");
        assert_eq!(normalize_column_name("  Région (EUR) "), "r_gion_eur");
        assert_eq!(normalize_column_name("already_ok"), "already_ok");
    }

    #[test]
    fn renames_columns_in_dataset() {
        let mut ds = Dataset::new(vec![Column::new("Product Name", DataType::String)]);
        ds.push_row(vec![Value::Str("a".into())]).unwrap();
        let (cleaned, report) = clean(ds, &CleaningSpec::default()).unwrap();
        assert_eq!(cleaned.columns()[0].name, "product_name");
        assert_eq!(report.columns_renamed, 1);
    }

    // -- coercion -------------------------------------------------------------

    #[test]
    fn coercion_failure_becomes_null_and_is_counted() {
        let mut ds = dataset(vec![
            vec![Value::Str("10".into()), Value::Str("x".into())],
            vec![Value::Str("oops".into()), Value::Str("y".into())],
        ]);
        ds.set_column_type(0, DataType::String);
        let mut spec = CleaningSpec::default();
        spec.type_mapping.insert("a".into(), DataType::Integer);

        let (cleaned, report) = clean(ds, &spec).unwrap();
        assert_eq!(cleaned.value(0, 0), &Value::Int(10));
        assert_eq!(cleaned.value(1, 0), &Value::Null);
        assert_eq!(report.values_coerced, 1);
        assert_eq!(report.coercion_failures, 1);
        assert_eq!(cleaned.columns()[0].data_type, DataType::Integer);
    }

    #[test]
    fn type_mapping_for_absent_column_is_skipped() {
        let ds = dataset(vec![vec![Value::Int(1), Value::Int(2)]]);
        let mut spec = CleaningSpec::default();
        spec.type_mapping.insert("missing".into(), DataType::Integer);
        let (_, report) = clean(ds, &spec).unwrap();
        assert_eq!(report.coercion_failures, 0);
    }

    // -- missing values -------------------------------------------------------

    #[test]
    fn drop_row_strategy_removes_rows_with_null() {
        let ds = dataset(vec![
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Null, Value::Int(2)],
        ]);
        let mut spec = CleaningSpec::default();
        spec.missing_values
            .insert("a".into(), MissingValueStrategy::DropRow);
        let (cleaned, report) = clean(ds, &spec).unwrap();
        assert_eq!(cleaned.row_count(), 1);
        assert_eq!(report.rows_dropped_missing, 1);
    }

    #[test]
    fn fill_mean_uses_column_mean() {
        let ds = dataset(vec![
            vec![Value::Int(2), Value::Int(0)],
            vec![Value::Int(4), Value::Int(0)],
            vec![Value::Null, Value::Int(0)],
        ]);
        let mut spec = CleaningSpec::default();
        spec.missing_values.insert(
            "a".into(),
            MissingValueStrategy::FillStatistic(FillStatistic::Mean),
        );
        let (cleaned, report) = clean(ds, &spec).unwrap();
        assert_eq!(cleaned.value(2, 0), &Value::Num(3.0));
        assert_eq!(report.cells_filled, 1);
    }

    #[test]
    fn fill_mode_prefers_most_frequent() {
        let ds = dataset(vec![
            vec![Value::Str("x".into()), Value::Int(0)],
            vec![Value::Str("x".into()), Value::Int(0)],
            vec![Value::Str("y".into()), Value::Int(0)],
            vec![Value::Null, Value::Int(0)],
        ]);
        let mut spec = CleaningSpec::default();
        spec.missing_values.insert(
            "a".into(),
            MissingValueStrategy::FillStatistic(FillStatistic::Mode),
        );
        let (cleaned, _) = clean(ds, &spec).unwrap();
        assert_eq!(cleaned.value(3, 0), &Value::Str("x".into()));
    }

    #[test]
    fn statistic_fill_respects_declared_type() {
        let ds = dataset(vec![
            vec![Value::Str("10".into()), Value::Int(0)],
            vec![Value::Str("20".into()), Value::Int(0)],
            vec![Value::Null, Value::Int(0)],
        ]);
        let mut spec = CleaningSpec::default();
        spec.type_mapping.insert("a".into(), DataType::Integer);
        spec.missing_values.insert(
            "a".into(),
            MissingValueStrategy::FillStatistic(FillStatistic::Mean),
        );
        let (cleaned, _) = clean(ds, &spec).unwrap();
        assert_eq!(cleaned.value(2, 0), &Value::Int(15));
    }

    #[test]
    fn uncoercible_fill_leaves_null() {
        let ds = dataset(vec![
            vec![Value::Int(10), Value::Int(0)],
            vec![Value::Int(11), Value::Int(0)],
            vec![Value::Null, Value::Int(0)],
        ]);
        let mut spec = CleaningSpec::default();
        spec.type_mapping.insert("a".into(), DataType::Integer);
        spec.missing_values.insert(
            "a".into(),
            MissingValueStrategy::FillStatistic(FillStatistic::Mean),
        );
        // The mean is 10.5, which an integer column cannot hold.
        let (cleaned, report) = clean(ds, &spec).unwrap();
        assert_eq!(cleaned.value(2, 0), &Value::Null);
        assert_eq!(report.cells_filled, 0);
    }

    #[test]
    fn default_strategy_leaves_nulls() {
        let ds = dataset(vec![vec![Value::Null, Value::Null]]);
        let (cleaned, report) = clean(ds, &CleaningSpec::default()).unwrap();
        assert_eq!(cleaned.value(0, 0), &Value::Null);
        assert_eq!(report.cells_filled, 0);
    }

    // -- deduplication --------------------------------------------------------

    #[test]
    fn dedup_by_key_keeps_first_occurrence() {
        let ds = dataset(vec![
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), Value::Int(2)],
        ]);
        let mut spec = CleaningSpec::default();
        spec.dedup = DedupSpec::Keys(vec!["a".into()]);
        let (cleaned, report) = clean(ds, &spec).unwrap();
        // Only the first a=1 row survives.
        assert_eq!(cleaned.row_count(), 1);
        assert_eq!(cleaned.value(0, 1), &Value::Int(1));
        assert_eq!(report.rows_deduplicated, 2);
    }

    #[test]
    fn full_row_dedup() {
        let ds = dataset(vec![
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(1), Value::Int(2)],
        ]);
        let mut spec = CleaningSpec::default();
        spec.dedup = DedupSpec::FullRow;
        let (cleaned, _) = clean(ds, &spec).unwrap();
        assert_eq!(cleaned.row_count(), 2);
    }

    #[test]
    fn unknown_dedup_key_is_a_config_error() {
        let ds = dataset(vec![vec![Value::Int(1), Value::Int(1)]]);
        let mut spec = CleaningSpec::default();
        spec.dedup = DedupSpec::Keys(vec!["nope".into()]);
        assert!(matches!(clean(ds, &spec), Err(CoreError::Config(_))));
    }

    // -- idempotence ----------------------------------------------------------

    #[test]
    fn cleaning_twice_changes_nothing_further() {
        let ds = dataset(vec![
            vec![Value::Str("10".into()), Value::Str("x".into())],
            vec![Value::Str("10".into()), Value::Str("x".into())],
            vec![Value::Null, Value::Str("y".into())],
        ]);
        let mut spec = CleaningSpec::default();
        spec.type_mapping.insert("a".into(), DataType::Integer);
        spec.missing_values.insert(
            "a".into(),
            MissingValueStrategy::FillStatistic(FillStatistic::Mean),
        );
        spec.dedup = DedupSpec::FullRow;

        let (once, first) = clean(ds, &spec).unwrap();
        let (twice, second) = clean(once.clone(), &spec).unwrap();
        assert_eq!(once, twice);
        assert!(first.values_coerced > 0);
        assert_eq!(second.values_coerced, 0);
        assert_eq!(second.coercion_failures, 0);
        assert_eq!(second.cells_filled, 0);
        assert_eq!(second.rows_dropped_missing, 0);
        assert_eq!(second.rows_deduplicated, 0);
    }
}
