//! Calculated fields: new columns computed per row from scalar formulas.
//!
//! Fields are appended in declaration order, so a later formula may
//! reference an earlier calculated column.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::dataset::{Column, Dataset};
use crate::error::CoreError;
use crate::expr::{eval_scalar_row, Expr};
use crate::value::{DataType, Value};

/// A compiled calculated-field definition.
#[derive(Debug, Clone)]
pub struct CalculatedField {
    pub name: String,
    pub formula: Expr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeriveReport {
    pub fields_added: usize,
    /// Per-row evaluation failures; the affected cell becomes null.
    pub eval_failures: usize,
    pub warnings: Vec<String>,
}

/// Append each calculated field as a new column.
///
/// Unknown column references are configuration errors (the run aborts);
/// a per-row evaluation failure stores null in that cell and records a
/// warning.
pub fn add_calculated_fields(
    dataset: Dataset,
    fields: &[CalculatedField],
) -> Result<(Dataset, DeriveReport), CoreError> {
    let mut report = DeriveReport::default();

    // Fail fast on unknown references before touching any row.
    let mut known: BTreeSet<String> = dataset
        .columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    for field in fields {
        field.formula.validate_scalar().map_err(|msg| {
            CoreError::Config(format!("Calculated field \"{}\": {msg}", field.name))
        })?;
        let mut refs = BTreeSet::new();
        field.formula.column_refs(&mut refs);
        for reference in refs {
            if !known.contains(&reference) {
                return Err(CoreError::Config(format!(
                    "Calculated field \"{}\" references unknown column \"{reference}\"",
                    field.name
                )));
            }
        }
        if known.contains(&field.name) {
            return Err(CoreError::Config(format!(
                "Calculated field \"{}\" collides with an existing column",
                field.name
            )));
        }
        known.insert(field.name.clone());
    }

    let mut dataset = dataset;
    for field in fields {
        let columns = dataset.columns().to_vec();
        let mut values = Vec::with_capacity(dataset.row_count());
        let mut failures_this_field = 0usize;
        for (row_idx, row) in dataset.rows().iter().enumerate() {
            match eval_scalar_row(&field.formula, &columns, row) {
                Ok(value) => values.push(value),
                Err(err) => {
                    failures_this_field += 1;
                    if failures_this_field == 1 {
                        report.warnings.push(format!(
                            "Calculated field \"{}\" failed at row {row_idx}: {err}",
                            field.name
                        ));
                    }
                    values.push(Value::Null);
                }
            }
        }
        report.eval_failures += failures_this_field;

        let data_type = values
            .iter()
            .find(|v| !v.is_null())
            .map(infer_column_type)
            .unwrap_or(DataType::Numeric);
        dataset.push_column(Column::new(field.name.clone(), data_type), values)?;
        report.fields_added += 1;
    }

    Ok((dataset, report))
}

fn infer_column_type(value: &Value) -> DataType {
    match value {
        Value::Int(_) => DataType::Integer,
        Value::Num(_) => DataType::Numeric,
        Value::Bool(_) => DataType::Boolean,
        Value::DateTime(_) => DataType::Datetime,
        Value::Str(_) | Value::Null => DataType::String,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, formula: &str) -> CalculatedField {
        CalculatedField {
            name: name.to_string(),
            formula: Expr::parse(formula).unwrap(),
        }
    }

    fn sales_dataset() -> Dataset {
        let mut ds = Dataset::new(vec![
            Column::new("sales_amount", DataType::Numeric),
            Column::new("quantity", DataType::Integer),
        ]);
        ds.push_row(vec![Value::Num(1000.0), Value::Int(10)]).unwrap();
        ds.push_row(vec![Value::Num(800.0), Value::Int(0)]).unwrap();
        ds
    }

    #[test]
    fn adds_computed_column() {
        let fields = vec![field("total", "sales_amount * 2")];
        let (ds, report) = add_calculated_fields(sales_dataset(), &fields).unwrap();
        assert_eq!(report.fields_added, 1);
        let idx = ds.column_index("total").unwrap();
        assert_eq!(ds.value(0, idx), &Value::Num(2000.0));
    }

    #[test]
    fn later_field_sees_earlier_field() {
        let fields = vec![
            field("double", "quantity * 2"),
            field("quadruple", "double * 2"),
        ];
        let (ds, _) = add_calculated_fields(sales_dataset(), &fields).unwrap();
        let idx = ds.column_index("quadruple").unwrap();
        assert_eq!(ds.value(0, idx), &Value::Int(40));
    }

    #[test]
    fn row_failure_becomes_null_with_warning() {
        // Division by zero on the second row only.
        let fields = vec![field("unit_price", "sales_amount / quantity")];
        let (ds, report) = add_calculated_fields(sales_dataset(), &fields).unwrap();
        let idx = ds.column_index("unit_price").unwrap();
        assert_eq!(ds.value(0, idx), &Value::Num(100.0));
        assert_eq!(ds.value(1, idx), &Value::Null);
        assert_eq!(report.eval_failures, 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn unknown_reference_is_config_error() {
        let fields = vec![field("x", "missing + 1")];
        assert!(matches!(
            add_calculated_fields(sales_dataset(), &fields),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn reduction_in_formula_is_config_error() {
        let fields = vec![field("x", "sum(quantity)")];
        assert!(matches!(
            add_calculated_fields(sales_dataset(), &fields),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn name_collision_is_config_error() {
        let fields = vec![field("quantity", "1 + 1")];
        assert!(matches!(
            add_calculated_fields(sales_dataset(), &fields),
            Err(CoreError::Config(_))
        ));
    }
}
