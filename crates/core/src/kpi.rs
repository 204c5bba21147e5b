//! KPI engine: scalar and small-table metrics computed after rules apply.
//!
//! KPIs execute independently — a bad reference or non-numeric operand in
//! one records a warning and never aborts its siblings. Scalar results are
//! visible to later formulas by name.

use indexmap::IndexMap;

use crate::dataset::{Column, Dataset};
use crate::expr::{eval_aggregate, Expr};
use crate::value::{DataType, GroupKey, Value};

// ---------------------------------------------------------------------------
// Definition types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum KpiKind {
    /// One aggregate formula (`sum(quantity * price) / count(order_id)`).
    Simple { formula: Expr },
    /// Numerator ÷ denominator; null (not an error) on a zero denominator.
    Ratio { numerator: Expr, denominator: Expr },
    /// Percent change of a value column between consecutive distinct
    /// period values, ascending. The first period reports null.
    Growth {
        value_column: String,
        period_column: String,
    },
    /// Running total of a value column across periods, ascending.
    Cumulative {
        value_column: String,
        period_column: String,
    },
}

#[derive(Debug, Clone)]
pub struct KpiDefinition {
    pub name: String,
    pub kind: KpiKind,
}

/// A computed KPI: a scalar, or a small period-indexed table.
#[derive(Debug, Clone, PartialEq)]
pub enum KpiValue {
    Scalar(Value),
    Table(Dataset),
}

impl KpiValue {
    /// JSON view for the summary report.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Scalar(value) => value.to_json(),
            Self::Table(table) => table.to_json_rows(),
        }
    }
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

/// Compute every KPI over the (already transformed) dataset.
///
/// Returns the results keyed by KPI name in declaration order, plus the
/// warnings for KPIs that failed and were skipped.
pub fn compute_kpis(
    dataset: &Dataset,
    definitions: &[KpiDefinition],
) -> (IndexMap<String, KpiValue>, Vec<String>) {
    let mut results: IndexMap<String, KpiValue> = IndexMap::new();
    let mut scalars: IndexMap<String, Value> = IndexMap::new();
    let mut warnings = Vec::new();

    for def in definitions {
        match compute_one(dataset, def, &scalars) {
            Ok(value) => {
                if let KpiValue::Scalar(scalar) = &value {
                    scalars.insert(def.name.clone(), scalar.clone());
                }
                results.insert(def.name.clone(), value);
            }
            Err(message) => {
                warnings.push(format!("KPI \"{}\": {message}", def.name));
            }
        }
    }

    (results, warnings)
}

fn compute_one(
    dataset: &Dataset,
    def: &KpiDefinition,
    scalars: &IndexMap<String, Value>,
) -> Result<KpiValue, String> {
    match &def.kind {
        KpiKind::Simple { formula } => {
            let value = eval_aggregate(formula, dataset, scalars).map_err(|e| e.to_string())?;
            Ok(KpiValue::Scalar(value))
        }
        KpiKind::Ratio {
            numerator,
            denominator,
        } => {
            let num = eval_aggregate(numerator, dataset, scalars).map_err(|e| e.to_string())?;
            let den = eval_aggregate(denominator, dataset, scalars).map_err(|e| e.to_string())?;
            if num.is_null() || den.is_null() {
                return Ok(KpiValue::Scalar(Value::Null));
            }
            let num = num
                .as_f64()
                .ok_or_else(|| format!("numerator is {}, expected numeric", num.type_name()))?;
            let den = den
                .as_f64()
                .ok_or_else(|| format!("denominator is {}, expected numeric", den.type_name()))?;
            if den == 0.0 {
                // Division by a zero denominator is a defined null, not an error.
                Ok(KpiValue::Scalar(Value::Null))
            } else {
                Ok(KpiValue::Scalar(Value::Num(num / den)))
            }
        }
        KpiKind::Growth {
            value_column,
            period_column,
        } => {
            let series = period_series(dataset, value_column, period_column)?;
            let mut table = Dataset::new(vec![
                Column::new(period_column.clone(), period_type(dataset, period_column)),
                Column::new(def.name.clone(), DataType::Numeric),
            ]);
            let mut previous: Option<f64> = None;
            for (period, total) in series {
                let growth = match previous {
                    // The first period has no predecessor: undefined, not zero.
                    None => Value::Null,
                    Some(prev) if prev == 0.0 => Value::Null,
                    Some(prev) => Value::Num((total - prev) / prev * 100.0),
                };
                previous = Some(total);
                table
                    .push_row(vec![period, growth])
                    .map_err(|e| e.to_string())?;
            }
            Ok(KpiValue::Table(table))
        }
        KpiKind::Cumulative {
            value_column,
            period_column,
        } => {
            let series = period_series(dataset, value_column, period_column)?;
            let mut table = Dataset::new(vec![
                Column::new(period_column.clone(), period_type(dataset, period_column)),
                Column::new(def.name.clone(), DataType::Numeric),
            ]);
            let mut running = 0.0;
            for (period, total) in series {
                running += total;
                table
                    .push_row(vec![period, Value::Num(running)])
                    .map_err(|e| e.to_string())?;
            }
            Ok(KpiValue::Table(table))
        }
    }
}

/// Sum the value column per distinct period, returning `(period, total)`
/// pairs sorted ascending by period. Rows with a null period are skipped.
fn period_series(
    dataset: &Dataset,
    value_column: &str,
    period_column: &str,
) -> Result<Vec<(Value, f64)>, String> {
    let value_idx = dataset
        .column_index(value_column)
        .ok_or_else(|| format!("unknown value column \"{value_column}\""))?;
    let period_idx = dataset
        .column_index(period_column)
        .ok_or_else(|| format!("unknown period column \"{period_column}\""))?;

    let mut totals: IndexMap<GroupKey, (Value, f64)> = IndexMap::new();
    for row in dataset.rows() {
        let period = &row[period_idx];
        if period.is_null() {
            continue;
        }
        let entry = totals
            .entry(period.group_key())
            .or_insert_with(|| (period.clone(), 0.0));
        if let Some(v) = row[value_idx].as_f64() {
            entry.1 += v;
        }
    }

    let mut series: Vec<(Value, f64)> = totals.into_values().collect();
    series.sort_by(|(a, _), (b, _)| a.sort_cmp(b));
    Ok(series)
}

fn period_type(dataset: &Dataset, period_column: &str) -> DataType {
    dataset
        .column_index(period_column)
        .map(|idx| dataset.columns()[idx].data_type)
        .unwrap_or(DataType::String)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, kind: KpiKind) -> KpiDefinition {
        KpiDefinition {
            name: name.to_string(),
            kind,
        }
    }

    fn simple(name: &str, formula: &str) -> KpiDefinition {
        def(
            name,
            KpiKind::Simple {
                formula: Expr::parse(formula).unwrap(),
            },
        )
    }

    fn sales() -> Dataset {
        let mut ds = Dataset::new(vec![
            Column::new("month", DataType::String),
            Column::new("revenue", DataType::Numeric),
            Column::new("profit", DataType::Numeric),
        ]);
        ds.push_row(vec![
            Value::Str("2024-01".into()),
            Value::Num(100.0),
            Value::Num(20.0),
        ])
        .unwrap();
        ds.push_row(vec![
            Value::Str("2024-02".into()),
            Value::Num(150.0),
            Value::Num(30.0),
        ])
        .unwrap();
        ds.push_row(vec![
            Value::Str("2024-01".into()),
            Value::Num(50.0),
            Value::Num(10.0),
        ])
        .unwrap();
        ds
    }

    #[test]
    fn simple_kpi() {
        let (results, warnings) = compute_kpis(&sales(), &[simple("total", "sum(revenue)")]);
        assert!(warnings.is_empty());
        assert_eq!(results["total"], KpiValue::Scalar(Value::Num(300.0)));
    }

    #[test]
    fn later_kpi_references_earlier_scalar() {
        let defs = vec![
            simple("total", "sum(revenue)"),
            simple("half", "total / 2"),
        ];
        let (results, warnings) = compute_kpis(&sales(), &defs);
        assert!(warnings.is_empty());
        assert_eq!(results["half"], KpiValue::Scalar(Value::Num(150.0)));
    }

    #[test]
    fn ratio_zero_denominator_is_null() {
        let defs = vec![def(
            "margin",
            KpiKind::Ratio {
                numerator: Expr::parse("10").unwrap(),
                denominator: Expr::parse("0").unwrap(),
            },
        )];
        let (results, warnings) = compute_kpis(&sales(), &defs);
        assert!(warnings.is_empty());
        assert_eq!(results["margin"], KpiValue::Scalar(Value::Null));
    }

    #[test]
    fn ratio_of_aggregates() {
        let defs = vec![def(
            "margin",
            KpiKind::Ratio {
                numerator: Expr::parse("sum(profit)").unwrap(),
                denominator: Expr::parse("sum(revenue)").unwrap(),
            },
        )];
        let (results, _) = compute_kpis(&sales(), &defs);
        assert_eq!(results["margin"], KpiValue::Scalar(Value::Num(0.2)));
    }

    #[test]
    fn growth_first_period_is_null() {
        let defs = vec![def(
            "revenue_growth",
            KpiKind::Growth {
                value_column: "revenue".into(),
                period_column: "month".into(),
            },
        )];
        let (results, warnings) = compute_kpis(&sales(), &defs);
        assert!(warnings.is_empty());
        let table = match &results["revenue_growth"] {
            KpiValue::Table(t) => t,
            other => panic!("expected table, got {other:?}"),
        };
        // Periods sorted ascending: 2024-01 (150 total), 2024-02 (150).
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, 1), &Value::Null);
        assert_eq!(table.value(1, 1), &Value::Num(0.0));
    }

    #[test]
    fn growth_single_period_yields_single_null() {
        let mut ds = Dataset::new(vec![
            Column::new("month", DataType::String),
            Column::new("revenue", DataType::Numeric),
        ]);
        ds.push_row(vec![Value::Str("2024-01".into()), Value::Num(10.0)])
            .unwrap();
        let defs = vec![def(
            "g",
            KpiKind::Growth {
                value_column: "revenue".into(),
                period_column: "month".into(),
            },
        )];
        let (results, _) = compute_kpis(&ds, &defs);
        let table = match &results["g"] {
            KpiValue::Table(t) => t,
            other => panic!("expected table, got {other:?}"),
        };
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, 1), &Value::Null);
    }

    #[test]
    fn cumulative_running_total() {
        let defs = vec![def(
            "running",
            KpiKind::Cumulative {
                value_column: "revenue".into(),
                period_column: "month".into(),
            },
        )];
        let (results, _) = compute_kpis(&sales(), &defs);
        let table = match &results["running"] {
            KpiValue::Table(t) => t,
            other => panic!("expected table, got {other:?}"),
        };
        assert_eq!(table.value(0, 1), &Value::Num(150.0));
        assert_eq!(table.value(1, 1), &Value::Num(300.0));
    }

    #[test]
    fn failed_kpi_does_not_abort_siblings() {
        let defs = vec![
            simple("bad", "sum(nonexistent)"),
            simple("good", "count(revenue)"),
        ];
        let (results, warnings) = compute_kpis(&sales(), &defs);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bad"));
        assert!(!results.contains_key("bad"));
        assert_eq!(results["good"], KpiValue::Scalar(Value::Int(3)));
    }
}
