//! Group-by + multi-reducer aggregation.
//!
//! Output partitions follow first-appearance order of each distinct
//! group-by key tuple — stable and deterministic, never sorted.

use indexmap::IndexMap;

use crate::dataset::{Column, Dataset};
use crate::error::CoreError;
use crate::expr::{reduce, AggFunc};
use crate::value::{DataType, GroupKey, Value};

/// Group-by columns plus the reducers to apply per value column.
/// Reducer names are resolved to [`AggFunc`] at configuration load, so an
/// unknown reducer never reaches this stage.
#[derive(Debug, Clone)]
pub struct AggregationSpec {
    pub group_by: Vec<String>,
    pub aggregations: IndexMap<String, Vec<AggFunc>>,
}

/// Partition rows by the group-by tuple and reduce each requested column.
///
/// Output columns are the group-by columns followed by one
/// `<column>_<reducer>` column per requested reducer, in spec order.
pub fn aggregate(dataset: &Dataset, spec: &AggregationSpec) -> Result<Dataset, CoreError> {
    if spec.group_by.is_empty() {
        return Err(CoreError::Config(
            "Aggregation requires at least one group_by column".into(),
        ));
    }

    let key_indices: Vec<usize> = spec
        .group_by
        .iter()
        .map(|name| {
            dataset.column_index(name).ok_or_else(|| {
                CoreError::Config(format!("Group-by column \"{name}\" is not a column"))
            })
        })
        .collect::<Result<_, _>>()?;

    let value_indices: Vec<usize> = spec
        .aggregations
        .keys()
        .map(|name| {
            dataset.column_index(name).ok_or_else(|| {
                CoreError::Config(format!("Aggregation column \"{name}\" is not a column"))
            })
        })
        .collect::<Result<_, _>>()?;

    // Partition row indices by key tuple, first appearance first.
    let mut partitions: IndexMap<Vec<GroupKey>, (Vec<Value>, Vec<usize>)> = IndexMap::new();
    for (row_idx, row) in dataset.rows().iter().enumerate() {
        let key: Vec<GroupKey> = key_indices.iter().map(|i| row[*i].group_key()).collect();
        partitions
            .entry(key)
            .or_insert_with(|| {
                let key_values = key_indices.iter().map(|i| row[*i].clone()).collect();
                (key_values, Vec::new())
            })
            .1
            .push(row_idx);
    }

    // Output schema: group-by columns keep their input types; reduced
    // columns are numeric except count (integer) and min/max (input type).
    let mut columns: Vec<Column> = key_indices
        .iter()
        .map(|i| dataset.columns()[*i].clone())
        .collect();
    for ((name, funcs), value_idx) in spec.aggregations.iter().zip(&value_indices) {
        for func in funcs {
            let data_type = match func {
                AggFunc::Count => DataType::Integer,
                AggFunc::Min | AggFunc::Max => dataset.columns()[*value_idx].data_type,
                AggFunc::Sum | AggFunc::Mean => DataType::Numeric,
            };
            columns.push(Column::new(format!("{name}_{}", func.as_str()), data_type));
        }
    }

    let mut out = Dataset::new(columns);
    for (key_values, row_indices) in partitions.into_values() {
        let mut row = key_values;
        for (funcs, value_idx) in spec.aggregations.values().zip(&value_indices) {
            for func in funcs {
                let reduced = reduce(
                    *func,
                    row_indices.iter().map(|r| dataset.value(*r, *value_idx)),
                );
                row.push(reduced);
            }
        }
        out.push_row(row)?;
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> Dataset {
        let mut ds = Dataset::new(vec![
            Column::new("region", DataType::String),
            Column::new("amt", DataType::Integer),
        ]);
        ds.push_row(vec![Value::Str("west".into()), Value::Int(5)])
            .unwrap();
        ds.push_row(vec![Value::Str("east".into()), Value::Int(3)])
            .unwrap();
        ds.push_row(vec![Value::Str("west".into()), Value::Int(2)])
            .unwrap();
        ds
    }

    fn spec(group_by: &[&str], column: &str, funcs: &[AggFunc]) -> AggregationSpec {
        let mut aggregations = IndexMap::new();
        aggregations.insert(column.to_string(), funcs.to_vec());
        AggregationSpec {
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            aggregations,
        }
    }

    #[test]
    fn groups_in_first_appearance_order() {
        let out = aggregate(&regions(), &spec(&["region"], "amt", &[AggFunc::Sum])).unwrap();
        assert_eq!(out.row_count(), 2);
        // west appears first in the input, so it leads the output.
        assert_eq!(out.value(0, 0), &Value::Str("west".into()));
        assert_eq!(out.value(0, 1), &Value::Int(7));
        assert_eq!(out.value(1, 0), &Value::Str("east".into()));
        assert_eq!(out.value(1, 1), &Value::Int(3));
    }

    #[test]
    fn multiple_reducers_per_column() {
        let out = aggregate(
            &regions(),
            &spec(&["region"], "amt", &[AggFunc::Sum, AggFunc::Count, AggFunc::Mean]),
        )
        .unwrap();
        let names: Vec<&str> = out.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["region", "amt_sum", "amt_count", "amt_mean"]);
        assert_eq!(out.value(0, 2), &Value::Int(2));
        assert_eq!(out.value(0, 3), &Value::Num(3.5));
    }

    #[test]
    fn null_key_forms_its_own_group() {
        let mut ds = regions();
        ds.push_row(vec![Value::Null, Value::Int(9)]).unwrap();
        let out = aggregate(&ds, &spec(&["region"], "amt", &[AggFunc::Sum])).unwrap();
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.value(2, 0), &Value::Null);
        assert_eq!(out.value(2, 1), &Value::Int(9));
    }

    #[test]
    fn unknown_group_column_is_config_error() {
        let err = aggregate(&regions(), &spec(&["nope"], "amt", &[AggFunc::Sum]));
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn unknown_value_column_is_config_error() {
        let err = aggregate(&regions(), &spec(&["region"], "nope", &[AggFunc::Sum]));
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn empty_group_by_is_config_error() {
        let err = aggregate(&regions(), &spec(&[], "amt", &[AggFunc::Sum]));
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn min_max_keep_column_type() {
        let out = aggregate(
            &regions(),
            &spec(&["region"], "amt", &[AggFunc::Min, AggFunc::Max]),
        )
        .unwrap();
        assert_eq!(out.columns()[1].data_type, DataType::Integer);
        assert_eq!(out.value(0, 1), &Value::Int(2));
        assert_eq!(out.value(0, 2), &Value::Int(5));
    }
}
