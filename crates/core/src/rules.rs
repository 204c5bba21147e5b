//! Business-rule engine: configured condition + action applied per row.
//!
//! Rules are evaluated in declaration order. Within a row, later rules see
//! the effects of earlier ones; a `Drop` action short-circuits the
//! remaining rules for that row. Actions are parsed once at configuration
//! load, never re-parsed per row.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::dataset::{Column, Dataset};
use crate::error::CoreError;
use crate::expr::{eval_scalar_row, Expr};
use crate::value::{DataType, Value};

/// Column that accumulates `Tag` labels, created on demand.
pub const TAGS_COLUMN: &str = "tags";

// ---------------------------------------------------------------------------
// Rule types
// ---------------------------------------------------------------------------

/// What a matched rule does to the row.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    /// Overwrite (or introduce) one field of the row's output copy.
    Set { field: String, value: Value },
    /// Append a label to the row's [`TAGS_COLUMN`].
    Tag { label: String },
    /// Remove the row; terminal for that row in this pass.
    Drop,
}

/// A compiled business rule.
#[derive(Debug, Clone)]
pub struct BusinessRule {
    pub name: String,
    pub condition: Expr,
    pub action: RuleAction,
}

/// Per-rule match count, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatches {
    pub rule: String,
    pub matches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rows_dropped: usize,
    pub rows_tagged: usize,
    pub matches: Vec<RuleMatches>,
    /// Per-row evaluation problems (type mismatches); the row is left
    /// unmodified by the offending rule.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply the rule list to every row.
///
/// Configuration problems (a reduction call or an unknown column reference
/// in a condition) fail fast before any row is processed. Per-row evaluation
/// errors are recoverable: the row is left unmodified by that rule and a
/// warning is recorded.
pub fn apply_rules(
    dataset: Dataset,
    rules: &[BusinessRule],
) -> Result<(Dataset, RuleReport), CoreError> {
    validate_rules(&dataset, rules)?;

    let mut columns = dataset.columns().to_vec();
    let needs_tags = rules
        .iter()
        .any(|r| matches!(r.action, RuleAction::Tag { .. }))
        && !columns.iter().any(|c| c.name == TAGS_COLUMN);
    if needs_tags {
        columns.push(Column::new(TAGS_COLUMN, DataType::String));
    }
    for rule in rules {
        if let RuleAction::Set { field, value } = &rule.action {
            if !columns.iter().any(|c| c.name == *field) {
                columns.push(Column::new(field.clone(), set_column_type(value)));
            }
        }
    }

    let width = columns.len();
    // Column each action writes to, resolved once.
    let action_targets: Vec<Option<usize>> = rules
        .iter()
        .map(|rule| match &rule.action {
            RuleAction::Set { field, .. } => columns.iter().position(|c| c.name == *field),
            RuleAction::Tag { .. } => columns.iter().position(|c| c.name == TAGS_COLUMN),
            RuleAction::Drop => None,
        })
        .collect();
    let mut report = RuleReport {
        matches: rules
            .iter()
            .map(|r| RuleMatches {
                rule: r.name.clone(),
                matches: 0,
            })
            .collect(),
        ..RuleReport::default()
    };

    let mut out_rows = Vec::with_capacity(dataset.row_count());
    'rows: for (row_idx, row) in dataset.into_rows().into_iter().enumerate() {
        let mut row = row;
        row.resize(width, Value::Null);
        let mut tagged = false;

        for (rule_idx, rule) in rules.iter().enumerate() {
            let matched = match eval_scalar_row(&rule.condition, &columns, &row) {
                Ok(Value::Bool(b)) => b,
                Ok(Value::Null) => false,
                Ok(other) => {
                    report.warnings.push(format!(
                        "Rule \"{}\" row {row_idx}: condition produced {}, expected boolean",
                        rule.name,
                        other.type_name()
                    ));
                    false
                }
                Err(err) => {
                    report.warnings.push(format!(
                        "Rule \"{}\" row {row_idx}: {err}",
                        rule.name
                    ));
                    false
                }
            };
            if !matched {
                continue;
            }
            report.matches[rule_idx].matches += 1;

            match &rule.action {
                RuleAction::Drop => {
                    report.rows_dropped += 1;
                    continue 'rows;
                }
                RuleAction::Set { value, .. } => {
                    if let Some(idx) = action_targets[rule_idx] {
                        row[idx] = value.clone();
                    }
                }
                RuleAction::Tag { label } => {
                    if let Some(idx) = action_targets[rule_idx] {
                        row[idx] = match &row[idx] {
                            Value::Str(existing) if !existing.is_empty() => {
                                Value::Str(format!("{existing},{label}"))
                            }
                            _ => Value::Str(label.clone()),
                        };
                        if !tagged {
                            tagged = true;
                            report.rows_tagged += 1;
                        }
                    }
                }
            }
        }

        out_rows.push(row);
    }

    Ok((Dataset::from_parts(columns, out_rows), report))
}

/// Fail fast on invalid rule configuration: reductions in conditions and
/// references to columns that neither the schema nor an earlier rule's
/// action provides.
fn validate_rules(dataset: &Dataset, rules: &[BusinessRule]) -> Result<(), CoreError> {
    let mut known: BTreeSet<String> = dataset
        .columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    for rule in rules {
        rule.condition
            .validate_scalar()
            .map_err(|msg| CoreError::Config(format!("Rule \"{}\": {msg}", rule.name)))?;
        let mut refs = BTreeSet::new();
        rule.condition.column_refs(&mut refs);
        for reference in refs {
            if !known.contains(&reference) {
                return Err(CoreError::Config(format!(
                    "Rule \"{}\" references unknown column \"{reference}\"",
                    rule.name
                )));
            }
        }
        match &rule.action {
            RuleAction::Set { field, .. } => {
                known.insert(field.clone());
            }
            RuleAction::Tag { .. } => {
                known.insert(TAGS_COLUMN.to_string());
            }
            RuleAction::Drop => {}
        }
    }
    Ok(())
}

fn set_column_type(value: &Value) -> DataType {
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

    fn rule(name: &str, condition: &str, action: RuleAction) -> BusinessRule {
        BusinessRule {
            name: name.to_string(),
            condition: Expr::parse(condition).unwrap(),
            action,
        }
    }

    fn orders() -> Dataset {
        let mut ds = Dataset::new(vec![
            Column::new("amount", DataType::Integer),
            Column::new("region", DataType::String),
        ]);
        ds.push_row(vec![Value::Int(1500), Value::Str("west".into())])
            .unwrap();
        ds.push_row(vec![Value::Int(200), Value::Str("east".into())])
            .unwrap();
        ds.push_row(vec![Value::Int(900), Value::Str("west".into())])
            .unwrap();
        ds
    }

    #[test]
    fn set_action_creates_and_fills_column() {
        let rules = vec![rule(
            "high value",
            "amount > 1000",
            RuleAction::Set {
                field: "category".into(),
                value: Value::Str("High Value".into()),
            },
        )];
        let (ds, report) = apply_rules(orders(), &rules).unwrap();
        let idx = ds.column_index("category").unwrap();
        assert_eq!(ds.value(0, idx), &Value::Str("High Value".into()));
        assert_eq!(ds.value(1, idx), &Value::Null);
        assert_eq!(report.matches[0].matches, 1);
    }

    #[test]
    fn drop_action_removes_rows() {
        let rules = vec![rule("small orders", "amount < 500", RuleAction::Drop)];
        let (ds, report) = apply_rules(orders(), &rules).unwrap();
        assert_eq!(ds.row_count(), 2);
        assert_eq!(report.rows_dropped, 1);
    }

    #[test]
    fn drop_short_circuits_later_rules() {
        let rules = vec![
            rule("drop west", "region == 'west'", RuleAction::Drop),
            rule(
                "mark west",
                "region == 'west'",
                RuleAction::Set {
                    field: "category".into(),
                    value: Value::Str("should not happen".into()),
                },
            ),
        ];
        let (ds, report) = apply_rules(orders(), &rules).unwrap();
        assert_eq!(ds.row_count(), 1);
        assert_eq!(report.rows_dropped, 2);
        // The second rule never saw the dropped rows.
        assert_eq!(report.matches[1].matches, 0);
    }

    #[test]
    fn later_rule_sees_earlier_set() {
        let rules = vec![
            rule(
                "categorise",
                "amount > 1000",
                RuleAction::Set {
                    field: "category".into(),
                    value: Value::Str("big".into()),
                },
            ),
            rule(
                "tag big",
                "category == 'big'",
                RuleAction::Tag {
                    label: "priority".into(),
                },
            ),
        ];
        let (ds, report) = apply_rules(orders(), &rules).unwrap();
        let idx = ds.column_index(TAGS_COLUMN).unwrap();
        assert_eq!(ds.value(0, idx), &Value::Str("priority".into()));
        assert_eq!(report.rows_tagged, 1);
    }

    #[test]
    fn tags_accumulate_comma_separated() {
        let rules = vec![
            rule("t1", "amount > 100", RuleAction::Tag { label: "a".into() }),
            rule("t2", "amount > 100", RuleAction::Tag { label: "b".into() }),
        ];
        let (ds, report) = apply_rules(orders(), &rules).unwrap();
        let idx = ds.column_index(TAGS_COLUMN).unwrap();
        assert_eq!(ds.value(0, idx), &Value::Str("a,b".into()));
        // Three rows tagged, each counted once.
        assert_eq!(report.rows_tagged, 3);
    }

    #[test]
    fn unknown_column_fails_fast() {
        let rules = vec![rule("bad", "missing > 1", RuleAction::Drop)];
        assert!(matches!(
            apply_rules(orders(), &rules),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn reduction_in_condition_fails_fast() {
        let rules = vec![rule("bad", "sum(amount) > 1", RuleAction::Drop)];
        assert!(matches!(
            apply_rules(orders(), &rules),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn type_mismatch_is_recoverable_per_row() {
        let rules = vec![rule("odd", "region > 5", RuleAction::Drop)];
        let (ds, report) = apply_rules(orders(), &rules).unwrap();
        // No rows dropped; every row recorded a warning instead.
        assert_eq!(ds.row_count(), 3);
        assert_eq!(report.warnings.len(), 3);
        assert_eq!(report.rows_dropped, 0);
    }

    #[test]
    fn determinism_across_repeated_runs() {
        let rules = vec![
            rule("drop small", "amount < 500", RuleAction::Drop),
            rule("tag west", "region == 'west'", RuleAction::Tag { label: "w".into() }),
        ];
        let (first_ds, first_report) = apply_rules(orders(), &rules).unwrap();
        let (second_ds, second_report) = apply_rules(orders(), &rules).unwrap();
        assert_eq!(first_ds, second_ds);
        assert_eq!(first_report, second_report);
    }
}
