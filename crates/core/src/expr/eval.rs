//! Tree-walking evaluator for the expression AST.
//!
//! Null semantics: arithmetic over null yields null, comparisons where
//! either side is null are false, and logical operators require booleans
//! (anything else is a recoverable [`EvalError`]).

use indexmap::IndexMap;

use crate::dataset::{Column, Dataset};
use crate::value::Value;

use super::parser::{AggFunc, BinaryOp, Expr, UnaryOp};

/// Recoverable, per-row or per-KPI evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("unknown column \"{0}\"")]
    UnknownColumn(String),

    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("expected a boolean, got {0}")]
    NotBoolean(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("column reference \"{0}\" outside a reduction function")]
    BareColumnInAggregate(String),
}

// ---------------------------------------------------------------------------
// Scalar (per-row) evaluation
// ---------------------------------------------------------------------------

/// Evaluate an expression against one dataset row.
pub fn eval_scalar(expr: &Expr, dataset: &Dataset, row: usize) -> Result<Value, EvalError> {
    let rows = dataset.rows();
    let row_values = rows.get(row).map(Vec::as_slice).unwrap_or(&[]);
    eval_scalar_row(expr, dataset.columns(), row_values)
}

/// Evaluate an expression against a detached row (used by the rule engine,
/// where rows mutate as rules apply).
pub fn eval_scalar_row(
    expr: &Expr,
    columns: &[Column],
    row: &[Value],
) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Column(name) => {
            let idx = columns
                .iter()
                .position(|c| c.name == *name)
                .ok_or_else(|| EvalError::UnknownColumn(name.clone()))?;
            Ok(row.get(idx).cloned().unwrap_or(Value::Null))
        }
        Expr::Unary { op, expr } => {
            let value = eval_scalar_row(expr, columns, row)?;
            apply_unary(*op, value)
        }
        Expr::Binary { op, lhs, rhs } => match op {
            // Logical operators short-circuit.
            BinaryOp::And | BinaryOp::Or => {
                let left = eval_scalar_row(lhs, columns, row)?;
                eval_logical(*op, left, || eval_scalar_row(rhs, columns, row))
            }
            _ => {
                let left = eval_scalar_row(lhs, columns, row)?;
                let right = eval_scalar_row(rhs, columns, row)?;
                apply_binary(*op, left, right)
            }
        },
        // validate_scalar() rejects this at configuration time; reaching it
        // here means the caller skipped validation.
        Expr::Aggregate { func, .. } => Err(EvalError::TypeMismatch {
            op: func.as_str(),
            lhs: "reduction",
            rhs: "row",
        }),
    }
}

// ---------------------------------------------------------------------------
// Aggregate (per-dataset) evaluation
// ---------------------------------------------------------------------------

/// Evaluate a KPI formula over a whole dataset.
///
/// Reduction calls evaluate their argument per row and reduce the results;
/// a bare identifier resolves against `scalars` (previously computed scalar
/// KPIs, in declaration order).
pub fn eval_aggregate(
    expr: &Expr,
    dataset: &Dataset,
    scalars: &IndexMap<String, Value>,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Column(name) => scalars
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::BareColumnInAggregate(name.clone())),
        Expr::Unary { op, expr } => {
            let value = eval_aggregate(expr, dataset, scalars)?;
            apply_unary(*op, value)
        }
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And | BinaryOp::Or => {
                let left = eval_aggregate(lhs, dataset, scalars)?;
                eval_logical(*op, left, || eval_aggregate(rhs, dataset, scalars))
            }
            _ => {
                let left = eval_aggregate(lhs, dataset, scalars)?;
                let right = eval_aggregate(rhs, dataset, scalars)?;
                apply_binary(*op, left, right)
            }
        },
        Expr::Aggregate { func, arg } => {
            let mut values = Vec::with_capacity(dataset.row_count());
            for row in 0..dataset.row_count() {
                values.push(eval_scalar(arg, dataset, row)?);
            }
            Ok(reduce(*func, values.iter()))
        }
    }
}

/// Apply a reduction over a sequence of values. Nulls are skipped (the
/// count reducer counts non-null values); an empty input yields null for
/// every reducer except `sum` (0) and `count` (0).
pub fn reduce<'a>(func: AggFunc, values: impl Iterator<Item = &'a Value>) -> Value {
    match func {
        AggFunc::Count => {
            let n = values.filter(|v| !v.is_null()).count();
            Value::Int(n as i64)
        }
        AggFunc::Sum => {
            let mut int_sum: i64 = 0;
            let mut float_sum: f64 = 0.0;
            let mut all_int = true;
            let mut overflowed = false;
            for v in values {
                match v {
                    Value::Int(i) => {
                        float_sum += *i as f64;
                        match int_sum.checked_add(*i) {
                            Some(s) => int_sum = s,
                            None => overflowed = true,
                        }
                    }
                    Value::Num(n) => {
                        all_int = false;
                        float_sum += n;
                    }
                    _ => {}
                }
            }
            if all_int && !overflowed {
                Value::Int(int_sum)
            } else {
                Value::Num(float_sum)
            }
        }
        AggFunc::Mean => {
            let mut sum = 0.0;
            let mut n = 0usize;
            for v in values {
                if let Some(f) = v.as_f64() {
                    sum += f;
                    n += 1;
                }
            }
            if n == 0 {
                Value::Null
            } else {
                Value::Num(sum / n as f64)
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<Value> = None;
            for v in values {
                if v.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => v.clone(),
                    Some(current) => {
                        let keep_new = match v.partial_cmp_value(&current) {
                            Some(ord) => {
                                if func == AggFunc::Min {
                                    ord == std::cmp::Ordering::Less
                                } else {
                                    ord == std::cmp::Ordering::Greater
                                }
                            }
                            None => false,
                        };
                        if keep_new {
                            v.clone()
                        } else {
                            current
                        }
                    }
                });
            }
            best.unwrap_or(Value::Null)
        }
    }
}

// ---------------------------------------------------------------------------
// Operator semantics
// ---------------------------------------------------------------------------

fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Neg => match value {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Num(n) => Ok(Value::Num(-n)),
            other => Err(EvalError::TypeMismatch {
                op: "-",
                lhs: other.type_name(),
                rhs: "nothing",
            }),
        },
        UnaryOp::Not => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::NotBoolean(other.type_name())),
        },
    }
}

fn eval_logical(
    op: BinaryOp,
    left: Value,
    rhs: impl FnOnce() -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    let left_bool = match left {
        Value::Bool(b) => b,
        other => return Err(EvalError::NotBoolean(other.type_name())),
    };
    // Short-circuit without evaluating the right-hand side.
    match op {
        BinaryOp::And if !left_bool => return Ok(Value::Bool(false)),
        BinaryOp::Or if left_bool => return Ok(Value::Bool(true)),
        _ => {}
    }
    match rhs()? {
        Value::Bool(b) => Ok(Value::Bool(b)),
        other => Err(EvalError::NotBoolean(other.type_name())),
    }
}

pub(crate) fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            apply_arithmetic(op, lhs, rhs)
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Bool(false));
            }
            match lhs.partial_cmp_value(&rhs) {
                Some(ord) => {
                    let result = match op {
                        BinaryOp::Lt => ord == std::cmp::Ordering::Less,
                        BinaryOp::Le => ord != std::cmp::Ordering::Greater,
                        BinaryOp::Gt => ord == std::cmp::Ordering::Greater,
                        BinaryOp::Ge => ord != std::cmp::Ordering::Less,
                        _ => unreachable!(),
                    };
                    Ok(Value::Bool(result))
                }
                None => Err(EvalError::TypeMismatch {
                    op: op.symbol(),
                    lhs: lhs.type_name(),
                    rhs: rhs.type_name(),
                }),
            }
        }
        // Logical operators are handled by eval_logical for short-circuiting.
        BinaryOp::And | BinaryOp::Or => unreachable!("logical ops short-circuit upstream"),
    }
}

fn apply_arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }

    // String concatenation is the one non-numeric arithmetic case.
    if op == BinaryOp::Add {
        if let (Value::Str(a), Value::Str(b)) = (&lhs, &rhs) {
            return Ok(Value::Str(format!("{a}{b}")));
        }
    }

    let mismatch = || EvalError::TypeMismatch {
        op: op.symbol(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    // Integer arithmetic stays integral where exact; otherwise promote.
    if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
        return match op {
            BinaryOp::Add => Ok(a
                .checked_add(*b)
                .map(Value::Int)
                .unwrap_or(Value::Num(*a as f64 + *b as f64))),
            BinaryOp::Sub => Ok(a
                .checked_sub(*b)
                .map(Value::Int)
                .unwrap_or(Value::Num(*a as f64 - *b as f64))),
            BinaryOp::Mul => Ok(a
                .checked_mul(*b)
                .map(Value::Int)
                .unwrap_or(Value::Num(*a as f64 * *b as f64))),
            BinaryOp::Div => {
                if *b == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Value::Num(*a as f64 / *b as f64))
                }
            }
            BinaryOp::Rem => {
                if *b == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Value::Int(a % b))
                }
            }
            _ => unreachable!(),
        };
    }

    let a = lhs.as_f64().ok_or_else(mismatch)?;
    let b = rhs.as_f64().ok_or_else(mismatch)?;
    match op {
        BinaryOp::Add => Ok(Value::Num(a + b)),
        BinaryOp::Sub => Ok(Value::Num(a - b)),
        BinaryOp::Mul => Ok(Value::Num(a * b)),
        BinaryOp::Div => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Value::Num(a / b))
            }
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Value::Num(a % b))
            }
        }
        _ => unreachable!(),
    }
}

/// Equality across mismatched kinds is false rather than an error; only
/// ordering comparisons report type mismatches.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Int(a), Value::Num(b)) | (Value::Num(b), Value::Int(a)) => *a as f64 == *b,
        (a, b) => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use crate::value::DataType;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new(vec![
            Column::new("amount", DataType::Integer),
            Column::new("region", DataType::String),
            Column::new("price", DataType::Numeric),
        ]);
        ds.push_row(vec![Value::Int(100), Value::Str("west".into()), Value::Num(2.5)])
            .unwrap();
        ds.push_row(vec![Value::Int(40), Value::Str("east".into()), Value::Null])
            .unwrap();
        ds.push_row(vec![Value::Null, Value::Str("west".into()), Value::Num(1.0)])
            .unwrap();
        ds
    }

    fn eval(ds: &Dataset, input: &str, row: usize) -> Result<Value, EvalError> {
        let expr = Expr::parse(input).unwrap();
        eval_scalar(&expr, ds, row)
    }

    // -- scalar ---------------------------------------------------------------

    #[test]
    fn comparison_on_row() {
        let ds = dataset();
        assert_eq!(eval(&ds, "amount > 50", 0), Ok(Value::Bool(true)));
        assert_eq!(eval(&ds, "amount > 50", 1), Ok(Value::Bool(false)));
    }

    #[test]
    fn null_comparison_is_false() {
        let ds = dataset();
        assert_eq!(eval(&ds, "amount > 50", 2), Ok(Value::Bool(false)));
        assert_eq!(eval(&ds, "amount == 100", 2), Ok(Value::Bool(false)));
    }

    #[test]
    fn null_arithmetic_is_null() {
        let ds = dataset();
        assert_eq!(eval(&ds, "amount * 2", 2), Ok(Value::Null));
    }

    #[test]
    fn string_equality() {
        let ds = dataset();
        assert_eq!(eval(&ds, "region == 'west'", 0), Ok(Value::Bool(true)));
    }

    #[test]
    fn cross_kind_equality_is_false() {
        let ds = dataset();
        assert_eq!(eval(&ds, "region == 5", 0), Ok(Value::Bool(false)));
    }

    #[test]
    fn cross_kind_ordering_is_an_error() {
        let ds = dataset();
        assert!(matches!(
            eval(&ds, "region > 5", 0),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn logical_short_circuit_skips_rhs_error() {
        let ds = dataset();
        // region > 5 would be a type mismatch, but the false lhs short-circuits.
        assert_eq!(
            eval(&ds, "amount > 1000 and region > 5", 0),
            Ok(Value::Bool(false))
        );
    }

    #[test]
    fn logical_on_non_boolean_errors() {
        let ds = dataset();
        assert!(matches!(
            eval(&ds, "amount and true", 0),
            Err(EvalError::NotBoolean(_))
        ));
    }

    #[test]
    fn unknown_column_errors() {
        let ds = dataset();
        assert_eq!(
            eval(&ds, "missing > 1", 0),
            Err(EvalError::UnknownColumn("missing".into()))
        );
    }

    #[test]
    fn division_by_zero_errors() {
        let ds = dataset();
        assert_eq!(eval(&ds, "amount / 0", 0), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let ds = dataset();
        let expr = Expr::parse("amount * price + 1").unwrap();
        let first = eval_scalar(&expr, &ds, 0);
        let second = eval_scalar(&expr, &ds, 0);
        assert_eq!(first, second);
    }

    // -- aggregate ------------------------------------------------------------

    fn eval_agg(ds: &Dataset, input: &str) -> Result<Value, EvalError> {
        let expr = Expr::parse(input).unwrap();
        eval_aggregate(&expr, ds, &IndexMap::new())
    }

    #[test]
    fn sum_skips_nulls() {
        let ds = dataset();
        assert_eq!(eval_agg(&ds, "sum(amount)"), Ok(Value::Int(140)));
    }

    #[test]
    fn count_counts_non_null() {
        let ds = dataset();
        assert_eq!(eval_agg(&ds, "count(amount)"), Ok(Value::Int(2)));
        assert_eq!(eval_agg(&ds, "count(region)"), Ok(Value::Int(3)));
    }

    #[test]
    fn mean_of_no_values_is_null() {
        let ds = dataset();
        assert_eq!(eval_agg(&ds, "mean(region)"), Ok(Value::Null));
    }

    #[test]
    fn arithmetic_over_reductions() {
        let ds = dataset();
        assert_eq!(eval_agg(&ds, "sum(amount) / count(amount)"), Ok(Value::Num(70.0)));
    }

    #[test]
    fn reduction_of_row_expression() {
        let ds = dataset();
        // amount * price is 250.0, null, null; sum skips the nulls.
        assert_eq!(eval_agg(&ds, "sum(amount * price)"), Ok(Value::Num(250.0)));
    }

    #[test]
    fn bare_identifier_resolves_prior_scalar() {
        let ds = dataset();
        let mut scalars = IndexMap::new();
        scalars.insert("total".to_string(), Value::Int(140));
        let expr = Expr::parse("total / 2").unwrap();
        assert_eq!(eval_aggregate(&expr, &ds, &scalars), Ok(Value::Num(70.0)));
    }

    #[test]
    fn bare_identifier_without_scalar_errors() {
        let ds = dataset();
        assert!(matches!(
            eval_agg(&ds, "amount + 1"),
            Err(EvalError::BareColumnInAggregate(_))
        ));
    }

    #[test]
    fn min_max_over_mixed_numeric() {
        let ds = dataset();
        assert_eq!(eval_agg(&ds, "min(price)"), Ok(Value::Num(1.0)));
        assert_eq!(eval_agg(&ds, "max(amount)"), Ok(Value::Int(100)));
    }
}
