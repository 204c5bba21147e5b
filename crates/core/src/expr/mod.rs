//! Sandboxed expression engine shared by business rules, calculated
//! fields, and KPI formulas.
//!
//! The grammar is deliberately small: literals, column references,
//! arithmetic, comparisons, `and`/`or`/`not`, parentheses, and a fixed
//! allow-list of reduction functions (`sum`, `mean`, `count`, `min`,
//! `max`). There is no way to reach host operations from a formula; user
//! configuration is parsed into an AST once and walked per evaluation.
//!
//! Two evaluation positions exist:
//! - **scalar** (per row): rule conditions and calculated fields. Reduction
//!   calls are rejected at compile time.
//! - **aggregate** (per dataset): KPI formulas. Column references are only
//!   legal inside a reduction call; a bare identifier resolves to a
//!   previously computed scalar KPI.

mod eval;
mod parser;
mod token;

pub use eval::{eval_aggregate, eval_scalar, eval_scalar_row, reduce, EvalError};
pub use parser::{AggFunc, BinaryOp, Expr, UnaryOp};
