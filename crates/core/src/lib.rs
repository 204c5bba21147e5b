//! Pure domain logic for the tabular reporting pipeline.
//!
//! This crate has zero internal dependencies and performs no I/O. It
//! provides:
//!
//! - [`Dataset`] — the in-memory tabular value passed between stages.
//! - [`expr`] — the sandboxed expression engine behind rule conditions,
//!   calculated fields, and KPI formulas.
//! - [`clean`] — type coercion, missing-value handling, deduplication.
//! - [`rules`] — the business-rule engine.
//! - [`kpi`] — scalar and period-table KPI computation.
//! - [`aggregate`] — group-by + multi-reducer reduction.
//! - [`config`] — the transformation-config document and its compiler.
//! - [`run`] / [`audit`] — run state machine and audit record types.

pub mod aggregate;
pub mod audit;
pub mod clean;
pub mod config;
pub mod dataset;
pub mod derive;
pub mod error;
pub mod expr;
pub mod kpi;
pub mod rules;
pub mod run;
pub mod types;
pub mod value;

pub use aggregate::{aggregate, AggregationSpec};
pub use audit::AuditRecord;
pub use clean::{clean, CleaningReport, CleaningSpec};
pub use config::{CompiledConfig, TransformationConfig};
pub use dataset::{Column, Dataset, Provenance};
pub use derive::{add_calculated_fields, CalculatedField};
pub use error::CoreError;
pub use expr::Expr;
pub use kpi::{compute_kpis, KpiDefinition, KpiValue};
pub use rules::{apply_rules, BusinessRule, RuleAction, RuleReport};
pub use run::{RunStatus, Stage};
pub use value::{DataType, Value};
