//! Transformation configuration: the JSON document operators author, and
//! its compilation into typed stage specs.
//!
//! Unknown top-level keys are ignored; missing sections fall back to the
//! documented defaults (no coercion, no dedup, no rules). Everything
//! user-authored (expressions, actions, reducer names) is parsed and
//! validated here, once, before any row is processed.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::aggregate::AggregationSpec;
use crate::clean::{CleaningSpec, DedupSpec, FillStatistic, MissingValueStrategy};
use crate::derive::CalculatedField;
use crate::error::CoreError;
use crate::expr::{AggFunc, Expr};
use crate::kpi::{KpiDefinition, KpiKind};
use crate::rules::{BusinessRule, RuleAction};
use crate::value::{DataType, Value};

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

/// The transformation-config document as authored (JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct TransformationConfig {
    /// Lowercase/underscore column names during cleaning.
    #[serde(default = "default_true")]
    pub standardize_columns: bool,

    /// Column → declared coercion target.
    #[serde(default)]
    pub type_mapping: IndexMap<String, DataType>,

    /// Column → missing-value strategy.
    #[serde(default)]
    pub missing_value_strategy: IndexMap<String, MissingValueConfig>,

    /// Strategy for columns without an explicit entry (default: leave null).
    #[serde(default)]
    pub missing_value_default: Option<MissingValueConfig>,

    /// Enable duplicate removal.
    #[serde(default)]
    pub remove_duplicates: bool,

    /// Key columns for deduplication; full-row equality when absent.
    #[serde(default)]
    pub dedup_keys: Option<Vec<String>>,

    /// New column → per-row formula, applied in declaration order.
    #[serde(default)]
    pub calculated_fields: IndexMap<String, String>,

    /// Ordered business rules.
    #[serde(default)]
    pub business_rules: Vec<BusinessRuleConfig>,

    /// KPI name → definition.
    #[serde(default)]
    pub kpi_config: IndexMap<String, KpiConfig>,

    /// Group-by columns for the aggregation stage.
    #[serde(default)]
    pub group_by: Vec<String>,

    /// Column → one or more reducer names.
    #[serde(default)]
    pub aggregations: IndexMap<String, OneOrMany>,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            standardize_columns: true,
            type_mapping: IndexMap::new(),
            missing_value_strategy: IndexMap::new(),
            missing_value_default: None,
            remove_duplicates: false,
            dedup_keys: None,
            calculated_fields: IndexMap::new(),
            business_rules: Vec::new(),
            kpi_config: IndexMap::new(),
            group_by: Vec::new(),
            aggregations: IndexMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A missing-value strategy as written in config:
/// `"drop_row"`, `"leave_null"`, `{"fill_default": <scalar>}`, or
/// `{"fill_statistic": "mean" | "median" | "mode"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValueConfig {
    DropRow,
    LeaveNull,
    FillDefault(serde_json::Value),
    FillStatistic(FillStatistic),
}

impl MissingValueConfig {
    fn to_strategy(&self, column: &str) -> Result<MissingValueStrategy, CoreError> {
        match self {
            Self::DropRow => Ok(MissingValueStrategy::DropRow),
            Self::LeaveNull => Ok(MissingValueStrategy::LeaveNull),
            Self::FillDefault(json) => Value::from_json(json)
                .map(MissingValueStrategy::FillDefault)
                .ok_or_else(|| {
                    CoreError::Config(format!(
                        "Fill value for column \"{column}\" must be a scalar"
                    ))
                }),
            Self::FillStatistic(stat) => Ok(MissingValueStrategy::FillStatistic(*stat)),
        }
    }
}

/// A business rule as written in config. The action is a tagged value
/// (`"drop"`, `{"tag": ...}`, `{"set": {"field": ..., "value": ...}}`), so
/// multi-word values need no escaping.
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessRuleConfig {
    #[serde(default)]
    pub name: String,
    pub condition: String,
    pub action: RuleActionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionConfig {
    Drop,
    Tag(String),
    Set {
        field: String,
        value: serde_json::Value,
    },
}

/// A KPI definition as written in config, discriminated by `"type"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KpiConfig {
    Simple {
        formula: String,
    },
    Ratio {
        numerator: String,
        denominator: String,
    },
    Growth {
        value_column: String,
        period_column: String,
    },
    Cumulative {
        value_column: String,
        period_column: String,
    },
}

/// One reducer name or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn names(&self) -> Vec<&str> {
        match self {
            Self::One(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Typed, validated stage specs derived from a [`TransformationConfig`].
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub cleaning: CleaningSpec,
    pub calculated_fields: Vec<CalculatedField>,
    pub rules: Vec<BusinessRule>,
    pub kpis: Vec<KpiDefinition>,
    pub aggregation: Option<AggregationSpec>,
}

impl TransformationConfig {
    /// Parse a config document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text)
            .map_err(|e| CoreError::Config(format!("Invalid transformation config: {e}")))
    }

    /// Compile the document into typed stage specs.
    ///
    /// All expression parsing and reducer-name resolution happens here;
    /// any failure is a fatal configuration error surfaced before a run
    /// touches a single row.
    pub fn compile(&self) -> Result<CompiledConfig, CoreError> {
        let cleaning = self.compile_cleaning()?;
        let calculated_fields = self.compile_calculated_fields()?;
        let rules = self.compile_rules()?;
        let kpis = self.compile_kpis()?;
        let aggregation = self.compile_aggregation()?;

        Ok(CompiledConfig {
            cleaning,
            calculated_fields,
            rules,
            kpis,
            aggregation,
        })
    }

    fn compile_cleaning(&self) -> Result<CleaningSpec, CoreError> {
        let mut missing_values = IndexMap::new();
        for (column, config) in &self.missing_value_strategy {
            missing_values.insert(column.clone(), config.to_strategy(column)?);
        }
        let default_strategy = match &self.missing_value_default {
            Some(config) => config.to_strategy("<default>")?,
            None => MissingValueStrategy::LeaveNull,
        };
        let dedup = match (self.remove_duplicates, &self.dedup_keys) {
            (false, None) => DedupSpec::Off,
            (_, Some(keys)) if !keys.is_empty() => DedupSpec::Keys(keys.clone()),
            _ => DedupSpec::FullRow,
        };

        Ok(CleaningSpec {
            standardize_columns: self.standardize_columns,
            type_mapping: self.type_mapping.clone(),
            missing_values,
            default_strategy,
            dedup,
        })
    }

    fn compile_calculated_fields(&self) -> Result<Vec<CalculatedField>, CoreError> {
        self.calculated_fields
            .iter()
            .map(|(name, formula)| {
                let expr = Expr::parse(formula).map_err(|msg| {
                    CoreError::Config(format!("Calculated field \"{name}\": {msg}"))
                })?;
                expr.validate_scalar().map_err(|msg| {
                    CoreError::Config(format!("Calculated field \"{name}\": {msg}"))
                })?;
                Ok(CalculatedField {
                    name: name.clone(),
                    formula: expr,
                })
            })
            .collect()
    }

    fn compile_rules(&self) -> Result<Vec<BusinessRule>, CoreError> {
        self.business_rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                let name = if rule.name.is_empty() {
                    format!("rule_{}", idx + 1)
                } else {
                    rule.name.clone()
                };
                let condition = Expr::parse(&rule.condition)
                    .map_err(|msg| CoreError::Config(format!("Rule \"{name}\": {msg}")))?;
                condition
                    .validate_scalar()
                    .map_err(|msg| CoreError::Config(format!("Rule \"{name}\": {msg}")))?;
                let action = match &rule.action {
                    RuleActionConfig::Drop => RuleAction::Drop,
                    RuleActionConfig::Tag(label) => RuleAction::Tag {
                        label: label.clone(),
                    },
                    RuleActionConfig::Set { field, value } => {
                        let value = Value::from_json(value).ok_or_else(|| {
                            CoreError::Config(format!(
                                "Rule \"{name}\": set value for \"{field}\" must be a scalar"
                            ))
                        })?;
                        RuleAction::Set {
                            field: field.clone(),
                            value,
                        }
                    }
                };
                Ok(BusinessRule {
                    name,
                    condition,
                    action,
                })
            })
            .collect()
    }

    fn compile_kpis(&self) -> Result<Vec<KpiDefinition>, CoreError> {
        self.kpi_config
            .iter()
            .map(|(name, config)| {
                let kind = match config {
                    KpiConfig::Simple { formula } => {
                        let expr = Expr::parse(formula)
                            .map_err(|msg| CoreError::Config(format!("KPI \"{name}\": {msg}")))?;
                        expr.validate_aggregate()
                            .map_err(|msg| CoreError::Config(format!("KPI \"{name}\": {msg}")))?;
                        KpiKind::Simple { formula: expr }
                    }
                    KpiConfig::Ratio {
                        numerator,
                        denominator,
                    } => {
                        let parse = |text: &str, part: &str| {
                            let expr = Expr::parse(text).map_err(|msg| {
                                CoreError::Config(format!("KPI \"{name}\" {part}: {msg}"))
                            })?;
                            expr.validate_aggregate().map_err(|msg| {
                                CoreError::Config(format!("KPI \"{name}\" {part}: {msg}"))
                            })?;
                            Ok::<_, CoreError>(expr)
                        };
                        KpiKind::Ratio {
                            numerator: parse(numerator, "numerator")?,
                            denominator: parse(denominator, "denominator")?,
                        }
                    }
                    KpiConfig::Growth {
                        value_column,
                        period_column,
                    } => KpiKind::Growth {
                        value_column: value_column.clone(),
                        period_column: period_column.clone(),
                    },
                    KpiConfig::Cumulative {
                        value_column,
                        period_column,
                    } => KpiKind::Cumulative {
                        value_column: value_column.clone(),
                        period_column: period_column.clone(),
                    },
                };
                Ok(KpiDefinition {
                    name: name.clone(),
                    kind,
                })
            })
            .collect()
    }

    fn compile_aggregation(&self) -> Result<Option<AggregationSpec>, CoreError> {
        if self.aggregations.is_empty() {
            return Ok(None);
        }
        if self.group_by.is_empty() {
            return Err(CoreError::Config(
                "aggregations require at least one group_by column".into(),
            ));
        }
        let mut aggregations = IndexMap::new();
        for (column, reducers) in &self.aggregations {
            let funcs: Vec<AggFunc> = reducers
                .names()
                .into_iter()
                .map(|reducer| {
                    AggFunc::parse(reducer).ok_or_else(|| {
                        CoreError::Config(format!(
                            "Unknown reducer \"{reducer}\" for column \"{column}\""
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;
            aggregations.insert(column.clone(), funcs);
        }
        Ok(Some(AggregationSpec {
            group_by: self.group_by.clone(),
            aggregations,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_compiles_to_defaults() {
        let config = TransformationConfig::from_json("{}").unwrap();
        let compiled = config.compile().unwrap();
        assert!(compiled.cleaning.type_mapping.is_empty());
        assert_eq!(compiled.cleaning.dedup, DedupSpec::Off);
        assert!(compiled.rules.is_empty());
        assert!(compiled.kpis.is_empty());
        assert!(compiled.aggregation.is_none());
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let config =
            TransformationConfig::from_json(r#"{"some_future_section": {"a": 1}}"#).unwrap();
        assert!(config.compile().is_ok());
    }

    #[test]
    fn full_document_compiles() {
        let text = r#"{
            "type_mapping": {"date": "datetime", "sales_amount": "numeric", "quantity": "integer"},
            "missing_value_strategy": {
                "region": {"fill_default": "Unknown"},
                "sales_amount": {"fill_statistic": "mean"},
                "order_id": "drop_row"
            },
            "remove_duplicates": true,
            "dedup_keys": ["order_id"],
            "calculated_fields": {"unit_price": "sales_amount / quantity"},
            "business_rules": [
                {"name": "high value", "condition": "sales_amount > 1200",
                 "action": {"set": {"field": "category", "value": "High Value"}}},
                {"condition": "quantity <= 0", "action": "drop"},
                {"name": "west watch", "condition": "region == 'west'", "action": {"tag": "watch"}}
            ],
            "kpi_config": {
                "total_revenue": {"type": "simple", "formula": "sum(sales_amount)"},
                "profit_margin": {"type": "ratio", "numerator": "sum(profit)", "denominator": "sum(sales_amount)"},
                "monthly_growth": {"type": "growth", "value_column": "sales_amount", "period_column": "month"}
            },
            "group_by": ["region"],
            "aggregations": {"sales_amount": ["sum", "mean"], "quantity": "count"}
        }"#;
        let config = TransformationConfig::from_json(text).unwrap();
        let compiled = config.compile().unwrap();

        assert_eq!(compiled.cleaning.type_mapping["date"], DataType::Datetime);
        assert_eq!(compiled.cleaning.dedup, DedupSpec::Keys(vec!["order_id".into()]));
        assert_eq!(compiled.calculated_fields.len(), 1);
        assert_eq!(compiled.rules.len(), 3);
        assert_eq!(compiled.rules[1].name, "rule_2");
        assert!(matches!(compiled.rules[0].action, RuleAction::Set { .. }));
        assert_eq!(compiled.kpis.len(), 3);
        let agg = compiled.aggregation.unwrap();
        assert_eq!(agg.group_by, vec!["region".to_string()]);
        assert_eq!(agg.aggregations["sales_amount"], vec![AggFunc::Sum, AggFunc::Mean]);
        assert_eq!(agg.aggregations["quantity"], vec![AggFunc::Count]);
    }

    #[test]
    fn multi_word_set_value_survives() {
        let text = r#"{"business_rules": [
            {"name": "r", "condition": "a > 1",
             "action": {"set": {"field": "category", "value": "High Value"}}}
        ]}"#;
        let compiled = TransformationConfig::from_json(text).unwrap().compile().unwrap();
        match &compiled.rules[0].action {
            RuleAction::Set { value, .. } => {
                assert_eq!(value, &Value::Str("High Value".into()));
            }
            other => panic!("expected set action, got {other:?}"),
        }
    }

    #[test]
    fn unknown_reducer_is_config_error() {
        let text = r#"{"group_by": ["region"], "aggregations": {"amt": "median"}}"#;
        let err = TransformationConfig::from_json(text).unwrap().compile();
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn aggregations_without_group_by_is_config_error() {
        let text = r#"{"aggregations": {"amt": "sum"}}"#;
        let err = TransformationConfig::from_json(text).unwrap().compile();
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn unparseable_rule_condition_is_config_error() {
        let text = r#"{"business_rules": [{"name": "r", "condition": "a >", "action": "drop"}]}"#;
        let err = TransformationConfig::from_json(text).unwrap().compile();
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn reduction_in_rule_condition_is_config_error() {
        let text =
            r#"{"business_rules": [{"name": "r", "condition": "sum(a) > 1", "action": "drop"}]}"#;
        let err = TransformationConfig::from_json(text).unwrap().compile();
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn unknown_kpi_type_is_config_error() {
        let text = r#"{"kpi_config": {"x": {"type": "percentile", "formula": "sum(a)"}}}"#;
        assert!(TransformationConfig::from_json(text).is_err());
    }

    #[test]
    fn invalid_type_mapping_target_is_config_error() {
        let text = r#"{"type_mapping": {"a": "decimal"}}"#;
        assert!(TransformationConfig::from_json(text).is_err());
    }

    #[test]
    fn remove_duplicates_without_keys_uses_full_row() {
        let text = r#"{"remove_duplicates": true}"#;
        let compiled = TransformationConfig::from_json(text).unwrap().compile().unwrap();
        assert_eq!(compiled.cleaning.dedup, DedupSpec::FullRow);
    }
}
