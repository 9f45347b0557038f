/// Modeling criteria → SQL predicate compiler.
///
/// Renders the conditions attached to a daily aggregation step as a SQL
/// boolean expression, and wraps it in the per-row expression each daily
/// aggregate folds over. Generated clauses are checked with `sqlparser`
/// before they reach a template.
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use sqlparser::tokenizer::Token;

use super::error::AutogenError;
use super::steps::{Condition, ModelingCriteria, StepAggregation};
use crate::definitions::{CriterionValue, Operator};

/// Compile both condition groups: `all` joined with AND, `any` with OR,
/// combined as `all AND (any)`. Empty criteria compile to an empty string.
pub fn compile_criteria(criteria: &ModelingCriteria, attribute: &str) -> Result<String, AutogenError> {
    let all: Vec<String> = criteria
        .all
        .iter()
        .map(|c| compile_condition(c, attribute))
        .collect::<Result<_, _>>()?;
    let any: Vec<String> = criteria
        .any
        .iter()
        .map(|c| compile_condition(c, attribute))
        .collect::<Result<_, _>>()?;

    let and_fragment = all.join(" AND ");
    let or_fragment = any.join(" OR ");

    Ok(match (and_fragment.is_empty(), or_fragment.is_empty()) {
        (false, false) => format!("{} AND ({})", and_fragment, or_fragment),
        (false, true) => and_fragment,
        (true, false) => or_fragment,
        (true, true) => String::new(),
    })
}

pub fn compile_condition(condition: &Condition, attribute: &str) -> Result<String, AutogenError> {
    let property = &condition.property;
    let value = &condition.value;

    match condition.operator {
        Operator::Eq => Ok(format!("{} = {}", property, compile_literal(value))),
        Operator::NotEq => Ok(format!(
            "({} != {} OR {} IS NULL)",
            property,
            compile_literal(value),
            property
        )),
        op @ (Operator::Lt | Operator::Gt | Operator::LtEq | Operator::GtEq) => {
            if matches!(value, CriterionValue::String(_) | CriterionValue::List(_)) {
                return Err(AutogenError::InvalidFilterOperator {
                    attribute: attribute.to_string(),
                    operator: op.to_string(),
                    value: value.to_string(),
                });
            }
            Ok(format!("{} {} {}", property, op.symbol(), compile_literal(value)))
        }
        Operator::Like => Ok(format!(
            "{} LIKE '%{}%'",
            property,
            escape_string(&value.to_string())
        )),
        Operator::In => Ok(format!("{} IN({})", property, compile_in_list(value))),
    }
}

/// Body of an `IN(...)` list. A scalar is a one-element list.
fn compile_in_list(value: &CriterionValue) -> String {
    match value {
        CriterionValue::List(items) => {
            let items: Vec<String> = items.iter().map(compile_literal).collect();
            items.join(", ")
        }
        other => compile_literal(other),
    }
}

pub fn compile_literal(value: &CriterionValue) -> String {
    match value {
        CriterionValue::Bool(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        CriterionValue::Int(i) => i.to_string(),
        CriterionValue::Float(f) => format!("{}", f),
        CriterionValue::String(s) => format!("'{}'", escape_string(s)),
        CriterionValue::List(items) => {
            let items: Vec<String> = items.iter().map(compile_literal).collect();
            format!("({})", items.join(", "))
        }
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Daily aggregate function name for a step aggregation.
pub fn daily_aggregation_type(aggregation: StepAggregation) -> &'static str {
    match aggregation {
        StepAggregation::UniqueList => "array_agg",
        other => other.as_str(),
    }
}

/// Per-row expression a daily aggregate folds over.
///
/// An empty condition means every row qualifies.
pub fn wrap_daily_aggregate(
    aggregation: StepAggregation,
    condition: &str,
    property: Option<&str>,
    attribute: &str,
) -> Result<String, AutogenError> {
    if aggregation == StepAggregation::Count {
        return Ok(if condition.is_empty() {
            "1".to_string()
        } else {
            format!("CASE WHEN {} THEN 1 ELSE 0 END", condition)
        });
    }

    let property = property.ok_or_else(|| AutogenError::MissingProperty {
        attribute: attribute.to_string(),
        aggregation: aggregation.to_string(),
    })?;

    Ok(match (aggregation, condition.is_empty()) {
        (StepAggregation::UniqueList, false) => {
            format!("DISTINCT CASE WHEN {} THEN {} ELSE NULL END", condition, property)
        }
        (StepAggregation::UniqueList, true) => format!("DISTINCT {}", property),
        (StepAggregation::Sum, false) => {
            format!("CASE WHEN {} THEN CAST({} AS FLOAT) ELSE 0 END", condition, property)
        }
        (StepAggregation::Sum, true) => format!("CAST({} AS FLOAT)", property),
        (_, false) => format!("CASE WHEN {} THEN {} ELSE NULL END", condition, property),
        (_, true) => property.to_string(),
    })
}

/// Check that `clause` parses as exactly one SQL expression.
pub fn validate_clause(clause: &str, attribute: &str) -> Result<(), AutogenError> {
    if clause.is_empty() {
        return Ok(());
    }
    let invalid = |message: String| AutogenError::InvalidGeneratedSql {
        attribute: attribute.to_string(),
        clause: clause.to_string(),
        message,
    };

    let dialect = GenericDialect {};
    let mut parser = SqlParser::new(&dialect)
        .try_with_sql(clause)
        .map_err(|e| invalid(e.to_string()))?;
    parser.parse_expr().map_err(|e| invalid(e.to_string()))?;

    let trailing = parser.peek_token();
    if trailing.token != Token::EOF {
        return Err(invalid(format!("unexpected trailing token {}", trailing.token)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(property: &str, operator: Operator, value: impl Into<CriterionValue>) -> Condition {
        Condition::new(property, operator, value.into())
    }

    #[test]
    fn test_compile_equality_quotes_strings() {
        let sql = compile_condition(&cond("country", Operator::Eq, "US"), "a").unwrap();
        assert_eq!(sql, "country = 'US'");
        let sql = compile_condition(&cond("total", Operator::Eq, 10), "a").unwrap();
        assert_eq!(sql, "total = 10");
    }

    #[test]
    fn test_compile_not_equal_includes_nulls() {
        let sql = compile_condition(&cond("country", Operator::NotEq, "US"), "a").unwrap();
        assert_eq!(sql, "(country != 'US' OR country IS NULL)");
    }

    #[test]
    fn test_compile_comparisons() {
        let sql = compile_condition(&cond("total", Operator::GtEq, 2.5), "a").unwrap();
        assert_eq!(sql, "total >= 2.5");
    }

    #[test]
    fn test_comparison_on_string_rejected() {
        let err = compile_condition(&cond("country", Operator::Lt, "US"), "spend").unwrap_err();
        assert!(matches!(err, AutogenError::InvalidFilterOperator { .. }));
        assert_eq!(err.attribute(), Some("spend"));
    }

    #[test]
    fn test_compile_like_and_in() {
        let sql = compile_condition(&cond("page_url", Operator::Like, "checkout"), "a").unwrap();
        assert_eq!(sql, "page_url LIKE '%checkout%'");
        let sql = compile_condition(&cond("event_name", Operator::In, vec!["a", "b"]), "a").unwrap();
        assert_eq!(sql, "event_name IN('a', 'b')");
        let sql = compile_condition(&cond("country", Operator::In, vec!["US", "GB"]), "a").unwrap();
        assert_eq!(sql, "country IN('US', 'GB')");
    }

    #[test]
    fn test_escapes_quotes() {
        let sql = compile_condition(&cond("name", Operator::Eq, "O'Brien"), "a").unwrap();
        assert_eq!(sql, "name = 'O''Brien'");
        let sql = compile_condition(&cond("name", Operator::In, "'x') OR (1=1"), "a").unwrap();
        assert_eq!(sql, "name IN('''x'') OR (1=1')");
    }

    #[test]
    fn test_compile_criteria_combinations() {
        let criteria = ModelingCriteria {
            all: vec![
                cond("event_name", Operator::In, vec!["click"]),
                cond("total", Operator::Gt, 1),
            ],
            any: vec![cond("a", Operator::Eq, 1), cond("b", Operator::Eq, 2)],
        };
        assert_eq!(
            compile_criteria(&criteria, "x").unwrap(),
            "event_name IN('click') AND total > 1 AND (a = 1 OR b = 2)"
        );

        let only_any = ModelingCriteria {
            all: vec![],
            any: vec![cond("a", Operator::Eq, 1), cond("b", Operator::Eq, 2)],
        };
        assert_eq!(compile_criteria(&only_any, "x").unwrap(), "a = 1 OR b = 2");
        assert_eq!(compile_criteria(&ModelingCriteria::default(), "x").unwrap(), "");
    }

    #[test]
    fn test_wrap_daily_aggregates() {
        let c = "event_name IN('click')";
        assert_eq!(
            wrap_daily_aggregate(StepAggregation::Count, c, None, "a").unwrap(),
            "CASE WHEN event_name IN('click') THEN 1 ELSE 0 END"
        );
        assert_eq!(
            wrap_daily_aggregate(StepAggregation::Sum, c, Some("price"), "a").unwrap(),
            "CASE WHEN event_name IN('click') THEN CAST(price AS FLOAT) ELSE 0 END"
        );
        assert_eq!(
            wrap_daily_aggregate(StepAggregation::Max, c, Some("price"), "a").unwrap(),
            "CASE WHEN event_name IN('click') THEN price ELSE NULL END"
        );
        assert_eq!(
            wrap_daily_aggregate(StepAggregation::UniqueList, c, Some("sku"), "a").unwrap(),
            "DISTINCT CASE WHEN event_name IN('click') THEN sku ELSE NULL END"
        );
    }

    #[test]
    fn test_wrap_requires_property() {
        assert!(matches!(
            wrap_daily_aggregate(StepAggregation::Sum, "x = 1", None, "a"),
            Err(AutogenError::MissingProperty { .. })
        ));
    }

    #[test]
    fn test_validate_clause() {
        assert!(validate_clause("event_name IN('a','b') AND (x != 'y' OR x IS NULL)", "a").is_ok());
        assert!(validate_clause("", "a").is_ok());
        assert!(matches!(
            validate_clause("x = = 1", "a"),
            Err(AutogenError::InvalidGeneratedSql { .. })
        ));
        assert!(validate_clause("x = 1 y", "a").is_err());
    }
}
