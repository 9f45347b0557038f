//! Attribute definitions.
//!
//! An attribute is a single named value computed from a stream of events:
//! which events feed it, which property it reads, how values are aggregated,
//! optional filter criteria and an optional trailing window.
use std::fmt;

use serde::{Deserialize, Serialize};

use super::period::Period;

/// How event values are folded into the attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Counter,
    Sum,
    Min,
    Max,
    Mean,
    First,
    Last,
    UniqueList,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Counter => "counter",
            Aggregation::Sum => "sum",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Mean => "mean",
            Aggregation::First => "first",
            Aggregation::Last => "last",
            Aggregation::UniqueList => "unique_list",
        }
    }

    /// First/last aggregations pick a property value and cannot work without one.
    pub fn requires_property(&self) -> bool {
        matches!(self, Aggregation::First | Aggregation::Last)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a self-describing event schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRef {
    pub vendor: String,
    /// Empty when the registry omitted it; rejected at compile time.
    #[serde(default)]
    pub name: String,
    pub version: String,
}

impl EventRef {
    pub fn new(
        vendor: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Filter operators accepted by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "in")]
    In,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::LtEq => "<=",
            Operator::GtEq => ">=",
            Operator::Like => "like",
            Operator::In => "in",
        }
    }

    /// Short form used when an operator becomes part of a column name.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::NotEq => "neq",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::LtEq => "lte",
            Operator::GtEq => "gte",
            Operator::Like => "like",
            Operator::In => "in",
        }
    }

    /// Ordering comparisons, which only make sense on numeric values.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Gt | Operator::LtEq | Operator::GtEq
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a filter condition.
///
/// Variant order matters for untagged deserialization: booleans must be
/// tried before numbers and integers before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<CriterionValue>),
}

impl CriterionValue {
    pub fn is_string(&self) -> bool {
        matches!(self, CriterionValue::String(_))
    }
}

impl fmt::Display for CriterionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriterionValue::Bool(b) => write!(f, "{}", b),
            CriterionValue::Int(i) => write!(f, "{}", i),
            CriterionValue::Float(x) => write!(f, "{}", x),
            CriterionValue::String(s) => f.write_str(s),
            CriterionValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

impl From<&str> for CriterionValue {
    fn from(v: &str) -> Self {
        CriterionValue::String(v.to_string())
    }
}

impl From<String> for CriterionValue {
    fn from(v: String) -> Self {
        CriterionValue::String(v)
    }
}

impl From<i64> for CriterionValue {
    fn from(v: i64) -> Self {
        CriterionValue::Int(v)
    }
}

impl From<i32> for CriterionValue {
    fn from(v: i32) -> Self {
        CriterionValue::Int(v.into())
    }
}

impl From<f64> for CriterionValue {
    fn from(v: f64) -> Self {
        CriterionValue::Float(v)
    }
}

impl From<bool> for CriterionValue {
    fn from(v: bool) -> Self {
        CriterionValue::Bool(v)
    }
}

impl<T: Into<CriterionValue>> From<Vec<T>> for CriterionValue {
    fn from(v: Vec<T>) -> Self {
        CriterionValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// A single `{property, operator, value}` filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub property: String,
    pub operator: Operator,
    pub value: CriterionValue,
}

impl Criterion {
    pub fn new(
        property: impl Into<String>,
        operator: Operator,
        value: impl Into<CriterionValue>,
    ) -> Self {
        Self {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::Eq, value)
    }

    pub fn neq(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::NotEq, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::Lt, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::Gt, value)
    }

    pub fn lte(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::LtEq, value)
    }

    pub fn gte(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::GtEq, value)
    }

    pub fn like(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::Like, value)
    }

    pub fn is_in(property: impl Into<String>, value: impl Into<CriterionValue>) -> Self {
        Self::new(property, Operator::In, value)
    }
}

/// AND/OR filter groups.
///
/// The registry allows only one of the two groups to hold more than one
/// condition; see [`Criteria::is_valid`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(default)]
    pub all: Vec<Criterion>,
    #[serde(default)]
    pub any: Vec<Criterion>,
}

impl Criteria {
    pub fn all(conditions: Vec<Criterion>) -> Self {
        Self {
            all: conditions,
            any: Vec::new(),
        }
    }

    pub fn any(conditions: Vec<Criterion>) -> Self {
        Self {
            all: Vec::new(),
            any: conditions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !(self.all.len() > 1 && self.any.len() > 1)
    }

    /// True when `any` is the filtering group. `all` wins whenever it has conditions.
    pub fn uses_any(&self) -> bool {
        self.all.is_empty() && !self.any.is_empty()
    }

    /// Conditions of the filtering group; the other group is ignored.
    pub fn active(&self) -> &[Criterion] {
        if self.uses_any() {
            &self.any
        } else {
            &self.all
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub property: Option<String>,
    pub events: Vec<EventRef>,
    #[serde(default)]
    pub criteria: Option<Criteria>,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, aggregation: Aggregation, events: Vec<EventRef>) -> Self {
        Self {
            name: name.into(),
            value_type: None,
            aggregation,
            property: None,
            events,
            criteria: None,
            period: None,
            description: None,
            default_value: None,
        }
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The property path, treating an empty string as absent.
    pub fn property_path(&self) -> Option<&str> {
        self.property.as_deref().filter(|p| !p.is_empty())
    }

    /// Criteria with at least one condition.
    pub fn active_criteria(&self) -> Option<&Criteria> {
        self.criteria.as_ref().filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_serde_names() {
        let agg: Aggregation = serde_json::from_str("\"unique_list\"").unwrap();
        assert_eq!(agg, Aggregation::UniqueList);
        assert_eq!(serde_json::to_string(&Aggregation::Counter).unwrap(), "\"counter\"");
    }

    #[test]
    fn test_operator_serde_symbols() {
        let op: Operator = serde_json::from_str("\"!=\"").unwrap();
        assert_eq!(op, Operator::NotEq);
        assert_eq!(serde_json::to_string(&Operator::GtEq).unwrap(), "\">=\"");
        assert!(serde_json::from_str::<Operator>("\"between\"").is_err());
    }

    #[test]
    fn test_criterion_value_untagged() {
        let v: CriterionValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, CriterionValue::Bool(true));
        let v: CriterionValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, CriterionValue::Int(3));
        let v: CriterionValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(v, CriterionValue::Float(2.5));
        let v: CriterionValue = serde_json::from_str("[\"a\", 1]").unwrap();
        assert_eq!(v, CriterionValue::from(vec![CriterionValue::from("a"), 1.into()]));
    }

    #[test]
    fn test_criteria_validity() {
        let ok = Criteria {
            all: vec![Criterion::eq("a", 1)],
            any: vec![Criterion::eq("b", 1), Criterion::eq("c", 2)],
        };
        assert!(ok.is_valid());

        let bad = Criteria {
            all: vec![Criterion::eq("a", 1), Criterion::eq("d", 1)],
            any: vec![Criterion::eq("b", 1), Criterion::eq("c", 2)],
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_all_group_takes_priority() {
        let both = Criteria {
            all: vec![Criterion::eq("a", 1)],
            any: vec![Criterion::eq("b", 1), Criterion::eq("c", 2)],
        };
        assert!(!both.uses_any());
        assert_eq!(both.active(), &[Criterion::eq("a", 1)]);

        let any = Criteria::any(vec![Criterion::eq("b", 1)]);
        assert!(any.uses_any());
        assert_eq!(any.active().len(), 1);
        assert!(Criteria::default().active().is_empty());
    }

    #[test]
    fn test_attribute_from_registry_json() {
        let json = r#"{
            "name": "purchases_last_7_days",
            "type": "int32",
            "aggregation": "counter",
            "events": [{"vendor": "com.acme", "name": "purchase", "version": "1-0-0"}],
            "criteria": {"all": [{"property": "unstruct_event_com_acme_purchase_1:total", "operator": ">", "value": 10}]},
            "period": "P7D"
        }"#;
        let attr: AttributeDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(attr.aggregation, Aggregation::Counter);
        assert_eq!(attr.property_path(), None);
        assert_eq!(attr.period, Some(Period::days(7)));
        assert_eq!(attr.active_criteria().unwrap().all.len(), 1);
    }

    #[test]
    fn test_event_without_name_deserializes_empty() {
        let json = r#"{"vendor": "com.acme", "version": "1-0-0"}"#;
        let event: EventRef = serde_json::from_str(json).unwrap();
        assert!(event.name.is_empty());
    }
}
