//! Modeling steps: the three-stage materialization plan of one attribute.
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::AutogenError;
use crate::definitions::{Aggregation, Criterion, CriterionValue, Operator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    FilteredEvents,
    DailyAggregation,
    AttributeAggregation,
}

impl StepType {
    /// Pipeline order.
    pub const ORDER: [StepType; 3] = [
        StepType::FilteredEvents,
        StepType::DailyAggregation,
        StepType::AttributeAggregation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::FilteredEvents => "filtered_events",
            StepType::DailyAggregation => "daily_aggregation",
            StepType::AttributeAggregation => "attribute_aggregation",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL-oriented aggregation name carried by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAggregation {
    Count,
    Sum,
    Min,
    Max,
    First,
    Last,
    UniqueList,
}

impl StepAggregation {
    /// Short name for a declared aggregation; `None` for ones batch
    /// generation cannot express.
    pub fn from_declared(aggregation: Aggregation) -> Option<Self> {
        match aggregation {
            Aggregation::Counter => Some(StepAggregation::Count),
            Aggregation::Sum => Some(StepAggregation::Sum),
            Aggregation::Min => Some(StepAggregation::Min),
            Aggregation::Max => Some(StepAggregation::Max),
            Aggregation::First => Some(StepAggregation::First),
            Aggregation::Last => Some(StepAggregation::Last),
            Aggregation::UniqueList => Some(StepAggregation::UniqueList),
            Aggregation::Mean => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepAggregation::Count => "count",
            StepAggregation::Sum => "sum",
            StepAggregation::Min => "min",
            StepAggregation::Max => "max",
            StepAggregation::First => "first",
            StepAggregation::Last => "last",
            StepAggregation::UniqueList => "unique_list",
        }
    }

    pub fn is_positional(&self) -> bool {
        matches!(self, StepAggregation::First | StepAggregation::Last)
    }

    /// Aggregation applied over daily rows: daily counts are summed, not re-counted.
    pub fn rollup(&self) -> Self {
        match self {
            StepAggregation::Count => StepAggregation::Sum,
            other => *other,
        }
    }
}

impl fmt::Display for StepAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter condition over columns of the filtered-events table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub property: String,
    pub operator: Operator,
    pub value: CriterionValue,
}

impl Condition {
    pub fn new(property: impl Into<String>, operator: Operator, value: CriterionValue) -> Self {
        Self {
            property: property.into(),
            operator,
            value,
        }
    }

    /// Rebind a declared criterion onto a resolved column name.
    pub fn from_criterion(criterion: &Criterion, column: impl Into<String>) -> Self {
        Self::new(column, criterion.operator, criterion.value.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelingCriteria {
    #[serde(default)]
    pub all: Vec<Condition>,
    #[serde(default)]
    pub any: Vec<Condition>,
}

impl ModelingCriteria {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }

    /// First condition on `property`, searching `all` before `any`.
    pub fn find(&self, property: &str) -> Option<&Condition> {
        self.all
            .iter()
            .find(|c| c.property == property)
            .or_else(|| self.any.iter().find(|c| c.property == property))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelingStep {
    pub step_type: StepType,
    pub enabled: bool,
    pub aggregation: Option<StepAggregation>,
    pub column_name: Option<String>,
    pub modeling_criteria: Option<ModelingCriteria>,
}

/// The three steps compiled for one attribute.
///
/// Serialized as a `[filtered_events, daily_aggregation, attribute_aggregation]` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ModelingStep>", into = "Vec<ModelingStep>")]
pub struct AttributeSteps {
    pub filtered_events: ModelingStep,
    pub daily_aggregation: ModelingStep,
    pub attribute_aggregation: ModelingStep,
}

impl AttributeSteps {
    /// Name of the attribute these steps materialize.
    pub fn attribute_name(&self) -> &str {
        self.attribute_aggregation
            .column_name
            .as_deref()
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelingStep> {
        [
            &self.filtered_events,
            &self.daily_aggregation,
            &self.attribute_aggregation,
        ]
        .into_iter()
    }
}

impl TryFrom<Vec<ModelingStep>> for AttributeSteps {
    type Error = AutogenError;

    fn try_from(steps: Vec<ModelingStep>) -> Result<Self, Self::Error> {
        let found: Vec<StepType> = steps.iter().map(|s| s.step_type).collect();
        if found != StepType::ORDER {
            let names: Vec<&str> = found.iter().map(StepType::as_str).collect();
            return Err(AutogenError::MalformedSteps(format!(
                "expected [filtered_events, daily_aggregation, attribute_aggregation], found [{}]",
                names.join(", ")
            )));
        }
        let mut steps = steps.into_iter();
        match (steps.next(), steps.next(), steps.next()) {
            (Some(filtered_events), Some(daily_aggregation), Some(attribute_aggregation)) => {
                Ok(Self {
                    filtered_events,
                    daily_aggregation,
                    attribute_aggregation,
                })
            }
            _ => Err(AutogenError::MalformedSteps("expected three steps".into())),
        }
    }
}

impl From<AttributeSteps> for Vec<ModelingStep> {
    fn from(steps: AttributeSteps) -> Self {
        vec![
            steps.filtered_events,
            steps.daily_aggregation,
            steps.attribute_aggregation,
        ]
    }
}
