//! Compiled modeling steps → template contexts.
//!
//! Groups attributes by the shape of SQL they need (lifetime, windowed,
//! first/last value, unique list), renders daily-aggregate expressions and
//! structures the event references for the filtered-events model.
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::compiler::PERIOD_PROPERTY;
use super::config::BaseConfig;
use super::error::AutogenError;
use super::ingest::PropertyMapping;
use super::sql::{compile_criteria, daily_aggregation_type, validate_clause, wrap_daily_aggregate};
use super::steps::{AttributeSteps, ModelingStep, StepAggregation};
use crate::definitions::CriterionValue;

/// Which attribute bucket an attribute is rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    LifetimeAggregates,
    LastNDayAggregates,
    FirstValueAttributes,
    LastValueAttributes,
    UniqueListAttributes,
}

impl BucketKind {
    pub const ALL: [BucketKind; 5] = [
        BucketKind::LifetimeAggregates,
        BucketKind::LastNDayAggregates,
        BucketKind::FirstValueAttributes,
        BucketKind::LastValueAttributes,
        BucketKind::UniqueListAttributes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::LifetimeAggregates => "lifetime_aggregates",
            BucketKind::LastNDayAggregates => "last_n_day_aggregates",
            BucketKind::FirstValueAttributes => "first_value_attributes",
            BucketKind::LastValueAttributes => "last_value_attributes",
            BucketKind::UniqueListAttributes => "unique_list_attributes",
        }
    }

    /// Route an attribute by its rolled-up aggregation and window.
    pub fn route(aggregation: StepAggregation, period: Option<i64>) -> Self {
        match (aggregation, period) {
            (StepAggregation::First, _) => BucketKind::FirstValueAttributes,
            (StepAggregation::Last, _) => BucketKind::LastValueAttributes,
            (StepAggregation::UniqueList, _) => BucketKind::UniqueListAttributes,
            (_, Some(_)) => BucketKind::LastNDayAggregates,
            (_, None) => BucketKind::LifetimeAggregates,
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BucketKind {
    type Err = AutogenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BucketKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AutogenError::InvalidAttributeType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub daily_agg_column_name: String,
    pub column_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<i64>,
    pub aggregation_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DailyAggregateEntry {
    pub column_name: String,
    pub aggregation_type: String,
    pub condition_clause: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttributeBuckets {
    pub lifetime_aggregates: Vec<AttributeEntry>,
    pub last_n_day_aggregates: Vec<AttributeEntry>,
    pub first_value_attributes: Vec<AttributeEntry>,
    pub last_value_attributes: Vec<AttributeEntry>,
    pub unique_list_attributes: Vec<AttributeEntry>,
}

impl AttributeBuckets {
    pub fn get(&self, kind: BucketKind) -> &[AttributeEntry] {
        match kind {
            BucketKind::LifetimeAggregates => &self.lifetime_aggregates,
            BucketKind::LastNDayAggregates => &self.last_n_day_aggregates,
            BucketKind::FirstValueAttributes => &self.first_value_attributes,
            BucketKind::LastValueAttributes => &self.last_value_attributes,
            BucketKind::UniqueListAttributes => &self.unique_list_attributes,
        }
    }

    fn get_mut(&mut self, kind: BucketKind) -> &mut Vec<AttributeEntry> {
        match kind {
            BucketKind::LifetimeAggregates => &mut self.lifetime_aggregates,
            BucketKind::LastNDayAggregates => &mut self.last_n_day_aggregates,
            BucketKind::FirstValueAttributes => &mut self.first_value_attributes,
            BucketKind::LastValueAttributes => &mut self.last_value_attributes,
            BucketKind::UniqueListAttributes => &mut self.unique_list_attributes,
        }
    }

    pub fn len(&self) -> usize {
        BucketKind::ALL.iter().map(|k| self.get(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyAggContext {
    pub daily_aggregate_attributes: Vec<DailyAggregateEntry>,
    pub daily_first_value_attributes: Vec<DailyAggregateEntry>,
    pub daily_last_value_attributes: Vec<DailyAggregateEntry>,
}

/// Structured form of an `iglu:vendor/name/format/version` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSchema {
    pub vendor: String,
    pub name: String,
    pub format: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilteredEventsContext {
    pub events: Vec<EventSchema>,
    pub properties: Vec<PropertyMapping>,
}

/// Everything the model templates of one project render from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DbtConfig {
    pub filtered_events: FilteredEventsContext,
    pub daily_agg: DailyAggContext,
    #[serde(flatten)]
    pub attributes: AttributeBuckets,
}

pub fn build_dbt_config(base: &BaseConfig) -> Result<DbtConfig, AutogenError> {
    let config = DbtConfig {
        filtered_events: build_filtered_events_context(base)?,
        daily_agg: build_daily_agg_contexts(&base.transformed_attributes)?,
        attributes: bucket_by_shape(&base.transformed_attributes)?,
    };
    debug!(
        events = config.filtered_events.events.len(),
        daily = config.daily_agg.daily_aggregate_attributes.len(),
        attributes = config.attributes.len(),
        "built dbt config"
    );
    Ok(config)
}

fn step_aggregation(step: &ModelingStep, attribute: &str) -> Result<StepAggregation, AutogenError> {
    step.aggregation.ok_or_else(|| {
        AutogenError::MalformedSteps(format!(
            "attribute '{}': {} step has no aggregation",
            attribute, step.step_type
        ))
    })
}

fn step_column(step: &ModelingStep, attribute: &str) -> Result<String, AutogenError> {
    step.column_name.clone().ok_or_else(|| {
        AutogenError::MalformedSteps(format!(
            "attribute '{}': {} step has no column name",
            attribute, step.step_type
        ))
    })
}

/// Window length in days from a final step's `period` condition.
pub fn extract_period(step: &ModelingStep, attribute: &str) -> Result<Option<i64>, AutogenError> {
    let Some(condition) = step
        .modeling_criteria
        .as_ref()
        .and_then(|c| c.find(PERIOD_PROPERTY))
    else {
        return Ok(None);
    };

    let invalid = || AutogenError::InvalidPeriodValue {
        attribute: attribute.to_string(),
        value: condition.value.to_string(),
    };
    match &condition.value {
        CriterionValue::Int(days) => Ok(Some(*days)),
        CriterionValue::Float(days) => Ok(Some(days.trunc() as i64)),
        CriterionValue::String(s) => s.trim().parse().map(Some).map_err(|_| invalid()),
        CriterionValue::Bool(_) | CriterionValue::List(_) => Err(invalid()),
    }
}

/// Partition attributes into the five attribute buckets.
pub fn bucket_by_shape(transformed: &[AttributeSteps]) -> Result<AttributeBuckets, AutogenError> {
    let mut buckets = AttributeBuckets::default();

    for steps in transformed {
        let attribute = steps.attribute_name();
        let step = &steps.attribute_aggregation;
        let aggregation = step_aggregation(step, attribute)?;
        let period = extract_period(step, attribute)?;
        let kind = BucketKind::route(aggregation, period);

        let aggregation_type = match kind {
            BucketKind::UniqueListAttributes => "array_agg",
            _ => aggregation.as_str(),
        };
        buckets.get_mut(kind).push(AttributeEntry {
            daily_agg_column_name: step_column(&steps.daily_aggregation, attribute)?,
            column_name: step_column(step, attribute)?,
            period,
            aggregation_type: aggregation_type.to_string(),
        });
    }

    for kind in BucketKind::ALL {
        let entries = std::mem::take(buckets.get_mut(kind));
        *buckets.get_mut(kind) = dedup(entries);
    }
    Ok(buckets)
}

/// Render the per-day aggregate expressions.
pub fn build_daily_agg_contexts(transformed: &[AttributeSteps]) -> Result<DailyAggContext, AutogenError> {
    let mut context = DailyAggContext::default();

    for steps in transformed {
        let attribute = steps.attribute_name();
        let step = &steps.daily_aggregation;
        let aggregation = step_aggregation(step, attribute)?;
        let column_name = step_column(step, attribute)?;

        match aggregation {
            StepAggregation::First | StepAggregation::Last => {
                let prefix = format!("{}_", aggregation);
                let condition_clause = column_name
                    .strip_prefix(&prefix)
                    .unwrap_or(&column_name)
                    .to_string();
                let entry = DailyAggregateEntry {
                    column_name,
                    aggregation_type: aggregation.to_string(),
                    condition_clause,
                };
                if aggregation == StepAggregation::First {
                    context.daily_first_value_attributes.push(entry);
                } else {
                    context.daily_last_value_attributes.push(entry);
                }
            }
            _ => {
                let condition = match &step.modeling_criteria {
                    Some(criteria) => compile_criteria(criteria, attribute)?,
                    None => String::new(),
                };
                validate_clause(&condition, attribute)?;
                let property = steps.filtered_events.column_name.as_deref();
                context.daily_aggregate_attributes.push(DailyAggregateEntry {
                    column_name,
                    aggregation_type: daily_aggregation_type(aggregation).to_string(),
                    condition_clause: wrap_daily_aggregate(aggregation, &condition, property, attribute)?,
                });
            }
        }
    }

    context.daily_aggregate_attributes = dedup(context.daily_aggregate_attributes);
    context.daily_first_value_attributes = dedup(context.daily_first_value_attributes);
    context.daily_last_value_attributes = dedup(context.daily_last_value_attributes);
    Ok(context)
}

/// Split an iglu URI into its four components.
pub fn parse_event_reference(reference: &str) -> Result<EventSchema, AutogenError> {
    let invalid = |reason: &str| AutogenError::InvalidEventReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    let path = reference
        .strip_prefix("iglu:")
        .ok_or_else(|| invalid("must start with 'iglu:'"))?;
    let parts: Vec<&str> = path.split('/').collect();
    let [vendor, name, format, version] = parts.as_slice() else {
        return Err(invalid("expected vendor/name/format/version"));
    };
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid("empty component"));
    }

    Ok(EventSchema {
        vendor: vendor.to_string(),
        name: name.to_string(),
        format: format.to_string(),
        version: version.to_string(),
    })
}

pub fn build_filtered_events_context(base: &BaseConfig) -> Result<FilteredEventsContext, AutogenError> {
    let events = base
        .events
        .iter()
        .map(|e| parse_event_reference(e))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FilteredEventsContext {
        events,
        properties: base.properties.clone(),
    })
}

/// Drop repeated entries, keeping the first occurrence.
fn dedup<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
