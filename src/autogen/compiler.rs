/// Attribute definition → modeling step compiler.
///
/// Every attribute becomes exactly three steps: a filtered-events step, a
/// per-day aggregation step and the final attribute aggregation. Shared
/// events, properties and periods are accumulated in a
/// [`CompilationContext`] that lives for one run.
use tracing::{debug, info};

use super::config::BaseConfig;
use super::error::AutogenError;
use super::ingest::CompilationContext;
use super::naming::{generate_column_name, sorted_event_references};
use super::steps::{
    AttributeSteps, Condition, ModelingCriteria, ModelingStep, StepAggregation, StepType,
};
use crate::definitions::{AttributeDefinition, CriterionValue, Operator, View};

/// Column of the filtered-events table holding the event name.
pub const EVENT_NAME_COLUMN: &str = "event_name";

/// Pseudo-property carrying an attribute's window on its final step.
pub const PERIOD_PROPERTY: &str = "period";

/// Compile every attribute of a view.
pub fn compile_view(view: &View) -> Result<BaseConfig, AutogenError> {
    info!(
        view = %view.name,
        version = view.version,
        attributes = view.attributes.len(),
        "compiling view"
    );
    debug!(
        events = ?sorted_event_references(view.attributes.iter().flat_map(|a| &a.events)),
        "referenced events"
    );
    compile_attributes(&view.attributes, view.entity.key_column())
}

/// Compile an attribute list in order. The first failing attribute aborts the run.
pub fn compile_attributes(
    attributes: &[AttributeDefinition],
    entity_key: &str,
) -> Result<BaseConfig, AutogenError> {
    let mut ctx = CompilationContext::new();
    let transformed_attributes = attributes
        .iter()
        .map(|attribute| compile_attribute(attribute, &mut ctx))
        .collect::<Result<Vec<_>, _>>()?;

    let (events, properties, periods) = ctx.finish();
    debug!(
        events = events.len(),
        properties = properties.len(),
        periods = periods.len(),
        "compiled attribute steps"
    );

    Ok(BaseConfig {
        events,
        properties,
        periods,
        transformed_attributes,
        entity_key: entity_key.to_string(),
    })
}

/// Short aggregation name, failing for aggregations batch generation cannot express.
pub fn aggregation_short_name(
    attribute: &AttributeDefinition,
) -> Result<StepAggregation, AutogenError> {
    StepAggregation::from_declared(attribute.aggregation).ok_or_else(|| {
        AutogenError::UnsupportedAggregation {
            attribute: attribute.name.clone(),
            aggregation: attribute.aggregation,
        }
    })
}

fn validate(attribute: &AttributeDefinition) -> Result<(), AutogenError> {
    if let Some(index) = attribute.events.iter().position(|e| e.name.is_empty()) {
        return Err(AutogenError::MissingEventName {
            attribute: attribute.name.clone(),
            index,
        });
    }
    if attribute.aggregation.requires_property() && attribute.property_path().is_none() {
        return Err(AutogenError::MissingProperty {
            attribute: attribute.name.clone(),
            aggregation: attribute.aggregation.to_string(),
        });
    }
    if attribute.criteria.as_ref().is_some_and(|c| !c.is_valid()) {
        return Err(AutogenError::InvalidCriteria {
            attribute: attribute.name.clone(),
        });
    }
    Ok(())
}

/// Compile one attribute, registering what it references in `ctx`.
pub fn compile_attribute(
    attribute: &AttributeDefinition,
    ctx: &mut CompilationContext,
) -> Result<AttributeSteps, AutogenError> {
    let aggregation = aggregation_short_name(attribute)?;
    validate(attribute)?;

    for event in &attribute.events {
        ctx.add_event(event);
    }
    if let Some(period) = &attribute.period {
        ctx.add_period(period);
    }
    let property = attribute
        .property_path()
        .map(|raw| ctx.register_property(raw));

    let filtered_events = ModelingStep {
        step_type: StepType::FilteredEvents,
        enabled: false,
        aggregation: None,
        column_name: property.clone(),
        modeling_criteria: None,
    };

    let daily_aggregation = ModelingStep {
        step_type: StepType::DailyAggregation,
        enabled: true,
        aggregation: Some(aggregation),
        column_name: Some(daily_column_name(attribute, aggregation, property.as_deref())?),
        modeling_criteria: Some(daily_criteria(attribute, ctx)),
    };

    let attribute_aggregation = ModelingStep {
        step_type: StepType::AttributeAggregation,
        enabled: true,
        aggregation: Some(aggregation.rollup()),
        column_name: Some(attribute.name.clone()),
        modeling_criteria: attribute.period.map(|period| ModelingCriteria {
            all: vec![Condition::new(
                PERIOD_PROPERTY,
                Operator::Gt,
                CriterionValue::Int(period.num_days()),
            )],
            any: Vec::new(),
        }),
    };

    debug!(
        attribute = %attribute.name,
        aggregation = %aggregation,
        "compiled attribute"
    );

    Ok(AttributeSteps {
        filtered_events,
        daily_aggregation,
        attribute_aggregation,
    })
}

fn daily_column_name(
    attribute: &AttributeDefinition,
    aggregation: StepAggregation,
    property: Option<&str>,
) -> Result<String, AutogenError> {
    if aggregation.is_positional() {
        let property = property.ok_or_else(|| AutogenError::MissingProperty {
            attribute: attribute.name.clone(),
            aggregation: aggregation.to_string(),
        })?;
        return Ok(format!("{}_{}", aggregation, property));
    }
    Ok(generate_column_name(attribute, aggregation.as_str(), property))
}

/// `event_name IN (...)` plus the filtering group of the attribute's own
/// criteria, rebound to resolved column names.
fn daily_criteria(attribute: &AttributeDefinition, ctx: &mut CompilationContext) -> ModelingCriteria {
    let event_names = attribute
        .events
        .iter()
        .map(|e| CriterionValue::String(e.name.clone()))
        .collect();

    let mut criteria = ModelingCriteria {
        all: vec![Condition::new(
            EVENT_NAME_COLUMN,
            Operator::In,
            CriterionValue::List(event_names),
        )],
        any: Vec::new(),
    };

    if let Some(declared) = attribute.active_criteria() {
        let group = if declared.uses_any() {
            &mut criteria.any
        } else {
            &mut criteria.all
        };
        for criterion in declared.active() {
            let column = ctx.register_property(&criterion.property);
            group.push(Condition::from_criterion(criterion, column));
        }
    }

    criteria
}
