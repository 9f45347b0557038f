use thiserror::Error;

use crate::definitions::Aggregation;

/// Errors raised while compiling attribute definitions into SQL contexts.
///
/// Every variant aborts the whole run; nothing is recovered inside the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutogenError {
    #[error("attribute '{attribute}': aggregation '{aggregation}' is not supported by batch generation")]
    UnsupportedAggregation {
        attribute: String,
        aggregation: Aggregation,
    },

    #[error("attribute '{attribute}': event #{index} has no name")]
    MissingEventName { attribute: String, index: usize },

    #[error("attribute '{attribute}': aggregation '{aggregation}' requires a property")]
    MissingProperty {
        attribute: String,
        aggregation: String,
    },

    #[error("invalid event reference '{reference}': {reason}")]
    InvalidEventReference { reference: String, reason: String },

    #[error("attribute '{attribute}': operator '{operator}' cannot be applied to value '{value}'")]
    InvalidFilterOperator {
        attribute: String,
        operator: String,
        value: String,
    },

    #[error("unknown attribute type '{0}'")]
    InvalidAttributeType(String),

    #[error("attribute '{attribute}': period value '{value}' is not a whole number of days")]
    InvalidPeriodValue { attribute: String, value: String },

    #[error("attribute '{attribute}': only one of 'all' or 'any' may hold more than one condition")]
    InvalidCriteria { attribute: String },

    #[error("attribute '{attribute}': generated clause `{clause}` is not valid SQL: {message}")]
    InvalidGeneratedSql {
        attribute: String,
        clause: String,
        message: String,
    },

    #[error("malformed modeling steps: {0}")]
    MalformedSteps(String),
}

impl AutogenError {
    /// Attribute the error was raised for, when it concerns one.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            AutogenError::UnsupportedAggregation { attribute, .. }
            | AutogenError::MissingEventName { attribute, .. }
            | AutogenError::MissingProperty { attribute, .. }
            | AutogenError::InvalidFilterOperator { attribute, .. }
            | AutogenError::InvalidPeriodValue { attribute, .. }
            | AutogenError::InvalidCriteria { attribute }
            | AutogenError::InvalidGeneratedSql { attribute, .. } => Some(attribute),
            AutogenError::InvalidEventReference { .. }
            | AutogenError::InvalidAttributeType(_)
            | AutogenError::MalformedSteps(_) => None,
        }
    }
}
