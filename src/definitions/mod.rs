//! Declarative definitions of entities, views, attributes and services.
//!
//! These are the typed values callers build in code and the shapes the
//! registry returns. They carry no behaviour beyond small helpers; the
//! `autogen` pipeline and the registry `client` consume them.
pub mod attribute;
pub mod period;
pub mod view;

pub use attribute::{
    Aggregation, AttributeDefinition, Criteria, Criterion, CriterionValue, EventRef, Operator,
};
pub use period::{Period, PeriodParseError};
pub use view::{Entity, Service, View, ViewReference};
