pub mod autogen;
pub mod client;
pub mod definitions;
pub mod interventions;
