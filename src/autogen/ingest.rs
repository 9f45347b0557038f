//! Run-scoped accumulators for events, properties and periods.
//!
//! A [`CompilationContext`] is created for one view and threaded through
//! every attribute compile by `&mut`. It deduplicates what attributes share
//! and hands out collision-free column names for property paths.
use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::naming::{clean_property_name, full_event_reference};
use crate::definitions::{EventRef, Period};

/// One `{raw_property_path: cleaned_sql_identifier}` pair.
///
/// Serialized as a single-entry JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct PropertyMapping {
    pub raw: String,
    pub cleaned: String,
}

impl PropertyMapping {
    pub fn new(raw: impl Into<String>, cleaned: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            cleaned: cleaned.into(),
        }
    }
}

impl TryFrom<BTreeMap<String, String>> for PropertyMapping {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!(
                "property mapping must have exactly one entry, found {}",
                map.len()
            ));
        }
        let (raw, cleaned) = map
            .into_iter()
            .next()
            .ok_or_else(|| "empty property mapping".to_string())?;
        Ok(Self { raw, cleaned })
    }
}

impl From<PropertyMapping> for BTreeMap<String, String> {
    fn from(mapping: PropertyMapping) -> Self {
        BTreeMap::from([(mapping.raw, mapping.cleaned)])
    }
}

/// Insert a mapping unless either side is empty or the exact pair is present.
///
/// Returns whether the mapping was added.
pub fn add_property(mapping: &mut Vec<PropertyMapping>, raw_key: &str, cleaned_value: &str) -> bool {
    if raw_key.is_empty() || cleaned_value.is_empty() {
        return false;
    }
    let entry = PropertyMapping::new(raw_key, cleaned_value);
    if mapping.contains(&entry) {
        return false;
    }
    mapping.push(entry);
    true
}

/// Give every cleaned name a unique spelling.
///
/// Walks in insertion order; a name seen before receives the lowest free
/// numeric suffix starting at `_2`. Earlier entries never change when later
/// ones are appended.
pub fn resolve_collisions(properties: &[PropertyMapping]) -> Vec<PropertyMapping> {
    let mut seen: HashSet<String> = HashSet::new();
    properties
        .iter()
        .map(|mapping| {
            let mut candidate = mapping.cleaned.clone();
            let mut suffix = 2;
            while seen.contains(&candidate) {
                candidate = format!("{}_{}", mapping.cleaned, suffix);
                suffix += 1;
            }
            seen.insert(candidate.clone());
            PropertyMapping::new(mapping.raw.clone(), candidate)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct CompilationContext {
    events: Vec<String>,
    properties: Vec<PropertyMapping>,
    periods: BTreeSet<String>,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event by its iglu URI, keeping first-seen order.
    pub fn add_event(&mut self, event: &EventRef) -> String {
        let reference = full_event_reference(event);
        if !self.events.contains(&reference) {
            self.events.push(reference.clone());
        }
        reference
    }

    pub fn add_period(&mut self, period: &Period) {
        self.periods.insert(period.to_iso8601());
    }

    /// Register a property path and return the column name it resolves to.
    pub fn register_property(&mut self, raw: &str) -> String {
        let cleaned = clean_property_name(raw);
        add_property(&mut self.properties, raw, &cleaned);
        self.resolved_name(raw).unwrap_or(cleaned)
    }

    /// Collision-free column name for an already registered property path.
    pub fn resolved_name(&self, raw: &str) -> Option<String> {
        resolve_collisions(&self.properties)
            .into_iter()
            .find(|m| m.raw == raw)
            .map(|m| m.cleaned)
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn properties(&self) -> &[PropertyMapping] {
        &self.properties
    }

    pub fn periods(&self) -> &BTreeSet<String> {
        &self.periods
    }

    /// Consume the context, yielding events, resolved properties and periods.
    pub fn finish(self) -> (Vec<String>, Vec<PropertyMapping>, BTreeSet<String>) {
        let properties = resolve_collisions(&self.properties);
        (self.events, properties, self.periods)
    }
}
