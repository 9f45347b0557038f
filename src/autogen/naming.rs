//! Identifier synthesis for generated SQL.
//!
//! Turns raw property paths, event references and filter criteria into
//! stable, warehouse-safe column names. Everything here is a pure function
//! of its input.
use crate::definitions::{AttributeDefinition, Criteria, CriterionValue, EventRef};

/// Longest synthesized column name; longer names fall back to the attribute name.
pub const MAX_COLUMN_NAME_LEN: usize = 60;

/// Keywords that cannot be used bare as column names across the supported warehouses.
const RESERVED_WORDS: &[&str] = &[
    "all",
    "alter",
    "and",
    "any",
    "array",
    "as",
    "asc",
    "between",
    "both",
    "by",
    "case",
    "cast",
    "check",
    "column",
    "constraint",
    "create",
    "cross",
    "current_date",
    "current_time",
    "current_timestamp",
    "current_user",
    "date",
    "default",
    "delete",
    "desc",
    "distinct",
    "drop",
    "else",
    "end",
    "except",
    "exists",
    "false",
    "fetch",
    "for",
    "foreign",
    "from",
    "full",
    "grant",
    "group",
    "having",
    "in",
    "inner",
    "insert",
    "intersect",
    "interval",
    "into",
    "is",
    "join",
    "leading",
    "left",
    "like",
    "limit",
    "natural",
    "not",
    "null",
    "offset",
    "on",
    "only",
    "or",
    "order",
    "outer",
    "primary",
    "qualify",
    "references",
    "right",
    "rows",
    "select",
    "session_user",
    "some",
    "table",
    "then",
    "time",
    "timestamp",
    "to",
    "trailing",
    "true",
    "union",
    "unique",
    "update",
    "user",
    "using",
    "values",
    "when",
    "where",
    "window",
    "with",
];

pub fn is_reserved_word(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// Insert `_` before an uppercase letter that follows a lowercase one, then lowercase.
pub fn to_snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev: Option<char> = None;
    for c in input.chars() {
        if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase()) {
            out.push('_');
        }
        out.extend(c.to_lowercase());
        prev = Some(c);
    }
    out
}

/// Extract the meaningful suffix of a property path as a column name.
///
/// `contexts_x_1[0]:deviceClass` → `device_class` (after the first `:`),
/// `a.b.pageTitle` → `page_title` (after the last `.`), anything else is
/// kept as is. Characters left over from a nested path (`target:innerText`)
/// become `_`. Reserved words get a `_col` suffix in every case.
pub fn clean_property_name(raw: &str) -> String {
    let suffix = if let Some((_, rest)) = raw.split_once(':') {
        to_snake_case(rest)
    } else if let Some((_, rest)) = raw.rsplit_once('.') {
        to_snake_case(rest)
    } else {
        raw.to_string()
    };
    let cleaned: String = suffix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if is_reserved_word(&cleaned) {
        format!("{}_col", cleaned.to_lowercase())
    } else {
        cleaned
    }
}

pub fn full_event_reference(event: &EventRef) -> String {
    format!(
        "iglu:{}/{}/jsonschema/{}",
        event.vendor, event.name, event.version
    )
}

/// Event references in lexicographic order, for output that must not depend
/// on declaration order.
pub fn sorted_event_references<'a>(events: impl IntoIterator<Item = &'a EventRef>) -> Vec<String> {
    let mut refs: Vec<String> = events.into_iter().map(full_event_reference).collect();
    refs.sort();
    refs.dedup();
    refs
}

/// Make a filter value usable inside an identifier.
pub fn sanitize_value(value: &CriterionValue) -> String {
    if let CriterionValue::List(items) = value {
        let parts: Vec<String> = items.iter().map(sanitize_value).collect();
        return parts.join("_");
    }

    value
        .to_string()
        .to_lowercase()
        .replace(' ', "_")
        .replace('%', "pct")
        .replace(['-', '.', '/'], "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Name component describing the filtering group of `criteria`.
///
/// Fragments are sorted so the result does not depend on the order
/// conditions were declared in.
pub fn filter_name(criteria: &Criteria) -> String {
    let combinator = if criteria.uses_any() { "any" } else { "all" };
    let mut fragments: Vec<String> = criteria
        .active()
        .iter()
        .map(|c| {
            format!(
                "{}_{}_{}",
                clean_property_name(&c.property),
                c.operator.abbreviation(),
                sanitize_value(&c.value)
            )
        })
        .collect();
    fragments.sort();
    fragments.join(&format!("_{}_", combinator))
}

/// Strip everything that is not `[A-Za-z0-9_]`, mapping `-` to `_` and
/// prefixing names that would start with a digit.
pub fn sanitize_identifier(raw: &str) -> String {
    let name: String = raw
        .replace('-', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("n_{}", name)
    } else {
        name
    }
}

/// Synthesize the daily-aggregate column name for a non first/last attribute.
///
/// `aggregation` is the short SQL-oriented name (`count`, `sum`, ...) and
/// `property` the already-cleaned property column, if any. Event names are
/// used in the order they are attached to the attribute.
pub fn generate_column_name(
    attribute: &AttributeDefinition,
    aggregation: &str,
    property: Option<&str>,
) -> String {
    let mut parts: Vec<String> = vec![aggregation.to_string()];
    if let Some(property) = property {
        parts.push(property.to_string());
    }
    parts.extend(attribute.events.iter().map(|e| e.name.clone()));
    if let Some(criteria) = attribute.active_criteria() {
        parts.push(filter_name(criteria));
    }

    let name = sanitize_identifier(&parts.join("_"));
    if name.len() > MAX_COLUMN_NAME_LEN {
        return attribute.name.clone();
    }
    name
}
