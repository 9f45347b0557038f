/// Template renderer seam for generated warehouse projects.
///
/// The compiler never writes SQL files itself. A [`TemplateRenderer`] turns a
/// [`RenderContext`] into the text of one [`ModelTemplate`], and the project
/// writer decides where that text goes. [`SqlModelRenderer`] is the built-in
/// implementation producing dbt models.
use anyhow::{anyhow, Result};

use super::config::BaseConfig;
use super::context::{AttributeEntry, BucketKind, DailyAggregateEntry, DbtConfig};

/// Files rendered for one generated project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTemplate {
    DbtProject,
    Sources,
    FilteredEvents,
    DailyAggregates,
    Attributes,
}

impl ModelTemplate {
    /// Scaffolding written by `init`.
    pub const SCAFFOLD: [ModelTemplate; 2] = [ModelTemplate::DbtProject, ModelTemplate::Sources];

    /// Models written by `generate`.
    pub const MODELS: [ModelTemplate; 3] = [
        ModelTemplate::FilteredEvents,
        ModelTemplate::DailyAggregates,
        ModelTemplate::Attributes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelTemplate::DbtProject => "dbt_project",
            ModelTemplate::Sources => "sources",
            ModelTemplate::FilteredEvents => "filtered_events",
            ModelTemplate::DailyAggregates => "daily_aggregates",
            ModelTemplate::Attributes => "attributes",
        }
    }

    /// Path of the rendered file relative to the project directory.
    pub fn relative_path(&self, project_name: &str) -> String {
        match self {
            ModelTemplate::DbtProject => "dbt_project.yml".to_string(),
            ModelTemplate::Sources => "models/sources.yml".to_string(),
            model => format!("models/{}_{}.sql", project_name, model.name()),
        }
    }

    fn needs_dbt_config(&self) -> bool {
        Self::MODELS.contains(self)
    }
}

/// Everything a template may read.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub project_name: &'a str,
    pub base: &'a BaseConfig,
    /// Absent while scaffolding a project that has not been generated yet.
    pub dbt: Option<&'a DbtConfig>,
}

impl<'a> RenderContext<'a> {
    pub fn entity_key(&self) -> &'a str {
        &self.base.entity_key
    }

    fn require_dbt(&self, template: ModelTemplate) -> Result<&'a DbtConfig> {
        self.dbt.ok_or_else(|| {
            anyhow!(
                "template '{}' needs a generated dbt config for project '{}'",
                template.name(),
                self.project_name
            )
        })
    }
}

/// Renders one template from a context.
///
/// # Example
///
/// ```ignore
/// struct Upper;
///
/// impl TemplateRenderer for Upper {
///     fn name(&self) -> &str { "upper" }
///     fn render(&self, t: ModelTemplate, ctx: &RenderContext) -> Result<String> {
///         Ok(ctx.project_name.to_uppercase())
///     }
/// }
/// ```
pub trait TemplateRenderer: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self, template: ModelTemplate, ctx: &RenderContext) -> Result<String>;
}

/// Built-in renderer producing dbt YAML and Snowflake-flavoured SQL models.
#[derive(Debug, Clone)]
pub struct SqlModelRenderer {
    /// dbt source the filtered-events model reads from, as `(source, table)`.
    pub events_source: (String, String),
    pub timestamp_column: String,
}

impl Default for SqlModelRenderer {
    fn default() -> Self {
        Self {
            events_source: ("atomic".to_string(), "events".to_string()),
            timestamp_column: "derived_tstamp".to_string(),
        }
    }
}

impl TemplateRenderer for SqlModelRenderer {
    fn name(&self) -> &str {
        "dbt-sql"
    }

    fn render(&self, template: ModelTemplate, ctx: &RenderContext) -> Result<String> {
        let dbt = if template.needs_dbt_config() {
            Some(ctx.require_dbt(template)?)
        } else {
            None
        };

        Ok(match (template, dbt) {
            (ModelTemplate::DbtProject, _) => self.dbt_project(ctx),
            (ModelTemplate::Sources, _) => self.sources(),
            (ModelTemplate::FilteredEvents, Some(dbt)) => self.filtered_events(ctx, dbt),
            (ModelTemplate::DailyAggregates, Some(dbt)) => self.daily_aggregates(ctx, dbt),
            (ModelTemplate::Attributes, Some(dbt)) => self.attributes(ctx, dbt),
            (template, None) => return Err(anyhow!("no dbt config for '{}'", template.name())),
        })
    }
}

impl SqlModelRenderer {
    fn dbt_project(&self, ctx: &RenderContext) -> String {
        format!(
            "name: '{name}'\n\
             version: '1.0.0'\n\
             config-version: 2\n\
             profile: 'default'\n\
             \n\
             model-paths: [\"models\"]\n\
             \n\
             models:\n  {name}:\n    +materialized: table\n",
            name = ctx.project_name
        )
    }

    fn sources(&self) -> String {
        let (source, table) = &self.events_source;
        format!(
            "version: 2\n\nsources:\n  - name: {source}\n    schema: {source}\n    tables:\n      - name: {table}\n"
        )
    }

    fn filtered_events(&self, ctx: &RenderContext, dbt: &DbtConfig) -> String {
        let mut references = ctx.base.events.clone();
        references.sort();

        let mut out = String::new();
        for reference in &references {
            out.push_str(&format!("-- {}\n", reference));
        }

        let mut columns = vec![
            ctx.entity_key().to_string(),
            "event_name".to_string(),
            self.timestamp_column.clone(),
            format!("CAST({} AS DATE) AS event_date", self.timestamp_column),
        ];
        columns.extend(
            dbt.filtered_events
                .properties
                .iter()
                .map(|p| format!("{} AS {}", p.raw, p.cleaned)),
        );

        let filters: Vec<String> = dbt
            .filtered_events
            .events
            .iter()
            .map(|e| {
                format!(
                    "(event_vendor = '{}' AND event_name = '{}' AND event_version = '{}')",
                    e.vendor, e.name, e.version
                )
            })
            .collect();

        let (source, table) = &self.events_source;
        out.push_str(&format!(
            "SELECT\n    {}\nFROM {{{{ source('{}', '{}') }}}}\n",
            columns.join(",\n    "),
            source,
            table
        ));
        if filters.is_empty() {
            out.push_str("WHERE FALSE\n");
        } else {
            out.push_str(&format!("WHERE {}\n", filters.join("\n   OR ")));
        }
        out
    }

    fn daily_aggregates(&self, ctx: &RenderContext, dbt: &DbtConfig) -> String {
        let mut columns = vec![ctx.entity_key().to_string(), "event_date".to_string()];
        columns.extend(
            dbt.daily_agg
                .daily_aggregate_attributes
                .iter()
                .map(daily_aggregate_column),
        );
        columns.extend(dbt.daily_agg.daily_first_value_attributes.iter().map(|e| {
            format!(
                "MIN_BY({}, {}) AS {}",
                e.condition_clause, self.timestamp_column, e.column_name
            )
        }));
        columns.extend(dbt.daily_agg.daily_last_value_attributes.iter().map(|e| {
            format!(
                "MAX_BY({}, {}) AS {}",
                e.condition_clause, self.timestamp_column, e.column_name
            )
        }));

        format!(
            "SELECT\n    {}\nFROM {{{{ ref('{}_{}') }}}}\nGROUP BY 1, 2\n",
            columns.join(",\n    "),
            ctx.project_name,
            ModelTemplate::FilteredEvents.name()
        )
    }

    fn attributes(&self, ctx: &RenderContext, dbt: &DbtConfig) -> String {
        let mut columns = vec![ctx.entity_key().to_string()];
        for kind in BucketKind::ALL {
            columns.extend(
                dbt.attributes
                    .get(kind)
                    .iter()
                    .map(|entry| attribute_column(kind, entry)),
            );
        }

        format!(
            "SELECT\n    {}\nFROM {{{{ ref('{}_{}') }}}}\nGROUP BY 1\n",
            columns.join(",\n    "),
            ctx.project_name,
            ModelTemplate::DailyAggregates.name()
        )
    }
}

fn daily_aggregate_column(entry: &DailyAggregateEntry) -> String {
    // Count clauses evaluate to 1/0 per row, so the daily count is their sum.
    let function = match entry.aggregation_type.as_str() {
        "count" => "SUM".to_string(),
        other => other.to_uppercase(),
    };
    format!("{}({}) AS {}", function, entry.condition_clause, entry.column_name)
}

fn windowed(entry: &AttributeEntry) -> String {
    match entry.period {
        Some(days) => format!(
            "CASE WHEN event_date >= DATEADD(day, -{}, CURRENT_DATE) THEN {} END",
            days, entry.daily_agg_column_name
        ),
        None => entry.daily_agg_column_name.clone(),
    }
}

fn attribute_column(kind: BucketKind, entry: &AttributeEntry) -> String {
    let value = windowed(entry);
    let expression = match kind {
        BucketKind::FirstValueAttributes => format!("MIN_BY({}, event_date)", value),
        BucketKind::LastValueAttributes => format!("MAX_BY({}, event_date)", value),
        BucketKind::UniqueListAttributes => format!("ARRAY_UNION_AGG({})", value),
        BucketKind::LifetimeAggregates | BucketKind::LastNDayAggregates => {
            format!("{}({})", entry.aggregation_type.to_uppercase(), value)
        }
    };
    format!("{} AS {}", expression, entry.column_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autogen::compiler::compile_attributes;
    use crate::autogen::context::build_dbt_config;
    use crate::definitions::{Aggregation, AttributeDefinition, EventRef, Period};

    fn sample() -> (BaseConfig, DbtConfig) {
        let purchase = EventRef::new("com.acme", "purchase", "1-0-0");
        let view = EventRef::new("com.acme", "view", "1-0-0");
        let attrs = vec![
            AttributeDefinition::new("views", Aggregation::Counter, vec![view]),
            AttributeDefinition::new("revenue_7d", Aggregation::Sum, vec![purchase.clone()])
                .with_property("unstruct_event_com_acme_purchase_1:total")
                .with_period(Period::days(7)),
            AttributeDefinition::new("last_sku", Aggregation::Last, vec![purchase.clone()])
                .with_property("unstruct_event_com_acme_purchase_1:sku"),
            AttributeDefinition::new("skus", Aggregation::UniqueList, vec![purchase])
                .with_property("unstruct_event_com_acme_purchase_1:sku"),
        ];
        let base = compile_attributes(&attrs, "user_id").unwrap();
        let dbt = build_dbt_config(&base).unwrap();
        (base, dbt)
    }

    #[test]
    fn test_relative_paths() {
        assert_eq!(ModelTemplate::DbtProject.relative_path("shop_1"), "dbt_project.yml");
        assert_eq!(
            ModelTemplate::Attributes.relative_path("shop_1"),
            "models/shop_1_attributes.sql"
        );
    }

    #[test]
    fn test_models_need_dbt_config() {
        let (base, _) = sample();
        let ctx = RenderContext {
            project_name: "shop_1",
            base: &base,
            dbt: None,
        };
        let renderer = SqlModelRenderer::default();
        assert!(renderer.render(ModelTemplate::DbtProject, &ctx).is_ok());
        assert!(renderer.render(ModelTemplate::FilteredEvents, &ctx).is_err());
    }

    #[test]
    fn test_filtered_events_header_is_sorted() {
        let (base, dbt) = sample();
        let ctx = RenderContext {
            project_name: "shop_1",
            base: &base,
            dbt: Some(&dbt),
        };
        let sql = SqlModelRenderer::default()
            .render(ModelTemplate::FilteredEvents, &ctx)
            .unwrap();
        let mut lines = sql.lines();
        assert_eq!(lines.next(), Some("-- iglu:com.acme/purchase/jsonschema/1-0-0"));
        assert_eq!(lines.next(), Some("-- iglu:com.acme/view/jsonschema/1-0-0"));
        assert!(sql.contains("unstruct_event_com_acme_purchase_1:total AS total"));
        assert!(sql.contains("FROM {{ source('atomic', 'events') }}"));
        assert!(sql.contains("WHERE (event_vendor = 'com.acme' AND event_name = 'view'"));
        assert!(sql.contains(
            "\n   OR (event_vendor = 'com.acme' AND event_name = 'purchase' AND event_version = '1-0-0')"
        ));
        assert!(sql.ends_with("')\n"));
    }

    #[test]
    fn test_filtered_events_without_events() {
        let base = compile_attributes(&[], "user_id").unwrap();
        let dbt = build_dbt_config(&base).unwrap();
        let ctx = RenderContext {
            project_name: "empty_1",
            base: &base,
            dbt: Some(&dbt),
        };
        let sql = SqlModelRenderer::default()
            .render(ModelTemplate::FilteredEvents, &ctx)
            .unwrap();
        assert!(sql.starts_with("SELECT\n    user_id,\n    event_name,"));
        assert!(sql.ends_with("WHERE FALSE\n"));
    }

    #[test]
    fn test_daily_model_sums_counts() {
        let (base, dbt) = sample();
        let ctx = RenderContext {
            project_name: "shop_1",
            base: &base,
            dbt: Some(&dbt),
        };
        let sql = SqlModelRenderer::default()
            .render(ModelTemplate::DailyAggregates, &ctx)
            .unwrap();
        assert!(sql.contains(
            "SUM(CASE WHEN event_name IN('view') THEN 1 ELSE 0 END) AS count_view"
        ));
        assert!(sql.contains("MAX_BY(sku, derived_tstamp) AS last_sku"));
        assert!(sql.contains("ARRAY_AGG(DISTINCT CASE WHEN"));
        assert!(sql.contains("FROM {{ ref('shop_1_filtered_events') }}"));
    }

    #[test]
    fn test_attribute_model_windows() {
        let (base, dbt) = sample();
        let ctx = RenderContext {
            project_name: "shop_1",
            base: &base,
            dbt: Some(&dbt),
        };
        let sql = SqlModelRenderer::default()
            .render(ModelTemplate::Attributes, &ctx)
            .unwrap();
        assert!(sql.contains("SUM(count_view) AS views"));
        assert!(sql.contains("DATEADD(day, -7, CURRENT_DATE)"));
        assert!(sql.contains("MAX_BY(last_sku, event_date) AS last_sku"));
        assert!(sql.contains("ARRAY_UNION_AGG("));
    }
}
