//! Generated warehouse projects on disk.
//!
//! A repository directory holds one project per view, named
//! `{view_name}_{version}`. `init` compiles a view and writes its
//! `configs/base_config.json` plus scaffolding; `generate` turns that file
//! into `configs/dbt_config.json` and the SQL models.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::compiler::compile_view;
use super::config::{BaseConfig, BASE_CONFIG_FILE, CONFIGS_DIR, DBT_CONFIG_FILE};
use super::context::{build_dbt_config, DbtConfig};
use super::naming::sanitize_identifier;
use super::render::{ModelTemplate, RenderContext, TemplateRenderer};
use crate::definitions::View;

pub fn project_name(view: &View) -> String {
    sanitize_identifier(&format!("{}_{}", view.name, view.version))
}

/// Paths of one project inside a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub name: String,
    pub root: PathBuf,
}

impl ProjectLayout {
    pub fn new(repo: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: repo.join(&name),
            name,
        }
    }

    pub fn for_view(repo: &Path, view: &View) -> Self {
        Self::new(repo, project_name(view))
    }

    pub fn base_config_path(&self) -> PathBuf {
        self.root.join(CONFIGS_DIR).join(BASE_CONFIG_FILE)
    }

    pub fn dbt_config_path(&self) -> PathBuf {
        self.root.join(CONFIGS_DIR).join(DBT_CONFIG_FILE)
    }

    pub fn template_path(&self, template: ModelTemplate) -> PathBuf {
        self.root.join(template.relative_path(&self.name))
    }

    pub fn is_initialized(&self) -> bool {
        self.base_config_path().exists()
    }
}

/// Compile `view` and write its base config and scaffolding.
pub fn init_project(
    repo: &Path,
    view: &View,
    renderer: &dyn TemplateRenderer,
) -> Result<ProjectLayout> {
    let layout = ProjectLayout::for_view(repo, view);
    let base = compile_view(view)
        .with_context(|| format!("Failed to compile view {}:{}", view.name, view.version))?;

    base.save(&layout.base_config_path())?;
    let ctx = RenderContext {
        project_name: &layout.name,
        base: &base,
        dbt: None,
    };
    for template in ModelTemplate::SCAFFOLD {
        write_template(&layout, template, renderer, &ctx)?;
    }

    info!(
        project = %layout.name,
        path = %layout.root.display(),
        attributes = base.transformed_attributes.len(),
        "initialized project"
    );
    Ok(layout)
}

/// Build the dbt config of an initialized project and render its models.
pub fn generate_project(
    layout: &ProjectLayout,
    renderer: &dyn TemplateRenderer,
) -> Result<Vec<PathBuf>> {
    let base = BaseConfig::load(&layout.base_config_path()).with_context(|| {
        format!(
            "Project {} is not initialized, run init first",
            layout.name
        )
    })?;
    let dbt = build_dbt_config(&base)
        .with_context(|| format!("Failed to build SQL context for {}", layout.name))?;
    dbt.save(&layout.dbt_config_path())?;

    let ctx = RenderContext {
        project_name: &layout.name,
        base: &base,
        dbt: Some(&dbt),
    };
    let written = ModelTemplate::MODELS
        .into_iter()
        .map(|template| write_template(layout, template, renderer, &ctx))
        .collect::<Result<Vec<_>>>()?;

    info!(
        project = %layout.name,
        renderer = renderer.name(),
        models = written.len(),
        "generated models"
    );
    Ok(written)
}

/// Load a previously generated dbt config.
pub fn load_dbt_config(layout: &ProjectLayout) -> Result<DbtConfig> {
    DbtConfig::load(&layout.dbt_config_path())
}

/// Every initialized project under `repo`, sorted by name.
pub fn discover_projects(repo: &Path) -> Result<Vec<ProjectLayout>> {
    let entries = std::fs::read_dir(repo)
        .with_context(|| format!("Could not read repository {}", repo.display()))?;

    let mut projects = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 directory");
            continue;
        };
        let layout = ProjectLayout::new(repo, name);
        if layout.is_initialized() {
            projects.push(layout);
        }
    }
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(projects)
}

fn write_template(
    layout: &ProjectLayout,
    template: ModelTemplate,
    renderer: &dyn TemplateRenderer,
    ctx: &RenderContext,
) -> Result<PathBuf> {
    let path = layout.template_path(template);
    let text = renderer
        .render(template, ctx)
        .with_context(|| format!("Failed to render {} for {}", template.name(), layout.name))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, text).with_context(|| format!("Could not write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autogen::render::SqlModelRenderer;
    use crate::definitions::{Aggregation, AttributeDefinition, Entity, EventRef};

    fn view() -> View {
        View::new("Shop-Activity", 2, Entity::new("user").with_key("domain_userid")).with_attribute(
            AttributeDefinition::new(
                "purchases",
                Aggregation::Counter,
                vec![EventRef::new("com.acme", "purchase", "1-0-0")],
            ),
        )
    }

    #[test]
    fn test_project_name_is_sanitized() {
        assert_eq!(project_name(&view()), "Shop_Activity_2");
    }

    #[test]
    fn test_init_then_generate() {
        let repo = tempfile::tempdir().unwrap();
        let renderer = SqlModelRenderer::default();

        let layout = init_project(repo.path(), &view(), &renderer).unwrap();
        assert!(layout.is_initialized());
        assert!(layout.root.join("dbt_project.yml").exists());
        assert!(layout.root.join("models/sources.yml").exists());

        let written = generate_project(&layout, &renderer).unwrap();
        assert_eq!(written.len(), 3);
        assert!(layout
            .root
            .join("models/Shop_Activity_2_daily_aggregates.sql")
            .exists());
        let dbt = load_dbt_config(&layout).unwrap();
        assert_eq!(dbt.attributes.lifetime_aggregates.len(), 1);
    }

    #[test]
    fn test_generate_requires_init() {
        let repo = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(repo.path(), "missing_1");
        assert!(generate_project(&layout, &SqlModelRenderer::default()).is_err());
    }

    #[test]
    fn test_discover_projects() {
        let repo = tempfile::tempdir().unwrap();
        let renderer = SqlModelRenderer::default();
        init_project(repo.path(), &view(), &renderer).unwrap();
        std::fs::create_dir_all(repo.path().join("not_a_project")).unwrap();

        let projects = discover_projects(repo.path()).unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Shop_Activity_2"]);
    }
}
