//! Generated-project state shared between CLI invocations.
//!
//! `init` writes `configs/base_config.json`; `generate` reads it back and
//! writes `configs/dbt_config.json`. Both files must round-trip exactly.
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::context::DbtConfig;
use super::ingest::PropertyMapping;
use super::steps::AttributeSteps;

pub const CONFIGS_DIR: &str = "configs";
pub const BASE_CONFIG_FILE: &str = "base_config.json";
pub const DBT_CONFIG_FILE: &str = "dbt_config.json";

/// Output of compiling one view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    pub events: Vec<String>,
    pub properties: Vec<PropertyMapping>,
    pub periods: BTreeSet<String>,
    pub transformed_attributes: Vec<AttributeSteps>,
    pub entity_key: String,
}

impl BaseConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }
}

impl DbtConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    let value = serde_json::from_str(&data)
        .with_context(|| format!("Could not parse {}", path.display()))?;
    Ok(value)
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(path, data).with_context(|| format!("Could not write {}", path.display()))?;
    Ok(())
}
