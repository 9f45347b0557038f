use serde::{Deserialize, Serialize};

use super::attribute::AttributeDefinition;
use super::period::Period;

/// The thing attributes are computed for, e.g. a user or a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    /// Column that identifies the entity in event data. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            description: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn key_column(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }
}

/// Versioned pointer to a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewReference {
    pub name: String,
    pub version: u32,
}

/// A named, versioned group of attributes keyed by one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub entity: Entity,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub online: bool,
    #[serde(default)]
    pub offline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Period>,
    #[serde(default)]
    pub is_published: bool,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl View {
    pub fn new(name: impl Into<String>, version: u32, entity: Entity) -> Self {
        Self {
            name: name.into(),
            version,
            entity,
            attributes: Vec::new(),
            owner: None,
            description: None,
            online: true,
            offline: false,
            ttl: None,
            is_published: false,
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Offline views are materialized by a generated warehouse project.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn reference(&self) -> ViewReference {
        ViewReference {
            name: self.name.clone(),
            version: self.version,
        }
    }

    /// Fully qualified attribute keys as used by online lookups: `view:version:attribute`.
    pub fn attribute_keys(&self) -> Vec<String> {
        self.attributes
            .iter()
            .map(|a| format!("{}:{}:{}", self.name, self.version, a.name))
            .collect()
    }
}

/// A bundle of views served together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub views: Vec<ViewReference>,
    #[serde(default)]
    pub is_published: bool,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            owner: None,
            views: Vec::new(),
            is_published: false,
        }
    }

    pub fn with_view(mut self, view: &View) -> Self {
        self.views.push(view.reference());
        self
    }
}
