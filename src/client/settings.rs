use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_URL: &str = "SIGNALS_API_URL";
pub const ENV_API_KEY: &str = "SIGNALS_API_KEY";
pub const ENV_API_KEY_ID: &str = "SIGNALS_API_KEY_ID";
pub const ENV_ORG_ID: &str = "SIGNALS_ORG_ID";

/// Connection settings for the Signals registry API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub api_url: String,
    /// Never written to disk; supply it through the environment or a flag.
    #[serde(skip_serializing, default)]
    pub api_key: String,
    #[serde(default)]
    pub api_key_id: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: String::from("http://localhost:8000"),
            api_key: String::new(),
            api_key_id: String::new(),
            org_id: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClientSettings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("signals")
            .join("config.toml")
    }

    /// Settings file, then environment. Missing file means defaults.
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(&Self::config_path())?;
        settings.apply_env_with(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("Could not parse {}", path.display()))?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Override fields from `lookup`, skipping unset and empty values.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut String); 4] = [
            (ENV_API_URL, &mut self.api_url),
            (ENV_API_KEY, &mut self.api_key),
            (ENV_API_KEY_ID, &mut self.api_key_id),
            (ENV_ORG_ID, &mut self.org_id),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `api_url` without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_api_key_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals").join("config.toml");
        let settings = ClientSettings {
            api_url: "https://signals.example.com/".into(),
            api_key: "secret".into(),
            api_key_id: "key-id".into(),
            org_id: "org".into(),
            timeout_secs: 5,
        };
        settings.save_to(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("secret"));

        let loaded = ClientSettings::load_from(&path).unwrap();
        assert_eq!(loaded.api_key, "");
        assert_eq!(loaded.api_key_id, "key-id");
        assert_eq!(loaded.base_url(), "https://signals.example.com");
        assert_eq!(loaded.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ClientSettings::load_from(&dir.path().join("none.toml")).unwrap();
        assert_eq!(loaded, ClientSettings::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "https://override"),
            (ENV_API_KEY, "k"),
            (ENV_ORG_ID, ""),
        ]);
        let mut settings = ClientSettings {
            org_id: "from-file".into(),
            ..Default::default()
        };
        settings.apply_env_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(settings.api_url, "https://override");
        assert_eq!(settings.api_key, "k");
        assert_eq!(settings.org_id, "from-file");
    }
}
