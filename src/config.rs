use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transport::Credentials;

/// On-disk settings document shared by the shells. The engine core never
/// reads this; shells resolve it down to a source id, a destination list
/// and an interval before calling in.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<Credentials>,
    /// Identifier of the channel to poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Destination id -> saved display name and whether it is ticked for
    /// broadcasting.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_defaults: Option<CliDefaults>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: None,
            source: None,
            interval_secs: default_interval(),
            groups: BTreeMap::new(),
            cli_defaults: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    #[serde(default)]
    pub selected: bool,
}

/// Last values the CLI shell ran with, offered back as defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Comma-separated destination ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ids: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

fn default_interval() -> u64 {
    60
}

impl Config {
    /// Destination ids ticked for broadcasting, in stored order.
    pub fn selected_destinations(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, group)| group.selected)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Load the document, falling back to defaults when the file is absent.
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "failed to parse config")
}

pub fn save(path: impl AsRef<Path>, config: &Config) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(config)?;
    // Atomic replace so a crash mid-write cannot truncate the document.
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".recast")
        .join("config.toml")
}
