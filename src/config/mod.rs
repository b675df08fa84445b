use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

// Re-export transport config types
pub use crate::nats::{NatsConfig, TopicConfig};

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Equipment instances to run actors for
    #[serde(default)]
    pub equipment: Vec<ManagedEquipmentConfig>,
}

/// Equipment data store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("edge-equipment.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// One managed equipment instance
#[derive(Debug, Clone, Deserialize)]
pub struct ManagedEquipmentConfig {
    /// Equipment id in the data store
    pub id: String,
    /// Event definitions evaluated after each tag change
    #[serde(default)]
    pub event_definitions: Vec<String>,
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<EdgeConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: EdgeConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
