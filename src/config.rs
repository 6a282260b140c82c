//! Configuration Management
//!
//! Handles persistent configuration storage for steward.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Last used region
    #[serde(default)]
    pub region: Option<String>,
    /// Provider endpoint override (private deployments)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Last executed policy file
    #[serde(default)]
    pub last_policy_file: Option<String>,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("steward").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Get effective region (CLI > config > env > default)
    pub fn effective_region(&self) -> String {
        self.region
            .clone()
            .or_else(|| std::env::var("STEWARD_REGION").ok())
            .unwrap_or_else(|| "us-east-1".to_string())
    }

    /// Set region and save
    pub fn set_region(&mut self, region: &str) -> Result<()> {
        self.region = Some(region.to_string());
        self.save()
    }

    /// Set last policy file and save
    pub fn set_last_policy_file(&mut self, path: &str) -> Result<()> {
        self.last_policy_file = Some(path.to_string());
        self.save()
    }
}
