//! Playground configuration, stored as pretty-printed JSON.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::Limits;

/// Settings shared by every session of a [`crate::host::Playground`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    /// Release new sessions use when none is requested (default: the latest
    /// registered release)
    pub default_version: Option<String>,

    /// Limits applied to every execution
    pub limits: Limits,

    /// Enable debug tracing
    pub debug: bool,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            default_version: None,
            limits: Limits::default(),
            debug: false,
        }
    }
}

impl PlaygroundConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to deserialize config: {:?}", path))?;
        Ok(config)
    }

    /// Write the configuration, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize config")?;

        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
        file.write_all(&json).context("Failed to write config")?;
        file.sync_all().context("Failed to sync config")?;
        drop(file);

        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
        Ok(())
    }
}
