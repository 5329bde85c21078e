use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use uplink_command::{SynthesisContext, DEFAULT_PORT_BASE};
use uplink_engine::SupervisorConfig;

/// Runtime settings of the `uplink` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Where playlists, guide data and the analysis report are written.
    pub work_dir: PathBuf,

    /// First loopback port for secondary encoder links.
    pub port_base: u16,

    pub supervisor: SupervisorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("uplink"),
            port_base: DEFAULT_PORT_BASE,
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load settings from a JSON file, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Synthesis inputs for a launch at `now`.
    pub fn synthesis_context(&self, now: DateTime<Utc>) -> SynthesisContext {
        let mut context = SynthesisContext::new(now, &self.work_dir);
        context.port_base = self.port_base;
        context
    }
}
