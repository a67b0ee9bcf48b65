//! Application config scaffolding
//!
//! The supervised application reads its Art-Net target and MIDI bindings from a
//! JSON file. The console creates it with defaults before the first spawn and
//! never touches an existing file.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub art_net_config: ArtNetConfig,

    /// Input-device bindings, keyed by control identifier
    #[serde(default)]
    pub midi_mappings: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtNetConfig {
    pub ip: Ipv4Addr,
    pub subnet: u8,
    pub universe: u8,
    pub net: u8,
    pub port: u16,
    /// Milliseconds
    pub base_refresh_interval: u64,
}

impl Default for ArtNetConfig {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::new(192, 168, 1, 199),
            subnet: 0,
            universe: 0,
            net: 0,
            port: 6454,
            base_refresh_interval: 1000,
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            art_net_config: ArtNetConfig::default(),
            midi_mappings: HashMap::new(),
        }
    }
}

/// Write the default config to `path` unless something is already there.
///
/// Returns `true` when a file was created.
pub fn ensure_default(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(&StageConfig::default())?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("created default app config at {}", path.display());
    Ok(true)
}
