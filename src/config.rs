//! Application configuration
//!
//! A small JSON file holding the enabled-provider set, refresh interval, and
//! display order. The orchestrator re-reads it at the start of every fetch
//! round, so edits take effect on the next round without a restart.

use crate::model::ProviderId;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_REFRESH_SECONDS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub refresh_seconds: u64,
    pub enabled_providers: Vec<ProviderId>,
    pub provider_order: Vec<ProviderId>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_seconds: DEFAULT_REFRESH_SECONDS,
            enabled_providers: ProviderId::all(),
            provider_order: ProviderId::all(),
        }
    }
}

impl AppConfig {
    pub fn is_enabled(&self, provider: ProviderId) -> bool {
        self.enabled_providers.contains(&provider)
    }

    /// Providers in display order: configured order first, then anything the
    /// config does not mention in canonical order.
    pub fn ordered_providers(&self) -> Vec<ProviderId> {
        let mut ordered: Vec<ProviderId> = self
            .provider_order
            .iter()
            .copied()
            .filter(|p| ProviderId::all().contains(p))
            .collect();
        for provider in ProviderId::all() {
            if !ordered.contains(&provider) {
                ordered.push(provider);
            }
        }
        ordered
    }
}

/// Application data directory (`QUOTABAR_HOME` overrides for tests/tooling).
pub fn app_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(custom) = std::env::var("QUOTABAR_HOME") {
        return Ok(PathBuf::from(custom));
    }
    let base = dirs::data_dir().context("Could not determine data directory")?;
    Ok(base.join("QuotaBar"))
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(app_data_dir()?.join("config.json"))
}

/// Load the config file, falling back to defaults when absent.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> anyhow::Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(())
}
