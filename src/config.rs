use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ScriptError};
use crate::util::{ensure_parent, expand_tilde};

/// How many recently opened scripts are remembered.
pub const MAX_RECENT: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentScript {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub version: u32,
    /// Directory or zip holding `roles.json` and official token art.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_repository: Option<String>,
    #[serde(default)]
    pub recent_scripts: Vec<RecentScript>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_opened: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

fn default_http_timeout() -> u64 {
    20
}

fn default_max_image_bytes() -> u64 {
    8 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            official_repository: None,
            recent_scripts: vec![],
            last_opened: None,
            http_timeout_secs: default_http_timeout(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl AppConfig {
    /// Records a script as most recently opened. Upserts by path.
    pub fn remember_script(&mut self, name: &str, path: &str, opened_at: Option<String>) {
        // Expand tilde so paths are always absolute
        let path = expand_tilde(path).to_string_lossy().to_string();
        self.recent_scripts.retain(|s| s.path != path);
        self.recent_scripts.insert(
            0,
            RecentScript {
                name: name.to_string(),
                path: path.clone(),
                opened_at,
            },
        );
        self.recent_scripts.truncate(MAX_RECENT);
        self.last_opened = Some(path);
    }

    pub fn official_repository_path(&self) -> Option<PathBuf> {
        self.official_repository.as_deref().map(expand_tilde)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".botc-scripts").join("config.json"))
}

/// Reads a config file. A missing or unreadable file yields `None`.
pub fn load_from(path: &Path) -> Option<AppConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn save_to(path: &Path, config: &AppConfig) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Loads the user's config, falling back to defaults.
pub fn load_config() -> AppConfig {
    config_path().and_then(|p| load_from(&p)).unwrap_or_default()
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    let path = config_path()
        .ok_or_else(|| ScriptError::Custom("Cannot find home directory".into()))?;
    save_to(&path, config)
}

/// Adds a script to the recent list in the user's config and writes it.
pub fn remember_script(name: &str, path: &str) -> Result<AppConfig> {
    let mut config = load_config();
    config.remember_script(name, path, None);
    save_config(&config)?;
    Ok(config)
}
