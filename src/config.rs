// Endpoint configuration for the chat backend services.
// Loaded once from the config directory; defaults are written out on first
// run so the file is easy to find and edit.

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::credentials::get_config_dir;

fn default_websocket_url() -> String {
    "wss://chat.example.com/ws".to_string()
}

fn default_api_url() -> String {
    "https://chat.example.com/api".to_string()
}

fn default_realtime_url() -> String {
    "wss://realtime.example.com/socket".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            websocket_url: default_websocket_url(),
            api_url: default_api_url(),
            realtime_url: default_realtime_url(),
        }
    }
}

fn config_path() -> Result<PathBuf> {
    let mut path = get_config_dir()?;
    path.push("config.json");
    Ok(path)
}

impl ClientConfig {
    /// Load the config file, falling back to defaults when it is missing
    /// or unreadable. A fresh default file is written on first run.
    pub fn load() -> Self {
        let path = match config_path() {
            Ok(p) => p,
            Err(e) => {
                warn!("Could not resolve config path: {}", e);
                return ClientConfig::default();
            }
        };

        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => warn!("Malformed config at {}: {}", path.display(), e),
                },
                Err(e) => warn!("Could not read config at {}: {}", path.display(), e),
            }
            return ClientConfig::default();
        }

        let config = ClientConfig::default();
        if let Err(e) = config.save() {
            warn!("Could not write default config: {}", e);
        } else {
            info!("Wrote default config to {}", path.display());
        }
        config
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
