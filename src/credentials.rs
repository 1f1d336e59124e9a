// Bearer-token storage for the chat backend.
// A missing token means "cannot connect", never a hard error: the connection
// manager silently skips the connect attempt and the UI shows disconnected.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(token: &str) -> Self {
        Credentials {
            token: Some(BASE64.encode(token)),
        }
    }

    /// Decode the stored token. Undecodable entries are treated as absent.
    pub fn get_token(&self) -> Option<String> {
        let encoded = self.token.as_ref()?;
        let bytes = BASE64.decode(encoded).ok()?;
        let token = String::from_utf8(bytes).ok()?;
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

/// Directory holding config and credential files.
/// CHATWIRE_DIR_OVERRIDE redirects it, which the tests rely on.
pub fn get_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("CHATWIRE_DIR_OVERRIDE") {
        return Ok(PathBuf::from(dir));
    }

    let mut dir = dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    dir.push("chatwire");
    Ok(dir)
}

fn credentials_path() -> Result<PathBuf> {
    let mut path = get_config_dir()?;
    path.push("credentials.json");
    Ok(path)
}

pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    let path = credentials_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(credentials)?;
    fs::write(&path, json)?;
    info!("Saved credentials to {}", path.display());
    Ok(())
}

/// Load the bearer token, if one has been stored.
pub fn load_token() -> Option<String> {
    let path = credentials_path().ok()?;
    if !path.exists() {
        debug!("No credentials file at {}", path.display());
        return None;
    }
    let contents = fs::read_to_string(&path).ok()?;
    let credentials: Credentials = serde_json::from_str(&contents).ok()?;
    credentials.get_token()
}
