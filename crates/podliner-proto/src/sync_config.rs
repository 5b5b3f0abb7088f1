//! Persisted gPodder sync configuration (`gpodder.json`, §4.8, §6).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform;

pub const DEVICE_ID_MAX_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncConfig {
    pub server_url: Option<String>,
    pub username: Option<String>,
    /// Plaintext fallback password, only populated when OS keyring storage
    /// failed (§4.8 Credential storage). Prefer `keyring` when available.
    #[serde(default)]
    pub password_plaintext: Option<String>,
    #[serde(default)]
    pub credential_fallback_warned: bool,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default)]
    pub subs_timestamp: u64,
    #[serde(default)]
    pub actions_timestamp: u64,
    #[serde(default)]
    pub last_known_server_feeds: Vec<String>,
    #[serde(default)]
    pub pending_actions: Vec<crate::gpodder::EpisodeAction>,
}

fn default_device_id() -> String {
    let hostname = hostname_best_effort();
    let mut id = format!("podliner-{hostname}");
    id.truncate(DEVICE_ID_MAX_LEN);
    id
}

fn hostname_best_effort() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "host".to_string())
}

impl SyncConfig {
    pub fn path() -> PathBuf {
        platform::gpodder_config_path()
    }

    pub fn load_or_default() -> Self {
        let path = Self::path();
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        crate::atomic::write_json_atomic(&Self::path(), self)
    }

    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.username.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_id_is_within_length_limit_and_prefixed() {
        let id = default_device_id();
        assert!(id.starts_with("podliner-"));
        assert!(id.len() <= DEVICE_ID_MAX_LEN);
    }

    #[test]
    fn not_configured_without_server_and_username() {
        let cfg = SyncConfig::default();
        assert!(!cfg.is_configured());
    }

    #[test]
    fn configured_once_server_and_username_set() {
        let mut cfg = SyncConfig::default();
        cfg.server_url = Some("https://gpodder.net".into());
        cfg.username = Some("alice".into());
        assert!(cfg.is_configured());
    }
}
