//! `AppConfig`: user preferences persisted to `appsettings.json` (§3, §6).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PersistError;
use crate::platform;

pub const SCHEMA_VERSION: u32 = 1;

pub const ENGINE_PREFERENCES: &[&str] = &["auto", "vlc", "mpv", "mediafoundation", "ffplay"];
pub const GLYPH_SETS: &[&str] = &["auto", "unicode", "ascii"];
pub const NETWORK_PROFILES: &[&str] = &["standard", "badnetwork"];
pub const SORT_KEYS: &[&str] = &["pubdate", "title", "played", "progress", "feed"];
pub const SORT_DIRS: &[&str] = &["asc", "desc"];

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED_RUNTIME: f32 = 3.0;
pub const MAX_SPEED_CONFIG: f32 = 4.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_engine_preference")]
    pub engine_preference: String,
    #[serde(default = "default_volume")]
    pub volume_0_100: u8,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_glyph_set")]
    pub glyph_set: String,
    #[serde(default = "default_network_profile")]
    pub network_profile: String,
    #[serde(default)]
    pub start_offline: bool,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub view_defaults: ViewDefaults,
    #[serde(default)]
    pub last_selection: LastSelection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiConfig {
    #[serde(default)]
    pub player_at_top: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            player_at_top: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewDefaults {
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_sort_dir")]
    pub sort_dir: String,
    #[serde(default)]
    pub unplayed_only: bool,
    /// Whether next-episode selection wraps back to the top of a feed once
    /// it runs past the last episode (§4.2 Next-episode selection).
    #[serde(default = "default_wrap_advance")]
    pub wrap_advance: bool,
}

impl Default for ViewDefaults {
    fn default() -> Self {
        Self {
            sort_by: default_sort_by(),
            sort_dir: default_sort_dir(),
            unplayed_only: false,
            wrap_advance: default_wrap_advance(),
        }
    }
}

fn default_wrap_advance() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LastSelection {
    #[serde(default)]
    pub feed_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub episode_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub search: Option<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_engine_preference() -> String {
    "auto".to_string()
}

fn default_volume() -> u8 {
    80
}

fn default_speed() -> f32 {
    1.0
}

fn default_theme() -> String {
    "dark".to_string()
}

fn default_glyph_set() -> String {
    "auto".to_string()
}

fn default_network_profile() -> String {
    "standard".to_string()
}

fn default_sort_by() -> String {
    "pubdate".to_string()
}

fn default_sort_dir() -> String {
    "desc".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            engine_preference: default_engine_preference(),
            volume_0_100: default_volume(),
            speed: default_speed(),
            theme: default_theme(),
            glyph_set: default_glyph_set(),
            network_profile: default_network_profile(),
            start_offline: false,
            ui: UiConfig::default(),
            view_defaults: ViewDefaults::default(),
            last_selection: LastSelection::default(),
        }
    }
}

impl AppConfig {
    pub fn path() -> PathBuf {
        platform::app_settings_path()
    }

    /// Loads config from disk, clearing any orphan `.tmp` first and parsing
    /// as relaxed JSON (comments/trailing commas tolerated). Returns
    /// `PersistError` on a missing or corrupt file rather than swallowing it
    /// (§4.5, §7 `ConfigCorrupt`).
    pub fn load() -> Result<Self, PersistError> {
        let mut cfg: Self = crate::atomic::read_relaxed_json(&Self::path())?;
        cfg.normalise();
        Ok(cfg)
    }

    /// Loads config from disk, tolerating a missing or corrupt file by
    /// falling back to defaults rather than failing startup (§4.5, §7).
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("{}: {}", PersistError::ConfigCorrupt, e);
                Self::default()
            }
        }
    }

    /// Clamps and canonicalises all enum-like and numeric fields in place
    /// (§4.5 Load/normalise contract).
    pub fn normalise(&mut self) {
        if !ENGINE_PREFERENCES.contains(&self.engine_preference.to_lowercase().as_str()) {
            self.engine_preference = default_engine_preference();
        } else {
            self.engine_preference = self.engine_preference.to_lowercase();
        }
        if !GLYPH_SETS.contains(&self.glyph_set.to_lowercase().as_str()) {
            self.glyph_set = default_glyph_set();
        } else {
            self.glyph_set = self.glyph_set.to_lowercase();
        }
        if !NETWORK_PROFILES.contains(&self.network_profile.to_lowercase().as_str()) {
            self.network_profile = default_network_profile();
        } else {
            self.network_profile = self.network_profile.to_lowercase();
        }
        if !SORT_KEYS.contains(&self.view_defaults.sort_by.to_lowercase().as_str()) {
            self.view_defaults.sort_by = default_sort_by();
        } else {
            self.view_defaults.sort_by = self.view_defaults.sort_by.to_lowercase();
        }
        if !SORT_DIRS.contains(&self.view_defaults.sort_dir.to_lowercase().as_str()) {
            self.view_defaults.sort_dir = default_sort_dir();
        } else {
            self.view_defaults.sort_dir = self.view_defaults.sort_dir.to_lowercase();
        }

        self.volume_0_100 = self.volume_0_100.min(100);
        if !self.speed.is_finite() || self.speed <= 0.0 {
            self.speed = default_speed();
        }
        self.speed = self.speed.clamp(MIN_SPEED, MAX_SPEED_CONFIG);
    }

    pub fn save(&self) -> anyhow::Result<()> {
        crate::atomic::write_json_atomic(&Self::path(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.schema_version, SCHEMA_VERSION);
        assert_eq!(cfg.engine_preference, "auto");
        assert_eq!(cfg.volume_0_100, 80);
        assert_eq!(cfg.speed, 1.0);
        assert_eq!(cfg.view_defaults.sort_by, "pubdate");
    }

    #[test]
    fn normalise_clamps_out_of_range_speed() {
        let mut cfg = AppConfig::default();
        cfg.speed = 999.0;
        cfg.normalise();
        assert_eq!(cfg.speed, MAX_SPEED_CONFIG);

        cfg.speed = f32::NAN;
        cfg.normalise();
        assert_eq!(cfg.speed, default_speed());
    }

    #[test]
    fn normalise_rejects_unknown_engine_preference() {
        let mut cfg = AppConfig::default();
        cfg.engine_preference = "bogus".to_string();
        cfg.normalise();
        assert_eq!(cfg.engine_preference, "auto");
    }

    #[test]
    fn normalise_canonicalises_case() {
        let mut cfg = AppConfig::default();
        cfg.engine_preference = "MPV".to_string();
        cfg.normalise();
        assert_eq!(cfg.engine_preference, "mpv");
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, AppConfig::default());
    }
}
