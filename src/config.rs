//! Configuration management for panplay
//!
//! Handles config file loading/saving and the player settings snapshot.
//! Config is stored at ~/.config/panplay/config.toml

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Color tag applied to videos once they have been opened
pub const DEFAULT_COLOR_TAG: &str = "ce74c3c";

/// How subtitles are picked for a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleMode {
    /// Best name match among sibling files
    #[default]
    Auto,
    /// Caller supplies the subtitle file
    Select,
    Off,
}

/// Which stream flavour to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    /// Transcoded stream first, original file as fallback
    Online,
    /// Original file only
    #[default]
    Original,
}

/// Player preferences, captured once per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Player executable or command
    pub path: String,
    /// Keep the player alive when panplay exits
    pub detach: bool,
    /// Extra arguments appended after the built-in flags
    pub extra_args: Vec<String>,
    /// Serve sibling videos as a playlist through the local gateway
    pub enable_playlist: bool,
    /// Resume from and persist playback positions
    pub resume_history: bool,
    pub subtitle_mode: SubtitleMode,
    pub video_mode: VideoMode,
    /// Color-tag videos once they are played
    pub auto_color_tag: bool,
    pub color_tag: String,
    /// First port tried by the redirect gateway
    pub gateway_start_port: u16,
    /// How long to wait for the player's control channel
    pub connect_timeout_ms: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            path: "mpv".to_string(),
            detach: false,
            extra_args: Vec::new(),
            enable_playlist: true,
            resume_history: true,
            subtitle_mode: SubtitleMode::Auto,
            video_mode: VideoMode::Original,
            auto_color_tag: false,
            color_tag: DEFAULT_COLOR_TAG.to_string(),
            gateway_start_port: 12000,
            connect_timeout_ms: 5000,
        }
    }
}

impl PlayerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parse a comma-separated parameter string (`--a=1, --b`) into arguments
    pub fn parse_extra_args(params: &str) -> Vec<String> {
        params
            .split(',')
            .map(|p| p.split_whitespace().collect::<String>())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Drive API connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub base_url: String,
    pub access_token: Option<String>,
    /// Referer sent by the player when fetching media
    pub referer: String,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openapi.alipan.com".to_string(),
            access_token: None,
            referer: "https://openapi.alipan.com/".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub player: PlayerSettings,
    pub drive: DriveSettings,
}

impl Config {
    /// Get config file path (~/.config/panplay/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("panplay").join("config.toml"))
    }

    /// Load config from the default location, or return default if not found
    pub fn load() -> Self {
        Self::path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    /// Load config from a specific file, or return default if unreadable
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Get the drive access token with fallback chain:
    /// 1. Environment variable PANPLAY_ACCESS_TOKEN
    /// 2. Token stored in the config file
    pub fn access_token(&self) -> Option<String> {
        std::env::var("PANPLAY_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.drive.access_token.clone())
    }

    /// Snapshot of the player settings for one session
    ///
    /// `PANPLAY_PLAYER` overrides the configured player path.
    pub fn player_settings(&self) -> PlayerSettings {
        let mut settings = self.player.clone();
        if let Ok(path) = std::env::var("PANPLAY_PLAYER") {
            if !path.is_empty() {
                settings.path = path;
            }
        }
        settings
    }
}
