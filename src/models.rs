//! Data structures and types for panplay
//!
//! Contains the shared models used across the orchestrator, organized by domain:
//! - **Drive**: file listings and metadata returned by the cloud drive
//! - **Playlist**: entries served to the player through the gateway
//! - **Resolution**: signed media URLs and their expiry
//! - **Control**: events read from the player's control channel
//! - **Subtitles**: sibling files eligible for subtitle matching

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Subtitle extensions picked up from a directory listing
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa"];

// =============================================================================
// Drive Models
// =============================================================================

/// Coarse file category reported by the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Video,
    Audio,
    Image,
    Doc,
    Zip,
    #[default]
    #[serde(other)]
    Others,
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Image => "image",
            FileCategory::Doc => "doc",
            FileCategory::Zip => "zip",
            FileCategory::Others => "others",
        };
        write!(f, "{}", s)
    }
}

/// A file or folder as listed by the drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveFile {
    pub drive_id: String,
    pub file_id: String,
    #[serde(default)]
    pub parent_file_id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, rename = "file_extension")]
    pub extension: String,
    #[serde(default)]
    pub category: FileCategory,
    /// Free-form description; the client stores color tags here
    #[serde(default)]
    pub description: String,
    /// Set when the drive has flagged the file as a violation
    #[serde(default)]
    pub punish_flag: i64,
}

impl DriveFile {
    pub fn is_dir(&self) -> bool {
        self.kind == "folder"
    }

    pub fn is_violation(&self) -> bool {
        self.punish_flag > 0
    }

    /// Lower-cased extension, falling back to the name suffix
    pub fn ext(&self) -> String {
        if !self.extension.is_empty() {
            return self.extension.to_lowercase();
        }
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default()
    }

    pub fn is_subtitle(&self) -> bool {
        let ext = self.ext();
        SUBTITLE_EXTENSIONS.contains(&ext.as_str())
    }
}

/// Playback-related metadata for one file
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Total duration in seconds (0 when unknown)
    pub duration: f64,
    /// Last persisted playback position in seconds
    pub resume_cursor: f64,
}

impl FileMetadata {
    /// Seconds kept between a resume point and the end of the file
    pub const END_GUARD_SECS: f64 = 10.0;

    /// Resume cursor pulled back from the very end of the file
    ///
    /// A cursor that sits within the last ten seconds would make the player
    /// finish immediately, so it is clamped to `duration - 10`.
    pub fn resume_position(&self) -> f64 {
        let mut cursor = self.resume_cursor.max(0.0);
        if self.duration > 0.0 && cursor >= self.duration - Self::END_GUARD_SECS {
            cursor = (self.duration - Self::END_GUARD_SECS).max(0.0);
        }
        cursor
    }
}

// =============================================================================
// Playlist Models
// =============================================================================

/// One entry of a session playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub file_id: String,
    pub drive_id: String,
    pub name: String,
    pub extension: String,
    pub category: FileCategory,
    /// Already carries the auto color tag
    pub tagged: bool,
    /// Direct-download fallback is forbidden for this file
    pub violation: bool,
}

impl From<&DriveFile> for PlaylistEntry {
    fn from(file: &DriveFile) -> Self {
        Self {
            file_id: file.file_id.clone(),
            drive_id: file.drive_id.clone(),
            name: file.name.clone(),
            extension: file.ext(),
            category: file.category,
            tagged: !file.description.is_empty(),
            violation: file.is_violation(),
        }
    }
}

// =============================================================================
// Resolution Models
// =============================================================================

/// Which kind of media URL to ask the drive for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlMode {
    /// Server-side transcoded stream
    Transcoded,
    /// Original file download URL
    Direct,
}

/// A signed media URL that stops working at `expires_at`
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUrl {
    pub url: String,
    pub expires_at: Instant,
}

impl ResolvedUrl {
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Control Models
// =============================================================================

/// Event emitted by the control channel towards the position tracker
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// An observed property changed value
    PropertyChanged {
        name: String,
        value: serde_json::Value,
    },
    /// Latest playback position in seconds
    TimePosition(f64),
    /// A seek finished; markers are positions before and after
    Seeked {
        start: Option<f64>,
        end: Option<f64>,
    },
    /// A file finished loading and playback started
    Started,
    /// The player went away (crash, quit, or lost connection)
    Crashed,
}

// =============================================================================
// Subtitle Models
// =============================================================================

/// A sibling file that may serve as a subtitle track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCandidate {
    pub file_id: String,
    pub name: String,
    pub extension: String,
}

impl SubtitleCandidate {
    /// Subtitle candidates among a directory listing, in listing order
    pub fn from_listing(files: &[DriveFile]) -> Vec<SubtitleCandidate> {
        files
            .iter()
            .filter(|f| !f.is_dir() && f.is_subtitle())
            .map(|f| SubtitleCandidate {
                file_id: f.file_id.clone(),
                name: f.name.clone(),
                extension: f.ext(),
            })
            .collect()
    }
}

// =============================================================================
// Formatting Helpers
// =============================================================================

/// Format seconds as `HH:MM:SS` for player seek flags
pub fn human_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
