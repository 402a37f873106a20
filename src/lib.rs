//! panplay - play cloud-drive videos in a local media player
//!
//! Launches mpv or PotPlayer against files that only exist behind
//! time-limited signed URLs. Sibling videos are served as a playlist whose
//! entries point at a local redirect gateway, so URL expiry never breaks the
//! list, and playback positions are synced back to the drive.
//!
//! # Modules
//!
//! - `models` - Drive files, playlist entries, resolved URLs, control events
//! - `api` - Drive collaborator trait and its HTTP client
//! - `playback` - Player launch, control channel, gateway, playlist, tracking
//! - `config` - Settings file and per-session snapshot
//! - `cli` / `commands` - Command-line surface

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod playback;

// Re-export commonly used types
pub use models::{
    ControlEvent, DriveFile, FileCategory, FileMetadata, PlaylistEntry, ResolvedUrl,
    SubtitleCandidate, UrlMode,
};

pub use api::{DriveClient, DriveService};
pub use config::{Config, PlayerSettings};
pub use error::{ApiError, PlaybackError};
pub use playback::{PlayRequest, Session};
