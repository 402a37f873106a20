//! Local playback orchestration
//!
//! - Player: command-line building and spawning for mpv/PotPlayer
//! - Ipc: mpv JSON control channel
//! - Gateway: local redirect server the playlist points at
//! - Playlist: M3U/DPL rendering and the session playlist file
//! - Tracker: resume cursors, subtitle pushes and tagging on switches
//! - Session: one launch, and its one-time teardown

pub mod gateway;
pub mod ipc;
pub mod player;
pub mod playlist;
pub mod resolve;
pub mod session;
pub mod subtitles;
pub mod tracker;

pub use gateway::Gateway;
pub use ipc::{ControlChannel, PlayerControl, SeekMode};
pub use player::{LaunchCommand, PlayerKind};
pub use session::{PlayRequest, Session, Teardown};
pub use subtitles::best_subtitle;
pub use tracker::PositionTracker;
