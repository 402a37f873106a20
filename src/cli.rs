//! CLI - Command Line Interface for panplay
//!
//! Every command is scriptable. With `--json` (or when stdout is not a
//! terminal) results are printed as JSON.
//!
//! # Examples
//!
//! ```bash
//! # Play a file, with its siblings as a playlist
//! panplay play <drive_id> <file_id> --parent <dir_id>
//!
//! # Show the player command line without starting anything
//! panplay play <drive_id> <file_id> --dry-run --json
//!
//! # Try the subtitle matcher
//! panplay match-subtitle "Show.S01E02.mkv" Show.S01E01.srt Show.S01E02.srt
//! ```

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::config::PlayerSettings;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Player executable not found
    PlayerNotFound = 4,
    /// No playable URL could be resolved
    ResolutionFailed = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// panplay - play cloud-drive videos in a local player
#[derive(Parser, Debug)]
#[command(
    name = "panplay",
    version,
    about = "Play cloud-drive videos in mpv or PotPlayer",
    long_about = "Launches a local media player against a cloud-drive file, \
                  serves its siblings as a playlist through a local redirect \
                  gateway, and keeps resume positions in sync.",
    after_help = "EXAMPLES:\n\
                  panplay play DRIVE FILE --parent DIR     Play with playlist\n\
                  panplay play DRIVE FILE --dry-run        Show the command line\n\
                  panplay match-subtitle NAME A.srt B.srt  Pick a subtitle\n\
                  panplay config --path                    Show config location"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a drive file in the configured player
    #[command(visible_alias = "p")]
    Play(PlayCmd),

    /// Pick the subtitle name closest to a video name
    #[command(visible_alias = "ms")]
    MatchSubtitle(MatchSubtitleCmd),

    /// Show the effective configuration
    Config(ConfigCmd),
}

// =============================================================================
// Play Command
// =============================================================================

/// Play a drive file
#[derive(Args, Debug, Clone)]
pub struct PlayCmd {
    /// Drive holding the file
    pub drive_id: String,

    /// File to play
    pub file_id: String,

    /// Directory holding the file (siblings become the playlist)
    #[arg(long, short = 'P')]
    pub parent: Option<String>,

    /// Player command, overriding the config
    #[arg(long, short = 'p')]
    pub player: Option<String>,

    /// Subtitle file id to load
    #[arg(long, short = 's')]
    pub subtitle: Option<String>,

    /// Play the single file without a playlist
    #[arg(long)]
    pub no_playlist: bool,

    /// Neither resume nor save the playback position
    #[arg(long)]
    pub no_history: bool,

    /// Keep the player running after panplay exits
    #[arg(long)]
    pub detach: bool,

    /// Extra player arguments, comma separated
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,

    /// Print the player command line and exit
    #[arg(long)]
    pub dry_run: bool,
}

impl PlayCmd {
    /// Layer the command-line overrides onto the configured settings
    pub fn apply(&self, mut settings: PlayerSettings) -> PlayerSettings {
        if let Some(player) = &self.player {
            settings.path = player.clone();
        }
        if self.no_playlist {
            settings.enable_playlist = false;
        }
        if self.no_history {
            settings.resume_history = false;
        }
        if self.detach {
            settings.detach = true;
        }
        if let Some(args) = &self.args {
            settings.extra_args = PlayerSettings::parse_extra_args(args);
        }
        if self.subtitle.is_some() && settings.subtitle_mode == crate::config::SubtitleMode::Off {
            settings.subtitle_mode = crate::config::SubtitleMode::Select;
        }
        settings
    }
}

// =============================================================================
// Match Subtitle Command
// =============================================================================

/// Pick the closest subtitle name
#[derive(Args, Debug, Clone)]
pub struct MatchSubtitleCmd {
    /// Video file name
    pub name: String,

    /// Candidate subtitle names
    pub candidates: Vec<String>,
}

// =============================================================================
// Config Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ConfigCmd {
    /// Only print the config file location
    #[arg(long)]
    pub path: bool,

    /// Write the effective configuration to the config file
    #[arg(long, conflicts_with = "path")]
    pub init: bool,
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            exit_code: code.into(),
        }
    }
}

/// Result of `play --dry-run`
#[derive(Debug, Serialize, Deserialize)]
pub struct DryRunResponse {
    pub player: String,
    pub command: String,
    pub playlist: bool,
    pub entries: usize,
    pub start_index: usize,
}

/// Result of a finished `play`
#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub status: &'static str,
    pub session: String,
    pub player: String,
    pub file_id: String,
}

/// Result of `match-subtitle`
#[derive(Debug, Serialize, Deserialize)]
pub struct MatchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubtitleMode;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["panplay"]).is_err());
    }

    #[test]
    fn test_play_command() {
        let cli = Cli::parse_from([
            "panplay",
            "play",
            "drive1",
            "file1",
            "--parent",
            "dir1",
            "--no-playlist",
            "--args",
            "--volume=50, --mute=yes",
        ]);
        let Command::Play(cmd) = cli.command else {
            panic!("Expected Play command");
        };
        assert_eq!(cmd.drive_id, "drive1");
        assert_eq!(cmd.file_id, "file1");
        assert_eq!(cmd.parent.as_deref(), Some("dir1"));

        let settings = cmd.apply(PlayerSettings::default());
        assert!(!settings.enable_playlist);
        assert!(settings.resume_history);
        assert_eq!(settings.extra_args, vec!["--volume=50", "--mute=yes"]);
    }

    #[test]
    fn test_play_overrides_player_and_history() {
        let cli = Cli::parse_from([
            "panplay", "play", "d", "f", "-p", "PotPlayerMini64.exe", "--no-history", "-s", "sub1",
        ]);
        let Command::Play(cmd) = cli.command else {
            panic!("Expected Play command");
        };
        let base = PlayerSettings {
            subtitle_mode: SubtitleMode::Off,
            ..PlayerSettings::default()
        };
        let settings = cmd.apply(base);
        assert_eq!(settings.path, "PotPlayerMini64.exe");
        assert!(!settings.resume_history);
        assert_eq!(settings.subtitle_mode, SubtitleMode::Select);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["panplay", "--json", "--quiet", "-v", "config", "--path"]);
        assert!(cli.json);
        assert!(cli.quiet);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Config(ConfigCmd { path: true, .. })));
    }

    #[test]
    fn test_match_subtitle_command() {
        let cli = Cli::parse_from(["panplay", "ms", "Ep1.mkv", "Ep1.srt", "Ep2.srt"]);
        let Command::MatchSubtitle(cmd) = cli.command else {
            panic!("Expected MatchSubtitle command");
        };
        assert_eq!(cmd.name, "Ep1.mkv");
        assert_eq!(cmd.candidates, vec!["Ep1.srt", "Ep2.srt"]);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::Error), 1);
        assert_eq!(i32::from(ExitCode::InvalidArgs), 2);
        assert_eq!(i32::from(ExitCode::NetworkError), 3);
        assert_eq!(i32::from(ExitCode::PlayerNotFound), 4);
        assert_eq!(i32::from(ExitCode::ResolutionFailed), 5);
    }
}
