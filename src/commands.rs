//! CLI Command Handlers
//!
//! Implements all CLI commands by calling the playback layer.
//! Each handler takes CLI args and Output, returns ExitCode.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::api::{DriveClient, DriveService};
use crate::cli::{
    ConfigCmd, DryRunResponse, ExitCode, MatchResponse, MatchSubtitleCmd, Output, PlayCmd,
    PlayResponse,
};
use crate::config::Config;
use crate::error::PlaybackError;
use crate::playback::session::{PlayRequest, Session, ROOT_PARENT};
use crate::playback::subtitles::best_match_index;

/// Load the config from `--config` or the default location
pub fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    }
}

/// Exit code for a playback failure
pub fn exit_code_for(err: &PlaybackError) -> ExitCode {
    match err {
        PlaybackError::PlayerNotFound(_) => ExitCode::PlayerNotFound,
        PlaybackError::UrlResolutionFailed { .. } => ExitCode::ResolutionFailed,
        PlaybackError::ControlChannelUnavailable(_) => ExitCode::NetworkError,
        _ => ExitCode::Error,
    }
}

// =============================================================================
// Play Command
// =============================================================================

pub async fn play_cmd(cmd: PlayCmd, config: &Config, output: &Output) -> ExitCode {
    let Some(token) = config.access_token() else {
        return output.error(
            "No drive access token. Set PANPLAY_ACCESS_TOKEN or [drive].access_token",
            ExitCode::InvalidArgs,
        );
    };
    let drive: Arc<dyn DriveService> =
        Arc::new(DriveClient::with_base_url(config.drive.base_url.clone(), token));
    play_with(drive, cmd, config, output).await
}

/// `play` against an explicit drive implementation
pub async fn play_with(
    drive: Arc<dyn DriveService>,
    cmd: PlayCmd,
    config: &Config,
    output: &Output,
) -> ExitCode {
    let settings = cmd.apply(config.player_settings());
    let request = PlayRequest {
        drive_id: cmd.drive_id.clone(),
        file_id: cmd.file_id.clone(),
        parent_file_id: cmd.parent.clone().unwrap_or_else(|| ROOT_PARENT.to_string()),
        subtitle_file_id: cmd.subtitle.clone(),
        referer: config.drive.referer.clone(),
    };

    let prepared = match Session::prepare(drive.clone(), &settings, &request).await {
        Ok(prepared) => prepared,
        Err(e) => return output.error(e.to_string(), exit_code_for(&e)),
    };

    if cmd.dry_run {
        let response = DryRunResponse {
            player: prepared.command.kind.to_string(),
            command: prepared.command.command_line(),
            playlist: prepared.playlist_mode,
            entries: prepared.entries.len(),
            start_index: prepared.start_index,
        };
        prepared.abandon().await;
        return print_or_fail(output, response);
    }

    output.info(format!(
        "Starting {} ({} file{})",
        prepared.command.kind,
        prepared.entries.len(),
        if prepared.entries.len() == 1 { "" } else { "s" }
    ));

    let session = match Session::start(drive, settings, request, prepared).await {
        Ok(session) => session,
        Err(e) => return output.error(e.to_string(), exit_code_for(&e)),
    };
    let player = session.kind().to_string();
    let session_id = session.id().to_string();

    if let Err(e) = session.wait().await {
        return output.error(e.to_string(), exit_code_for(&e));
    }

    print_or_fail(
        output,
        PlayResponse {
            status: "finished",
            session: session_id,
            player,
            file_id: cmd.file_id,
        },
    )
}

// =============================================================================
// Match Subtitle Command
// =============================================================================

pub fn match_subtitle_cmd(cmd: MatchSubtitleCmd, output: &Output) -> ExitCode {
    let index = best_match_index(&cmd.name, &cmd.candidates);
    if index.is_none() {
        output.info("No candidates to match against");
    }
    print_or_fail(
        output,
        MatchResponse {
            best: index.map(|i| cmd.candidates[i].clone()),
            index,
        },
    )
}

// =============================================================================
// Config Command
// =============================================================================

pub fn config_cmd(cmd: ConfigCmd, config: &Config, config_path: Option<&Path>, output: &Output) -> ExitCode {
    let path = config_path.map(Path::to_path_buf).or_else(Config::path);

    if cmd.path {
        let shown = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        return print_or_fail(output, shown);
    }

    if cmd.init {
        let saved = match config_path {
            Some(p) => config.save_to(p).map(|_| p.to_path_buf()),
            None => config.save(),
        };
        return match saved {
            Ok(p) => {
                output.info(format!("Wrote {}", p.display()));
                ExitCode::Success
            }
            Err(e) => output.error(format!("Failed to write config: {}", e), ExitCode::Error),
        };
    }

    // Never echo the token itself
    let mut shown = config.clone();
    shown.player = config.player_settings();
    if config.access_token().is_some() {
        shown.drive.access_token = Some("<set>".to_string());
    }
    print_or_fail(output, shown)
}

fn print_or_fail<T: Serialize>(output: &Output, data: T) -> ExitCode {
    match output.print(data) {
        Ok(()) => ExitCode::Success,
        Err(e) => output.error(format!("Failed to serialize: {}", e), ExitCode::Error),
    }
}
