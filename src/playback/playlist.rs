//! Playlist materialization
//!
//! Writes the session playlist the player opens. Entries never carry media
//! URLs, only gateway references, so URL expiry never invalidates the file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::player::PlayerKind;
use crate::models::PlaylistEntry;

const CRLF: &str = "\r\n";

/// Playlist document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFormat {
    /// Extended M3U, understood by mpv
    M3u,
    /// Daum/PotPlayer native list
    Dpl,
}

impl PlaylistFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PlaylistFormat::M3u => "m3u",
            PlaylistFormat::Dpl => "dpl",
        }
    }

    pub fn for_player(kind: PlayerKind) -> Self {
        match kind {
            PlayerKind::PotPlayer => PlaylistFormat::Dpl,
            PlayerKind::Mpv | PlayerKind::Plain => PlaylistFormat::M3u,
        }
    }
}

/// Session values a playlist is rendered with
#[derive(Debug, Clone, Copy)]
pub struct PlaylistParams<'a> {
    pub gateway_port: u16,
    pub primary_file_id: &'a str,
    /// Primary file duration in seconds
    pub duration: f64,
    /// Primary file resume cursor in seconds
    pub resume_cursor: f64,
}

/// Gateway reference for one entry
pub fn gateway_url(port: u16, drive_id: &str, file_id: &str) -> String {
    format!(
        "http://127.0.0.1:{}/play?drive_id={}&file_id={}",
        port,
        urlencoding::encode(drive_id),
        urlencoding::encode(file_id)
    )
}

/// Render a playlist document
pub fn render(format: PlaylistFormat, entries: &[PlaylistEntry], params: &PlaylistParams) -> String {
    match format {
        PlaylistFormat::M3u => render_m3u(entries, params),
        PlaylistFormat::Dpl => render_dpl(entries, params),
    }
}

fn render_m3u(entries: &[PlaylistEntry], params: &PlaylistParams) -> String {
    let mut out = String::from("#EXTM3U\r\n#EXT-X-ALLOW-CACHE:NO\r\n");
    for entry in entries {
        let url = gateway_url(params.gateway_port, &entry.drive_id, &entry.file_id);
        let _ = write!(out, "#EXTINF:0,{}{CRLF}{}{CRLF}", one_line(&entry.name), url);
    }
    out.push_str("#EXT-X-ENDLIST\r\n");
    out
}

fn render_dpl(entries: &[PlaylistEntry], params: &PlaylistParams) -> String {
    let mut playname = String::new();
    let mut list = String::new();

    for (index, entry) in entries.iter().enumerate() {
        let n = index + 1;
        let url = gateway_url(params.gateway_port, &entry.drive_id, &entry.file_id);
        let _ = write!(
            list,
            "{n}*file*{url}{CRLF}{n}*title*{}{CRLF}{n}*played*0{CRLF}",
            one_line(entry.name.trim())
        );

        if entry.file_id == params.primary_file_id {
            playname = url;
            if params.duration > 0.0 {
                let _ = write!(list, "{n}*duration2*{}{CRLF}", millis(params.duration));
            }
            if params.resume_cursor > 0.0 {
                let _ = write!(list, "{n}*start*{}{CRLF}", millis(params.resume_cursor));
            }
        }
    }

    format!(
        "DAUMPLAYLIST{CRLF}playname={}{CRLF}playtime={}{CRLF}topindex=0{CRLF}saveplaypos=0{CRLF}{}",
        playname,
        millis(params.resume_cursor),
        list
    )
}

fn millis(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

fn one_line(name: &str) -> String {
    name.replace(['\r', '\n'], " ")
}

/// The single playlist file of a session
///
/// Written once at launch and removed at teardown. The path is fixed per
/// format, so a new session overwrites a leftover file.
#[derive(Debug)]
pub struct PlaylistFile {
    path: PathBuf,
}

impl PlaylistFile {
    /// Fixed location for a playlist of the given format
    pub fn default_path(format: PlaylistFormat) -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("panplay")
            .join(format!("play_list.{}", format.extension()))
    }

    /// Write (or overwrite) the playlist at `path`
    pub fn write(path: impl Into<PathBuf>, content: &str) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        debug!(path = %path.display(), "playlist written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file; consuming `self` makes a second delete impossible
    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "playlist removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove playlist"),
        }
    }
}
