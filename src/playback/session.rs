//! Playback session orchestration
//!
//! One launch of the external player: resolve what to play, start the
//! gateway and playlist when the player can use them, spawn the player, and
//! hand its control channel to the position tracker. Every path that ends a
//! session funnels into [`Teardown::run`], which releases resources once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::gateway::Gateway;
use super::ipc::{default_endpoint, ControlChannel, PlayerControl};
use super::player::{LaunchCommand, LaunchOptions, MediaSource, Platform, PlayerKind};
use super::playlist::{self, PlaylistFile, PlaylistFormat, PlaylistParams};
use super::resolve::{resolve_play_url, MediaResolver};
use super::subtitles::best_subtitle;
use super::tracker::{PositionTracker, TrackerSettings};
use crate::api::DriveService;
use crate::config::{PlayerSettings, SubtitleMode};
use crate::error::{PlaybackError, Result};
use crate::models::{
    ControlEvent, DriveFile, FileCategory, FileMetadata, PlaylistEntry, SubtitleCandidate,
    UrlMode,
};

/// Parent id of files at the top of a drive
pub const ROOT_PARENT: &str = "root";

/// What to play
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub drive_id: String,
    pub file_id: String,
    /// Directory holding the file; siblings feed the playlist and subtitles
    pub parent_file_id: String,
    /// Subtitle chosen by the caller, used in `select` mode
    pub subtitle_file_id: Option<String>,
    /// Referer header forwarded to the player
    pub referer: String,
}

/// Resources a session owns until teardown
///
/// Each slot is emptied by the single teardown that wins the latch, so a
/// resource cannot be released twice.
pub struct Teardown {
    done: AtomicBool,
    playlist: Mutex<Option<PlaylistFile>>,
    gateway: Mutex<Option<Gateway>>,
    channel: Mutex<Option<Arc<ControlChannel>>>,
}

impl Teardown {
    pub fn new(playlist: Option<PlaylistFile>, gateway: Option<Gateway>) -> Self {
        Self {
            done: AtomicBool::new(false),
            playlist: Mutex::new(playlist),
            gateway: Mutex::new(gateway),
            channel: Mutex::new(None),
        }
    }

    /// Hand over the control channel once it connects
    ///
    /// If the session already ended the channel is closed right away.
    pub async fn attach_channel(&self, channel: Arc<ControlChannel>) {
        if self.is_done() {
            channel.close().await;
            return;
        }
        *lock(&self.channel) = Some(channel);
        // Lost the race against a teardown that ran meanwhile
        if self.is_done() {
            let late = lock(&self.channel).take();
            if let Some(channel) = late {
                channel.close().await;
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Release everything; returns false if another caller already did
    pub async fn run(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }

        let playlist = lock(&self.playlist).take();
        let gateway = lock(&self.gateway).take();
        let channel = lock(&self.channel).take();

        if let Some(gateway) = gateway {
            gateway.close().await;
        }
        if let Some(playlist) = playlist {
            playlist.remove();
        }
        if let Some(channel) = channel {
            channel.close().await;
        }
        info!("playback session torn down");
        true
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything decided before the player starts
pub struct PreparedLaunch {
    pub command: LaunchCommand,
    pub playlist_mode: bool,
    pub entries: Vec<PlaylistEntry>,
    pub start_index: usize,
    pub subtitles: Vec<SubtitleCandidate>,
    initial_subtitle: Option<(String, String)>,
    /// Whether the listing already shows the primary file tagged
    primary_tagged: bool,
    teardown: Arc<Teardown>,
}

impl PreparedLaunch {
    /// Release the gateway and playlist without starting the player
    pub async fn abandon(self) {
        self.teardown.run().await;
    }
}

/// A running playback session
pub struct Session {
    id: Uuid,
    kind: PlayerKind,
    player: String,
    platform: Platform,
    teardown: Arc<Teardown>,
    exit_task: JoinHandle<Option<i32>>,
    tracker_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Work out the launch for `request` without spawning anything
    pub async fn prepare(
        drive: Arc<dyn DriveService>,
        settings: &PlayerSettings,
        request: &PlayRequest,
    ) -> Result<PreparedLaunch> {
        let kind = PlayerKind::detect(&settings.path);
        let listing = match drive
            .list_directory(&request.drive_id, &request.parent_file_id)
            .await
        {
            Ok(files) => files,
            Err(e) => {
                warn!(parent = %request.parent_file_id, error = %e, "could not list siblings");
                Vec::new()
            }
        };

        let primary = listing
            .iter()
            .find(|f| f.file_id == request.file_id)
            .map(PlaylistEntry::from)
            .unwrap_or_else(|| bare_entry(request));

        let meta = if settings.resume_history {
            drive
                .file_metadata(&request.drive_id, &request.file_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(file_id = %request.file_id, error = %e, "no playback metadata");
                    FileMetadata::default()
                })
        } else {
            FileMetadata::default()
        };

        let subtitles = SubtitleCandidate::from_listing(&listing);
        let initial_subtitle =
            initial_subtitle(drive.as_ref(), settings, request, &primary, &subtitles).await;

        let playlist_mode = settings.enable_playlist && kind.supports_playlist();
        let control = kind.supports_control() && (playlist_mode || settings.resume_history);
        let resume_at = meta.resume_position();

        let (entries, start_index, media, teardown) = if playlist_mode {
            let mut entries = playlist_entries(&listing);
            let start_index = match entries.iter().position(|e| e.file_id == primary.file_id) {
                Some(i) => i,
                None => {
                    entries.insert(0, primary.clone());
                    0
                }
            };

            let resolver = MediaResolver::new(
                drive.clone(),
                settings.video_mode,
                entries.iter().filter(|e| e.violation).map(|e| e.file_id.clone()),
            );
            let gateway = Gateway::start(settings.gateway_start_port, Arc::new(resolver)).await?;

            let format = PlaylistFormat::for_player(kind);
            let content = playlist::render(
                format,
                &entries,
                &PlaylistParams {
                    gateway_port: gateway.port(),
                    primary_file_id: &primary.file_id,
                    duration: meta.duration,
                    resume_cursor: resume_at,
                },
            );
            let file = match PlaylistFile::write(PlaylistFile::default_path(format), &content) {
                Ok(file) => file,
                Err(e) => {
                    gateway.close().await;
                    return Err(e.into());
                }
            };
            let media = MediaSource::Playlist {
                path: file.path().to_path_buf(),
                start_index,
            };
            info!(entries = entries.len(), start_index, "playlist prepared");
            (entries, start_index, media, Teardown::new(Some(file), Some(gateway)))
        } else {
            let resolved = resolve_play_url(
                drive.as_ref(),
                &request.drive_id,
                &request.file_id,
                settings.video_mode,
                primary.violation,
            )
            .await?;
            let media = MediaSource::Url(resolved.url);
            (vec![primary.clone()], 0, media, Teardown::new(None, None))
        };

        // mpv applies --sub-file to every playlist entry, so in playlist mode
        // the tracker pushes the subtitle after the first load
        let flags_on_command_line = !(playlist_mode && kind == PlayerKind::Mpv);
        let opts = LaunchOptions {
            title: primary.name.clone(),
            referer: request.referer.clone(),
            media,
            start_at: (!playlist_mode && resume_at > 0.0).then_some(resume_at),
            subtitle_url: initial_subtitle
                .as_ref()
                .filter(|_| flags_on_command_line)
                .map(|(url, _)| url.clone()),
            ipc_endpoint: control.then(default_endpoint),
        };
        let command = LaunchCommand::build(settings, &opts, Platform::current());

        Ok(PreparedLaunch {
            command,
            playlist_mode,
            entries,
            start_index,
            subtitles,
            initial_subtitle,
            primary_tagged: primary.tagged,
            teardown: Arc::new(teardown),
        })
    }

    /// Prepare and start a session
    pub async fn launch(
        drive: Arc<dyn DriveService>,
        settings: PlayerSettings,
        request: PlayRequest,
    ) -> Result<Self> {
        let prepared = Self::prepare(drive.clone(), &settings, &request).await?;
        Self::start(drive, settings, request, prepared).await
    }

    /// Spawn the player for a prepared launch
    pub async fn start(
        drive: Arc<dyn DriveService>,
        settings: PlayerSettings,
        request: PlayRequest,
        prepared: PreparedLaunch,
    ) -> Result<Self> {
        let PreparedLaunch {
            command,
            playlist_mode,
            entries,
            start_index,
            subtitles,
            initial_subtitle,
            primary_tagged,
            teardown,
        } = prepared;
        let kind = command.kind;
        let player = command.player.clone();
        let platform = command.platform;
        let id = Uuid::new_v4();
        let span = info_span!("session", %id, file_id = %request.file_id);
        info!(parent: &span, player = %kind, "starting player");

        let mut child = match command.spawn(settings.detach) {
            Ok(child) => child,
            Err(e) => {
                teardown.run().await;
                return Err(e);
            }
        };

        let exit_teardown = teardown.clone();
        let exit_task = tokio::spawn(
            async move {
                let code = match child.wait().await {
                    Ok(status) => {
                        info!(%status, "player exited");
                        status.code()
                    }
                    Err(e) => {
                        warn!(error = %e, "lost track of player process");
                        None
                    }
                };
                exit_teardown.run().await;
                code
            }
            .instrument(span.clone()),
        );

        // Tag the primary file now that the player is running
        let mut primary_tagged = primary_tagged;
        if settings.auto_color_tag && !primary_tagged {
            match drive
                .tag_files_with_color(
                    &request.drive_id,
                    &settings.color_tag,
                    &[request.file_id.clone()],
                )
                .instrument(span.clone())
                .await
            {
                Ok(done) => primary_tagged = done.contains(&request.file_id),
                Err(e) => warn!(parent: &span, error = %e, "auto color tag failed"),
            }
        }

        let wants_control = kind.supports_control() && (playlist_mode || settings.resume_history);
        let tracker_task = if wants_control {
            let connected = ControlChannel::connect(&default_endpoint(), settings.connect_timeout())
                .instrument(span.clone())
                .await;
            match connected {
                Ok((channel, mut events)) => {
                    let channel = Arc::new(channel);
                    teardown.attach_channel(channel.clone()).await;
                    if let Err(e) = channel.observe_defaults(false).await {
                        warn!(error = %e, "could not observe player properties");
                    }
                    if let Err(e) = channel.play().await {
                        debug!(error = %e, "play command failed");
                    }
                    // mpv may have loaded the first entry while we were still
                    // connecting, in which case its file-loaded event is gone
                    let already_started = playlist_mode && channel.has_loaded_file().await;

                    let control: Arc<dyn PlayerControl> = channel;
                    let mut tracker = PositionTracker::new(
                        drive,
                        control,
                        request.drive_id.clone(),
                        entries,
                        start_index,
                        TrackerSettings::from(&settings),
                    )
                    .with_subtitles(subtitles);
                    if primary_tagged {
                        tracker.mark_tagged(request.file_id.clone());
                    }
                    if playlist_mode {
                        tracker = tracker.resume_on_first_start(initial_subtitle);
                    }

                    let tracker_teardown = teardown.clone();
                    Some(tokio::spawn(
                        async move {
                            if already_started {
                                debug!("first entry loaded before connect");
                                tracker.handle(ControlEvent::Started).await;
                            }
                            tracker.run(&mut events).await;
                            tracker_teardown.run().await;
                        }
                        .instrument(span.clone()),
                    ))
                }
                Err(e) => {
                    warn!(parent: &span, error = %e, "continuing without resume and playlist tracking");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            id,
            kind,
            player,
            platform,
            teardown,
            exit_task,
            tracker_task,
        })
    }

    /// Identifier carried by this session's log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> PlayerKind {
        self.kind
    }

    /// Wait until the player exits and all session work has finished
    ///
    /// A launch shell that could not find the player reports it through its
    /// exit status, which surfaces here as [`PlaybackError::PlayerNotFound`].
    pub async fn wait(self) -> Result<()> {
        let code = match self.exit_task.await {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "exit observer failed");
                None
            }
        };
        if let Some(tracker) = self.tracker_task {
            if let Err(e) = tracker.await {
                warn!(error = %e, "position tracker failed");
            }
        }
        self.teardown.run().await;

        if code == Some(self.platform.missing_command_code()) {
            return Err(PlaybackError::PlayerNotFound(self.player));
        }
        Ok(())
    }
}

/// Video siblings in listing order
pub fn playlist_entries(listing: &[DriveFile]) -> Vec<PlaylistEntry> {
    listing
        .iter()
        .filter(|f| !f.is_dir() && f.category == FileCategory::Video)
        .map(PlaylistEntry::from)
        .collect()
}

fn bare_entry(request: &PlayRequest) -> PlaylistEntry {
    PlaylistEntry {
        file_id: request.file_id.clone(),
        drive_id: request.drive_id.clone(),
        name: request.file_id.clone(),
        extension: String::new(),
        category: FileCategory::Video,
        tagged: false,
        violation: false,
    }
}

/// Subtitle for the first file as (url, title)
async fn initial_subtitle(
    drive: &dyn DriveService,
    settings: &PlayerSettings,
    request: &PlayRequest,
    primary: &PlaylistEntry,
    candidates: &[SubtitleCandidate],
) -> Option<(String, String)> {
    let (file_id, title) = match (settings.subtitle_mode, &request.subtitle_file_id) {
        (SubtitleMode::Off, _) => return None,
        (_, Some(id)) => {
            let title = candidates
                .iter()
                .find(|c| &c.file_id == id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.clone());
            (id.clone(), title)
        }
        (SubtitleMode::Auto, None) => {
            let best = best_subtitle(&primary.name, candidates)?;
            (best.file_id.clone(), best.name.clone())
        }
        (SubtitleMode::Select, None) => return None,
    };

    match drive
        .resolve_media_url(&request.drive_id, &file_id, UrlMode::Direct)
        .await
    {
        Ok(resolved) => {
            debug!(%file_id, "subtitle resolved");
            Some((resolved.url, title))
        }
        Err(e) => {
            warn!(%file_id, error = %e, "could not resolve subtitle");
            None
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("torn_down", &self.teardown.is_done())
            .finish()
    }
}
