//! Position tracking
//!
//! Consumes [`ControlEvent`]s for one session. Keeps only the latest time
//! position, flushes it for the entry being left on every playlist switch,
//! and on the first start after a switch resumes the new entry and pushes
//! its subtitle.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::ipc::{PlayerControl, SeekMode};
use super::subtitles::best_subtitle;
use crate::api::DriveService;
use crate::config::{PlayerSettings, SubtitleMode};
use crate::error::PlaybackError;
use crate::models::{ControlEvent, PlaylistEntry, SubtitleCandidate, UrlMode};

const PLAYLIST_POS: &str = "playlist-pos";

/// Tracker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Playing,
    /// Playlist position moved, waiting for the new file to start
    Switching,
    Seeking,
    Terminated,
}

/// Settings the tracker reads, copied from the session snapshot
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub resume_history: bool,
    pub subtitle_mode: SubtitleMode,
    pub auto_color_tag: bool,
    pub color_tag: String,
}

impl From<&PlayerSettings> for TrackerSettings {
    fn from(s: &PlayerSettings) -> Self {
        Self {
            resume_history: s.resume_history,
            subtitle_mode: s.subtitle_mode,
            auto_color_tag: s.auto_color_tag,
            color_tag: s.color_tag.clone(),
        }
    }
}

/// Per-session position state machine
pub struct PositionTracker {
    drive: Arc<dyn DriveService>,
    control: Arc<dyn PlayerControl>,
    settings: TrackerSettings,
    drive_id: String,
    entries: Vec<PlaylistEntry>,
    subtitles: Vec<SubtitleCandidate>,
    index: usize,
    last_time: Option<f64>,
    state: TrackerState,
    pending_switch: bool,
    initial_subtitle: Option<(String, String)>,
    tagged: HashSet<String>,
    tasks: JoinSet<()>,
}

impl PositionTracker {
    pub fn new(
        drive: Arc<dyn DriveService>,
        control: Arc<dyn PlayerControl>,
        drive_id: impl Into<String>,
        entries: Vec<PlaylistEntry>,
        start_index: usize,
        settings: TrackerSettings,
    ) -> Self {
        let tagged = entries
            .iter()
            .filter(|e| e.tagged)
            .map(|e| e.file_id.clone())
            .collect();
        Self {
            drive,
            control,
            settings,
            drive_id: drive_id.into(),
            index: start_index.min(entries.len().saturating_sub(1)),
            entries,
            subtitles: Vec::new(),
            last_time: None,
            state: TrackerState::Idle,
            pending_switch: false,
            initial_subtitle: None,
            tagged,
            tasks: JoinSet::new(),
        }
    }

    /// Sibling subtitles to pick from on switches
    pub fn with_subtitles(mut self, subtitles: Vec<SubtitleCandidate>) -> Self {
        self.subtitles = subtitles;
        self
    }

    /// Treat the first start like a switch: resume and pick a subtitle
    ///
    /// Used in playlist mode, where the player gets no resume or subtitle
    /// flags on its command line.
    pub fn resume_on_first_start(mut self, subtitle: Option<(String, String)>) -> Self {
        self.pending_switch = true;
        self.initial_subtitle = subtitle;
        self
    }

    /// Record a file as already color-tagged
    pub fn mark_tagged(&mut self, file_id: impl Into<String>) {
        self.tagged.insert(file_id.into());
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn last_time(&self) -> Option<f64> {
        self.last_time
    }

    /// Feed events until the channel reports a crash or closes
    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<ControlEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        if self.state != TrackerState::Terminated {
            debug!("control events ended without a crash report");
            self.terminate().await;
        }
    }

    /// Background flushes and tag requests not yet reaped
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Apply one event; returns false once the session is over
    pub async fn handle(&mut self, event: ControlEvent) -> bool {
        if self.state == TrackerState::Terminated {
            return false;
        }
        self.reap_finished();

        match event {
            ControlEvent::PropertyChanged { name, value } if name == PLAYLIST_POS => {
                if let Some(pos) = value.as_i64() {
                    self.switch_to(pos);
                }
            }
            ControlEvent::PropertyChanged { .. } => {}
            ControlEvent::TimePosition(secs) => {
                self.last_time = Some(secs);
                if self.state == TrackerState::Seeking {
                    self.state = TrackerState::Playing;
                }
            }
            ControlEvent::Seeked { end, .. } => {
                self.state = TrackerState::Seeking;
                if let Some(end) = end {
                    self.last_time = Some(end);
                }
            }
            ControlEvent::Started => self.on_started().await,
            ControlEvent::Crashed => {
                self.terminate().await;
                return false;
            }
        }
        true
    }

    fn switch_to(&mut self, pos: i64) {
        // mpv reports -1 while the playlist is empty or between files
        let Ok(next) = usize::try_from(pos) else {
            return;
        };
        if next == self.index {
            return;
        }
        if next >= self.entries.len() {
            warn!(index = next, len = self.entries.len(), "playlist position out of range");
            return;
        }

        if let Some(secs) = self.last_time.take() {
            self.spawn_flush(self.index, secs);
        }

        info!(from = self.index, to = next, "playlist switched");
        self.index = next;
        self.state = TrackerState::Switching;
        self.pending_switch = true;
        self.spawn_auto_tag();
    }

    async fn on_started(&mut self) {
        if !self.pending_switch {
            self.state = TrackerState::Playing;
            return;
        }
        self.pending_switch = false;

        let Some(entry) = self.entries.get(self.index).cloned() else {
            self.state = TrackerState::Playing;
            return;
        };

        let drive = self.drive.clone();
        let control = self.control.clone();

        if self.settings.resume_history {
            resume(drive.as_ref(), control.as_ref(), &entry).await;
        }

        if let Some((url, title)) = self.initial_subtitle.take() {
            push_subtitle(control.as_ref(), &url, &title).await;
        } else if self.settings.subtitle_mode == SubtitleMode::Auto {
            if let Some(candidate) = best_subtitle(&entry.name, &self.subtitles).cloned() {
                match drive
                    .resolve_media_url(&self.drive_id, &candidate.file_id, UrlMode::Direct)
                    .await
                {
                    Ok(resolved) => {
                        push_subtitle(control.as_ref(), &resolved.url, &candidate.name).await
                    }
                    Err(e) => {
                        warn!(file_id = %candidate.file_id, error = %e, "subtitle URL unavailable")
                    }
                }
            }
        }

        self.state = TrackerState::Playing;
    }

    fn spawn_flush(&mut self, index: usize, secs: f64) {
        if !self.settings.resume_history {
            return;
        }
        let Some(entry) = self.entries.get(index) else {
            return;
        };
        let drive = self.drive.clone();
        let (drive_id, file_id) = (entry.drive_id.clone(), entry.file_id.clone());
        self.tasks
            .spawn(async move { flush(drive.as_ref(), &drive_id, &file_id, secs).await });
    }

    fn spawn_auto_tag(&mut self) {
        if !self.settings.auto_color_tag {
            return;
        }
        let Some(entry) = self.entries.get(self.index) else {
            return;
        };
        if !self.tagged.insert(entry.file_id.clone()) {
            return;
        }

        let drive = self.drive.clone();
        let drive_id = entry.drive_id.clone();
        let color = self.settings.color_tag.clone();
        let ids = vec![entry.file_id.clone()];
        self.tasks.spawn(async move {
            match drive.tag_files_with_color(&drive_id, &color, &ids).await {
                Ok(done) => debug!(tagged = done.len(), "auto color tag applied"),
                Err(e) => warn!(error = %e, "auto color tag failed"),
            }
        });
    }

    /// Final flush for the current entry, then wait for background work
    async fn terminate(&mut self) {
        if let (true, Some(secs)) = (self.settings.resume_history, self.last_time) {
            if let Some(entry) = self.entries.get(self.index) {
                flush(self.drive.as_ref(), &entry.drive_id, &entry.file_id, secs).await;
            }
        }
        self.drain().await;
        self.state = TrackerState::Terminated;
        info!("position tracking finished");
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "background task failed");
            }
        }
    }

    /// Wait for in-flight flushes and tag requests
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "background task failed");
            }
        }
    }
}

async fn resume(drive: &dyn DriveService, control: &dyn PlayerControl, entry: &PlaylistEntry) {
    let meta = match drive.file_metadata(&entry.drive_id, &entry.file_id).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!(file_id = %entry.file_id, error = %e, "could not fetch resume cursor");
            return;
        }
    };
    let position = meta.resume_position();
    if position <= 0.0 {
        return;
    }
    debug!(file_id = %entry.file_id, position, "resuming");
    if let Err(e) = control.seek(position, SeekMode::Absolute).await {
        warn!(error = %e, "resume seek failed");
    }
}

async fn push_subtitle(control: &dyn PlayerControl, url: &str, title: &str) {
    match control.add_subtitle(url, title).await {
        Ok(()) => info!(title, "subtitle loaded"),
        Err(e) => warn!(error = %e, "could not add subtitle"),
    }
}

/// Persist one resume cursor; failures are logged and swallowed
async fn flush(drive: &dyn DriveService, drive_id: &str, file_id: &str, secs: f64) {
    match drive.persist_resume_cursor(drive_id, file_id, secs).await {
        Ok(()) => debug!(file_id, secs, "resume cursor saved"),
        Err(e) => {
            let err = PlaybackError::PersistResumeFailed {
                file_id: file_id.to_string(),
                reason: e.to_string(),
            };
            warn!(error = %err, "history not saved");
        }
    }
}
