//! Media URL resolution for playback
//!
//! Applies the transcoded-then-direct policy and caches signed URLs per
//! file until they expire.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::api::DriveService;
use crate::config::VideoMode;
use crate::error::{PlaybackError, Result};
use crate::models::{ResolvedUrl, UrlMode};

/// Resolve a playable URL for one file
///
/// In online mode the transcoded stream is tried first. The direct download
/// URL is the fallback, except for violation-flagged files which never get
/// one.
pub async fn resolve_play_url(
    drive: &dyn DriveService,
    drive_id: &str,
    file_id: &str,
    video_mode: VideoMode,
    violation: bool,
) -> Result<ResolvedUrl> {
    let mut transcode_err = None;

    if video_mode == VideoMode::Online {
        match drive
            .resolve_media_url(drive_id, file_id, UrlMode::Transcoded)
            .await
        {
            Ok(url) => return Ok(url),
            Err(e) => {
                debug!(file_id, error = %e, "no transcoded stream, trying direct URL");
                transcode_err = Some(e);
            }
        }
    }

    if violation {
        let reason = transcode_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "file is flagged and has no transcoded stream".to_string());
        return Err(PlaybackError::resolution(file_id, reason));
    }

    drive
        .resolve_media_url(drive_id, file_id, UrlMode::Direct)
        .await
        .map_err(|e| PlaybackError::resolution(file_id, e))
}

type Slot = Arc<tokio::sync::Mutex<Option<ResolvedUrl>>>;

/// Resolved URLs keyed by (drive, file)
///
/// Each file has its own async lock: concurrent requests for one file share
/// a single resolution, requests for different files never wait on each
/// other.
#[derive(Default)]
pub struct UrlCache {
    slots: Mutex<HashMap<(String, String), Slot>>,
}

impl UrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached URL, or resolve when missing or expired
    pub async fn get_or_resolve<F, Fut>(&self, drive_id: &str, file_id: &str, resolve: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResolvedUrl>>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots
                .entry((drive_id.to_string(), file_id.to_string()))
                .or_default()
                .clone()
        };

        let mut cached = slot.lock().await;
        if let Some(hit) = cached.as_ref().filter(|r| !r.is_expired()) {
            return Ok(hit.url.clone());
        }

        let fresh = resolve().await?;
        let url = fresh.url.clone();
        *cached = Some(fresh);
        Ok(url)
    }
}

/// Resolver shared by the gateway's request handlers
pub struct MediaResolver {
    drive: Arc<dyn DriveService>,
    video_mode: VideoMode,
    violations: HashSet<String>,
    cache: UrlCache,
}

impl MediaResolver {
    pub fn new(
        drive: Arc<dyn DriveService>,
        video_mode: VideoMode,
        violations: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            drive,
            video_mode,
            violations: violations.into_iter().collect(),
            cache: UrlCache::new(),
        }
    }

    pub async fn resolve(&self, drive_id: &str, file_id: &str) -> Result<String> {
        let violation = self.violations.contains(file_id);
        self.cache
            .get_or_resolve(drive_id, file_id, || async {
                let url = resolve_play_url(
                    self.drive.as_ref(),
                    drive_id,
                    file_id,
                    self.video_mode,
                    violation,
                )
                .await?;
                info!(file_id, "media URL resolved");
                Ok(url)
            })
            .await
    }
}
