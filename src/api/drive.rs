//! Drive open API client
//!
//! Resolves signed media URLs, reads and writes resume cursors, lists
//! directories and applies color tags. Every call is a JSON POST with a
//! bearer token; acquiring the token is left to the caller.

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::DriveService;
use crate::error::ApiError;
use crate::models::{DriveFile, FileMetadata, ResolvedUrl, UrlMode};

/// Lifetime requested for direct download URLs
pub const DOWNLOAD_URL_TTL_SECS: u64 = 14_400;
/// Assumed lifetime of transcoded URLs when the URL does not say
const TRANSCODE_URL_TTL_SECS: u64 = 900;
/// Shaved off every expiry so a URL is never handed out at its last second
const EXPIRY_MARGIN_SECS: u64 = 60;
const LIST_PAGE_LIMIT: u32 = 100;

/// Transcode templates from best to worst
const TEMPLATE_PRIORITY: &[&str] = &["UHD", "QHD", "FHD", "HD", "SD", "LD"];

#[derive(Debug, Deserialize)]
struct DownloadUrlResponse {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct PreviewPlayInfoResponse {
    video_preview_play_info: PreviewPlayInfo,
}

#[derive(Debug, Deserialize)]
struct PreviewPlayInfo {
    #[serde(default)]
    live_transcoding_task_list: Vec<TranscodingTask>,
}

#[derive(Debug, Deserialize)]
struct TranscodingTask {
    template_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct FileInfoResponse {
    #[serde(default)]
    video_media_metadata: Option<MediaMetadata>,
    #[serde(default)]
    play_cursor: Option<Value>,
    #[serde(default)]
    user_meta: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaMetadata {
    #[serde(default)]
    duration: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<DriveFile>,
    #[serde(default)]
    next_marker: String,
}

/// Drive open API client
pub struct DriveClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl DriveClient {
    /// Create a client for the public open API endpoint
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_url("https://openapi.alipan.com", access_token)
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "drive request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn direct_url(&self, drive_id: &str, file_id: &str) -> Result<ResolvedUrl, ApiError> {
        let resp: DownloadUrlResponse = self
            .post(
                "/adrive/v1.0/openFile/getDownloadUrl",
                json!({
                    "drive_id": drive_id,
                    "file_id": file_id,
                    "expire_sec": DOWNLOAD_URL_TTL_SECS,
                }),
            )
            .await?;

        if resp.url.is_empty() {
            return Err(ApiError::NoUrl);
        }
        // The drive signs URLs that demand a referer header once the token is stale
        if resp.url.contains("x-oss-additional-headers=referer") {
            return Err(ApiError::TokenExpired);
        }
        Ok(signed_url(resp.url, DOWNLOAD_URL_TTL_SECS))
    }

    async fn transcoded_url(&self, drive_id: &str, file_id: &str) -> Result<ResolvedUrl, ApiError> {
        let resp: PreviewPlayInfoResponse = self
            .post(
                "/adrive/v1.0/openFile/getVideoPreviewPlayInfo",
                json!({
                    "drive_id": drive_id,
                    "file_id": file_id,
                    "category": "live_transcoding",
                }),
            )
            .await?;

        best_transcoding(&resp.video_preview_play_info.live_transcoding_task_list)
            .map(|task| signed_url(task.url.clone(), TRANSCODE_URL_TTL_SECS))
            .ok_or(ApiError::NoUrl)
    }
}

#[async_trait]
impl DriveService for DriveClient {
    async fn resolve_media_url(
        &self,
        drive_id: &str,
        file_id: &str,
        mode: UrlMode,
    ) -> Result<ResolvedUrl, ApiError> {
        match mode {
            UrlMode::Direct => self.direct_url(drive_id, file_id).await,
            UrlMode::Transcoded => self.transcoded_url(drive_id, file_id).await,
        }
    }

    async fn file_metadata(&self, drive_id: &str, file_id: &str) -> Result<FileMetadata, ApiError> {
        let info: FileInfoResponse = self
            .post(
                "/adrive/v1.0/openFile/get",
                json!({ "drive_id": drive_id, "file_id": file_id }),
            )
            .await?;

        let duration = info
            .video_media_metadata
            .and_then(|m| m.duration)
            .and_then(|v| number_of(&v))
            .unwrap_or(0.0);

        let resume_cursor = info
            .play_cursor
            .as_ref()
            .and_then(number_of)
            .or_else(|| {
                let meta: Value = serde_json::from_str(info.user_meta.as_deref()?).ok()?;
                meta.get("play_cursor").and_then(number_of)
            })
            .unwrap_or(0.0);

        Ok(FileMetadata {
            duration,
            resume_cursor,
        })
    }

    async fn persist_resume_cursor(
        &self,
        drive_id: &str,
        file_id: &str,
        seconds: f64,
    ) -> Result<(), ApiError> {
        let _: Value = self
            .post(
                "/adrive/v1.0/openFile/video/updateRecord",
                json!({
                    "drive_id": drive_id,
                    "file_id": file_id,
                    "play_cursor": format!("{:.0}", seconds.max(0.0)),
                }),
            )
            .await?;
        Ok(())
    }

    async fn list_directory(
        &self,
        drive_id: &str,
        parent_file_id: &str,
    ) -> Result<Vec<DriveFile>, ApiError> {
        let mut files = Vec::new();
        let mut marker = String::new();

        loop {
            let page: ListResponse = self
                .post(
                    "/adrive/v1.0/openFile/list",
                    json!({
                        "drive_id": drive_id,
                        "parent_file_id": parent_file_id,
                        "limit": LIST_PAGE_LIMIT,
                        "marker": marker,
                        "order_by": "name",
                        "order_direction": "ASC",
                    }),
                )
                .await?;

            files.extend(page.items.into_iter().filter(|f| !f.is_dir()));
            if page.next_marker.is_empty() {
                break;
            }
            marker = page.next_marker;
        }

        files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(files)
    }

    async fn tag_files_with_color(
        &self,
        drive_id: &str,
        color: &str,
        file_ids: &[String],
    ) -> Result<Vec<String>, ApiError> {
        let mut tagged = Vec::with_capacity(file_ids.len());
        let mut last_err = None;

        for file_id in file_ids {
            let result: Result<Value, ApiError> = self
                .post(
                    "/adrive/v1.0/openFile/update",
                    json!({
                        "drive_id": drive_id,
                        "file_id": file_id,
                        "description": color,
                    }),
                )
                .await;
            match result {
                Ok(_) => tagged.push(file_id.clone()),
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) if tagged.is_empty() => Err(e),
            _ => Ok(tagged),
        }
    }
}

/// Pick the best finished transcoding task
fn best_transcoding(tasks: &[TranscodingTask]) -> Option<&TranscodingTask> {
    let rank = |id: &str| {
        TEMPLATE_PRIORITY
            .iter()
            .position(|t| t.eq_ignore_ascii_case(id))
            .unwrap_or(TEMPLATE_PRIORITY.len())
    };
    tasks
        .iter()
        .filter(|t| t.status == "finished" && !t.url.is_empty())
        .min_by_key(|t| rank(&t.template_id))
}

/// Wrap a signed URL with its expiry
fn signed_url(url: String, fallback_ttl_secs: u64) -> ResolvedUrl {
    let ttl = url_ttl_secs(&url, SystemTime::now()).unwrap_or(fallback_ttl_secs);
    ResolvedUrl::new(url, Duration::from_secs(ttl.saturating_sub(EXPIRY_MARGIN_SECS)))
}

/// Remaining lifetime encoded in the URL's `x-oss-expires` parameter
pub fn url_ttl_secs(url: &str, now: SystemTime) -> Option<u64> {
    static EXPIRES: OnceLock<Option<Regex>> = OnceLock::new();
    let re = EXPIRES
        .get_or_init(|| Regex::new(r"[?&]x-oss-expires=(\d+)").ok())
        .as_ref()?;

    let expires: u64 = re.captures(url)?.get(1)?.as_str().parse().ok()?;
    let now = now.duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(expires.saturating_sub(now))
}

/// Read a JSON number that the API sometimes sends as a string
fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
