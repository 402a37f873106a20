//! Redirect gateway tests
//!
//! Drives a real gateway on a local port with a redirect-free HTTP client.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use panplay::api::DriveService;
use panplay::config::VideoMode;
use panplay::error::ApiError;
use panplay::models::{DriveFile, FileMetadata, ResolvedUrl, UrlMode};
use panplay::playback::gateway::{bind_from, Gateway};
use panplay::playback::playlist::gateway_url;
use panplay::playback::resolve::MediaResolver;

/// Counts resolutions per file; the first URL of each file is born expired
/// when `first_expired` is set
#[derive(Default)]
struct CountingDrive {
    calls: Mutex<HashMap<String, usize>>,
    first_expired: bool,
    slow_file: Option<String>,
    transcode: bool,
}

impl CountingDrive {
    fn calls(&self, file_id: &str) -> usize {
        self.calls.lock().unwrap().get(file_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DriveService for CountingDrive {
    async fn resolve_media_url(
        &self,
        _drive_id: &str,
        file_id: &str,
        mode: UrlMode,
    ) -> Result<ResolvedUrl, ApiError> {
        if mode == UrlMode::Transcoded && !self.transcode {
            return Err(ApiError::NoUrl);
        }
        if file_id == "missing" {
            return Err(ApiError::NoUrl);
        }
        if self.slow_file.as_deref() == Some(file_id) {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }

        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(file_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let ttl = if self.first_expired && n == 1 {
            Duration::ZERO
        } else {
            Duration::from_secs(600)
        };
        Ok(ResolvedUrl::new(
            format!("https://cdn.example/{}/{}?v={}", mode_name(mode), file_id, n),
            ttl,
        ))
    }

    async fn file_metadata(&self, _: &str, _: &str) -> Result<FileMetadata, ApiError> {
        Ok(FileMetadata::default())
    }

    async fn persist_resume_cursor(&self, _: &str, _: &str, _: f64) -> Result<(), ApiError> {
        Ok(())
    }

    async fn list_directory(&self, _: &str, _: &str) -> Result<Vec<DriveFile>, ApiError> {
        Ok(Vec::new())
    }

    async fn tag_files_with_color(
        &self,
        _: &str,
        _: &str,
        ids: &[String],
    ) -> Result<Vec<String>, ApiError> {
        Ok(ids.to_vec())
    }
}

fn mode_name(mode: UrlMode) -> &'static str {
    match mode {
        UrlMode::Direct => "direct",
        UrlMode::Transcoded => "transcoded",
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

async fn start(drive: Arc<CountingDrive>, mode: VideoMode, violations: Vec<String>) -> Gateway {
    let resolver = MediaResolver::new(drive, mode, violations);
    Gateway::start(0, Arc::new(resolver)).await.unwrap()
}

async fn location(client: &reqwest::Client, url: &str) -> String {
    let resp = client.get(url).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    resp.headers()
        .get(reqwest::header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

// =============================================================================
// Routing Tests
// =============================================================================

#[tokio::test]
async fn test_play_redirects_to_resolved_url() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive.clone(), VideoMode::Original, vec![]).await;

    let url = gateway_url(gateway.port(), "d1", "f1");
    assert_eq!(location(&client(), &url).await, "https://cdn.example/direct/f1?v=1");

    gateway.close().await;
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive, VideoMode::Original, vec![]).await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/nope", gateway.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    gateway.close().await;
}

#[tokio::test]
async fn test_missing_params_is_400() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive, VideoMode::Original, vec![]).await;

    let resp = client()
        .get(format!("http://127.0.0.1:{}/play?drive_id=d1", gateway.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    gateway.close().await;
}

#[tokio::test]
async fn test_resolution_failure_is_500_and_retried() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive, VideoMode::Original, vec![]).await;
    let url = gateway_url(gateway.port(), "d1", "missing");

    for _ in 0..2 {
        let resp = client().get(&url).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    }

    gateway.close().await;
}

// =============================================================================
// Cache Tests
// =============================================================================

#[tokio::test]
async fn test_unexpired_url_is_not_resolved_again() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive.clone(), VideoMode::Original, vec![]).await;
    let http = client();
    let url = gateway_url(gateway.port(), "d1", "f1");

    let first = location(&http, &url).await;
    let second = location(&http, &url).await;

    assert_eq!(first, second);
    assert_eq!(drive.calls("f1"), 1);

    gateway.close().await;
}

#[tokio::test]
async fn test_expired_url_is_resolved_exactly_once_more() {
    let drive = Arc::new(CountingDrive {
        first_expired: true,
        ..CountingDrive::default()
    });
    let gateway = start(drive.clone(), VideoMode::Original, vec![]).await;
    let http = client();
    let url = gateway_url(gateway.port(), "d1", "f1");

    assert_eq!(location(&http, &url).await, "https://cdn.example/direct/f1?v=1");
    assert_eq!(drive.calls("f1"), 1);

    // The first URL expired on arrival
    assert_eq!(location(&http, &url).await, "https://cdn.example/direct/f1?v=2");
    assert_eq!(drive.calls("f1"), 2);

    assert_eq!(location(&http, &url).await, "https://cdn.example/direct/f1?v=2");
    assert_eq!(drive.calls("f1"), 2);

    gateway.close().await;
}

#[tokio::test]
async fn test_cache_is_per_file() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive.clone(), VideoMode::Original, vec![]).await;
    let http = client();

    let a = location(&http, &gateway_url(gateway.port(), "d1", "a")).await;
    let b = location(&http, &gateway_url(gateway.port(), "d1", "b")).await;

    assert!(a.contains("/a?"));
    assert!(b.contains("/b?"));
    assert_eq!(drive.calls("a"), 1);
    assert_eq!(drive.calls("b"), 1);

    gateway.close().await;
}

#[tokio::test]
async fn test_slow_file_does_not_block_other_files() {
    let drive = Arc::new(CountingDrive {
        slow_file: Some("slow".to_string()),
        ..CountingDrive::default()
    });
    let gateway = start(drive.clone(), VideoMode::Original, vec![]).await;
    let http = client();

    let slow_url = gateway_url(gateway.port(), "d1", "slow");
    let slow_client = http.clone();
    let slow = tokio::spawn(async move { slow_client.get(&slow_url).send().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let fast = tokio::time::timeout(
        Duration::from_secs(1),
        location(&http, &gateway_url(gateway.port(), "d1", "fast")),
    )
    .await
    .expect("fast file waited behind slow file");
    assert!(fast.contains("/fast?"));

    slow.abort();
    gateway.close().await;
}

// =============================================================================
// Resolution Policy Tests
// =============================================================================

#[tokio::test]
async fn test_online_mode_redirects_to_transcoded_stream() {
    let drive = Arc::new(CountingDrive {
        transcode: true,
        ..CountingDrive::default()
    });
    let gateway = start(drive, VideoMode::Online, vec![]).await;

    let loc = location(&client(), &gateway_url(gateway.port(), "d1", "f1")).await;
    assert!(loc.starts_with("https://cdn.example/transcoded/"));

    gateway.close().await;
}

#[tokio::test]
async fn test_violation_without_transcode_is_500() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive.clone(), VideoMode::Online, vec!["bad".to_string()]).await;

    let resp = client()
        .get(gateway_url(gateway.port(), "d1", "bad"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(drive.calls("bad"), 0);

    gateway.close().await;
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_close_releases_port() {
    let drive = Arc::new(CountingDrive::default());
    let gateway = start(drive, VideoMode::Original, vec![]).await;
    let port = gateway.port();
    gateway.close().await;

    // The same port can be bound again once the gateway is gone
    let listener = bind_from(port).await.unwrap();
    assert_eq!(listener.local_addr().unwrap().port(), port);
}
