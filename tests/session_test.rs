//! Session tests
//!
//! Launch preparation against a fake drive, real player processes started
//! from throwaway scripts, and the teardown latch under concurrent callers.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use panplay::api::DriveService;
use panplay::config::{PlayerSettings, SubtitleMode, VideoMode};
use panplay::error::{ApiError, PlaybackError};
use panplay::models::{DriveFile, FileCategory, FileMetadata, ResolvedUrl, UrlMode};
use panplay::playback::gateway::{bind_from, Gateway};
use panplay::playback::ipc::ControlChannel;
use panplay::playback::player::PlayerKind;
use panplay::playback::playlist::{PlaylistFile, PlaylistFormat};
use panplay::playback::resolve::MediaResolver;
use panplay::playback::session::{PlayRequest, Session, Teardown};

#[derive(Default)]
struct Folder {
    files: Vec<DriveFile>,
    cursor: f64,
    listing_fails: bool,
    tags: Mutex<Vec<String>>,
}

impl Folder {
    fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriveService for Folder {
    async fn resolve_media_url(
        &self,
        _: &str,
        file_id: &str,
        mode: UrlMode,
    ) -> Result<ResolvedUrl, ApiError> {
        if mode == UrlMode::Transcoded {
            return Err(ApiError::NoUrl);
        }
        Ok(ResolvedUrl::new(
            format!("https://cdn.example/{}", file_id),
            Duration::from_secs(600),
        ))
    }

    async fn file_metadata(&self, _: &str, _: &str) -> Result<FileMetadata, ApiError> {
        Ok(FileMetadata {
            duration: 1500.0,
            resume_cursor: self.cursor,
        })
    }

    async fn persist_resume_cursor(&self, _: &str, _: &str, _: f64) -> Result<(), ApiError> {
        Ok(())
    }

    async fn list_directory(&self, _: &str, _: &str) -> Result<Vec<DriveFile>, ApiError> {
        if self.listing_fails {
            return Err(ApiError::Status {
                status: 500,
                body: "down".to_string(),
            });
        }
        Ok(self.files.clone())
    }

    async fn tag_files_with_color(
        &self,
        _: &str,
        _: &str,
        ids: &[String],
    ) -> Result<Vec<String>, ApiError> {
        self.tags.lock().unwrap().extend(ids.iter().cloned());
        Ok(ids.to_vec())
    }
}

fn file(id: &str, name: &str, category: FileCategory) -> DriveFile {
    DriveFile {
        drive_id: "d1".to_string(),
        file_id: id.to_string(),
        parent_file_id: "dir".to_string(),
        name: name.to_string(),
        kind: "file".to_string(),
        extension: name.rsplit('.').next().unwrap_or_default().to_string(),
        category,
        description: String::new(),
        punish_flag: 0,
    }
}

fn folder(cursor: f64) -> Arc<Folder> {
    Arc::new(Folder {
        files: vec![
            file("v1", "Show.S01E01.mkv", FileCategory::Video),
            file("v2", "Show.S01E02.mkv", FileCategory::Video),
            file("s1", "Show.S01E01.srt", FileCategory::Doc),
            file("s2", "Show.S01E02.srt", FileCategory::Doc),
            file("v3", "Show.S01E03.mkv", FileCategory::Video),
        ],
        cursor,
        ..Folder::default()
    })
}

fn request(file_id: &str) -> PlayRequest {
    PlayRequest {
        drive_id: "d1".to_string(),
        file_id: file_id.to_string(),
        parent_file_id: "dir".to_string(),
        subtitle_file_id: None,
        referer: "https://www.example-drive.com/".to_string(),
    }
}

/// Executable script standing in for a player; exits right away
#[cfg(unix)]
fn fake_player(dir: &std::path::Path, name: &str, exit_code: i32) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\nexit {}\n", exit_code)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

fn single_file_settings() -> PlayerSettings {
    PlayerSettings {
        path: "mpv".to_string(),
        enable_playlist: false,
        video_mode: VideoMode::Original,
        ..PlayerSettings::default()
    }
}

// =============================================================================
// Preparation Tests
// =============================================================================

#[tokio::test]
async fn test_single_file_launch_resumes_and_loads_subtitle() {
    let settings = single_file_settings();
    let prepared = Session::prepare(folder(125.0), &settings, &request("v2"))
        .await
        .unwrap();

    assert!(!prepared.playlist_mode);
    assert_eq!(prepared.entries.len(), 1);
    assert_eq!(prepared.command.kind, PlayerKind::Mpv);

    let line = prepared.command.command_line();
    assert!(line.contains("https://cdn.example/v2"));
    assert!(line.contains("--start="));
    assert!(line.contains("00:02:05"));
    assert!(line.contains("--sub-file="));
    assert!(line.contains("https://cdn.example/s2"));
    assert!(!line.contains("--playlist-start"));

    prepared.abandon().await;
}

#[tokio::test]
async fn test_history_off_means_no_start_flag() {
    let settings = PlayerSettings {
        resume_history: false,
        subtitle_mode: SubtitleMode::Off,
        ..single_file_settings()
    };
    let prepared = Session::prepare(folder(125.0), &settings, &request("v2"))
        .await
        .unwrap();

    let line = prepared.command.command_line();
    assert!(!line.contains("--start="));
    assert!(!line.contains("--sub-file="));
    // Nothing to track without history or a playlist
    assert!(!line.contains("--input-ipc-server"));

    prepared.abandon().await;
}

#[tokio::test]
async fn test_selected_subtitle_wins_over_matcher() {
    let settings = PlayerSettings {
        subtitle_mode: SubtitleMode::Select,
        ..single_file_settings()
    };
    let mut req = request("v2");
    req.subtitle_file_id = Some("s1".to_string());

    let prepared = Session::prepare(folder(0.0), &settings, &req).await.unwrap();
    let line = prepared.command.command_line();
    assert!(line.contains("https://cdn.example/s1"));
    assert!(!line.contains("https://cdn.example/s2"));

    prepared.abandon().await;
}

#[tokio::test]
async fn test_listing_failure_still_plays_the_file() {
    let drive = Arc::new(Folder {
        listing_fails: true,
        ..Folder::default()
    });
    let prepared = Session::prepare(drive, &single_file_settings(), &request("lonely"))
        .await
        .unwrap();

    assert_eq!(prepared.entries.len(), 1);
    assert_eq!(prepared.entries[0].file_id, "lonely");
    assert!(prepared.subtitles.is_empty());

    prepared.abandon().await;
}

#[tokio::test]
async fn test_unresolvable_file_fails_preparation() {
    let settings = PlayerSettings {
        video_mode: VideoMode::Online,
        ..single_file_settings()
    };
    let mut files = folder(0.0).files.clone();
    files[1].punish_flag = 1;
    let drive = Arc::new(Folder {
        files,
        ..Folder::default()
    });

    let result = Session::prepare(drive, &settings, &request("v2")).await;
    assert!(matches!(
        result,
        Err(PlaybackError::UrlResolutionFailed { file_id, .. }) if file_id == "v2"
    ));
}

#[tokio::test]
async fn test_playlist_launch_routes_through_gateway() {
    let settings = PlayerSettings {
        path: "mpv".to_string(),
        enable_playlist: true,
        gateway_start_port: 0,
        ..PlayerSettings::default()
    };
    let prepared = Session::prepare(folder(300.0), &settings, &request("v2"))
        .await
        .unwrap();

    assert!(prepared.playlist_mode);
    let ids: Vec<_> = prepared.entries.iter().map(|e| e.file_id.as_str()).collect();
    assert_eq!(ids, vec!["v1", "v2", "v3"]);
    assert_eq!(prepared.start_index, 1);
    assert_eq!(prepared.subtitles.len(), 2);

    let line = prepared.command.command_line();
    assert!(line.contains("--playlist-start=1"));
    assert!(line.contains("--input-ipc-server="));
    // Resume and subtitle are applied over the control channel instead
    assert!(!line.contains("--start="));
    assert!(!line.contains("--sub-file="));

    prepared.abandon().await;
}

#[tokio::test]
async fn test_prepare_does_not_tag_the_drive() {
    let settings = PlayerSettings {
        auto_color_tag: true,
        ..single_file_settings()
    };
    let drive = folder(0.0);
    let prepared = Session::prepare(drive.clone(), &settings, &request("v2"))
        .await
        .unwrap();
    prepared.abandon().await;

    assert!(drive.tags().is_empty());
}

// =============================================================================
// Launch Tests
// =============================================================================

#[tokio::test]
async fn test_missing_player_fails_the_launch() {
    let settings = PlayerSettings {
        path: "/nonexistent/dir/mpv".to_string(),
        resume_history: false,
        subtitle_mode: SubtitleMode::Off,
        ..single_file_settings()
    };
    let result = Session::launch(folder(0.0), settings, request("v2")).await;
    assert!(matches!(
        result,
        Err(PlaybackError::PlayerNotFound(path)) if path == "/nonexistent/dir/mpv"
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_missing_command_status_is_player_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let settings = PlayerSettings {
        path: fake_player(dir.path(), "player", 127),
        resume_history: false,
        subtitle_mode: SubtitleMode::Off,
        ..single_file_settings()
    };
    let session = Session::launch(folder(0.0), settings, request("v2"))
        .await
        .unwrap();
    assert_eq!(session.kind(), PlayerKind::Plain);

    assert!(matches!(
        session.wait().await,
        Err(PlaybackError::PlayerNotFound(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_player_exit_tears_down_playlist_and_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let settings = PlayerSettings {
        path: fake_player(dir.path(), "potplayer", 0),
        enable_playlist: true,
        gateway_start_port: 0,
        auto_color_tag: true,
        ..PlayerSettings::default()
    };
    let drive = folder(0.0);
    let prepared = Session::prepare(drive.clone(), &settings, &request("v3"))
        .await
        .unwrap();
    assert!(prepared.playlist_mode);

    let playlist = PlaylistFile::default_path(PlaylistFormat::Dpl);
    let content = std::fs::read_to_string(&playlist).unwrap();
    let port: u16 = content
        .split("127.0.0.1:")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap()
        .parse()
        .unwrap();

    let session = Session::start(drive.clone(), settings, request("v3"), prepared)
        .await
        .unwrap();
    assert_eq!(session.kind(), PlayerKind::PotPlayer);
    session.wait().await.unwrap();

    assert!(!playlist.exists());
    let listener = bind_from(port).await.unwrap();
    assert_eq!(listener.local_addr().unwrap().port(), port);
    // Tagging happens once the player is actually started
    assert_eq!(drive.tags(), vec!["v3".to_string()]);
}

// =============================================================================
// Teardown Tests
// =============================================================================

#[tokio::test]
async fn test_concurrent_teardown_releases_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("play_list.m3u");
    let playlist = PlaylistFile::write(&path, "#EXTM3U\n").unwrap();

    let resolver = MediaResolver::new(folder(0.0), VideoMode::Original, Vec::<String>::new());
    let gateway = Gateway::start(0, Arc::new(resolver)).await.unwrap();
    let port = gateway.port();

    let teardown = Arc::new(Teardown::new(Some(playlist), Some(gateway)));
    let (a, b, c) = futures::join!(teardown.run(), teardown.run(), teardown.run());

    assert_eq!([a, b, c].iter().filter(|won| **won).count(), 1);
    assert!(teardown.is_done());
    assert!(!path.exists());

    let listener = bind_from(port).await.unwrap();
    assert_eq!(listener.local_addr().unwrap().port(), port);
}

#[tokio::test]
async fn test_teardown_from_parallel_tasks() {
    let teardown = Arc::new(Teardown::new(None, None));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let t = teardown.clone();
            tokio::spawn(async move { t.run().await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_channel_attached_after_teardown_is_closed() {
    let teardown = Teardown::new(None, None);
    assert!(teardown.run().await);

    let (ours, _player) = tokio::io::duplex(1024);
    let (channel, _events) = ControlChannel::from_stream(ours);
    let channel = Arc::new(channel);
    teardown.attach_channel(channel.clone()).await;

    assert!(matches!(
        channel.command(vec![json!("get_property"), json!("pause")]).await,
        Err(PlaybackError::ProcessCrashed)
    ));
}

#[tokio::test]
async fn test_teardown_closes_attached_channel() {
    let teardown = Teardown::new(None, None);
    let (ours, _player) = tokio::io::duplex(1024);
    let (channel, _events) = ControlChannel::from_stream(ours);
    let channel = Arc::new(channel);

    teardown.attach_channel(channel.clone()).await;
    assert!(teardown.run().await);

    assert!(matches!(
        channel.command(vec![json!("quit")]).await,
        Err(PlaybackError::ProcessCrashed)
    ));
}
