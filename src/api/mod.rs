//! Remote drive collaborator
//!
//! - `DriveService`: the calls the playback orchestrator needs from the drive
//! - `DriveClient`: reqwest implementation against the drive's open API

pub mod drive;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{DriveFile, FileMetadata, ResolvedUrl, UrlMode};

pub use drive::DriveClient;

/// Operations the orchestrator performs against the cloud drive
///
/// Implementations are fail-fast: no call is retried here, the gateway and
/// tracker decide what a failure means for playback.
#[async_trait]
pub trait DriveService: Send + Sync {
    /// Resolve a time-limited URL for a file
    async fn resolve_media_url(
        &self,
        drive_id: &str,
        file_id: &str,
        mode: UrlMode,
    ) -> Result<ResolvedUrl, ApiError>;

    /// Fetch duration and resume cursor for a file
    async fn file_metadata(&self, drive_id: &str, file_id: &str) -> Result<FileMetadata, ApiError>;

    /// Store the playback position for a file
    async fn persist_resume_cursor(
        &self,
        drive_id: &str,
        file_id: &str,
        seconds: f64,
    ) -> Result<(), ApiError>;

    /// List the files (not folders) of a directory, sorted by name
    async fn list_directory(
        &self,
        drive_id: &str,
        parent_file_id: &str,
    ) -> Result<Vec<DriveFile>, ApiError>;

    /// Tag files with a color, returning the ids that were tagged
    async fn tag_files_with_color(
        &self,
        drive_id: &str,
        color: &str,
        file_ids: &[String],
    ) -> Result<Vec<String>, ApiError>;
}
