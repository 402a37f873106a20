//! Error types shared across the playback orchestrator

use thiserror::Error;

/// Errors from the remote drive collaborator
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Drive API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected drive response: {0}")]
    Decode(String),
    #[error("Drive returned no usable URL")]
    NoUrl,
    #[error("Access token expired, sign in again")]
    TokenExpired,
}

/// Errors from launching and driving a playback session
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Player '{0}' not found. Check the configured player path.")]
    PlayerNotFound(String),
    #[error("Failed to start player: {0}")]
    SpawnFailed(std::io::Error),
    #[error("Control channel unavailable: {0}")]
    ControlChannelUnavailable(String),
    #[error("Could not resolve a media URL for {file_id}: {reason}")]
    UrlResolutionFailed { file_id: String, reason: String },
    #[error("Failed to persist resume cursor for {file_id}: {reason}")]
    PersistResumeFailed { file_id: String, reason: String },
    #[error("Player process is gone")]
    ProcessCrashed,
    #[error("Control channel protocol error: {0}")]
    Ipc(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlaybackError {
    pub fn resolution(file_id: impl Into<String>, reason: impl ToString) -> Self {
        PlaybackError::UrlResolutionFailed {
            file_id: file_id.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = PlaybackError> = std::result::Result<T, E>;
