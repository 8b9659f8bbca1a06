// Error taxonomy for the update pipeline, the asset server, and the host API.

use std::io;

use thiserror::Error;

/// Failures while streaming the release archive to disk.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("download failed: HTTP {0}")]
    Status(u16),

    #[error("truncated transfer: got {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("transfer error: {0}")]
    Transport(String),

    #[error("writing archive failed: {0}")]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DownloadError::Timeout
        } else if e.is_connect() {
            DownloadError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            DownloadError::Status(status.as_u16())
        } else {
            DownloadError::Transport(e.to_string())
        }
    }
}

/// Failures while unpacking the archive into the scratch directory.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),

    #[error("extract io error: {0}")]
    Io(#[from] io::Error),

    #[error("extraction cancelled")]
    Cancelled,
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => ExtractError::Io(io),
            other => ExtractError::Corrupt(other.to_string()),
        }
    }
}

/// A request path that would resolve outside the asset root.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSecurityError {
    #[error("parent-directory segment in path")]
    ParentTraversal,

    #[error("absolute path marker in path")]
    Absolute,

    #[error("path is not valid utf-8 after decoding")]
    InvalidEncoding,

    #[error("forbidden character in path")]
    InvalidCharacter,
}

/// Failures of a single update operation. The previous asset set is left untouched.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("fetching release manifest failed: {0}")]
    ManifestFetch(String),

    #[error("release manifest is malformed: {0}")]
    ManifestParse(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("asset root is busy: {0}")]
    Busy(&'static str),

    #[error("update cancelled")]
    Cancelled,
}

impl UpdateError {
    /// One-line summary suitable for a toast in the host UI.
    pub fn user_message(&self) -> String {
        format!("update failed: {}", self)
    }
}

/// Errors surfaced by the host-facing engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("asset root is busy: {0}")]
    Busy(&'static str),

    #[error("local server is already listening on port {0}")]
    AlreadyListening(u16),

    #[error("engine not initialized")]
    NotInitialized,

    #[error("failed to bind 127.0.0.1:{port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Update(#[from] UpdateError),
}
