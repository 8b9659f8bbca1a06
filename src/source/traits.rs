use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::manifest::ReleaseManifest;
use crate::engine::stats::UpdateProgress;
use crate::error::{DownloadError, UpdateError};

/// Remote host publishing the game releases.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch the latest release manifest. Never cached.
    async fn fetch_manifest(&self) -> Result<ReleaseManifest, UpdateError>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// Dropping the returned future tears down the connection.
    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: Arc<UpdateProgress>,
    ) -> Result<u64, DownloadError>;
}
