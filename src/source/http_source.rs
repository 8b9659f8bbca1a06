use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::manifest::ReleaseManifest;
use super::traits::ReleaseSource;
use crate::config::{EngineConfig, USER_AGENT};
use crate::engine::stats::UpdateProgress;
use crate::error::{DownloadError, UpdateError};

pub struct HttpReleaseSource {
    client: Client,
    manifest_url: String,
}

impl HttpReleaseSource {
    pub fn new(
        manifest_url: String,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;
        Ok(Self {
            client,
            manifest_url,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(
            config.release_url.clone(),
            config.connect_timeout(),
            config.read_timeout(),
        )
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch_manifest(&self) -> Result<ReleaseManifest, UpdateError> {
        let resp = self
            .client
            .get(&self.manifest_url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| UpdateError::ManifestFetch(e.to_string()))?;

        let status = resp.status();
        debug!("manifest fetch status={}", status.as_u16());
        if !status.is_success() {
            warn!(
                "manifest fetch failed status={} url={}",
                status.as_u16(),
                self.manifest_url
            );
            return Err(UpdateError::ManifestFetch(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| UpdateError::ManifestFetch(e.to_string()))?;
        let manifest = ReleaseManifest::parse(&body)?;
        info!(
            "release manifest tag={} assets={}",
            manifest.tag_name.as_deref().unwrap_or("?"),
            manifest.assets.len()
        );
        Ok(manifest)
    }

    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        progress: Arc<UpdateProgress>,
    ) -> Result<u64, DownloadError> {
        let mut resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            warn!("archive download failed status={} url={}", status.as_u16(), url);
            return Err(DownloadError::Status(status.as_u16()));
        }

        // Advisory only: used for progress, never to size buffers.
        let expected = resp.content_length();
        progress.begin_download(expected);

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.record_downloaded(chunk.len() as u64);
        }
        file.flush().await?;

        if let Some(expected) = expected {
            if written < expected {
                return Err(DownloadError::Truncated {
                    received: written,
                    expected,
                });
            }
        }

        debug!("archive downloaded url={} bytes={}", url, written);
        Ok(written)
    }
}
