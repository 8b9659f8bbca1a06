// Update pipeline: resolve manifest, download archive, extract to staging, swap into the asset root.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::archive::extract_archive;
use super::asset_root::AssetRoot;
use super::coordinator::AssetLease;
use super::stats::{UpdatePhase, UpdateProgress};
use crate::config::EngineConfig;
use crate::error::{ExtractError, UpdateError};
use crate::source::manifest::Variant;
use crate::source::traits::ReleaseSource;

pub struct Updater {
    source: Arc<dyn ReleaseSource>,
    cache_dir: PathBuf,
    standard_asset_name: Option<String>,
    modified_asset_name: Option<String>,
    progress: Arc<UpdateProgress>,
    /// Token of the update in flight; cleared when its task ends.
    running: Mutex<Option<CancellationToken>>,
}

impl Updater {
    pub fn new(source: Arc<dyn ReleaseSource>, config: &EngineConfig) -> Self {
        Self {
            source,
            cache_dir: config.cache_dir.clone(),
            standard_asset_name: config.standard_asset_name.clone(),
            modified_asset_name: config.modified_asset_name.clone(),
            progress: Arc::new(UpdateProgress::new()),
            running: Mutex::new(None),
        }
    }

    /// Cancel the update in flight. Returns false when none is running.
    pub fn cancel_running(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn progress(&self) -> &Arc<UpdateProgress> {
        &self.progress
    }

    fn label_for(&self, variant: Variant) -> Option<&str> {
        match variant {
            Variant::Standard => self.standard_asset_name.as_deref(),
            Variant::ModifiedVariant => self.modified_asset_name.as_deref(),
        }
    }

    /// Run one full update under `lease`. On any failure the previous asset set is kept.
    pub async fn run(
        &self,
        lease: &AssetLease,
        variant: Variant,
        cancel: &CancellationToken,
    ) -> Result<(), UpdateError> {
        let t0 = Instant::now();
        self.progress.reset();

        let result = self.run_inner(lease.root(), variant, cancel).await;
        match &result {
            Ok(()) => {
                self.progress.set_phase(UpdatePhase::Done);
                info!(
                    "update {:?} finished elapsed_ms={}",
                    variant,
                    t0.elapsed().as_millis()
                );
            }
            Err(e) => {
                error!("update {:?} failed: {}", variant, e);
                self.progress.fail(e.user_message());
            }
        }
        result
    }

    async fn run_inner(
        &self,
        root: &AssetRoot,
        variant: Variant,
        cancel: &CancellationToken,
    ) -> Result<(), UpdateError> {
        self.progress.set_phase(UpdatePhase::ResolvingManifest);
        let manifest = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            manifest = self.source.fetch_manifest() => manifest?,
        };
        let url = manifest
            .select(variant, self.label_for(variant))?
            .browser_download_url
            .clone();
        info!("update {:?} downloading {}", variant, url);

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        // Removed on drop, whichever way this function returns.
        let archive = tempfile::Builder::new()
            .prefix(variant.archive_name().trim_end_matches(".zip"))
            .suffix(".zip")
            .tempfile_in(&self.cache_dir)?;

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            written = self.source.download_to(&url, archive.path(), Arc::clone(&self.progress)) => written?,
        };
        debug!("archive stored at {} ({} bytes)", archive.path().display(), bytes);

        let root = root.clone();
        let archive_path = archive.path().to_path_buf();
        let progress = Arc::clone(&self.progress);
        let cancel = cancel.clone();
        let files = tokio::task::spawn_blocking(move || {
            stage_and_swap(&root, &archive_path, &progress, &cancel)
        })
        .await
        .map_err(aborted)??;

        info!("update {:?} installed {} files", variant, files);
        drop(archive);
        Ok(())
    }
}

/// Extract into a fresh staging dir, then swap it in. Blocking.
fn stage_and_swap(
    root: &AssetRoot,
    archive: &Path,
    progress: &UpdateProgress,
    cancel: &CancellationToken,
) -> Result<u64, UpdateError> {
    let staging = root.create_staging()?;
    let files = extract_archive(archive, staging.content_dir(), progress, cancel).map_err(
        |e| match e {
            ExtractError::Cancelled => UpdateError::Cancelled,
            other => UpdateError::Extract(other),
        },
    )?;

    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }
    progress.set_phase(UpdatePhase::Swapping);
    root.swap_in(staging)?;
    Ok(files)
}

fn aborted(e: tokio::task::JoinError) -> UpdateError {
    UpdateError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("update task aborted: {}", e),
    ))
}

/// Handle to a spawned update. Await it with [`UpdateTask::join`] or abort it with
/// [`UpdateTask::cancel`]; the archive and staging dir are cleaned up either way.
pub struct UpdateTask {
    handle: JoinHandle<Result<(), UpdateError>>,
    cancel: CancellationToken,
}

impl UpdateTask {
    /// Spawn `updater.run` holding `lease` until the task ends. The token is
    /// registered with the updater for the lifetime of the task.
    pub fn spawn(updater: Arc<Updater>, lease: AssetLease, variant: Variant) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        *updater.running.lock() = Some(cancel.clone());
        let handle = tokio::spawn(async move {
            let result = updater.run(&lease, variant, &token).await;
            // The lease is exclusive, so the slot still holds this task's token.
            updater.running.lock().take();
            drop(lease);
            result
        });
        Self { handle, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<(), UpdateError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(aborted(e)),
        }
    }
}
