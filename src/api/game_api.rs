use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;

use crate::config::EngineConfig;
use crate::engine::host::GameHost;
use crate::engine::stats::UpdatePhase;
use crate::error::EngineError;
use crate::source::manifest::Variant;

static ENGINE: RwLock<Option<Arc<GameHost>>> = parking_lot::const_rwlock(None);
/// Serializes `init_engine` and `dispose` so two hosts never share the asset root.
static LIFECYCLE: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Progress of the running (or last) update, for the host's progress dialog.
#[derive(Debug, Clone)]
pub struct UpdateProgressInfo {
    pub phase: String,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<u8>,
    pub error: Option<String>,
}

fn engine() -> Result<Arc<GameHost>> {
    ENGINE
        .read()
        .clone()
        .ok_or_else(|| EngineError::NotInitialized.into())
}

fn update_failed(e: EngineError) -> anyhow::Error {
    match e {
        EngineError::Update(inner) => anyhow!(inner.user_message()),
        other => anyhow!("update failed: {}", other),
    }
}

/// Initialize the engine from a JSON config (see `EngineConfig`).
///
/// A previous engine is shut down first: its update is cancelled and its server
/// stopped, and this returns only once it no longer touches the asset root.
pub async fn init_engine(config_json: String) -> Result<()> {
    let config = EngineConfig::from_json(&config_json)?;
    let _guard = LIFECYCLE.lock().await;
    shutdown_current().await;
    let host = GameHost::new(config)?;
    *ENGINE.write() = Some(Arc::new(host));
    Ok(())
}

/// Whether a release is installed (enables Play / Delete in the host UI).
#[flutter_rust_bridge::frb(sync)]
pub fn has_game_files() -> Result<bool> {
    Ok(engine()?.is_installed())
}

/// Download and install the latest release, replacing the installed one.
pub async fn update_game_files(modded: bool) -> Result<()> {
    engine()?
        .update(Variant::from_modded(modded))
        .await
        .map_err(update_failed)
}

/// Abort a running update. The previous release stays installed.
pub fn cancel_update() -> Result<()> {
    engine()?.cancel_update();
    Ok(())
}

#[flutter_rust_bridge::frb(sync)]
pub fn update_progress() -> Result<UpdateProgressInfo> {
    let snap = engine()?.progress();
    let phase = match snap.phase {
        UpdatePhase::Idle => "idle",
        UpdatePhase::ResolvingManifest => "resolving",
        UpdatePhase::Downloading => "downloading",
        UpdatePhase::Extracting => "extracting",
        UpdatePhase::Swapping => "installing",
        UpdatePhase::Done => "done",
        UpdatePhase::Failed => "failed",
    };
    Ok(UpdateProgressInfo {
        phase: phase.to_string(),
        downloaded_bytes: snap.downloaded_bytes,
        total_bytes: snap.total_bytes,
        percent: snap.percent,
        error: snap.error,
    })
}

/// Delete the installed release.
pub async fn delete_game_files() -> Result<()> {
    engine()?
        .delete_assets()
        .await
        .map_err(|e| anyhow!("delete failed: {}", e))
}

/// Start the local server and return the URL the web view should load.
pub async fn start_local_play() -> Result<String> {
    Ok(engine()?.start_server().await?)
}

/// Stop the local server. No-op when it is not running.
pub async fn stop_local_play() -> Result<()> {
    engine()?.stop_server().await;
    Ok(())
}

/// Stop serving, cancel any update, and drop the engine.
pub async fn dispose() {
    let _guard = LIFECYCLE.lock().await;
    shutdown_current().await;
}

async fn shutdown_current() {
    let host = ENGINE.write().take();
    if let Some(host) = host {
        host.shutdown().await;
    }
}
