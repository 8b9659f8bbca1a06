// Host façade — composes the coordinator, update pipeline and local server behind one object.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;

use super::asset_root::AssetRoot;
use super::coordinator::{Activity, AssetCoordinator};
use super::stats::{ProgressSnapshot, ServeSnapshot, ServeStats};
use super::updater::{UpdateTask, Updater};
use crate::config::EngineConfig;
use crate::error::{EngineError, UpdateError};
use crate::server::handler::AssetServer;
use crate::source::http_source::HttpReleaseSource;
use crate::source::manifest::Variant;
use crate::source::traits::ReleaseSource;

pub struct GameHost {
    config: EngineConfig,
    coordinator: Arc<AssetCoordinator>,
    updater: Arc<Updater>,
    serve_stats: Arc<ServeStats>,
    server: tokio::sync::Mutex<Option<AssetServer>>,
}

impl GameHost {
    /// Create a host talking to the configured release endpoint over HTTP.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let source = Arc::new(HttpReleaseSource::from_config(&config)?);
        Ok(Self::with_source(config, source)?)
    }

    /// Create a host with a custom release source. Creates the asset root if missing.
    pub fn with_source(config: EngineConfig, source: Arc<dyn ReleaseSource>) -> io::Result<Self> {
        let root = AssetRoot::new(config.asset_dir.clone());
        root.ensure_exists()?;
        let updater = Arc::new(Updater::new(source, &config));
        Ok(Self {
            coordinator: AssetCoordinator::new(root),
            updater,
            serve_stats: Arc::new(ServeStats::new()),
            server: tokio::sync::Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn asset_root(&self) -> &AssetRoot {
        self.coordinator.root()
    }

    pub fn current_activity(&self) -> Option<Activity> {
        self.coordinator.current()
    }

    pub fn is_installed(&self) -> bool {
        self.coordinator.root().is_installed()
    }

    pub fn installed_files(&self) -> io::Result<Vec<PathBuf>> {
        self.coordinator.root().installed_files()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.updater.progress().snapshot()
    }

    pub fn serve_stats(&self) -> ServeSnapshot {
        self.serve_stats.snapshot()
    }

    /// Start an update in the background. Fails fast if the asset root is in use.
    pub fn spawn_update(&self, variant: Variant) -> Result<UpdateTask, EngineError> {
        let lease = self
            .coordinator
            .try_acquire(Activity::Updating)
            .map_err(|held| EngineError::Busy(held.label()))?;
        info!("update {:?} requested", variant);
        Ok(UpdateTask::spawn(Arc::clone(&self.updater), lease, variant))
    }

    /// Run an update to completion.
    pub async fn update(&self, variant: Variant) -> Result<(), EngineError> {
        let task = self.spawn_update(variant).map_err(|e| match e {
            EngineError::Busy(held) => EngineError::Update(UpdateError::Busy(held)),
            other => other,
        })?;
        task.join().await.map_err(EngineError::from)
    }

    /// Cancel the running update, if any. Its partial files are cleaned up.
    pub fn cancel_update(&self) {
        if self.updater.cancel_running() {
            info!("update cancellation requested");
        }
    }

    pub fn is_updating(&self) -> bool {
        self.updater.is_running()
    }

    /// Remove the installed release in the background.
    pub fn spawn_delete(&self) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
        let lease = self
            .coordinator
            .try_acquire(Activity::Deleting)
            .map_err(|held| EngineError::Busy(held.label()))?;
        Ok(tokio::spawn(async move {
            let root = lease.root().clone();
            let result = tokio::task::spawn_blocking(move || root.clear())
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            drop(lease);
            result.map_err(EngineError::from)
        }))
    }

    /// Remove the installed release and leave an empty asset root.
    pub async fn delete_assets(&self) -> Result<(), EngineError> {
        let handle = self.spawn_delete()?;
        handle
            .await
            .map_err(|e| EngineError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
    }

    /// Start serving on the configured port. Returns the URL of `index.html`.
    pub async fn start_server(&self) -> Result<String, EngineError> {
        let (_, url) = self.launch(self.config.port).await?;
        Ok(url)
    }

    /// Start serving on `port` (0 picks a free port), returning the bound port.
    ///
    /// Starting while already listening is rejected with `AlreadyListening`.
    pub async fn start_server_on(&self, port: u16) -> Result<u16, EngineError> {
        let (bound, _) = self.launch(port).await?;
        Ok(bound)
    }

    async fn launch(&self, port: u16) -> Result<(u16, String), EngineError> {
        let mut slot = self.server.lock().await;
        if let Some(server) = slot.as_ref() {
            if server.is_running() {
                return Err(EngineError::AlreadyListening(server.port()));
            }
        }
        if let Some(dead) = slot.take() {
            dead.shutdown().await;
        }

        let lease = self
            .coordinator
            .try_acquire(Activity::Serving)
            .map_err(|held| EngineError::Busy(held.label()))?;
        let server = AssetServer::start(port, lease, Arc::clone(&self.serve_stats)).await?;
        let launched = (server.port(), server.url_for("index.html"));
        *slot = Some(server);
        Ok(launched)
    }

    /// Stop the local server. No-op when stopped. Returns once the asset root is released.
    pub async fn stop_server(&self) {
        let server = self.server.lock().await.take();
        if let Some(server) = server {
            let port = server.port();
            server.shutdown().await;
            info!("local play stopped port={}", port);
        }
    }

    /// Cancel any update, stop serving, and wait until nothing holds the asset
    /// root. In-flight responses and a running delete finish first.
    pub async fn shutdown(&self) {
        self.cancel_update();
        self.stop_server().await;
        self.coordinator.wait_idle().await;
        info!("game host shut down");
    }

    pub async fn is_listening(&self) -> bool {
        self.server
            .lock()
            .await
            .as_ref()
            .map(AssetServer::is_running)
            .unwrap_or(false)
    }

    pub async fn server_port(&self) -> Option<u16> {
        self.server.lock().await.as_ref().map(AssetServer::port)
    }
}
