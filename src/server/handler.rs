// Axum request handler — maps browser GETs onto files under the asset root.

use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use super::resolve::{content_type_for, normalize_request_path};
use crate::config::STREAM_BUFFER_BYTES;
use crate::engine::asset_root::AssetRoot;
use crate::engine::coordinator::AssetLease;
use crate::engine::stats::ServeStats;
use crate::error::EngineError;

#[derive(Clone)]
struct ServeState {
    root: AssetRoot,
    stats: Arc<ServeStats>,
}

pub struct AssetServer {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl AssetServer {
    /// Bind 127.0.0.1:`port` (0 picks a free port) and serve the lease's asset root.
    ///
    /// The lease is held until the server has fully shut down.
    pub async fn start(
        port: u16,
        lease: AssetLease,
        stats: Arc<ServeStats>,
    ) -> Result<Self, EngineError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| EngineError::Bind { port, source })?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = router(lease.root().clone(), stats);
        info!(
            "asset server listening on 127.0.0.1:{} root={}",
            port,
            lease.root().path().display()
        );

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("asset server on port {} failed: {}", port, e);
            }
            info!("asset server on port {} stopped", port);
            drop(lease);
        });

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build a URL for an asset path, e.g. `url_for("index.html")`.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "http://127.0.0.1:{}/{}",
            self.port,
            path.trim_start_matches('/')
        )
    }

    /// False once the serve loop has exited.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Shut down gracefully, waiting for in-flight responses to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("asset server task ended abnormally: {}", e);
        }
    }
}

/// Every path and method is handled by the same file lookup.
fn router(root: AssetRoot, stats: Arc<ServeStats>) -> Router {
    Router::new()
        .fallback(serve_asset)
        .with_state(ServeState { root, stats })
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "404 Not Found",
    )
        .into_response()
}

fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "500 Internal Server Error",
    )
        .into_response()
}

async fn serve_asset(State(state): State<ServeState>, uri: Uri) -> Response {
    let relative = match normalize_request_path(uri.path()) {
        Ok(p) => p,
        Err(e) => {
            warn!("rejected request path {:?}: {}", uri.path(), e);
            state.stats.record_not_found();
            return not_found();
        }
    };

    let path = state.root.resolve(&relative);
    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => {
            state.stats.record_not_found();
            return not_found();
        }
        Err(e) => return lookup_failed(&state.stats, &relative, "stat", &e),
    };

    // Symlinks inside the root must not lead outside it.
    match escapes_root(&state.root, &path).await {
        Ok(false) => {}
        Ok(true) => {
            warn!("request {} resolves outside asset root", relative.display());
            state.stats.record_not_found();
            return not_found();
        }
        Err(e) => return lookup_failed(&state.stats, &relative, "canonicalize", &e),
    }

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            error!("open failed for {}: {}", relative.display(), e);
            state.stats.record_error();
            return server_error();
        }
    };

    let len = meta.len();
    state.stats.record_served(len);
    debug!("serving {} bytes={}", relative.display(), len);

    // A client that goes away just drops this stream.
    let body = Body::from_stream(ReaderStream::with_capacity(file, STREAM_BUFFER_BYTES));
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type_for(&relative)),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        body,
    )
        .into_response()
}

/// Whether a failed path lookup just means there is nothing servable there.
///
/// Overlong names and symlink loops come from the request path and answer 404.
/// Only failures of the filesystem itself are server errors.
fn is_lookup_miss(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::OutOfMemory
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}

fn lookup_failed(stats: &ServeStats, relative: &Path, op: &str, e: &io::Error) -> Response {
    if is_lookup_miss(e) {
        debug!("not found: {} ({})", relative.display(), e);
        stats.record_not_found();
        not_found()
    } else {
        error!("{} failed for {}: {}", op, relative.display(), e);
        stats.record_error();
        server_error()
    }
}

async fn escapes_root(root: &AssetRoot, path: &Path) -> io::Result<bool> {
    let root = tokio::fs::canonicalize(root.path()).await?;
    let target = tokio::fs::canonicalize(path).await?;
    Ok(!target.starts_with(&root))
}
