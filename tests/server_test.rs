// Integration tests for the local asset server.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use offline_play_engine::config::EngineConfig;
use offline_play_engine::engine::coordinator::Activity;
use offline_play_engine::engine::host::GameHost;
use offline_play_engine::engine::stats::UpdateProgress;
use offline_play_engine::error::{DownloadError, EngineError, UpdateError};
use offline_play_engine::source::manifest::{ReleaseManifest, Variant};
use offline_play_engine::source::traits::ReleaseSource;

const LARGE_SIZE: usize = 8 * 1024 * 1024; // 8 MB

/// Deterministic large asset content.
fn generate_content() -> Vec<u8> {
    (0..LARGE_SIZE).map(|i| (i % 253) as u8).collect()
}

/// Release host that is never reachable; these tests only exercise serving.
struct OfflineSource;

#[async_trait]
impl ReleaseSource for OfflineSource {
    async fn fetch_manifest(&self) -> Result<ReleaseManifest, UpdateError> {
        Err(UpdateError::ManifestFetch("offline".to_string()))
    }

    async fn download_to(
        &self,
        _url: &str,
        _dest: &Path,
        _progress: Arc<UpdateProgress>,
    ) -> Result<u64, DownloadError> {
        Err(DownloadError::Connect("offline".to_string()))
    }
}

fn populated_host(base: &Path) -> GameHost {
    let config = EngineConfig::with_base_dir(base);
    let host = GameHost::with_source(config, Arc::new(OfflineSource)).unwrap();
    let root = host.asset_root().path();
    std::fs::create_dir_all(root.join("js")).unwrap();
    std::fs::create_dir_all(root.join("data")).unwrap();
    std::fs::write(root.join("index.html"), b"<html>game</html>").unwrap();
    std::fs::write(root.join("js/main.js"), b"start();").unwrap();
    std::fs::write(root.join("data/dex.json"), b"{\"n\":1}").unwrap();
    std::fs::write(root.join("engine.wasm"), b"\0asm").unwrap();
    std::fs::write(root.join("big.bin"), generate_content()).unwrap();
    // Outside the asset root; must never be served.
    std::fs::write(base.join("secret.txt"), b"top secret").unwrap();
    host
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Send a raw request line so the path reaches the server without client-side normalization.
async fn raw_get(port: u16, path: &str) -> (u16, Vec<u8>) {
    let mut sock = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let req = format!(
        "GET {} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
        path
    );
    sock.write_all(req.as_bytes()).await.unwrap();
    let mut resp = Vec::new();
    sock.read_to_end(&mut resp).await.unwrap();

    let split = resp
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&resp[..split]).to_string();
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    (status, resp[split + 4..].to_vec())
}

#[tokio::test]
async fn test_serves_existing_files() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let port = host.start_server_on(0).await.unwrap();
    let client = client();

    for (path, body, content_type) in [
        ("index.html", &b"<html>game</html>"[..], "text/html"),
        ("js/main.js", &b"start();"[..], "application/javascript"),
        ("data/dex.json", &b"{\"n\":1}"[..], "application/json"),
        ("engine.wasm", &b"\0asm"[..], "application/wasm"),
    ] {
        let resp = client
            .get(format!("http://127.0.0.1:{}/{}", port, path))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "{}", path);
        assert_eq!(resp.headers()["content-type"], content_type);
        assert_eq!(&resp.bytes().await.unwrap()[..], body);
    }

    // Large file comes back byte-for-byte.
    let resp = client
        .get(format!("http://127.0.0.1:{}/big.bin", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/octet-stream");
    assert_eq!(resp.content_length(), Some(LARGE_SIZE as u64));
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &generate_content()[..]);

    let stats = host.serve_stats();
    assert_eq!(stats.requests, 5);
    assert_eq!(stats.bytes_served, 17 + 8 + 7 + 4 + LARGE_SIZE as u64);

    host.stop_server().await;
}

#[tokio::test]
async fn test_missing_paths_are_404() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let port = host.start_server_on(0).await.unwrap();
    let client = client();

    for path in ["missing.html", "js/nope.js", "js", "", "index.html/child"] {
        let resp = client
            .get(format!("http://127.0.0.1:{}/{}", port, path))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "{:?}", path);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(resp.text().await.unwrap(), "404 Not Found");
    }

    host.stop_server().await;
}

#[tokio::test]
async fn test_overlong_names_are_404() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let port = host.start_server_on(0).await.unwrap();

    let long = "a".repeat(300);
    for path in [
        format!("/{}.js", long),
        format!("/js/{}/main.js", long),
        format!("/{}", "b/".repeat(3000)),
    ] {
        let (status, body) = raw_get(port, &path).await;
        assert_eq!(status, 404, "{}", &path[..40]);
        assert_eq!(body, b"404 Not Found");
    }

    let (status, _) = raw_get(port, "/index.html").await;
    assert_eq!(status, 200);
    assert_eq!(host.serve_stats().errors, 0);

    host.stop_server().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_loop_is_404() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let root = host.asset_root().path();
    std::os::unix::fs::symlink(root.join("loop-b.js"), root.join("loop-a.js")).unwrap();
    std::os::unix::fs::symlink(root.join("loop-a.js"), root.join("loop-b.js")).unwrap();
    let port = host.start_server_on(0).await.unwrap();

    for path in ["/loop-a.js", "/loop-a.js/child"] {
        let (status, body) = raw_get(port, path).await;
        assert_eq!(status, 404, "{}", path);
        assert_eq!(body, b"404 Not Found");
    }

    host.stop_server().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_filesystem_fault_answers_500_and_keeps_serving() {
    use std::os::unix::fs::PermissionsExt;

    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let locked = host.asset_root().path().join("locked");
    std::fs::create_dir(&locked).unwrap();
    std::fs::write(locked.join("app.js"), b"hidden();").unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    // Privileged users bypass the permission bits and get the file instead.
    let denied = std::fs::metadata(locked.join("app.js")).is_err();
    let port = host.start_server_on(0).await.unwrap();

    let (status, body) = raw_get(port, "/locked/app.js").await;
    if denied {
        assert_eq!(status, 500);
        assert_eq!(body, b"500 Internal Server Error");
        assert_eq!(host.serve_stats().errors, 1);
    } else {
        assert_eq!(status, 200);
        assert_eq!(body, b"hidden();");
    }

    // The listener is unaffected.
    let (status, body) = raw_get(port, "/js/main.js").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"start();");
    assert!(host.is_listening().await);

    host.stop_server().await;
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn test_traversal_never_escapes_root() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let port = host.start_server_on(0).await.unwrap();

    for path in [
        "/../secret.txt",
        "/../../../etc/passwd",
        "/js/../../secret.txt",
        "/%2e%2e/secret.txt",
        "/%2E%2E%2Fsecret.txt",
        "/..%2f..%2f..%2fetc%2fpasswd",
        "//etc/passwd",
        "/..%5csecret.txt",
        "/%00/etc/passwd",
    ] {
        let (status, body) = raw_get(port, path).await;
        assert_ne!(status, 200, "{}", path);
        assert!(status == 404 || status == 400, "{} -> {}", path, status);
        assert!(!body.windows(10).any(|w| w == b"top secret"), "{}", path);
        assert!(!body.windows(5).any(|w| w == b"root:"), "{}", path);
    }

    // A well-formed path still works over the raw client.
    let (status, body) = raw_get(port, "/js/main.js").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"start();");

    host.stop_server().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_out_of_root_is_not_served() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    std::os::unix::fs::symlink(
        base.path().join("secret.txt"),
        host.asset_root().path().join("link.txt"),
    )
    .unwrap();
    let port = host.start_server_on(0).await.unwrap();

    let (status, body) = raw_get(port, "/link.txt").await;
    assert_eq!(status, 404);
    assert_eq!(body, b"404 Not Found");

    host.stop_server().await;
}

#[tokio::test]
async fn test_server_state_machine() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());

    // Stop while stopped is a no-op.
    host.stop_server().await;
    assert!(!host.is_listening().await);

    let port = host.start_server_on(0).await.unwrap();
    assert!(host.is_listening().await);
    assert_eq!(host.server_port().await, Some(port));
    assert_eq!(host.current_activity(), Some(Activity::Serving));

    // Second start is rejected and leaves the first server untouched.
    assert!(matches!(
        host.start_server_on(0).await,
        Err(EngineError::AlreadyListening(p)) if p == port
    ));
    let (status, _) = raw_get(port, "/index.html").await;
    assert_eq!(status, 200);

    host.stop_server().await;
    host.stop_server().await;
    assert!(!host.is_listening().await);
    assert_eq!(host.current_activity(), None);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_update_and_delete_refused_while_serving() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let port = host.start_server_on(0).await.unwrap();

    let err = host.update(Variant::Standard).await.unwrap_err();
    assert!(matches!(err, EngineError::Update(UpdateError::Busy(_))));
    assert!(matches!(host.spawn_update(Variant::Standard), Err(EngineError::Busy(_))));
    assert!(matches!(host.delete_assets().await, Err(EngineError::Busy(_))));

    // Nothing changed on disk.
    let (status, body) = raw_get(port, "/index.html").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"<html>game</html>");

    host.stop_server().await;

    // Once stopped, delete goes through and old paths disappear.
    host.delete_assets().await.unwrap();
    let port = host.start_server_on(0).await.unwrap();
    for path in ["/index.html", "/js/main.js", "/big.bin"] {
        let (status, body) = raw_get(port, path).await;
        assert_eq!(status, 404, "{}", path);
        assert_eq!(body, b"404 Not Found");
    }
    host.stop_server().await;
}

#[tokio::test]
async fn test_update_blocked_during_slow_stream() {
    let base = tempfile::tempdir().unwrap();
    let host = populated_host(base.path());
    let port = host.start_server_on(0).await.unwrap();

    // Slow reader: take the head and a first slice of the body, then pause.
    let mut sock = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    sock.write_all(b"GET /big.bin HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut first = vec![0u8; 64 * 1024];
    let n = sock.read(&mut first).await.unwrap();
    assert!(n > 0);
    let mut received = first[..n].to_vec();

    // Update attempts while the response is in flight are refused.
    assert!(matches!(
        host.spawn_update(Variant::Standard),
        Err(EngineError::Busy(label)) if label == Activity::Serving.label()
    ));
    assert!(matches!(host.spawn_delete(), Err(EngineError::Busy(_))));

    sock.read_to_end(&mut received).await.unwrap();
    let split = received
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap();
    assert_eq!(&received[split + 4..], &generate_content()[..]);

    host.stop_server().await;
    assert_eq!(host.current_activity(), None);
}
