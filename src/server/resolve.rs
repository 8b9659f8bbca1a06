use std::path::{Path, PathBuf};

use crate::engine::asset_root::sanitize_relative;
use crate::error::PathSecurityError;

/// Turn a request URI path into a path relative to the asset root.
///
/// The path is percent-decoded once and then validated segment by segment, so
/// encoded traversal (`%2e%2e`) is caught as well.
pub fn normalize_request_path(uri_path: &str) -> Result<PathBuf, PathSecurityError> {
    let decoded = urlencoding::decode(uri_path).map_err(|_| PathSecurityError::InvalidEncoding)?;
    let relative = decoded.strip_prefix('/').unwrap_or(&*decoded);
    sanitize_relative(relative)
}

/// Content type for a file, from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "wasm" => "application/wasm",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain",
        "webmanifest" => "application/manifest+json",
        "" => "application/octet-stream",
        _ => mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream"),
    }
}
