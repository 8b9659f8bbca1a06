// The installed-release directory: safe relative paths, staging, and the replace-on-update swap.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::PathSecurityError;

/// Validate a slash-separated relative path and turn it into a `PathBuf`
/// that cannot leave the directory it is joined onto.
///
/// Empty and `.` segments are dropped. The result may be empty.
pub fn sanitize_relative(raw: &str) -> Result<PathBuf, PathSecurityError> {
    if raw.contains('\0') || raw.contains('\\') {
        return Err(PathSecurityError::InvalidCharacter);
    }
    if raw.starts_with('/') {
        return Err(PathSecurityError::Absolute);
    }

    let mut out = PathBuf::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathSecurityError::ParentTraversal),
            // Drive prefixes such as `C:`.
            s if s.contains(':') => return Err(PathSecurityError::Absolute),
            s => out.push(s),
        }
    }
    Ok(out)
}

/// Scratch area next to the asset root. Everything under it is removed on drop.
pub struct StagingDir {
    dir: TempDir,
    content: PathBuf,
}

impl StagingDir {
    /// Directory the archive is extracted into.
    pub fn content_dir(&self) -> &Path {
        &self.content
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Clone)]
pub struct AssetRoot {
    path: PathBuf,
}

impl AssetRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the root if it does not exist yet (first launch).
    pub fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.path)
    }

    /// Join an already-sanitized relative path onto the root.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.path.join(relative)
    }

    /// True when a release is installed, i.e. the root exists and is non-empty.
    pub fn is_installed(&self) -> bool {
        match fs::read_dir(&self.path) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }

    /// Sorted relative paths of every regular file under the root.
    pub fn installed_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if self.path.is_dir() {
            collect_files(&self.path, Path::new(""), &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    /// Remove everything and recreate an empty root. Idempotent.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.path)?;
        info!("asset root cleared path={}", self.path.display());
        Ok(())
    }

    /// Create a fresh scratch directory on the same filesystem as the root,
    /// so the final swap is a rename.
    pub fn create_staging(&self) -> io::Result<StagingDir> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let dir = tempfile::Builder::new()
            .prefix(".asset-staging-")
            .tempdir_in(parent)?;
        let content = dir.path().join("root");
        fs::create_dir(&content)?;
        debug!("staging dir created path={}", dir.path().display());
        Ok(StagingDir { dir, content })
    }

    /// Replace the root with the staged content.
    ///
    /// The old tree is renamed aside, the new one renamed into place, and the
    /// old tree is deleted together with the staging dir. No reader can see a
    /// mix of both releases.
    pub fn swap_in(&self, staging: StagingDir) -> io::Result<()> {
        let retired = staging.path().join("retired");
        let had_previous = match fs::rename(&self.path, &retired) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };

        if let Err(e) = fs::rename(staging.content_dir(), &self.path) {
            if had_previous {
                if let Err(restore) = fs::rename(&retired, &self.path) {
                    warn!("restoring previous asset root failed: {}", restore);
                }
            }
            return Err(e);
        }

        info!("asset root swapped path={}", self.path.display());
        drop(staging);
        Ok(())
    }
}

fn collect_files(dir: &Path, prefix: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let rel = prefix.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), &rel, out)?;
        } else if file_type.is_file() {
            out.push(rel);
        }
    }
    Ok(())
}
