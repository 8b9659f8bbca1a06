// Zip extraction into the staging directory. Archive content is untrusted.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zip::ZipArchive;

use super::asset_root::sanitize_relative;
use super::stats::UpdateProgress;
use crate::error::ExtractError;

/// Extract every entry of `archive` under `dest`, returning the number of files written.
///
/// Entries whose names would escape `dest` abort the whole extraction.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    progress: &UpdateProgress,
    cancel: &CancellationToken,
) -> Result<u64, ExtractError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    progress.begin_extract(zip.len() as u64);

    let mut files = 0u64;
    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let mut entry = zip.by_index(index)?;
        let name = entry.name().to_string();
        let relative = sanitize_relative(&name).map_err(|e| {
            warn!("rejecting archive entry {:?}: {}", name, e);
            ExtractError::UnsafeEntry(name.clone())
        })?;
        if relative.as_os_str().is_empty() {
            progress.record_extracted();
            continue;
        }

        let out = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut target = File::create(&out)?;
            // Bad deflate data and CRC mismatches surface as read errors.
            io::copy(&mut entry, &mut target).map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                    ExtractError::Corrupt(format!("{}: {}", name, e))
                }
                _ => ExtractError::Io(e),
            })?;
            files += 1;
        }
        progress.record_extracted();
    }

    debug!("extracted {} files into {}", files, dest.display());
    Ok(files)
}
