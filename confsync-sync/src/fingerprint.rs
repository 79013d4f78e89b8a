//! Content fingerprints for the candidate/destination comparison.
//!
//! Only bytes are compared. Owner, group and mode differences on the
//! destination never count as a change.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use confsync_core::Filesystem;

use crate::error::{fs_err, SyncError};

/// SHA-256 of `data` as lowercase hex.
pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of the file at `path`, streamed through `fs`.
pub fn file_digest(fs: &dyn Filesystem, path: &Path) -> Result<String, SyncError> {
    let mut reader = fs.open(path).map_err(|e| fs_err("read", path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).map_err(|e| fs_err("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether `candidate` differs from `dest`. A missing `dest` always differs.
pub fn is_changed(fs: &dyn Filesystem, candidate: &Path, dest: &Path) -> Result<bool, SyncError> {
    let dest_exists = fs.exists(dest).map_err(|e| fs_err("stat", dest, e))?;
    if !dest_exists {
        tracing::debug!("{} does not exist yet", dest.display());
        return Ok(true);
    }
    let candidate_sum = file_digest(fs, candidate)?;
    let dest_sum = file_digest(fs, dest)?;
    if candidate_sum != dest_sum {
        tracing::info!(
            "{} has sha256 {dest_sum} should be {candidate_sum}",
            dest.display()
        );
        return Ok(true);
    }
    Ok(false)
}
