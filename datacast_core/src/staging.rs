//! Per-run staging directories for conversion output.
//!
//! Every run stages into its own directory below `<base>/datacast/`, named
//! `PID-<pid>-<random>`. The directory is removed when the [`StagingArea`]
//! is dropped; directories of crashed processes are swept up by
//! [`cleanup_stale_staging_dirs`].

use crate::error::Result;
use crate::hash::{Algorithm, Digest};
use crate::recipe::Dataset;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STAGING_DIR_NAME: &str = "datacast";
const PID_PREFIX: &str = "PID-";
const MAX_EXTENSION_LEN: usize = 32;

/// Age after which a staging directory is considered abandoned on
/// platforms where process liveness cannot be checked.
#[cfg_attr(target_os = "linux", allow(dead_code))]
const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Private temporary directory of one cast.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a fresh staging directory below `base`, or below the system
    /// temporary directory if `base` is `None`.
    pub fn create(base: Option<&Path>) -> Result<Self> {
        let parent = staging_root(base);
        fs::create_dir_all(&parent)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", PID_PREFIX, std::process::id()))
            .tempdir_in(&parent)?;
        debug!(path = %dir.path().display(), "created staging area");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Unique staging location for `dataset`, whose output goes to `target`.
    ///
    /// The name combines a digest of the primary path with a random
    /// component, so datasets with equal file names in different
    /// directories never collide. Only the target's extension is kept,
    /// which keeps the name short whatever the raw file is called.
    pub fn staged_path(&self, dataset: &Dataset, target: &Path) -> PathBuf {
        let primary = dataset.primary().as_os_str().as_encoded_bytes();
        let tag = Digest::of_bytes(Algorithm::Blake3, primary).to_hex();
        let mut name = format!("{}-{}", &tag[..12], Uuid::new_v4().simple());
        if let Some(extension) = target.extension().and_then(OsStr::to_str)
            && extension.len() <= MAX_EXTENSION_LEN
        {
            name.push('.');
            name.push_str(extension);
        }
        self.dir.path().join(name)
    }

    /// Remove the directory now, reporting errors.
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

fn staging_root(base: Option<&Path>) -> PathBuf {
    base.map(Path::to_path_buf)
        .unwrap_or_else(env::temp_dir)
        .join(STAGING_DIR_NAME)
}

/// Remove staging directories left behind by processes that are gone.
///
/// Directories of the current process are never touched. Returns the
/// number of directories removed.
pub fn cleanup_stale_staging_dirs(base: Option<&Path>) -> Result<usize> {
    let root = staging_root(base);
    if !root.exists() {
        return Ok(0);
    }

    let own_pid = std::process::id();
    let mut removed = 0;

    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let Some(pid) = entry.file_name().to_str().and_then(parse_pid) else {
            continue;
        };
        if pid == own_pid || !is_stale(pid, &path) {
            continue;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), pid, "removed stale staging area");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove stale staging area"),
        }
    }

    if removed > 0 {
        info!(removed, root = %root.display(), "cleaned up stale staging areas");
    }
    Ok(removed)
}

/// Extract the pid from a `PID-<pid>-...` directory name.
fn parse_pid(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(PID_PREFIX)?;
    let (pid, _) = rest.split_once('-')?;
    pid.parse().ok()
}

#[cfg(target_os = "linux")]
fn is_stale(pid: u32, _path: &Path) -> bool {
    !Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_stale(_pid: u32, path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| std::time::SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_AFTER)
}
