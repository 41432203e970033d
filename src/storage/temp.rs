use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Allocates uniquely named processing directories under the temp root.
#[derive(Debug, Clone)]
pub struct TempDirManager {
    root: PathBuf,
}

impl TempDirManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allocate(&self, prefix: &str) -> Result<TempDirHandle> {
        let prefix: String = prefix
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{prefix}-{}", Uuid::new_v4()));
        fs::create_dir(&path)?;
        debug!("Allocated processing directory {}", path.display());
        Ok(TempDirHandle {
            path,
            released: AtomicBool::new(false),
        })
    }

    /// Remove directories under the root last modified before `max_age` ago.
    /// Returns how many were removed.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() || metadata.modified()? > cutoff {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale temp dir {}: {e}", entry.path().display()),
            }
        }
        Ok(removed)
    }
}

/// Owns a processing directory. `release` removes it recursively; it is
/// idempotent and also runs on drop, so every termination path cleans up.
#[derive(Debug)]
pub struct TempDirHandle {
    path: PathBuf,
    released: AtomicBool,
}

impl TempDirHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for TempDirHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to remove processing dir {}: {e}", self.path.display());
        }
    }
}
