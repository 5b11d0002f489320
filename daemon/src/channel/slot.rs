//! Single-value storage locations read by external processes
//!
//! A slot holds exactly one value; writing replaces the whole content.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A location whose entire content is the current value
pub trait Slot: Send + Sync {
    /// Replace the slot content
    fn write(&self, content: &str) -> io::Result<()>;
}

/// File-backed slot
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a poller never reads a half-written value.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
    staging: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        Self {
            path,
            staging: PathBuf::from(staging),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the slot with empty content if it does not exist yet
    pub fn ensure_exists(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            fs::write(&self.path, "")?;
        }
        Ok(())
    }
}

impl Slot for FileSlot {
    fn write(&self, content: &str) -> io::Result<()> {
        fs::write(&self.staging, content)?;
        fs::rename(&self.staging, &self.path)
    }
}

#[cfg(test)]
pub(crate) use memory::MemorySlot;
