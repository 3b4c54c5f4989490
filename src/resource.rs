//! The file-tree write primitive: a whole-file, idempotent resource write.
//!
//! All resource and manifest output funnels through [`ResourceWrite`], which
//! is checksum-gated (identical content never touches the disk) and atomic
//! (tempfile + fsync + rename in the target directory). The mtime bump after
//! a real write lets downstream repackaging notice the change.

use crate::safety::{ArtifactGuard, SafetyError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// One pending artifact-relative file write.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "ResourceWrite does nothing until apply() is called"]
pub struct ResourceWrite {
    /// Path relative to the artifact root, e.g.
    /// `res/xml/network_security_config.xml`.
    pub path: PathBuf,
    pub content: String,
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result of applying a resource write.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "ResourceOutcome should be checked for applied/already-applied"]
pub enum ResourceOutcome {
    Applied { path: PathBuf },
    AlreadyApplied { path: PathBuf },
}

impl ResourceWrite {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Write the content unless the target already holds it byte-for-byte.
    ///
    /// Parent directories are created as needed. Re-applying with identical
    /// content is a no-op and leaves the tree byte-identical.
    pub fn apply(&self, guard: &ArtifactGuard) -> Result<ResourceOutcome, ResourceError> {
        let target = guard.resolve_write(&self.path)?;
        let io_err = |source| ResourceError::Io {
            path: target.clone(),
            source,
        };

        if target.exists() {
            guard.revalidate(&target)?;
            let existing = fs::read(&target).map_err(io_err)?;
            if xxh3_64(&existing) == xxh3_64(self.content.as_bytes()) {
                return Ok(ResourceOutcome::AlreadyApplied { path: target });
            }
        } else if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        atomic_write(&target, self.content.as_bytes()).map_err(io_err)?;

        let now = filetime::FileTime::now();
        filetime::set_file_mtime(&target, now).map_err(io_err)?;

        Ok(ResourceOutcome::Applied { path: target })
    }
}

/// Atomic file write: tempfile in the target directory, fsync, rename.
/// Either the full write lands or nothing changes.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        )
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
