use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Directories apktool reserves for its own output; patch units never write
/// into them.
const FORBIDDEN_DIRS: &[&str] = &["original", "build", "dist"];

/// Boundary checks keeping every write inside the decompiled artifact tree.
#[derive(Debug, Clone)]
pub struct ArtifactGuard {
    /// Canonical path to the artifact root.
    root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("path escapes the artifact: {path} (artifact: {root})")]
    OutsideArtifact { path: PathBuf, root: PathBuf },

    #[error("path is in a reserved apktool directory: {path}")]
    ReservedPath { path: PathBuf },

    #[error("failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl ArtifactGuard {
    /// Create a guard rooted at the artifact directory.
    ///
    /// The root is canonicalized so symlinked artifact paths behave.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    /// Resolve an artifact-relative path for writing.
    ///
    /// The target may not exist yet, so validation is lexical: absolute
    /// paths, parent traversal, and apktool's reserved output directories
    /// are rejected before any join happens.
    pub fn resolve_write(&self, relative: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let relative = relative.as_ref();

        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(SafetyError::OutsideArtifact {
                        path: relative.to_path_buf(),
                        root: self.root.clone(),
                    });
                }
            }
        }

        if let Some(Component::Normal(head)) = relative.components().next() {
            if FORBIDDEN_DIRS.iter().any(|d| head == *d) {
                return Err(SafetyError::ReservedPath {
                    path: relative.to_path_buf(),
                });
            }
        }

        Ok(self.root.join(relative))
    }

    /// Re-validate an existing path right before a write, closing the
    /// symlink/TOCTOU window: the canonical form must still sit under the
    /// artifact root.
    pub fn revalidate(&self, path: &Path) -> Result<PathBuf, SafetyError> {
        let canonical = path.canonicalize()?;
        if !canonical.starts_with(&self.root) {
            return Err(SafetyError::OutsideArtifact {
                path: canonical,
                root: self.root.clone(),
            });
        }
        Ok(canonical)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
