//! Facade over one decompiled APK directory (apktool layout).
//!
//! Binds the boundary guard, the parsed class pool, and the manifest
//! document together for one build pass. Classes are parsed from every
//! top-level `smali*/` tree (`smali`, `smali_classes2`, ...) in path order,
//! so pool indices are stable across runs; only classes the rewriter dirtied
//! are serialized back.

use crate::manifest::{ManifestEditor, ManifestError, TargetInfo};
use crate::resource::atomic_write;
use crate::safety::{ArtifactGuard, SafetyError};
use crate::smali::{parse_class, write_class, ClassPool, SmaliError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    Smali(#[from] SmaliError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to walk artifact tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("class {descriptor} has no source path to write back to")]
    NoSourcePath { descriptor: String },
}

pub struct Artifact {
    guard: ArtifactGuard,
    pool: ClassPool,
    manifest: ManifestEditor,
}

impl Artifact {
    /// Open a decompiled artifact directory, parsing the manifest and every
    /// smali class up front.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let guard = ArtifactGuard::new(root)?;
        let manifest = ManifestEditor::open(guard.root())?;
        let pool = load_pool(guard.root())?;
        Ok(Self {
            guard,
            pool,
            manifest,
        })
    }

    pub fn guard(&self) -> &ArtifactGuard {
        &self.guard
    }

    pub fn pool(&self) -> &ClassPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ClassPool {
        &mut self.pool
    }

    pub fn manifest(&self) -> &ManifestEditor {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut ManifestEditor {
        &mut self.manifest
    }

    pub fn target_info(&self) -> Result<TargetInfo, ManifestError> {
        self.manifest.target_info()
    }

    /// Serialize every dirty class back to its source file. Returns the
    /// number of classes rewritten on disk.
    pub fn write_back(&mut self) -> Result<usize, ArtifactError> {
        let mut written = 0usize;
        for class in self.pool.classes() {
            if !class.dirty {
                continue;
            }
            let path = class.path.as_ref().ok_or_else(|| ArtifactError::NoSourcePath {
                descriptor: class.descriptor.clone(),
            })?;
            let path = self.guard.revalidate(path)?;
            let text = write_class(class);
            atomic_write(&path, text.as_bytes()).map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;
            let now = filetime::FileTime::now();
            filetime::set_file_mtime(&path, now).map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;
            written += 1;
        }
        for idx in 0..self.pool.len() {
            self.pool.clear_dirty(idx);
        }
        Ok(written)
    }
}

fn load_pool(root: &Path) -> Result<ClassPool, ArtifactError> {
    let mut pool = ClassPool::new();

    let mut smali_roots: Vec<PathBuf> = fs::read_dir(root)
        .map_err(|source| ArtifactError::Io {
            path: root.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && entry
                    .file_name()
                    .to_str()
                    .map(|n| n.starts_with("smali"))
                    .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();
    smali_roots.sort();

    for smali_root in smali_roots {
        for entry in WalkDir::new(&smali_root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|s| s.to_str()) != Some("smali")
            {
                continue;
            }
            let path = entry.path();
            let text = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut class = parse_class(&text, &path.display().to_string())?;
            class.path = Some(path.to_path_buf());
            pool.push(class);
        }
    }

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smali::MethodRef;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app" android:versionName="1.2.0">
    <application android:label="@string/app_name"/>
</manifest>"#;

    const CLASS: &str = r#".class public Lcom/example/Api;
.super Ljava/lang/Object;

.method public ping()Z
    .locals 1

    const/4 v0, 0x1

    return v0
.end method
"#;

    fn mock_artifact() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("AndroidManifest.xml"), MANIFEST).unwrap();
        fs::create_dir_all(temp.path().join("smali/com/example")).unwrap();
        fs::write(temp.path().join("smali/com/example/Api.smali"), CLASS).unwrap();
        // apktool backup dir must never be scanned or written.
        fs::create_dir_all(temp.path().join("original")).unwrap();
        temp
    }

    #[test]
    fn opens_pool_and_target_info() {
        let temp = mock_artifact();
        let artifact = Artifact::open(temp.path()).unwrap();

        assert_eq!(artifact.pool().len(), 1);
        let info = artifact.target_info().unwrap();
        assert_eq!(info.package, "com.example.app");
        assert_eq!(info.version_name.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn write_back_touches_only_dirty_classes() {
        let temp = mock_artifact();
        let mut artifact = Artifact::open(temp.path()).unwrap();

        assert_eq!(artifact.write_back().unwrap(), 0);

        let r = MethodRef { class: 0, method: 0 };
        artifact.pool_mut().method_mut(r).instructions[0] =
            crate::smali::Instruction::parse("const/4 v0, 0x0");
        artifact.pool_mut().mark_dirty(0);
        assert_eq!(artifact.write_back().unwrap(), 1);

        let on_disk = fs::read_to_string(temp.path().join("smali/com/example/Api.smali")).unwrap();
        assert!(on_disk.contains("const/4 v0, 0x0"));

        // Dirty flags are consumed by the write.
        assert_eq!(artifact.write_back().unwrap(), 0);
    }
}
