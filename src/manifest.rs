//! Event-level editing of `AndroidManifest.xml`.
//!
//! The editor rewrites exactly one attribute on the first element matching a
//! tag selector and leaves every other event untouched. Setting an attribute
//! to the value it already holds performs zero document mutations, so the
//! serialized manifest stays byte-identical across repeated builds.
//!
//! The manifest is also where the target identity lives: the `package`
//! attribute on the root element and apktool's recorded version name.

use crate::resource::{ResourceError, ResourceOutcome, ResourceWrite};
use crate::safety::ArtifactGuard;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

pub const MANIFEST_FILE: &str = "AndroidManifest.xml";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("no <{tag}> element in {path}")]
    ElementNotFound { tag: String, path: PathBuf },

    #[error("<{tag}> element lacks required attribute '{attr}' in {path}")]
    MissingAttribute {
        tag: String,
        attr: String,
        path: PathBuf,
    },

    #[error("XML error in {path}: {source}")]
    Xml {
        path: PathBuf,
        source: quick_xml::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Identity of the application under patch, read from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    pub package: String,
    pub version_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ManifestOutcome should be checked for applied/already-applied"]
pub enum ManifestOutcome {
    Applied,
    AlreadyApplied,
}

/// In-memory manifest document with single-writer edit semantics.
#[derive(Debug, Clone)]
pub struct ManifestEditor {
    path: PathBuf,
    content: String,
}

impl ManifestEditor {
    /// Load `AndroidManifest.xml` from the artifact root.
    pub fn open(artifact_root: &Path) -> Result<Self, ManifestError> {
        let path = artifact_root.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, content })
    }

    pub fn from_parts(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn checksum(&self) -> u64 {
        xxh3_64(self.content.as_bytes())
    }

    /// Value of `attr` on the first element matching `tag`, or `None` when
    /// the element exists without the attribute.
    pub fn attribute(&self, tag: &str, attr: &str) -> Result<Option<String>, ManifestError> {
        let mut reader = Reader::from_str(&self.content);
        loop {
            let event = reader
                .read_event()
                .map_err(|source| self.xml_err(source))?;
            match event {
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == tag.as_bytes() => {
                    return self.read_attr(&e, attr);
                }
                Event::Eof => {
                    return Err(ManifestError::ElementNotFound {
                        tag: tag.to_string(),
                        path: self.path.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    /// Set `attr` to `value` on the first element matching `tag`.
    ///
    /// No-op when the attribute already holds the value; the document is not
    /// reserialized in that case. Fails with [`ManifestError::ElementNotFound`]
    /// when the selector misses.
    pub fn set_attribute(
        &mut self,
        tag: &str,
        attr: &str,
        value: &str,
    ) -> Result<ManifestOutcome, ManifestError> {
        if self.attribute(tag, attr)?.as_deref() == Some(value) {
            return Ok(ManifestOutcome::AlreadyApplied);
        }

        let mut reader = Reader::from_str(&self.content);
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let mut edited = false;

        loop {
            let event = reader
                .read_event()
                .map_err(|source| self.xml_err(source))?;
            let event = match event {
                Event::Start(e) if !edited && e.name().as_ref() == tag.as_bytes() => {
                    edited = true;
                    Event::Start(self.with_attr(&e, attr, value)?)
                }
                Event::Empty(e) if !edited && e.name().as_ref() == tag.as_bytes() => {
                    edited = true;
                    Event::Empty(self.with_attr(&e, attr, value)?)
                }
                Event::Eof => break,
                other => other,
            };
            writer
                .write_event(event)
                .map_err(|source| ManifestError::Io {
                    path: self.path.clone(),
                    source: std::io::Error::other(source.to_string()),
                })?;
        }

        let bytes = writer.into_inner().into_inner();
        self.content = String::from_utf8(bytes).map_err(|e| ManifestError::Io {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        Ok(ManifestOutcome::Applied)
    }

    /// Persist the document through the idempotent resource write path.
    pub fn save(&self, guard: &ArtifactGuard) -> Result<ResourceOutcome, ResourceError> {
        ResourceWrite::new(MANIFEST_FILE, self.content.clone()).apply(guard)
    }

    /// Package id and version name from the root `manifest` element.
    pub fn target_info(&self) -> Result<TargetInfo, ManifestError> {
        let package = self.attribute("manifest", "package")?.ok_or_else(|| {
            ManifestError::MissingAttribute {
                tag: "manifest".to_string(),
                attr: "package".to_string(),
                path: self.path.clone(),
            }
        })?;
        let version_name = self.attribute("manifest", "android:versionName")?;
        Ok(TargetInfo {
            package,
            version_name,
        })
    }

    fn read_attr(&self, e: &BytesStart<'_>, attr: &str) -> Result<Option<String>, ManifestError> {
        for attribute in e.attributes() {
            let attribute = attribute.map_err(|source| self.xml_err(source.into()))?;
            if attribute.key.as_ref() == attr.as_bytes() {
                let value = attribute
                    .unescape_value()
                    .map_err(|source| self.xml_err(source.into()))?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    fn with_attr(
        &self,
        e: &BytesStart<'_>,
        attr: &str,
        value: &str,
    ) -> Result<BytesStart<'static>, ManifestError> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut out = BytesStart::new(name);
        for attribute in e.attributes() {
            let attribute = attribute.map_err(|source| self.xml_err(source.into()))?;
            if attribute.key.as_ref() != attr.as_bytes() {
                out.push_attribute(attribute);
            }
        }
        out.push_attribute((attr, value));
        Ok(out.into_owned())
    }

    fn xml_err(&self, source: quick_xml::Error) -> ManifestError {
        ManifestError::Xml {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app" android:versionName="2.4.1">
    <application android:label="@string/app_name">
        <activity android:name=".MainActivity"/>
    </application>
</manifest>"#;

    fn editor() -> ManifestEditor {
        ManifestEditor::from_parts("AndroidManifest.xml", MANIFEST)
    }

    #[test]
    fn reads_target_info() {
        let info = editor().target_info().unwrap();
        assert_eq!(info.package, "com.example.app");
        assert_eq!(info.version_name.as_deref(), Some("2.4.1"));
    }

    #[test]
    fn sets_attribute_on_first_application_element() {
        let mut e = editor();
        let outcome = e
            .set_attribute(
                "application",
                "android:networkSecurityConfig",
                "@xml/network_security_config",
            )
            .unwrap();
        assert_eq!(outcome, ManifestOutcome::Applied);
        assert_eq!(
            e.attribute("application", "android:networkSecurityConfig")
                .unwrap()
                .as_deref(),
            Some("@xml/network_security_config")
        );
        // Untouched attributes survive.
        assert_eq!(
            e.attribute("application", "android:label").unwrap().as_deref(),
            Some("@string/app_name")
        );
    }

    #[test]
    fn second_identical_set_is_checksum_stable() {
        let mut e = editor();
        e.set_attribute(
            "application",
            "android:networkSecurityConfig",
            "@xml/network_security_config",
        )
        .unwrap();
        let checksum = e.checksum();

        let outcome = e
            .set_attribute(
                "application",
                "android:networkSecurityConfig",
                "@xml/network_security_config",
            )
            .unwrap();
        assert_eq!(outcome, ManifestOutcome::AlreadyApplied);
        assert_eq!(e.checksum(), checksum);
    }

    #[test]
    fn replaces_existing_value() {
        let mut e = editor();
        e.set_attribute("application", "android:label", "@string/other")
            .unwrap();
        assert_eq!(
            e.attribute("application", "android:label").unwrap().as_deref(),
            Some("@string/other")
        );
    }

    #[test]
    fn missing_element_is_an_error() {
        let mut e = editor();
        let err = e
            .set_attribute("provider", "android:authorities", "x")
            .unwrap_err();
        assert!(matches!(err, ManifestError::ElementNotFound { ref tag, .. } if tag == "provider"));
    }

    #[test]
    fn save_round_trips_through_resource_write() {
        let temp = tempfile::tempdir().unwrap();
        let guard = ArtifactGuard::new(temp.path()).unwrap();
        let mut e = editor();
        e.set_attribute(
            "application",
            "android:networkSecurityConfig",
            "@xml/network_security_config",
        )
        .unwrap();

        let first = e.save(&guard).unwrap();
        assert!(matches!(first, ResourceOutcome::Applied { .. }));
        let second = e.save(&guard).unwrap();
        assert!(matches!(second, ResourceOutcome::AlreadyApplied { .. }));
    }
}
