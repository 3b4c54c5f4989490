use crate::config::schema::{PatchSet, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read patch set from {}: {}", path.display(), source)
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch set TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch set TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch set ({}): {}", path.display(), source),
                None => write!(f, "invalid patch set: {}", source),
            },
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchSet, ConfigError> {
    let set: PatchSet = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    set.validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(set)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchSet, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::StrategySpec;

    const SET: &str = r#"
[meta]
name = "example"
description = "example patch set"

[[units]]
name = "install-config"
description = "install the network security config"

[units.resource]
path = "res/xml/network_security_config.xml"
content = "<network-security-config/>"

[[units]]
name = "reference-config"
depends-on = ["install-config"]

[[units.compatible]]
package = "com.example.app"
versions = ">=2"

[units.manifest]
element = "application"
attribute = "android:networkSecurityConfig"
value = "@xml/network_security_config"

[[units]]
name = "defeat-verifier"

[[units.rewrites]]
mandatory = true

[units.rewrites.fingerprint]
method = "verify"
descriptor = "(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z"
class-suffix = "HostnameVerifier"

[units.rewrites.strategy]
type = "force-return"
constant = true
"#;

    #[test]
    fn loads_and_validates_full_set() {
        let set = load_from_str(SET).unwrap();
        assert_eq!(set.meta.name, "example");
        assert_eq!(set.units.len(), 3);

        let manifest_unit = &set.units[1];
        assert_eq!(manifest_unit.depends_on, vec!["install-config"]);
        assert_eq!(manifest_unit.compatible[0].package, "com.example.app");
        assert_eq!(manifest_unit.compatible[0].versions.as_deref(), Some(">=2"));

        let rewrite = &set.units[2].rewrites[0];
        assert!(rewrite.mandatory);
        assert_eq!(rewrite.fingerprint.method.as_deref(), Some("verify"));
        assert!(matches!(rewrite.strategy, StrategySpec::ForceReturn { .. }));
    }

    #[test]
    fn rejects_invalid_toml() {
        assert!(matches!(
            load_from_str("not = [valid"),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn rejects_invalid_set() {
        let result = load_from_str("[[units]]\nname = \"a\"\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }
}
