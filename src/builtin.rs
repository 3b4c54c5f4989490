//! Built-in patch sets.
//!
//! `accept-user-certs` is the superset TLS bypass: install a
//! network-security-config trusting user-installed certificate authorities,
//! reference it from the manifest, and defeat the two method-level checks
//! (trust-manager chain validation, hostname verification) that pinned
//! clients run on top of the platform validation.

use crate::config::{
    ConstantSpec, FingerprintSpec, ManifestSpec, Metadata, PatchSet, ResourceSpec, RewriteSpec,
    StrategySpec, UnitDefinition,
};

pub const NETWORK_SECURITY_CONFIG_PATH: &str = "res/xml/network_security_config.xml";

pub const NETWORK_SECURITY_CONFIG_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<network-security-config>
    <base-config cleartextTrafficPermitted="true">
        <trust-anchors>
            <certificates src="system" />
            <certificates src="user" />
        </trust-anchors>
    </base-config>
</network-security-config>
"#;

/// The complete certificate pinning bypass set.
///
/// The resource and manifest units form the only hard dependency edge (the
/// manifest attribute references the resource path); the bytecode units are
/// independent, so either half of the bypass can run alone.
pub fn accept_user_certs() -> PatchSet {
    PatchSet {
        meta: Metadata {
            name: "accept-user-certs".to_string(),
            description: Some(
                "Trust user-installed certificate authorities and disable certificate pinning"
                    .to_string(),
            ),
        },
        units: vec![
            UnitDefinition {
                name: "network-security-config".to_string(),
                description: "Install a network security config trusting system and user CAs"
                    .to_string(),
                depends_on: Vec::new(),
                compatible: Vec::new(),
                rewrites: Vec::new(),
                resource: Some(ResourceSpec {
                    path: NETWORK_SECURITY_CONFIG_PATH.to_string(),
                    content: NETWORK_SECURITY_CONFIG_XML.to_string(),
                }),
                manifest: None,
            },
            UnitDefinition {
                name: "reference-network-security-config".to_string(),
                description: "Point the application manifest at the installed security config"
                    .to_string(),
                depends_on: vec!["network-security-config".to_string()],
                compatible: Vec::new(),
                rewrites: Vec::new(),
                resource: None,
                manifest: Some(ManifestSpec {
                    element: "application".to_string(),
                    attribute: "android:networkSecurityConfig".to_string(),
                    value: "@xml/network_security_config".to_string(),
                }),
            },
            UnitDefinition {
                name: "disable-trust-manager-checks".to_string(),
                description: "Empty the body of every checkServerTrusted implementation"
                    .to_string(),
                depends_on: Vec::new(),
                compatible: Vec::new(),
                rewrites: vec![RewriteSpec {
                    fingerprint: FingerprintSpec {
                        method: Some("checkServerTrusted".to_string()),
                        descriptor: Some(
                            "([Ljava/security/cert/X509Certificate;Ljava/lang/String;)V"
                                .to_string(),
                        ),
                        ..FingerprintSpec::default()
                    },
                    strategy: StrategySpec::ReturnStub,
                    mandatory: false,
                    allow_multiple: false,
                }],
                resource: None,
                manifest: None,
            },
            UnitDefinition {
                name: "bypass-hostname-verifier".to_string(),
                description: "Force every HostnameVerifier.verify implementation to return true"
                    .to_string(),
                depends_on: Vec::new(),
                compatible: Vec::new(),
                rewrites: vec![RewriteSpec {
                    fingerprint: FingerprintSpec {
                        method: Some("verify".to_string()),
                        descriptor: Some(
                            "(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z".to_string(),
                        ),
                        class_suffix: Some("HostnameVerifier".to_string()),
                        ..FingerprintSpec::default()
                    },
                    strategy: StrategySpec::ForceReturn {
                        constant: ConstantSpec::Bool(true),
                    },
                    mandatory: false,
                    allow_multiple: false,
                }],
                resource: None,
                manifest: None,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_is_valid() {
        let set = accept_user_certs();
        set.validate().unwrap();
        assert_eq!(set.units.len(), 4);
    }

    #[test]
    fn manifest_unit_depends_on_resource_unit() {
        let set = accept_user_certs();
        let manifest_unit = set
            .units
            .iter()
            .find(|u| u.manifest.is_some())
            .expect("builtin set carries a manifest unit");
        assert_eq!(manifest_unit.depends_on, vec!["network-security-config"]);
    }

    #[test]
    fn fingerprints_are_well_constrained() {
        let set = accept_user_certs();
        for unit in &set.units {
            for rewrite in &unit.rewrites {
                rewrite.fingerprint.to_fingerprint().validate().unwrap();
            }
        }
    }
}
