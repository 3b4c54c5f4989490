pub mod loader;
pub mod schema;
pub mod version;

pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{
    ConstantSpec, FingerprintSpec, ManifestSpec, Metadata, PackageTarget, PatchSet, ResourceSpec,
    RewriteSpec, StrategySpec, UnitDefinition, ValidationError, ValidationIssue,
};
pub use version::{target_compatible, VersionError};
