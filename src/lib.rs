//! APK Patcher: structural fingerprint patching for decompiled Android
//! applications.
//!
//! # Architecture
//!
//! Methods are located by structural fingerprint, never by a single stable
//! identifier: a [`fingerprint::Fingerprint`] is a conjunction of conditions
//! (name, descriptor, owner suffix, instruction content) evaluated over an
//! arena-indexed [`smali::ClassPool`]. Matched bodies are transformed by a
//! [`rewrite::RewriteStrategy`], and independent transformation units are
//! sequenced by the [`coordinator`], which resolves declared dependencies,
//! filters on target compatibility, and reports a terminal status per unit.
//!
//! # Safety
//!
//! - Every write stays inside the artifact tree (canonicalized boundary
//!   checks, apktool's own output directories excluded)
//! - Atomic file writes (tempfile + fsync + rename)
//! - All edits are idempotent: re-running a build leaves the artifact
//!   byte-identical
//!
//! # Example
//!
//! ```no_run
//! use apk_patcher::artifact::Artifact;
//! use apk_patcher::builtin::accept_user_certs;
//! use apk_patcher::coordinator::{apply_patch_set, ApplyMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut artifact = Artifact::open("app-decompiled")?;
//! let report = apply_patch_set(&accept_user_certs(), &mut artifact, ApplyMode::Commit)?;
//! for unit in &report.units {
//!     println!("{}: {}", unit.unit, unit.outcome);
//! }
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod builtin;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod fingerprint;
pub mod manifest;
pub mod resource;
pub mod rewrite;
pub mod safety;
pub mod smali;

// Re-exports
pub use artifact::{Artifact, ArtifactError};
pub use config::{load_from_path, load_from_str, ConfigError, PatchSet, UnitDefinition};
pub use coordinator::{
    apply_patch_set, ApplyMode, BuildReport, CoordinatorError, UnitOutcome, UnitReport,
};
pub use fingerprint::{match_pool, Fingerprint, MatchError, MatchResult};
pub use manifest::{ManifestEditor, ManifestError, TargetInfo};
pub use resource::{ResourceError, ResourceOutcome, ResourceWrite};
pub use rewrite::{RewriteError, RewriteOutcome, RewriteStrategy};
pub use safety::{ArtifactGuard, SafetyError};
pub use smali::{ClassPool, MethodRef};
