//! Structural method fingerprints and the pool matcher.
//!
//! A fingerprint is a conjunction of tagged conditions over a
//! (class, method) pair. Matching never relies on a single stable
//! identifier: obfuscated names, overloads, and multiple implementing
//! classes are located by the combination of name, descriptor, owner shape,
//! and instruction content. New condition kinds slot into [`Condition`]
//! without touching the traversal.

pub mod errors;
pub mod matcher;

pub use errors::MatchError;
pub use matcher::{match_pool, no_match_error, Condition, Fingerprint, MatchResult};
