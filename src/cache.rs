//! Per-build fingerprint resolution cache.
//!
//! Units may share fingerprints (several bypass units keying on the same
//! verifier method); resolving each fingerprint once per build keeps the
//! pool scan count proportional to distinct fingerprints, not units.
//!
//! The cache is owned by one build pass rather than a thread-local static:
//! results hold pool indices, which are only meaningful against the pool the
//! build constructed.

use crate::fingerprint::{match_pool, Fingerprint, MatchError, MatchResult};
use crate::smali::ClassPool;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MatchCache {
    resolved: HashMap<Fingerprint, MatchResult>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a fingerprint, reusing the result from an earlier unit when
    /// the same fingerprint was already scanned this build.
    pub fn resolve(
        &mut self,
        pool: &ClassPool,
        fingerprint: &Fingerprint,
    ) -> Result<&MatchResult, MatchError> {
        if !self.resolved.contains_key(fingerprint) {
            let result = match_pool(pool, fingerprint)?;
            self.resolved.insert(fingerprint.clone(), result);
        }
        Ok(&self.resolved[fingerprint])
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
