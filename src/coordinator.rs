//! Dependency-ordered execution of patch units over one artifact.
//!
//! Per unit the lifecycle is
//! `Pending -> {Skipped, Applying} -> {Applied, AlreadyApplied, Failed}`:
//! a unit starts applying only once every dependency ended in a non-failed,
//! non-skipped terminal state, and an incompatible target short-circuits to
//! `Skipped` before any fingerprint resolves. Failures stay local to their
//! unit; the build always completes and reports every unit's terminal
//! status.

use crate::artifact::{Artifact, ArtifactError};
use crate::cache::MatchCache;
use crate::config::{
    target_compatible, ManifestSpec, PatchSet, ResourceSpec, UnitDefinition, ValidationError,
};
use crate::fingerprint::{no_match_error, MatchResult};
use crate::manifest::{ManifestError, ManifestOutcome, TargetInfo};
use crate::resource::{ResourceOutcome, ResourceWrite};
use crate::rewrite::{rewrite, RewriteOutcome};
use crate::smali::MethodRef;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Whether a build mutates the artifact or only reports what it would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Commit,
    /// Everything runs against the in-memory pool and documents; nothing is
    /// written to disk.
    DryRun,
}

/// Terminal state of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum UnitOutcome {
    Applied,
    AlreadyApplied,
    Skipped { reason: String },
    Failed { reason: String },
}

impl UnitOutcome {
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, UnitOutcome::Applied | UnitOutcome::AlreadyApplied)
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Applied => write!(f, "applied"),
            UnitOutcome::AlreadyApplied => write!(f, "already applied"),
            UnitOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            UnitOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: String,
    pub description: String,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
    /// Per-method notes and non-mandatory fingerprint misses.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub set: String,
    pub target: TargetInfo,
    pub units: Vec<UnitReport>,
    pub classes_rewritten: usize,
}

impl BuildReport {
    pub fn count(&self, f: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| f(&u.outcome)).count()
    }

    pub fn has_failures(&self) -> bool {
        self.units
            .iter()
            .any(|u| matches!(u.outcome, UnitOutcome::Failed { .. }))
    }

    pub fn outcome_of(&self, unit: &str) -> Option<&UnitOutcome> {
        self.units
            .iter()
            .find(|u| u.unit == unit)
            .map(|u| &u.outcome)
    }
}

/// Build-level errors: a malformed patch set or an unusable artifact. Unit
/// failures are never surfaced here; they live in the report.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("invalid patch set: {0}")]
    Config(#[from] ValidationError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Apply every unit of the set to the artifact, in dependency order.
pub fn apply_patch_set(
    set: &PatchSet,
    artifact: &mut Artifact,
    mode: ApplyMode,
) -> Result<BuildReport, CoordinatorError> {
    set.validate()?;
    let target = artifact.target_info()?;

    let order = execution_order(set);
    let mut cache = MatchCache::new();
    // Method -> owning unit; a second unit reaching the same method is a
    // configuration error caught here, at coordination time.
    let mut claimed: HashMap<MethodRef, String> = HashMap::new();
    let mut outcomes: HashMap<&str, UnitOutcome> = HashMap::new();
    let mut reports: Vec<UnitReport> = Vec::new();

    for idx in order {
        let unit = &set.units[idx];
        let mut detail = Vec::new();

        let outcome = match blocked_dependency(unit, &outcomes) {
            Some(reason) => UnitOutcome::Skipped { reason },
            None => match target_compatible(&unit.compatible, &target) {
                Ok(false) => UnitOutcome::Skipped {
                    reason: format!(
                        "target {} {} is not in the unit's compatible set",
                        target.package,
                        target.version_name.as_deref().unwrap_or("(no version)")
                    ),
                },
                Err(e) => UnitOutcome::Failed {
                    reason: e.to_string(),
                },
                Ok(true) => apply_unit(unit, artifact, mode, &mut cache, &mut claimed, &mut detail),
            },
        };

        outcomes.insert(unit.name.as_str(), outcome.clone());
        reports.push(UnitReport {
            unit: unit.name.clone(),
            description: unit.description.clone(),
            outcome,
            detail,
        });
    }

    let classes_rewritten = match mode {
        ApplyMode::Commit => artifact.write_back()?,
        ApplyMode::DryRun => artifact.pool().dirty_classes().count(),
    };

    // Report rows in declaration order, not execution order.
    let position: HashMap<&str, usize> = set
        .units
        .iter()
        .enumerate()
        .map(|(i, u)| (u.name.as_str(), i))
        .collect();
    reports.sort_by_key(|r| position.get(r.unit.as_str()).copied().unwrap_or(usize::MAX));

    Ok(BuildReport {
        set: set.meta.name.clone(),
        target,
        units: reports,
        classes_rewritten,
    })
}

/// Kahn's algorithm with declaration order as the tie-break, so independent
/// units run in the order they were written. Validation has already rejected
/// cycles and unknown names.
fn execution_order(set: &PatchSet) -> Vec<usize> {
    let n = set.units.len();
    let by_name: HashMap<&str, usize> = set
        .units
        .iter()
        .enumerate()
        .map(|(i, u)| (u.name.as_str(), i))
        .collect();

    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (idx, unit) in set.units.iter().enumerate() {
        for dep in &unit.depends_on {
            if let Some(&dep_idx) = by_name.get(dep.as_str()) {
                indegree[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut done = vec![false; n];
    while order.len() < n {
        let Some(next) = (0..n).find(|&i| !done[i] && indegree[i] == 0) else {
            break;
        };
        done[next] = true;
        order.push(next);
        for &dep in &dependents[next] {
            indegree[dep] -= 1;
        }
    }
    order
}

fn blocked_dependency(
    unit: &UnitDefinition,
    outcomes: &HashMap<&str, UnitOutcome>,
) -> Option<String> {
    for dep in &unit.depends_on {
        match outcomes.get(dep.as_str()) {
            Some(outcome) if outcome.is_terminal_success() => {}
            Some(UnitOutcome::Failed { .. }) => {
                return Some(format!("dependency '{dep}' failed"));
            }
            Some(UnitOutcome::Skipped { .. }) => {
                return Some(format!("dependency '{dep}' was skipped"));
            }
            _ => {
                return Some(format!("dependency '{dep}' did not run"));
            }
        }
    }
    None
}

fn apply_unit(
    unit: &UnitDefinition,
    artifact: &mut Artifact,
    mode: ApplyMode,
    cache: &mut MatchCache,
    claimed: &mut HashMap<MethodRef, String>,
    detail: &mut Vec<String>,
) -> UnitOutcome {
    if unit.is_bytecode() {
        apply_bytecode_unit(unit, artifact, cache, claimed, detail)
    } else if let Some(resource) = &unit.resource {
        apply_resource_unit(resource, artifact, mode)
    } else if let Some(manifest) = &unit.manifest {
        apply_manifest_unit(manifest, artifact, mode)
    } else {
        // validate() rejects action-less units before execution starts.
        UnitOutcome::Failed {
            reason: "unit declares no action".to_string(),
        }
    }
}

fn apply_bytecode_unit(
    unit: &UnitDefinition,
    artifact: &mut Artifact,
    cache: &mut MatchCache,
    claimed: &mut HashMap<MethodRef, String>,
    detail: &mut Vec<String>,
) -> UnitOutcome {
    let mut applied = 0usize;
    let mut already = 0usize;

    for spec in &unit.rewrites {
        let fingerprint = spec.fingerprint.to_fingerprint();

        let matches: Vec<MethodRef> = match cache.resolve(artifact.pool(), &fingerprint) {
            Ok(result) => result.matches.clone(),
            Err(e) => {
                return UnitOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if matches.is_empty() {
            let miss = no_match_error(artifact.pool(), &fingerprint);
            if spec.mandatory {
                return UnitOutcome::Failed {
                    reason: miss.to_string(),
                };
            }
            detail.push(miss.to_string());
            continue;
        }

        if !spec.allow_multiple {
            let result = MatchResult {
                matches: matches.clone(),
            };
            if let Some((class, count)) = result.ambiguity(artifact.pool()) {
                return UnitOutcome::Failed {
                    reason: format!(
                        "fingerprint [{}] matched {count} methods in {class}, expected at most 1",
                        fingerprint.describe()
                    ),
                };
            }
        }

        for method_ref in matches {
            let identity = artifact.pool().describe(method_ref);

            if let Some(owner) = claimed.get(&method_ref) {
                return UnitOutcome::Failed {
                    reason: format!("method {identity} already rewritten by unit '{owner}'"),
                };
            }

            let strategy = spec
                .strategy
                .to_strategy(&artifact.pool().method(method_ref).descriptor);
            let outcome = rewrite(artifact.pool_mut().method_mut(method_ref), &strategy);
            match outcome {
                Ok(RewriteOutcome::Applied) => {
                    artifact.pool_mut().mark_dirty(method_ref.class);
                    detail.push(format!("{identity}: {}", strategy.describe()));
                    applied += 1;
                }
                Ok(RewriteOutcome::AlreadyApplied) => {
                    detail.push(format!("{identity}: already rewritten"));
                    already += 1;
                }
                Err(e) => {
                    return UnitOutcome::Failed {
                        reason: format!("{identity}: {e}"),
                    };
                }
            }
            claimed.insert(method_ref, unit.name.clone());
        }
    }

    if applied > 0 {
        UnitOutcome::Applied
    } else if already > 0 {
        UnitOutcome::AlreadyApplied
    } else {
        // Every fingerprint missed and none was mandatory. A bytecode unit
        // that touched nothing must not read as success.
        UnitOutcome::Failed {
            reason: "no fingerprint matched any method".to_string(),
        }
    }
}

fn apply_resource_unit(
    spec: &ResourceSpec,
    artifact: &mut Artifact,
    mode: ApplyMode,
) -> UnitOutcome {
    let write = ResourceWrite::new(&spec.path, spec.content.clone());

    match mode {
        ApplyMode::Commit => match write.apply(artifact.guard()) {
            Ok(ResourceOutcome::Applied { .. }) => UnitOutcome::Applied,
            Ok(ResourceOutcome::AlreadyApplied { .. }) => UnitOutcome::AlreadyApplied,
            Err(e) => UnitOutcome::Failed {
                reason: e.to_string(),
            },
        },
        ApplyMode::DryRun => match artifact.guard().resolve_write(&spec.path) {
            Ok(target) => {
                let current = std::fs::read(&target).ok();
                if current.as_deref() == Some(spec.content.as_bytes()) {
                    UnitOutcome::AlreadyApplied
                } else {
                    UnitOutcome::Applied
                }
            }
            Err(e) => UnitOutcome::Failed {
                reason: e.to_string(),
            },
        },
    }
}

fn apply_manifest_unit(
    spec: &ManifestSpec,
    artifact: &mut Artifact,
    mode: ApplyMode,
) -> UnitOutcome {
    let edited =
        artifact
            .manifest_mut()
            .set_attribute(&spec.element, &spec.attribute, &spec.value);
    let edited = match edited {
        Ok(outcome) => outcome,
        Err(e) => {
            return UnitOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };

    if mode == ApplyMode::Commit {
        if let Err(e) = artifact.manifest().save(artifact.guard()) {
            return UnitOutcome::Failed {
                reason: e.to_string(),
            };
        }
    }

    match edited {
        ManifestOutcome::Applied => UnitOutcome::Applied,
        ManifestOutcome::AlreadyApplied => UnitOutcome::AlreadyApplied,
    }
}
