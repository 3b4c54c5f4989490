use crate::fingerprint::Fingerprint;
use crate::rewrite::{ReturnConstant, RewriteStrategy};
use crate::smali::{InsnPattern, Instruction, MethodDescriptor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub units: Vec<UnitDefinition>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One named, orderable transformation unit.
///
/// Exactly one of `rewrites`, `resource`, `manifest` must be present; the
/// split is validated rather than encoded in the type so the TOML stays flat.
#[derive(Debug, Deserialize, Clone)]
pub struct UnitDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "depends-on")]
    pub depends_on: Vec<String>,
    /// Compatible targets; empty means every target.
    #[serde(default)]
    pub compatible: Vec<PackageTarget>,
    #[serde(default)]
    pub rewrites: Vec<RewriteSpec>,
    #[serde(default)]
    pub resource: Option<ResourceSpec>,
    #[serde(default)]
    pub manifest: Option<ManifestSpec>,
}

impl UnitDefinition {
    pub fn is_bytecode(&self) -> bool {
        !self.rewrites.is_empty()
    }

    fn action_count(&self) -> usize {
        usize::from(!self.rewrites.is_empty())
            + usize::from(self.resource.is_some())
            + usize::from(self.manifest.is_some())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PackageTarget {
    pub package: String,
    /// Semver requirement over the target's version name, e.g. ">=8.6, <9".
    #[serde(default)]
    pub versions: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RewriteSpec {
    pub fingerprint: FingerprintSpec,
    pub strategy: StrategySpec,
    /// A miss on a mandatory fingerprint fails the unit instead of being
    /// reported and carried on.
    #[serde(default)]
    pub mandatory: bool,
    /// Allow more than one match inside a single class.
    #[serde(default, rename = "allow-multiple")]
    pub allow_multiple: bool,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FingerprintSpec {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub class_suffix: Option<String>,
    #[serde(default)]
    pub implements: Option<String>,
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub lacks: Vec<String>,
}

impl FingerprintSpec {
    pub fn to_fingerprint(&self) -> Fingerprint {
        let mut fp = Fingerprint::new();
        if let Some(method) = &self.method {
            fp = fp.method(method);
        }
        if let Some(descriptor) = &self.descriptor {
            fp = fp.descriptor(descriptor);
        }
        if let Some(suffix) = &self.class_suffix {
            fp = fp.class_suffix(suffix);
        }
        if let Some(interface) = &self.implements {
            fp = fp.implements(interface);
        }
        for pattern in &self.contains {
            fp = fp.contains(InsnPattern::parse(pattern));
        }
        for pattern in &self.lacks {
            fp = fp.lacks(InsnPattern::parse(pattern));
        }
        fp
    }

    fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.descriptor.is_none()
            && self.class_suffix.is_none()
            && self.implements.is_none()
            && self.contains.is_empty()
            && self.lacks.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StrategySpec {
    /// Replace the body with a stub returning the descriptor's zero value.
    ReturnStub,
    /// Replace the body with explicit smali lines.
    ReplaceBody {
        registers: u16,
        instructions: Vec<String>,
    },
    /// Insert smali lines before the first instruction matching the marker.
    InjectBefore { marker: String, block: Vec<String> },
    /// Load a constant into the returned register before every return.
    ForceReturn { constant: ConstantSpec },
}

impl StrategySpec {
    /// Resolve against a concrete matched method's descriptor.
    pub fn to_strategy(&self, descriptor: &MethodDescriptor) -> RewriteStrategy {
        match self {
            StrategySpec::ReturnStub => RewriteStrategy::return_stub(descriptor),
            StrategySpec::ReplaceBody {
                registers,
                instructions,
            } => RewriteStrategy::ReplaceBody {
                registers: *registers,
                instructions: instructions.iter().map(|l| Instruction::parse(l)).collect(),
            },
            StrategySpec::InjectBefore { marker, block } => RewriteStrategy::InjectBefore {
                marker: InsnPattern::parse(marker),
                block: block.iter().map(|l| Instruction::parse(l)).collect(),
            },
            StrategySpec::ForceReturn { constant } => RewriteStrategy::ForceReturn {
                constant: constant.to_constant(),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConstantSpec {
    Bool(bool),
    Int(i32),
}

impl ConstantSpec {
    pub fn to_constant(self) -> ReturnConstant {
        match self {
            ConstantSpec::Bool(true) => ReturnConstant::True,
            ConstantSpec::Bool(false) => ReturnConstant::False,
            ConstantSpec::Int(v) => ReturnConstant::Int(v),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ManifestSpec {
    pub element: String,
    pub attribute: String,
    pub value: String,
}

impl PatchSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.units.is_empty() {
            issues.push(ValidationIssue::EmptyUnitList);
        }

        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (idx, unit) in self.units.iter().enumerate() {
            if unit.name.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    unit: None,
                    field: "name",
                });
            }
            if by_name.insert(unit.name.as_str(), idx).is_some() {
                issues.push(ValidationIssue::DuplicateUnit {
                    name: unit.name.clone(),
                });
            }
        }

        for unit in &self.units {
            match unit.action_count() {
                1 => {}
                0 => issues.push(ValidationIssue::InvalidCombo {
                    unit: Some(unit.name.clone()),
                    message: "unit declares no action (rewrites, resource, or manifest)"
                        .to_string(),
                }),
                _ => issues.push(ValidationIssue::InvalidCombo {
                    unit: Some(unit.name.clone()),
                    message: "unit declares more than one action kind".to_string(),
                }),
            }

            for rewrite in &unit.rewrites {
                if rewrite.fingerprint.is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        unit: Some(unit.name.clone()),
                        field: "rewrites.fingerprint",
                    });
                }
                match &rewrite.strategy {
                    StrategySpec::ReplaceBody { instructions, .. } if instructions.is_empty() => {
                        issues.push(ValidationIssue::MissingField {
                            unit: Some(unit.name.clone()),
                            field: "strategy.instructions",
                        });
                    }
                    StrategySpec::InjectBefore { marker, block } => {
                        if marker.trim().is_empty() {
                            issues.push(ValidationIssue::MissingField {
                                unit: Some(unit.name.clone()),
                                field: "strategy.marker",
                            });
                        }
                        if block.is_empty() {
                            issues.push(ValidationIssue::MissingField {
                                unit: Some(unit.name.clone()),
                                field: "strategy.block",
                            });
                        }
                    }
                    _ => {}
                }
            }

            if let Some(resource) = &unit.resource {
                if resource.path.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        unit: Some(unit.name.clone()),
                        field: "resource.path",
                    });
                }
            }
            if let Some(manifest) = &unit.manifest {
                if manifest.element.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        unit: Some(unit.name.clone()),
                        field: "manifest.element",
                    });
                }
                if manifest.attribute.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        unit: Some(unit.name.clone()),
                        field: "manifest.attribute",
                    });
                }
            }

            for dep in &unit.depends_on {
                if dep == &unit.name {
                    issues.push(ValidationIssue::InvalidCombo {
                        unit: Some(unit.name.clone()),
                        message: "unit depends on itself".to_string(),
                    });
                } else if !by_name.contains_key(dep.as_str()) {
                    issues.push(ValidationIssue::UnknownDependency {
                        unit: unit.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        for name in self.cyclic_units(&by_name) {
            issues.push(ValidationIssue::DependencyCycle { unit: name });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Names of units on a dependency cycle: run Kahn's algorithm and report
    /// whatever never reaches in-degree zero.
    fn cyclic_units(&self, by_name: &HashMap<&str, usize>) -> Vec<String> {
        let n = self.units.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (idx, unit) in self.units.iter().enumerate() {
            for dep in &unit.depends_on {
                if let Some(&dep_idx) = by_name.get(dep.as_str()) {
                    if dep_idx != idx {
                        indegree[idx] += 1;
                        dependents[dep_idx].push(idx);
                    }
                }
            }
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut resolved = 0usize;
        while let Some(idx) = queue.pop() {
            resolved += 1;
            for &next in &dependents[idx] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push(next);
                }
            }
        }

        if resolved == n {
            return Vec::new();
        }
        (0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| self.units[i].name.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyUnitList,
    MissingField {
        unit: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        unit: Option<String>,
        message: String,
    },
    DuplicateUnit {
        name: String,
    },
    UnknownDependency {
        unit: String,
        dependency: String,
    },
    DependencyCycle {
        unit: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyUnitList => write!(f, "patch set contains no units"),
            ValidationIssue::MissingField { unit, field } => match unit {
                Some(name) => write!(f, "unit '{name}' missing required field '{field}'"),
                None => write!(f, "unit missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { unit, message } => match unit {
                Some(name) => write!(f, "unit '{name}' has invalid configuration: {message}"),
                None => write!(f, "invalid unit configuration: {message}"),
            },
            ValidationIssue::DuplicateUnit { name } => {
                write!(f, "unit name '{name}' declared more than once")
            }
            ValidationIssue::UnknownDependency { unit, dependency } => {
                write!(f, "unit '{unit}' depends on unknown unit '{dependency}'")
            }
            ValidationIssue::DependencyCycle { unit } => {
                write!(f, "unit '{unit}' participates in a dependency cycle")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource_unit(name: &str, deps: &[&str]) -> UnitDefinition {
        UnitDefinition {
            name: name.to_string(),
            description: String::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            compatible: Vec::new(),
            rewrites: Vec::new(),
            resource: Some(ResourceSpec {
                path: "res/raw/x".to_string(),
                content: String::new(),
            }),
            manifest: None,
        }
    }

    #[test]
    fn valid_set_passes() {
        let set = PatchSet {
            meta: Metadata::default(),
            units: vec![resource_unit("a", &[]), resource_unit("b", &["a"])],
        };
        assert!(set.validate().is_ok());
    }

    #[test]
    fn unknown_dependency_rejected() {
        let set = PatchSet {
            meta: Metadata::default(),
            units: vec![resource_unit("a", &["ghost"])],
        };
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("unknown unit 'ghost'"));
    }

    #[test]
    fn cycle_rejected() {
        let set = PatchSet {
            meta: Metadata::default(),
            units: vec![resource_unit("a", &["b"]), resource_unit("b", &["a"])],
        };
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
    }

    #[test]
    fn unit_needs_exactly_one_action() {
        let mut unit = resource_unit("a", &[]);
        unit.manifest = Some(ManifestSpec {
            element: "application".to_string(),
            attribute: "android:networkSecurityConfig".to_string(),
            value: "@xml/network_security_config".to_string(),
        });
        let set = PatchSet {
            meta: Metadata::default(),
            units: vec![unit],
        };
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("more than one action kind"));
    }
}
