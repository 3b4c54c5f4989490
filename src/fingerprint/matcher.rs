use crate::fingerprint::errors::MatchError;
use crate::smali::{ClassDef, ClassPool, InsnPattern, MethodDef, MethodRef};
use rayon::prelude::*;
use std::fmt;

/// One structural condition over a (class, method) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Method name equals exactly. Overloads are distinguished by
    /// [`Condition::Descriptor`], never collapsed.
    MethodName(String),
    /// Raw method descriptor equals exactly.
    Descriptor(String),
    /// Owning class simple name ends with the suffix. Anchored on the full
    /// simple name (segment after the last `/`), never a substring scan.
    ClassSuffix(String),
    /// Owning class declares it implements the interface descriptor.
    Implements(String),
    /// Body contains at least one instruction matching the pattern.
    ContainsInstruction(InsnPattern),
    /// Body contains no instruction matching the pattern.
    LacksInstruction(InsnPattern),
}

impl Condition {
    /// Conditions that pin down which method is meant, as opposed to
    /// narrowing the owner or body shape.
    fn is_identity(&self) -> bool {
        matches!(self, Condition::MethodName(_) | Condition::Descriptor(_))
    }

    fn matches(&self, class: &ClassDef, method: &MethodDef) -> bool {
        match self {
            Condition::MethodName(name) => method.name == *name,
            Condition::Descriptor(descriptor) => method.descriptor.as_str() == descriptor,
            Condition::ClassSuffix(suffix) => class.simple_name().ends_with(suffix.as_str()),
            Condition::Implements(interface) => class.implements(interface),
            Condition::ContainsInstruction(pattern) => {
                method.instructions.iter().any(|i| pattern.matches(i))
            }
            Condition::LacksInstruction(pattern) => {
                !method.instructions.iter().any(|i| pattern.matches(i))
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::MethodName(name) => write!(f, "method={name}"),
            Condition::Descriptor(d) => write!(f, "descriptor={d}"),
            Condition::ClassSuffix(s) => write!(f, "class-suffix={s}"),
            Condition::Implements(i) => write!(f, "implements={i}"),
            Condition::ContainsInstruction(p) => write!(f, "contains[{p}]"),
            Condition::LacksInstruction(p) => write!(f, "lacks[{p}]"),
        }
    }
}

/// A conjunction of conditions. Stateless and hashable so per-build match
/// caching can share results between units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint {
    pub conditions: Vec<Condition>,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.conditions.push(Condition::MethodName(name.into()));
        self
    }

    pub fn descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.conditions.push(Condition::Descriptor(descriptor.into()));
        self
    }

    pub fn class_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.conditions.push(Condition::ClassSuffix(suffix.into()));
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.conditions.push(Condition::Implements(interface.into()));
        self
    }

    pub fn contains(mut self, pattern: InsnPattern) -> Self {
        self.conditions.push(Condition::ContainsInstruction(pattern));
        self
    }

    pub fn lacks(mut self, pattern: InsnPattern) -> Self {
        self.conditions.push(Condition::LacksInstruction(pattern));
        self
    }

    /// A whole-pool scan keyed on nothing, or on a bare name, produces junk
    /// matches; demand an identity condition plus one more.
    pub fn validate(&self) -> Result<(), MatchError> {
        let has_identity = self.conditions.iter().any(Condition::is_identity);
        if !has_identity || self.conditions.len() < 2 {
            return Err(MatchError::UnderConstrained {
                fingerprint: self.describe(),
            });
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        self.conditions
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn wanted_method_name(&self) -> Option<&str> {
        self.conditions.iter().find_map(|c| match c {
            Condition::MethodName(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Matches satisfying one fingerprint within one pool pass, in pool order.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matches: Vec<MethodRef>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = MethodRef> + '_ {
        self.matches.iter().copied()
    }

    /// First class holding more than one match, if any. Uniqueness is scoped
    /// per owning class; several implementing classes each contributing one
    /// match is the expected shape.
    pub fn ambiguity(&self, pool: &ClassPool) -> Option<(String, usize)> {
        let mut run_class = usize::MAX;
        let mut run_len = 0usize;
        for m in &self.matches {
            if m.class == run_class {
                run_len += 1;
            } else {
                if run_len > 1 {
                    break;
                }
                run_class = m.class;
                run_len = 1;
            }
        }
        if run_len > 1 {
            Some((pool.class(run_class).descriptor.clone(), run_len))
        } else {
            None
        }
    }
}

/// Scan the pool for methods satisfying every condition of the fingerprint.
///
/// Classes are scanned in parallel; the indexed collect keeps the result in
/// pool order regardless of scheduling, so the output is deterministic and
/// duplicate matches across classes stay distinct. The pool is not mutated.
pub fn match_pool(pool: &ClassPool, fingerprint: &Fingerprint) -> Result<MatchResult, MatchError> {
    fingerprint.validate()?;

    let per_class: Vec<Vec<MethodRef>> = pool
        .classes()
        .par_iter()
        .enumerate()
        .map(|(class_idx, class)| {
            class
                .methods
                .iter()
                .enumerate()
                .filter(|(_, method)| {
                    fingerprint
                        .conditions
                        .iter()
                        .all(|c| c.matches(class, method))
                })
                .map(|(method_idx, _)| MethodRef {
                    class: class_idx,
                    method: method_idx,
                })
                .collect()
        })
        .collect();

    Ok(MatchResult {
        matches: per_class.into_iter().flatten().collect(),
    })
}

/// Build the `NoMatch` error for an empty result, with a near-miss
/// suggestion when the fingerprint named a method and something close
/// exists in the pool.
pub fn no_match_error(pool: &ClassPool, fingerprint: &Fingerprint) -> MatchError {
    let suggestion = fingerprint
        .wanted_method_name()
        .and_then(|wanted| closest_method_name(pool, wanted));
    MatchError::NoMatch {
        fingerprint: fingerprint.describe(),
        suggestion,
    }
}

fn closest_method_name(pool: &ClassPool, wanted: &str) -> Option<String> {
    let mut best: Option<(f64, &str)> = None;
    for class in pool.classes() {
        for method in &class.methods {
            if method.name == wanted {
                continue;
            }
            let score = strsim::normalized_levenshtein(wanted, &method.name);
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, &method.name));
            }
        }
    }
    best.filter(|(score, _)| *score >= 0.6)
        .map(|(_, name)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smali::parse_class;
    use proptest::prelude::*;

    fn pool_of(sources: &[&str]) -> ClassPool {
        let mut pool = ClassPool::new();
        for (i, src) in sources.iter().enumerate() {
            pool.push(parse_class(src, &format!("class{i}.smali")).unwrap());
        }
        pool
    }

    fn verifier_class(name: &str) -> String {
        format!(
            r#".class public L{name};
.super Ljava/lang/Object;
.implements Ljavax/net/ssl/HostnameVerifier;

.method public verify(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z
    .locals 1

    const/4 v0, 0x0

    return v0
.end method
"#
        )
    }

    fn unrelated_class() -> String {
        r#".class public Lcom/example/Logger;
.super Ljava/lang/Object;

.method public verify(Ljava/lang/String;)Z
    .locals 1

    const/4 v0, 0x1

    return v0
.end method

.method public log(Ljava/lang/String;)V
    .locals 0

    return-void
.end method
"#
        .to_string()
    }

    #[test]
    fn suffix_name_descriptor_yields_single_match() {
        let pool = pool_of(&[
            &unrelated_class(),
            &verifier_class("com/example/net/OkHostnameVerifier"),
            r#".class public Lcom/example/Api;
.super Ljava/lang/Object;

.method public fetch()V
    .locals 0

    return-void
.end method
"#,
        ]);

        let fp = Fingerprint::new()
            .method("verify")
            .descriptor("(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z")
            .class_suffix("HostnameVerifier");

        let result = match_pool(&pool, &fp).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(
            pool.describe(result.matches[0]),
            "Lcom/example/net/OkHostnameVerifier;->verify(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z"
        );
    }

    #[test]
    fn overload_with_other_descriptor_does_not_match() {
        // Logger.verify(String)Z shares the name but not the descriptor.
        let pool = pool_of(&[&unrelated_class()]);
        let fp = Fingerprint::new()
            .method("verify")
            .descriptor("(Ljava/lang/String;Ljavax/net/ssl/SSLSession;)Z");
        let result = match_pool(&pool, &fp).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn suffix_anchors_on_full_simple_name() {
        let pool = pool_of(&[
            &verifier_class("com/a/MyHostnameVerifier"),
            // Suffix appears mid-name only; must not match.
            &verifier_class("com/a/HostnameVerifierFactory"),
        ]);
        let fp = Fingerprint::new()
            .method("verify")
            .class_suffix("HostnameVerifier");
        let result = match_pool(&pool, &fp).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.matches[0].class, 0);
    }

    #[test]
    fn matches_across_classes_stay_distinct() {
        let pool = pool_of(&[
            &verifier_class("com/a/FirstHostnameVerifier"),
            &verifier_class("com/b/SecondHostnameVerifier"),
        ]);
        let fp = Fingerprint::new()
            .method("verify")
            .class_suffix("HostnameVerifier");
        let result = match_pool(&pool, &fp).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.ambiguity(&pool).is_none());
    }

    #[test]
    fn under_constrained_rejected() {
        let pool = pool_of(&[&unrelated_class()]);
        assert!(matches!(
            match_pool(&pool, &Fingerprint::new().method("verify")),
            Err(MatchError::UnderConstrained { .. })
        ));
        assert!(matches!(
            match_pool(
                &pool,
                &Fingerprint::new().class_suffix("Verifier").implements("Lx;")
            ),
            Err(MatchError::UnderConstrained { .. })
        ));
    }

    #[test]
    fn contains_and_lacks_conditions() {
        let pool = pool_of(&[&verifier_class("com/a/AHostnameVerifier")]);
        let fp = Fingerprint::new()
            .method("verify")
            .contains(InsnPattern::parse("const/4 *, 0x0"));
        assert_eq!(match_pool(&pool, &fp).unwrap().len(), 1);

        let fp = Fingerprint::new()
            .method("verify")
            .lacks(InsnPattern::parse("const/4"));
        assert!(match_pool(&pool, &fp).unwrap().is_empty());
    }

    #[test]
    fn no_match_error_suggests_near_miss() {
        let pool = pool_of(&[&unrelated_class()]);
        let fp = Fingerprint::new()
            .method("verfy")
            .descriptor("(Ljava/lang/String;)Z");
        let result = match_pool(&pool, &fp).unwrap();
        assert!(result.is_empty());
        let err = no_match_error(&pool, &fp);
        assert!(err.to_string().contains("'verify'"));
    }

    proptest! {
        /// Name+descriptor fingerprints match exactly the methods whose name
        /// and descriptor both equal the wanted values, regardless of owner.
        #[test]
        fn name_descriptor_exactness(
            class_count in 1usize..6,
            with_target in proptest::collection::vec(any::<bool>(), 1..6),
        ) {
            let mut pool = ClassPool::new();
            let mut expected = 0usize;
            for (i, has_target) in with_target.iter().take(class_count).enumerate() {
                let body = if *has_target {
                    expected += 1;
                    ".method public target(I)Z\n    .locals 1\n    const/4 v0, 0x1\n    return v0\n.end method\n"
                } else {
                    ".method public target(J)Z\n    .locals 1\n    const/4 v0, 0x1\n    return v0\n.end method\n"
                };
                let src = format!(
                    ".class public Lgen/C{i};\n.super Ljava/lang/Object;\n\n{body}"
                );
                pool.push(parse_class(&src, "gen.smali").unwrap());
            }

            let fp = Fingerprint::new().method("target").descriptor("(I)Z");
            let result = match_pool(&pool, &fp).unwrap();
            prop_assert_eq!(result.len(), expected);
            for m in result.iter() {
                let method = pool.method(m);
                prop_assert_eq!(method.name.as_str(), "target");
                prop_assert_eq!(method.descriptor.as_str(), "(I)Z");
            }
        }
    }
}
