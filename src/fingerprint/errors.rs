use std::fmt;

#[derive(Debug, Clone)]
pub enum MatchError {
    /// Fingerprint would scan the whole pool on name alone (or less).
    UnderConstrained { fingerprint: String },
    /// Zero candidates. Soft by policy: the coordinator decides criticality.
    NoMatch {
        fingerprint: String,
        suggestion: Option<String>,
    },
    /// More candidates inside one class than the strategy may touch.
    AmbiguousMatch {
        fingerprint: String,
        class: String,
        count: usize,
    },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::UnderConstrained { fingerprint } => write!(
                f,
                "fingerprint [{fingerprint}] is under-constrained: a method-name or descriptor \
                 condition plus at least one further structural condition is required"
            ),
            MatchError::NoMatch {
                fingerprint,
                suggestion,
            } => {
                write!(f, "fingerprint [{fingerprint}] matched no methods")?;
                if let Some(name) = suggestion {
                    write!(f, " (closest method name in pool: '{name}')")?;
                }
                Ok(())
            }
            MatchError::AmbiguousMatch {
                fingerprint,
                class,
                count,
            } => write!(
                f,
                "fingerprint [{fingerprint}] matched {count} methods in {class}, expected at most 1"
            ),
        }
    }
}

impl std::error::Error for MatchError {}
