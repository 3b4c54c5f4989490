use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("no instruction matches marker [{marker}]")]
    MarkerNotFound { marker: String },

    #[error("unsafe injection site: marker at label :{label} is a branch target")]
    UnsafeInjectionSite { label: String },

    #[error("rewrite does not terminate with a return matching descriptor {descriptor}")]
    MismatchedReturn { descriptor: String },

    #[error("invalid rewrite strategy: {reason}")]
    InvalidStrategy { reason: String },
}
