//! In-place method body rewriting.
//!
//! A strategy never touches the declared descriptor; only instruction
//! content (and the register budget, upward) changes. Every strategy is
//! idempotent: re-running against an already-rewritten body reports
//! [`RewriteOutcome::AlreadyApplied`] instead of stacking edits.

pub mod errors;
pub mod strategy;

pub use errors::RewriteError;
pub use strategy::{rewrite, ReturnConstant, RewriteOutcome, RewriteStrategy};
