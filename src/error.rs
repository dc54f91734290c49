//! Error types for the propagation core.
//!
//! The core keeps its runtime error surface small on purpose: most misuse
//! (unknown flag families, wrongly typed inputs) is unrepresentable at the
//! type level, and user-callback panics abort the turn per the failure
//! policy in `domain::transaction`.

use thiserror::Error;

/// Errors reported by domain entry points.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A domain with this name was already declared with a different
    /// engine. Re-declaring with the same engine instance is idempotent
    /// and returns the existing domain instead.
    #[error("domain '{name}' already declared with a different policy")]
    AlreadyDeclared {
        /// The conflicting domain name.
        name: String,
    },

    /// `do_transaction` was entered while the calling thread was already
    /// admitting or propagating a turn on the same domain. Inputs produced
    /// during propagation belong in `add_input`, which routes them into
    /// the turn's continuation.
    #[error("nested do_transaction on the same thread")]
    NestedTransaction,
}
