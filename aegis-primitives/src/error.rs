//! Shared error definitions for engine primitives.

use thiserror::Error;

/// Result alias used throughout the engine primitives.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Policy identifier failed validation.
    #[error("invalid policy id `{id}`: {reason}")]
    InvalidPolicyId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Enforcement action name was not recognised.
    #[error("unknown enforcement action `{0}`")]
    UnknownAction(String),

    /// Applicability entry was blank.
    #[error("applicability entries must not be blank")]
    BlankApplicability,
}
