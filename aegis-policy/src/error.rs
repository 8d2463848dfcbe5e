//! Errors surfaced by the policy engine and its reference store.

use aegis_primitives::PolicyId;
use thiserror::Error;

use crate::policy::{LifecycleEvent, PolicyStatus};

/// Errors surfaced by policy construction, management, and evaluation.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A rule or policy failed validation. Raised before a policy can become
    /// active, never during evaluation.
    #[error("malformed policy `{policy}`: {reason}")]
    MalformedPolicy {
        /// Name or identifier of the offending policy (or rule).
        policy: String,
        /// Human-readable explanation.
        reason: String,
    },
    /// The policy store could not provide a consistent snapshot.
    #[error("policy store unavailable: {reason}")]
    StoreUnavailable {
        /// Human-readable explanation for logging and operators.
        reason: String,
    },
    /// The referenced policy does not exist in the store.
    #[error("unknown policy `{0}`")]
    UnknownPolicy(PolicyId),
    /// A policy with the same identifier already exists.
    #[error("policy `{0}` already exists")]
    DuplicatePolicy(PolicyId),
    /// Lifecycle transition was not permitted from the current status.
    #[error("invalid transition for policy `{policy}` from {from:?} via {event:?}")]
    InvalidTransition {
        /// Policy whose transition failed.
        policy: PolicyId,
        /// Status prior to the attempted transition.
        from: PolicyStatus,
        /// Event that triggered the failure.
        event: LifecycleEvent,
    },
    /// A policy document could not be decoded.
    #[error("invalid policy document: {source}")]
    Document {
        /// Source [`serde_json::Error`].
        #[from]
        source: serde_json::Error,
    },
}

impl PolicyError {
    /// Convenience constructor for validation failures.
    #[must_use]
    pub fn malformed(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPolicy {
            policy: policy.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for store failures.
    #[must_use]
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
