//! Core shared types for the Aegis policy enforcement engine.

#![warn(missing_docs, clippy::pedantic)]

mod action;
mod applicability;
mod error;
mod ids;

/// Enforcement actions attached to failing rules.
pub use action::EnforcementAction;
/// Role and activity applicability sets.
pub use applicability::{Applicability, ALL_SENTINEL};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Stable identifier for policies.
pub use ids::PolicyId;
