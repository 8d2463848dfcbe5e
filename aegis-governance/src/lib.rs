//! AegisAI policy enforcement engine.
//!
//! Bundles the workspace crates behind feature flags. With the default
//! features, [`bootstrap::build_engine`] turns a loaded
//! [`config::GovernanceConfig`] and a policy store into a ready engine.

#![warn(missing_docs, clippy::pedantic)]

/// Shared primitives: policy ids, actions, applicability.
pub use aegis_primitives as primitives;

/// Policy model and enforcement engine.
pub use aegis_policy as policy;

/// Model-backed analysis (enabled by `analysis` feature).
#[cfg(feature = "analysis")]
pub use aegis_analysis as analysis;

/// Audit journal and sinks (enabled by `audit` feature).
#[cfg(feature = "audit")]
pub use aegis_audit as audit;

/// Configuration loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use aegis_config as config;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use aegis_telemetry as telemetry;

/// Engine assembly from configuration (enabled by `bootstrap` feature).
#[cfg(feature = "bootstrap")]
pub mod bootstrap;
