//! Configuration for Aegis deployments.
//!
//! [`GovernanceConfig::load`] reads a TOML file, applies `AEGIS_*`
//! environment overrides, and validates the result. Every section and field
//! is optional; omitted values take their defaults.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use schema::{AnalysisSection, AuditSection, EngineSection, GovernanceConfig};
