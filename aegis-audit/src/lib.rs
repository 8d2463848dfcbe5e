//! Audit sinks for Aegis enforcement decisions.

#![warn(missing_docs, clippy::pedantic)]

mod collecting;
mod error;
mod journal;
mod query;
mod record;

pub use collecting::CollectingAuditSink;
pub use error::{JournalError, JournalResult};
pub use journal::FileAuditJournal;
pub use query::{AuditQuery, AuditSummary};
pub use record::{AuditRecord, ComplianceStatus, POLICY_ENFORCEMENT_EVENT, RiskLevel};
