//! Seams to the external collaborators: policy store, analysis delegate, and
//! audit sink.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::contracts::EvaluationContext;
use crate::decision::EnforcementDecision;
use crate::error::PolicyResult;
use crate::policy::Policy;

/// Supplies the set of active policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Returns an immutable, self-consistent snapshot of the active policies in
    /// evaluation order.
    async fn active_policies(&self) -> PolicyResult<Arc<[Policy]>>;
}

/// Failures reported by an analysis delegate.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The provider could not be reached or rejected the request.
    #[error("analysis unavailable: {reason}")]
    Unavailable {
        /// Additional context about the failure.
        reason: String,
    },
    /// The call did not complete within the configured timeout.
    #[error("analysis timed out")]
    Timeout,
    /// The provider answered without a usable score.
    #[error("malformed analysis response: {reason}")]
    Malformed {
        /// Additional context about the failure.
        reason: String,
    },
}

impl AnalysisError {
    /// Convenience constructor for unavailable providers.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for unusable responses.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Scores content for an analysis type, where higher means riskier.
#[async_trait]
pub trait AnalysisDelegate: Send + Sync {
    /// Returns a score in `0.0..=1.0`.
    async fn score(&self, content: &str, analysis_type: &str) -> Result<f64, AnalysisError>;
}

/// Delegate used when no analysis provider is configured. Every call reports
/// [`AnalysisError::Unavailable`], so analysis rules fail conservatively.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalysis;

#[async_trait]
impl AnalysisDelegate for DisabledAnalysis {
    async fn score(&self, _content: &str, analysis_type: &str) -> Result<f64, AnalysisError> {
        Err(AnalysisError::unavailable(format!(
            "no analysis provider configured for `{analysis_type}`"
        )))
    }
}

/// Failure reported by an audit sink.
#[derive(Debug, Error)]
#[error("audit sink failure: {reason}")]
pub struct AuditError {
    reason: String,
}

impl AuditError {
    /// Creates an audit failure with the supplied reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the failure reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Receives every decision with the context it was made for.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records a decision. The decision carries the full outcome trace.
    async fn record(
        &self,
        decision: &EnforcementDecision,
        context: &EvaluationContext,
    ) -> Result<(), AuditError>;
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(
        &self,
        _decision: &EnforcementDecision,
        _context: &EvaluationContext,
    ) -> Result<(), AuditError> {
        Ok(())
    }
}
