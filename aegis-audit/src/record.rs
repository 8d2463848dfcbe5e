//! Audit record written for every enforcement decision.

use aegis_policy::{EnforcementAction, EnforcementDecision, EvaluationContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type stamped on enforcement records.
pub const POLICY_ENFORCEMENT_EVENT: &str = "policy_enforcement";

const MAX_LOGGED_CONTENT: usize = 1000;
const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Whether the decision allowed the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    /// Every applicable policy passed.
    Compliant,
    /// At least one applicable policy failed.
    NonCompliant,
}

/// Coarse risk bucket derived from the most severe action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No action or only warnings.
    Low,
    /// Human review requested.
    Medium,
    /// Blocked or escalated.
    High,
}

impl RiskLevel {
    fn from_action(action: Option<EnforcementAction>) -> Self {
        match action {
            Some(EnforcementAction::Block | EnforcementAction::Escalate) => Self::High,
            Some(EnforcementAction::Review) => Self::Medium,
            Some(EnforcementAction::Warn) | None => Self::Low,
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    log_id: Uuid,
    timestamp: DateTime<Utc>,
    event_type: String,
    compliance_status: ComplianceStatus,
    risk_level: RiskLevel,
    context: EvaluationContext,
    decision: EnforcementDecision,
}

impl AuditRecord {
    /// Builds a record for `decision`. With `redact_content` the evaluated
    /// content is replaced by a marker; otherwise it is truncated to a bounded
    /// length.
    #[must_use]
    pub fn new(
        decision: &EnforcementDecision,
        context: &EvaluationContext,
        redact_content: bool,
    ) -> Self {
        let context = if redact_content {
            context.redacted()
        } else {
            truncate_content(context)
        };

        Self {
            log_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: POLICY_ENFORCEMENT_EVENT.to_owned(),
            compliance_status: if decision.allowed() {
                ComplianceStatus::Compliant
            } else {
                ComplianceStatus::NonCompliant
            },
            risk_level: RiskLevel::from_action(decision.most_severe_action()),
            context,
            decision: decision.clone(),
        }
    }

    /// Returns the unique record identifier.
    #[must_use]
    pub const fn log_id(&self) -> Uuid {
        self.log_id
    }

    /// Returns when the record was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the event type.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the compliance status.
    #[must_use]
    pub const fn compliance_status(&self) -> ComplianceStatus {
        self.compliance_status
    }

    /// Returns the risk level.
    #[must_use]
    pub const fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// Returns the logged context.
    #[must_use]
    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    /// Returns the logged decision.
    #[must_use]
    pub fn decision(&self) -> &EnforcementDecision {
        &self.decision
    }
}

fn truncate_content(context: &EvaluationContext) -> EvaluationContext {
    let content = context.content();
    match content.char_indices().nth(MAX_LOGGED_CONTENT) {
        Some((cut, _)) => context.with_content(format!("{}{TRUNCATION_MARKER}", &content[..cut])),
        None => context.clone(),
    }
}
