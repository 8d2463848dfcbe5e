//! Filtering and summarising journal records.

use std::collections::BTreeMap;

use aegis_policy::{EnforcementAction, PolicyId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::{AuditRecord, ComplianceStatus, RiskLevel};

/// Filter over journal records. Unset criteria match every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    policy_id: Option<PolicyId>,
    compliance: Option<ComplianceStatus>,
    risk_level: Option<RiskLevel>,
    user_role: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl AuditQuery {
    /// Query matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps records whose decision evaluated `policy_id`.
    #[must_use]
    pub fn policy(mut self, policy_id: PolicyId) -> Self {
        self.policy_id = Some(policy_id);
        self
    }

    /// Keeps allowed decisions only.
    #[must_use]
    pub const fn allowed(mut self) -> Self {
        self.compliance = Some(ComplianceStatus::Compliant);
        self
    }

    /// Keeps denied decisions only.
    #[must_use]
    pub const fn denied(mut self) -> Self {
        self.compliance = Some(ComplianceStatus::NonCompliant);
        self
    }

    /// Keeps records at `risk_level`.
    #[must_use]
    pub const fn risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    /// Keeps records for requests made under `role`.
    #[must_use]
    pub fn user_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = Some(role.into());
        self
    }

    /// Keeps records written at or after `since`.
    #[must_use]
    pub const fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Keeps records written before `until`.
    #[must_use]
    pub const fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Returns at most the `limit` most recent matches.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the match cap, if any.
    #[must_use]
    pub const fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Whether `record` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(policy_id) = &self.policy_id {
            let evaluated = record
                .decision()
                .policy_results()
                .iter()
                .any(|outcome| outcome.policy_id() == policy_id);
            if !evaluated {
                return false;
            }
        }

        self.compliance.is_none_or(|status| record.compliance_status() == status)
            && self.risk_level.is_none_or(|risk| record.risk_level() == risk)
            && self
                .user_role
                .as_deref()
                .is_none_or(|role| record.context().user_role() == role)
            && self.since.is_none_or(|since| record.timestamp() >= since)
            && self.until.is_none_or(|until| record.timestamp() < until)
    }
}

/// Counts over a set of journal records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    /// Records counted.
    pub total: usize,
    /// Allowed decisions.
    pub compliant: usize,
    /// Denied decisions.
    pub non_compliant: usize,
    /// Records per risk bucket.
    pub risk_levels: BTreeMap<RiskLevel, usize>,
    /// Records per event type.
    pub event_types: BTreeMap<String, usize>,
    /// Denials attributed to each failing policy.
    pub policy_failures: BTreeMap<PolicyId, usize>,
    /// How often each enforcement action was applied.
    pub actions: BTreeMap<EnforcementAction, usize>,
    /// Oldest record timestamp.
    pub first_seen: Option<DateTime<Utc>>,
    /// Newest record timestamp.
    pub last_seen: Option<DateTime<Utc>>,
}

impl AuditSummary {
    /// Folds one record into the counts.
    pub fn add(&mut self, record: &AuditRecord) {
        self.total += 1;
        match record.compliance_status() {
            ComplianceStatus::Compliant => self.compliant += 1,
            ComplianceStatus::NonCompliant => self.non_compliant += 1,
        }
        *self.risk_levels.entry(record.risk_level()).or_default() += 1;
        *self
            .event_types
            .entry(record.event_type().to_owned())
            .or_default() += 1;

        for (_, action) in record.decision().applied_actions() {
            *self.actions.entry(action).or_default() += 1;
        }
        for outcome in record.decision().policy_results() {
            if !outcome.allowed() {
                *self
                    .policy_failures
                    .entry(outcome.policy_id().clone())
                    .or_default() += 1;
            }
        }

        let at = record.timestamp();
        self.first_seen = Some(self.first_seen.map_or(at, |first| first.min(at)));
        self.last_seen = Some(self.last_seen.map_or(at, |last| last.max(at)));
    }
}

impl<'a> FromIterator<&'a AuditRecord> for AuditSummary {
    fn from_iter<I: IntoIterator<Item = &'a AuditRecord>>(records: I) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record);
        }
        summary
    }
}
