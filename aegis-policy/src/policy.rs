//! Policies and their lifecycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use aegis_primitives::{Applicability, PolicyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contracts::EvaluationContext;
use crate::error::{PolicyError, PolicyResult};
use crate::rule::Rule;

/// Publication status of a policy. Only active policies are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    /// Being authored; never enforced.
    #[default]
    Draft,
    /// Enforced.
    Active,
    /// Soft-disabled; never enforced.
    Inactive,
}

impl PolicyStatus {
    /// Returns `true` when the status participates in enforcement.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Events that move a policy between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Promote to active after validation.
    Activate,
    /// Soft-disable an active policy.
    Deactivate,
}

/// Named, versioned bundle of rules with applicability metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "PolicyId::generate")]
    policy_id: PolicyId,
    #[serde(alias = "name")]
    policy_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    status: PolicyStatus,
    #[serde(default)]
    applicable_roles: Applicability,
    #[serde(default)]
    applicable_activities: Applicability,
    #[serde(default)]
    rules: Arc<[Rule]>,
    #[serde(default = "initial_version")]
    version: u32,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_by: Option<String>,
}

const fn initial_version() -> u32 {
    1
}

impl Policy {
    /// Starts building a draft policy with a freshly generated identifier.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder {
            policy_id: None,
            name: name.into(),
            description: None,
            applicable_roles: Applicability::All,
            applicable_activities: Applicability::All,
            rules: Vec::new(),
            created_by: None,
        }
    }

    /// Returns the stable identifier.
    #[must_use]
    pub fn id(&self) -> &PolicyId {
        &self.policy_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.policy_name
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> PolicyStatus {
        self.status
    }

    /// Returns the roles the policy applies to.
    #[must_use]
    pub fn applicable_roles(&self) -> &Applicability {
        &self.applicable_roles
    }

    /// Returns the activities the policy applies to.
    #[must_use]
    pub fn applicable_activities(&self) -> &Applicability {
        &self.applicable_activities
    }

    /// Returns the rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Returns the rule-list version, bumped whenever the rules are replaced.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the timestamp of the last mutation.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the author, when recorded.
    #[must_use]
    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    /// Returns `true` when the policy covers the context's role and activity.
    /// Status is not considered.
    #[must_use]
    pub fn applies_to(&self, context: &EvaluationContext) -> bool {
        self.applicable_roles.covers(context.user_role())
            && self.applicable_activities.covers(context.activity_type())
    }

    /// Checks the invariants required before a policy can be enforced.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MalformedPolicy`] when the name is blank, two
    /// rules share a name, or a rule's parameters are inconsistent.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.policy_name.trim().is_empty() {
            return Err(PolicyError::malformed(
                self.policy_id.as_str(),
                "policy name cannot be empty",
            ));
        }

        let mut seen = BTreeSet::new();
        for rule in self.rules.iter() {
            if !seen.insert(rule.name()) {
                return Err(PolicyError::malformed(
                    &self.policy_name,
                    format!("duplicate rule name `{}`", rule.name()),
                ));
            }
            rule.revalidate().map_err(|err| match err {
                PolicyError::MalformedPolicy { reason, policy } => PolicyError::malformed(
                    &self.policy_name,
                    format!("rule `{policy}`: {reason}"),
                ),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Applies a lifecycle event, returning the resulting status.
    ///
    /// Activation validates the policy first. Re-applying the current status is
    /// a no-op that leaves `updated_at` untouched.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidTransition`] for transitions that are not
    /// permitted (deactivating a draft) and [`PolicyError::MalformedPolicy`] when
    /// activation fails validation.
    pub fn transition(&mut self, event: LifecycleEvent) -> PolicyResult<PolicyStatus> {
        let next = match (self.status, event) {
            (
                PolicyStatus::Draft | PolicyStatus::Inactive | PolicyStatus::Active,
                LifecycleEvent::Activate,
            ) => Some(PolicyStatus::Active),
            (PolicyStatus::Active | PolicyStatus::Inactive, LifecycleEvent::Deactivate) => {
                Some(PolicyStatus::Inactive)
            }
            (PolicyStatus::Draft, LifecycleEvent::Deactivate) => None,
        };

        let Some(next_status) = next else {
            return Err(PolicyError::InvalidTransition {
                policy: self.policy_id.clone(),
                from: self.status,
                event,
            });
        };

        if next_status.is_active() {
            self.validate()?;
        }

        if next_status != self.status {
            debug!(
                policy_id = %self.policy_id,
                from = ?self.status,
                to = ?next_status,
                ?event,
                "policy lifecycle transition"
            );
            self.status = next_status;
            self.touch();
        }

        Ok(self.status)
    }

    /// Replaces the rule list wholesale and bumps the version.
    ///
    /// Active policies are re-validated with the new rules; on failure the
    /// policy is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MalformedPolicy`] when the policy is active and
    /// the new rule list is invalid.
    pub fn replace_rules(&mut self, rules: Vec<Rule>) -> PolicyResult<()> {
        let previous = std::mem::replace(&mut self.rules, rules.into());
        if self.status.is_active() {
            if let Err(err) = self.validate() {
                self.rules = previous;
                return Err(err);
            }
        }
        self.version = self.version.saturating_add(1);
        self.touch();
        Ok(())
    }

    /// Replaces the role and activity applicability.
    pub fn set_applicability(&mut self, roles: Applicability, activities: Applicability) {
        self.applicable_roles = roles;
        self.applicable_activities = activities;
        self.touch();
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Keep updated_at monotonic even when the wall clock steps backwards.
        self.updated_at = now.max(self.updated_at);
    }
}

/// Builder for draft policies.
#[derive(Debug)]
pub struct PolicyBuilder {
    policy_id: Option<PolicyId>,
    name: String,
    description: Option<String>,
    applicable_roles: Applicability,
    applicable_activities: Applicability,
    rules: Vec<Rule>,
    created_by: Option<String>,
}

impl PolicyBuilder {
    /// Uses an explicit identifier instead of a generated one.
    #[must_use]
    pub fn id(mut self, id: PolicyId) -> Self {
        self.policy_id = Some(id);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restricts the policy to the given roles.
    #[must_use]
    pub fn roles(mut self, roles: Applicability) -> Self {
        self.applicable_roles = roles;
        self
    }

    /// Restricts the policy to the given activities.
    #[must_use]
    pub fn activities(mut self, activities: Applicability) -> Self {
        self.applicable_activities = activities;
        self
    }

    /// Appends a rule; rules are evaluated in insertion order.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Records the author.
    #[must_use]
    pub fn created_by(mut self, author: impl Into<String>) -> Self {
        self.created_by = Some(author.into());
        self
    }

    /// Builds the policy in `draft` status.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MalformedPolicy`] when the name is blank or rule
    /// names collide.
    pub fn build(self) -> PolicyResult<Policy> {
        let now = Utc::now();
        let policy = Policy {
            policy_id: self.policy_id.unwrap_or_else(PolicyId::generate),
            policy_name: self.name,
            description: self.description,
            status: PolicyStatus::Draft,
            applicable_roles: self.applicable_roles,
            applicable_activities: self.applicable_activities,
            rules: self.rules.into(),
            version: initial_version(),
            created_at: now,
            updated_at: now,
            created_by: self.created_by,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Builds the policy and immediately activates it.
    ///
    /// # Errors
    ///
    /// See [`PolicyBuilder::build`].
    pub fn build_active(self) -> PolicyResult<Policy> {
        let mut policy = self.build()?;
        policy.transition(LifecycleEvent::Activate)?;
        Ok(policy)
    }
}
