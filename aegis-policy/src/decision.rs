//! Outcome and decision types returned by the engine.

use std::collections::BTreeSet;

use aegis_primitives::{EnforcementAction, PolicyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contracts::EvaluationContext;
use crate::rule::Rule;

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleOutcomeDocument")]
pub struct RuleOutcome {
    rule_name: String,
    passed: bool,
    #[serde(default)]
    violations: Vec<String>,
    #[serde(default)]
    actions: Vec<EnforcementAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
}

impl RuleOutcome {
    /// Outcome for a rule that passed.
    #[must_use]
    pub fn pass(rule: &Rule) -> Self {
        Self {
            rule_name: rule.name().to_owned(),
            passed: true,
            violations: Vec::new(),
            actions: Vec::new(),
            score: None,
        }
    }

    /// Outcome for a rule that failed; actions are copied from the rule.
    #[must_use]
    pub fn fail(rule: &Rule, violations: Vec<String>) -> Self {
        Self {
            rule_name: rule.name().to_owned(),
            passed: false,
            violations,
            actions: rule.enforcement_actions().to_vec(),
            score: None,
        }
    }

    /// Builds the outcome from a list of violations; empty means passed.
    #[must_use]
    pub fn from_violations(rule: &Rule, violations: Vec<String>) -> Self {
        if violations.is_empty() {
            Self::pass(rule)
        } else {
            Self::fail(rule, violations)
        }
    }

    /// Attaches the analysis score that produced this outcome.
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Returns the rule name.
    #[must_use]
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// Returns `true` when the rule passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.passed
    }

    /// Returns human-readable violation reasons.
    #[must_use]
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Returns the actions requested by the failure; empty when passed.
    #[must_use]
    pub fn actions(&self) -> &[EnforcementAction] {
        &self.actions
    }

    /// Returns the analysis score, for analysis rules that obtained one.
    #[must_use]
    pub const fn score(&self) -> Option<f64> {
        self.score
    }
}

#[derive(Deserialize)]
struct RuleOutcomeDocument {
    rule_name: String,
    passed: bool,
    #[serde(default)]
    violations: Vec<String>,
    #[serde(default)]
    actions: Vec<EnforcementAction>,
    #[serde(default)]
    score: Option<f64>,
}

impl TryFrom<RuleOutcomeDocument> for RuleOutcome {
    type Error = String;

    fn try_from(doc: RuleOutcomeDocument) -> Result<Self, Self::Error> {
        if doc.passed && !(doc.violations.is_empty() && doc.actions.is_empty()) {
            return Err(format!(
                "rule outcome `{}` passed but carries violations or actions",
                doc.rule_name
            ));
        }
        Ok(Self {
            rule_name: doc.rule_name,
            passed: doc.passed,
            violations: doc.violations,
            actions: doc.actions,
            score: doc.score,
        })
    }
}

/// Combined result of every rule in one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolicyOutcomeDocument")]
pub struct PolicyOutcome {
    policy_id: PolicyId,
    policy_name: String,
    allowed: bool,
    violations: Vec<String>,
    actions: Vec<EnforcementAction>,
    rule_outcomes: Vec<RuleOutcome>,
}

impl PolicyOutcome {
    /// Combines rule outcomes; the policy allows only when every rule passed.
    #[must_use]
    pub fn new(
        policy_id: PolicyId,
        policy_name: impl Into<String>,
        rule_outcomes: Vec<RuleOutcome>,
    ) -> Self {
        let allowed = rule_outcomes.iter().all(RuleOutcome::passed);
        let violations = rule_outcomes
            .iter()
            .flat_map(|outcome| outcome.violations.iter().cloned())
            .collect();
        let mut actions = Vec::new();
        for action in rule_outcomes
            .iter()
            .flat_map(|outcome| outcome.actions.iter().copied())
        {
            if !actions.contains(&action) {
                actions.push(action);
            }
        }

        Self {
            policy_id,
            policy_name: policy_name.into(),
            allowed,
            violations,
            actions,
            rule_outcomes,
        }
    }

    /// Returns the policy identifier.
    #[must_use]
    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    /// Returns the policy name.
    #[must_use]
    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    /// Returns `true` when every rule passed.
    #[must_use]
    pub const fn allowed(&self) -> bool {
        self.allowed
    }

    /// Returns all violation reasons in rule order.
    #[must_use]
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Returns the union of failing rules' actions in first-seen order.
    #[must_use]
    pub fn actions(&self) -> &[EnforcementAction] {
        &self.actions
    }

    /// Returns per-rule outcomes in declaration order.
    #[must_use]
    pub fn rule_outcomes(&self) -> &[RuleOutcome] {
        &self.rule_outcomes
    }
}

#[derive(Deserialize)]
struct PolicyOutcomeDocument {
    policy_id: PolicyId,
    policy_name: String,
    allowed: bool,
    #[serde(default)]
    violations: Vec<String>,
    #[serde(default)]
    actions: Vec<EnforcementAction>,
    #[serde(default)]
    rule_outcomes: Vec<RuleOutcome>,
}

impl TryFrom<PolicyOutcomeDocument> for PolicyOutcome {
    type Error = String;

    fn try_from(doc: PolicyOutcomeDocument) -> Result<Self, Self::Error> {
        let outcome = Self::new(doc.policy_id, doc.policy_name, doc.rule_outcomes);
        if outcome.allowed != doc.allowed
            || outcome.violations != doc.violations
            || outcome.actions != doc.actions
        {
            return Err(format!(
                "policy outcome `{}` disagrees with its rule outcomes",
                outcome.policy_id
            ));
        }
        Ok(outcome)
    }
}

/// Final, auditable allow/block result with its full outcome trace.
///
/// Decoding recomputes the verdict from the policy results and rejects
/// documents whose stored verdict, actions, or count disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DecisionDocument")]
pub struct EnforcementDecision {
    allowed: bool,
    policy_results: Vec<PolicyOutcome>,
    enforcement_actions: BTreeSet<EnforcementAction>,
    applicable_policies_count: usize,
    user_role: String,
    activity_type: String,
    evaluated_at: DateTime<Utc>,
}

impl EnforcementDecision {
    /// Aggregates policy outcomes. Content is allowed only when every
    /// applicable policy allows it; no applicable policy means allowed.
    #[must_use]
    pub fn new(
        context: &EvaluationContext,
        policy_results: Vec<PolicyOutcome>,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self::assemble(
            context.user_role().to_owned(),
            context.activity_type().to_owned(),
            policy_results,
            evaluated_at,
        )
    }

    fn assemble(
        user_role: String,
        activity_type: String,
        policy_results: Vec<PolicyOutcome>,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        let allowed = policy_results.iter().all(PolicyOutcome::allowed);
        let enforcement_actions = policy_results
            .iter()
            .flat_map(|policy| policy.rule_outcomes.iter())
            .filter(|rule| !rule.passed)
            .flat_map(|rule| rule.actions.iter().copied())
            .collect();

        Self {
            allowed,
            applicable_policies_count: policy_results.len(),
            policy_results,
            enforcement_actions,
            user_role,
            activity_type,
            evaluated_at,
        }
    }

    /// Returns the authoritative verdict.
    #[must_use]
    pub const fn allowed(&self) -> bool {
        self.allowed
    }

    /// Returns per-policy outcomes in snapshot order.
    #[must_use]
    pub fn policy_results(&self) -> &[PolicyOutcome] {
        &self.policy_results
    }

    /// Returns the de-duplicated actions, most severe first. Informational only.
    #[must_use]
    pub fn enforcement_actions(&self) -> &BTreeSet<EnforcementAction> {
        &self.enforcement_actions
    }

    /// Returns the most severe requested action, if any.
    #[must_use]
    pub fn most_severe_action(&self) -> Option<EnforcementAction> {
        self.enforcement_actions.first().copied()
    }

    /// Returns every action requested by a failing policy, paired with that
    /// policy's identifier, in policy order.
    pub fn applied_actions(&self) -> impl Iterator<Item = (&PolicyId, EnforcementAction)> + '_ {
        self.policy_results
            .iter()
            .filter(|policy| !policy.allowed)
            .flat_map(|policy| {
                policy
                    .actions
                    .iter()
                    .map(move |action| (&policy.policy_id, *action))
            })
    }

    /// Returns the number of policies that were evaluated.
    #[must_use]
    pub const fn applicable_policies_count(&self) -> usize {
        self.applicable_policies_count
    }

    /// Returns the number of policies that did not allow the content.
    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.policy_results
            .iter()
            .filter(|policy| !policy.allowed)
            .count()
    }

    /// Returns the role the decision was made for.
    #[must_use]
    pub fn user_role(&self) -> &str {
        &self.user_role
    }

    /// Returns the activity the decision was made for.
    #[must_use]
    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }

    /// Returns when the decision was made.
    #[must_use]
    pub const fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    /// Compares two decisions ignoring `evaluated_at`.
    #[must_use]
    pub fn same_outcome(&self, other: &Self) -> bool {
        self.allowed == other.allowed
            && self.policy_results == other.policy_results
            && self.enforcement_actions == other.enforcement_actions
            && self.applicable_policies_count == other.applicable_policies_count
            && self.user_role == other.user_role
            && self.activity_type == other.activity_type
    }
}

#[derive(Deserialize)]
struct DecisionDocument {
    allowed: bool,
    #[serde(default)]
    policy_results: Vec<PolicyOutcome>,
    #[serde(default)]
    enforcement_actions: BTreeSet<EnforcementAction>,
    applicable_policies_count: usize,
    user_role: String,
    activity_type: String,
    evaluated_at: DateTime<Utc>,
}

impl TryFrom<DecisionDocument> for EnforcementDecision {
    type Error = String;

    fn try_from(doc: DecisionDocument) -> Result<Self, Self::Error> {
        let decision = Self::assemble(
            doc.user_role,
            doc.activity_type,
            doc.policy_results,
            doc.evaluated_at,
        );
        if decision.allowed != doc.allowed {
            return Err("decision verdict disagrees with its policy results".to_owned());
        }
        if decision.enforcement_actions != doc.enforcement_actions {
            return Err("decision actions disagree with its failing rules".to_owned());
        }
        if decision.applicable_policies_count != doc.applicable_policies_count {
            return Err("decision policy count disagrees with its policy results".to_owned());
        }
        Ok(decision)
    }
}
