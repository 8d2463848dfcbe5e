//! Rule evaluation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::contracts::EvaluationContext;
use crate::decision::RuleOutcome;
use crate::integrations::{AnalysisDelegate, AnalysisError};
use crate::rule::{
    DEFAULT_MAX_CONTENT_LENGTH, MAX_ANALYSIS_SCORE, MIN_ANALYSIS_SCORE, Rule, RuleKind,
};

/// Violation reported when the analysis delegate cannot produce a score.
pub const ANALYSIS_UNAVAILABLE: &str = "analysis unavailable";

/// Default bound on a single analysis call.
pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes individual rules against an evaluation context.
#[derive(Clone)]
pub struct RuleEvaluator {
    analysis: Arc<dyn AnalysisDelegate>,
    analysis_timeout: Duration,
}

impl std::fmt::Debug for RuleEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEvaluator")
            .field("analysis_timeout", &self.analysis_timeout)
            .finish_non_exhaustive()
    }
}

impl RuleEvaluator {
    /// Creates an evaluator that delegates analysis rules to `analysis`.
    #[must_use]
    pub fn new(analysis: Arc<dyn AnalysisDelegate>, analysis_timeout: Duration) -> Self {
        Self {
            analysis,
            analysis_timeout,
        }
    }

    /// Returns the per-call analysis timeout.
    #[must_use]
    pub const fn analysis_timeout(&self) -> Duration {
        self.analysis_timeout
    }

    /// Evaluates one rule. Never fails: delegate errors become conservative
    /// rule failures.
    pub async fn evaluate(&self, rule: &Rule, context: &EvaluationContext) -> RuleOutcome {
        let outcome = match rule.kind() {
            RuleKind::AiAnalysis {
                analysis_type,
                threshold,
            } => self.analyse(rule, context, analysis_type, *threshold).await,
            kind => RuleOutcome::from_violations(rule, check_local(kind, context)),
        };

        debug!(
            rule = rule.name(),
            kind = rule.kind().label(),
            passed = outcome.passed(),
            "rule evaluated"
        );
        outcome
    }

    async fn analyse(
        &self,
        rule: &Rule,
        context: &EvaluationContext,
        analysis_type: &str,
        threshold: f64,
    ) -> RuleOutcome {
        let scored = timeout(
            self.analysis_timeout,
            self.analysis.score(context.content(), analysis_type),
        )
        .await
        .unwrap_or(Err(AnalysisError::Timeout));

        let score = match scored {
            Ok(score) if score.is_finite() => {
                score.clamp(MIN_ANALYSIS_SCORE, MAX_ANALYSIS_SCORE)
            }
            Ok(score) => {
                warn!(
                    rule = rule.name(),
                    analysis_type,
                    score,
                    "analysis returned a non-finite score"
                );
                return RuleOutcome::fail(rule, vec![ANALYSIS_UNAVAILABLE.to_owned()]);
            }
            Err(err) => {
                warn!(rule = rule.name(), analysis_type, error = %err, "analysis delegate failed");
                return RuleOutcome::fail(rule, vec![ANALYSIS_UNAVAILABLE.to_owned()]);
            }
        };

        let violations = if score < threshold {
            Vec::new()
        } else {
            vec![format!(
                "{analysis_type} analysis score {score:.2} reached threshold {threshold:.2}"
            )]
        };
        RuleOutcome::from_violations(rule, violations).with_score(score)
    }
}

/// Evaluates the rule kinds that need nothing beyond the context.
fn check_local(kind: &RuleKind, context: &EvaluationContext) -> Vec<String> {
    match kind {
        RuleKind::ContentFilter {
            blocked_terms,
            required_terms,
        } => check_terms(context.content(), blocked_terms, required_terms),
        RuleKind::RoleRestriction {
            allowed_roles,
            restricted_activities,
        } => {
            let role = context.user_role();
            let activity = context.activity_type();
            if restricted_activities.contains(activity) && !allowed_roles.contains(role) {
                vec![format!(
                    "role '{role}' is not authorized for activity '{activity}'"
                )]
            } else {
                Vec::new()
            }
        }
        RuleKind::ContentLength {
            min_length: None,
            max_length: None,
        } => check_length(context.content(), None, Some(DEFAULT_MAX_CONTENT_LENGTH)),
        RuleKind::ContentLength {
            min_length,
            max_length,
        } => check_length(context.content(), *min_length, *max_length),
        RuleKind::TimeRestriction {
            start_hour,
            end_hour,
        } => {
            let hour = context.timestamp().hour();
            if hour_in_window(hour, u32::from(*start_hour), u32::from(*end_hour)) {
                Vec::new()
            } else {
                vec![format!(
                    "activity outside allowed window {start_hour:02}:00-{end_hour:02}:00 UTC \
                     (current hour {hour:02})"
                )]
            }
        }
        // Analysis rules are routed through the delegate before reaching here.
        RuleKind::AiAnalysis { .. } => Vec::new(),
    }
}

fn check_terms(content: &str, blocked: &[String], required: &[String]) -> Vec<String> {
    let haystack = content.to_lowercase();
    let blocked = blocked
        .iter()
        .filter(|term| haystack.contains(&term.to_lowercase()))
        .map(|term| format!("contains blocked term: {term}"));
    let missing = required
        .iter()
        .filter(|term| !haystack.contains(&term.to_lowercase()))
        .map(|term| format!("missing required term: {term}"));
    blocked.chain(missing).collect()
}

fn check_length(content: &str, min: Option<usize>, max: Option<usize>) -> Vec<String> {
    let length = content.chars().count();
    let mut violations = Vec::new();
    if let Some(min) = min.filter(|min| length < *min) {
        violations.push(format!(
            "content too short: {length} characters, minimum {min} (short by {})",
            min - length
        ));
    }
    if let Some(max) = max.filter(|max| length > *max) {
        violations.push(format!(
            "content too long: {length} characters, maximum {max} (over by {})",
            length - max
        ));
    }
    violations
}

fn hour_in_window(hour: u32, start: u32, end: u32) -> bool {
    if start < end {
        (start..end).contains(&hour)
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use aegis_primitives::EnforcementAction;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::integrations::DisabledAnalysis;

    struct FixedScore(f64);

    #[async_trait]
    impl AnalysisDelegate for FixedScore {
        async fn score(&self, _content: &str, _analysis_type: &str) -> Result<f64, AnalysisError> {
            Ok(self.0)
        }
    }

    struct NeverReturns;

    #[async_trait]
    impl AnalysisDelegate for NeverReturns {
        async fn score(&self, _content: &str, _analysis_type: &str) -> Result<f64, AnalysisError> {
            std::future::pending().await
        }
    }

    fn evaluator(delegate: impl AnalysisDelegate + 'static) -> RuleEvaluator {
        RuleEvaluator::new(Arc::new(delegate), Duration::from_millis(50))
    }

    fn ctx(content: &str) -> EvaluationContext {
        EvaluationContext::new(content, "user", "general")
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| (*item).to_owned()).collect()
    }

    fn filter(blocked: &[&str], required: &[&str]) -> Rule {
        Rule::new(
            "filter",
            RuleKind::ContentFilter {
                blocked_terms: blocked.iter().map(|t| (*t).to_owned()).collect(),
                required_terms: required.iter().map(|t| (*t).to_owned()).collect(),
            },
            [EnforcementAction::Block],
        )
        .unwrap()
    }

    fn length(min: Option<usize>, max: Option<usize>) -> Rule {
        Rule::new(
            "length",
            RuleKind::ContentLength {
                min_length: min,
                max_length: max,
            },
            [EnforcementAction::Warn],
        )
        .unwrap()
    }

    fn analysis(threshold: f64) -> Rule {
        Rule::new(
            "bias",
            RuleKind::AiAnalysis {
                analysis_type: "bias".into(),
                threshold,
            },
            [EnforcementAction::Review],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn blocked_terms_match_case_insensitively() {
        let rule = filter(&["Violence", "hate"], &[]);
        let outcome = evaluator(DisabledAnalysis)
            .evaluate(&rule, &ctx("Graphic VIOLENCE and hate"))
            .await;

        assert!(!outcome.passed());
        assert_eq!(outcome.violations().len(), 2);
        assert!(outcome.violations()[0].contains("Violence"));
        assert!(outcome.violations()[1].contains("hate"));
        assert_eq!(outcome.actions(), [EnforcementAction::Block]);
    }

    #[tokio::test]
    async fn required_terms_must_all_be_present() {
        let rule = filter(&[], &["disclaimer", "source"]);
        let eval = evaluator(DisabledAnalysis);

        let outcome = eval.evaluate(&rule, &ctx("Disclaimer: none")).await;
        assert!(!outcome.passed());
        assert_eq!(outcome.violations(), ["missing required term: source"]);

        let outcome = eval.evaluate(&rule, &ctx("SOURCE cited, disclaimer attached")).await;
        assert!(outcome.passed());
        assert!(outcome.actions().is_empty());
    }

    #[tokio::test]
    async fn allowed_roles_are_always_exempt() {
        let rule = Rule::with_default_actions(
            "admin-only",
            RuleKind::RoleRestriction {
                allowed_roles: set(&["admin"]),
                restricted_activities: set(&["policy_management"]),
            },
        )
        .unwrap();
        let eval = evaluator(DisabledAnalysis);

        for activity in ["policy_management", "general", "user_management"] {
            let admin = EvaluationContext::new("x", "admin", activity);
            assert!(eval.evaluate(&rule, &admin).await.passed());
        }

        let user = EvaluationContext::new("x", "user", "policy_management");
        let outcome = eval.evaluate(&rule, &user).await;
        assert!(!outcome.passed());
        assert_eq!(outcome.actions(), [EnforcementAction::Block]);

        let user = EvaluationContext::new("x", "user", "general");
        assert!(eval.evaluate(&rule, &user).await.passed());
    }

    #[tokio::test]
    async fn length_boundaries_are_inclusive() {
        let eval = evaluator(DisabledAnalysis);
        let min_rule = length(Some(5), None);
        assert!(eval.evaluate(&min_rule, &ctx("abcde")).await.passed());
        let short = eval.evaluate(&min_rule, &ctx("abcd")).await;
        assert!(!short.passed());
        assert!(short.violations()[0].contains("short by 1"));

        let max_rule = length(None, Some(5));
        assert!(eval.evaluate(&max_rule, &ctx("abcde")).await.passed());
        let long = eval.evaluate(&max_rule, &ctx("abcdef")).await;
        assert!(!long.passed());
        assert!(long.violations()[0].contains("over by 1"));
    }

    #[tokio::test]
    async fn unbounded_length_rule_uses_default_ceiling() {
        let eval = evaluator(DisabledAnalysis);
        let rule = length(None, None);
        assert!(eval.evaluate(&rule, &ctx("")).await.passed());

        let at_ceiling = "a".repeat(DEFAULT_MAX_CONTENT_LENGTH);
        assert!(eval.evaluate(&rule, &ctx(&at_ceiling)).await.passed());

        let over = "a".repeat(DEFAULT_MAX_CONTENT_LENGTH + 1);
        let outcome = eval.evaluate(&rule, &ctx(&over)).await;
        assert!(!outcome.passed());
        assert!(outcome.violations()[0].contains("over by 1"));
    }

    #[tokio::test]
    async fn omitted_allowed_roles_exempt_only_admins() {
        let rule: Rule = serde_json::from_str(
            r#"{
                "type": "role_restriction",
                "name": "Admin Function Restriction",
                "restricted_activities": ["policy_management"]
            }"#,
        )
        .unwrap();
        let eval = evaluator(DisabledAnalysis);

        let admin = EvaluationContext::new("x", "admin", "policy_management");
        assert!(eval.evaluate(&rule, &admin).await.passed());

        let user = EvaluationContext::new("x", "user", "policy_management");
        let outcome = eval.evaluate(&rule, &user).await;
        assert!(!outcome.passed());
        assert_eq!(
            outcome.violations(),
            ["role 'user' is not authorized for activity 'policy_management'"]
        );
    }

    #[tokio::test]
    async fn length_counts_characters_not_bytes() {
        let eval = evaluator(DisabledAnalysis);
        assert!(eval.evaluate(&length(None, Some(3)), &ctx("héé")).await.passed());
    }

    #[tokio::test]
    async fn analysis_fails_at_or_above_threshold() {
        let rule = analysis(0.5);

        let outcome = evaluator(FixedScore(0.49)).evaluate(&rule, &ctx("x")).await;
        assert!(outcome.passed());
        assert_eq!(outcome.score(), Some(0.49));

        let outcome = evaluator(FixedScore(0.5)).evaluate(&rule, &ctx("x")).await;
        assert!(!outcome.passed());
        assert_eq!(outcome.actions(), [EnforcementAction::Review]);

        let outcome = evaluator(FixedScore(7.0)).evaluate(&rule, &ctx("x")).await;
        assert_eq!(outcome.score(), Some(1.0));
    }

    #[tokio::test]
    async fn delegate_failures_are_conservative() {
        let rule = analysis(0.9);

        let outcome = evaluator(DisabledAnalysis).evaluate(&rule, &ctx("x")).await;
        assert!(!outcome.passed());
        assert_eq!(outcome.violations(), [ANALYSIS_UNAVAILABLE]);
        assert_eq!(outcome.actions(), [EnforcementAction::Review]);

        let outcome = evaluator(FixedScore(f64::NAN)).evaluate(&rule, &ctx("x")).await;
        assert_eq!(outcome.violations(), [ANALYSIS_UNAVAILABLE]);
    }

    #[tokio::test]
    async fn delegate_timeout_does_not_hang() {
        let outcome = evaluator(NeverReturns).evaluate(&analysis(0.5), &ctx("x")).await;
        assert!(!outcome.passed());
        assert_eq!(outcome.violations(), [ANALYSIS_UNAVAILABLE]);
    }

    #[tokio::test]
    async fn time_window_wraps_midnight() {
        let rule = Rule::with_default_actions(
            "night-shift",
            RuleKind::TimeRestriction {
                start_hour: 22,
                end_hour: 6,
            },
        )
        .unwrap();
        let eval = evaluator(DisabledAnalysis);
        let at = |hour| ctx("x").at(Utc.with_ymd_and_hms(2024, 1, 1, hour, 30, 0).unwrap());

        assert!(eval.evaluate(&rule, &at(23)).await.passed());
        assert!(eval.evaluate(&rule, &at(5)).await.passed());
        let outcome = eval.evaluate(&rule, &at(12)).await;
        assert!(!outcome.passed());
        assert!(outcome.violations()[0].contains("22:00-06:00"));
    }
}
