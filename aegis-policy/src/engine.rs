//! Policy evaluation, aggregation, and the engine entry point.

use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::contracts::{EnforcementRequest, EvaluationContext};
use crate::decision::{EnforcementDecision, PolicyOutcome};
use crate::dispatch::{AuditDispatcher, DispatchConfig};
use crate::error::PolicyResult;
use crate::evaluator::{DEFAULT_ANALYSIS_TIMEOUT, RuleEvaluator};
use crate::integrations::{
    AnalysisDelegate, AuditSink, DisabledAnalysis, NoopAuditSink, PolicyStore,
};
use crate::policy::Policy;

/// Trait implemented by enforcement engines.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Produces the enforcement decision for the supplied context.
    async fn decide(&self, context: EvaluationContext) -> PolicyResult<EnforcementDecision>;
}

/// Runs every rule of a policy and combines the outcomes.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    rules: RuleEvaluator,
}

impl PolicyEvaluator {
    /// Creates a policy evaluator backed by `rules`.
    #[must_use]
    pub const fn new(rules: RuleEvaluator) -> Self {
        Self { rules }
    }

    /// Returns the underlying rule evaluator.
    #[must_use]
    pub const fn rule_evaluator(&self) -> &RuleEvaluator {
        &self.rules
    }

    /// Evaluates every rule of `policy` without short-circuiting. Rules run
    /// concurrently; outcomes keep declaration order.
    pub async fn evaluate(&self, policy: &Policy, context: &EvaluationContext) -> PolicyOutcome {
        let rule_outcomes = join_all(
            policy
                .rules()
                .iter()
                .map(|rule| self.rules.evaluate(rule, context)),
        )
        .await;

        let outcome = PolicyOutcome::new(policy.id().clone(), policy.name(), rule_outcomes);
        debug!(
            policy_id = %policy.id(),
            policy = policy.name(),
            allowed = outcome.allowed(),
            "policy evaluated"
        );
        outcome
    }
}

/// Selects applicable policies and combines their outcomes into a decision.
#[derive(Debug, Clone)]
pub struct EnforcementAggregator {
    policies: PolicyEvaluator,
}

impl EnforcementAggregator {
    /// Creates an aggregator backed by `policies`.
    #[must_use]
    pub const fn new(policies: PolicyEvaluator) -> Self {
        Self { policies }
    }

    /// Returns the active policies in `snapshot` that apply to `context`,
    /// narrowed by the context's scope filter. Scope entries that match
    /// nothing are ignored.
    #[must_use]
    pub fn select<'a>(snapshot: &'a [Policy], context: &EvaluationContext) -> Vec<&'a Policy> {
        let selected: Vec<&Policy> = snapshot
            .iter()
            .filter(|policy| policy.status().is_active())
            .filter(|policy| policy.applies_to(context))
            .filter(|policy| context.scope_includes(policy.id()))
            .collect();

        if let Some(scope) = context.requested_policy_scope() {
            for id in scope {
                if !selected.iter().any(|policy| policy.id().as_str() == id) {
                    debug!(
                        policy_id = %id,
                        "scoped policy not active or not applicable, skipping"
                    );
                }
            }
        }
        selected
    }

    /// Decides over an already obtained snapshot. Policies are evaluated
    /// concurrently and reported in snapshot order.
    pub async fn decide(
        &self,
        snapshot: &[Policy],
        context: &EvaluationContext,
    ) -> EnforcementDecision {
        let applicable = Self::select(snapshot, context);
        let outcomes = join_all(
            applicable
                .into_iter()
                .map(|policy| self.policies.evaluate(policy, context)),
        )
        .await;

        EnforcementDecision::new(context, outcomes, Utc::now())
    }
}

/// Tunables for the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Bound on each analysis delegate call.
    pub analysis_timeout: Duration,
    /// Background audit delivery limits.
    pub dispatch: DispatchConfig,
}

impl EngineSettings {
    /// Builds settings from primitive values.
    #[must_use]
    pub const fn new(
        analysis_timeout: Duration,
        audit_concurrency: NonZeroUsize,
        audit_max_attempts: NonZeroU32,
        audit_retry_backoff: Duration,
    ) -> Self {
        Self {
            analysis_timeout,
            dispatch: DispatchConfig::new(
                audit_concurrency,
                audit_max_attempts,
                audit_retry_backoff,
            ),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Enforcement engine: reads a snapshot from the store, decides, and forwards
/// the decision to the audit sink without waiting for it.
#[derive(Clone)]
pub struct EnforcementEngine {
    store: Arc<dyn PolicyStore>,
    aggregator: EnforcementAggregator,
    audit: AuditDispatcher,
}

impl std::fmt::Debug for EnforcementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementEngine")
            .field("aggregator", &self.aggregator)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl EnforcementEngine {
    /// Starts building an engine over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn PolicyStore>) -> EngineBuilder {
        EngineBuilder {
            store,
            analysis: Arc::new(DisabledAnalysis),
            audit: Arc::new(NoopAuditSink),
            settings: EngineSettings::default(),
        }
    }

    /// Returns the aggregator used for decisions.
    #[must_use]
    pub const fn aggregator(&self) -> &EnforcementAggregator {
        &self.aggregator
    }

    /// Returns the audit dispatcher.
    #[must_use]
    pub const fn audit(&self) -> &AuditDispatcher {
        &self.audit
    }

    /// Decides whether the content in `context` is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::StoreUnavailable`](crate::PolicyError::StoreUnavailable)
    /// when the store cannot provide a snapshot. No other failure reaches the
    /// caller.
    pub async fn decide(&self, context: EvaluationContext) -> PolicyResult<EnforcementDecision> {
        let snapshot = self.store.active_policies().await?;
        let decision = self.aggregator.decide(&snapshot, &context).await;
        drop(snapshot);

        info!(
            user_role = context.user_role(),
            activity_type = context.activity_type(),
            allowed = decision.allowed(),
            policies = decision.applicable_policies_count(),
            violations = decision.violation_count(),
            "policy enforcement decided"
        );
        for (policy_id, action) in decision.applied_actions() {
            info!(
                policy_id = %policy_id,
                action = %action,
                user_role = context.user_role(),
                activity_type = context.activity_type(),
                "enforcement action applied"
            );
        }

        if let Err(err) = self.audit.dispatch(decision.clone(), context) {
            warn!(error = %err, "audit record dropped");
        }
        Ok(decision)
    }

    /// Decides a wire request.
    ///
    /// # Errors
    ///
    /// See [`EnforcementEngine::decide`].
    pub async fn decide_request(
        &self,
        request: EnforcementRequest,
    ) -> PolicyResult<EnforcementDecision> {
        self.decide(request.into()).await
    }
}

#[async_trait]
impl PolicyEngine for EnforcementEngine {
    async fn decide(&self, context: EvaluationContext) -> PolicyResult<EnforcementDecision> {
        Self::decide(self, context).await
    }
}

/// Builder for [`EnforcementEngine`].
pub struct EngineBuilder {
    store: Arc<dyn PolicyStore>,
    analysis: Arc<dyn AnalysisDelegate>,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl EngineBuilder {
    /// Uses `analysis` for analysis rules. Defaults to [`DisabledAnalysis`].
    #[must_use]
    pub fn analysis(mut self, analysis: Arc<dyn AnalysisDelegate>) -> Self {
        self.analysis = analysis;
        self
    }

    /// Forwards decisions to `sink`. Defaults to [`NoopAuditSink`].
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Overrides the engine settings.
    #[must_use]
    pub const fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> EnforcementEngine {
        let rules = RuleEvaluator::new(self.analysis, self.settings.analysis_timeout);
        EnforcementEngine {
            store: self.store,
            aggregator: EnforcementAggregator::new(PolicyEvaluator::new(rules)),
            audit: AuditDispatcher::new(self.audit, self.settings.dispatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use aegis_primitives::{Applicability, EnforcementAction, PolicyId};

    use super::*;
    use crate::decision::RuleOutcome;
    use crate::error::PolicyError;
    use crate::evaluator::ANALYSIS_UNAVAILABLE;
    use crate::integrations::{AnalysisError, AuditError};
    use crate::rule::{Rule, RuleKind};
    use crate::store::InMemoryPolicyStore;

    struct DelayedScore {
        delay: Duration,
        score: f64,
    }

    #[async_trait]
    impl AnalysisDelegate for DelayedScore {
        async fn score(&self, _content: &str, _analysis_type: &str) -> Result<f64, AnalysisError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.score)
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        decisions: Mutex<Vec<EnforcementDecision>>,
    }

    #[async_trait]
    impl AuditSink for CollectingSink {
        async fn record(
            &self,
            decision: &EnforcementDecision,
            _context: &EvaluationContext,
        ) -> Result<(), AuditError> {
            self.decisions.lock().unwrap().push(decision.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(
            &self,
            _decision: &EnforcementDecision,
            _context: &EvaluationContext,
        ) -> Result<(), AuditError> {
            Err(AuditError::new("journal offline"))
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl PolicyStore for UnavailableStore {
        async fn active_policies(&self) -> PolicyResult<Arc<[Policy]>> {
            Err(PolicyError::store_unavailable("backend down"))
        }
    }

    fn blocked(term: &str) -> Rule {
        Rule::new(
            "blocked terms",
            RuleKind::ContentFilter {
                blocked_terms: vec![term.into()],
                required_terms: Vec::new(),
            },
            [EnforcementAction::Block],
        )
        .unwrap()
    }

    fn min_length(min: usize) -> Rule {
        Rule::new(
            "minimum length",
            RuleKind::ContentLength {
                min_length: Some(min),
                max_length: None,
            },
            [EnforcementAction::Warn],
        )
        .unwrap()
    }

    fn analysis(name: &str) -> Rule {
        Rule::new(
            name,
            RuleKind::AiAnalysis {
                analysis_type: "toxicity".into(),
                threshold: 0.5,
            },
            [EnforcementAction::Review],
        )
        .unwrap()
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings::new(
            Duration::from_millis(50),
            NonZeroUsize::new(4).unwrap(),
            NonZeroU32::new(1).unwrap(),
            Duration::from_millis(1),
        )
    }

    fn engine_over(store: &Arc<InMemoryPolicyStore>) -> EnforcementEngine {
        let store: Arc<dyn PolicyStore> = store.clone();
        EnforcementEngine::builder(store).settings(fast_settings()).build()
    }

    #[tokio::test]
    async fn no_policies_allows_everything() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let decision = engine_over(&store)
            .decide(EvaluationContext::new("anything", "user", "general"))
            .await
            .unwrap();

        assert!(decision.allowed());
        assert!(decision.enforcement_actions().is_empty());
        assert_eq!(decision.applicable_policies_count(), 0);
    }

    #[tokio::test]
    async fn failing_rule_contributes_only_its_actions() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store
            .insert(
                Policy::builder("Safety")
                    .rule(blocked("violence"))
                    .rule(min_length(10))
                    .build_active()
                    .unwrap(),
            )
            .unwrap();

        let decision = engine_over(&store)
            .decide(EvaluationContext::new("ok", "user", "general"))
            .await
            .unwrap();

        assert!(!decision.allowed());
        assert_eq!(
            decision.enforcement_actions(),
            &BTreeSet::from([EnforcementAction::Warn])
        );
        let outcomes = decision.policy_results()[0].rule_outcomes();
        assert!(outcomes[0].passed());
        assert!(!outcomes[1].passed());
        assert!(outcomes[1].violations()[0].starts_with("content too short"));
    }

    #[tokio::test]
    async fn separate_policies_combine_verdicts_and_actions() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let filter = store
            .insert(
                Policy::builder("Harmful content")
                    .rule(blocked("violence"))
                    .build_active()
                    .unwrap(),
            )
            .unwrap();
        let length = store
            .insert(
                Policy::builder("Prompt length")
                    .rule(min_length(10))
                    .build_active()
                    .unwrap(),
            )
            .unwrap();
        let engine = engine_over(&store);

        let decision = engine
            .decide(EvaluationContext::new("ok", "user", "general"))
            .await
            .unwrap();
        assert!(!decision.allowed());
        assert!(decision.policy_results()[0].allowed());
        assert!(!decision.policy_results()[1].allowed());
        assert_eq!(
            decision.enforcement_actions(),
            &BTreeSet::from([EnforcementAction::Warn])
        );
        let applied: Vec<_> = decision.applied_actions().collect();
        assert_eq!(applied, [(&length, EnforcementAction::Warn)]);

        let decision = engine
            .decide(EvaluationContext::new("violence", "user", "general"))
            .await
            .unwrap();
        assert!(!decision.allowed());
        assert!(decision.policy_results().iter().all(|result| !result.allowed()));
        assert_eq!(
            decision.enforcement_actions(),
            &BTreeSet::from([EnforcementAction::Block, EnforcementAction::Warn])
        );
        let applied: Vec<_> = decision.applied_actions().collect();
        assert_eq!(
            applied,
            [
                (&filter, EnforcementAction::Block),
                (&length, EnforcementAction::Warn)
            ]
        );

        let decision = engine
            .decide(EvaluationContext::new("a calm long request", "user", "general"))
            .await
            .unwrap();
        assert!(decision.allowed());
        assert!(decision.enforcement_actions().is_empty());
    }

    #[tokio::test]
    async fn one_failing_policy_denies_the_request() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store
            .insert(Policy::builder("Lenient").rule(min_length(1)).build_active().unwrap())
            .unwrap();
        store
            .insert(Policy::builder("Strict").rule(blocked("secret")).build_active().unwrap())
            .unwrap();

        let decision = engine_over(&store)
            .decide(EvaluationContext::new("the secret plan", "user", "general"))
            .await
            .unwrap();

        assert!(!decision.allowed());
        assert_eq!(decision.applicable_policies_count(), 2);
        assert!(decision.policy_results()[0].allowed());
        assert!(!decision.policy_results()[1].allowed());
        assert_eq!(decision.most_severe_action(), Some(EnforcementAction::Block));
    }

    #[tokio::test]
    async fn lifecycle_changes_are_seen_by_the_next_decision() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let id = store
            .create(Policy::builder("Safety").rule(blocked("violence")))
            .unwrap();
        let engine = engine_over(&store);
        let context = EvaluationContext::new("violence", "user", "general");

        assert!(engine.decide(context.clone()).await.unwrap().allowed());

        store.activate(&id).unwrap();
        assert!(!engine.decide(context.clone()).await.unwrap().allowed());

        store.deactivate(&id).unwrap();
        assert!(engine.decide(context).await.unwrap().allowed());
    }

    #[tokio::test]
    async fn repeated_decisions_agree() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store
            .insert(
                Policy::builder("Safety")
                    .rule(blocked("violence"))
                    .rule(min_length(10))
                    .build_active()
                    .unwrap(),
            )
            .unwrap();
        let engine = engine_over(&store);
        let context = EvaluationContext::new("violence!", "user", "general");

        let first = engine.decide(context.clone()).await.unwrap();
        let second = engine.decide(context).await.unwrap();
        assert!(first.same_outcome(&second));
    }

    #[tokio::test]
    async fn scope_narrows_and_ignores_unknown_ids() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let strict = store
            .insert(Policy::builder("Strict").rule(blocked("secret")).build_active().unwrap())
            .unwrap();
        let lenient = store
            .insert(Policy::builder("Lenient").rule(min_length(1)).build_active().unwrap())
            .unwrap();
        let engine = engine_over(&store);

        let context = EvaluationContext::new("the secret", "user", "general")
            .with_scope([lenient.clone(), PolicyId::new("policy_missing").unwrap()]);
        let decision = engine.decide(context).await.unwrap();
        assert!(decision.allowed());
        assert_eq!(decision.applicable_policies_count(), 1);
        assert_eq!(decision.policy_results()[0].policy_id(), &lenient);

        let context = EvaluationContext::new("the secret", "user", "general").with_scope([strict]);
        assert!(!engine.decide(context).await.unwrap().allowed());
    }

    #[tokio::test]
    async fn policies_for_other_roles_are_skipped() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store
            .insert(
                Policy::builder("Admins only")
                    .roles(Applicability::from_names(["admin"]).unwrap())
                    .rule(blocked("anything"))
                    .build_active()
                    .unwrap(),
            )
            .unwrap();

        let decision = engine_over(&store)
            .decide(EvaluationContext::new("anything", "user", "general"))
            .await
            .unwrap();
        assert!(decision.allowed());
        assert_eq!(decision.applicable_policies_count(), 0);
    }

    #[tokio::test]
    async fn analysis_timeout_still_produces_a_decision() {
        let store: Arc<dyn PolicyStore> = Arc::new(
            InMemoryPolicyStore::from_policies([Policy::builder("AI")
                .rule(analysis("toxicity"))
                .build_active()
                .unwrap()])
            .unwrap(),
        );
        let engine = EnforcementEngine::builder(store)
            .analysis(Arc::new(DelayedScore {
                delay: Duration::from_secs(60),
                score: 0.0,
            }))
            .settings(fast_settings())
            .build();

        let decision = engine
            .decide(EvaluationContext::new("hello", "user", "general"))
            .await
            .unwrap();
        assert!(!decision.allowed());
        assert_eq!(decision.policy_results()[0].violations(), [ANALYSIS_UNAVAILABLE]);
        assert_eq!(
            decision.enforcement_actions(),
            &BTreeSet::from([EnforcementAction::Review])
        );
    }

    #[tokio::test]
    async fn outcomes_keep_declaration_order_under_concurrency() {
        let slow_first = Policy::builder("AI")
            .rule(analysis("first"))
            .rule(min_length(1))
            .rule(analysis("third"))
            .build_active()
            .unwrap();
        let store: Arc<dyn PolicyStore> =
            Arc::new(InMemoryPolicyStore::from_policies([slow_first]).unwrap());
        let engine = EnforcementEngine::builder(store)
            .analysis(Arc::new(DelayedScore {
                delay: Duration::from_millis(20),
                score: 0.1,
            }))
            .settings(fast_settings())
            .build();

        let decision = engine
            .decide(EvaluationContext::new("hello", "user", "general"))
            .await
            .unwrap();
        let names: Vec<&str> = decision.policy_results()[0]
            .rule_outcomes()
            .iter()
            .map(RuleOutcome::rule_name)
            .collect();
        assert_eq!(names, ["first", "minimum length", "third"]);
        assert!(decision.allowed());
    }

    #[tokio::test]
    async fn audit_receives_every_decision() {
        let store: Arc<dyn PolicyStore> = Arc::new(InMemoryPolicyStore::new());
        let sink = Arc::new(CollectingSink::default());
        let engine = EnforcementEngine::builder(store)
            .audit_sink(sink.clone())
            .settings(fast_settings())
            .build();

        let decision = engine
            .decide(EvaluationContext::new("hello", "user", "general"))
            .await
            .unwrap();
        engine.audit().wait_idle().await;

        let recorded = sink.decisions.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].same_outcome(&decision));
    }

    #[tokio::test]
    async fn audit_failure_does_not_change_the_decision() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store
            .insert(Policy::builder("Strict").rule(blocked("secret")).build_active().unwrap())
            .unwrap();
        let store: Arc<dyn PolicyStore> = store;
        let engine = EnforcementEngine::builder(store)
            .audit_sink(Arc::new(BrokenSink))
            .settings(fast_settings())
            .build();

        let decision = engine
            .decide(EvaluationContext::new("secret", "user", "general"))
            .await
            .unwrap();
        engine.audit().wait_idle().await;
        assert!(!decision.allowed());
    }

    #[tokio::test]
    async fn closed_audit_does_not_fail_decisions() {
        let store: Arc<dyn PolicyStore> = Arc::new(InMemoryPolicyStore::new());
        let engine = EnforcementEngine::builder(store).build();
        engine.audit().close();

        let decision = engine
            .decide(EvaluationContext::new("hello", "user", "general"))
            .await
            .unwrap();
        assert!(decision.allowed());
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let engine = EnforcementEngine::builder(Arc::new(UnavailableStore)).build();
        let err = engine
            .decide(EvaluationContext::new("hello", "user", "general"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn wire_requests_use_defaults() {
        let store: Arc<dyn PolicyStore> = Arc::new(InMemoryPolicyStore::new());
        let engine = EnforcementEngine::builder(store).build();
        let request: EnforcementRequest = serde_json::from_str(r#"{"content": "hi"}"#).unwrap();

        let decision = engine.decide_request(request).await.unwrap();
        assert_eq!(decision.user_role(), "user");
        assert_eq!(decision.activity_type(), "general");
    }
}
