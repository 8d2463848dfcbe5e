//! Policy evaluation and enforcement for Aegis.
//!
//! Policies bundle typed rules with role and activity applicability. The
//! [`EnforcementEngine`] reads a consistent snapshot of the active policies,
//! evaluates every applicable rule, and folds the outcomes into an
//! [`EnforcementDecision`]. Decisions are handed to an [`AuditSink`] in the
//! background so audit failures never change or delay a decision.

#![warn(missing_docs, clippy::pedantic)]

mod contracts;
mod decision;
mod dispatch;
mod engine;
mod error;
mod evaluator;
mod integrations;
mod policy;
mod rule;
mod store;

pub use contracts::{DEFAULT_ACTIVITY, DEFAULT_USER_ROLE, EnforcementRequest, EvaluationContext};
pub use decision::{EnforcementDecision, PolicyOutcome, RuleOutcome};
pub use dispatch::{
    AuditDispatcher, DEFAULT_MAX_PENDING, DispatchConfig, DispatchError, DispatchResult,
};
pub use engine::{
    EngineBuilder, EngineSettings, EnforcementAggregator, EnforcementEngine, PolicyEngine,
    PolicyEvaluator,
};
pub use error::{PolicyError, PolicyResult};
pub use evaluator::{ANALYSIS_UNAVAILABLE, DEFAULT_ANALYSIS_TIMEOUT, RuleEvaluator};
pub use integrations::{
    AnalysisDelegate, AnalysisError, AuditError, AuditSink, DisabledAnalysis, NoopAuditSink,
    PolicyStore,
};
pub use policy::{LifecycleEvent, Policy, PolicyBuilder, PolicyStatus};
pub use rule::{
    DEFAULT_ALLOWED_ROLE, DEFAULT_MAX_CONTENT_LENGTH, MAX_ANALYSIS_SCORE, MIN_ANALYSIS_SCORE,
    Rule, RuleKind,
};
pub use store::InMemoryPolicyStore;

pub use aegis_primitives::{Applicability, EnforcementAction, PolicyId};
