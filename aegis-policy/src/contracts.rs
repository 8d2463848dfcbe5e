//! Evaluation context and request contracts for enforcement.

use std::collections::BTreeSet;

use aegis_primitives::PolicyId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role assumed when a request does not name one.
pub const DEFAULT_USER_ROLE: &str = "user";
/// Activity assumed when a request does not name one.
pub const DEFAULT_ACTIVITY: &str = "general";

/// Immutable input bundle for a single enforcement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
    content: String,
    user_role: String,
    activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    requested_policy_scope: Option<BTreeSet<String>>,
    timestamp: DateTime<Utc>,
}

impl EvaluationContext {
    /// Creates a context stamped with the current time.
    #[must_use]
    pub fn new(
        content: impl Into<String>,
        user_role: impl Into<String>,
        activity_type: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            user_role: user_role.into(),
            activity_type: activity_type.into(),
            requested_policy_scope: None,
            timestamp: Utc::now(),
        }
    }

    /// Restricts evaluation to the given policy identifiers. Entries are kept
    /// verbatim; those naming no policy simply match nothing.
    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_policy_scope = Some(scope.into_iter().map(Into::into).collect());
        self
    }

    /// Overrides the evaluation timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns the content under evaluation.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the requesting user's role.
    #[must_use]
    pub fn user_role(&self) -> &str {
        &self.user_role
    }

    /// Returns the activity type.
    #[must_use]
    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }

    /// Returns the optional policy scope filter.
    #[must_use]
    pub fn requested_policy_scope(&self) -> Option<&BTreeSet<String>> {
        self.requested_policy_scope.as_ref()
    }

    /// Returns the evaluation timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns `true` when the scope filter is absent or names `id`.
    #[must_use]
    pub fn scope_includes(&self, id: &PolicyId) -> bool {
        self.requested_policy_scope
            .as_ref()
            .is_none_or(|scope| scope.contains(id.as_str()))
    }

    /// Returns a copy with the content replaced by a redaction marker.
    #[must_use]
    pub fn redacted(&self) -> Self {
        self.with_content("[REDACTED]")
    }

    /// Returns a copy carrying `content` instead, keeping every other field.
    #[must_use]
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            user_role: self.user_role.clone(),
            activity_type: self.activity_type.clone(),
            requested_policy_scope: self.requested_policy_scope.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Wire request accepted by the engine entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementRequest {
    /// Content to evaluate.
    #[serde(default)]
    pub content: String,
    /// Requesting user's role.
    #[serde(default = "default_role")]
    pub user_role: String,
    /// Activity being performed.
    #[serde(default = "default_activity")]
    pub activity_type: String,
    /// Optional subset of policy identifiers to evaluate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_scope: Option<Vec<String>>,
}

fn default_role() -> String {
    DEFAULT_USER_ROLE.to_owned()
}

fn default_activity() -> String {
    DEFAULT_ACTIVITY.to_owned()
}

impl From<EnforcementRequest> for EvaluationContext {
    fn from(request: EnforcementRequest) -> Self {
        let context = Self::new(request.content, request.user_role, request.activity_type);
        match request.policy_scope {
            Some(scope) => context.with_scope(scope),
            None => context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_defaults_to_everything() {
        let ctx = EvaluationContext::new("hello", "user", "general");
        assert!(ctx.scope_includes(&PolicyId::new("policy_001").unwrap()));

        let ctx = ctx.with_scope([PolicyId::new("policy_002").unwrap()]);
        assert!(!ctx.scope_includes(&PolicyId::new("policy_001").unwrap()));
        assert!(ctx.scope_includes(&PolicyId::new("policy_002").unwrap()));
    }

    #[test]
    fn request_defaults_match_wire_contract() {
        let request: EnforcementRequest = serde_json::from_str(r#"{"content": "hi"}"#).unwrap();
        assert_eq!(request.user_role, DEFAULT_USER_ROLE);
        assert_eq!(request.activity_type, DEFAULT_ACTIVITY);

        let ctx = EvaluationContext::from(request);
        assert_eq!(ctx.content(), "hi");
        assert!(ctx.requested_policy_scope().is_none());
    }

    #[test]
    fn scope_entries_are_not_validated_as_identifiers() {
        let request: EnforcementRequest = serde_json::from_str(
            r#"{"content": "x", "policy_scope": ["Content Safety Policy", "policy_001"]}"#,
        )
        .unwrap();

        let ctx = EvaluationContext::from(request);
        assert!(ctx.scope_includes(&PolicyId::new("policy_001").unwrap()));
        assert!(!ctx.scope_includes(&PolicyId::new("policy_002").unwrap()));
        assert_eq!(ctx.requested_policy_scope().unwrap().len(), 2);
    }

    #[test]
    fn redaction_keeps_everything_but_content() {
        let ctx = EvaluationContext::new("secret", "analyst", "prompt_submission");
        let redacted = ctx.redacted();
        assert_eq!(redacted.content(), "[REDACTED]");
        assert_eq!(redacted.user_role(), "analyst");
        assert_eq!(redacted.timestamp(), ctx.timestamp());
    }
}
