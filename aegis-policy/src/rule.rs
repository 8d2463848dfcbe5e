//! Typed rules attached to policies.

use std::collections::BTreeSet;

use aegis_primitives::EnforcementAction;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// Lower bound of the analysis score range.
pub const MIN_ANALYSIS_SCORE: f64 = 0.0;
/// Upper bound of the analysis score range.
pub const MAX_ANALYSIS_SCORE: f64 = 1.0;

/// Role exempt from a role restriction that lists no allowed roles.
pub const DEFAULT_ALLOWED_ROLE: &str = "admin";
/// Upper length bound of a content length rule that sets neither bound.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10_000;

const HOURS_PER_DAY: u8 = 24;

/// Type-specific parameters of a rule.
///
/// Each variant carries only the fields relevant to its kind. The wire form is
/// internally tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Case-insensitive term matching against the content.
    ContentFilter {
        /// Terms that must not appear.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        blocked_terms: Vec<String>,
        /// Terms that must all appear.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required_terms: Vec<String>,
    },
    /// Restricts named activities to a set of roles.
    RoleRestriction {
        /// Roles exempt from the restriction. Defaults to `admin`.
        #[serde(default = "default_allowed_roles")]
        allowed_roles: BTreeSet<String>,
        /// Activities the restriction applies to.
        restricted_activities: BTreeSet<String>,
    },
    /// Bounds on the character length of the content. With neither bound set
    /// the content is held to `0..=DEFAULT_MAX_CONTENT_LENGTH`.
    ContentLength {
        /// Inclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        /// Inclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    /// Delegates scoring to an external analysis collaborator.
    AiAnalysis {
        /// Analysis flavour passed to the delegate (e.g. `toxicity`).
        #[serde(default = "default_analysis_type")]
        analysis_type: String,
        /// Scores at or above this value fail the rule.
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    /// Allows activity only inside a daily UTC hour window.
    TimeRestriction {
        /// First allowed hour (inclusive, 0-23).
        start_hour: u8,
        /// End of the window (exclusive, 0-23). Wraps past midnight when lower
        /// than `start_hour`.
        end_hour: u8,
    },
}

fn default_allowed_roles() -> BTreeSet<String> {
    BTreeSet::from([DEFAULT_ALLOWED_ROLE.to_owned()])
}

fn default_analysis_type() -> String {
    "general".to_owned()
}

const fn default_threshold() -> f64 {
    0.5
}

impl RuleKind {
    /// Returns the wire label of the rule kind.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ContentFilter { .. } => "content_filter",
            Self::RoleRestriction { .. } => "role_restriction",
            Self::ContentLength { .. } => "content_length",
            Self::AiAnalysis { .. } => "ai_analysis",
            Self::TimeRestriction { .. } => "time_restriction",
        }
    }

    /// Actions applied when a rule document does not list any.
    #[must_use]
    pub const fn default_actions(&self) -> &'static [EnforcementAction] {
        match self {
            Self::ContentFilter { .. }
            | Self::ContentLength { .. }
            | Self::TimeRestriction { .. } => &[EnforcementAction::Warn],
            Self::RoleRestriction { .. } => &[EnforcementAction::Block],
            Self::AiAnalysis { .. } => &[EnforcementAction::Review],
        }
    }

    /// Returns `true` when evaluation requires the external analysis delegate.
    #[must_use]
    pub const fn needs_analysis(&self) -> bool {
        matches!(self, Self::AiAnalysis { .. })
    }

    fn validate(&self, rule: &str) -> PolicyResult<()> {
        let invalid = |reason: &str| Err(PolicyError::malformed(rule, reason));
        match self {
            Self::ContentFilter {
                blocked_terms,
                required_terms,
            } => {
                if blocked_terms.is_empty() && required_terms.is_empty() {
                    return invalid("content filter lists no blocked or required terms");
                }
                if blocked_terms
                    .iter()
                    .chain(required_terms)
                    .any(|term| term.trim().is_empty())
                {
                    return invalid("content filter terms must not be blank");
                }
            }
            Self::RoleRestriction {
                allowed_roles,
                restricted_activities,
            } => {
                if restricted_activities.is_empty() {
                    return invalid("role restriction names no restricted activities");
                }
                if allowed_roles
                    .iter()
                    .chain(restricted_activities)
                    .any(|name| name.trim().is_empty())
                {
                    return invalid("role restriction entries must not be blank");
                }
            }
            Self::ContentLength {
                min_length: Some(min),
                max_length: Some(max),
            } if min > max => {
                return Err(PolicyError::malformed(
                    rule,
                    format!("min_length {min} exceeds max_length {max}"),
                ));
            }
            Self::ContentLength { .. } => {}
            Self::AiAnalysis {
                analysis_type,
                threshold,
            } => {
                if analysis_type.trim().is_empty() {
                    return invalid("analysis_type must not be blank");
                }
                if !threshold.is_finite()
                    || !(MIN_ANALYSIS_SCORE..=MAX_ANALYSIS_SCORE).contains(threshold)
                {
                    return Err(PolicyError::malformed(
                        rule,
                        format!(
                            "threshold {threshold} outside score range \
                             {MIN_ANALYSIS_SCORE}..={MAX_ANALYSIS_SCORE}"
                        ),
                    ));
                }
            }
            Self::TimeRestriction {
                start_hour,
                end_hour,
            } => {
                if *start_hour >= HOURS_PER_DAY || *end_hour >= HOURS_PER_DAY {
                    return invalid("time restriction hours must be within 0-23");
                }
                if start_hour == end_hour {
                    return invalid("time restriction window is empty");
                }
            }
        }
        Ok(())
    }
}

/// A single named predicate with the actions applied when it fails.
///
/// Rules are validated on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleDocument", into = "RuleDocument")]
pub struct Rule {
    name: String,
    kind: RuleKind,
    enforcement_actions: Vec<EnforcementAction>,
}

impl Rule {
    /// Creates a rule after validating its name, parameters, and actions.
    ///
    /// Duplicate actions are dropped, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MalformedPolicy`] when the name is blank, the
    /// action list is empty, or the parameters are inconsistent with the kind.
    pub fn new<I>(name: impl Into<String>, kind: RuleKind, actions: I) -> PolicyResult<Self>
    where
        I: IntoIterator<Item = EnforcementAction>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::malformed(
                kind.label(),
                "rule name cannot be empty",
            ));
        }

        let mut enforcement_actions = Vec::new();
        for action in actions {
            if !enforcement_actions.contains(&action) {
                enforcement_actions.push(action);
            }
        }
        if enforcement_actions.is_empty() {
            return Err(PolicyError::malformed(
                name,
                "rule must declare at least one enforcement action",
            ));
        }

        kind.validate(&name)?;

        Ok(Self {
            name,
            kind,
            enforcement_actions,
        })
    }

    /// Creates a rule using the default actions for its kind.
    ///
    /// # Errors
    ///
    /// See [`Rule::new`].
    pub fn with_default_actions(name: impl Into<String>, kind: RuleKind) -> PolicyResult<Self> {
        let actions = kind.default_actions().to_vec();
        Self::new(name, kind, actions)
    }

    /// Returns the rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type-specific parameters.
    #[must_use]
    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    /// Returns the actions applied on failure, in declaration order.
    #[must_use]
    pub fn enforcement_actions(&self) -> &[EnforcementAction] {
        &self.enforcement_actions
    }

    pub(crate) fn revalidate(&self) -> PolicyResult<()> {
        self.kind.validate(&self.name)
    }
}

#[derive(Serialize, Deserialize)]
struct RuleDocument {
    name: String,
    #[serde(flatten)]
    kind: RuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enforcement_actions: Option<Vec<EnforcementAction>>,
}

impl TryFrom<RuleDocument> for Rule {
    type Error = PolicyError;

    fn try_from(doc: RuleDocument) -> PolicyResult<Self> {
        match doc.enforcement_actions {
            Some(actions) => Self::new(doc.name, doc.kind, actions),
            None => Self::with_default_actions(doc.name, doc.kind),
        }
    }
}

impl From<Rule> for RuleDocument {
    fn from(rule: Rule) -> Self {
        Self {
            name: rule.name,
            kind: rule.kind,
            enforcement_actions: Some(rule.enforcement_actions),
        }
    }
}
