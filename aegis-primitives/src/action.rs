//! Enforcement actions attached to rules.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Action requested when a rule fails.
///
/// Variants are declared from most to least severe so that the derived
/// ordering sorts `block` first. The ordering is for presentation only and
/// never influences whether content is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementAction {
    /// Reject the content.
    Block,
    /// Hand the case to an administrator.
    Escalate,
    /// Flag the content for manual review.
    Review,
    /// Issue a warning to the user.
    Warn,
}

impl EnforcementAction {
    /// All actions in severity order, most severe first.
    pub const ALL: [Self; 4] = [Self::Block, Self::Escalate, Self::Review, Self::Warn];

    /// Returns the wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Escalate => "escalate",
            Self::Review => "review",
            Self::Warn => "warn",
        }
    }

    /// Returns a severity rank where higher is more severe.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Block => 3,
            Self::Escalate => 2,
            Self::Review => 1,
            Self::Warn => 0,
        }
    }
}

impl Display for EnforcementAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforcementAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownAction(s.to_owned()))
    }
}
