//! Applicability sets for roles and activities.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sentinel entry meaning "every role" or "every activity".
pub const ALL_SENTINEL: &str = "all";

/// Set of names a policy applies to, or every name.
///
/// On the wire this is a list of strings; a list containing `"all"` decodes to
/// [`Applicability::All`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum Applicability {
    /// Applies to every name.
    #[default]
    All,
    /// Applies only to the listed names.
    Only(BTreeSet<String>),
}

impl Applicability {
    /// Builds an applicability set from names, honouring the `all` sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlankApplicability`] when any entry is blank.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.into();
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::BlankApplicability);
            }
            if name.eq_ignore_ascii_case(ALL_SENTINEL) {
                return Ok(Self::All);
            }
            set.insert(name.to_owned());
        }
        Ok(Self::Only(set))
    }

    /// Returns `true` when `name` is covered.
    #[must_use]
    pub fn covers(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(name),
        }
    }

    /// Returns `true` for the `all` sentinel.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl TryFrom<Vec<String>> for Applicability {
    type Error = Error;

    fn try_from(value: Vec<String>) -> Result<Self> {
        Self::from_names(value)
    }
}

impl From<Applicability> for Vec<String> {
    fn from(value: Applicability) -> Self {
        match value {
            Applicability::All => vec![ALL_SENTINEL.to_owned()],
            Applicability::Only(names) => names.into_iter().collect(),
        }
    }
}
