use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Experiment, ExperimentShare};

/// Level granted to a non-owner by an experiment share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareLevel {
    View,
    Edit,
}

impl ShareLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
        }
    }
}

impl FromStr for ShareLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Self::View),
            "edit" => Ok(Self::Edit),
            other => Err(format!("unknown permission level: {other}")),
        }
    }
}

impl From<ShareLevel> for Access {
    fn from(level: ShareLevel) -> Self {
        match level {
            ShareLevel::View => Access::View,
            ShareLevel::Edit => Access::Edit,
        }
    }
}

/// Effective access a user has to one experiment.
///
/// Ordered so that `Edit > View > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    None,
    View,
    Edit,
}

impl Access {
    /// Returns true if this access level satisfies the required one.
    #[must_use]
    pub fn allows(self, required: Access) -> bool {
        self >= required
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::View => "view",
            Self::Edit => "edit",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an experiment reached a user's visible set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Shared,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "shared" => Ok(Self::Shared),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Resolves the effective access of `requester` to `experiment`.
///
/// `share` must be the share row for `(experiment.id, requester)` if one exists.
/// Owners always get edit access; there is no transitive or group sharing.
#[must_use]
pub fn resolve_permission(
    experiment: &Experiment,
    requester: &str,
    share: Option<&ExperimentShare>,
) -> Access {
    if experiment.owner_id == requester {
        return Access::Edit;
    }

    match share {
        Some(s) if s.experiment_id == experiment.id && s.user_id == requester => {
            s.permission_level.into()
        }
        _ => Access::None,
    }
}
