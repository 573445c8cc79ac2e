//! Role type definition
//!
//! Roles are passed in by the caller and carried through the pipeline.
//! The pipeline never verifies them; it only records which role a
//! capability action declares as sufficient.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller role, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access
    #[default]
    Viewer,
    /// Can run analyses and scans
    Operator,
    /// Full access, including destructive operations
    Admin,
}

impl Role {
    /// Whether this role meets the given requirement.
    pub fn allows(&self, required: Role) -> bool {
        *self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
