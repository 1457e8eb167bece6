//! Directory department (organizational unit) representation.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dn::DistinguishedName;

/// A department, stored as an organizational unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    /// Organizational unit name.
    pub ou: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Login name of the managing user, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    /// Login names of the department's members.
    #[serde(default)]
    pub members: Vec<String>,
    /// Repositories assigned to the department.
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Distinguished name of the entry.
    pub dn: DistinguishedName,
}

impl Department {
    /// Returns the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Input for creating a department.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDepartmentInput {
    /// Organizational unit name.
    #[validate(length(min = 1, max = 64))]
    pub ou: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Login name of the managing user.
    #[serde(default)]
    pub manager: Option<String>,
    /// Repositories to assign at creation time.
    #[serde(default)]
    pub repositories: Vec<String>,
}
