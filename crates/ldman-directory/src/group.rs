//! Directory group representation.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dn::DistinguishedName;

/// A directory group (`groupOfNames` + `posixGroup`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group name (`cn` attribute).
    pub cn: String,
    /// POSIX group identifier.
    pub gid_number: u32,
    /// Login names of the group's members.
    #[serde(default)]
    pub members: Vec<String>,
    /// Distinguished name of the entry.
    pub dn: DistinguishedName,
}

impl Group {
    /// Returns true if the user is a member (case-insensitive).
    #[must_use]
    pub fn has_member(&self, uid: &str) -> bool {
        self.members.iter().any(|m| m.eq_ignore_ascii_case(uid))
    }
}

/// Input for creating a group.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupInput {
    /// Group name.
    #[validate(length(min = 1, max = 64))]
    pub cn: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}
