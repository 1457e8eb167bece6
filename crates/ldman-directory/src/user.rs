//! Directory user representation and operation inputs.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dn::DistinguishedName;

/// A directory user with POSIX account attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Login name (`uid` attribute).
    pub uid: String,
    /// Common name.
    pub cn: String,
    /// Surname.
    pub sn: String,
    /// Given name.
    #[serde(default)]
    pub given_name: Option<String>,
    /// Primary email address.
    #[serde(default)]
    pub mail: Option<String>,
    /// Department the user belongs to (`departmentNumber` attribute).
    #[serde(default)]
    pub department: Option<String>,
    /// POSIX user identifier.
    pub uid_number: u32,
    /// POSIX primary group identifier.
    pub gid_number: u32,
    /// Home directory path.
    pub home_directory: String,
    /// Repositories assigned to the user.
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Distinguished name of the entry.
    pub dn: DistinguishedName,
}

impl User {
    /// Returns the preferred display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.cn.is_empty() {
            &self.uid
        } else {
            &self.cn
        }
    }
}

/// Input for creating a new user.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
    /// Login name.
    #[validate(length(min = 1, max = 64))]
    pub uid: String,
    /// Common name.
    #[validate(length(min = 1))]
    pub cn: String,
    /// Surname.
    #[validate(length(min = 1))]
    pub sn: String,
    /// Given name.
    pub given_name: String,
    /// Primary email address.
    #[validate(email)]
    pub mail: String,
    /// Department the user belongs to.
    #[validate(length(min = 1))]
    pub department: String,
    /// Initial password.
    #[validate(length(min = 8))]
    #[serde(skip_serializing)]
    pub password: String,
    /// Repositories to assign at creation time.
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// Input for updating a user; only provided fields are replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserInput {
    /// Login name of the user to update.
    pub uid: String,
    /// Replacement common name.
    #[serde(default)]
    pub cn: Option<String>,
    /// Replacement surname.
    #[serde(default)]
    pub sn: Option<String>,
    /// Replacement given name.
    #[serde(default)]
    pub given_name: Option<String>,
    /// Replacement email address.
    #[serde(default)]
    pub mail: Option<String>,
    /// Replacement department.
    #[serde(default)]
    pub department: Option<String>,
    /// Replacement password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Replacement repository list.
    #[serde(default)]
    pub repositories: Option<Vec<String>>,
}

/// Optional filters for user searches; set fields are AND-composed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSearchFilter {
    /// Exact department match.
    #[serde(default)]
    pub department: Option<String>,
    /// Substring match on the email address.
    #[serde(default)]
    pub mail: Option<String>,
    /// Substring match on the common name.
    #[serde(default)]
    pub cn: Option<String>,
}

impl UserSearchFilter {
    /// Returns true if no filter fields are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.department.is_none() && self.mail.is_none() && self.cn.is_none()
    }
}
