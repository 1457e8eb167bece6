//! Administrative bind identity for the directory.

use secrecy::{ExposeSecret, SecretString};

/// Credentials for the single administrative directory identity.
///
/// Every pooled connection is bound with this identity. The password is held
/// as a [`SecretString`] so it is never exposed through `Debug` output.
#[derive(Debug, Clone)]
pub struct DirectoryCredentials {
    bind_dn: String,
    bind_password: SecretString,
}

impl DirectoryCredentials {
    /// Creates new administrative credentials.
    ///
    /// # Arguments
    ///
    /// * `bind_dn` - The distinguished name to bind as
    /// * `bind_password` - The bind password
    #[must_use]
    pub fn new(bind_dn: impl Into<String>, bind_password: impl Into<String>) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            bind_password: SecretString::from(bind_password.into()),
        }
    }

    /// Returns the administrative bind distinguished name.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Returns the bind password.
    #[must_use]
    pub fn bind_password(&self) -> &str {
        self.bind_password.expose_secret()
    }
}
