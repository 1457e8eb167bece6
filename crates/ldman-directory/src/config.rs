//! Configuration for the directory manager.

use crate::dn::{DistinguishedName, Rdn};
use ldman_core::{DirectoryCredentials, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default maximum number of pooled connections.
pub const DEFAULT_POOL_MAX_SIZE: usize = 10;
/// Default time an `acquire` may wait for a free connection (seconds).
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
/// Default transport connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default per-operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;
/// Default health-check acquire timeout (seconds).
///
/// Deliberately shorter than [`DEFAULT_ACQUIRE_TIMEOUT_SECS`] so health
/// probes report quickly and never compete with real traffic for long.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 2;
/// Default interval between background health checks (seconds).
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Configuration for connecting to and operating against the directory.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    url: String,
    credentials: DirectoryCredentials,
    base_dn: DistinguishedName,
    users_base_dn: DistinguishedName,
    groups_base_dn: DistinguishedName,
    departments_base_dn: DistinguishedName,
    pool_max_size: usize,
    acquire_timeout_secs: u64,
    connection_timeout_secs: u64,
    operation_timeout_secs: u64,
    health_check_timeout_secs: u64,
    health_check_interval_secs: u64,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
}

impl DirectoryConfig {
    /// Creates a new configuration.
    ///
    /// The users, groups and departments search bases default to
    /// `ou=users`, `ou=groups` and `ou=departments` under `base_dn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provided URL is invalid.
    pub fn new(
        url: impl Into<String>,
        credentials: DirectoryCredentials,
        base_dn: DistinguishedName,
    ) -> Result<Self> {
        let url_string = url.into();
        Url::parse(&url_string)?;

        Ok(Self {
            url: url_string,
            credentials,
            users_base_dn: base_dn.child(Rdn::new("ou", "users")),
            groups_base_dn: base_dn.child(Rdn::new("ou", "groups")),
            departments_base_dn: base_dn.child(Rdn::new("ou", "departments")),
            base_dn,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            health_check_timeout_secs: DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            tls_verify: true,
            tls_ca_cert: None,
        })
    }

    /// Returns the directory endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the administrative credentials.
    #[must_use]
    pub const fn credentials(&self) -> &DirectoryCredentials {
        &self.credentials
    }

    /// Returns the base distinguished name.
    #[must_use]
    pub const fn base_dn(&self) -> &DistinguishedName {
        &self.base_dn
    }

    /// Returns the user search base.
    #[must_use]
    pub const fn users_base_dn(&self) -> &DistinguishedName {
        &self.users_base_dn
    }

    /// Returns the group search base.
    #[must_use]
    pub const fn groups_base_dn(&self) -> &DistinguishedName {
        &self.groups_base_dn
    }

    /// Returns the department search base.
    #[must_use]
    pub const fn departments_base_dn(&self) -> &DistinguishedName {
        &self.departments_base_dn
    }

    /// Builds the distinguished name of a user entry.
    #[must_use]
    pub fn user_dn(&self, uid: &str) -> DistinguishedName {
        self.users_base_dn.child(Rdn::new("uid", uid))
    }

    /// Builds the distinguished name of a group entry.
    #[must_use]
    pub fn group_dn(&self, cn: &str) -> DistinguishedName {
        self.groups_base_dn.child(Rdn::new("cn", cn))
    }

    /// Builds the distinguished name of a department entry.
    #[must_use]
    pub fn department_dn(&self, ou: &str) -> DistinguishedName {
        self.departments_base_dn.child(Rdn::new("ou", ou))
    }

    /// Returns the placeholder member DN required by `groupOfNames` entries.
    #[must_use]
    pub fn placeholder_member_dn(&self) -> String {
        format!("cn=placeholder,{}", self.groups_base_dn.as_str())
    }

    /// Returns the maximum pool size.
    #[must_use]
    pub const fn pool_max_size(&self) -> usize {
        self.pool_max_size
    }

    /// Returns how long an `acquire` may wait for a free connection.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Returns the transport connection timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the per-operation timeout.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Returns the health-check acquire timeout.
    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    /// Returns the interval between background health checks.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Overrides the user search base.
    #[must_use]
    pub fn with_users_base_dn(mut self, dn: DistinguishedName) -> Self {
        self.users_base_dn = dn;
        self
    }

    /// Overrides the group search base.
    #[must_use]
    pub fn with_groups_base_dn(mut self, dn: DistinguishedName) -> Self {
        self.groups_base_dn = dn;
        self
    }

    /// Overrides the department search base.
    #[must_use]
    pub fn with_departments_base_dn(mut self, dn: DistinguishedName) -> Self {
        self.departments_base_dn = dn;
        self
    }

    /// Overrides the maximum pool size.
    #[must_use]
    pub const fn with_pool_max_size(mut self, size: usize) -> Self {
        self.pool_max_size = size;
        self
    }

    /// Overrides the acquire timeout in seconds.
    #[must_use]
    pub const fn with_acquire_timeout_secs(mut self, seconds: u64) -> Self {
        self.acquire_timeout_secs = seconds;
        self
    }

    /// Overrides the transport connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the per-operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Overrides the health-check acquire timeout in seconds.
    #[must_use]
    pub const fn with_health_check_timeout_secs(mut self, seconds: u64) -> Self {
        self.health_check_timeout_secs = seconds;
        self
    }

    /// Overrides the background health-check interval in seconds.
    #[must_use]
    pub const fn with_health_check_interval_secs(mut self, seconds: u64) -> Self {
        self.health_check_interval_secs = seconds;
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DirectoryConfig {
        let credentials = DirectoryCredentials::new("cn=admin,dc=example,dc=org", "secret");
        let base_dn = DistinguishedName::parse("dc=example,dc=org").unwrap();
        DirectoryConfig::new("ldap://directory.example.org:389", credentials, base_dn).unwrap()
    }

    #[test]
    fn defaults_and_derived_bases() {
        let config = sample_config();
        assert_eq!(config.users_base_dn().as_str(), "ou=users,dc=example,dc=org");
        assert_eq!(
            config.groups_base_dn().as_str(),
            "ou=groups,dc=example,dc=org"
        );
        assert_eq!(
            config.departments_base_dn().as_str(),
            "ou=departments,dc=example,dc=org"
        );
        assert_eq!(config.pool_max_size(), DEFAULT_POOL_MAX_SIZE);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
        assert!(config.health_check_timeout() < config.acquire_timeout());
        assert!(config.tls_verify());
    }

    #[test]
    fn rejects_invalid_url() {
        let credentials = DirectoryCredentials::new("cn=admin,dc=example,dc=org", "secret");
        let base_dn = DistinguishedName::parse("dc=example,dc=org").unwrap();
        assert!(DirectoryConfig::new("not a url", credentials, base_dn).is_err());
    }

    #[test]
    fn builder_overrides() {
        let config = sample_config()
            .with_pool_max_size(3)
            .with_acquire_timeout_secs(1)
            .with_health_check_timeout_secs(1)
            .with_health_check_interval_secs(5)
            .with_tls_verification(false)
            .with_users_base_dn(DistinguishedName::parse("ou=people,dc=example,dc=org").unwrap());

        assert_eq!(config.pool_max_size(), 3);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(1));
        assert_eq!(config.health_check_interval(), Duration::from_secs(5));
        assert!(!config.tls_verify());
        assert_eq!(
            config.user_dn("jdoe").as_str(),
            "uid=jdoe,ou=people,dc=example,dc=org"
        );
    }

    #[test]
    fn entry_dns_escape_values() {
        let config = sample_config();
        assert_eq!(
            config.user_dn("doe, jane").as_str(),
            "uid=doe\\, jane,ou=users,dc=example,dc=org"
        );
        assert_eq!(
            config.group_dn("dev").as_str(),
            "cn=dev,ou=groups,dc=example,dc=org"
        );
        assert_eq!(
            config.department_dn("eng").as_str(),
            "ou=eng,ou=departments,dc=example,dc=org"
        );
    }

    #[test]
    fn placeholder_member_lives_under_groups_base() {
        let config = sample_config();
        assert_eq!(
            config.placeholder_member_dn(),
            "cn=placeholder,ou=groups,dc=example,dc=org"
        );
    }
}
