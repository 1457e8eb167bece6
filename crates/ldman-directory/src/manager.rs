//! Directory manager: pooled CRUD operations for users, departments and
//! groups, plus the stats and health surface.

use crate::alloc::IdAllocator;
use crate::config::DirectoryConfig;
use crate::department::{CreateDepartmentInput, Department};
use crate::dn::DistinguishedName;
use crate::group::{CreateGroupInput, Group};
use crate::pool::{DirectoryPool, PooledConnection};
use crate::session::{
    escape_filter_value, DirectoryModification, LdapConnector, LdapEntry, RealLdapConnector,
    SearchScope,
};
use crate::user::{CreateUserInput, UpdateUserInput, User, UserSearchFilter};
use crate::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use ldman_core::{Error, HealthStatus, PoolStats};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

const USER_ATTRIBUTES: &[&str] = &[
    "uid",
    "cn",
    "sn",
    "givenName",
    "mail",
    "departmentNumber",
    "uidNumber",
    "gidNumber",
    "homeDirectory",
    "githubRepository",
];

const DEPARTMENT_ATTRIBUTES: &[&str] = &["ou", "description", "manager", "githubRepository"];

const GROUP_ATTRIBUTES: &[&str] = &["cn", "gidNumber", "member"];

/// Entry point for every directory-facing operation.
///
/// Owns the connection pool and the identifier allocator; both are created
/// once by [`connect`](Self::connect) and shared by all callers, which never
/// coordinate locking themselves.
pub struct DirectoryManager {
    config: Arc<DirectoryConfig>,
    pool: DirectoryPool,
    allocator: IdAllocator,
    connector: Arc<dyn LdapConnector>,
}

impl DirectoryManager {
    /// Connects to the directory and seeds the identifier allocator from the
    /// current maxima of `uidNumber`/`gidNumber` in the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`]/[`Error::Auth`] when the directory is
    /// unreachable or rejects the administrative bind, or the scan's error.
    pub async fn connect(config: DirectoryConfig) -> Result<Self> {
        let config = Arc::new(config);
        let connector: Arc<dyn LdapConnector> =
            Arc::new(RealLdapConnector::new(config.clone()));
        Self::init(config, connector).await
    }

    #[cfg(test)]
    pub(crate) async fn with_connector(
        config: DirectoryConfig,
        connector: Arc<dyn LdapConnector>,
    ) -> Result<Self> {
        Self::init(Arc::new(config), connector).await
    }

    async fn init(config: Arc<DirectoryConfig>, connector: Arc<dyn LdapConnector>) -> Result<Self> {
        let pool = DirectoryPool::new(config.clone(), connector.clone());
        let (max_uid, max_gid) = scan_max_identifiers(&pool, config.base_dn().as_str()).await?;
        info!("seeding identifier allocator above uidNumber {max_uid}, gidNumber {max_gid}");
        Ok(Self {
            config,
            pool,
            allocator: IdAllocator::seed(max_uid, max_gid),
            connector,
        })
    }

    /// Returns the configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &DirectoryPool {
        &self.pool
    }

    /// Reserves the next free `uidNumber`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocatorExhausted`] once the space is spent.
    pub fn next_uid(&self) -> Result<u32> {
        self.allocator.next_uid()
    }

    /// Reserves the next free `gidNumber`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocatorExhausted`] once the space is spent.
    pub fn next_gid(&self) -> Result<u32> {
        self.allocator.next_gid()
    }

    /// Runs `op` on a pooled connection, releasing it on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the callback's error unmodified, or
    /// [`Error::PoolTimeout`]/[`Error::PoolClosed`] if acquisition failed.
    pub async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut PooledConnection) -> BoxFuture<'c, Result<T>>,
    {
        self.pool.with_connection(op).await
    }

    /// Returns a consistent snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Verifies that a connection can be acquired and used.
    ///
    /// Uses the dedicated short health-check timeout so a probe never
    /// competes with real traffic for long, and releases the connection
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns the acquisition or read error.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire_timeout(self.config.health_check_timeout())
            .await?;
        let result = conn
            .search("", SearchScope::Base, "(objectClass=*)", &["1.1"])
            .await
            .map(|_| ());
        self.pool.release(conn).await;
        result
    }

    /// Returns the health DTO for the service `health` read operation.
    pub async fn health_status(&self) -> HealthStatus {
        match self.health_check().await {
            Ok(()) => HealthStatus::healthy(),
            Err(err) => {
                if err.should_log() {
                    warn!("directory health check failed: {err}");
                }
                HealthStatus::unhealthy()
            }
        }
    }

    /// Shuts down the pool; subsequent operations fail with
    /// [`Error::PoolClosed`].
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- users ----

    /// Creates a new user with freshly allocated POSIX identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for bad input,
    /// [`Error::AlreadyExists`] if the uid is taken, or the directory error.
    pub async fn create_user(&self, input: CreateUserInput) -> Result<User> {
        input.validate()?;

        let uid_number = self.allocator.next_uid()?;
        let gid_number = self.allocator.next_gid()?;
        let user_dn = self.config.user_dn(&input.uid);

        info!(
            "creating user `{}` in `{}` with uidNumber {uid_number}",
            input.uid, input.department
        );

        let mut attributes: Vec<(String, Vec<String>)> = vec![
            (
                "objectClass".to_string(),
                vec![
                    "inetOrgPerson".to_string(),
                    "posixAccount".to_string(),
                    "shadowAccount".to_string(),
                    "extensibleObject".to_string(),
                ],
            ),
            ("uid".to_string(), vec![input.uid.clone()]),
            ("cn".to_string(), vec![input.cn.clone()]),
            ("sn".to_string(), vec![input.sn.clone()]),
            ("givenName".to_string(), vec![input.given_name.clone()]),
            ("mail".to_string(), vec![input.mail.clone()]),
            (
                "departmentNumber".to_string(),
                vec![input.department.clone()],
            ),
            ("uidNumber".to_string(), vec![uid_number.to_string()]),
            ("gidNumber".to_string(), vec![gid_number.to_string()]),
            (
                "homeDirectory".to_string(),
                vec![format!("/home/{}", input.uid)],
            ),
            ("userPassword".to_string(), vec![input.password.clone()]),
        ];
        if !input.repositories.is_empty() {
            attributes.push(("githubRepository".to_string(), input.repositories.clone()));
        }

        let dn = user_dn.as_str().to_string();
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.add(&dn, attributes).await }.boxed()
            })
            .await?;

        info!("user `{}` created", input.uid);
        self.fetch_user(&input.uid).await
    }

    /// Retrieves a user by uid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such user exists.
    pub async fn fetch_user(&self, uid: &str) -> Result<User> {
        let filter = format!("(uid={})", escape_filter_value(uid));
        let base = self.config.users_base_dn().as_str().to_string();

        let entries = self
            .pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move {
                    conn.search(&base, SearchScope::OneLevel, &filter, USER_ATTRIBUTES)
                        .await
                }
                .boxed()
            })
            .await?;

        entries
            .first()
            .map(parse_user_entry)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("user `{uid}`")))
    }

    /// Lists users, optionally narrowed by the search filter.
    ///
    /// # Errors
    ///
    /// Returns the directory error.
    pub async fn list_users(&self, filter: &UserSearchFilter) -> Result<Vec<User>> {
        let filter_str = user_filter_string(filter);
        let base = self.config.users_base_dn().as_str().to_string();

        let entries = self
            .pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move {
                    conn.search(&base, SearchScope::OneLevel, &filter_str, USER_ATTRIBUTES)
                        .await
                }
                .boxed()
            })
            .await?;

        Ok(parse_entries(&entries, parse_user_entry, "user"))
    }

    /// Updates a user; only fields present in the input are replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such user exists, or the directory
    /// error.
    pub async fn update_user(&self, input: UpdateUserInput) -> Result<User> {
        let mut modifications = Vec::new();
        let mut replace = |attribute: &str, value: Option<&String>| {
            if let Some(value) = value {
                modifications.push(DirectoryModification::Replace {
                    attribute: attribute.to_string(),
                    values: vec![value.clone()],
                });
            }
        };
        replace("cn", input.cn.as_ref());
        replace("sn", input.sn.as_ref());
        replace("givenName", input.given_name.as_ref());
        replace("mail", input.mail.as_ref());
        replace("departmentNumber", input.department.as_ref());
        replace("userPassword", input.password.as_ref());
        if let Some(repositories) = &input.repositories {
            modifications.push(DirectoryModification::Replace {
                attribute: "githubRepository".to_string(),
                values: repositories.clone(),
            });
        }

        if modifications.is_empty() {
            return self.fetch_user(&input.uid).await;
        }

        info!("updating user `{}`", input.uid);
        let dn = self.config.user_dn(&input.uid).as_str().to_string();
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.modify(&dn, &modifications).await }.boxed()
            })
            .await?;

        self.fetch_user(&input.uid).await
    }

    /// Deletes a user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such user exists.
    pub async fn delete_user(&self, uid: &str) -> Result<()> {
        info!("deleting user `{uid}`");
        let dn = self.config.user_dn(uid).as_str().to_string();
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.delete(&dn).await }.boxed()
            })
            .await
    }

    /// Authenticates a user by binding with their credentials.
    ///
    /// Uses a dedicated connection so the pooled sessions always stay bound
    /// as the administrative identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown users and [`Error::Auth`] for
    /// rejected credentials.
    pub async fn authenticate(&self, uid: &str, password: &str) -> Result<User> {
        let user = self.fetch_user(uid).await?;

        let mut session = self.connector.connect().await?;
        let bind = session.simple_bind(user.dn.as_str(), password).await;
        let _ = session.unbind().await;

        match bind {
            Ok(()) => {
                info!("user `{uid}` authenticated");
                Ok(user)
            }
            Err(err) => {
                warn!("authentication failed for `{uid}`");
                Err(err)
            }
        }
    }

    // ---- departments ----

    /// Creates a department (organizational unit).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for bad input or the directory error.
    pub async fn create_department(&self, input: CreateDepartmentInput) -> Result<Department> {
        input.validate()?;

        let dept_dn = self.config.department_dn(&input.ou);
        info!("creating department `{}`", input.ou);

        let mut attributes: Vec<(String, Vec<String>)> = vec![
            (
                "objectClass".to_string(),
                vec![
                    "organizationalUnit".to_string(),
                    "extensibleObject".to_string(),
                ],
            ),
            ("ou".to_string(), vec![input.ou.clone()]),
        ];
        if let Some(description) = &input.description {
            if !description.is_empty() {
                attributes.push(("description".to_string(), vec![description.clone()]));
            }
        }
        if let Some(manager) = &input.manager {
            if !manager.is_empty() {
                let manager_dn = self.config.user_dn(manager);
                attributes.push(("manager".to_string(), vec![manager_dn.as_str().to_string()]));
            }
        }
        if !input.repositories.is_empty() {
            attributes.push(("githubRepository".to_string(), input.repositories.clone()));
        }

        let dn = dept_dn.as_str().to_string();
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.add(&dn, attributes).await }.boxed()
            })
            .await?;

        info!("department `{}` created", input.ou);
        self.fetch_department(&input.ou).await
    }

    /// Retrieves a department by ou, with its member list populated from the
    /// users carrying that department.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such department exists.
    pub async fn fetch_department(&self, ou: &str) -> Result<Department> {
        let filter = format!("(ou={})", escape_filter_value(ou));
        let base = self.config.departments_base_dn().as_str().to_string();

        let entries = self
            .pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move {
                    conn.search(&base, SearchScope::OneLevel, &filter, DEPARTMENT_ATTRIBUTES)
                        .await
                }
                .boxed()
            })
            .await?;

        let mut department = entries
            .first()
            .map(parse_department_entry)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("department `{ou}`")))?;

        // member lookup happens on its own pooled connection, after the
        // entry search released its own
        match self.users_by_department(ou).await {
            Ok(users) => department.members = users.into_iter().map(|user| user.uid).collect(),
            Err(err) => warn!("failed to list members of department `{ou}`: {err}"),
        }

        Ok(department)
    }

    /// Lists all departments with their member lists populated.
    ///
    /// # Errors
    ///
    /// Returns the directory error.
    pub async fn list_departments(&self) -> Result<Vec<Department>> {
        let base = self.config.departments_base_dn().as_str().to_string();

        let entries = self
            .pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move {
                    conn.search(
                        &base,
                        SearchScope::OneLevel,
                        "(objectClass=organizationalUnit)",
                        DEPARTMENT_ATTRIBUTES,
                    )
                    .await
                }
                .boxed()
            })
            .await?;

        let mut departments = parse_entries(&entries, parse_department_entry, "department");
        for department in &mut departments {
            if let Ok(users) = self.users_by_department(&department.ou).await {
                department.members = users.into_iter().map(|user| user.uid).collect();
            }
        }

        Ok(departments)
    }

    /// Deletes a department.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such department exists.
    pub async fn delete_department(&self, ou: &str) -> Result<()> {
        info!("deleting department `{ou}`");
        let dn = self.config.department_dn(ou).as_str().to_string();
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.delete(&dn).await }.boxed()
            })
            .await
    }

    /// Replaces the repository list assigned to a department.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such department exists.
    pub async fn assign_department_repositories(
        &self,
        ou: &str,
        repositories: Vec<String>,
    ) -> Result<()> {
        info!(
            "assigning {} repositories to department `{ou}`",
            repositories.len()
        );
        let dn = self.config.department_dn(ou).as_str().to_string();
        let modifications = vec![DirectoryModification::Replace {
            attribute: "githubRepository".to_string(),
            values: repositories,
        }];
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.modify(&dn, &modifications).await }.boxed()
            })
            .await
    }

    /// Lists the users of one department.
    ///
    /// # Errors
    ///
    /// Returns the directory error.
    pub async fn users_by_department(&self, department: &str) -> Result<Vec<User>> {
        let filter = UserSearchFilter {
            department: Some(department.to_string()),
            ..UserSearchFilter::default()
        };
        self.list_users(&filter).await
    }

    // ---- groups ----

    /// Creates a group with a freshly allocated `gidNumber`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for bad input,
    /// [`Error::AlreadyExists`] if the cn is taken, or the directory error.
    pub async fn create_group(&self, input: CreateGroupInput) -> Result<Group> {
        input.validate()?;

        let gid_number = self.allocator.next_gid()?;
        let group_dn = self.config.group_dn(&input.cn);
        info!("creating group `{}` with gidNumber {gid_number}", input.cn);

        let mut attributes: Vec<(String, Vec<String>)> = vec![
            (
                "objectClass".to_string(),
                vec!["groupOfNames".to_string(), "posixGroup".to_string()],
            ),
            ("cn".to_string(), vec![input.cn.clone()]),
            ("gidNumber".to_string(), vec![gid_number.to_string()]),
            // groupOfNames requires at least one member
            (
                "member".to_string(),
                vec![self.config.placeholder_member_dn()],
            ),
        ];
        if let Some(description) = &input.description {
            if !description.is_empty() {
                attributes.push(("description".to_string(), vec![description.clone()]));
            }
        }

        let dn = group_dn.as_str().to_string();
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.add(&dn, attributes).await }.boxed()
            })
            .await?;

        info!("group `{}` created", input.cn);
        self.fetch_group(&input.cn).await
    }

    /// Retrieves a group by cn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such group exists.
    pub async fn fetch_group(&self, cn: &str) -> Result<Group> {
        let filter = format!("(cn={})", escape_filter_value(cn));
        let base = self.config.groups_base_dn().as_str().to_string();

        let entries = self
            .pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move {
                    conn.search(&base, SearchScope::OneLevel, &filter, GROUP_ATTRIBUTES)
                        .await
                }
                .boxed()
            })
            .await?;

        entries
            .first()
            .map(parse_group_entry)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("group `{cn}`")))
    }

    /// Lists all groups.
    ///
    /// # Errors
    ///
    /// Returns the directory error.
    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let base = self.config.groups_base_dn().as_str().to_string();

        let entries = self
            .pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move {
                    conn.search(
                        &base,
                        SearchScope::OneLevel,
                        "(objectClass=groupOfNames)",
                        GROUP_ATTRIBUTES,
                    )
                    .await
                }
                .boxed()
            })
            .await?;

        Ok(parse_entries(&entries, parse_group_entry, "group"))
    }

    /// Adds a user to a group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the group does not exist.
    pub async fn add_user_to_group(&self, uid: &str, group_cn: &str) -> Result<()> {
        info!("adding user `{uid}` to group `{group_cn}`");
        let user_dn = self.config.user_dn(uid).as_str().to_string();
        let dn = self.config.group_dn(group_cn).as_str().to_string();
        let modifications = vec![DirectoryModification::Add {
            attribute: "member".to_string(),
            values: vec![user_dn],
        }];
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.modify(&dn, &modifications).await }.boxed()
            })
            .await
    }

    /// Removes a user from a group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the group does not exist.
    pub async fn remove_user_from_group(&self, uid: &str, group_cn: &str) -> Result<()> {
        info!("removing user `{uid}` from group `{group_cn}`");
        let user_dn = self.config.user_dn(uid).as_str().to_string();
        let dn = self.config.group_dn(group_cn).as_str().to_string();
        let modifications = vec![DirectoryModification::Delete {
            attribute: "member".to_string(),
            values: vec![user_dn],
        }];
        self.pool
            .with_connection(move |conn: &mut PooledConnection| {
                async move { conn.modify(&dn, &modifications).await }.boxed()
            })
            .await
    }
}

/// Scans the tree for the current maximum `uidNumber`/`gidNumber`.
///
/// The result feeds the allocator exactly once, at startup; creates racing a
/// restart are a known, accepted window (see DESIGN.md).
async fn scan_max_identifiers(pool: &DirectoryPool, base_dn: &str) -> Result<(u32, u32)> {
    let base_dn = base_dn.to_string();
    pool.with_connection(move |conn: &mut PooledConnection| {
        async move {
            let uid_entries = conn
                .search(&base_dn, SearchScope::Subtree, "(uidNumber=*)", &["uidNumber"])
                .await?;
            let gid_entries = conn
                .search(&base_dn, SearchScope::Subtree, "(gidNumber=*)", &["gidNumber"])
                .await?;

            let max_uid = uid_entries
                .iter()
                .filter_map(|entry| entry.u32_value("uidNumber"))
                .max()
                .unwrap_or(0);
            let max_gid = gid_entries
                .iter()
                .filter_map(|entry| entry.u32_value("gidNumber"))
                .max()
                .unwrap_or(0);

            Ok((max_uid, max_gid))
        }
        .boxed()
    })
    .await
}

fn user_filter_string(filter: &UserSearchFilter) -> String {
    let mut clauses = vec!["(objectClass=inetOrgPerson)".to_string()];
    if let Some(department) = &filter.department {
        clauses.push(format!(
            "(departmentNumber={})",
            escape_filter_value(department)
        ));
    }
    if let Some(mail) = &filter.mail {
        clauses.push(format!("(mail=*{}*)", escape_filter_value(mail)));
    }
    if let Some(cn) = &filter.cn {
        clauses.push(format!("(cn=*{}*)", escape_filter_value(cn)));
    }

    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        format!("(&{})", clauses.concat())
    }
}

fn parse_entries<T>(
    entries: &[LdapEntry],
    parse: impl Fn(&LdapEntry) -> Result<T>,
    kind: &str,
) -> Vec<T> {
    entries
        .iter()
        .filter_map(|entry| match parse(entry) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("skipping malformed {kind} entry `{}`: {err}", entry.dn);
                None
            }
        })
        .collect()
}

fn parse_user_entry(entry: &LdapEntry) -> Result<User> {
    let dn = DistinguishedName::parse(&entry.dn)?;
    let uid = entry
        .first("uid")
        .ok_or_else(|| Error::InvalidRequest("user entry missing `uid`".to_string()))?
        .to_string();

    Ok(User {
        cn: entry.first("cn").unwrap_or_default().to_string(),
        sn: entry.first("sn").unwrap_or_default().to_string(),
        given_name: entry.first("givenName").map(str::to_owned),
        mail: entry.first("mail").map(str::to_owned),
        department: entry.first("departmentNumber").map(str::to_owned),
        uid_number: entry.u32_value("uidNumber").unwrap_or(0),
        gid_number: entry.u32_value("gidNumber").unwrap_or(0),
        home_directory: entry.first("homeDirectory").unwrap_or_default().to_string(),
        repositories: entry
            .values("githubRepository")
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        uid,
        dn,
    })
}

fn parse_department_entry(entry: &LdapEntry) -> Result<Department> {
    let dn = DistinguishedName::parse(&entry.dn)?;
    let ou = entry
        .first("ou")
        .ok_or_else(|| Error::InvalidRequest("department entry missing `ou`".to_string()))?
        .to_string();

    // the manager attribute stores a full DN; expose only the uid
    let manager = entry.first("manager").and_then(|manager_dn| {
        DistinguishedName::parse(manager_dn)
            .ok()
            .and_then(|parsed| parsed.get("uid").map(str::to_owned))
    });

    Ok(Department {
        ou,
        description: entry.first("description").map(str::to_owned),
        manager,
        members: Vec::new(),
        repositories: entry
            .values("githubRepository")
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        dn,
    })
}

fn parse_group_entry(entry: &LdapEntry) -> Result<Group> {
    let dn = DistinguishedName::parse(&entry.dn)?;
    let cn = entry
        .first("cn")
        .ok_or_else(|| Error::InvalidRequest("group entry missing `cn`".to_string()))?
        .to_string();

    let members = entry
        .values("member")
        .map(|values| {
            values
                .iter()
                .filter(|member_dn| !member_dn.contains("placeholder"))
                .filter_map(|member_dn| match DistinguishedName::parse(member_dn) {
                    Ok(parsed) => parsed.get("uid").map(str::to_owned),
                    Err(err) => {
                        warn!("failed to parse member DN `{member_dn}`: {err}");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Group {
        cn,
        gid_number: entry.u32_value("gidNumber").unwrap_or(0),
        members,
        dn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LdapSession, MockLdapSession};
    use async_trait::async_trait;
    use ldman_core::DirectoryCredentials;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type SearchHandler = Arc<dyn Fn(&str, &str) -> Result<Vec<LdapEntry>> + Send + Sync>;

    fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> LdapEntry {
        let attributes: HashMap<String, Vec<String>> = attrs
            .iter()
            .map(|(name, values)| {
                (
                    (*name).to_string(),
                    values.iter().map(|v| (*v).to_string()).collect(),
                )
            })
            .collect();
        LdapEntry {
            dn: dn.to_string(),
            attributes,
        }
    }

    fn test_config() -> DirectoryConfig {
        let credentials = DirectoryCredentials::new("cn=admin,dc=example,dc=org", "secret");
        let base_dn = DistinguishedName::parse("dc=example,dc=org").unwrap();
        DirectoryConfig::new("ldap://directory.example.org", credentials, base_dn)
            .unwrap()
            .with_acquire_timeout_secs(1)
            .with_health_check_timeout_secs(1)
    }

    /// Connector producing sessions that answer searches via `handler` and
    /// record every write so tests can assert on the requests sent.
    struct ScriptedConnector {
        handler: SearchHandler,
        adds: Arc<Mutex<Vec<(String, Vec<(String, Vec<String>)>)>>>,
        modifies: Arc<Mutex<Vec<(String, Vec<DirectoryModification>)>>>,
        deletes: Arc<Mutex<Vec<String>>>,
        user_binds: Arc<Mutex<Vec<(String, String)>>>,
        fail_user_bind: bool,
    }

    impl ScriptedConnector {
        fn new(handler: impl Fn(&str, &str) -> Result<Vec<LdapEntry>> + Send + Sync + 'static) -> Self {
            Self {
                handler: Arc::new(handler),
                adds: Arc::new(Mutex::new(Vec::new())),
                modifies: Arc::new(Mutex::new(Vec::new())),
                deletes: Arc::new(Mutex::new(Vec::new())),
                user_binds: Arc::new(Mutex::new(Vec::new())),
                fail_user_bind: false,
            }
        }

        fn rejecting_user_binds(mut self) -> Self {
            self.fail_user_bind = true;
            self
        }
    }

    #[async_trait]
    impl LdapConnector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn LdapSession>> {
            let mut session = MockLdapSession::new();

            let handler = self.handler.clone();
            session
                .expect_search()
                .returning(move |base, _scope, filter, _attrs| handler(base, filter));

            let adds = self.adds.clone();
            session.expect_add().returning(move |dn, attributes| {
                adds.lock().unwrap().push((dn.to_string(), attributes));
                Ok(())
            });

            let modifies = self.modifies.clone();
            session.expect_modify().returning(move |dn, modifications| {
                modifies
                    .lock()
                    .unwrap()
                    .push((dn.to_string(), modifications.to_vec()));
                Ok(())
            });

            let deletes = self.deletes.clone();
            session.expect_delete().returning(move |dn| {
                deletes.lock().unwrap().push(dn.to_string());
                Ok(())
            });

            let user_binds = self.user_binds.clone();
            let fail_user_bind = self.fail_user_bind;
            session.expect_simple_bind().returning(move |dn, password| {
                if dn.starts_with("cn=admin") {
                    return Ok(());
                }
                user_binds
                    .lock()
                    .unwrap()
                    .push((dn.to_string(), password.to_string()));
                if fail_user_bind {
                    Err(Error::Auth("invalid credentials (result code 49)".to_string()))
                } else {
                    Ok(())
                }
            });

            session.expect_probe().returning(|| Ok(()));
            session.expect_unbind().returning(|| Ok(()));

            Ok(Box::new(session))
        }
    }

    fn jdoe_entry() -> LdapEntry {
        entry(
            "uid=jdoe,ou=users,dc=example,dc=org",
            &[
                ("uid", &["jdoe"]),
                ("cn", &["Jane Doe"]),
                ("sn", &["Doe"]),
                ("givenName", &["Jane"]),
                ("mail", &["jdoe@example.org"]),
                ("departmentNumber", &["engineering"]),
                ("uidNumber", &["10001"]),
                ("gidNumber", &["10001"]),
                ("homeDirectory", &["/home/jdoe"]),
            ],
        )
    }

    async fn manager_with(connector: ScriptedConnector) -> DirectoryManager {
        DirectoryManager::with_connector(test_config(), Arc::new(connector))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn seeds_allocator_from_directory_scan() {
        let manager = manager_with(ScriptedConnector::new(|_base, filter| {
            Ok(match filter {
                "(uidNumber=*)" => vec![
                    entry("uid=a,dc=example,dc=org", &[("uidNumber", &["10003"])]),
                    entry("uid=b,dc=example,dc=org", &[("uidNumber", &["10010"])]),
                ],
                "(gidNumber=*)" => vec![entry(
                    "cn=g,dc=example,dc=org",
                    &[("gidNumber", &["10007"])],
                )],
                _ => Vec::new(),
            })
        }))
        .await;

        assert_eq!(manager.next_uid().unwrap(), 10_011);
        assert_eq!(manager.next_gid().unwrap(), 10_008);
    }

    #[tokio::test]
    async fn allocator_floor_applies_to_empty_directory() {
        let manager = manager_with(ScriptedConnector::new(|_, _| Ok(Vec::new()))).await;
        assert_eq!(manager.next_uid().unwrap(), 10_001);
        assert_eq!(manager.next_gid().unwrap(), 10_001);
    }

    #[tokio::test]
    async fn create_user_sends_allocated_posix_attributes() {
        let connector = ScriptedConnector::new(|_base, filter| {
            Ok(if filter == "(uid=jdoe)" {
                vec![jdoe_entry()]
            } else {
                Vec::new()
            })
        });
        let adds = connector.adds.clone();
        let manager = manager_with(connector).await;

        let input = CreateUserInput {
            uid: "jdoe".to_string(),
            cn: "Jane Doe".to_string(),
            sn: "Doe".to_string(),
            given_name: "Jane".to_string(),
            mail: "jdoe@example.org".to_string(),
            department: "engineering".to_string(),
            password: "correct-horse".to_string(),
            repositories: vec!["infra".to_string()],
        };
        let user = manager.create_user(input).await.unwrap();
        assert_eq!(user.uid, "jdoe");
        assert_eq!(user.uid_number, 10_001);

        let adds = adds.lock().unwrap();
        assert_eq!(adds.len(), 1);
        let (dn, attributes) = &adds[0];
        assert_eq!(dn, "uid=jdoe,ou=users,dc=example,dc=org");

        let attr = |name: &str| {
            attributes
                .iter()
                .find(|(attribute, _)| attribute == name)
                .map(|(_, values)| values.clone())
                .unwrap_or_default()
        };
        assert!(attr("objectClass").contains(&"posixAccount".to_string()));
        assert!(attr("objectClass").contains(&"inetOrgPerson".to_string()));
        assert_eq!(attr("uidNumber"), vec!["10001".to_string()]);
        assert_eq!(attr("gidNumber"), vec!["10001".to_string()]);
        assert_eq!(attr("homeDirectory"), vec!["/home/jdoe".to_string()]);
        assert_eq!(attr("githubRepository"), vec!["infra".to_string()]);
    }

    #[tokio::test]
    async fn create_user_rejects_invalid_input() {
        let manager = manager_with(ScriptedConnector::new(|_, _| Ok(Vec::new()))).await;

        let input = CreateUserInput {
            uid: "jdoe".to_string(),
            cn: "Jane Doe".to_string(),
            sn: "Doe".to_string(),
            given_name: "Jane".to_string(),
            mail: "not-an-address".to_string(),
            department: "engineering".to_string(),
            password: "correct-horse".to_string(),
            repositories: vec![],
        };
        assert!(matches!(
            manager.create_user(input).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn fetch_user_maps_missing_entry_to_not_found() {
        let manager = manager_with(ScriptedConnector::new(|_, _| Ok(Vec::new()))).await;
        assert!(matches!(
            manager.fetch_user("ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fetch_user_escapes_filter_input() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen_by_handler = seen.clone();
        let manager = manager_with(ScriptedConnector::new(move |base, filter| {
            if base == "ou=users,dc=example,dc=org" {
                seen_by_handler.lock().unwrap().push(filter.to_string());
            }
            Ok(Vec::new())
        }))
        .await;

        let _ = manager.fetch_user("jd*oe)").await;
        let filters = seen.lock().unwrap();
        assert_eq!(filters.as_slice(), ["(uid=jd\\2aoe\\29)"]);
    }

    #[tokio::test]
    async fn update_user_replaces_only_provided_fields() {
        let connector = ScriptedConnector::new(|_base, filter| {
            Ok(if filter == "(uid=jdoe)" {
                vec![jdoe_entry()]
            } else {
                Vec::new()
            })
        });
        let modifies = connector.modifies.clone();
        let manager = manager_with(connector).await;

        let input = UpdateUserInput {
            uid: "jdoe".to_string(),
            mail: Some("new@example.org".to_string()),
            department: Some("platform".to_string()),
            ..UpdateUserInput::default()
        };
        manager.update_user(input).await.unwrap();

        let modifies = modifies.lock().unwrap();
        assert_eq!(modifies.len(), 1);
        let (dn, modifications) = &modifies[0];
        assert_eq!(dn, "uid=jdoe,ou=users,dc=example,dc=org");
        assert_eq!(
            modifications.as_slice(),
            [
                DirectoryModification::Replace {
                    attribute: "mail".to_string(),
                    values: vec!["new@example.org".to_string()],
                },
                DirectoryModification::Replace {
                    attribute: "departmentNumber".to_string(),
                    values: vec!["platform".to_string()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn update_user_without_changes_skips_modify() {
        let connector = ScriptedConnector::new(|_base, filter| {
            Ok(if filter == "(uid=jdoe)" {
                vec![jdoe_entry()]
            } else {
                Vec::new()
            })
        });
        let modifies = connector.modifies.clone();
        let manager = manager_with(connector).await;

        let input = UpdateUserInput {
            uid: "jdoe".to_string(),
            ..UpdateUserInput::default()
        };
        let user = manager.update_user(input).await.unwrap();
        assert_eq!(user.uid, "jdoe");
        assert!(modifies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_user_targets_entry_dn() {
        let connector = ScriptedConnector::new(|_, _| Ok(Vec::new()));
        let deletes = connector.deletes.clone();
        let manager = manager_with(connector).await;

        manager.delete_user("jdoe").await.unwrap();
        assert_eq!(
            deletes.lock().unwrap().as_slice(),
            ["uid=jdoe,ou=users,dc=example,dc=org"]
        );
    }

    #[tokio::test]
    async fn authenticate_binds_as_the_user() {
        let connector = ScriptedConnector::new(|_base, filter| {
            Ok(if filter == "(uid=jdoe)" {
                vec![jdoe_entry()]
            } else {
                Vec::new()
            })
        });
        let user_binds = connector.user_binds.clone();
        let manager = manager_with(connector).await;

        let user = manager.authenticate("jdoe", "correct-horse").await.unwrap();
        assert_eq!(user.uid, "jdoe");

        let binds = user_binds.lock().unwrap();
        assert_eq!(
            binds.as_slice(),
            [(
                "uid=jdoe,ou=users,dc=example,dc=org".to_string(),
                "correct-horse".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn authenticate_maps_rejected_bind_to_auth_error() {
        let connector = ScriptedConnector::new(|_base, filter| {
            Ok(if filter == "(uid=jdoe)" {
                vec![jdoe_entry()]
            } else {
                Vec::new()
            })
        })
        .rejecting_user_binds();
        let manager = manager_with(connector).await;

        assert!(matches!(
            manager.authenticate("jdoe", "wrong").await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test]
    async fn fetch_department_populates_members_and_manager_uid() {
        let manager = manager_with(ScriptedConnector::new(|base, filter| {
            Ok(match (base, filter) {
                ("ou=departments,dc=example,dc=org", "(ou=engineering)") => vec![entry(
                    "ou=engineering,ou=departments,dc=example,dc=org",
                    &[
                        ("ou", &["engineering"]),
                        ("description", &["Product engineering"]),
                        ("manager", &["uid=boss,ou=users,dc=example,dc=org"]),
                        ("githubRepository", &["infra"]),
                    ],
                )],
                (
                    "ou=users,dc=example,dc=org",
                    "(&(objectClass=inetOrgPerson)(departmentNumber=engineering))",
                ) => vec![
                    jdoe_entry(),
                    entry(
                        "uid=asmith,ou=users,dc=example,dc=org",
                        &[("uid", &["asmith"]), ("uidNumber", &["10002"])],
                    ),
                ],
                _ => Vec::new(),
            })
        }))
        .await;

        let department = manager.fetch_department("engineering").await.unwrap();
        assert_eq!(department.ou, "engineering");
        assert_eq!(department.manager.as_deref(), Some("boss"));
        assert_eq!(department.members, vec!["jdoe", "asmith"]);
        assert_eq!(department.repositories, vec!["infra"]);
    }

    #[tokio::test]
    async fn create_group_includes_placeholder_member() {
        let connector = ScriptedConnector::new(|_base, filter| {
            Ok(if filter == "(cn=developers)" {
                vec![entry(
                    "cn=developers,ou=groups,dc=example,dc=org",
                    &[("cn", &["developers"]), ("gidNumber", &["10001"])],
                )]
            } else {
                Vec::new()
            })
        });
        let adds = connector.adds.clone();
        let manager = manager_with(connector).await;

        let group = manager
            .create_group(CreateGroupInput {
                cn: "developers".to_string(),
                description: None,
            })
            .await
            .unwrap();
        assert_eq!(group.gid_number, 10_001);

        let adds = adds.lock().unwrap();
        let (_, attributes) = &adds[0];
        let member = attributes
            .iter()
            .find(|(attribute, _)| attribute == "member")
            .map(|(_, values)| values.clone())
            .unwrap_or_default();
        assert_eq!(member, vec!["cn=placeholder,ou=groups,dc=example,dc=org"]);
    }

    #[tokio::test]
    async fn group_members_exclude_placeholder_and_garbage() {
        let manager = manager_with(ScriptedConnector::new(|_base, filter| {
            Ok(if filter == "(cn=developers)" {
                vec![entry(
                    "cn=developers,ou=groups,dc=example,dc=org",
                    &[
                        ("cn", &["developers"]),
                        ("gidNumber", &["10002"]),
                        (
                            "member",
                            &[
                                "cn=placeholder,ou=groups,dc=example,dc=org",
                                "uid=jdoe,ou=users,dc=example,dc=org",
                                "not-a-dn",
                            ],
                        ),
                    ],
                )]
            } else {
                Vec::new()
            })
        }))
        .await;

        let group = manager.fetch_group("developers").await.unwrap();
        assert_eq!(group.members, vec!["jdoe"]);
        assert_eq!(group.gid_number, 10_002);
    }

    #[tokio::test]
    async fn add_user_to_group_sends_member_modification() {
        let connector = ScriptedConnector::new(|_, _| Ok(Vec::new()));
        let modifies = connector.modifies.clone();
        let manager = manager_with(connector).await;

        manager.add_user_to_group("jdoe", "developers").await.unwrap();

        let modifies = modifies.lock().unwrap();
        let (dn, modifications) = &modifies[0];
        assert_eq!(dn, "cn=developers,ou=groups,dc=example,dc=org");
        assert_eq!(
            modifications.as_slice(),
            [DirectoryModification::Add {
                attribute: "member".to_string(),
                values: vec!["uid=jdoe,ou=users,dc=example,dc=org".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn health_check_releases_its_connection() {
        let manager = manager_with(ScriptedConnector::new(|_, _| Ok(Vec::new()))).await;

        let before = manager.stats();
        manager.health_check().await.unwrap();
        let after = manager.stats();

        assert_eq!(after.in_use, 0);
        assert_eq!(after.available, 1);
        assert_eq!(after.total_requests, before.total_requests + 1);

        let status = manager.health_status().await;
        assert!(status.is_healthy());
    }

    #[tokio::test]
    async fn close_stops_further_operations() {
        let manager = manager_with(ScriptedConnector::new(|_, _| Ok(Vec::new()))).await;

        manager.close().await;
        assert!(matches!(
            manager.fetch_user("jdoe").await,
            Err(Error::PoolClosed)
        ));
    }
}
