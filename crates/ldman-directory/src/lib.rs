//! Directory access layer for the LDAP manager service.
//!
//! This crate provides the bounded connection pool and numeric-identifier
//! allocator every directory operation depends on, plus the operations
//! themselves: users, departments (organizational units) and groups, with
//! POSIX `uidNumber`/`gidNumber` assignment, pool statistics and health
//! checking.

#![deny(missing_docs)]

mod alloc;
mod config;
mod department;
mod dn;
mod group;
mod health;
mod manager;
mod pool;
mod session;
mod user;

pub use alloc::{IdAllocator, ID_FLOOR};
pub use config::{
    DirectoryConfig, DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS, DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
    DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_POOL_MAX_SIZE,
};
pub use department::{CreateDepartmentInput, Department};
pub use dn::{escape_dn_value, DistinguishedName, DnError, Rdn};
pub use group::{CreateGroupInput, Group};
pub use health::HealthMonitor;
pub use manager::DirectoryManager;
pub use pool::{DirectoryPool, PooledConnection};
pub use session::{
    escape_filter_value, DirectoryModification, LdapEntry, SearchScope,
};
pub use user::{CreateUserInput, UpdateUserInput, User, UserSearchFilter};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = ldman_core::Result<T>;
