//! Bounded connection pool for directory sessions.
//!
//! The pool owns every live administrative session. Callers borrow one
//! exclusively between [`DirectoryPool::acquire`] and
//! [`DirectoryPool::release`]; idle sessions are reused most-recently-released
//! first so stale ones age out. Capacity is bounded by a semaphore, an
//! exhausted pool blocks the acquiring task until a release or the deadline,
//! and counters are guarded by a plain mutex that is never held across
//! directory I/O.

use crate::config::DirectoryConfig;
use crate::session::{
    DirectoryModification, LdapConnector, LdapEntry, LdapSession, SearchScope,
};
use crate::Result;
use futures::future::BoxFuture;
use ldman_core::{Error, PoolStats};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

/// An idle session waiting in the pool.
struct IdleConnection {
    session: Box<dyn LdapSession>,
    created_at: Instant,
}

/// Counter state guarded by the pool mutex.
///
/// Invariant: `in_use + idle.len() <= max_size` at all times.
struct PoolState {
    /// Idle sessions, most recently released last.
    idle: Vec<IdleConnection>,
    in_use: usize,
    total_acquired: u64,
    closed: bool,
}

struct PoolShared {
    config: Arc<DirectoryConfig>,
    connector: Arc<dyn LdapConnector>,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

impl PoolShared {
    /// Locks the counter state, recovering the guard if a previous holder
    /// panicked; every update is a plain assignment, so the state stays
    /// consistent either way.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of administratively-bound directory sessions.
pub struct DirectoryPool {
    shared: Arc<PoolShared>,
}

impl DirectoryPool {
    pub(crate) fn new(config: Arc<DirectoryConfig>, connector: Arc<dyn LdapConnector>) -> Self {
        let max_size = config.pool_max_size();
        Self {
            shared: Arc::new(PoolShared {
                config,
                connector,
                semaphore: Arc::new(Semaphore::new(max_size)),
                state: Mutex::new(PoolState {
                    idle: Vec::with_capacity(max_size),
                    in_use: 0,
                    total_acquired: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Acquires a connection, waiting up to the configured acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolTimeout`] if no connection frees up within the
    /// deadline, [`Error::PoolClosed`] after [`close`](Self::close), or the
    /// connect/bind error if a fresh session could not be established.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_timeout(self.shared.config.acquire_timeout())
            .await
    }

    /// Acquires a connection with an explicit wait deadline.
    ///
    /// A timed-out acquisition leaves the pool counters exactly as they were.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<PooledConnection> {
        if self.shared.lock_state().closed {
            return Err(Error::PoolClosed);
        }

        let permit = match timeout(wait, self.shared.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // the semaphore is closed on shutdown, waking all waiters
            Ok(Err(_)) => return Err(Error::PoolClosed),
            Err(_) => {
                return Err(Error::PoolTimeout(format!(
                    "no connection available within {wait:?}"
                )))
            }
        };

        // Fast path: reuse the most recently released idle session.
        {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(Error::PoolClosed);
            }
            if let Some(idle) = state.idle.pop() {
                state.in_use += 1;
                state.total_acquired += 1;
                return Ok(PooledConnection::new(
                    idle.session,
                    idle.created_at,
                    self.shared.clone(),
                    permit,
                ));
            }
        }

        // Slow path: the permit guarantees capacity for a fresh session.
        // Dialing and binding happen outside the state lock; on failure the
        // permit drops here and the counters remain untouched.
        let session = self.open_session().await?;

        let mut state = self.shared.lock_state();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        state.in_use += 1;
        state.total_acquired += 1;
        drop(state);

        Ok(PooledConnection::new(
            session,
            Instant::now(),
            self.shared.clone(),
            permit,
        ))
    }

    /// Dials the directory and binds the administrative identity.
    async fn open_session(&self) -> Result<Box<dyn LdapSession>> {
        let mut session = self.shared.connector.connect().await?;
        let credentials = self.shared.config.credentials();
        session
            .simple_bind(credentials.bind_dn(), credentials.bind_password())
            .await?;
        Ok(session)
    }

    /// Returns a connection to the pool.
    ///
    /// The session is probed with a cheap read first; a session that fails
    /// the probe (or was already flagged unhealthy by a failed operation) is
    /// discarded silently — the caller's operation may well have succeeded,
    /// so a dying connection is never surfaced as an error here. Capacity is
    /// replaced lazily on the next demand.
    pub async fn release(&self, mut conn: PooledConnection) {
        let Some(mut session) = conn.session.take() else {
            // drained handle, nothing to do
            return;
        };
        let permit = conn.permit.take();

        let alive = conn.healthy && session.probe().await.is_ok();

        let discarded = {
            let mut state = self.shared.lock_state();
            state.in_use = state.in_use.saturating_sub(1);
            if alive && !state.closed {
                state.idle.push(IdleConnection {
                    session,
                    created_at: conn.created_at,
                });
                None
            } else {
                Some(session)
            }
        };

        if let Some(mut session) = discarded {
            debug!("discarding directory connection on release");
            let _ = session.unbind().await;
        }

        // Dropping the permit frees the slot only after the bookkeeping above.
        drop(permit);
    }

    /// Runs `op` on a pooled connection, releasing it on every exit path.
    ///
    /// The callback's error is returned unmodified; acquisition failures
    /// surface as [`Error::PoolTimeout`]/[`Error::PoolClosed`]. If the
    /// calling future is dropped mid-operation, the connection handle's drop
    /// guard still restores the pool counters.
    ///
    /// # Errors
    ///
    /// Returns the callback's error, or the acquisition error.
    pub async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut PooledConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut conn = self.acquire().await?;
        let result = op(&mut conn).await;
        self.release(conn).await;
        result
    }

    /// Returns a consistent snapshot of the pool counters.
    ///
    /// Taken under the same lock as every mutation, so the snapshot always
    /// satisfies `available + in_use <= pool_size`.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock_state();
        PoolStats {
            pool_size: self.shared.config.pool_max_size(),
            available: state.idle.len(),
            in_use: state.in_use,
            total_requests: state.total_acquired,
        }
    }

    /// Returns true once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed
    }

    /// Shuts the pool down.
    ///
    /// Idle sessions are unbound immediately; in-use sessions are discarded
    /// as their holders release them. Blocked and future acquisitions fail
    /// with [`Error::PoolClosed`] without touching the network.
    pub async fn close(&self) {
        let drained: Vec<IdleConnection> = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };

        self.shared.semaphore.close();

        for mut idle in drained {
            let _ = idle.session.unbind().await;
        }
    }
}

/// One authenticated directory session, exclusively owned by the caller
/// between acquire and release.
pub struct PooledConnection {
    session: Option<Box<dyn LdapSession>>,
    bound_dn: String,
    created_at: Instant,
    last_used_at: Instant,
    healthy: bool,
    shared: Arc<PoolShared>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl PooledConnection {
    fn new(
        session: Box<dyn LdapSession>,
        created_at: Instant,
        shared: Arc<PoolShared>,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> Self {
        let bound_dn = shared.config.credentials().bind_dn().to_string();
        Self {
            session: Some(session),
            bound_dn,
            created_at,
            last_used_at: Instant::now(),
            healthy: true,
            shared,
            permit: Some(permit),
        }
    }

    /// The identity this session is bound as.
    #[must_use]
    pub fn bound_dn(&self) -> &str {
        &self.bound_dn
    }

    /// When the underlying session was established.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the session last carried an operation.
    #[must_use]
    pub const fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Whether the session is still considered usable.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Runs a search on this session.
    ///
    /// # Errors
    ///
    /// Propagates the directory error unmodified.
    pub async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let session = self.session_mut()?;
        let result = session.search(base_dn, scope, filter, attributes).await;
        self.note(&result);
        result
    }

    /// Adds a directory entry.
    ///
    /// # Errors
    ///
    /// Propagates the directory error unmodified.
    pub async fn add(
        &mut self,
        dn: &str,
        attributes: Vec<(String, Vec<String>)>,
    ) -> Result<()> {
        let session = self.session_mut()?;
        let result = session.add(dn, attributes).await;
        self.note(&result);
        result
    }

    /// Applies modifications to a directory entry.
    ///
    /// # Errors
    ///
    /// Propagates the directory error unmodified.
    pub async fn modify(
        &mut self,
        dn: &str,
        modifications: &[DirectoryModification],
    ) -> Result<()> {
        let session = self.session_mut()?;
        let result = session.modify(dn, modifications).await;
        self.note(&result);
        result
    }

    /// Deletes a directory entry.
    ///
    /// # Errors
    ///
    /// Propagates the directory error unmodified.
    pub async fn delete(&mut self, dn: &str) -> Result<()> {
        let session = self.session_mut()?;
        let result = session.delete(dn).await;
        self.note(&result);
        result
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn LdapSession>> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Internal("connection already released".to_string()))
    }

    /// Records the outcome of an operation: transport-level failures flag the
    /// session so release discards it without probing.
    fn note<T>(&mut self, result: &Result<T>) {
        self.last_used_at = Instant::now();
        if let Err(err) = result {
            if matches!(err, Error::Connect(_) | Error::Timeout(_)) {
                self.healthy = false;
            }
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // A handle that escapes without release (cancelled or panicked
        // caller) cannot be probed here, so the session is dropped rather
        // than reused; the permit drops with self and frees the slot.
        if self.session.is_none() {
            return;
        }
        debug!("directory connection dropped without release");
        let mut state = self.shared.lock_state();
        state.in_use = state.in_use.saturating_sub(1);
    }
}
