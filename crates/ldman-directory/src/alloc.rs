//! Monotonic allocation of POSIX `uidNumber`/`gidNumber` values.
//!
//! Counters live only in process memory; the directory remains the source of
//! truth, and a restarted process reseeds from the directory's current
//! maximum. A scan racing concurrent creates during a restart could reuse a
//! number; that window is accepted and documented in DESIGN.md.

use crate::Result;
use ldman_core::Error;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lowest number ever handed out, matching the deployment's bootstrap
/// entries which start at 10001.
pub const ID_FLOOR: u32 = 10_001;

/// Allocator for directory-wide unique numeric identifiers.
///
/// Each counter is an atomic 64-bit cell: concurrent callers can never
/// observe the same value, and values past `u32::MAX` surface as
/// [`Error::AllocatorExhausted`] instead of wrapping.
pub struct IdAllocator {
    next_uid: AtomicU64,
    next_gid: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose next values are strictly above the given
    /// directory maxima, and never below [`ID_FLOOR`].
    #[must_use]
    pub fn seed(max_existing_uid: u32, max_existing_gid: u32) -> Self {
        Self {
            next_uid: AtomicU64::new(starting_point(max_existing_uid)),
            next_gid: AtomicU64::new(starting_point(max_existing_gid)),
        }
    }

    /// Returns the next free `uidNumber`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocatorExhausted`] once the 32-bit space is spent.
    pub fn next_uid(&self) -> Result<u32> {
        Self::take(&self.next_uid, "uidNumber")
    }

    /// Returns the next free `gidNumber`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocatorExhausted`] once the 32-bit space is spent.
    pub fn next_gid(&self) -> Result<u32> {
        Self::take(&self.next_gid, "gidNumber")
    }

    fn take(counter: &AtomicU64, kind: &str) -> Result<u32> {
        // fetch_add alone makes every returned value unique; no ordering
        // with other memory is required
        let value = counter.fetch_add(1, Ordering::Relaxed);
        u32::try_from(value)
            .map_err(|_| Error::AllocatorExhausted(format!("{kind} space is spent")))
    }
}

fn starting_point(max_existing: u32) -> u64 {
    u64::from(max_existing)
        .saturating_add(1)
        .max(u64::from(ID_FLOOR))
}
