//! External DTOs for pool statistics and service health.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Point-in-time snapshot of connection pool occupancy.
///
/// Snapshots are taken under the pool's own lock, so
/// `available + in_use <= pool_size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Maximum number of connections the pool may hold.
    pub pool_size: usize,
    /// Idle connections ready for reuse.
    pub available: usize,
    /// Connections currently handed out to callers.
    pub in_use: usize,
    /// Cumulative count of successful acquisitions.
    pub total_requests: u64,
}

/// Health status of the directory-facing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Overall status string (`healthy` or `unhealthy`).
    pub status: String,
    /// Whether the directory answered the last probe.
    pub directory: bool,
    /// Unix timestamp (seconds) of the probe.
    pub timestamp: u64,
}

impl HealthStatus {
    /// Creates a healthy status stamped with the current time.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            directory: true,
            timestamp: unix_now(),
        }
    }

    /// Creates an unhealthy status stamped with the current time.
    #[must_use]
    pub fn unhealthy() -> Self {
        Self {
            status: "unhealthy".to_string(),
            directory: false,
            timestamp: unix_now(),
        }
    }

    /// Returns true if the directory was reachable.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.directory
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
