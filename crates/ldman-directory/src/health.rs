//! Background health monitoring for readiness probes.

use crate::manager::DirectoryManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Periodically runs the manager's health check and keeps the latest
/// outcome available for readiness probes.
///
/// Each probe borrows a pool connection only for the check's duration (the
/// manager uses its dedicated short timeout), so monitoring cannot starve
/// real traffic of capacity.
pub struct HealthMonitor {
    healthy: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawns the monitor on the manager's configured interval.
    #[must_use]
    pub fn spawn(manager: Arc<DirectoryManager>) -> Self {
        let healthy = Arc::new(AtomicBool::new(true));
        let flag = healthy.clone();
        // interval(0) is invalid; clamp to something small instead
        let interval = manager
            .config()
            .health_check_interval()
            .max(std::time::Duration::from_millis(10));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match manager.health_check().await {
                    Ok(()) => {
                        if !flag.swap(true, Ordering::SeqCst) {
                            debug!("directory became healthy again");
                        }
                    }
                    Err(err) => {
                        if flag.swap(false, Ordering::SeqCst) {
                            warn!("directory became unhealthy: {err}");
                        }
                    }
                }
            }
        });

        Self { healthy, task }
    }

    /// Latest probe outcome.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Stops the background task.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
