//! Periodic cache cleanup and expiry audit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use permweave_domain::HolderRegistry;

/// What one housekeeping pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HousekeepingReport {
    /// Expired temporary nodes removed.
    pub expired_nodes: usize,
    /// Idle cache entries evicted.
    pub evicted_entries: usize,
}

/// Runs [`HolderRegistry::audit_temporary_nodes`] and
/// [`HolderRegistry::perform_cleanup`] on a fixed interval.
pub struct Housekeeping {
    registry: Arc<HolderRegistry>,
    interval: Duration,
}

impl Housekeeping {
    pub fn new(registry: Arc<HolderRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One pass. Expired nodes are removed first so the caches they
    /// invalidate are rebuilt lazily.
    pub fn run_once(&self) -> HousekeepingReport {
        let report = HousekeepingReport {
            expired_nodes: self.registry.audit_temporary_nodes(),
            evicted_entries: self.registry.perform_cleanup(),
        };
        if report != HousekeepingReport::default() {
            debug!(
                expired_nodes = report.expired_nodes,
                evicted_entries = report.evicted_entries,
                "housekeeping pass"
            );
        }
        report
    }

    /// Runs passes until `shutdown` changes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "housekeeping started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    info!("housekeeping shutting down");
                    break;
                }
            }
            self.run_once();
        }
    }
}
