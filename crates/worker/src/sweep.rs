//! Orphan sweep
//!
//! Records whose second engine never reported stay in the registry forever.
//! When configured, this loop evicts them once they outlive a TTL.

use crate::registry::ResultRegistry;
use opml_common::config::OrphanSweepConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct OrphanSweeper {
    registry: Arc<ResultRegistry>,
    ttl: Duration,
    interval: Duration,
}

impl OrphanSweeper {
    pub fn new(registry: Arc<ResultRegistry>, config: &OrphanSweepConfig) -> Self {
        Self {
            registry,
            ttl: config.ttl(),
            interval: config.interval(),
        }
    }

    /// Evict expired records once, returning how many were removed
    pub fn sweep(&self) -> usize {
        self.registry.evict_older_than(self.ttl).len()
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Orphan sweep started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        info!(evicted, remaining = self.registry.len(), "Orphan sweep pass");
                    }
                }
            }
        }
    }
}
