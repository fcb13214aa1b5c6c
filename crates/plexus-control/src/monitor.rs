//! Periodic health checks of every running instance.
//!
//! The monitor only reports: failures and deaths are published on the
//! event bus and the controller's dispatcher decides what to kill.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use plexus_events::EventBus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::pool::PoolTable;

/// Pings every instance of every pool on a fixed interval.
#[derive(Debug)]
pub struct HealthMonitor {
    pools: Arc<PoolTable>,
    bus: EventBus,
    interval: Duration,
    timeout: Duration,
    failure_limit: u32,
}

impl HealthMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        pools: Arc<PoolTable>,
        bus: EventBus,
        interval: Duration,
        timeout: Duration,
        failure_limit: u32,
    ) -> Self {
        Self {
            pools,
            bus,
            interval,
            timeout,
            failure_limit,
        }
    }

    /// Check every instance once, concurrently; returns how many failed.
    pub async fn check_all(&self) -> usize {
        let instances: Vec<_> = self
            .pools
            .all()
            .iter()
            .flat_map(|pool| pool.instances())
            .collect();
        if instances.is_empty() {
            return 0;
        }
        let results = join_all(
            instances
                .iter()
                .map(|i| i.check_health(self.timeout, self.failure_limit, &self.bus)),
        )
        .await;
        let failed = results.iter().filter(|ok| !**ok).count();
        trace!(checked = instances.len(), failed, "Health check round");
        failed
    }

    /// Run check rounds until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.interval.max(Duration::from_millis(1));
            debug!(interval_ms = period.as_millis(), "Health monitor started");
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(period) => {
                        self.check_all().await;
                    }
                }
            }
            debug!("Health monitor stopped");
        })
    }
}
