// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::delivery::DeliveryClient;
use crate::prober::ConnectivityProber;
use crate::queue::{Destination, DurableQueue};

/// Timer-driven process that probes sink connectivity and, on a positive
/// probe, replays the durable queue through the delivery client. Entries
/// that still fail are written back in their original relative order.
pub struct Reconciler {
    queue: Arc<DurableQueue>,
    client: Arc<dyn DeliveryClient + Send + Sync>,
    prober: Arc<dyn ConnectivityProber + Send + Sync>,
    interval_secs: u64,
    startup_delay_secs: u64,
}

impl Reconciler {
    pub fn new(
        queue: Arc<DurableQueue>,
        client: Arc<dyn DeliveryClient + Send + Sync>,
        prober: Arc<dyn ConnectivityProber + Send + Sync>,
        config: &Config,
    ) -> Self {
        Reconciler {
            queue,
            client,
            prober,
            interval_secs: config.reconcile_interval_secs,
            startup_delay_secs: config.startup_delay_secs,
        }
    }

    /// Runs reconciliation cycles forever: one immediately after the warm-up
    /// grace period, then one per interval tick.
    pub async fn start(&self) {
        sleep(Duration::from_secs(self.startup_delay_secs)).await;
        self.run_cycle().await;

        let mut reconcile_interval = interval(Duration::from_secs(self.interval_secs));
        reconcile_interval.tick().await; // discard first tick, which is instantaneous

        loop {
            reconcile_interval.tick().await;
            self.run_cycle().await;
        }
    }

    /// One full cycle: probe, then drain if the sink is reachable. Never
    /// fails; a cycle where every retry fails simply leaves the queue for
    /// the next tick.
    pub async fn run_cycle(&self) {
        debug!("Checking sink connectivity");
        if !self.prober.check().await {
            warn!("Sink is not reachable, keeping buffered deliveries");
            return;
        }
        debug!("Sink is reachable, attempting to send buffered deliveries");
        self.drain().await;
    }

    /// Replays every destination's pending deliveries in FIFO order.
    /// Destinations are drained independently: failures on one never block
    /// another's entries.
    async fn drain(&self) {
        let snapshot = self.queue.snapshot().await;
        if snapshot.is_empty() {
            debug!("No buffered deliveries to send");
            return;
        }

        for (key, entries) in snapshot {
            let Some(destination) = Destination::from_storage_key(&key) else {
                // leave the entries in place rather than guess a destination
                error!("Skipping queue entries under malformed key {key:?}");
                continue;
            };

            let total = entries.len();
            let mut remaining = Vec::new();
            for delivery in entries {
                match self
                    .client
                    .attempt(&destination, &delivery.payload, &delivery.headers)
                    .await
                {
                    Ok(()) => debug!("Successfully sent buffered delivery for {key}"),
                    Err(e) => {
                        warn!("Buffered delivery for {key} still failing: {e}");
                        remaining.push(delivery);
                    }
                }
            }

            let sent = total - remaining.len();
            let left = remaining.len();
            if let Err(e) = self.queue.replace(&destination, remaining).await {
                error!("Failed to persist queue after draining {key}: {e}");
                continue;
            }
            info!("{sent} buffered deliveries sent for {key}, {left} remaining");
        }
    }
}
