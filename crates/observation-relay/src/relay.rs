// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::delivery::DeliveryClient;
use crate::queue::{unix_now, Destination, DurableQueue, PendingDelivery, QueueError};

/// Outcome of an accepted observation batch. Not delivering synchronously is
/// not an error: the batch is buffered and will be retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accepted {
    pub delivered: bool,
}

/// Ingress surface of the store-and-forward pipeline: one immediate delivery
/// attempt, falling back to the durable queue.
pub struct Relay {
    queue: Arc<DurableQueue>,
    client: Arc<dyn DeliveryClient + Send + Sync>,
}

impl Relay {
    pub fn new(queue: Arc<DurableQueue>, client: Arc<dyn DeliveryClient + Send + Sync>) -> Self {
        Relay { queue, client }
    }

    /// Attempts to deliver the batch once; buffers it on failure. Only a
    /// persistence failure reaches the caller as an error, since in that
    /// case neither delivery nor durability succeeded.
    pub async fn accept(
        &self,
        destination: Destination,
        payload: Value,
        headers: BTreeMap<String, String>,
    ) -> Result<Accepted, QueueError> {
        match self.client.attempt(&destination, &payload, &headers).await {
            Ok(()) => {
                debug!("Delivered observations for {}", destination.storage_key());
                Ok(Accepted { delivered: true })
            }
            Err(e) => {
                info!(
                    "Delivery for {} failed ({e}), buffering for retry",
                    destination.storage_key()
                );
                let delivery = PendingDelivery {
                    payload,
                    headers,
                    enqueued_at: unix_now(),
                };
                self.queue.enqueue(&destination, delivery).await?;
                Ok(Accepted { delivered: false })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{SandboxSink, SandboxState};
    use serde_json::json;

    async fn relay_with_sandbox(
        dir: &tempfile::TempDir,
        online: bool,
    ) -> (Relay, Arc<SandboxState>, Arc<DurableQueue>) {
        let queue = Arc::new(
            DurableQueue::open(dir.path().join("relay-queue.json"))
                .await
                .unwrap(),
        );
        let state = SandboxState::new(online);
        let relay = Relay::new(
            Arc::clone(&queue),
            Arc::new(SandboxSink::new(Arc::clone(&state))),
        );
        (relay, state, queue)
    }

    #[tokio::test]
    async fn test_accept_delivered_queues_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, state, queue) = relay_with_sandbox(&dir, true).await;

        let accepted = relay
            .accept(
                Destination::new("cam-1", "detections"),
                json!([{ "id": 1 }]),
                BTreeMap::new(),
            )
            .await
            .unwrap();

        assert!(accepted.delivered);
        assert_eq!(state.accepted().len(), 1);
        assert!(queue.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_accept_failure_buffers_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, state, queue) = relay_with_sandbox(&dir, false).await;

        let accepted = relay
            .accept(
                Destination::new("cam-1", "detections"),
                json!([{ "id": 1 }]),
                BTreeMap::new(),
            )
            .await
            .unwrap();

        assert!(!accepted.delivered);
        assert!(state.accepted().is_empty());
        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot["cam-1/detections"].len(), 1);
        assert_eq!(snapshot["cam-1/detections"][0].payload, json!([{ "id": 1 }]));
    }

    #[tokio::test]
    async fn test_accept_persistence_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, _state, _queue) = relay_with_sandbox(&dir, false).await;

        // queue directory is gone, so buffering the failed delivery fails too
        drop(dir);

        let result = relay
            .accept(
                Destination::new("cam-1", "detections"),
                json!([{ "id": 1 }]),
                BTreeMap::new(),
            )
            .await;
        assert!(result.is_err());
    }
}
