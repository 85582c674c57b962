// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::http_utils::build_client;
use crate::queue::Destination;

/// A failed delivery attempt. The relay and reconciler only branch on
/// success or failure; status and message exist for logging.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink request failed: {0}")]
    Transport(String),
    #[error("sink responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("sink is offline")]
    Offline,
}

impl DeliveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Performs one outbound delivery attempt. No internal retry: retry policy
/// belongs to the relay and the reconciler.
#[async_trait]
pub trait DeliveryClient {
    async fn attempt(
        &self,
        destination: &Destination,
        payload: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError>;
}

/// Delivers observation batches to the cloud sink over HTTP.
pub struct HttpDeliveryClient {
    client: reqwest::Client,
    sink_base: String,
}

impl HttpDeliveryClient {
    pub fn new(config: &Config) -> Self {
        let client = build_client(
            config.proxy_url.as_deref(),
            Duration::from_secs(config.delivery_timeout_secs),
        )
        .unwrap_or_else(|e| {
            error!(
                "Unable to parse proxy configuration: {}, no proxy will be used",
                e
            );
            reqwest::Client::new()
        });
        HttpDeliveryClient {
            client,
            sink_base: config.sink_url.clone(),
        }
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn attempt(
        &self,
        destination: &Destination,
        payload: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError> {
        let url = destination.sink_url(&self.sink_base);
        let mut request = self.client.post(&url).json(payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let time = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let elapsed = time.elapsed();

        let status = response.status();
        if status.is_success() {
            debug!(
                "Delivered observations in {} ms to {url}",
                elapsed.as_millis()
            );
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(DeliveryError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Shared state of the in-memory sandbox sink: the simulated-connectivity
/// flag and everything the sink has accepted so far. The flag handle is
/// shared with the static prober and the operational toggle endpoint.
pub struct SandboxState {
    online: Arc<AtomicBool>,
    accepted: Mutex<Vec<Value>>,
}

impl SandboxState {
    pub fn new(online: bool) -> Arc<SandboxState> {
        Arc::new(SandboxState {
            online: Arc::new(AtomicBool::new(online)),
            accepted: Mutex::new(Vec::new()),
        })
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Flips the simulated-connectivity flag, returning the new value.
    pub fn toggle_online(&self) -> bool {
        !self.online.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn online_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.online)
    }

    #[allow(clippy::expect_used)]
    pub fn accepted(&self) -> Vec<Value> {
        self.accepted.lock().expect("lock poisoned").clone()
    }

    #[allow(clippy::expect_used)]
    fn record(&self, destination: &Destination, payload: &Value) {
        self.accepted.lock().expect("lock poisoned").push(json!({
            "destination": destination.storage_key(),
            "payload": payload,
        }));
    }
}

/// In-memory stand-in for the cloud sink, used in sandbox deployments and
/// tests. Refuses deliveries while toggled offline.
pub struct SandboxSink {
    state: Arc<SandboxState>,
}

impl SandboxSink {
    pub fn new(state: Arc<SandboxState>) -> Self {
        SandboxSink { state }
    }
}

#[async_trait]
impl DeliveryClient for SandboxSink {
    async fn attempt(
        &self,
        destination: &Destination,
        payload: &Value,
        _headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError> {
        if !self.state.is_online() {
            return Err(DeliveryError::Offline);
        }
        self.state.record(destination, payload);
        debug!("Delivered observations to sandbox sink");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_status() {
        let err = DeliveryError::Status {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(DeliveryError::Offline.status(), None);
        assert_eq!(
            DeliveryError::Transport("connection refused".to_string()).status(),
            None
        );
    }

    #[tokio::test]
    async fn test_sandbox_sink_offline_fails() {
        let state = SandboxState::new(false);
        let sink = SandboxSink::new(Arc::clone(&state));
        let destination = Destination::new("cam-1", "detections");

        let result = sink
            .attempt(&destination, &serde_json::json!([1]), &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(DeliveryError::Offline)));
        assert!(state.accepted().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_sink_online_records_payload() {
        let state = SandboxState::new(true);
        let sink = SandboxSink::new(Arc::clone(&state));
        let destination = Destination::new("cam-1", "detections");
        let payload = serde_json::json!([{ "id": 1 }]);

        sink.attempt(&destination, &payload, &BTreeMap::new())
            .await
            .unwrap();

        let accepted = state.accepted();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0]["destination"], "cam-1/detections");
        assert_eq!(accepted[0]["payload"], payload);
    }

    #[test]
    fn test_sandbox_toggle_flips_shared_flag() {
        let state = SandboxState::new(false);
        let handle = state.online_handle();

        assert!(state.toggle_online());
        assert!(handle.load(Ordering::Relaxed));
        assert!(!state.toggle_online());
        assert!(!handle.load(Ordering::Relaxed));
    }
}
