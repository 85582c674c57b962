// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::Config;
use crate::http_utils::build_client;

/// Answers "is the sink reachable right now?". Consumed only by the
/// reconciler, as a boolean gate before draining; the answer is allowed to
/// be stale between probes.
#[async_trait]
pub trait ConnectivityProber {
    async fn check(&self) -> bool;
}

/// Probes the sink by calling its health endpoint.
pub struct HealthProber {
    client: reqwest::Client,
    health_url: String,
}

impl HealthProber {
    pub fn new(config: &Config) -> Self {
        let client = build_client(
            config.proxy_url.as_deref(),
            Duration::from_secs(config.health_check_timeout_secs),
        )
        .unwrap_or_else(|e| {
            error!(
                "Unable to parse proxy configuration: {}, no proxy will be used",
                e
            );
            reqwest::Client::new()
        });
        HealthProber {
            client,
            health_url: format!("{}/health", config.sink_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl ConnectivityProber for HealthProber {
    async fn check(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    "Sink health check returned status {}",
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Sink health check failed: {e}");
                false
            }
        }
    }
}

/// Probes the sink with a bare TCP connect, independent of the sink's own
/// protocol.
pub struct TcpProber {
    authority: String,
    timeout: Duration,
}

impl TcpProber {
    pub fn new(authority: impl Into<String>, timeout: Duration) -> Self {
        TcpProber {
            authority: authority.into(),
            timeout,
        }
    }

    /// Builds a prober for the sink's host and port from the configured
    /// base URL. Returns None if the URL has no usable authority.
    pub fn for_sink(config: &Config) -> Option<TcpProber> {
        let url = reqwest::Url::parse(&config.sink_url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(TcpProber::new(
            format!("{host}:{port}"),
            Duration::from_secs(config.health_check_timeout_secs),
        ))
    }
}

#[async_trait]
impl ConnectivityProber for TcpProber {
    async fn check(&self) -> bool {
        matches!(
            tokio::time::timeout(
                self.timeout,
                tokio::net::TcpStream::connect(&self.authority)
            )
            .await,
            Ok(Ok(_))
        )
    }
}

/// Reports whatever the shared flag currently holds. Used with the sandbox
/// sink and in tests.
pub struct StaticProber {
    online: Arc<AtomicBool>,
}

impl StaticProber {
    pub fn new(online: Arc<AtomicBool>) -> Self {
        StaticProber { online }
    }
}

#[async_trait]
impl ConnectivityProber for StaticProber {
    async fn check(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}
