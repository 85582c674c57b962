// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

const DEFAULT_RELAY_PORT: u16 = 3001;
const DEFAULT_QUEUE_FILE: &str = "relay-queue.json";
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
const DEFAULT_STARTUP_DELAY_SECS: u64 = 10;
const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRACKER_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_TRACKER_HEALTH_INTERVAL_SECS: u64 = 60;
const DEFAULT_SELF_CHECK_INTERVAL_SECS: u64 = 300;

/// Parses a comma- or space-separated list into its entries.
///
/// Space-separated entries are the standard. For compatibility reasons we
/// also support comma-separated entries.
fn parse_list(raw: &str) -> Vec<String> {
    let normalized = raw.replace(',', " ");
    normalized
        .split_whitespace()
        .map(|entry| entry.to_string())
        .collect()
}

fn default_observation_types() -> HashSet<String> {
    HashSet::from(["detections".to_string(), "counts".to_string()])
}

#[derive(Debug)]
pub struct Config {
    /// Base URL of the cloud sink observations are forwarded to.
    pub sink_url: String,
    /// Port the ingress server listens on.
    pub port: u16,
    /// Backing file for the durable delivery queue.
    pub queue_file: PathBuf,
    /// Observation types accepted on the ingress endpoint.
    pub observation_types: HashSet<String>,
    /// How often to probe the sink and drain the queue, in seconds.
    pub reconcile_interval_secs: u64,
    /// Warm-up grace period before the first reconciliation cycle, in seconds.
    pub startup_delay_secs: u64,
    /// Timeout for health-check probes, in seconds.
    pub health_check_timeout_secs: u64,
    /// Timeout for each delivery attempt, in seconds.
    pub delivery_timeout_secs: u64,
    /// Tracker devices polled by the gateway's collection loop.
    pub tracker_urls: Vec<String>,
    /// How often to collect observations from trackers, in seconds.
    pub tracker_poll_interval_secs: u64,
    /// How often to health-check trackers, in seconds.
    pub tracker_health_interval_secs: u64,
    /// How often the gateway checks its own health endpoint, in seconds.
    pub self_check_interval_secs: u64,
    /// Use the in-memory sandbox sink instead of the real cloud sink.
    pub sandbox_sink: bool,
    pub max_request_content_length: usize,
    pub proxy_url: Option<String>,
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let sink_url = env::var("RELAY_SINK_URL")
            .map_err(|_| anyhow::anyhow!("RELAY_SINK_URL environment variable is not set"))?
            .trim_end_matches('/')
            .to_string();

        let port: u16 = env::var("RELAY_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_RELAY_PORT);

        let queue_file = env::var("RELAY_QUEUE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_QUEUE_FILE));

        let observation_types = match env::var("RELAY_OBSERVATION_TYPES") {
            Ok(raw) => parse_list(&raw).into_iter().collect(),
            Err(_) => default_observation_types(),
        };

        let tracker_urls = env::var("RELAY_TRACKER_URLS")
            .map(|raw| {
                parse_list(&raw)
                    .into_iter()
                    .map(|url| url.trim_end_matches('/').to_string())
                    .collect()
            })
            .unwrap_or_default();

        let sandbox_sink = env::var("RELAY_SANDBOX_SINK")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Config {
            sink_url,
            port,
            queue_file,
            observation_types,
            reconcile_interval_secs: parse_secs(
                "RELAY_RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            ),
            startup_delay_secs: parse_secs("RELAY_STARTUP_DELAY_SECS", DEFAULT_STARTUP_DELAY_SECS),
            health_check_timeout_secs: parse_secs(
                "RELAY_HEALTH_TIMEOUT_SECS",
                DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
            ),
            delivery_timeout_secs: parse_secs(
                "RELAY_DELIVERY_TIMEOUT_SECS",
                DEFAULT_DELIVERY_TIMEOUT_SECS,
            ),
            tracker_urls,
            tracker_poll_interval_secs: parse_secs(
                "RELAY_TRACKER_POLL_INTERVAL_SECS",
                DEFAULT_TRACKER_POLL_INTERVAL_SECS,
            ),
            tracker_health_interval_secs: parse_secs(
                "RELAY_TRACKER_HEALTH_INTERVAL_SECS",
                DEFAULT_TRACKER_HEALTH_INTERVAL_SECS,
            ),
            self_check_interval_secs: parse_secs(
                "RELAY_SELF_CHECK_INTERVAL_SECS",
                DEFAULT_SELF_CHECK_INTERVAL_SECS,
            ),
            sandbox_sink,
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
            proxy_url: env::var("RELAY_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
        })
    }
}


fn parse_secs(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(default)
}
