// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collection loop that polls tracker devices and feeds the relay.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, error, info};

use observation_relay::config::Config;
use observation_relay::http_utils::build_client;
use observation_relay::queue::{unix_now, Destination};
use observation_relay::relay::Relay;

const COLLECT_RETRIES: u32 = 3;
const COLLECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Polls every configured tracker on the collection interval and hands the
/// reshaped observations to the relay.
pub async fn start_collector(config: Arc<Config>, relay: Arc<Relay>) {
    let client = build_client(None, Duration::from_secs(config.delivery_timeout_secs))
        .unwrap_or_else(|_| reqwest::Client::new());

    sleep(Duration::from_secs(config.startup_delay_secs)).await;
    let mut poll_interval = interval(Duration::from_secs(config.tracker_poll_interval_secs));

    loop {
        poll_interval.tick().await;
        for (index, tracker_url) in config.tracker_urls.iter().enumerate() {
            collect_tracker(&client, &relay, index, tracker_url).await;
        }
    }
}

/// Collects one tracker's observations, with a few attempts before giving
/// up until the next poll.
async fn collect_tracker(
    client: &reqwest::Client,
    relay: &Relay,
    index: usize,
    tracker_url: &str,
) {
    debug!("Starting to collect data from tracker {tracker_url}");

    for attempt in 1..=COLLECT_RETRIES {
        match fetch_observations(client, tracker_url).await {
            Ok(observations) => {
                let destination = Destination::new(format!("cam-{index}"), "detections");
                match relay
                    .accept(destination, observations, BTreeMap::new())
                    .await
                {
                    Ok(accepted) if accepted.delivered => {
                        debug!("Collected data from {tracker_url} delivered to sink");
                    }
                    Ok(_) => {
                        info!("Collected data from {tracker_url} queued for later delivery");
                    }
                    Err(e) => {
                        error!("Failed to buffer collected data from {tracker_url}: {e}");
                    }
                }
                return;
            }
            Err(e) => {
                error!(
                    "Error collecting tracker data from {tracker_url} (attempt {attempt}/{COLLECT_RETRIES}): {e}"
                );
                if attempt < COLLECT_RETRIES {
                    sleep(COLLECT_RETRY_DELAY).await;
                }
            }
        }
    }
    error!("Max retries reached. Failed to collect tracker data from {tracker_url}");
}

/// Fetches the current detections and the recent unique counts from one
/// tracker and reshapes them into a single observation batch.
async fn fetch_observations(
    client: &reqwest::Client,
    tracker_url: &str,
) -> Result<Value, reqwest::Error> {
    debug!("Fetching current detections from {tracker_url}");
    let current_detections: Value = client
        .get(format!("{tracker_url}/detections"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    debug!("Fetching unique object counts from {tracker_url}");
    let unique_counts: Value = client
        .get(format!("{tracker_url}/detections"))
        .query(&[("from", "30")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(json!([{
        "collected_at": unix_now(),
        "current_detections": current_detections,
        "unique_counts": unique_counts,
    }]))
}
