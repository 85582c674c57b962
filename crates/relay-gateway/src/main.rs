// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use observation_relay::{
    config::Config,
    delivery::{DeliveryClient, HttpDeliveryClient, SandboxSink, SandboxState},
    http_utils::build_client,
    prober::{ConnectivityProber, HealthProber, StaticProber},
    queue::DurableQueue,
    reconciler::Reconciler,
    relay::Relay,
    server::RelayServer,
};

mod collector;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RELAY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    debug!("Starting edge relay gateway");

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on relay gateway startup: {e}");
            return;
        }
    };

    let queue = match DurableQueue::open(&config.queue_file).await {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Error opening durable queue on relay gateway startup: {e}");
            return;
        }
    };

    let sandbox = if config.sandbox_sink {
        info!("Using in-memory sandbox sink instead of {}", config.sink_url);
        Some(SandboxState::new(false))
    } else {
        None
    };

    let (delivery_client, prober): (
        Arc<dyn DeliveryClient + Send + Sync>,
        Arc<dyn ConnectivityProber + Send + Sync>,
    ) = match &sandbox {
        Some(state) => (
            Arc::new(SandboxSink::new(Arc::clone(state))),
            Arc::new(StaticProber::new(state.online_handle())),
        ),
        None => (
            Arc::new(HttpDeliveryClient::new(&config)),
            Arc::new(HealthProber::new(&config)),
        ),
    };

    let relay = Arc::new(Relay::new(Arc::clone(&queue), Arc::clone(&delivery_client)));

    let server = RelayServer {
        config: Arc::clone(&config),
        relay: Arc::clone(&relay),
        sandbox,
    };
    tokio::spawn(async move {
        let res = server.start().await;
        if let Err(e) = res {
            error!("Error when starting relay ingress server: {e:?}");
        }
    });

    if config.tracker_urls.is_empty() {
        info!("No trackers configured, collection loop disabled");
    } else {
        tokio::spawn(collector::start_collector(
            Arc::clone(&config),
            Arc::clone(&relay),
        ));
        tokio::spawn(start_tracker_health_checks(Arc::clone(&config)));
    }
    tokio::spawn(start_self_health_checks(Arc::clone(&config)));

    let reconciler = Reconciler::new(queue, delivery_client, prober, &config);
    reconciler.start().await;
}

/// Periodically checks each configured tracker's health endpoint. Results
/// are only logged; collection keeps its own retry handling.
async fn start_tracker_health_checks(config: Arc<Config>) {
    let client = build_client(
        None,
        Duration::from_secs(config.health_check_timeout_secs),
    )
    .unwrap_or_else(|_| reqwest::Client::new());

    sleep(Duration::from_secs(config.startup_delay_secs)).await;
    let mut check_interval = interval(Duration::from_secs(config.tracker_health_interval_secs));

    loop {
        check_interval.tick().await;
        debug!("Starting tracker health check");
        for tracker_url in &config.tracker_urls {
            match client.get(format!("{tracker_url}/health")).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Tracker health check - {tracker_url}: healthy");
                }
                Ok(response) => {
                    error!(
                        "Tracker health check - {tracker_url}: unhealthy (status {})",
                        response.status()
                    );
                }
                Err(e) => {
                    error!("Tracker health check error - {tracker_url}: {e}");
                }
            }
        }
        debug!("Tracker health check completed");
    }
}

/// Periodically calls the gateway's own health endpoint, so a wedged ingress
/// server shows up in the logs.
async fn start_self_health_checks(config: Arc<Config>) {
    let client = build_client(
        None,
        Duration::from_secs(config.health_check_timeout_secs),
    )
    .unwrap_or_else(|_| reqwest::Client::new());
    let health_url = format!("http://127.0.0.1:{}/health", config.port);

    sleep(Duration::from_secs(config.startup_delay_secs)).await;
    let mut check_interval = interval(Duration::from_secs(config.self_check_interval_secs));

    loop {
        check_interval.tick().await;
        match client.get(&health_url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Gateway self-check: healthy");
            }
            Ok(response) => {
                error!("Gateway self-check: unhealthy (status {})", response.status());
            }
            Err(e) => {
                error!("Gateway self-check error: {e}");
            }
        }
    }
}
