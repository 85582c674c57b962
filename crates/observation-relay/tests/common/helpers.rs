// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared constructors for integration tests

use observation_relay::config::Config;
use std::collections::HashSet;
use std::path::Path;

/// Create a test config pointing at the given sink, with short timeouts and
/// no warm-up delay.
pub fn create_test_config(port: u16, queue_file: &Path, sink_url: &str) -> Config {
    Config {
        sink_url: sink_url.trim_end_matches('/').to_string(),
        port,
        queue_file: queue_file.to_path_buf(),
        observation_types: HashSet::from(["detections".to_string(), "counts".to_string()]),
        reconcile_interval_secs: 60,
        startup_delay_secs: 0,
        health_check_timeout_secs: 1,
        delivery_timeout_secs: 2,
        tracker_urls: Vec::new(),
        tracker_poll_interval_secs: 30,
        tracker_health_interval_secs: 60,
        self_check_interval_secs: 300,
        sandbox_sink: false,
        max_request_content_length: 10 * 1024 * 1024,
        proxy_url: None,
    }
}
