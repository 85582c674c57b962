// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock delivery client for driving the relay and reconciler in tests

use async_trait::async_trait;
use observation_relay::delivery::{DeliveryClient, DeliveryError};
use observation_relay::queue::Destination;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub struct Attempt {
    pub destination: String,
    pub payload: Value,
    pub succeeded: bool,
}

/// Delivery client that records every attempt and fails on demand, either
/// globally or per destination.
#[derive(Default)]
pub struct RecordingDeliveryClient {
    attempts: Mutex<Vec<Attempt>>,
    failing_destinations: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
}

impl RecordingDeliveryClient {
    pub fn new() -> Self {
        RecordingDeliveryClient::default()
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::Relaxed);
    }

    pub fn fail_destination(&self, destination: &Destination) {
        self.failing_destinations
            .lock()
            .unwrap()
            .insert(destination.storage_key());
    }

    pub fn restore_destination(&self, destination: &Destination) {
        self.failing_destinations
            .lock()
            .unwrap()
            .remove(&destination.storage_key());
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn successful_attempts(&self) -> Vec<Attempt> {
        self.attempts()
            .into_iter()
            .filter(|attempt| attempt.succeeded)
            .collect()
    }

    pub fn clear_attempts(&self) {
        self.attempts.lock().unwrap().clear();
    }

    fn should_fail(&self, key: &str) -> bool {
        self.fail_all.load(Ordering::Relaxed)
            || self.failing_destinations.lock().unwrap().contains(key)
    }
}

#[async_trait]
impl DeliveryClient for RecordingDeliveryClient {
    async fn attempt(
        &self,
        destination: &Destination,
        payload: &Value,
        _headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError> {
        let key = destination.storage_key();
        let fail = self.should_fail(&key);
        self.attempts.lock().unwrap().push(Attempt {
            destination: key,
            payload: payload.clone(),
            succeeded: !fail,
        });
        if fail {
            Err(DeliveryError::Transport("synthetic failure".to_string()))
        } else {
            Ok(())
        }
    }
}
