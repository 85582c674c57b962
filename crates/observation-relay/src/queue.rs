// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable delivery queue backed by a single JSON file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Identity of a forwarding target. Equality is structural; the pair doubles
/// as the queue's partition key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub camera_id: String,
    pub observation_type: String,
}

impl Destination {
    pub fn new(camera_id: impl Into<String>, observation_type: impl Into<String>) -> Self {
        Destination {
            camera_id: camera_id.into(),
            observation_type: observation_type.into(),
        }
    }

    /// Key under which this destination's deliveries are stored.
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.camera_id, self.observation_type)
    }

    pub fn from_storage_key(key: &str) -> Option<Destination> {
        let (camera_id, observation_type) = key.split_once('/')?;
        if camera_id.is_empty() || observation_type.is_empty() {
            return None;
        }
        Some(Destination::new(camera_id, observation_type))
    }

    /// Full sink URL observations for this destination are posted to.
    pub fn sink_url(&self, sink_base: &str) -> String {
        format!(
            "{}/cameras/{}/observations/{}",
            sink_base.trim_end_matches('/'),
            self.camera_id,
            self.observation_type
        )
    }
}

/// One buffered unit of work. Created on a failed delivery attempt, removed
/// only when a later attempt succeeds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingDelivery {
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub enqueued_at: u64,
}

/// The full durable structure: destination storage key to its ordered
/// pending deliveries, insertion order = retry order.
pub type QueueState = BTreeMap<String, Vec<PendingDelivery>>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// On-disk queue of deliveries that could not be forwarded yet.
///
/// All mutations take the internal mutex across the full mutate-persist
/// sequence, so concurrent enqueues and a reconciler replace cannot
/// interleave their reads and writes of the backing file. The in-memory
/// state only advances after the new document is on disk.
pub struct DurableQueue {
    path: PathBuf,
    state: Mutex<QueueState>,
}

impl DurableQueue {
    /// Opens the queue at `path`, creating an empty backing file if none
    /// exists. A corrupt or non-map backing file is treated as empty rather
    /// than refusing to start.
    pub async fn open(path: impl Into<PathBuf>) -> Result<DurableQueue, QueueError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<QueueState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    error!(
                        "Queue file {} is not a valid queue document ({e}), starting empty",
                        path.display()
                    );
                    QueueState::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No queue file at {}, starting empty", path.display());
                let queue = DurableQueue {
                    path,
                    state: Mutex::new(QueueState::new()),
                };
                queue.persist(&QueueState::new()).await?;
                return Ok(queue);
            }
            Err(e) => return Err(e.into()),
        };

        let entries: usize = state.values().map(Vec::len).sum();
        if entries > 0 {
            info!(
                "Loaded {entries} pending deliveries from {}",
                path.display()
            );
        }
        Ok(DurableQueue {
            path,
            state: Mutex::new(state),
        })
    }

    /// Appends one delivery to the destination's sequence and persists the
    /// full state before returning.
    pub async fn enqueue(
        &self,
        destination: &Destination,
        delivery: PendingDelivery,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.entry(destination.storage_key())
            .or_default()
            .push(delivery);
        self.persist(&next).await?;
        *state = next;
        debug!(
            "Buffered delivery for {}, {} now pending",
            destination.storage_key(),
            state.get(&destination.storage_key()).map_or(0, Vec::len)
        );
        Ok(())
    }

    /// Returns a consistent point-in-time copy of the queue.
    pub async fn snapshot(&self) -> QueueState {
        self.state.lock().await.clone()
    }

    /// Atomically swaps one destination's sequence for the deliveries that
    /// are still pending and persists the new state.
    pub async fn replace(
        &self,
        destination: &Destination,
        remaining: Vec<PendingDelivery>,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let key = destination.storage_key();
        if remaining.is_empty() {
            next.remove(&key);
        } else {
            next.insert(key, remaining);
        }
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    /// Writes the state document to a temp file and renames it over the
    /// backing file, so a reader never observes a partial write.
    async fn persist(&self, state: &QueueState) -> Result<(), QueueError> {
        let json = serde_json::to_vec(state)?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
