//! The reading cache: latest readings per device.
//!
//! A single updater task drains the read channel and replaces each
//! device's entry; everything else reads through a read lock. The cache
//! holds only the most recent batch per device, which is all the RPC
//! surface serves.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::device::DeviceReadings;
use crate::reading::Reading;

#[derive(Debug, Clone, Default)]
pub struct ReadingCache {
    inner: Arc<RwLock<HashMap<String, Vec<Reading>>>>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a device's readings. Called only from the updater task.
    pub async fn update(&self, device_id: String, readings: Vec<Reading>) {
        self.inner.write().await.insert(device_id, readings);
    }

    /// The latest readings for a device, if any have been taken.
    pub async fn get(&self, device_id: &str) -> Option<Vec<Reading>> {
        self.inner.read().await.get(device_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Spawn the updater task: the cache's sole writer.
    pub fn spawn_updater(
        &self,
        mut readings_rx: mpsc::Receiver<DeviceReadings>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    batch = readings_rx.recv() => match batch {
                        Some(batch) => {
                            cache.update(batch.device_id, batch.readings).await;
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
