//! The read-write scheduler: the plugin's data-plane loop.
//!
//! One task owns all device handler invocations. Each iteration drains a
//! bounded batch from the write queue, fans reads out across the device
//! set, publishes readings to the read channel, and then sleeps for the
//! configured loop delay. Readings that would block on a full channel are
//! dropped (the cache only needs latest values; backpressure onto
//! handlers would amplify device latency).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::PluginConfig;
use crate::device::{Device, DeviceReadings, WriteData};
use crate::reading::rfc3339_now;
use crate::registry::DeviceRegistry;
use crate::transaction::{TransactionTracker, WriteState};

/// A write waiting in the queue, referencing its tracked transaction.
#[derive(Debug, Clone)]
pub struct QueuedWrite {
    pub transaction_id: String,
    pub device_id: String,
    pub data: WriteData,
}

/// One unit of read dispatch: a bulk read covering every device of a
/// kind, or a single-device read.
enum ReadUnit {
    Bulk(Vec<Arc<Device>>),
    Single(Arc<Device>),
}

pub struct Scheduler {
    registry: Arc<DeviceRegistry>,
    plan: Vec<ReadUnit>,
    tracker: TransactionTracker,
    readings_tx: mpsc::Sender<DeviceReadings>,
    write_rx: mpsc::Receiver<QueuedWrite>,
    writes_per_loop: usize,
    loop_delay: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        tracker: TransactionTracker,
        readings_tx: mpsc::Sender<DeviceReadings>,
        write_rx: mpsc::Receiver<QueuedWrite>,
        config: &PluginConfig,
    ) -> Self {
        let plan = build_read_plan(&registry);
        Self {
            registry,
            plan,
            tracker,
            readings_tx,
            write_rx,
            writes_per_loop: config.writes_per_loop,
            loop_delay: Duration::from_millis(config.loop_delay),
        }
    }

    /// Run the loop until the shutdown signal fires. Handler calls in
    /// flight when it fires complete before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            devices = self.registry.len(),
            writes_per_loop = self.writes_per_loop,
            loop_delay_ms = self.loop_delay.as_millis() as u64,
            "starting read-write loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.drain_writes().await;
            self.dispatch_reads().await;

            if self.loop_delay.is_zero() {
                // Stay cooperative on a delay-free loop.
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(self.loop_delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!("read-write loop stopped");
    }

    /// Pop up to `writes_per_loop` transactions off the queue and execute
    /// them, updating the tracker on every transition.
    async fn drain_writes(&mut self) {
        for _ in 0..self.writes_per_loop {
            let write = match self.write_rx.try_recv() {
                Ok(write) => write,
                Err(_) => break,
            };

            let device = match self.registry.get(&write.device_id) {
                Some(device) => device.clone(),
                None => {
                    self.tracker
                        .transition(&write.transaction_id, WriteState::Error, "unknown device")
                        .await;
                    continue;
                }
            };

            self.tracker
                .transition(&write.transaction_id, WriteState::Writing, "")
                .await;

            let result = if device.is_writable() {
                device.handler().write(&device, &write.data).await
            } else {
                Err(crate::errors::SdkError::NotSupported(format!(
                    "device {} does not support writes",
                    device.id
                )))
            };

            match result {
                Ok(()) => {
                    self.tracker
                        .transition(&write.transaction_id, WriteState::Done, "")
                        .await;
                }
                Err(err) => {
                    tracing::error!(device = %device.id, %err, "write failed");
                    self.tracker
                        .transition(&write.transaction_id, WriteState::Error, err.to_string())
                        .await;
                }
            }
        }
    }

    /// Invoke reads across the device set. Individual handler failures are
    /// logged and skipped; the loop keeps running.
    async fn dispatch_reads(&self) {
        for unit in &self.plan {
            match unit {
                ReadUnit::Bulk(devices) => {
                    let handler = devices[0].handler();
                    match handler.bulk_read(devices).await {
                        Ok(batches) => {
                            for batch in batches {
                                self.publish(batch);
                            }
                        }
                        Err(err) => {
                            tracing::error!(
                                kind = %devices[0].kind,
                                %err,
                                "bulk read failed"
                            );
                        }
                    }
                }
                ReadUnit::Single(device) => {
                    match device.handler().read(device).await {
                        Ok(readings) => self.publish(DeviceReadings {
                            device_id: device.id.clone(),
                            readings,
                        }),
                        Err(err) => {
                            tracing::error!(device = %device.id, %err, "read failed");
                        }
                    }
                }
            }
        }
    }

    /// Stamp, transform, and publish one device's readings. Drops the
    /// batch with a log line when the read channel is full.
    fn publish(&self, mut batch: DeviceReadings) {
        let device = match self.registry.get(&batch.device_id) {
            Some(device) => device,
            None => {
                tracing::warn!(device = %batch.device_id, "readings for unknown device");
                return;
            }
        };

        let mut readings = Vec::with_capacity(batch.readings.len());
        for mut reading in batch.readings.drain(..) {
            if reading.timestamp.is_empty() {
                reading.timestamp = rfc3339_now();
            }
            if reading.info.is_empty() {
                reading.info = device.info.clone();
            }

            if let Some(output) = device.output(&reading.reading_type) {
                if reading.unit == Default::default() {
                    reading.unit = output.unit.clone();
                }
                match output.apply(reading.value.clone()) {
                    Ok(value) => reading.value = value,
                    Err(err) => {
                        tracing::warn!(
                            device = %device.id,
                            reading_type = %reading.reading_type,
                            %err,
                            "dropping reading"
                        );
                        continue;
                    }
                }
            }
            readings.push(reading);
        }

        if readings.is_empty() {
            return;
        }

        batch.readings = readings;
        if let Err(mpsc::error::TrySendError::Full(_)) = self.readings_tx.try_send(batch) {
            tracing::warn!(device = %device.id, "read channel full, dropping readings");
        }
    }
}

/// Build the read dispatch plan: devices whose handler bulk-reads are
/// grouped per kind; the rest read one at a time, in config order.
fn build_read_plan(registry: &DeviceRegistry) -> Vec<ReadUnit> {
    let mut plan: Vec<ReadUnit> = Vec::new();
    let mut bulk_groups: Vec<((String, String), Vec<Arc<Device>>)> = Vec::new();

    for device in registry.devices() {
        let handler = device.handler();
        if handler.supports_bulk_read() {
            let key = (device.device_type.clone(), device.model.clone());
            match bulk_groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(device.clone()),
                None => bulk_groups.push((key, vec![device.clone()])),
            }
        } else if handler.supports_read() {
            plan.push(ReadUnit::Single(device.clone()));
        }
    }

    plan.extend(
        bulk_groups
            .into_iter()
            .map(|(_, group)| ReadUnit::Bulk(group)),
    );
    plan
}
