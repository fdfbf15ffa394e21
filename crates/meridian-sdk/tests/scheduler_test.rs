//! Read-write scheduler tests.
//!
//! Drives the scheduler against an emulated handler and checks the
//! end-to-end behavior: readings land in the cache transformed, writes
//! move their transactions through the state machine, and failures stay
//! local to the loop iteration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};

use meridian_sdk::cache::ReadingCache;
use meridian_sdk::config::{DeviceConfig, DeviceInstance, DeviceKind, Location, PluginConfig};
use meridian_sdk::device::{Device, DeviceHandler, WriteData};
use meridian_sdk::reading::{Reading, ReadingValue};
use meridian_sdk::registry::DeviceRegistry;
use meridian_sdk::scheduler::{QueuedWrite, Scheduler};
use meridian_sdk::transaction::{TransactionTracker, WriteState, WriteTransaction};
use meridian_sdk::{OutputType, Result};

/// Emulated temperature handler returning a fixed raw value and recording
/// the writes it receives.
struct EmulatedHandler {
    value: i16,
    writes: Arc<Mutex<Vec<String>>>,
}

impl EmulatedHandler {
    fn new(value: i16) -> Self {
        Self {
            value,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait::async_trait]
impl DeviceHandler for EmulatedHandler {
    fn device_type(&self) -> &str {
        "temperature"
    }

    fn model(&self) -> &str {
        "temp2010"
    }

    fn supports_read(&self) -> bool {
        true
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
        Ok(vec![Reading::new(device.device_type.clone(), self.value)])
    }

    async fn write(&self, _device: &Device, data: &WriteData) -> Result<()> {
        self.writes.lock().await.push(data.data.clone());
        Ok(())
    }
}

fn device_config() -> DeviceConfig {
    DeviceConfig {
        version: "1.0".to_string(),
        locations: vec![Location {
            name: "r1b1".to_string(),
            rack: "rack-1".to_string(),
            board: "board-1".to_string(),
        }],
        devices: vec![DeviceKind {
            name: "temperature".to_string(),
            model: "temp2010".to_string(),
            outputs: vec!["temperature".to_string()],
            instances: vec![DeviceInstance {
                location: "r1b1".to_string(),
                data: HashMap::from([("id".to_string(), "42".to_string())]),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn build_registry(handler: impl DeviceHandler, output: OutputType) -> Arc<DeviceRegistry> {
    let mut handlers: HashMap<(String, String), Arc<dyn DeviceHandler>> = HashMap::new();
    handlers.insert(
        ("temperature".to_string(), "temp2010".to_string()),
        Arc::new(handler),
    );
    let identifier = |data: &HashMap<String, String>| data.get("id").cloned().unwrap_or_default();

    Arc::new(
        DeviceRegistry::build(&device_config(), &handlers, &[output], &identifier).unwrap(),
    )
}

struct Harness {
    cache: ReadingCache,
    tracker: TransactionTracker,
    write_tx: mpsc::Sender<QueuedWrite>,
    shutdown_tx: watch::Sender<bool>,
}

/// Wire up cache updater and scheduler tasks around a registry.
fn start(registry: Arc<DeviceRegistry>) -> Harness {
    let config = PluginConfig {
        loop_delay: 5,
        ..Default::default()
    }
    .finalize();

    let (readings_tx, readings_rx) = mpsc::channel(config.read_buffer_size);
    let (write_tx, write_rx) = mpsc::channel(config.write_buffer_size);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tracker = TransactionTracker::new(config.transaction_ttl);
    let cache = ReadingCache::new();
    cache.spawn_updater(readings_rx, shutdown_rx.clone());

    let scheduler = Scheduler::new(registry, tracker.clone(), readings_tx, write_rx, &config);
    tokio::spawn(scheduler.run(shutdown_rx));

    Harness {
        cache,
        tracker,
        write_tx,
        shutdown_tx,
    }
}

async fn wait_for_readings(harness: &Harness, device_id: &str) -> Vec<Reading> {
    for _ in 0..500 {
        if let Some(readings) = harness.cache.get(device_id).await {
            return readings;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no readings cached for {}", device_id);
}

async fn wait_for_terminal(harness: &Harness, transaction_id: &str) -> WriteTransaction {
    for _ in 0..500 {
        if let Some(transaction) = harness.tracker.get(transaction_id).await {
            if transaction.state.is_terminal() {
                return transaction;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("transaction {} never reached a terminal state", transaction_id);
}

#[tokio::test]
async fn test_read_with_identity_scaling_preserves_value() {
    let registry = build_registry(EmulatedHandler::new(72), {
        OutputType {
            name: "temperature".to_string(),
            scaling_factor: "1".to_string(),
            ..Default::default()
        }
    });
    let device_id = registry.devices()[0].id.clone();
    let harness = start(registry);

    let readings = wait_for_readings(&harness, &device_id).await;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].reading_type, "temperature");
    // Factor 1 is the identity: value and variant unchanged.
    assert_eq!(readings[0].value, ReadingValue::I16(72));
    // The scheduler stamped an RFC 3339 timestamp.
    assert!(chrono::DateTime::parse_from_rfc3339(&readings[0].timestamp).is_ok());

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_read_with_scaling_and_conversion() {
    let registry = build_registry(EmulatedHandler::new(1500), {
        OutputType {
            name: "temperature".to_string(),
            scaling_factor: ".1".to_string(),
            conversion: "englishToMetricTemperature".to_string(),
            ..Default::default()
        }
    });
    let device_id = registry.devices()[0].id.clone();
    let harness = start(registry);

    // 1500 tenths of a degree Fahrenheit: 150.0 F -> 65.56 C.
    let readings = wait_for_readings(&harness, &device_id).await;
    assert_eq!(readings[0].value, ReadingValue::F64(65.55555555555556));

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_write_transaction_lifecycle() {
    let registry = build_registry(EmulatedHandler::new(72), OutputType::new("temperature"));
    let device_id = registry.devices()[0].id.clone();
    let harness = start(registry);

    let data = WriteData::new("set", "on");
    let transaction = WriteTransaction::new(device_id.clone(), data.clone());
    assert_eq!(transaction.state, WriteState::Pending);

    harness.tracker.add(transaction.clone()).await;
    harness
        .write_tx
        .send(QueuedWrite {
            transaction_id: transaction.id.clone(),
            device_id,
            data,
        })
        .await
        .unwrap();

    let finished = wait_for_terminal(&harness, &transaction.id).await;
    assert_eq!(finished.state, WriteState::Done);
    assert!(finished.updated >= finished.created);

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_write_to_unknown_device_errors() {
    let registry = build_registry(EmulatedHandler::new(72), OutputType::new("temperature"));
    let harness = start(registry);

    let data = WriteData::new("set", "on");
    let transaction = WriteTransaction::new("not-a-device", data.clone());
    harness.tracker.add(transaction.clone()).await;
    harness
        .write_tx
        .send(QueuedWrite {
            transaction_id: transaction.id.clone(),
            device_id: "not-a-device".to_string(),
            data,
        })
        .await
        .unwrap();

    let finished = wait_for_terminal(&harness, &transaction.id).await;
    assert_eq!(finished.state, WriteState::Error);
    assert_eq!(finished.message, "unknown device");

    let _ = harness.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_reaper_removes_completed_transactions() {
    let tracker = TransactionTracker::new(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = tracker.spawn_reaper(shutdown_rx);

    let mut transaction = WriteTransaction::new("dev-1", WriteData::new("set", "on"));
    transaction.transition(WriteState::Writing, "");
    transaction.transition(WriteState::Done, "");
    tracker.add(transaction.clone()).await;

    // TTL is one second and the reaper passes every second; well within
    // three seconds the terminal transaction is gone.
    let mut reaped = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if tracker.get(&transaction.id).await.is_none() {
            reaped = true;
            break;
        }
    }
    assert!(reaped, "transaction outlived its TTL");

    shutdown_tx.send(true).unwrap();
    reaper.await.unwrap();
}

#[tokio::test]
async fn test_writes_to_same_device_preserve_order() {
    let handler = EmulatedHandler::new(72);
    let writes = handler.writes.clone();
    let registry = build_registry(handler, OutputType::new("temperature"));
    let device_id = registry.devices()[0].id.clone();
    let harness = start(registry);

    let mut last_id = String::new();
    for payload in ["first", "second", "third"] {
        let data = WriteData::new("set", payload);
        let transaction = WriteTransaction::new(device_id.clone(), data.clone());
        last_id = transaction.id.clone();
        harness.tracker.add(transaction.clone()).await;
        harness
            .write_tx
            .send(QueuedWrite {
                transaction_id: transaction.id,
                device_id: device_id.clone(),
                data,
            })
            .await
            .unwrap();
    }

    let finished = wait_for_terminal(&harness, &last_id).await;
    assert_eq!(finished.state, WriteState::Done);

    let recorded = writes.lock().await.clone();
    assert_eq!(recorded, vec!["first", "second", "third"]);

    let _ = harness.shutdown_tx.send(true);
}
