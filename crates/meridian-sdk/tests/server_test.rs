//! RPC surface tests.
//!
//! Exercises the server glue directly through the generated service
//! trait: registry lookups, cache reads, write enqueues against a bounded
//! queue, and transaction lookups.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tonic::{Code, Request};

use meridian_sdk::cache::ReadingCache;
use meridian_sdk::config::{DeviceConfig, DeviceInstance, DeviceKind, Location};
use meridian_sdk::device::{Device, DeviceHandler};
use meridian_sdk::proto::v1 as proto;
use meridian_sdk::proto::PluginV1;
use meridian_sdk::reading::Reading;
use meridian_sdk::registry::DeviceRegistry;
use meridian_sdk::scheduler::QueuedWrite;
use meridian_sdk::server::PluginServer;
use meridian_sdk::transaction::{TransactionTracker, WriteState, WriteTransaction};
use meridian_sdk::{Result, WriteData};

struct LedHandler;

#[async_trait::async_trait]
impl DeviceHandler for LedHandler {
    fn device_type(&self) -> &str {
        "led"
    }

    fn model(&self) -> &str {
        "led-8"
    }

    fn supports_read(&self) -> bool {
        true
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
        Ok(vec![Reading::new(device.device_type.clone(), "on")])
    }

    async fn write(&self, _device: &Device, _data: &WriteData) -> Result<()> {
        Ok(())
    }
}

fn make_registry() -> Arc<DeviceRegistry> {
    let config = DeviceConfig {
        version: "1.0".to_string(),
        locations: vec![Location {
            name: "r1b1".to_string(),
            rack: "rack-1".to_string(),
            board: "board-1".to_string(),
        }],
        devices: vec![DeviceKind {
            name: "led".to_string(),
            model: "led-8".to_string(),
            instances: vec![DeviceInstance {
                info: "status led".to_string(),
                location: "r1b1".to_string(),
                data: HashMap::from([("address".to_string(), "0x20".to_string())]),
                ..Default::default()
            }],
            ..Default::default()
        }],
    };

    let mut handlers: HashMap<(String, String), Arc<dyn DeviceHandler>> = HashMap::new();
    handlers.insert(("led".to_string(), "led-8".to_string()), Arc::new(LedHandler));
    let identifier =
        |data: &HashMap<String, String>| data.get("address").cloned().unwrap_or_default();

    Arc::new(DeviceRegistry::build(&config, &handlers, &[], &identifier).unwrap())
}

/// Build a server around a write queue of the given capacity. Returns the
/// server, the queue receiver (kept alive so sends do not fail), and the
/// device id.
fn make_server(
    write_capacity: usize,
) -> (PluginServer, mpsc::Receiver<QueuedWrite>, ReadingCache, TransactionTracker, String) {
    let registry = make_registry();
    let device_id = registry.devices()[0].id.clone();
    let cache = ReadingCache::new();
    let tracker = TransactionTracker::new(300);
    let (write_tx, write_rx) = mpsc::channel(write_capacity);

    let meta = proto::PluginMeta {
        name: "test-plugin".to_string(),
        version: "0.1.0".to_string(),
        ..Default::default()
    };

    let server = PluginServer::new(
        registry,
        cache.clone(),
        tracker.clone(),
        write_tx,
        meta,
    );
    (server, write_rx, cache, tracker, device_id)
}

#[tokio::test]
async fn test_devices_streams_registry() {
    let (server, _write_rx, _cache, _tracker, device_id) = make_server(8);

    let response = server
        .devices(Request::new(proto::DeviceFilter::default()))
        .await
        .unwrap();
    let summaries: Vec<_> = response
        .into_inner()
        .collect::<Vec<std::result::Result<proto::DeviceSummary, tonic::Status>>>()
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, device_id);
    assert_eq!(summaries[0].kind, "led");
    assert_eq!(summaries[0].location.as_ref().unwrap().rack, "rack-1");
}

#[tokio::test]
async fn test_devices_filter_by_kind() {
    let (server, _write_rx, _cache, _tracker, _device_id) = make_server(8);

    let response = server
        .devices(Request::new(proto::DeviceFilter {
            kind: "fan".to_string(),
        }))
        .await
        .unwrap();
    let summaries: Vec<_> = response.into_inner().collect::<Vec<_>>().await;
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn test_read_unknown_device_is_not_found() {
    let (server, _write_rx, _cache, _tracker, _device_id) = make_server(8);

    let err = server
        .read(Request::new(proto::ReadRequest {
            device_id: "bogus".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_read_returns_cached_readings() {
    let (server, _write_rx, cache, _tracker, device_id) = make_server(8);

    cache
        .update(
            device_id.clone(),
            vec![Reading::new("led", "on").with_timestamp("2018-02-01T12:00:00Z")],
        )
        .await;

    let response = server
        .read(Request::new(proto::ReadRequest { device_id }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.readings.len(), 1);
    assert_eq!(
        response.readings[0].value,
        Some(proto::reading::Value::StringValue("on".to_string()))
    );
}

#[tokio::test]
async fn test_read_with_empty_cache_is_empty() {
    let (server, _write_rx, _cache, _tracker, device_id) = make_server(8);

    let response = server
        .read(Request::new(proto::ReadRequest { device_id }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.readings.is_empty());
}

#[tokio::test]
async fn test_write_creates_pending_transactions() {
    let (server, mut write_rx, _cache, tracker, device_id) = make_server(8);

    let response = server
        .write(Request::new(proto::WriteRequest {
            device_id: device_id.clone(),
            writes: vec![proto::WriteData {
                action: "set".to_string(),
                data: "on".to_string(),
            }],
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.transactions.len(), 1);
    let status = &response.transactions[0];
    assert!(!status.id.is_empty());
    assert_eq!(status.state, proto::WriteState::Pending as i32);

    // The transaction is tracked and the write is queued.
    let tracked = tracker.get(&status.id).await.unwrap();
    assert_eq!(tracked.state, WriteState::Pending);
    let queued = write_rx.recv().await.unwrap();
    assert_eq!(queued.transaction_id, status.id);
    assert_eq!(queued.device_id, device_id);
}

#[tokio::test]
async fn test_write_unknown_device_is_not_found() {
    let (server, _write_rx, _cache, _tracker, _device_id) = make_server(8);

    let err = server
        .write(Request::new(proto::WriteRequest {
            device_id: "bogus".to_string(),
            writes: vec![proto::WriteData::default()],
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_write_queue_full_is_resource_exhausted() {
    // Queue capacity of two, nothing draining it.
    let (server, _write_rx, _cache, tracker, device_id) = make_server(2);

    let write = |data: &str| proto::WriteRequest {
        device_id: device_id.clone(),
        writes: vec![proto::WriteData {
            action: "set".to_string(),
            data: data.to_string(),
        }],
    };

    server.write(Request::new(write("1"))).await.unwrap();
    server.write(Request::new(write("2"))).await.unwrap();

    let err = server.write(Request::new(write("3"))).await.unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);

    // The rejected write leaves no transaction behind.
    assert_eq!(tracker.len().await, 2);
}

#[tokio::test]
async fn test_transaction_lookup() {
    let (server, _write_rx, _cache, tracker, device_id) = make_server(8);

    let transaction = WriteTransaction::new(device_id, WriteData::new("set", "on"));
    let id = transaction.id.clone();
    tracker.add(transaction).await;

    let status = server
        .transaction(Request::new(proto::TransactionRequest { id: id.clone() }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.id, id);
    assert_eq!(status.state, proto::WriteState::Pending as i32);

    let err = server
        .transaction(Request::new(proto::TransactionRequest {
            id: "missing".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_metainfo_and_health() {
    let (server, _write_rx, _cache, _tracker, _device_id) = make_server(8);

    let meta = server
        .metainfo(Request::new(proto::Empty {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(meta.name, "test-plugin");

    let health = server
        .health(Request::new(proto::Empty {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(health.status, "ok");
    assert!(chrono::DateTime::parse_from_rfc3339(&health.timestamp).is_ok());
}

#[tokio::test]
async fn test_capabilities_projection() {
    let (server, _write_rx, _cache, _tracker, _device_id) = make_server(8);

    let capabilities = server
        .capabilities(Request::new(proto::Empty {}))
        .await
        .unwrap()
        .into_inner()
        .capabilities;
    assert_eq!(capabilities.len(), 1);
    assert_eq!(capabilities[0].kind, "led");
    assert!(capabilities[0].readable);
    assert!(capabilities[0].writable);
}
