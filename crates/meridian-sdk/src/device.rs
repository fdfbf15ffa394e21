//! Devices and device handlers.
//!
//! A `DeviceHandler` is the plugin-supplied code for one (type, model)
//! pair; a `Device` is one materialized instance bound to its handler.
//! Handlers are invoked serially from the scheduler task, so handler
//! authors can reason about one device operation at a time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use meridian_proto::v1 as proto;

use crate::config::Location;
use crate::errors::{Result, SdkError};
use crate::output::OutputType;
use crate::reading::Reading;

/// Payload of a single write request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteData {
    /// The action to perform, e.g. `set`.
    pub action: String,
    /// Action data, e.g. `on`.
    pub data: String,
}

impl WriteData {
    pub fn new(action: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: data.into(),
        }
    }
}

/// The readings one device produced in one read pass. This is also the
/// payload published on the read channel.
#[derive(Debug, Clone)]
pub struct DeviceReadings {
    pub device_id: String,
    pub readings: Vec<Reading>,
}

/// Read/write behavior for one (type, model) pair.
///
/// A handler must support `read` or `bulk_read` for its devices to be
/// polled, and `write` for writes to be accepted. The `supports_*` flags
/// advertise which of the default implementations are overridden.
///
/// Handlers are not interrupted by shutdown; a read or write in flight
/// when cancellation fires completes and its result is discarded. I/O
/// timeouts are the handler's own responsibility.
#[async_trait]
pub trait DeviceHandler: Send + Sync + 'static {
    /// The device type this handler serves, e.g. `temperature`.
    fn device_type(&self) -> &str;

    /// The device model this handler serves, e.g. `temp2010`.
    fn model(&self) -> &str;

    fn supports_read(&self) -> bool {
        false
    }

    fn supports_bulk_read(&self) -> bool {
        false
    }

    fn supports_write(&self) -> bool {
        false
    }

    /// Read from a single device.
    async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
        let _ = device;
        Err(SdkError::NotSupported(format!(
            "handler {}/{} does not support reads",
            self.device_type(),
            self.model()
        )))
    }

    /// Read from every device of this handler's kind in one pass. When
    /// supported, this takes precedence over per-device `read`.
    async fn bulk_read(&self, devices: &[Arc<Device>]) -> Result<Vec<DeviceReadings>> {
        let _ = devices;
        Err(SdkError::NotSupported(format!(
            "handler {}/{} does not support bulk reads",
            self.device_type(),
            self.model()
        )))
    }

    /// Write to a single device.
    async fn write(&self, device: &Device, data: &WriteData) -> Result<()> {
        let _ = (device, data);
        Err(SdkError::NotSupported(format!(
            "handler {}/{} does not support writes",
            self.device_type(),
            self.model()
        )))
    }
}

/// A materialized device instance.
#[derive(Clone)]
pub struct Device {
    /// Deterministic, plugin-unique identifier.
    pub id: String,
    /// Name of the kind this device was configured under.
    pub kind: String,
    pub device_type: String,
    pub model: String,
    /// Free-form description from config.
    pub info: String,
    /// Protocol-specific opaque data.
    pub data: HashMap<String, String>,
    pub location: Location,
    /// The output types this device produces readings for.
    pub outputs: Vec<OutputType>,

    handler: Arc<dyn DeviceHandler>,
}

impl Device {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        kind: String,
        device_type: String,
        model: String,
        info: String,
        data: HashMap<String, String>,
        location: Location,
        outputs: Vec<OutputType>,
        handler: Arc<dyn DeviceHandler>,
    ) -> Self {
        Self {
            id,
            kind,
            device_type,
            model,
            info,
            data,
            location,
            outputs,
            handler,
        }
    }

    pub fn handler(&self) -> &Arc<dyn DeviceHandler> {
        &self.handler
    }

    /// Whether this device can be polled at all.
    pub fn is_readable(&self) -> bool {
        self.handler.supports_read() || self.handler.supports_bulk_read()
    }

    pub fn is_writable(&self) -> bool {
        self.handler.supports_write()
    }

    /// Find the output matching a reading type (the last segment of the
    /// output's dotted name).
    pub fn output(&self, reading_type: &str) -> Option<&OutputType> {
        self.outputs.iter().find(|o| o.type_name() == reading_type)
    }

    /// Encode device metadata to its wire message.
    pub fn encode(&self) -> proto::DeviceSummary {
        proto::DeviceSummary {
            id: self.id.clone(),
            kind: self.kind.clone(),
            device_type: self.device_type.clone(),
            model: self.model.clone(),
            info: self.info.clone(),
            location: Some(proto::DeviceLocation {
                rack: self.location.rack.clone(),
                board: self.location.board.clone(),
            }),
            outputs: self
                .outputs
                .iter()
                .map(|o| proto::OutputSummary {
                    name: o.name.clone(),
                    precision: o.precision,
                    unit: Some(o.unit.encode()),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("device_type", &self.device_type)
            .field("model", &self.model)
            .field("location", &self.location)
            .finish()
    }
}
