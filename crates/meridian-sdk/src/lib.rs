//! Meridian Plugin SDK
//!
//! A framework for building plugins that expose heterogeneous devices
//! (sensors, actuators, meters) to an orchestration plane over gRPC. A
//! plugin registers device handlers for the (type, model) pairs it knows
//! how to talk to; the SDK owns everything else:
//!
//! - **Configuration**: layered YAML discovery with per-source policies,
//!   scheme-version validation, and device-config unification.
//! - **Registry**: device instances materialized from unified config with
//!   deterministic, content-derived IDs.
//! - **Scheduling**: a single read-write loop that drains a bounded write
//!   queue and fans reads out across the device set.
//! - **State**: a latest-readings cache and a TTL-reaped transaction
//!   tracker.
//! - **RPC**: the `PluginV1` gRPC service over a Unix-domain socket or
//!   TCP.
//!
//! ## Quick start
//!
//! ```no_run
//! use meridian_sdk::prelude::*;
//!
//! struct TempHandler;
//!
//! #[async_trait::async_trait]
//! impl DeviceHandler for TempHandler {
//!     fn device_type(&self) -> &str { "temperature" }
//!     fn model(&self) -> &str { "temp2010" }
//!     fn supports_read(&self) -> bool { true }
//!
//!     async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
//!         Ok(vec![Reading::new(device.device_type.clone(), 72i16)])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     Plugin::builder()
//!         .identifier(|data| data.get("id").cloned().unwrap_or_default())
//!         .register_handler(TempHandler)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub use meridian_proto as proto;

pub mod cache;
pub mod cli;
pub mod config;
pub mod device;
pub mod errors;
pub mod output;
pub mod plugin;
pub mod policy;
pub mod reading;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod transaction;
pub mod version;

// Re-exports for convenience
pub use cache::ReadingCache;
pub use config::{
    ConfigContext, ConfigSource, DeviceConfig, DeviceInstance, DeviceKind, Location,
    NetworkConfig, PluginConfig,
};
pub use device::{Device, DeviceHandler, DeviceReadings, WriteData};
pub use errors::{MultiError, Result, SdkError};
pub use output::{Conversion, OutputType, Unit};
pub use plugin::{Plugin, PluginBuilder, Runtime};
pub use policy::{ConfigPolicies, Policy};
pub use reading::{Reading, ReadingValue};
pub use registry::DeviceRegistry;
pub use transaction::{TransactionTracker, WriteState, WriteTransaction};
pub use version::{SchemeVersion, VersionInfo, SDK_VERSION};

/// Common imports for plugin authors.
pub mod prelude {
    pub use crate::device::{Device, DeviceHandler, DeviceReadings, WriteData};
    pub use crate::errors::{Result, SdkError};
    pub use crate::output::{OutputType, Unit};
    pub use crate::plugin::{Plugin, PluginBuilder};
    pub use crate::policy::{ConfigPolicies, Policy};
    pub use crate::reading::{Reading, ReadingValue};
    pub use crate::version::VersionInfo;
}
