//! An emulated temperature plugin.
//!
//! Registers one handler for `temperature/temp2010` devices and registers
//! its devices dynamically, so it runs without any config files:
//!
//! ```sh
//! cargo run --example temperature_plugin
//! ```

use std::collections::HashMap;

use anyhow::Result;
use serde_json::json;

use meridian_sdk::config::DynamicRegistration;
use meridian_sdk::prelude::*;
use meridian_sdk::{DeviceConfig, DeviceInstance, DeviceKind, Location, PluginConfig};

/// Read/write behavior for the emulated `temp2010` temperature sensor.
struct TemperatureHandler;

#[async_trait::async_trait]
impl DeviceHandler for TemperatureHandler {
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

    async fn read(&self, device: &Device) -> meridian_sdk::Result<Vec<Reading>> {
        let id: i16 = device
            .data
            .get("id")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| {
                SdkError::Handler("device data requires an integer id".to_string())
            })?;

        // Emulate a reading that wanders with the device id.
        let value = 700 + (id % 10) * 3;
        Ok(vec![Reading::new(device.device_type.clone(), value)])
    }

    async fn write(&self, device: &Device, data: &WriteData) -> meridian_sdk::Result<()> {
        tracing::info!(
            device = %device.id,
            action = %data.action,
            data = %data.data,
            "emulated write"
        );
        Ok(())
    }
}

/// Map a dynamic-registration payload to one configured device.
fn register_devices(entry: &serde_json::Value) -> meridian_sdk::Result<Vec<DeviceConfig>> {
    let id = entry
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SdkError::Validation("registration entry requires an id".to_string()))?;

    Ok(vec![DeviceConfig {
        version: "1.0".to_string(),
        locations: vec![Location {
            name: "r1b1".to_string(),
            rack: "rack-1".to_string(),
            board: "board-1".to_string(),
        }],
        devices: vec![DeviceKind {
            name: "temperature".to_string(),
            model: "temp2010".to_string(),
            outputs: vec!["emulator.temperature".to_string()],
            instances: vec![DeviceInstance {
                info: format!("emulated temperature sensor {}", id),
                location: "r1b1".to_string(),
                data: HashMap::from([("id".to_string(), id.to_string())]),
                ..Default::default()
            }],
            ..Default::default()
        }],
    }])
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = PluginConfig {
        version: "1.0".to_string(),
        name: "temperature-emulator".to_string(),
        loop_delay: 250,
        dynamic_registration: DynamicRegistration {
            config: vec![json!({ "id": "42" })],
        },
        ..Default::default()
    };

    let plugin = Plugin::builder()
        .identifier(|data| data.get("id").cloned().unwrap_or_default())
        .register_handler(TemperatureHandler)
        .register_output_type(OutputType {
            name: "emulator.temperature".to_string(),
            precision: 1,
            unit: Unit::new("fahrenheit", "F"),
            scaling_factor: ".1".to_string(),
            ..Default::default()
        })
        .plugin_config(config)
        .policies(ConfigPolicies {
            plugin_config: Policy::Optional,
            ..Default::default()
        })
        .version_info(VersionInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        })
        .build()?;

    plugin.run().await?;
    Ok(())
}
