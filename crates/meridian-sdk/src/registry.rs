//! The device registry: materializing devices from unified config.
//!
//! Each configured instance becomes a `Device` bound to the handler
//! registered for its kind's (type, model) pair, with a deterministic ID.
//! The registry is built once at startup and immutable afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::DeviceConfig;
use crate::device::{Device, DeviceHandler};
use crate::errors::{MultiError, Result};
use crate::output::OutputType;

/// Extracts the protocol-unique identifier component from a device's
/// opaque data, e.g. a serial number or bus address.
pub type IdentifierFn = dyn Fn(&HashMap<String, String>) -> String + Send + Sync;

/// Field separator for ID derivation. A non-printing separator keeps the
/// concatenation unambiguous.
const ID_SEPARATOR: u8 = 0x1f;

/// Derive a device ID: the hex SHA-256 of rack, board, type, model, and
/// the protocol identifier, in that order. Stable across restarts as long
/// as config and the identifier function are stable.
pub fn device_id(rack: &str, board: &str, device_type: &str, model: &str, component: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [rack, board, device_type, model, component] {
        hasher.update(part.as_bytes());
        hasher.update([ID_SEPARATOR]);
    }
    let digest = hasher.finalize();
    let mut id = String::with_capacity(digest.len() * 2);
    for byte in digest {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

/// The immutable set of devices a plugin serves, indexed by ID.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    by_id: HashMap<String, Arc<Device>>,
    /// Devices in deterministic (config) order, for enumeration and
    /// scheduling.
    ordered: Vec<Arc<Device>>,
}

impl DeviceRegistry {
    /// Materialize devices from a unified device config.
    ///
    /// Every kind must have a registered handler for its (type, model)
    /// pair, every referenced output type must exist, and the derived IDs
    /// must be unique.
    pub fn build(
        config: &DeviceConfig,
        handlers: &HashMap<(String, String), Arc<dyn DeviceHandler>>,
        output_types: &[OutputType],
        identifier: &IdentifierFn,
    ) -> Result<Self> {
        let outputs_by_name: HashMap<&str, &OutputType> =
            output_types.iter().map(|o| (o.name.as_str(), o)).collect();

        let mut merr = MultiError::new("device registry");
        let mut registry = DeviceRegistry::default();

        for kind in &config.devices {
            let device_type = kind.effective_type().to_string();
            let handler = match handlers.get(&(device_type.clone(), kind.model.clone())) {
                Some(handler) => handler.clone(),
                None => {
                    if kind.instances.is_empty() {
                        // A prototype-only kind with no instances needs no
                        // handler yet.
                        continue;
                    }
                    merr.add_validation(format!(
                        "no handler registered for device kind {} ({}/{})",
                        kind.name, device_type, kind.model
                    ));
                    continue;
                }
            };

            if !handler.supports_read() && !handler.supports_bulk_read() {
                tracing::warn!(
                    kind = %kind.name,
                    "handler supports neither read nor bulk read; devices will not be polled"
                );
            }

            for instance in &kind.instances {
                let location = match config.location(&instance.location) {
                    Some(location) => location.clone(),
                    None => {
                        merr.add_validation(format!(
                            "device kind {}: unresolved location {}",
                            kind.name, instance.location
                        ));
                        continue;
                    }
                };

                let mut outputs = Vec::new();
                for name in kind.outputs.iter().chain(instance.outputs.iter()) {
                    match outputs_by_name.get(name.as_str()) {
                        Some(output) => outputs.push((*output).clone()),
                        None => merr.add_validation(format!(
                            "device kind {}: unknown output type {}",
                            kind.name, name
                        )),
                    }
                }

                let component = identifier(&instance.data);
                let id = device_id(
                    &location.rack,
                    &location.board,
                    &device_type,
                    &kind.model,
                    &component,
                );

                let device = Arc::new(Device::new(
                    id.clone(),
                    kind.name.clone(),
                    device_type.clone(),
                    kind.model.clone(),
                    instance.info.clone(),
                    instance.data.clone(),
                    location,
                    outputs,
                    handler.clone(),
                ));

                if registry.by_id.insert(id.clone(), device.clone()).is_some() {
                    merr.add_validation(format!(
                        "duplicate device id {} (kind {}); instances must differ in location or identifier data",
                        id, kind.name
                    ));
                    continue;
                }
                registry.ordered.push(device);
            }
        }

        merr.into_result()?;
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Device>> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Devices in config order.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// The device map, shared with the scheduler and server.
    pub fn by_id(&self) -> &HashMap<String, Arc<Device>> {
        &self.by_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_is_deterministic() {
        let a = device_id("rack-1", "board-1", "temperature", "temp2010", "42");
        let b = device_id("rack-1", "board-1", "temperature", "temp2010", "42");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_device_id_separator_is_unambiguous() {
        // Without a separator these two would collide.
        let a = device_id("rack-1", "board-1", "temperature", "temp2010", "42");
        let b = device_id("rack-1", "board-1temperature", "", "temp2010", "42");
        assert_ne!(a, b);
    }

    #[test]
    fn test_device_id_varies_by_component() {
        let a = device_id("rack-1", "board-1", "temperature", "temp2010", "42");
        let b = device_id("rack-1", "board-1", "temperature", "temp2010", "43");
        assert_ne!(a, b);
    }
}
