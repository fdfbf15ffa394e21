//! Configuration model for plugins, devices, and output types.
//!
//! Three trees are loaded at startup: the plugin config (runtime knobs),
//! device configs (locations, kinds, instances), and output-type configs.
//! Each parsed tree is wrapped in a [`ConfigContext`] that remembers where
//! it came from, so validation failures can name their source.

pub mod loader;
pub mod pipeline;
pub mod scheme;
pub mod unify;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::MultiError;
use crate::output::OutputType;

/// Default capacity of the read channel.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 100;
/// Default capacity of the write queue.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 100;
/// Default per-iteration write budget.
pub const DEFAULT_WRITES_PER_LOOP: usize = 5;
/// Default transaction retention, in seconds.
pub const DEFAULT_TRANSACTION_TTL: u64 = 300;

/// Where a config tree came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from a file on disk.
    File(PathBuf),
    /// Produced by the plugin's dynamic registrar.
    Dynamic,
    /// Supplied in code, or built-in defaults.
    Default,
    /// Substituted for an absent optional source.
    Empty,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "file:{}", path.display()),
            ConfigSource::Dynamic => write!(f, "dynamic"),
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Empty => write!(f, "empty"),
        }
    }
}

/// A config tree paired with its source tag.
#[derive(Debug, Clone)]
pub struct ConfigContext<T> {
    pub source: ConfigSource,
    pub config: T,
}

impl<T> ConfigContext<T> {
    pub fn new(source: ConfigSource, config: T) -> Self {
        Self { source, config }
    }
}

/// Network settings for the plugin's RPC listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Socket type: `unix` or `tcp`.
    #[serde(rename = "type")]
    pub network_type: String,
    /// Socket path (unix) or bind address (tcp). When empty, a unix socket
    /// path is derived from the plugin name.
    pub address: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_type: "unix".to_string(),
            address: String::new(),
        }
    }
}

/// Dynamic device registration settings. Each entry is an opaque map that
/// the plugin's registrar turns into device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicRegistration {
    pub config: Vec<serde_json::Value>,
}

/// Runtime configuration for the plugin itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Config scheme version tag.
    pub version: String,

    /// The name of the plugin. Required.
    pub name: String,

    /// Log at DEBUG level.
    pub debug: bool,

    /// Network settings for the RPC listener.
    pub network: NetworkConfig,

    /// Capacity of the channel readings are published to. Zero means the
    /// default.
    pub read_buffer_size: usize,

    /// Capacity of the queue writes wait in. Zero means the default.
    pub write_buffer_size: usize,

    /// Writes processed per iteration of the read-write loop. Zero means
    /// the default.
    pub writes_per_loop: usize,

    /// Delay, in milliseconds, at the end of each loop iteration. Can be
    /// zero. Useful to pace plugins whose devices update slowly.
    pub loop_delay: u64,

    /// Seconds a completed transaction is tracked for. Zero means the
    /// default.
    pub transaction_ttl: u64,

    /// Dynamic device registration payloads.
    pub dynamic_registration: DynamicRegistration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            version: String::new(),
            name: String::new(),
            debug: false,
            network: NetworkConfig::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            writes_per_loop: DEFAULT_WRITES_PER_LOOP,
            loop_delay: 0,
            transaction_ttl: DEFAULT_TRANSACTION_TTL,
            dynamic_registration: DynamicRegistration::default(),
        }
    }
}

impl PluginConfig {
    /// Replace zero-valued sizing knobs with their defaults. A zero buffer
    /// or budget would stall the runtime, so zero is read as "default";
    /// `loop_delay` legitimately may be zero and is left alone.
    pub fn finalize(mut self) -> Self {
        if self.read_buffer_size == 0 {
            self.read_buffer_size = DEFAULT_READ_BUFFER_SIZE;
        }
        if self.write_buffer_size == 0 {
            self.write_buffer_size = DEFAULT_WRITE_BUFFER_SIZE;
        }
        if self.writes_per_loop == 0 {
            self.writes_per_loop = DEFAULT_WRITES_PER_LOOP;
        }
        if self.transaction_ttl == 0 {
            self.transaction_ttl = DEFAULT_TRANSACTION_TTL;
        }
        self
    }

    /// Validate required fields, collecting failures into `merr`.
    pub fn validate(&self, merr: &mut MultiError) {
        if self.name.is_empty() {
            merr.add_validation("plugin config requires a non-empty name");
        }
        if self.version.is_empty() {
            merr.add_validation("plugin config requires a version");
        }
        match self.network.network_type.as_str() {
            "unix" | "tcp" => {}
            other => merr.add_validation(format!("unknown network type: {}", other)),
        }
        if self.network.network_type == "tcp" && self.network.address.is_empty() {
            merr.add_validation("tcp network requires an address");
        }
    }
}

/// The location of a device instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// Name instances reference this location by.
    pub name: String,
    pub rack: String,
    pub board: String,
}

impl Location {
    pub fn validate(&self, merr: &mut MultiError) {
        if self.name.is_empty() {
            merr.add_validation("location requires a non-empty name");
        }
        if self.rack.is_empty() {
            merr.add_validation(format!("location {}: rack must not be empty", self.name));
        }
        if self.board.is_empty() {
            merr.add_validation(format!("location {}: board must not be empty", self.name));
        }
    }
}

/// A single configured device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInstance {
    /// Free-form description, carried onto readings' context.
    pub info: String,
    /// Name of the location this instance lives at.
    pub location: String,
    /// Protocol-specific opaque data.
    pub data: HashMap<String, String>,
    /// Extra output type references beyond the kind's.
    pub outputs: Vec<String>,
}

/// A group of device instances sharing a type and model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceKind {
    /// Kind name, e.g. `temperature`.
    pub name: String,
    /// Device type. Defaults to the kind name's last dotted segment.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Device model, matched against registered handlers.
    pub model: String,
    /// Output type references shared by all instances of the kind.
    pub outputs: Vec<String>,
    /// The configured instances.
    pub instances: Vec<DeviceInstance>,
}

impl DeviceKind {
    /// The effective device type: the configured type, or the kind name's
    /// last dotted segment when unset.
    pub fn effective_type(&self) -> &str {
        if self.device_type.is_empty() {
            self.name.rsplit('.').next().unwrap_or(&self.name)
        } else {
            &self.device_type
        }
    }

    /// Merge another definition of the same kind into this one. Empty
    /// fields are unspecified and adopt the other side's value; fields set
    /// on both sides must agree. Instances concatenate.
    ///
    /// Returns the names of conflicting fields, empty on success.
    pub fn merge(&mut self, other: &DeviceKind) -> Vec<&'static str> {
        let mut conflicts = Vec::new();

        if self.device_type.is_empty() {
            self.device_type = other.device_type.clone();
        } else if !other.device_type.is_empty() && self.device_type != other.device_type {
            conflicts.push("type");
        }

        if self.model.is_empty() {
            self.model = other.model.clone();
        } else if !other.model.is_empty() && self.model != other.model {
            conflicts.push("model");
        }

        if self.outputs.is_empty() {
            self.outputs = other.outputs.clone();
        } else if !other.outputs.is_empty() && self.outputs != other.outputs {
            conflicts.push("outputs");
        }

        if conflicts.is_empty() {
            self.instances.extend(other.instances.iter().cloned());
        }
        conflicts
    }
}

/// A device configuration tree: locations plus device kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub version: String,
    pub locations: Vec<Location>,
    pub devices: Vec<DeviceKind>,
}

impl DeviceConfig {
    /// Look up a location by name.
    pub fn location(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.name == name)
    }

    /// Semantic validation of a unified device config: well-formed
    /// locations, unique location names, kinds with names and models, and
    /// every instance location resolvable.
    pub fn validate(&self, merr: &mut MultiError) {
        let mut seen = std::collections::HashSet::new();
        for location in &self.locations {
            location.validate(merr);
            if !seen.insert(location.name.clone()) {
                merr.add_validation(format!("duplicate location name: {}", location.name));
            }
        }

        for kind in &self.devices {
            if kind.name.is_empty() {
                merr.add_validation("device kind requires a non-empty name");
                continue;
            }
            if kind.model.is_empty() {
                merr.add_validation(format!("device kind {}: model must not be empty", kind.name));
            }
            for instance in &kind.instances {
                if instance.location.is_empty() {
                    merr.add_validation(format!(
                        "device kind {}: instance has no location",
                        kind.name
                    ));
                } else if self.location(&instance.location).is_none() {
                    merr.add_validation(format!(
                        "device kind {}: instance references unknown location {}",
                        kind.name, instance.location
                    ));
                }
            }
        }
    }
}

/// An output-type config file: a scheme version plus output definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputTypeConfig {
    pub version: String,
    pub outputs: Vec<OutputType>,
}
