//! Config discovery and YAML loading.
//!
//! The plugin config is a single YAML document; device, prototype, and
//! output-type configs are directories of YAML files. Loaders report
//! absence (`Ok(None)`) distinctly from read and parse failures, since
//! only absence is negotiable by policy.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use super::{ConfigContext, ConfigSource, DeviceConfig, OutputTypeConfig, PluginConfig};
use crate::errors::{Result, SdkError};

/// Overrides the plugin config file or its directory.
pub const ENV_PLUGIN_CONFIG: &str = "PLUGIN_CONFIG";
/// Overrides the device instance config directory.
pub const ENV_DEVICE_CONFIG: &str = "PLUGIN_DEVICE_CONFIG";
/// Overrides the legacy prototype config directory.
pub const ENV_PROTO_CONFIG: &str = "PLUGIN_PROTO_CONFIG";
/// Overrides the output type config directory.
pub const ENV_TYPE_CONFIG: &str = "PLUGIN_TYPE_CONFIG";

/// Search roots for configuration, in priority order.
const CONFIG_ROOTS: [&str; 3] = [".", "./config", "/etc/meridian"];

const PLUGIN_CONFIG_NAMES: [&str; 2] = ["config.yml", "config.yaml"];

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Read and parse one YAML document.
fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| SdkError::Parse(format!("reading {}: {}", path.display(), err)))?;
    serde_yaml::from_str(&raw)
        .map_err(|err| SdkError::Parse(format!("parsing {}: {}", path.display(), err)))
}

/// Load every YAML file under `dir`, sorted by path for deterministic
/// ordering. `Ok(None)` when the directory does not exist.
fn load_yaml_dir<T: DeserializeOwned>(dir: &Path) -> Result<Option<Vec<ConfigContext<T>>>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_yaml(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut contexts = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::debug!(path = %path.display(), "loading config file");
        let config = parse_file(&path)?;
        contexts.push(ConfigContext::new(ConfigSource::File(path), config));
    }
    Ok(Some(contexts))
}

/// Resolve the plugin config file path: the `PLUGIN_CONFIG` override (a
/// file, or a directory holding `config.yml`), else the default search
/// roots.
fn plugin_config_path() -> Option<PathBuf> {
    if let Ok(custom) = std::env::var(ENV_PLUGIN_CONFIG) {
        let custom = PathBuf::from(custom);
        if custom.is_file() {
            return Some(custom);
        }
        for name in PLUGIN_CONFIG_NAMES {
            let candidate = custom.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        return None;
    }

    for root in CONFIG_ROOTS {
        for name in PLUGIN_CONFIG_NAMES {
            let candidate = Path::new(root).join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Resolve a device config subdirectory (`device`, `proto`, or `type`):
/// the env override when set, else the first search root that has it.
fn config_dir(env_var: &str, subdir: &str) -> Option<PathBuf> {
    if let Ok(custom) = std::env::var(env_var) {
        let custom = PathBuf::from(custom);
        return custom.is_dir().then_some(custom);
    }
    CONFIG_ROOTS
        .iter()
        .map(|root| Path::new(root).join(subdir))
        .find(|p| p.is_dir())
}

/// Load the plugin config file. `Ok(None)` when no file is found.
pub fn load_plugin_config() -> Result<Option<ConfigContext<PluginConfig>>> {
    let path = match plugin_config_path() {
        Some(path) => path,
        None => return Ok(None),
    };
    tracing::debug!(path = %path.display(), "loading plugin config");
    let config = parse_file(&path)?;
    Ok(Some(ConfigContext::new(ConfigSource::File(path), config)))
}

/// Load device config contexts from the instance and legacy prototype
/// directories. `Ok(None)` when neither directory exists.
pub fn load_device_configs() -> Result<Option<Vec<ConfigContext<DeviceConfig>>>> {
    let mut contexts: Vec<ConfigContext<DeviceConfig>> = Vec::new();
    let mut found = false;

    for (env_var, subdir) in [(ENV_PROTO_CONFIG, "proto"), (ENV_DEVICE_CONFIG, "device")] {
        if let Some(dir) = config_dir(env_var, subdir) {
            if let Some(mut loaded) = load_yaml_dir(&dir)? {
                found = true;
                contexts.append(&mut loaded);
            }
        }
    }

    Ok(found.then_some(contexts))
}

/// Load output-type config contexts. `Ok(None)` when the directory does
/// not exist.
pub fn load_type_configs() -> Result<Option<Vec<ConfigContext<OutputTypeConfig>>>> {
    match config_dir(ENV_TYPE_CONFIG, "type") {
        Some(dir) => load_yaml_dir(&dir),
        None => Ok(None),
    }
}
