//! Config pipeline tests against real directories.
//!
//! These tests steer the loaders with the `PLUGIN_*` environment
//! variables, so everything that touches the environment runs under one
//! lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use meridian_sdk::config::loader::{
    ENV_DEVICE_CONFIG, ENV_PLUGIN_CONFIG, ENV_PROTO_CONFIG, ENV_TYPE_CONFIG,
};
use meridian_sdk::config::pipeline;
use meridian_sdk::device::{Device, DeviceHandler};
use meridian_sdk::reading::Reading;
use meridian_sdk::{ConfigPolicies, Plugin, Policy, Result, SdkError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Point every config env override at subdirectories of `root`, restoring
/// the previous environment on drop.
struct ConfigEnv {
    _guard: MutexGuard<'static, ()>,
}

impl ConfigEnv {
    fn set(root: &Path) -> Self {
        let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var(ENV_PLUGIN_CONFIG, root);
        std::env::set_var(ENV_DEVICE_CONFIG, root.join("device"));
        std::env::set_var(ENV_PROTO_CONFIG, root.join("proto"));
        std::env::set_var(ENV_TYPE_CONFIG, root.join("type"));
        Self { _guard: guard }
    }
}

impl Drop for ConfigEnv {
    fn drop(&mut self) {
        std::env::remove_var(ENV_PLUGIN_CONFIG);
        std::env::remove_var(ENV_DEVICE_CONFIG);
        std::env::remove_var(ENV_PROTO_CONFIG);
        std::env::remove_var(ENV_TYPE_CONFIG);
    }
}

struct PressureHandler;

#[async_trait::async_trait]
impl DeviceHandler for PressureHandler {
    fn device_type(&self) -> &str {
        "pressure"
    }

    fn model(&self) -> &str {
        "p300"
    }

    fn supports_read(&self) -> bool {
        true
    }

    async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
        Ok(vec![Reading::new(device.device_type.clone(), 101.3f64)])
    }
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn make_plugin() -> Plugin {
    Plugin::builder()
        .identifier(|data: &HashMap<String, String>| {
            data.get("serial").cloned().unwrap_or_default()
        })
        .register_handler(PressureHandler)
        .build()
        .unwrap()
}

#[test]
fn test_full_config_tree_materializes_devices() {
    let root = tempfile::tempdir().unwrap();
    let _env = ConfigEnv::set(root.path());

    write(
        &root.path().join("config.yml"),
        r#"
version: "1.0"
name: pressure-plugin
loop_delay: 100
"#,
    );
    // Legacy split: the prototype file defines the kind, the device file
    // contributes instances.
    write(
        &root.path().join("proto/pressure.yml"),
        r#"
version: "1.0"
devices:
  - name: pressure
    model: p300
    outputs:
      - sensors.pressure
"#,
    );
    write(
        &root.path().join("device/pressure.yml"),
        r#"
version: "1.0"
locations:
  - name: r1b1
    rack: rack-1
    board: board-1
devices:
  - name: pressure
    instances:
      - location: r1b1
        info: inlet pressure
        data:
          serial: psi-001
"#,
    );
    write(
        &root.path().join("type/pressure.yml"),
        r#"
version: "1.0"
outputs:
  - name: sensors.pressure
    precision: 2
    unit:
      name: kilopascal
      symbol: kPa
"#,
    );

    let plugin = make_plugin();
    let policies = ConfigPolicies::default();
    let config = pipeline::plugin_config_stage(&policies, None).unwrap();
    assert_eq!(config.name, "pressure-plugin");
    assert_eq!(config.loop_delay, 100);
    // Unset sizing knobs pick up their defaults.
    assert_eq!(config.writes_per_loop, 5);
    assert_eq!(config.read_buffer_size, 100);

    let runtime = plugin.initialize(config).unwrap();
    let registry = runtime.registry();
    assert_eq!(registry.len(), 1);

    let device = &registry.devices()[0];
    assert_eq!(device.kind, "pressure");
    assert_eq!(device.model, "p300");
    assert_eq!(device.info, "inlet pressure");
    assert_eq!(device.location.rack, "rack-1");
    assert_eq!(device.outputs.len(), 1);
    assert_eq!(device.outputs[0].unit.symbol, "kPa");
    assert_eq!(device.id.len(), 64);
}

#[test]
fn test_missing_required_plugin_config_is_policy_violation() {
    let root = tempfile::tempdir().unwrap();
    let _env = ConfigEnv::set(root.path());

    let policies = ConfigPolicies {
        plugin_config: Policy::Required,
        ..Default::default()
    };
    let err = pipeline::plugin_config_stage(&policies, None).unwrap_err();
    assert!(matches!(err, SdkError::PolicyViolation(_)));
    assert!(err.to_string().contains("plugin config"));
}

#[test]
fn test_prohibited_plugin_config_file_is_ignored() {
    let root = tempfile::tempdir().unwrap();
    let _env = ConfigEnv::set(root.path());

    write(
        &root.path().join("config.yml"),
        "version: \"1.0\"\nname: from-file\n",
    );

    let policies = ConfigPolicies {
        plugin_config: Policy::Prohibited,
        ..Default::default()
    };

    // With no config supplied by other means, startup fails.
    let err = pipeline::plugin_config_stage(&policies, None).unwrap_err();
    assert!(matches!(err, SdkError::PolicyViolation(_)));

    // With one supplied in code, the file is ignored.
    let supplied = meridian_sdk::PluginConfig {
        version: "1.0".to_string(),
        name: "from-code".to_string(),
        ..Default::default()
    };
    let config = pipeline::plugin_config_stage(&policies, Some(&supplied)).unwrap();
    assert_eq!(config.name, "from-code");
}

#[test]
fn test_duplicate_location_names_are_fatal() {
    let root = tempfile::tempdir().unwrap();
    let _env = ConfigEnv::set(root.path());

    write(
        &root.path().join("device/a.yml"),
        r#"
version: "1.0"
locations:
  - name: r1b1
    rack: rack-1
    board: board-1
"#,
    );
    write(
        &root.path().join("device/b.yml"),
        r#"
version: "1.0"
locations:
  - name: r1b1
    rack: rack-2
    board: board-9
"#,
    );

    let err = pipeline::device_config_stage(&ConfigPolicies::default(), Vec::new(), None)
        .unwrap_err();
    assert!(err.to_string().contains("duplicate location name: r1b1"));
}

#[test]
fn test_unresolved_instance_location_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let _env = ConfigEnv::set(root.path());

    write(
        &root.path().join("device/a.yml"),
        r#"
version: "1.0"
locations:
  - name: r1b1
    rack: rack-1
    board: board-1
devices:
  - name: pressure
    model: p300
    instances:
      - location: nowhere
        data:
          serial: psi-001
"#,
    );

    let err = pipeline::device_config_stage(&ConfigPolicies::default(), Vec::new(), None)
        .unwrap_err();
    assert!(err.to_string().contains("unknown location nowhere"));
}

#[test]
fn test_version_major_mismatch_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let _env = ConfigEnv::set(root.path());

    write(&root.path().join("device/a.yml"), "version: \"2.0\"\n");

    let err = pipeline::device_config_stage(&ConfigPolicies::default(), Vec::new(), None)
        .unwrap_err();
    assert!(matches!(err, SdkError::VersionIncompatible(_)));
}

#[test]
fn test_semantic_validator_runs_on_unified_config() {
    let root = tempfile::tempdir().unwrap();
    let _env = ConfigEnv::set(root.path());

    write(
        &root.path().join("device/a.yml"),
        r#"
version: "1.0"
locations:
  - name: r1b1
    rack: rack-1
    board: board-1
devices:
  - name: pressure
    model: p300
    instances:
      - location: r1b1
        data: {}
"#,
    );

    let validator = |config: &meridian_sdk::DeviceConfig| -> Result<()> {
        for kind in &config.devices {
            for instance in &kind.instances {
                if !instance.data.contains_key("serial") {
                    return Err(SdkError::Validation(format!(
                        "kind {}: instances require a serial",
                        kind.name
                    )));
                }
            }
        }
        Ok(())
    };

    let err =
        pipeline::device_config_stage(&ConfigPolicies::default(), Vec::new(), Some(&validator))
            .unwrap_err();
    assert!(err.to_string().contains("require a serial"));
}
