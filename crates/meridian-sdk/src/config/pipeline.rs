//! The config pipeline: loading, policy application, validation, and
//! unification for each configuration stage.
//!
//! Each stage follows the same shape: attempt a load, distinguish absence
//! from real errors, apply the source's policy, validate what survived,
//! and hand the result to the runtime. Only the device stage unifies.

use std::collections::HashSet;

use super::{loader, scheme, unify, ConfigContext, ConfigSource, DeviceConfig, PluginConfig};
use crate::errors::{MultiError, Result, SdkError};
use crate::output::OutputType;
use crate::policy::{ConfigPolicies, Policy};

/// Plugin-supplied semantic validator for the unified device config.
pub type DeviceConfigValidator = dyn Fn(&DeviceConfig) -> Result<()> + Send + Sync;

/// Resolve the plugin config: file (per policy), else the config supplied
/// in code, else fail.
pub fn plugin_config_stage(
    policies: &ConfigPolicies,
    supplied: Option<&PluginConfig>,
) -> Result<PluginConfig> {
    let loaded = loader::load_plugin_config()?;
    let ctx = policies
        .plugin_config
        .resolve(loaded, "plugin config file")?;

    let ctx = match ctx {
        Some(ctx) => ctx,
        None => match supplied {
            Some(config) => ConfigContext::new(ConfigSource::Default, config.clone()),
            None => {
                if policies.plugin_config == Policy::Prohibited {
                    return Err(SdkError::PolicyViolation(
                        "plugin config file is prohibited and no config was supplied in code"
                            .to_string(),
                    ));
                }
                ConfigContext::new(ConfigSource::Empty, PluginConfig::default())
            }
        },
    };

    scheme::validate_scheme(&ctx.config, &ctx.source)?;

    let config = ctx.config.finalize();
    let mut merr = MultiError::new(format!("plugin config ({})", ctx.source));
    config.validate(&mut merr);
    merr.into_result()?;

    tracing::debug!(name = %config.name, "plugin config resolved");
    Ok(config)
}

/// Resolve the output types: file contexts (per policy) plus any types
/// registered in code. Names must be unique.
pub fn output_types_stage(
    policies: &ConfigPolicies,
    registered: &[OutputType],
) -> Result<Vec<OutputType>> {
    let loaded = loader::load_type_configs()?;
    let contexts = policies
        .type_config
        .resolve(loaded, "output type config")?
        .unwrap_or_default();

    let mut outputs: Vec<OutputType> = registered.to_vec();
    for ctx in contexts {
        scheme::validate_scheme(&ctx.config, &ctx.source)?;
        outputs.extend(ctx.config.outputs);
    }

    let mut merr = MultiError::new("output type validation");
    let mut seen = HashSet::new();
    for output in &outputs {
        output.validate(&mut merr);
        if !output.name.is_empty() && !seen.insert(output.name.clone()) {
            merr.add_validation(format!("duplicate output type name: {}", output.name));
        }
    }
    merr.into_result()?;

    tracing::debug!(count = outputs.len(), "output types resolved");
    Ok(outputs)
}

/// Resolve the unified device config from file contexts (per policy) and
/// dynamic contexts produced by the plugin's registrar (per policy), then
/// run the plugin's semantic validator, if any.
pub fn device_config_stage(
    policies: &ConfigPolicies,
    dynamic: Vec<ConfigContext<DeviceConfig>>,
    validator: Option<&DeviceConfigValidator>,
) -> Result<DeviceConfig> {
    let loaded = loader::load_device_configs()?;
    let file_contexts = policies
        .device_config
        .resolve(loaded, "device config files")?;

    let dynamic = if dynamic.is_empty() { None } else { Some(dynamic) };
    let dynamic_contexts = policies
        .dynamic_config
        .resolve(dynamic, "dynamic device config")?;

    let mut contexts = file_contexts.unwrap_or_default();
    contexts.extend(dynamic_contexts.unwrap_or_default());

    for ctx in &contexts {
        scheme::validate_scheme(&ctx.config, &ctx.source)?;
    }

    let unified = unify::unify(&contexts)?;

    let mut merr = MultiError::new("device config validation");
    unified.validate(&mut merr);
    merr.into_result()?;

    if let Some(validate) = validator {
        validate(&unified)?;
    }

    tracing::debug!(
        locations = unified.locations.len(),
        kinds = unified.devices.len(),
        "device config resolved"
    );
    Ok(unified)
}
