//! Config-source policies.
//!
//! A plugin declares, per configuration source, whether that source must be
//! present, may be present, or must not be relied upon. Policies are
//! resolved once at startup, before anything else touches the config.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SdkError};

/// How the presence or absence of a single config source is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Policy {
    /// Absence of the source is a fatal policy violation.
    Required,
    /// Absence of the source silently substitutes an empty default.
    #[default]
    Optional,
    /// Presence of the source is tolerated but ignored with a warning. The
    /// plugin must supply the configuration by other means.
    Prohibited,
}

impl Policy {
    /// Apply this policy to the outcome of a load attempt.
    ///
    /// `found` is `Some` when the source produced contexts and `None` when
    /// it was not found. Only not-found is policy-negotiable; other load
    /// errors short-circuit before this point.
    pub fn resolve<T>(self, found: Option<T>, source: &str) -> Result<Option<T>> {
        match (self, found) {
            (Policy::Required, None) => Err(SdkError::PolicyViolation(format!(
                "{} is required but was not found",
                source
            ))),
            (Policy::Prohibited, Some(_)) => {
                tracing::warn!(source, "config source is prohibited by policy, ignoring");
                Ok(None)
            }
            (_, found) => Ok(found),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Required => "required",
            Policy::Optional => "optional",
            Policy::Prohibited => "prohibited",
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The per-source policy knobs. Each source keeps its own field so invalid
/// combinations cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigPolicies {
    /// The plugin config file (`config.yml`).
    pub plugin_config: Policy,
    /// Device instance config files (`<root>/device`, `<root>/proto`).
    pub device_config: Policy,
    /// Output type config files (`<root>/type`).
    pub type_config: Policy,
    /// Dynamic device configuration supplied by the plugin's registrar.
    pub dynamic_config: Policy,
}

impl Default for ConfigPolicies {
    fn default() -> Self {
        Self {
            plugin_config: Policy::Required,
            device_config: Policy::Optional,
            type_config: Policy::Optional,
            dynamic_config: Policy::Optional,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_absent_is_violation() {
        let res: Result<Option<()>> = Policy::Required.resolve(None, "plugin config");
        assert!(matches!(res, Err(SdkError::PolicyViolation(_))));
    }

    #[test]
    fn test_optional_absent_is_none() {
        let res: Option<u32> = Policy::Optional.resolve(None, "device config").unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn test_prohibited_present_is_discarded() {
        let res = Policy::Prohibited.resolve(Some(1), "type config").unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn test_required_present_passes_through() {
        let res = Policy::Required.resolve(Some(7), "plugin config").unwrap();
        assert_eq!(res, Some(7));
    }
}
