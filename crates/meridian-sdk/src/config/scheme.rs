//! Scheme-version validation.
//!
//! Every config tree carries a root `version` tag. Validation parses the
//! tag, checks it against the SDK's supported scheme major, and walks the
//! tree's field records: a field present before it was added or at/after
//! its removal is an error; use of a deprecated field is a warning. All
//! violations aggregate into one error so a bad config reports everything
//! at once.

use super::{ConfigSource, DeviceConfig, OutputTypeConfig, PluginConfig};
use crate::errors::{MultiError, Result, SdkError};
use crate::version::SchemeVersion;

/// Version bounds for a single config field.
#[derive(Debug, Clone)]
pub struct FieldScheme {
    /// Field name, for diagnostics.
    pub field: &'static str,
    /// Whether the field is set in the config being validated.
    pub present: bool,
    /// Scheme major the field first appeared in.
    pub added_in: Option<SchemeVersion>,
    /// Scheme major the field was deprecated in.
    pub deprecated_in: Option<SchemeVersion>,
    /// Scheme major the field was removed in.
    pub removed_in: Option<SchemeVersion>,
}

impl FieldScheme {
    pub fn new(field: &'static str, present: bool) -> Self {
        Self {
            field,
            present,
            added_in: None,
            deprecated_in: None,
            removed_in: None,
        }
    }

    pub fn added_in(mut self, version: SchemeVersion) -> Self {
        self.added_in = Some(version);
        self
    }

    pub fn deprecated_in(mut self, version: SchemeVersion) -> Self {
        self.deprecated_in = Some(version);
        self
    }

    pub fn removed_in(mut self, version: SchemeVersion) -> Self {
        self.removed_in = Some(version);
        self
    }
}

/// A config tree that can be validated against its scheme version.
pub trait VersionedConfig {
    /// The raw root version tag.
    fn version_tag(&self) -> &str;

    /// Field records for version gating. Fields without bounds may be
    /// omitted.
    fn scheme_fields(&self) -> Vec<FieldScheme> {
        Vec::new()
    }
}

impl VersionedConfig for PluginConfig {
    fn version_tag(&self) -> &str {
        &self.version
    }
}

impl VersionedConfig for DeviceConfig {
    fn version_tag(&self) -> &str {
        &self.version
    }
}

impl VersionedConfig for OutputTypeConfig {
    fn version_tag(&self) -> &str {
        &self.version
    }
}

/// Check a field record against the config's scheme version. Comparisons
/// use the major component only.
fn check_field(field: &FieldScheme, current: SchemeVersion, merr: &mut MultiError) {
    if !field.present {
        return;
    }
    if let Some(added) = field.added_in {
        if added.major > current.major {
            merr.add_validation(format!(
                "field {} requires scheme version {} or later (config is {})",
                field.field, added.major, current
            ));
        }
    }
    if let Some(removed) = field.removed_in {
        if removed.major <= current.major {
            merr.add_validation(format!(
                "field {} was removed in scheme version {} (config is {})",
                field.field, removed.major, current
            ));
        }
    }
    if let Some(deprecated) = field.deprecated_in {
        if deprecated.major <= current.major {
            tracing::warn!(
                field = field.field,
                since = %deprecated,
                "config field is deprecated"
            );
        }
    }
}

/// Validate a config tree against its scheme version. Returns the parsed
/// version on success.
pub fn validate_scheme<T: VersionedConfig>(config: &T, source: &ConfigSource) -> Result<SchemeVersion> {
    let mut merr = MultiError::new(format!("scheme validation ({})", source));

    let tag = config.version_tag();
    if tag.is_empty() {
        merr.add_validation("config has no version");
        return merr.into_result().map(|_| SchemeVersion::default());
    }

    let version: SchemeVersion = match tag.parse() {
        Ok(v) => v,
        Err(err) => {
            merr.add(err);
            return merr.into_result().map(|_| SchemeVersion::default());
        }
    };

    if !version.is_supported() {
        return Err(SdkError::VersionIncompatible(format!(
            "{}: scheme version {} is not supported (supported major: {})",
            source,
            version,
            crate::version::SCHEME_MAJOR
        )));
    }

    for field in config.scheme_fields() {
        check_field(&field, version, &mut merr);
    }

    merr.into_result()?;
    Ok(version)
}
