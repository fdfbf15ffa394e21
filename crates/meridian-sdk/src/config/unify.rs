//! Device-config unification.
//!
//! Multiple device config trees (instance files, legacy prototype files,
//! dynamic registration) merge into one canonical tree before validation:
//! locations concatenate, kinds merge by name with their instance lists
//! concatenated. Unset kind fields adopt the other side's value; fields
//! set on both sides must agree, so kinds that share a name but genuinely
//! differ are rejected rather than silently merged.

use super::{ConfigContext, DeviceConfig};
use crate::errors::{MultiError, Result, SdkError};
use crate::version::SchemeVersion;

/// Unify an ordered list of device config contexts into a single tree.
///
/// The unified version is the first context's version; contexts whose
/// scheme majors disagree are rejected. Unification is idempotent:
/// unifying an already-unified config yields it unchanged.
pub fn unify(contexts: &[ConfigContext<DeviceConfig>]) -> Result<DeviceConfig> {
    let mut merr = MultiError::new("device config unification");

    let mut unified = DeviceConfig::default();
    let mut base_version: Option<SchemeVersion> = None;

    for ctx in contexts {
        let version = ctx.config.version.parse::<SchemeVersion>().ok();
        match (base_version, version) {
            (None, Some(v)) => {
                base_version = Some(v);
                unified.version = ctx.config.version.clone();
            }
            (Some(base), Some(v)) if !base.is_equal(&v) => {
                merr.add(SdkError::VersionIncompatible(format!(
                    "{}: scheme version {} does not match unified version {}",
                    ctx.source, v, base
                )));
            }
            _ => {}
        }

        unified.locations.extend(ctx.config.locations.iter().cloned());

        for kind in &ctx.config.devices {
            match unified.devices.iter_mut().find(|k| k.name == kind.name) {
                Some(existing) => {
                    let conflicts = existing.merge(kind);
                    if !conflicts.is_empty() {
                        merr.add_validation(format!(
                            "{}: conflicting definitions for device kind {} (fields: {})",
                            ctx.source,
                            kind.name,
                            conflicts.join(", ")
                        ));
                    }
                }
                None => unified.devices.push(kind.clone()),
            }
        }
    }

    merr.into_result()?;
    Ok(unified)
}
