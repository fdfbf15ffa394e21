//! Scheme versioning and plugin build metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SdkError;

/// The config scheme major this SDK build supports.
pub const SCHEME_MAJOR: u32 = 1;

/// The SDK's own version, taken from the crate manifest.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A `MAJOR[.MINOR]` scheme version tag.
///
/// Comparisons use the major component only; the minor component is
/// reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemeVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemeVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether two versions are equal at the major component.
    pub fn is_equal(&self, other: &SchemeVersion) -> bool {
        self.major == other.major
    }

    /// Whether this version is supported by the running SDK.
    pub fn is_supported(&self) -> bool {
        self.major == SCHEME_MAJOR
    }
}

impl FromStr for SchemeVersion {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SdkError::Parse("empty version string".into()));
        }
        let mut parts = s.split('.');
        let major = parts
            .next()
            .unwrap_or_default()
            .parse::<u32>()
            .map_err(|_| SdkError::Parse(format!("invalid version string: {}", s)))?;
        let minor = match parts.next() {
            Some(m) => m
                .parse::<u32>()
                .map_err(|_| SdkError::Parse(format!("invalid version string: {}", s)))?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(SdkError::Parse(format!(
                "version string has too many components: {}",
                s
            )));
        }
        Ok(Self { major, minor })
    }
}

impl fmt::Display for SchemeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Build-time version metadata for a plugin binary.
///
/// Plugins populate this from their build pipeline; the values are rendered
/// by `--version` and served by the `Metainfo` RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The plugin's version string.
    pub version: String,
    /// Timestamp of the build.
    pub build_date: String,
    /// Commit the binary was built from.
    pub git_commit: String,
    /// Tag the binary was built from, if any.
    pub git_tag: String,
}

impl VersionInfo {
    /// Render the version info as a multi-line report. The plugin name is
    /// not part of the build metadata; callers that want it prepend it
    /// themselves.
    pub fn format(&self) -> String {
        format!(
            " version:     {}\n sdk version: {}\n build date:  {}\n git commit:  {}\n git tag:     {}\n arch/os:     {}/{}",
            self.version,
            SDK_VERSION,
            self.build_date,
            self.git_commit,
            self.git_tag,
            std::env::consts::ARCH,
            std::env::consts::OS,
        )
    }
}
