//! Output types: how a raw handler value becomes a reading.
//!
//! An `OutputType` carries the unit, precision, scaling factor, and optional
//! unit-system conversion for one class of reading. Output types are
//! constructed from config and immutable afterwards; devices reference them
//! by dotted name.

use serde::{Deserialize, Serialize};

use crate::errors::{MultiError, Result, SdkError};
use crate::reading::ReadingValue;

/// Unit of measure for a reading. Either field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
}

impl Unit {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
        }
    }

    /// Encode the unit to its wire message.
    pub fn encode(&self) -> meridian_proto::v1::OutputUnit {
        meridian_proto::v1::OutputUnit {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

/// A named conversion between unit systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// No conversion.
    None,
    /// Fahrenheit to Celsius: `(f - 32) * 5/9`.
    EnglishToMetricTemperature,
}

impl Conversion {
    /// Resolve a conversion tag from config. Unknown tags are rejected at
    /// config load, before any reading flows.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "" => Ok(Conversion::None),
            "englishToMetricTemperature" => Ok(Conversion::EnglishToMetricTemperature),
            other => Err(SdkError::Validation(format!(
                "unrecognized conversion: {}",
                other
            ))),
        }
    }

    /// Apply the conversion to a scaled value.
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Conversion::None => value,
            Conversion::EnglishToMetricTemperature => (value - 32.0) * 5.0 / 9.0,
        }
    }
}

/// Describes how a value becomes a reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputType {
    /// Namespaced, dotted name. The reading type is the last segment.
    pub name: String,

    /// Decimal precision of rendered values.
    #[serde(default)]
    pub precision: i32,

    /// Unit of measure for readings of this type.
    #[serde(default)]
    pub unit: Unit,

    /// Multiplier applied to raw values, as a decimal literal
    /// (e.g. `"0.1"`, `"-3E2"`, `".3e2"`). Empty and `"0"` mean identity.
    #[serde(default)]
    pub scaling_factor: String,

    /// Tag selecting a named conversion function.
    #[serde(default)]
    pub conversion: String,
}

impl OutputType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The reading type: the last segment of the dotted name.
    pub fn type_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Parse the scaling factor. An empty factor is the identity.
    pub fn scaling_factor(&self) -> Result<f64> {
        if self.scaling_factor.is_empty() {
            return Ok(1.0);
        }
        let factor = self
            .scaling_factor
            .parse::<f64>()
            .map_err(|_| SdkError::Parse(format!("invalid scaling factor: {}", self.scaling_factor)))?;
        if !factor.is_finite() {
            return Err(SdkError::Parse(format!(
                "scaling factor is not finite: {}",
                self.scaling_factor
            )));
        }
        Ok(factor)
    }

    /// Validate the output type, collecting failures into `merr`.
    pub fn validate(&self, merr: &mut MultiError) {
        if self.name.is_empty() {
            merr.add_validation("output type has no name");
        }
        if let Err(err) = self.scaling_factor() {
            merr.add(err);
        }
        if let Err(err) = Conversion::from_tag(&self.conversion) {
            merr.add(err);
        }
    }

    /// Apply the output transformations to a raw handler value.
    ///
    /// A factor of 0 or 1 passes the value through unchanged, preserving its
    /// variant. Any other factor widens numeric values to f64, multiplies,
    /// and then applies the conversion, if one is set. Non-numeric values
    /// cannot be scaled.
    pub fn apply(&self, value: ReadingValue) -> Result<ReadingValue> {
        let factor = match self.scaling_factor() {
            Ok(f) => f,
            Err(err) => {
                // Validation rejects bad factors at load; if one slips
                // through, leave the value untouched.
                tracing::warn!(output = %self.name, %err, "unparseable scaling factor");
                return Ok(value);
            }
        };

        if factor == 0.0 || factor == 1.0 {
            return Ok(value);
        }

        let raw = value.as_f64().ok_or_else(|| {
            SdkError::UnsupportedValue(format!(
                "cannot scale {} value for output {}",
                value.type_name(),
                self.name
            ))
        })?;

        let conversion = Conversion::from_tag(&self.conversion)?;
        Ok(ReadingValue::F64(conversion.apply(raw * factor)))
    }
}
