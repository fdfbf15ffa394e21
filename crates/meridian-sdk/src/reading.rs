//! Readings and the dynamic-to-wire value adapter.
//!
//! A handler produces `Reading`s carrying a `ReadingValue`, a tagged union
//! over the fixed wire taxonomy. Narrow integer widths are accepted from
//! handlers and widen to the nearest supported wire width when encoded.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use meridian_proto::v1 as proto;

use crate::output::Unit;

/// An RFC 3339 timestamp for the current instant.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A dynamically-typed reading value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReadingValue {
    String(String),
    Bool(bool),
    F32(f32),
    F64(f64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
    Null,
}

impl ReadingValue {
    /// The variant name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ReadingValue::String(_) => "string",
            ReadingValue::Bool(_) => "bool",
            ReadingValue::F32(_) => "float32",
            ReadingValue::F64(_) => "float64",
            ReadingValue::I8(_) => "int8",
            ReadingValue::I16(_) => "int16",
            ReadingValue::I32(_) => "int32",
            ReadingValue::I64(_) => "int64",
            ReadingValue::U8(_) => "uint8",
            ReadingValue::U16(_) => "uint16",
            ReadingValue::U32(_) => "uint32",
            ReadingValue::U64(_) => "uint64",
            ReadingValue::Bytes(_) => "bytes",
            ReadingValue::Null => "nil",
        }
    }

    /// Widen a numeric value to f64 for scaling. Non-numeric variants
    /// (bool included) cannot be scaled.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::F32(v) => Some(f64::from(*v)),
            ReadingValue::F64(v) => Some(*v),
            ReadingValue::I8(v) => Some(f64::from(*v)),
            ReadingValue::I16(v) => Some(f64::from(*v)),
            ReadingValue::I32(v) => Some(f64::from(*v)),
            ReadingValue::I64(v) => Some(*v as f64),
            ReadingValue::U8(v) => Some(f64::from(*v)),
            ReadingValue::U16(v) => Some(f64::from(*v)),
            ReadingValue::U32(v) => Some(f64::from(*v)),
            ReadingValue::U64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Encode the value onto the wire union, widening narrow integers.
    pub fn encode(&self) -> Option<proto::reading::Value> {
        use proto::reading::Value;
        match self {
            ReadingValue::String(v) => Some(Value::StringValue(v.clone())),
            ReadingValue::Bool(v) => Some(Value::BoolValue(*v)),
            ReadingValue::F32(v) => Some(Value::Float32Value(*v)),
            ReadingValue::F64(v) => Some(Value::Float64Value(*v)),
            ReadingValue::I8(v) => Some(Value::Int32Value(i32::from(*v))),
            ReadingValue::I16(v) => Some(Value::Int32Value(i32::from(*v))),
            ReadingValue::I32(v) => Some(Value::Int32Value(*v)),
            ReadingValue::I64(v) => Some(Value::Int64Value(*v)),
            ReadingValue::U8(v) => Some(Value::Uint32Value(u32::from(*v))),
            ReadingValue::U16(v) => Some(Value::Uint32Value(u32::from(*v))),
            ReadingValue::U32(v) => Some(Value::Uint32Value(*v)),
            ReadingValue::U64(v) => Some(Value::Uint64Value(*v)),
            ReadingValue::Bytes(v) => Some(Value::BytesValue(v.clone())),
            ReadingValue::Null => None,
        }
    }
}

macro_rules! reading_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ReadingValue {
                fn from(v: $ty) -> Self {
                    ReadingValue::$variant(v)
                }
            }
        )*
    };
}

reading_value_from! {
    String => String,
    bool => Bool,
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    Vec<u8> => Bytes,
}

impl From<&str> for ReadingValue {
    fn from(v: &str) -> Self {
        ReadingValue::String(v.to_string())
    }
}

/// A single device reading at a given time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// RFC 3339 time at which the reading was taken. Stamped by the
    /// scheduler when the handler leaves it empty.
    pub timestamp: String,
    /// The reading type, as defined by the device's output.
    pub reading_type: String,
    /// Additional free-form information about the reading.
    pub info: String,
    /// Unit of measure.
    pub unit: Unit,
    /// The reading value itself.
    pub value: ReadingValue,
}

impl Reading {
    /// Create a reading of the given type. The timestamp is left empty and
    /// stamped by the scheduler at publish time.
    pub fn new(reading_type: impl Into<String>, value: impl Into<ReadingValue>) -> Self {
        Self {
            timestamp: String::new(),
            reading_type: reading_type.into(),
            info: String::new(),
            unit: Unit::default(),
            value: value.into(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Encode the reading to its wire message. A non-empty `info` lands in
    /// `context["info"]`.
    pub fn encode(&self) -> proto::Reading {
        let mut context = std::collections::HashMap::new();
        if !self.info.is_empty() {
            context.insert("info".to_string(), self.info.clone());
        }

        proto::Reading {
            timestamp: self.timestamp.clone(),
            reading_type: self.reading_type.clone(),
            context,
            unit: Some(self.unit.encode()),
            value: self.value.encode(),
        }
    }
}
