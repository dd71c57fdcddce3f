//! Register values
//!
//! [`Value`] is the tagged union carried by the `Access` service. The engine
//! only works with scalar registers, so [`decode`] resolves a [`Value`] into
//! the first element of its array together with a [`TypeTag`], and
//! [`Scalar`] goes the other way when writing.

use core::fmt;

use log::error;
use serde::{Deserialize, Serialize};

/// The register value union as it travels on the bus.
///
/// Exactly one variant is active. Array variants hold one element for
/// scalar registers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Unset value. Sending it in an `Access` request means "read only".
    #[default]
    Empty,
    String(Vec<u8>),
    Unstructured(Vec<u8>),
    Bit(Vec<bool>),
    Integer64(Vec<i64>),
    Integer32(Vec<i32>),
    Integer16(Vec<i16>),
    Integer8(Vec<i8>),
    Natural64(Vec<u64>),
    Natural32(Vec<u32>),
    Natural16(Vec<u16>),
    Natural8(Vec<u8>),
    Real64(Vec<f64>),
    Real32(Vec<f32>),
}

/// A decoded scalar, also used to describe desired register values.
///
/// In configuration files a scalar is written as a single entry table, e.g.
/// `{ natural16 = 42 }`, or as the bare string `"empty"`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Natural16(u16),
    Integer64(i64),
    Bit(bool),
    Real64(f64),
    String(String),
    Empty,
}

/// Name of the variant a value was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Natural16,
    String,
    Bit,
    Real64,
    Integer64,
    Empty,
    Unknown,
}

/// Result of [`decode`].
///
/// `value` is `None` exactly when `tag` is [`TypeTag::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Option<Scalar>,
    pub tag: TypeTag,
}

// ---- impl Value ----

impl Value {
    /// Name of the active variant, including the ones the codec does not
    /// resolve. Used in diagnostics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::String(_) => "string",
            Value::Unstructured(_) => "unstructured",
            Value::Bit(_) => "bit",
            Value::Integer64(_) => "integer64",
            Value::Integer32(_) => "integer32",
            Value::Integer16(_) => "integer16",
            Value::Integer8(_) => "integer8",
            Value::Natural64(_) => "natural64",
            Value::Natural32(_) => "natural32",
            Value::Natural16(_) => "natural16",
            Value::Natural8(_) => "natural8",
            Value::Real64(_) => "real64",
            Value::Real32(_) => "real32",
        }
    }

    /// Whether both values use the same variant.
    pub fn same_variant(&self, other: &Value) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Natural16(v) => Value::Natural16(vec![v]),
            Scalar::Integer64(v) => Value::Integer64(vec![v]),
            Scalar::Bit(v) => Value::Bit(vec![v]),
            Scalar::Real64(v) => Value::Real64(vec![v]),
            Scalar::String(v) => Value::String(v.into_bytes()),
            Scalar::Empty => Value::Empty,
        }
    }
}

impl From<&Scalar> for Value {
    fn from(value: &Scalar) -> Self {
        Value::from(value.clone())
    }
}

// ---- impl Scalar ----

impl Scalar {
    pub fn tag(&self) -> TypeTag {
        match self {
            Scalar::Natural16(_) => TypeTag::Natural16,
            Scalar::Integer64(_) => TypeTag::Integer64,
            Scalar::Bit(_) => TypeTag::Bit,
            Scalar::Real64(_) => TypeTag::Real64,
            Scalar::String(_) => TypeTag::String,
            Scalar::Empty => TypeTag::Empty,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Natural16(v) => fmt::Display::fmt(v, f),
            Scalar::Integer64(v) => fmt::Display::fmt(v, f),
            Scalar::Bit(v) => fmt::Display::fmt(v, f),
            Scalar::Real64(v) => fmt::Display::fmt(v, f),
            Scalar::String(v) => f.pad(v),
            Scalar::Empty => f.pad("Empty"),
        }
    }
}

// ---- impl TypeTag ----

impl TypeTag {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Natural16 => "natural16",
            TypeTag::String => "string",
            TypeTag::Bit => "bit",
            TypeTag::Real64 => "real64",
            TypeTag::Integer64 => "integer64",
            TypeTag::Empty => "empty",
            TypeTag::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ---- impl Decoded ----

impl Decoded {
    pub const UNKNOWN: Self = Self {
        value: None,
        tag: TypeTag::Unknown,
    };

    fn scalar(value: Scalar) -> Self {
        Self {
            tag: value.tag(),
            value: Some(value),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.tag == TypeTag::Unknown
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => fmt::Display::fmt(v, f),
            None => f.pad("None"),
        }
    }
}

/// Resolve a wire value into its first scalar element.
///
/// Variants are checked in the order natural16, string, bit, real64,
/// integer64, empty. Anything else, including an array variant without
/// elements, is a decode failure reported as [`Decoded::UNKNOWN`].
pub fn decode(value: &Value) -> Decoded {
    let decoded = match value {
        Value::Natural16(v) => v.first().copied().map(Scalar::Natural16),
        Value::String(v) => Some(Scalar::String(String::from_utf8_lossy(v).into_owned())),
        Value::Bit(v) => v.first().copied().map(Scalar::Bit),
        Value::Real64(v) => v.first().copied().map(Scalar::Real64),
        Value::Integer64(v) => v.first().copied().map(Scalar::Integer64),
        Value::Empty => Some(Scalar::Empty),
        _ => None,
    };

    match decoded {
        Some(scalar) => Decoded::scalar(scalar),
        None => {
            error!(
                "Unable to decode register value of type {}: {value:?}",
                value.variant_name()
            );
            Decoded::UNKNOWN
        }
    }
}
