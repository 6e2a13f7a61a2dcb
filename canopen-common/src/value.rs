//! Typed object values and their byte encoding
//!
//! All numeric types are encoded little endian. Strings are encoded as their raw bytes with no
//! terminator; their length is implied by the transfer that carries them.
use snafu::Snafu;

use crate::objects::DataType;

/// Error returned when bytes cannot be decoded as a given type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum ValueError {
    /// The byte count does not match the width of a fixed size type
    #[snafu(display("Expected {expected} bytes for {data_type:?}, got {actual}"))]
    LengthMismatch {
        /// The type being decoded
        data_type: DataType,
        /// Width of the type
        expected: usize,
        /// Number of bytes given
        actual: usize,
    },
    /// A visible string contained bytes which are not valid UTF-8
    InvalidString,
}

/// A typed value of an object dictionary entry
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Value {
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    VisibleString(String),
    OctetString(Vec<u8>),
}

impl Value {
    /// The declared type this value belongs to
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt8(_) => DataType::UInt8,
            Value::UInt16(_) => DataType::UInt16,
            Value::UInt32(_) => DataType::UInt32,
            Value::UInt64(_) => DataType::UInt64,
            Value::Real32(_) => DataType::Real32,
            Value::Real64(_) => DataType::Real64,
            Value::VisibleString(_) => DataType::VisibleString,
            Value::OctetString(_) => DataType::OctetString,
        }
    }

    /// The zero value of a type, used for entries defined without a default
    pub fn zero(data_type: DataType) -> Value {
        match data_type {
            DataType::Boolean => Value::Boolean(false),
            DataType::Int8 => Value::Int8(0),
            DataType::Int16 => Value::Int16(0),
            DataType::Int32 => Value::Int32(0),
            DataType::Int64 => Value::Int64(0),
            DataType::UInt8 => Value::UInt8(0),
            DataType::UInt16 => Value::UInt16(0),
            DataType::UInt32 => Value::UInt32(0),
            DataType::UInt64 => Value::UInt64(0),
            DataType::Real32 => Value::Real32(0.0),
            DataType::Real64 => Value::Real64(0.0),
            DataType::VisibleString => Value::VisibleString(String::new()),
            DataType::OctetString => Value::OctetString(Vec::new()),
        }
    }

    /// Encode the value
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Boolean(v) => vec![*v as u8],
            Value::Int8(v) => v.to_le_bytes().to_vec(),
            Value::Int16(v) => v.to_le_bytes().to_vec(),
            Value::Int32(v) => v.to_le_bytes().to_vec(),
            Value::Int64(v) => v.to_le_bytes().to_vec(),
            Value::UInt8(v) => vec![*v],
            Value::UInt16(v) => v.to_le_bytes().to_vec(),
            Value::UInt32(v) => v.to_le_bytes().to_vec(),
            Value::UInt64(v) => v.to_le_bytes().to_vec(),
            Value::Real32(v) => v.to_le_bytes().to_vec(),
            Value::Real64(v) => v.to_le_bytes().to_vec(),
            Value::VisibleString(s) => s.as_bytes().to_vec(),
            Value::OctetString(b) => b.clone(),
        }
    }

    /// Decode bytes as a value of `data_type`
    ///
    /// Fixed width types require exactly their width in bytes.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> Result<Value, ValueError> {
        if let Some(expected) = data_type.fixed_size() {
            if bytes.len() != expected {
                return LengthMismatchSnafu {
                    data_type,
                    expected,
                    actual: bytes.len(),
                }
                .fail();
            }
        }

        fn arr<const N: usize>(bytes: &[u8]) -> [u8; N] {
            let mut out = [0u8; N];
            out.copy_from_slice(&bytes[..N]);
            out
        }

        Ok(match data_type {
            DataType::Boolean => Value::Boolean(bytes[0] != 0),
            DataType::Int8 => Value::Int8(i8::from_le_bytes(arr(bytes))),
            DataType::Int16 => Value::Int16(i16::from_le_bytes(arr(bytes))),
            DataType::Int32 => Value::Int32(i32::from_le_bytes(arr(bytes))),
            DataType::Int64 => Value::Int64(i64::from_le_bytes(arr(bytes))),
            DataType::UInt8 => Value::UInt8(bytes[0]),
            DataType::UInt16 => Value::UInt16(u16::from_le_bytes(arr(bytes))),
            DataType::UInt32 => Value::UInt32(u32::from_le_bytes(arr(bytes))),
            DataType::UInt64 => Value::UInt64(u64::from_le_bytes(arr(bytes))),
            DataType::Real32 => Value::Real32(f32::from_le_bytes(arr(bytes))),
            DataType::Real64 => Value::Real64(f64::from_le_bytes(arr(bytes))),
            DataType::VisibleString => Value::VisibleString(
                String::from_utf8(bytes.to_vec()).map_err(|_| ValueError::InvalidString)?,
            ),
            DataType::OctetString => Value::OctetString(bytes.to_vec()),
        })
    }

    /// Get the value as an unsigned integer, if it is one of the integer types and non-negative
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Boolean(v) => Some(v as u64),
            Value::UInt8(v) => Some(v as u64),
            Value::UInt16(v) => Some(v as u64),
            Value::UInt32(v) => Some(v as u64),
            Value::UInt64(v) => Some(v),
            Value::Int8(v) => u64::try_from(v).ok(),
            Value::Int16(v) => u64::try_from(v).ok(),
            Value::Int32(v) => u64::try_from(v).ok(),
            Value::Int64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        }
    };
}

impl_from!(bool, Boolean);
impl_from!(i8, Int8);
impl_from!(i16, Int16);
impl_from!(i32, Int32);
impl_from!(i64, Int64);
impl_from!(u8, UInt8);
impl_from!(u16, UInt16);
impl_from!(u32, UInt32);
impl_from!(u64, UInt64);
impl_from!(f32, Real32);
impl_from!(f64, Real64);
impl_from!(String, VisibleString);
impl_from!(Vec<u8>, OctetString);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::VisibleString(value.to_string())
    }
}
