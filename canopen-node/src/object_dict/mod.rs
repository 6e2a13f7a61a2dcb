//! The object dictionary
//!
//! A typed, indexed store of a node's data. Each sub object is addressed by a 16-bit index and an
//! 8-bit sub index, and carries a declared [`DataType`](canopen_common::objects::DataType) and
//! [`AccessType`](canopen_common::objects::AccessType).
mod dictionary;
pub mod schema;

pub use dictionary::{ObjectDictionary, UpdateListener};
pub use schema::EntryDefinition;

use canopen_common::{objects::DataType, sdo::AbortCode};
use snafu::Snafu;

/// Errors returned by object dictionary accesses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OdError {
    /// The access type does not allow the requested operation
    #[snafu(display("Access denied to 0x{index:04X}sub{sub}"))]
    AccessDenied {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
    },
    /// The value does not match the declared type
    #[snafu(display("Type mismatch on 0x{index:04X}sub{sub}, expected {expected:?}"))]
    TypeMismatch {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
        /// The declared type
        expected: DataType,
    },
    /// The sub object does not exist
    #[snafu(display("No entry at 0x{index:04X}sub{sub}"))]
    NoSuchEntry {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
    },
}

/// The direction of an SDO access, used to pick abort codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDirection {
    /// The client is reading
    Upload,
    /// The client is writing
    Download,
}

impl OdError {
    /// Map the error to the closest SDO abort code
    ///
    /// `object_exists` distinguishes a missing object from a missing sub index on an existing
    /// object.
    pub fn abort_code(&self, direction: AccessDirection, object_exists: bool) -> AbortCode {
        match self {
            OdError::AccessDenied { .. } => match direction {
                AccessDirection::Upload => AbortCode::WriteOnly,
                AccessDirection::Download => AbortCode::ReadOnly,
            },
            OdError::TypeMismatch { .. } => AbortCode::DataTypeMismatch,
            OdError::NoSuchEntry { .. } => {
                if object_exists {
                    AbortCode::NoSuchSubIndex
                } else {
                    AbortCode::NoSuchObject
                }
            }
        }
    }
}

/// Errors returned when building a dictionary from definitions
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SchemaError {
    /// Two definitions share one address
    #[snafu(display("Duplicate definition of 0x{index:04X}sub{sub}"))]
    DuplicateEntry {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
    },
    /// A default value does not match the declared type
    #[snafu(display(
        "Default of 0x{index:04X}sub{sub} is {found:?}, declared type is {expected:?}"
    ))]
    DefaultTypeMismatch {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
        /// Declared type
        expected: DataType,
        /// Type of the default value
        found: DataType,
    },
}
