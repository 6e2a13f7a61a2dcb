//! Object Definitions
//!
//! Metadata describing the entries of an object dictionary. The dictionary itself lives in
//! `canopen-node`.
use int_enum::IntEnum;
use serde::Deserialize;

/// A container for the address of a subobject
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
}

impl ObjectId {
    /// Create an object address
    pub const fn new(index: u16, sub: u8) -> Self {
        Self { index, sub }
    }
}

impl core::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04X}sub{}", self.index, self.sub)
    }
}

/// Object Code value
///
/// Defines the type of an object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum ObjectCode {
    /// An object which has a single sub object
    #[default]
    Var = 7,
    /// An array of sub-objects all with the same data type
    Array = 8,
    /// A collection of sub-objects with varying types
    Record = 9,
}

/// Access type enum
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    /// Read-only
    #[default]
    Ro,
    /// Write-only
    Wo,
    /// Read-write
    Rw,
    /// Read-only, and also will never be changed, even internally by the device
    Const,
}

impl AccessType {
    /// Returns true if an object with this access type can be read
    pub fn is_readable(&self) -> bool {
        matches!(self, AccessType::Ro | AccessType::Rw | AccessType::Const)
    }

    /// Returns true if an object with this access type can be written
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessType::Rw | AccessType::Wo)
    }
}

/// Possible PDO mapping values for an object
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdoMappable {
    /// Object cannot be mapped to PDOs
    #[default]
    None,
    /// Object can be mapped to RPDOs only
    Rpdo,
    /// Object can be mapped to TPDOs only
    Tpdo,
    /// Object can be mapped to both RPDOs and TPDOs
    Both,
}

impl PdoMappable {
    /// Returns true if the object may be mapped to a TPDO
    pub fn supports_tpdo(&self) -> bool {
        matches!(self, PdoMappable::Tpdo | PdoMappable::Both)
    }

    /// Returns true if the object may be mapped to an RPDO
    pub fn supports_rpdo(&self) -> bool {
        matches!(self, PdoMappable::Rpdo | PdoMappable::Both)
    }
}

/// Indicate the type of data stored in an object
///
/// The discriminants are the CiA301 data type indices.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntEnum, Deserialize)]
#[repr(u16)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum DataType {
    Boolean = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    #[default]
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    Real32 = 8,
    VisibleString = 9,
    OctetString = 0xa,
    Real64 = 0x11,
    Int64 = 0x15,
    UInt64 = 0x1b,
}

impl DataType {
    /// Returns true if data type is one of the string types
    pub fn is_str(&self) -> bool {
        matches!(self, Self::VisibleString | Self::OctetString)
    }

    /// Returns true for the signed integer types
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Returns true for the floating point types
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Real32 | Self::Real64)
    }

    /// The encoded size in bytes, or None for variable length types
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Boolean | DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Real32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Real64 => Some(8),
            DataType::VisibleString | DataType::OctetString => None,
        }
    }
}

/// Information about a sub object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubInfo {
    /// The size of this sub object in bytes, or 0 for variable length strings
    pub size: usize,
    /// The data type of this sub object
    pub data_type: DataType,
    /// Indicates what accesses (i.e. read/write) are allowed on this sub object
    pub access_type: AccessType,
    /// Indicates whether this sub may be mapped to PDOs
    pub pdo_mapping: PdoMappable,
}

impl SubInfo {
    /// A shorthand value for sub0 on record and array objects
    pub const MAX_SUB_NUMBER: SubInfo = SubInfo {
        size: 1,
        data_type: DataType::UInt8,
        access_type: AccessType::Const,
        pdo_mapping: PdoMappable::None,
    };

    /// Create a read-only, non-mappable sub info of the given type
    pub fn new(data_type: DataType) -> Self {
        Self {
            size: data_type.fixed_size().unwrap_or(0),
            data_type,
            access_type: AccessType::Ro,
            pdo_mapping: PdoMappable::None,
        }
    }

    /// Set the access type
    pub const fn access(mut self, access_type: AccessType) -> Self {
        self.access_type = access_type;
        self
    }

    /// Set the PDO mapping
    pub const fn mappable(mut self, pdo_mapping: PdoMappable) -> Self {
        self.pdo_mapping = pdo_mapping;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes() {
        assert_eq!(Ok(DataType::Real64), DataType::try_from(0x11));
        assert_eq!(Ok(DataType::UInt64), DataType::try_from(0x1b));
        assert_eq!(Err(0x0f), DataType::try_from(0x0f));
        assert_eq!(0x0au16, DataType::OctetString.into());
    }

    #[test]
    fn test_sub_info_builder() {
        let info = SubInfo::new(DataType::Int16)
            .access(AccessType::Rw)
            .mappable(PdoMappable::Both);
        assert_eq!(2, info.size);
        assert!(info.access_type.is_writable());
        assert!(info.pdo_mapping.supports_rpdo());
        assert_eq!(0, SubInfo::new(DataType::VisibleString).size);
    }
}
