//! Entry definitions used to build an object dictionary
//!
//! Loading a description from an EDS or device config file is left to the application; the
//! dictionary only consumes a sequence of [`EntryDefinition`] records.
use canopen_common::{
    constants::object_ids,
    objects::{AccessType, DataType, ObjectId, PdoMappable},
    Value,
};

/// The definition of a single sub object
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDefinition {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
    /// Parameter name
    pub name: String,
    /// Declared data type
    pub data_type: DataType,
    /// Access allowed over the bus
    pub access_type: AccessType,
    /// Whether the entry may be mapped into PDOs
    pub pdo_mapping: PdoMappable,
    /// Initial value. Entries without a default start at the zero value of their type.
    pub default: Option<Value>,
}

impl EntryDefinition {
    /// Create a read-only, non-mappable definition with no default value
    pub fn new(index: u16, sub: u8, name: &str, data_type: DataType) -> Self {
        Self {
            index,
            sub,
            name: name.to_string(),
            data_type,
            access_type: AccessType::Ro,
            pdo_mapping: PdoMappable::None,
            default: None,
        }
    }

    /// Set the access type
    pub fn access(mut self, access_type: AccessType) -> Self {
        self.access_type = access_type;
        self
    }

    /// Set the PDO mapping
    pub fn mappable(mut self, pdo_mapping: PdoMappable) -> Self {
        self.pdo_mapping = pdo_mapping;
        self
    }

    /// Set the default value
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// The address of the defined entry
    pub fn id(&self) -> ObjectId {
        ObjectId {
            index: self.index,
            sub: self.sub,
        }
    }
}

/// Shorthand for a read-write VAR object at sub 0
pub fn var(index: u16, name: &str, data_type: DataType) -> EntryDefinition {
    EntryDefinition::new(index, 0, name, data_type).access(AccessType::Rw)
}

/// Definitions for the sub objects 1..=N of an ARRAY object, all sharing one type
///
/// Sub 0 is synthesized when the dictionary is built.
pub fn array(
    index: u16,
    name: &str,
    data_type: DataType,
    len: u8,
    access_type: AccessType,
) -> Vec<EntryDefinition> {
    (1..=len)
        .map(|sub| {
            EntryDefinition::new(index, sub, &format!("{name}[{sub}]"), data_type)
                .access(access_type)
        })
        .collect()
}

/// A minimal set of communication objects every node should carry
///
/// Contains the device type, error register, device name, producer heartbeat time, identity and
/// the default SDO server parameters.
pub fn communication_objects(device_name: &str, heartbeat_ms: u16) -> Vec<EntryDefinition> {
    use object_ids::*;
    vec![
        EntryDefinition::new(DEVICE_TYPE, 0, "Device type", DataType::UInt32)
            .access(AccessType::Const),
        EntryDefinition::new(ERROR_REGISTER, 0, "Error register", DataType::UInt8)
            .mappable(PdoMappable::Tpdo),
        EntryDefinition::new(
            DEVICE_NAME,
            0,
            "Manufacturer device name",
            DataType::VisibleString,
        )
        .access(AccessType::Const)
        .default_value(device_name),
        EntryDefinition::new(
            HEARTBEAT_PRODUCER_TIME,
            0,
            "Producer heartbeat time",
            DataType::UInt16,
        )
        .access(AccessType::Rw)
        .default_value(heartbeat_ms),
        EntryDefinition::new(IDENTITY, 1, "Vendor-ID", DataType::UInt32),
        EntryDefinition::new(IDENTITY, 2, "Product code", DataType::UInt32),
        EntryDefinition::new(IDENTITY, 3, "Revision number", DataType::UInt32),
        EntryDefinition::new(IDENTITY, 4, "Serial number", DataType::UInt32),
        EntryDefinition::new(
            SDO_SERVER_PARAMETER,
            1,
            "COB-ID client to server",
            DataType::UInt32,
        )
        .default_value(0x600u32),
        EntryDefinition::new(
            SDO_SERVER_PARAMETER,
            2,
            "COB-ID server to client",
            DataType::UInt32,
        )
        .default_value(0x580u32),
    ]
}
