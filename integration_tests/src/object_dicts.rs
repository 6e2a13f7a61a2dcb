//! Object dictionaries used by the tests
use canopen_common::{
    constants::object_ids::IDENTITY,
    objects::{AccessType, DataType, PdoMappable},
};
use canopen_node::{
    object_dict::schema::{self, EntryDefinition},
    ObjectDictionary,
};

/// Identity reported in 0x1018 by [`io_module`]
pub const IO_VENDOR_ID: u32 = 0x0000_04D8;
/// Product code reported by [`io_module`]
pub const IO_PRODUCT_CODE: u32 = 0x10;

/// An I/O module
///
/// - 0x2000 sub 1..=3: u8, i8 and u16 outputs, mappable in both directions
/// - 0x2001: u32 counter, mappable in both directions
/// - 0x2002: visible string
/// - 0x2003: read-only u32 measurement, TPDO mappable
/// - 0x2004: write-only u32 command
/// - 0x2005: octet string
pub fn io_module(heartbeat_ms: u16) -> ObjectDictionary {
    let mut defs = schema::communication_objects("io module", heartbeat_ms);
    defs.retain(|d| !(d.index == IDENTITY && d.sub <= 2));
    defs.extend([
        EntryDefinition::new(IDENTITY, 1, "Vendor-ID", DataType::UInt32).default_value(IO_VENDOR_ID),
        EntryDefinition::new(IDENTITY, 2, "Product code", DataType::UInt32)
            .default_value(IO_PRODUCT_CODE),
        EntryDefinition::new(0x2000, 1, "Output A", DataType::UInt8)
            .access(AccessType::Rw)
            .mappable(PdoMappable::Both),
        EntryDefinition::new(0x2000, 2, "Output B", DataType::Int8)
            .access(AccessType::Rw)
            .mappable(PdoMappable::Both),
        EntryDefinition::new(0x2000, 3, "Output C", DataType::UInt16)
            .access(AccessType::Rw)
            .mappable(PdoMappable::Both),
        schema::var(0x2001, "Counter", DataType::UInt32).mappable(PdoMappable::Both),
        schema::var(0x2002, "Label", DataType::VisibleString).default_value("unnamed"),
        EntryDefinition::new(0x2003, 0, "Measurement", DataType::UInt32)
            .mappable(PdoMappable::Tpdo),
        EntryDefinition::new(0x2004, 0, "Command", DataType::UInt32).access(AccessType::Wo),
        schema::var(0x2005, "Blob", DataType::OctetString),
    ]);
    ObjectDictionary::from_definitions(defs).expect("io module dictionary is valid")
}

/// A dictionary with only the communication objects
pub fn minimal(heartbeat_ms: u16) -> ObjectDictionary {
    ObjectDictionary::from_definitions(schema::communication_objects("minimal", heartbeat_ms))
        .expect("minimal dictionary is valid")
}
