//! Well known object indices

/// Object indices of the communication profile objects used by this crate
pub mod object_ids {
    /// Device type
    pub const DEVICE_TYPE: u16 = 0x1000;
    /// Error register, mirrored into every EMCY message
    pub const ERROR_REGISTER: u16 = 0x1001;
    /// Manufacturer device name
    pub const DEVICE_NAME: u16 = 0x1008;
    /// COB-ID of the EMCY object
    pub const EMCY_COB_ID: u16 = 0x1014;
    /// Producer heartbeat time, in ms
    pub const HEARTBEAT_PRODUCER_TIME: u16 = 0x1017;
    /// Identity object (vendor, product, revision, serial)
    pub const IDENTITY: u16 = 0x1018;
    /// First SDO server parameter record
    pub const SDO_SERVER_PARAMETER: u16 = 0x1200;
}

/// Bit set in a COB-ID object value when the object is not valid / disabled
pub const COB_ID_INVALID_BIT: u32 = 1 << 31;
