//! Layer Setting Services (LSS) messages
//!
//! Only the services needed to assign a node ID to a device are implemented: global and selective
//! mode switching, node ID configuration, storing the configuration and inquiring the active node
//! ID.
use int_enum::IntEnum;

use crate::messages::{CanMessage, MessageError, LSS_REQ_ID, LSS_RESP_ID};

/// The LSS command specifiers used by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum LssCommandSpecifier {
    /// Switch all slaves between waiting and configuration mode
    SwitchModeGlobal = 0x04,
    /// Configure the pending node ID
    ConfigureNodeId = 0x11,
    /// Store the pending configuration to non-volatile memory
    StoreConfiguration = 0x17,
    /// Selective switch, vendor ID
    SwitchStateVendor = 0x40,
    /// Selective switch, product code
    SwitchStateProduct = 0x41,
    /// Selective switch, revision number
    SwitchStateRevision = 0x42,
    /// Selective switch, serial number
    SwitchStateSerial = 0x43,
    /// Response confirming a selective switch
    SwitchStateResponse = 0x44,
    /// Request the active node ID
    InquireNodeId = 0x5E,
}

/// The LSS mode of a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum LssMode {
    /// Normal operation
    Waiting = 0,
    /// Accepting configuration commands
    Configuration = 1,
}

/// An LSS identity, as found in object 0x1018
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LssIdentity {
    /// Vendor ID
    pub vendor_id: u32,
    /// Product code
    pub product_code: u32,
    /// Revision number
    pub revision: u32,
    /// Serial number
    pub serial: u32,
}

/// A request sent by the LSS master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LssRequest {
    /// Switch all slaves into `mode`
    SwitchModeGlobal {
        /// The new mode
        mode: LssMode,
    },
    /// Set the pending node ID of the slave in configuration mode
    ConfigureNodeId {
        /// The new node ID
        node_id: u8,
    },
    /// Persist the pending configuration
    StoreConfiguration,
    /// First frame of a selective switch
    SwitchStateVendor {
        /// Vendor ID to match
        vendor_id: u32,
    },
    /// Second frame of a selective switch
    SwitchStateProduct {
        /// Product code to match
        product_code: u32,
    },
    /// Third frame of a selective switch
    SwitchStateRevision {
        /// Revision to match
        revision: u32,
    },
    /// Last frame of a selective switch
    SwitchStateSerial {
        /// Serial number to match
        serial: u32,
    },
    /// Ask the slave in configuration mode for its active node ID
    InquireNodeId,
}

impl LssRequest {
    /// Encode the 8 byte payload
    pub fn to_payload(&self) -> [u8; 8] {
        let mut payload = [0u8; 8];
        let (cs, arg) = match *self {
            LssRequest::SwitchModeGlobal { mode } => {
                payload[1] = mode.into();
                (LssCommandSpecifier::SwitchModeGlobal, None)
            }
            LssRequest::ConfigureNodeId { node_id } => {
                payload[1] = node_id;
                (LssCommandSpecifier::ConfigureNodeId, None)
            }
            LssRequest::StoreConfiguration => (LssCommandSpecifier::StoreConfiguration, None),
            LssRequest::SwitchStateVendor { vendor_id } => {
                (LssCommandSpecifier::SwitchStateVendor, Some(vendor_id))
            }
            LssRequest::SwitchStateProduct { product_code } => {
                (LssCommandSpecifier::SwitchStateProduct, Some(product_code))
            }
            LssRequest::SwitchStateRevision { revision } => {
                (LssCommandSpecifier::SwitchStateRevision, Some(revision))
            }
            LssRequest::SwitchStateSerial { serial } => {
                (LssCommandSpecifier::SwitchStateSerial, Some(serial))
            }
            LssRequest::InquireNodeId => (LssCommandSpecifier::InquireNodeId, None),
        };
        payload[0] = cs.into();
        if let Some(arg) = arg {
            payload[1..5].copy_from_slice(&arg.to_le_bytes());
        }
        payload
    }

    /// The four requests making up a selective switch to `identity`
    pub fn switch_selective(identity: &LssIdentity) -> [LssRequest; 4] {
        [
            LssRequest::SwitchStateVendor {
                vendor_id: identity.vendor_id,
            },
            LssRequest::SwitchStateProduct {
                product_code: identity.product_code,
            },
            LssRequest::SwitchStateRevision {
                revision: identity.revision,
            },
            LssRequest::SwitchStateSerial {
                serial: identity.serial,
            },
        ]
    }
}

impl From<LssRequest> for CanMessage {
    fn from(value: LssRequest) -> Self {
        CanMessage::new(LSS_REQ_ID, &value.to_payload())
    }
}

fn arg_u32(value: &[u8]) -> Result<u32, MessageError> {
    if value.len() < 5 {
        return Err(MessageError::MessageTooShort);
    }
    Ok(u32::from_le_bytes([value[1], value[2], value[3], value[4]]))
}

fn arg_u8(value: &[u8]) -> Result<u8, MessageError> {
    value.get(1).copied().ok_or(MessageError::MessageTooShort)
}

fn command_specifier(value: &[u8]) -> Result<LssCommandSpecifier, MessageError> {
    let Some(&cs) = value.first() else {
        return Err(MessageError::MessageTooShort);
    };
    LssCommandSpecifier::try_from(cs).map_err(|value| MessageError::UnexpectedLssCommand { value })
}

impl TryFrom<&[u8]> for LssRequest {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match command_specifier(value)? {
            LssCommandSpecifier::SwitchModeGlobal => {
                let mode = LssMode::try_from(arg_u8(value)?)
                    .map_err(|value| MessageError::InvalidField { value })?;
                Ok(Self::SwitchModeGlobal { mode })
            }
            LssCommandSpecifier::ConfigureNodeId => Ok(Self::ConfigureNodeId {
                node_id: arg_u8(value)?,
            }),
            LssCommandSpecifier::StoreConfiguration => Ok(Self::StoreConfiguration),
            LssCommandSpecifier::SwitchStateVendor => Ok(Self::SwitchStateVendor {
                vendor_id: arg_u32(value)?,
            }),
            LssCommandSpecifier::SwitchStateProduct => Ok(Self::SwitchStateProduct {
                product_code: arg_u32(value)?,
            }),
            LssCommandSpecifier::SwitchStateRevision => Ok(Self::SwitchStateRevision {
                revision: arg_u32(value)?,
            }),
            LssCommandSpecifier::SwitchStateSerial => Ok(Self::SwitchStateSerial {
                serial: arg_u32(value)?,
            }),
            LssCommandSpecifier::InquireNodeId => Ok(Self::InquireNodeId),
            LssCommandSpecifier::SwitchStateResponse => Err(MessageError::UnexpectedLssCommand {
                value: LssCommandSpecifier::SwitchStateResponse.into(),
            }),
        }
    }
}

/// A response sent by an LSS slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LssResponse {
    /// Result of a ConfigureNodeId request. `error` is 0 on success.
    ConfigureNodeIdAck {
        /// Error code; 1 means the ID is out of range
        error: u8,
        /// Manufacturer specific error
        spec_error: u8,
    },
    /// Result of a StoreConfiguration request. `error` is 0 on success.
    StoreConfigurationAck {
        /// Error code; 1 means storing is not supported
        error: u8,
        /// Manufacturer specific error
        spec_error: u8,
    },
    /// A slave matched the selective switch and is now in configuration mode
    SwitchStateResponse,
    /// The active node ID of the slave
    InquireNodeIdAck {
        /// The active node ID
        node_id: u8,
    },
}

impl LssResponse {
    /// Encode the 8 byte payload
    pub fn to_payload(&self) -> [u8; 8] {
        let mut payload = [0u8; 8];
        match *self {
            LssResponse::ConfigureNodeIdAck { error, spec_error } => {
                payload[0] = LssCommandSpecifier::ConfigureNodeId.into();
                payload[1] = error;
                payload[2] = spec_error;
            }
            LssResponse::StoreConfigurationAck { error, spec_error } => {
                payload[0] = LssCommandSpecifier::StoreConfiguration.into();
                payload[1] = error;
                payload[2] = spec_error;
            }
            LssResponse::SwitchStateResponse => {
                payload[0] = LssCommandSpecifier::SwitchStateResponse.into();
            }
            LssResponse::InquireNodeIdAck { node_id } => {
                payload[0] = LssCommandSpecifier::InquireNodeId.into();
                payload[1] = node_id;
            }
        }
        payload
    }
}

impl From<LssResponse> for CanMessage {
    fn from(value: LssResponse) -> Self {
        CanMessage::new(LSS_RESP_ID, &value.to_payload())
    }
}

impl TryFrom<&[u8]> for LssResponse {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match command_specifier(value)? {
            LssCommandSpecifier::ConfigureNodeId => Ok(Self::ConfigureNodeIdAck {
                error: arg_u8(value)?,
                spec_error: value.get(2).copied().unwrap_or(0),
            }),
            LssCommandSpecifier::StoreConfiguration => Ok(Self::StoreConfigurationAck {
                error: arg_u8(value)?,
                spec_error: value.get(2).copied().unwrap_or(0),
            }),
            LssCommandSpecifier::SwitchStateResponse => Ok(Self::SwitchStateResponse),
            LssCommandSpecifier::InquireNodeId => Ok(Self::InquireNodeIdAck {
                node_id: arg_u8(value)?,
            }),
            other => Err(MessageError::UnexpectedLssCommand {
                value: other.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selective_switch_frames() {
        let identity = LssIdentity {
            vendor_id: 0x1234_5678,
            product_code: 2,
            revision: 3,
            serial: 0x1551_ABBA,
        };
        let frames = LssRequest::switch_selective(&identity).map(CanMessage::from);
        assert_eq!(LSS_REQ_ID, frames[0].id());
        assert_eq!(&[0x40, 0x78, 0x56, 0x34, 0x12, 0, 0, 0], frames[0].data());
        assert_eq!(&[0x43, 0xBA, 0xAB, 0x51, 0x15, 0, 0, 0], frames[3].data());
        assert_eq!(
            LssRequest::SwitchStateSerial {
                serial: 0x1551_ABBA
            },
            LssRequest::try_from(frames[3].data()).unwrap()
        );
    }

    #[test]
    fn test_responses() {
        let msg: CanMessage = LssResponse::InquireNodeIdAck { node_id: 7 }.into();
        assert_eq!(LSS_RESP_ID, msg.id());
        assert_eq!(
            LssResponse::InquireNodeIdAck { node_id: 7 },
            LssResponse::try_from(msg.data()).unwrap()
        );
        assert_eq!(
            Err(MessageError::UnexpectedLssCommand { value: 0x99 }),
            LssResponse::try_from([0x99u8, 0].as_slice())
        );
    }
}
