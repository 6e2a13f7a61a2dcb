//! Raw CAN frames and the fixed-format CANopen messages carried on them
//!
//! SDO and LSS codecs live in their own modules; everything that fits in a handful of bytes (NMT,
//! heartbeat, SYNC, TIME, EMCY) is defined here.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use int_enum::IntEnum;
use snafu::Snafu;

use crate::{
    lss::{LssRequest, LssResponse},
    sdo::{SdoRequest, SdoResponse},
};

/// A CAN identifier, either 11-bit standard or 29-bit extended
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanId {
    /// A 29-bit extended identifier
    Extended(u32),
    /// An 11-bit standard identifier
    Std(u16),
}

impl CanId {
    /// Create an extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id)
    }

    /// Create a standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id)
    }

    /// Get the numeric value of the ID
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true for 29-bit IDs
    pub fn is_extended(&self) -> bool {
        match self {
            CanId::Extended(_) => true,
            CanId::Std(_) => false,
        }
    }
}

impl core::fmt::Display for CanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CanId::Extended(id) => write!(f, "0x{id:08X} (ext)"),
            CanId::Std(id) => write!(f, "0x{id:03X}"),
        }
    }
}

/// The maximum number of data bytes in a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// A classic CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanMessage {
    /// Payload storage. Only the first `dlc` bytes are valid.
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid bytes in `data`
    pub dlc: u8,
    /// Remote transmission request flag
    pub rtr: bool,
    /// The frame identifier
    pub id: CanId,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            rtr: false,
            id: CanId::Std(0),
        }
    }
}

impl CanMessage {
    /// Create a data frame
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than 8 bytes. Use [`CanMessage::try_new`] for data of unknown
    /// length.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        match Self::try_new(id, data) {
            Ok(msg) => msg,
            Err(_) => panic!("Data length exceeds maximum size of {MAX_DATA_LENGTH} bytes"),
        }
    }

    /// Create a data frame, failing if `data` does not fit in one frame
    pub fn try_new(id: CanId, data: &[u8]) -> Result<Self, MessageError> {
        if data.len() > MAX_DATA_LENGTH {
            return MessageTooLongSnafu { len: data.len() }.fail();
        }
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            dlc: data.len() as u8,
            rtr: false,
            data: buf,
        })
    }

    /// Create a remote transmission request frame
    pub fn new_rtr(id: CanId, dlc: u8) -> Self {
        Self {
            id,
            dlc: dlc.min(MAX_DATA_LENGTH as u8),
            rtr: true,
            data: [0; MAX_DATA_LENGTH],
        }
    }

    /// The frame identifier
    pub fn id(&self) -> CanId {
        self.id
    }

    /// The valid payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[0..(self.dlc as usize).min(MAX_DATA_LENGTH)]
    }

    /// True if this is a remote transmission request
    pub fn is_rtr(&self) -> bool {
        self.rtr
    }
}

/// COB-ID of NMT commands
pub const NMT_CMD_ID: CanId = CanId::Std(0);
/// COB-ID of the SYNC object
pub const SYNC_ID: CanId = CanId::Std(0x80);
/// Base ID for emergency messages (node ID is added)
pub const EMCY_BASE: u16 = 0x80;
/// COB-ID of the TIME stamp object
pub const TIME_ID: CanId = CanId::Std(0x100);
/// Base ID for heartbeat messages (node ID is added)
pub const HEARTBEAT_ID: u16 = 0x700;
/// The default base ID for sending SDO requests (server node ID is added)
pub const SDO_REQ_BASE: u16 = 0x600;
/// The default base ID for sending SDO responses (server node ID is added)
pub const SDO_RESP_BASE: u16 = 0x580;
/// COB-ID used by LSS slaves to respond
pub const LSS_RESP_ID: CanId = CanId::Std(0x7E4);
/// COB-ID used by the LSS master to send requests
pub const LSS_REQ_ID: CanId = CanId::Std(0x7E5);

/// Default base IDs of the four transmit PDOs (node ID is added)
pub const TPDO_BASES: [u16; 4] = [0x180, 0x280, 0x380, 0x480];
/// Default base IDs of the four receive PDOs (node ID is added)
pub const RPDO_BASES: [u16; 4] = [0x200, 0x300, 0x400, 0x500];

/// The NMT command codes
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum NmtCommandSpecifier {
    /// Enter the operational state
    EnterOperational = 1,
    /// Enter the stopped state
    EnterStopped = 2,
    /// Enter the pre-operational state
    EnterPreOperational = 128,
    /// Reset the application (and communication)
    ResetNode = 129,
    /// Reset communication parameters
    ResetCommunication = 130,
}

/// An NMT command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmtCommand {
    /// The command
    pub cmd: NmtCommandSpecifier,
    /// The target node ID, or 0 for all nodes
    pub node: u8,
}

impl NmtCommand {
    /// Returns true if this command applies to the given node
    pub fn targets(&self, node_id: u8) -> bool {
        self.node == 0 || self.node == node_id
    }
}

impl TryFrom<CanMessage> for NmtCommand {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        let payload = msg.data();
        if msg.id() != NMT_CMD_ID {
            Err(MessageError::UnexpectedId {
                cob_id: msg.id(),
                expected: NMT_CMD_ID,
            })
        } else if payload.len() >= 2 {
            let cmd = NmtCommandSpecifier::try_from(payload[0])
                .map_err(|value| MessageError::InvalidField { value })?;
            let node = payload[1];
            Ok(NmtCommand { cmd, node })
        } else {
            Err(MessageError::MessageTooShort)
        }
    }
}

impl From<NmtCommand> for CanMessage {
    fn from(cmd: NmtCommand) -> Self {
        CanMessage::new(NMT_CMD_ID, &[cmd.cmd.into(), cmd.node])
    }
}

/// The NMT states of a node, as encoded in heartbeat messages
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum NmtState {
    /// Node is starting up; reported once in the bootup message
    Initializing = 0,
    /// Only NMT and heartbeat are active
    Stopped = 4,
    /// All services are active
    Operational = 5,
    /// SDO and EMCY are active, PDOs are not
    PreOperational = 127,
}

impl core::fmt::Display for NmtState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NmtState::Initializing => write!(f, "Initializing"),
            NmtState::Stopped => write!(f, "Stopped"),
            NmtState::Operational => write!(f, "Operational"),
            NmtState::PreOperational => write!(f, "PreOperational"),
        }
    }
}

/// A heartbeat (or bootup) message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// The node which sent the heartbeat
    pub node: u8,
    /// The toggle bit (only used for node guarding; always false for heartbeats)
    pub toggle: bool,
    /// The state reported by the node
    pub state: NmtState,
}

impl Heartbeat {
    /// A bootup message is a heartbeat reporting the Initializing state
    pub fn is_bootup(&self) -> bool {
        self.state == NmtState::Initializing
    }
}

impl From<Heartbeat> for CanMessage {
    fn from(value: Heartbeat) -> Self {
        let mut byte: u8 = value.state.into();
        if value.toggle {
            byte |= 1 << 7;
        }
        CanMessage::new(CanId::Std(HEARTBEAT_ID | value.node as u16), &[byte])
    }
}

impl TryFrom<CanMessage> for Heartbeat {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        let cob_id = msg.id();
        let node = match cob_id {
            CanId::Std(id) if id & !0x7f == HEARTBEAT_ID && id & 0x7f != 0 => (id & 0x7f) as u8,
            _ => return UnrecognizedIdSnafu { cob_id }.fail(),
        };
        let Some(&byte) = msg.data().first() else {
            return MessageTooShortSnafu.fail();
        };
        let toggle = (byte & (1 << 7)) != 0;
        let state = NmtState::try_from(byte & 0x7f)
            .map_err(|value| MessageError::InvalidNmtState { value })?;
        Ok(Heartbeat {
            node,
            toggle,
            state,
        })
    }
}

/// Represents a SYNC object/message
///
/// A single CAN node can serve as the SYNC provider, sending a periodic sync object to all other
/// nodes. The optional one byte count value starts at 1, and increments. On overflow, it is reset
/// to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncObject {
    /// The counter value, if the producer sends one
    pub count: Option<u8>,
}

impl SyncObject {
    /// Create a SYNC object carrying a counter
    pub fn new(count: u8) -> Self {
        Self { count: Some(count) }
    }
}

impl From<SyncObject> for CanMessage {
    fn from(value: SyncObject) -> Self {
        match value.count {
            Some(count) => CanMessage::new(SYNC_ID, &[count]),
            None => CanMessage::new(SYNC_ID, &[]),
        }
    }
}

impl TryFrom<CanMessage> for SyncObject {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        if msg.id() != SYNC_ID {
            return UnexpectedIdSnafu {
                cob_id: msg.id(),
                expected: SYNC_ID,
            }
            .fail();
        }
        Ok(Self {
            count: msg.data().first().copied(),
        })
    }
}

/// Seconds between the unix epoch and the CANopen epoch, 1984-01-01
const CANOPEN_EPOCH_OFFSET_SECS: u64 = 441_763_200;
const MS_PER_DAY: u64 = 86_400_000;

/// A TIME stamp message: milliseconds after midnight and days since January 1, 1984
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeStamp {
    /// Milliseconds after midnight (28 bits on the wire)
    pub ms_after_midnight: u32,
    /// Days since January 1, 1984
    pub days: u16,
}

impl TimeStamp {
    /// Convert a wall clock time into a time stamp
    ///
    /// Times before 1984 cannot be represented and saturate to the CANopen epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let since_epoch =
            since_unix.saturating_sub(Duration::from_secs(CANOPEN_EPOCH_OFFSET_SECS));
        let total_ms = since_epoch.as_millis() as u64;
        Self {
            ms_after_midnight: (total_ms % MS_PER_DAY) as u32,
            days: (total_ms / MS_PER_DAY).min(u16::MAX as u64) as u16,
        }
    }

    /// Convert the time stamp back to a wall clock time
    pub fn to_system_time(&self) -> SystemTime {
        let ms = self.days as u64 * MS_PER_DAY + self.ms_after_midnight as u64;
        UNIX_EPOCH + Duration::from_secs(CANOPEN_EPOCH_OFFSET_SECS) + Duration::from_millis(ms)
    }
}

impl From<TimeStamp> for CanMessage {
    fn from(value: TimeStamp) -> Self {
        let mut payload = [0u8; 6];
        payload[0..4].copy_from_slice(&(value.ms_after_midnight & 0x0FFF_FFFF).to_le_bytes());
        payload[4..6].copy_from_slice(&value.days.to_le_bytes());
        CanMessage::new(TIME_ID, &payload)
    }
}

impl TryFrom<CanMessage> for TimeStamp {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        if msg.id() != TIME_ID {
            return UnexpectedIdSnafu {
                cob_id: msg.id(),
                expected: TIME_ID,
            }
            .fail();
        }
        let data = msg.data();
        if data.len() < 6 {
            return MessageTooShortSnafu.fail();
        }
        Ok(Self {
            ms_after_midnight: u32::from_le_bytes([data[0], data[1], data[2], data[3]])
                & 0x0FFF_FFFF,
            days: u16::from_le_bytes([data[4], data[5]]),
        })
    }
}

/// An emergency message
///
/// Sent on `0x80 + node_id`. The payload is always 8 bytes: the error code (little endian), the
/// error register, and five manufacturer specific bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Emergency {
    /// The CiA301 error code. 0 signals an error reset.
    pub error_code: u16,
    /// Snapshot of the error register (object 0x1001)
    pub error_register: u8,
    /// Manufacturer specific error information
    pub data: [u8; 5],
}

impl Emergency {
    /// Create an emergency record
    pub fn new(error_code: u16, error_register: u8, data: [u8; 5]) -> Self {
        Self {
            error_code,
            error_register,
            data,
        }
    }

    /// Returns true if this message signals that all errors have been cleared
    pub fn is_error_reset(&self) -> bool {
        self.error_code == 0
    }

    /// Encode the 8 byte payload
    pub fn to_payload(&self) -> [u8; 8] {
        let mut payload = [0u8; 8];
        payload[0..2].copy_from_slice(&self.error_code.to_le_bytes());
        payload[2] = self.error_register;
        payload[3..8].copy_from_slice(&self.data);
        payload
    }

    /// Build the frame sent by `node` on the default EMCY COB-ID
    pub fn to_message(&self, node: u8) -> CanMessage {
        self.to_message_with_id(CanId::Std(EMCY_BASE + node as u16))
    }

    /// Build the frame using an explicit COB-ID
    pub fn to_message_with_id(&self, id: CanId) -> CanMessage {
        CanMessage::new(id, &self.to_payload())
    }

    /// Decode an emergency frame, returning the originating node and the record
    ///
    /// Only standard IDs in 0x081..=0x0FF carrying exactly 8 bytes are accepted.
    pub fn from_message(msg: &CanMessage) -> Result<(u8, Emergency), MessageError> {
        let cob_id = msg.id();
        let node = match cob_id {
            CanId::Std(id) if (0x81..=0xFF).contains(&id) => (id - EMCY_BASE) as u8,
            _ => return UnrecognizedIdSnafu { cob_id }.fail(),
        };
        Ok((node, Self::from_payload(msg.data(), cob_id)?))
    }

    /// Decode the 8 byte payload of an emergency frame
    pub fn from_payload(data: &[u8], cob_id: CanId) -> Result<Emergency, MessageError> {
        if data.len() != 8 || cob_id.is_extended() {
            return MalformedMsgSnafu { cob_id }.fail();
        }
        let mut mfr = [0u8; 5];
        mfr.copy_from_slice(&data[3..8]);
        Ok(Emergency {
            error_code: u16::from_le_bytes([data[0], data[1]]),
            error_register: data[2],
            data: mfr,
        })
    }
}

/// Returns true if `can_id` is a request to the SDO server of `node_id` on its default COB-ID
pub fn is_std_sdo_request(can_id: CanId, node_id: u8) -> bool {
    if let CanId::Std(id) = can_id {
        let base = id & 0xff80;
        let msg_id = id & 0x7f;
        if base == SDO_REQ_BASE && msg_id == node_id as u16 {
            return true;
        }
    }
    false
}

/// A frame classified by its default CANopen identifier
///
/// This only knows the predefined connection set. Services configured on non-default COB-IDs
/// (e.g. remapped PDOs) must be matched by whoever configured them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanOpenMessage {
    /// NMT command
    NmtCommand(NmtCommand),
    /// SYNC object
    Sync(SyncObject),
    /// Emergency from `node`
    Emergency {
        /// The originating node
        node: u8,
        /// The decoded emergency
        emcy: Emergency,
    },
    /// TIME stamp
    TimeStamp(TimeStamp),
    /// Heartbeat or bootup
    Heartbeat(Heartbeat),
    /// An SDO request sent to `node`
    SdoRequest {
        /// The server node
        node: u8,
        /// The decoded request
        req: SdoRequest,
    },
    /// An SDO response sent by `node`
    SdoResponse {
        /// The server node
        node: u8,
        /// The decoded response
        resp: SdoResponse,
    },
    /// A frame in one of the PDO ranges; PDO payloads can only be decoded using a mapping
    Pdo(CanMessage),
    /// LSS request
    LssRequest(LssRequest),
    /// LSS response
    LssResponse(LssResponse),
}

impl TryFrom<CanMessage> for CanOpenMessage {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        let cob_id = msg.id();
        let id = match cob_id {
            CanId::Std(id) => id,
            CanId::Extended(_) => return UnrecognizedIdSnafu { cob_id }.fail(),
        };
        let node = (id & 0x7f) as u8;
        match id {
            0x000 => Ok(CanOpenMessage::NmtCommand(msg.try_into()?)),
            0x080 => Ok(CanOpenMessage::Sync(msg.try_into()?)),
            0x081..=0x0FF => {
                let (node, emcy) = Emergency::from_message(&msg)?;
                Ok(CanOpenMessage::Emergency { node, emcy })
            }
            0x100 => Ok(CanOpenMessage::TimeStamp(msg.try_into()?)),
            0x181..=0x57F if node != 0 => Ok(CanOpenMessage::Pdo(msg)),
            0x581..=0x5FF => {
                let resp = SdoResponse::try_from(msg.data())
                    .map_err(|_| MessageError::MalformedMsg { cob_id })?;
                Ok(CanOpenMessage::SdoResponse { node, resp })
            }
            0x601..=0x67F => {
                let req = SdoRequest::try_from(msg.data())
                    .map_err(|_| MessageError::MalformedMsg { cob_id })?;
                Ok(CanOpenMessage::SdoRequest { node, req })
            }
            0x701..=0x77F => Ok(CanOpenMessage::Heartbeat(msg.try_into()?)),
            0x7E4 => Ok(CanOpenMessage::LssResponse(msg.data().try_into()?)),
            0x7E5 => Ok(CanOpenMessage::LssRequest(msg.data().try_into()?)),
            _ => UnrecognizedIdSnafu { cob_id }.fail(),
        }
    }
}

/// Errors raised when decoding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum MessageError {
    /// The payload is shorter than the message format requires
    MessageTooShort,
    /// More than 8 bytes were given for one frame
    #[snafu(display("{len} bytes do not fit in a CAN frame"))]
    MessageTooLong {
        /// Number of bytes given
        len: usize,
    },
    /// The payload does not have the structure required for its ID
    #[snafu(display("Malformed message on {cob_id}"))]
    MalformedMsg {
        /// ID of the offending frame
        cob_id: CanId,
    },
    /// The message ID was not the expected value
    #[snafu(display("Unexpected message ID found: {cob_id}, expected: {expected}"))]
    UnexpectedId {
        /// ID of the frame
        cob_id: CanId,
        /// ID expected by the decoder
        expected: CanId,
    },
    /// A field holds a value which is not defined for it
    #[snafu(display("Invalid field value {value}"))]
    InvalidField {
        /// The raw field value
        value: u8,
    },
    /// The ID does not belong to any known service
    #[snafu(display("Unrecognized ID {cob_id}"))]
    UnrecognizedId {
        /// ID of the frame
        cob_id: CanId,
    },
    /// The NMT state integer in the message is not a valid NMT state
    #[snafu(display("Invalid NMT state {value}"))]
    InvalidNmtState {
        /// The raw state byte
        value: u8,
    },
    /// An invalid LSS command specifier was found in the message
    #[snafu(display("Unexpected LSS command: {value}"))]
    UnexpectedLssCommand {
        /// The raw command specifier
        value: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::{assert_err, assert_ok};

    #[test]
    fn test_emcy_encode_decode() {
        let emcy = Emergency::new(0x1000, 0x01, [0; 5]);
        let msg = emcy.to_message(5);
        assert_eq!(CanId::Std(0x85), msg.id());
        assert_eq!(&[0x00, 0x10, 0x01, 0, 0, 0, 0, 0], msg.data());

        let (node, decoded) = Emergency::from_message(&msg).unwrap();
        assert_eq!(5, node);
        assert_eq!(emcy, decoded);
    }

    #[test]
    fn test_emcy_rejects_bad_frames() {
        // Wrong length
        let short = CanMessage::new(CanId::Std(0x85), &[0, 0x10, 1]);
        assert_eq!(
            Err(MessageError::MalformedMsg {
                cob_id: CanId::Std(0x85)
            }),
            Emergency::from_message(&short)
        );
        // 0x80 is SYNC, not an emergency from node 0
        let sync = CanMessage::new(CanId::Std(0x80), &[0; 8]);
        assert_err!(Emergency::from_message(&sync));
        // Extended frames are never emergencies
        let ext = CanMessage::new(CanId::Extended(0x85), &[0; 8]);
        assert_err!(Emergency::from_message(&ext));
        // Highest node id is fine
        let last = CanMessage::new(CanId::Std(0xFF), &[0; 8]);
        assert_eq!(127, Emergency::from_message(&last).unwrap().0);
    }

    #[test]
    fn test_nmt_command() {
        let cmd = NmtCommand {
            cmd: NmtCommandSpecifier::EnterPreOperational,
            node: 0,
        };
        let msg: CanMessage = cmd.into();
        assert_eq!(&[128, 0], msg.data());
        let decoded = NmtCommand::try_from(msg).unwrap();
        assert_eq!(cmd, decoded);
        assert!(decoded.targets(12));

        let bad = CanMessage::new(NMT_CMD_ID, &[7, 1]);
        assert_eq!(
            Err(MessageError::InvalidField { value: 7 }),
            NmtCommand::try_from(bad)
        );
        let short = CanMessage::new(NMT_CMD_ID, &[1]);
        assert_eq!(Err(MessageError::MessageTooShort), NmtCommand::try_from(short));
    }

    #[test]
    fn test_heartbeat() {
        let hb = Heartbeat {
            node: 3,
            toggle: false,
            state: NmtState::PreOperational,
        };
        let msg: CanMessage = hb.into();
        assert_eq!(CanId::Std(0x703), msg.id());
        assert_eq!(&[127], msg.data());
        assert_eq!(hb, Heartbeat::try_from(msg).unwrap());

        let bootup = CanMessage::new(CanId::Std(0x703), &[0]);
        assert!(Heartbeat::try_from(bootup).unwrap().is_bootup());

        let bad_state = CanMessage::new(CanId::Std(0x703), &[3]);
        assert_err!(Heartbeat::try_from(bad_state));
    }

    #[test]
    fn test_time_stamp() {
        // 1984-01-02 00:00:01.500
        let time =
            UNIX_EPOCH + Duration::from_millis((CANOPEN_EPOCH_OFFSET_SECS + 86_401) * 1000 + 500);
        let ts = TimeStamp::from_system_time(time);
        assert_eq!(1, ts.days);
        assert_eq!(1500, ts.ms_after_midnight);
        assert_eq!(time, ts.to_system_time());

        let msg: CanMessage = ts.into();
        assert_eq!(6, msg.dlc);
        assert_eq!(ts, TimeStamp::try_from(msg).unwrap());
    }

    #[test]
    fn test_classify() {
        let msg = CanMessage::new(CanId::Std(0x185), &[1, 2]);
        assert_eq!(CanOpenMessage::Pdo(msg), CanOpenMessage::try_from(msg).unwrap());

        let sync = CanMessage::new(SYNC_ID, &[4]);
        assert_eq!(
            CanOpenMessage::Sync(SyncObject::new(4)),
            CanOpenMessage::try_from(sync).unwrap()
        );

        let hb = CanMessage::new(CanId::Std(0x77F), &[5]);
        assert_ok!(CanOpenMessage::try_from(hb));

        let unknown = CanMessage::new(CanId::Std(0x7F0), &[]);
        assert_err!(CanOpenMessage::try_from(unknown));
    }

    #[test]
    fn test_try_new_too_long() {
        assert_eq!(
            Err(MessageError::MessageTooLong { len: 9 }),
            CanMessage::try_new(CanId::Std(1), &[0; 9])
        );
    }
}
