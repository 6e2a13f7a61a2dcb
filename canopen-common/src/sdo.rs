//! SDO wire format
//!
//! Every SDO frame is 8 bytes. Byte 0 holds the command specifier, which carries the command in
//! bits 5-7 and, depending on the command, the toggle bit (4), the unused byte count `n`, the
//! expedited flag `e` (1) and the size indicated flag `s` (0). Segment frames carry `n` in bits 1-3
//! and the "no more segments" flag `c` in bit 0.
use int_enum::IntEnum;
use snafu::Snafu;

use crate::messages::{CanId, CanMessage};

/// Specifies the possible server command specifier (SCS) values in SDO response packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum ServerCommand {
    /// Response to an upload segment request
    SegmentUpload = 0,
    /// Acknowledge a download segment
    SegmentDownload = 1,
    /// Response to an initiate upload
    Upload = 2,
    /// Acknowledge a download command
    Download = 3,
    /// Abort the transfer
    Abort = 4,
}

/// Specifies the possible client command specifier (CCS) values in SDO request packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
#[repr(u8)]
pub enum ClientCommand {
    /// Download one segment
    DownloadSegment = 0,
    /// Start a download
    InitiateDownload = 1,
    /// Start an upload
    InitiateUpload = 2,
    /// Request the next upload segment
    ReqUploadSegment = 3,
    /// Abort the transfer
    Abort = 4,
}

/// SDO abort codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[repr(u32)]
pub enum AbortCode {
    /// Toggle bit not alternated
    ToggleNotAlternated = 0x0503_0000,
    /// SDO protocol timed out
    SdoTimeout = 0x0504_0000,
    /// Client/server command specifier not valid or unknown
    InvalidCommandSpecifier = 0x0504_0001,
    /// Invalid block size (block mode only)
    InvalidBlockSize = 0x0504_0002,
    /// Invalid sequence number (block mode only)
    InvalidSequenceNumber = 0x0504_0003,
    /// CRC Error (block mode only )
    CrcError = 0x0504_0004,
    /// Out of memory
    OutOfMemory = 0x0504_0005,
    /// Unsupported access to an object
    UnsupportedAccess = 0x0601_0000,
    /// Attempt to read a write only object
    WriteOnly = 0x0601_0001,
    /// Attempt to write a read only object
    ReadOnly = 0x0601_0002,
    /// Object does not exist in the dictionary
    NoSuchObject = 0x0602_0000,
    /// Object cannot be mapped to the PDO
    UnallowedPdo = 0x0604_0041,
    /// The number and length of objects would exceed PDO length
    PdoTooLong = 0x0604_0042,
    /// General parameter incompatibility
    IncompatibleParameter = 0x0604_0043,
    /// Access failed due to hardware error
    HardwareError = 0x0606_0000,
    /// Data type does not match, length of service parameter does not match
    DataTypeMismatch = 0x0607_0010,
    /// Data type does not match, length of service parameter too high
    DataTypeMismatchLengthHigh = 0x0607_0012,
    /// Data type does not match, length of service parameter too low
    DataTypeMismatchLengthLow = 0x0607_0013,
    /// Sub-index does not exist
    NoSuchSubIndex = 0x0609_0011,
    /// Invalid value for parameter (download only)
    InvalidValue = 0x0609_0030,
    /// Value of parameter too high (download only)
    ValueTooHigh = 0x0609_0031,
    /// Value of parameter too low (download only)
    ValueTooLow = 0x0609_0032,
    /// Resource not available: SDO connection
    ResourceNotAvailable = 0x060A_0023,
    /// General error
    GeneralError = 0x0800_0000,
    /// Data cannot be transferred or stored to the application
    CantStore = 0x0800_0020,
    /// Data cannot be transferred or stored to the application because of local control
    CantStoreLocalControl = 0x0800_0021,
    /// Data cannot be transferred or stored to the application because of the device state
    CantStoreDeviceState = 0x0800_0022,
    /// No object dictionary is present
    NoObjectDict = 0x0800_0023,
    /// No data available
    NoData = 0x0800_0024,
}

/// An abort code received from a peer, which may not be one this crate knows about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawAbortCode {
    /// A recognized abort code
    Valid(AbortCode),
    /// An unrecognized abort code
    Unknown(u32),
}

impl RawAbortCode {
    /// The numeric value sent on the wire
    pub fn raw(&self) -> u32 {
        match self {
            RawAbortCode::Valid(code) => (*code).into(),
            RawAbortCode::Unknown(code) => *code,
        }
    }
}

impl From<u32> for RawAbortCode {
    fn from(value: u32) -> Self {
        match AbortCode::try_from(value) {
            Ok(code) => RawAbortCode::Valid(code),
            Err(value) => RawAbortCode::Unknown(value),
        }
    }
}

impl From<AbortCode> for RawAbortCode {
    fn from(value: AbortCode) -> Self {
        RawAbortCode::Valid(value)
    }
}

impl core::fmt::Display for RawAbortCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RawAbortCode::Valid(code) => write!(f, "{code:?} (0x{:08X})", self.raw()),
            RawAbortCode::Unknown(code) => write!(f, "Unknown (0x{code:08X})"),
        }
    }
}

/// Error returned when a payload cannot be decoded as an SDO frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum SdoFrameError {
    /// SDO frames are always 8 bytes
    #[snafu(display("SDO frame has {len} bytes, expected 8"))]
    WrongLength {
        /// Length of the received payload
        len: usize,
    },
    /// The command specifier is not one supported by this crate
    #[snafu(display("Invalid command specifier {value}"))]
    InvalidCommand {
        /// The raw 3-bit command specifier
        value: u8,
    },
}

impl SdoFrameError {
    /// The abort code a server should answer this frame with
    pub fn abort_code(&self) -> AbortCode {
        match self {
            SdoFrameError::WrongLength { .. } => AbortCode::DataTypeMismatchLengthLow,
            SdoFrameError::InvalidCommand { .. } => AbortCode::InvalidCommandSpecifier,
        }
    }
}

fn check_len(value: &[u8]) -> Result<(), SdoFrameError> {
    if value.len() != 8 {
        WrongLengthSnafu { len: value.len() }.fail()
    } else {
        Ok(())
    }
}

fn write_multiplexer(payload: &mut [u8; 8], index: u16, sub: u8) {
    payload[1..3].copy_from_slice(&index.to_le_bytes());
    payload[3] = sub;
}

fn read_multiplexer(value: &[u8]) -> (u16, u8) {
    (u16::from_le_bytes([value[1], value[2]]), value[3])
}

fn read_u32(value: &[u8]) -> u32 {
    u32::from_le_bytes([value[4], value[5], value[6], value[7]])
}

fn read_data<const N: usize>(value: &[u8], start: usize) -> [u8; N] {
    let mut data = [0u8; N];
    data.copy_from_slice(&value[start..start + N]);
    data
}

/// An SDO request, sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoRequest {
    /// Start a download (write)
    InitiateDownload {
        /// Number of unused bytes in data
        n: u8,
        /// Expedited
        e: bool,
        /// size valid
        s: bool,
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// data (value on expedited, size when e=0 and s=1)
        data: [u8; 4],
    },
    /// A segment of a segmented download
    DownloadSegment {
        /// Toggle flag
        t: bool,
        /// Number of unused bytes in data
        n: u8,
        /// When set, indicates there are no more segments to be sent
        c: bool,
        /// Segment data
        data: [u8; 7],
    },
    /// Start an upload (read)
    InitiateUpload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// Request the next segment of a segmented upload
    ReqUploadSegment {
        /// Toggle flag
        t: bool,
    },
    /// Abort the transfer
    Abort {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// The reason for the abort
        abort_code: u32,
    },
}

impl SdoRequest {
    /// Create an abort request
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> Self {
        SdoRequest::Abort {
            index,
            sub,
            abort_code: abort_code.into(),
        }
    }

    /// Create a request to start a segmented download
    pub fn initiate_download(index: u16, sub: u8, size: Option<u32>) -> Self {
        SdoRequest::InitiateDownload {
            n: 0,
            e: false,
            s: size.is_some(),
            index,
            sub,
            data: size.unwrap_or(0).to_le_bytes(),
        }
    }

    /// Create one download segment of up to 7 bytes
    ///
    /// # Panics
    ///
    /// Panics if `segment_data` is longer than 7 bytes
    pub fn download_segment(toggle: bool, last_segment: bool, segment_data: &[u8]) -> Self {
        let mut data = [0; 7];
        data[0..segment_data.len()].copy_from_slice(segment_data);
        SdoRequest::DownloadSegment {
            t: toggle,
            n: 7 - segment_data.len() as u8,
            c: last_segment,
            data,
        }
    }

    /// Create an expedited download of up to 4 bytes
    ///
    /// # Panics
    ///
    /// Panics if `data` is empty or longer than 4 bytes
    pub fn expedited_download(index: u16, sub: u8, data: &[u8]) -> Self {
        assert!(
            !data.is_empty() && data.len() <= 4,
            "expedited download requires 1 to 4 bytes"
        );
        let mut msg_data = [0; 4];
        msg_data[0..data.len()].copy_from_slice(data);

        SdoRequest::InitiateDownload {
            n: (4 - data.len()) as u8,
            e: true,
            s: true,
            index,
            sub,
            data: msg_data,
        }
    }

    /// Create a request to start an upload
    pub fn initiate_upload(index: u16, sub: u8) -> Self {
        SdoRequest::InitiateUpload { index, sub }
    }

    /// Create a request for the next upload segment
    pub fn upload_segment_request(toggle: bool) -> Self {
        SdoRequest::ReqUploadSegment { t: toggle }
    }

    /// Encode the 8 byte payload
    pub fn to_payload(&self) -> [u8; 8] {
        let mut payload = [0u8; 8];

        match *self {
            SdoRequest::InitiateDownload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                payload[0] = u8::from(ClientCommand::InitiateDownload) << 5
                    | ((n & 0x3) << 2)
                    | ((e as u8) << 1)
                    | s as u8;
                write_multiplexer(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&data);
            }
            SdoRequest::DownloadSegment { t, n, c, data } => {
                payload[0] = u8::from(ClientCommand::DownloadSegment) << 5
                    | (t as u8) << 4
                    | (n & 7) << 1
                    | (c as u8);
                payload[1..8].copy_from_slice(&data);
            }
            SdoRequest::InitiateUpload { index, sub } => {
                payload[0] = u8::from(ClientCommand::InitiateUpload) << 5;
                write_multiplexer(&mut payload, index, sub);
            }
            SdoRequest::ReqUploadSegment { t } => {
                payload[0] = u8::from(ClientCommand::ReqUploadSegment) << 5 | (t as u8) << 4;
            }
            SdoRequest::Abort {
                index,
                sub,
                abort_code,
            } => {
                payload[0] = u8::from(ClientCommand::Abort) << 5;
                write_multiplexer(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&abort_code.to_le_bytes());
            }
        }
        payload
    }

    /// Build a CAN frame for this request
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        CanMessage::new(id, &self.to_payload())
    }
}

impl TryFrom<&[u8]> for SdoRequest {
    type Error = SdoFrameError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_len(value)?;
        let ccs = value[0] >> 5;
        let ccs =
            ClientCommand::try_from(ccs).map_err(|value| SdoFrameError::InvalidCommand { value })?;

        match ccs {
            ClientCommand::DownloadSegment => {
                let t = (value[0] & (1 << 4)) != 0;
                let n = (value[0] >> 1) & 0x7;
                let c = (value[0] & (1 << 0)) != 0;
                let data = read_data(value, 1);
                Ok(SdoRequest::DownloadSegment { t, n, c, data })
            }
            ClientCommand::InitiateDownload => {
                let n = (value[0] >> 2) & 0x3;
                let e = (value[0] & (1 << 1)) != 0;
                let s = (value[0] & (1 << 0)) != 0;
                let (index, sub) = read_multiplexer(value);
                let data = read_data(value, 4);
                Ok(SdoRequest::InitiateDownload {
                    n,
                    e,
                    s,
                    index,
                    sub,
                    data,
                })
            }
            ClientCommand::InitiateUpload => {
                let (index, sub) = read_multiplexer(value);
                Ok(SdoRequest::InitiateUpload { index, sub })
            }
            ClientCommand::ReqUploadSegment => {
                let t = ((value[0] >> 4) & 1) != 0;
                Ok(SdoRequest::ReqUploadSegment { t })
            }
            ClientCommand::Abort => {
                let (index, sub) = read_multiplexer(value);
                let abort_code = read_u32(value);
                Ok(SdoRequest::Abort {
                    index,
                    sub,
                    abort_code,
                })
            }
        }
    }
}

/// An SDO response, sent by the server
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SdoResponse {
    /// Response to an initiate upload
    ConfirmUpload {
        /// Number of unused bytes in data
        n: u8,
        /// Expedited flag
        e: bool,
        /// size flag
        s: bool,
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Value if e=1, or size if s=1
        data: [u8; 4],
    },
    /// One segment of a segmented upload
    UploadSegment {
        /// Toggle flag
        t: bool,
        /// Number of unused bytes in data
        n: u8,
        /// Set on the last segment
        c: bool,
        /// Segment data
        data: [u8; 7],
    },
    /// Acknowledge an initiate download
    ConfirmDownload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// Acknowledge a download segment
    ConfirmDownloadSegment {
        /// Toggle flag, echoing the received segment
        t: bool,
    },
    /// Abort the transfer
    Abort {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// The reason for the abort
        abort_code: u32,
    },
}

impl TryFrom<&[u8]> for SdoResponse {
    type Error = SdoFrameError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_len(value)?;
        let scs = value[0] >> 5;
        let command =
            ServerCommand::try_from(scs).map_err(|value| SdoFrameError::InvalidCommand { value })?;
        match command {
            ServerCommand::SegmentUpload => {
                let t = (value[0] & (1 << 4)) != 0;
                let n = (value[0] >> 1) & 7;
                let c = (value[0] & (1 << 0)) != 0;
                let data = read_data(value, 1);
                Ok(SdoResponse::UploadSegment { t, n, c, data })
            }
            ServerCommand::SegmentDownload => {
                let t = (value[0] & (1 << 4)) != 0;
                Ok(SdoResponse::ConfirmDownloadSegment { t })
            }
            ServerCommand::Upload => {
                let n = (value[0] >> 2) & 0x3;
                let e = (value[0] & (1 << 1)) != 0;
                let s = (value[0] & (1 << 0)) != 0;
                let (index, sub) = read_multiplexer(value);
                let data = read_data(value, 4);
                Ok(SdoResponse::ConfirmUpload {
                    n,
                    e,
                    s,
                    index,
                    sub,
                    data,
                })
            }
            ServerCommand::Download => {
                let (index, sub) = read_multiplexer(value);
                Ok(SdoResponse::ConfirmDownload { index, sub })
            }
            ServerCommand::Abort => {
                let (index, sub) = read_multiplexer(value);
                let abort_code = read_u32(value);
                Ok(SdoResponse::Abort {
                    index,
                    sub,
                    abort_code,
                })
            }
        }
    }
}

impl TryFrom<CanMessage> for SdoResponse {
    type Error = SdoFrameError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        SdoResponse::try_from(msg.data())
    }
}

impl SdoResponse {
    /// Create an expedited upload response carrying up to 4 bytes
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than 4 bytes
    pub fn expedited_upload(index: u16, sub: u8, data: &[u8]) -> SdoResponse {
        assert!(
            data.len() <= 4,
            "Cannot create expedited upload with more than 4 bytes"
        );

        let mut msg_data = [0; 4];
        msg_data[0..data.len()].copy_from_slice(data);

        SdoResponse::ConfirmUpload {
            index,
            sub,
            e: true,
            s: true,
            n: 4 - data.len() as u8,
            data: msg_data,
        }
    }

    /// Create the response to an initiate upload which starts a segmented transfer
    pub fn upload_acknowledge(index: u16, sub: u8, size: u32) -> SdoResponse {
        SdoResponse::ConfirmUpload {
            n: 0,
            e: false,
            s: true,
            index,
            sub,
            data: size.to_le_bytes(),
        }
    }

    /// Create one upload segment of up to 7 bytes
    pub fn upload_segment(t: bool, c: bool, data: &[u8]) -> SdoResponse {
        let n = (7 - data.len()) as u8;
        let mut buf = [0; 7];
        buf[0..data.len()].copy_from_slice(data);
        SdoResponse::UploadSegment { t, n, c, data: buf }
    }

    /// Acknowledge an initiate download
    pub fn download_acknowledge(index: u16, sub: u8) -> SdoResponse {
        SdoResponse::ConfirmDownload { index, sub }
    }

    /// Acknowledge a download segment
    pub fn download_segment_acknowledge(t: bool) -> SdoResponse {
        SdoResponse::ConfirmDownloadSegment { t }
    }

    /// Create an abort response
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> SdoResponse {
        SdoResponse::Abort {
            index,
            sub,
            abort_code: abort_code.into(),
        }
    }

    /// Encode the 8 byte payload
    pub fn to_payload(&self) -> [u8; 8] {
        let mut payload = [0; 8];

        match *self {
            SdoResponse::ConfirmUpload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                payload[0] = u8::from(ServerCommand::Upload) << 5
                    | ((n & 0x3) << 2)
                    | ((e as u8) << 1)
                    | (s as u8);
                write_multiplexer(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&data);
            }
            SdoResponse::ConfirmDownload { index, sub } => {
                payload[0] = u8::from(ServerCommand::Download) << 5;
                write_multiplexer(&mut payload, index, sub);
            }
            SdoResponse::UploadSegment { t, n, c, data } => {
                payload[0] = u8::from(ServerCommand::SegmentUpload) << 5
                    | (t as u8) << 4
                    | (n & 7) << 1
                    | c as u8;
                payload[1..8].copy_from_slice(&data);
            }
            SdoResponse::Abort {
                index,
                sub,
                abort_code,
            } => {
                payload[0] = u8::from(ServerCommand::Abort) << 5;
                write_multiplexer(&mut payload, index, sub);
                payload[4..8].copy_from_slice(&abort_code.to_le_bytes());
            }
            SdoResponse::ConfirmDownloadSegment { t } => {
                payload[0] = u8::from(ServerCommand::SegmentDownload) << 5 | (t as u8) << 4;
            }
        }
        payload
    }

    /// Build a CAN frame for this response
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        CanMessage::new(id, &self.to_payload())
    }
}
