//! SDO server
//!
//! Serves expedited and segmented uploads and downloads from an [`ObjectDictionary`]. Block
//! transfers are not supported and are answered with an abort.
use canopen_common::{
    objects::SubInfo,
    sdo::{AbortCode, SdoRequest, SdoResponse},
    Timer,
};
use defmt_or_log::{debug, warn};

use crate::object_dict::{AccessDirection, ObjectDictionary, OdError};

/// Default time to wait for the next segment before aborting a transfer, in microseconds
pub const DEFAULT_SDO_TIMEOUT_US: u64 = 1_000_000;

/// Largest segmented download the server will buffer
const MAX_DOWNLOAD_SIZE: usize = 0x1_0000;

fn validate_download_size(dl_size: usize, subobj: &SubInfo) -> Result<(), AbortCode> {
    if subobj.data_type.is_str() {
        // Strings take the length of whatever is written
        if dl_size > MAX_DOWNLOAD_SIZE {
            return Err(AbortCode::OutOfMemory);
        }
    } else if dl_size < subobj.size {
        return Err(AbortCode::DataTypeMismatchLengthLow);
    } else if dl_size > subobj.size {
        return Err(AbortCode::DataTypeMismatchLengthHigh);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Download {
    index: u16,
    sub: u8,
    toggle: bool,
    size: Option<usize>,
    buffer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
struct Upload {
    index: u16,
    sub: u8,
    toggle: bool,
    data: Vec<u8>,
    offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
enum SdoState {
    #[default]
    Idle,
    DownloadSegmented(Download),
    UploadSegmented(Upload),
}

impl SdoState {
    fn multiplexer(&self) -> (u16, u8) {
        match self {
            SdoState::Idle => (0, 0),
            SdoState::DownloadSegmented(d) => (d.index, d.sub),
            SdoState::UploadSegmented(u) => (u.index, u.sub),
        }
    }
}

struct SdoResult {
    response: Option<SdoResponse>,
    new_state: SdoState,
}

impl SdoResult {
    fn no_response(new_state: SdoState) -> Self {
        Self {
            response: None,
            new_state,
        }
    }

    fn abort(index: u16, sub: u8, abort_code: AbortCode) -> Self {
        Self {
            response: Some(SdoResponse::abort(index, sub, abort_code)),
            new_state: SdoState::Idle,
        }
    }

    fn response(response: SdoResponse, new_state: SdoState) -> Self {
        Self {
            response: Some(response),
            new_state,
        }
    }
}

fn od_abort(od: &ObjectDictionary, err: OdError, direction: AccessDirection) -> SdoResult {
    let (index, sub) = match err {
        OdError::AccessDenied { index, sub }
        | OdError::TypeMismatch { index, sub, .. }
        | OdError::NoSuchEntry { index, sub } => (index, sub),
    };
    SdoResult::abort(
        index,
        sub,
        err.abort_code(direction, od.contains_object(index)),
    )
}

/// The server side of one SDO channel
///
/// Only one transfer is open at a time. A new initiate request received mid-transfer discards
/// the open transfer and starts over.
#[derive(Debug)]
pub struct SdoServer {
    state: SdoState,
    timer: Timer,
    timeout_us: u64,
}

impl Default for SdoServer {
    fn default() -> Self {
        Self::new(DEFAULT_SDO_TIMEOUT_US)
    }
}

impl SdoServer {
    /// Create a server which aborts a segmented transfer after `timeout_us` of client silence
    pub fn new(timeout_us: u64) -> Self {
        Self {
            state: SdoState::Idle,
            timer: Timer::new(),
            timeout_us,
        }
    }

    /// True if no transfer is in progress
    pub fn is_idle(&self) -> bool {
        self.state == SdoState::Idle
    }

    /// Drop any transfer in progress without responding
    pub fn reset(&mut self) {
        self.state = SdoState::Idle;
        self.timer.cancel();
    }

    /// Handle one request frame payload, returning the response to send
    pub fn handle_request(
        &mut self,
        payload: &[u8],
        od: &mut ObjectDictionary,
        now_us: u64,
    ) -> Option<SdoResponse> {
        let req = match SdoRequest::try_from(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!(
                    "Invalid SDO request, command byte 0x{:x}",
                    payload.first().copied().unwrap_or(0)
                );
                let (index, sub) = self.state.multiplexer();
                self.reset();
                return Some(SdoResponse::abort(index, sub, e.abort_code()));
            }
        };

        let state = core::mem::take(&mut self.state);
        let result = match (state, req) {
            (_, SdoRequest::Abort { index, sub, abort_code }) => {
                debug!("SDO client aborted 0x{:x}sub{}: 0x{:x}", index, sub, abort_code);
                SdoResult::no_response(SdoState::Idle)
            }
            (
                _,
                req @ (SdoRequest::InitiateDownload { .. } | SdoRequest::InitiateUpload { .. }),
            ) => Self::initiate(od, req),
            (SdoState::DownloadSegmented(state), SdoRequest::DownloadSegment { t, n, c, data }) => {
                Self::download_segment(od, state, t, n, c, &data)
            }
            (SdoState::UploadSegmented(state), SdoRequest::ReqUploadSegment { t }) => {
                Self::upload_segment(state, t)
            }
            (state, _) => {
                let (index, sub) = state.multiplexer();
                SdoResult::abort(index, sub, AbortCode::InvalidCommandSpecifier)
            }
        };

        self.state = result.new_state;
        if self.state == SdoState::Idle {
            self.timer.cancel();
        } else {
            self.timer.start(now_us, self.timeout_us);
        }
        result.response
    }

    /// Check the transfer timeout, returning an abort to send if it expired
    pub fn process(&mut self, now_us: u64) -> Option<SdoResponse> {
        if self.timer.take_expired(now_us) {
            let (index, sub) = self.state.multiplexer();
            self.state = SdoState::Idle;
            warn!("SDO transfer of 0x{:x}sub{} timed out", index, sub);
            Some(SdoResponse::abort(index, sub, AbortCode::SdoTimeout))
        } else {
            None
        }
    }

    fn initiate(od: &mut ObjectDictionary, req: SdoRequest) -> SdoResult {
        match req {
            SdoRequest::InitiateDownload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                let subinfo = match od.sub_info(index, sub) {
                    Ok(info) => info,
                    Err(err) => return od_abort(od, err, AccessDirection::Download),
                };
                if !subinfo.access_type.is_writable() {
                    return SdoResult::abort(index, sub, AbortCode::ReadOnly);
                }

                if e {
                    // Without the size flag, the declared width of short types is used
                    let dl_size = if s {
                        4 - n as usize
                    } else if subinfo.size > 0 && subinfo.size < 4 {
                        subinfo.size
                    } else {
                        4
                    };
                    if let Err(abort_code) = validate_download_size(dl_size, &subinfo) {
                        return SdoResult::abort(index, sub, abort_code);
                    }
                    if let Err(err) = od.write_raw(index, sub, &data[0..dl_size]) {
                        return od_abort(od, err, AccessDirection::Download);
                    }
                    SdoResult::response(
                        SdoResponse::download_acknowledge(index, sub),
                        SdoState::Idle,
                    )
                } else {
                    let size = if s {
                        let dl_size = u32::from_le_bytes(data) as usize;
                        if let Err(abort_code) = validate_download_size(dl_size, &subinfo) {
                            return SdoResult::abort(index, sub, abort_code);
                        }
                        Some(dl_size)
                    } else {
                        None
                    };
                    SdoResult::response(
                        SdoResponse::download_acknowledge(index, sub),
                        SdoState::DownloadSegmented(Download {
                            index,
                            sub,
                            toggle: false,
                            size,
                            buffer: Vec::with_capacity(size.unwrap_or(0)),
                        }),
                    )
                }
            }
            SdoRequest::InitiateUpload { index, sub } => {
                let data = match od.read_raw(index, sub) {
                    Ok(data) => data.to_vec(),
                    Err(err) => return od_abort(od, err, AccessDirection::Upload),
                };
                if !data.is_empty() && data.len() <= 4 {
                    SdoResult::response(
                        SdoResponse::expedited_upload(index, sub, &data),
                        SdoState::Idle,
                    )
                } else {
                    // Empty strings cannot be expressed as an expedited transfer, so they are sent
                    // as a single empty segment.
                    SdoResult::response(
                        SdoResponse::upload_acknowledge(index, sub, data.len() as u32),
                        SdoState::UploadSegmented(Upload {
                            index,
                            sub,
                            toggle: false,
                            data,
                            offset: 0,
                        }),
                    )
                }
            }
            _ => SdoResult::abort(0, 0, AbortCode::InvalidCommandSpecifier),
        }
    }

    fn download_segment(
        od: &mut ObjectDictionary,
        mut state: Download,
        t: bool,
        n: u8,
        c: bool,
        data: &[u8; 7],
    ) -> SdoResult {
        if t != state.toggle {
            return SdoResult::abort(state.index, state.sub, AbortCode::ToggleNotAlternated);
        }
        let segment_size = 7 - (n as usize).min(7);
        state.buffer.extend_from_slice(&data[..segment_size]);
        if state.buffer.len() > state.size.unwrap_or(MAX_DOWNLOAD_SIZE) {
            return SdoResult::abort(
                state.index,
                state.sub,
                AbortCode::DataTypeMismatchLengthHigh,
            );
        }

        let ack = SdoResponse::download_segment_acknowledge(t);
        if !c {
            state.toggle = !state.toggle;
            return SdoResult::response(ack, SdoState::DownloadSegmented(state));
        }

        if let Some(size) = state.size {
            if state.buffer.len() < size {
                return SdoResult::abort(
                    state.index,
                    state.sub,
                    AbortCode::DataTypeMismatchLengthLow,
                );
            }
        }
        match od.write_raw(state.index, state.sub, &state.buffer) {
            Ok(()) => SdoResult::response(ack, SdoState::Idle),
            Err(err) => od_abort(od, err, AccessDirection::Download),
        }
    }

    fn upload_segment(mut state: Upload, t: bool) -> SdoResult {
        if t != state.toggle {
            return SdoResult::abort(state.index, state.sub, AbortCode::ToggleNotAlternated);
        }
        let end = (state.offset + 7).min(state.data.len());
        let c = end == state.data.len();
        let response = SdoResponse::upload_segment(t, c, &state.data[state.offset..end]);
        if c {
            SdoResult::response(response, SdoState::Idle)
        } else {
            state.offset = end;
            state.toggle = !state.toggle;
            SdoResult::response(response, SdoState::UploadSegmented(state))
        }
    }
}
