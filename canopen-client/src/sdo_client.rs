//! Non-blocking SDO client
//!
//! The client is a state machine driven by two inputs: response frames, passed to
//! [`SdoClient::handle_response`], and the passage of time, checked by [`SdoClient::process`].
//! Neither ever waits. Each finished transfer produces exactly one [`SdoCompletion`].
use canopen_common::{
    messages::{SDO_REQ_BASE, SDO_RESP_BASE},
    objects::DataType,
    sdo::{AbortCode, RawAbortCode, SdoRequest, SdoResponse},
    value::ValueError,
    CanId, CanMessage, Timer, Value,
};
use log::{debug, warn};
use snafu::Snafu;

/// Default time to wait for each response from the server
pub const DEFAULT_SDO_CLIENT_TIMEOUT_US: u64 = 1_000_000;

/// Errors reported for an SDO transfer
#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum SdoClientError {
    /// The server did not respond in time
    Timeout,
    /// A transfer to this server is already in progress
    Busy,
    /// The server sent a response which does not fit the transfer
    #[snafu(display("Protocol violation: {reason}"))]
    ProtocolViolation {
        /// What went wrong
        reason: &'static str,
    },
    /// The server aborted the transfer
    #[snafu(display("Server aborted transfer: {abort_code}"))]
    PeerAborted {
        /// The abort code sent by the server
        abort_code: RawAbortCode,
    },
    /// The uploaded bytes cannot be decoded as the requested type
    #[snafu(display("Failed to decode uploaded value: {source}"))]
    Decode {
        /// The decode error
        source: ValueError,
    },
}

/// The state of an [`SdoClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoClientState {
    /// No transfer has been started
    Idle,
    /// An initiate request was sent and its response is pending
    AwaitingResponse,
    /// A segment was requested or sent and its response is pending
    AwaitingNextSegment,
    /// The last transfer completed successfully
    Complete,
    /// The last transfer was aborted, by either side or by timeout
    Aborted,
}

/// The successful result of a transfer
#[derive(Debug, Clone, PartialEq)]
pub enum SdoOutcome {
    /// The value was written
    Downloaded,
    /// The value was read
    Uploaded(Value),
}

/// Reports the end of a transfer
#[derive(Debug, Clone, PartialEq)]
pub struct SdoCompletion {
    /// The object index of the transfer
    pub index: u16,
    /// The sub index of the transfer
    pub sub: u8,
    /// The result
    pub result: Result<SdoOutcome, SdoClientError>,
}

#[derive(Debug)]
enum Transfer {
    Upload {
        data_type: Option<DataType>,
        buffer: Vec<u8>,
        size: Option<usize>,
    },
    ExpeditedDownload,
    SegmentedDownload {
        data: Vec<u8>,
        offset: usize,
    },
}

#[derive(Debug)]
struct Transaction {
    index: u16,
    sub: u8,
    toggle: bool,
    transfer: Transfer,
    timer: Timer,
}

/// An SDO client for one server
#[derive(Debug)]
pub struct SdoClient {
    req_cob_id: CanId,
    resp_cob_id: CanId,
    timeout_us: u64,
    state: SdoClientState,
    transaction: Option<Transaction>,
}

impl SdoClient {
    /// Create a client using the default COB-IDs of `server_node_id`
    pub fn new_std(server_node_id: u8, timeout_us: u64) -> Self {
        Self::with_cob_ids(
            CanId::Std(SDO_REQ_BASE + server_node_id as u16),
            CanId::Std(SDO_RESP_BASE + server_node_id as u16),
            timeout_us,
        )
    }

    /// Create a client with explicit request and response COB-IDs
    pub fn with_cob_ids(req_cob_id: CanId, resp_cob_id: CanId, timeout_us: u64) -> Self {
        Self {
            req_cob_id,
            resp_cob_id,
            timeout_us,
            state: SdoClientState::Idle,
            transaction: None,
        }
    }

    /// The current state
    pub fn state(&self) -> SdoClientState {
        self.state
    }

    /// True while a transfer is outstanding
    pub fn is_busy(&self) -> bool {
        self.transaction.is_some()
    }

    /// The ID responses are expected on
    pub fn resp_cob_id(&self) -> CanId {
        self.resp_cob_id
    }

    /// The ID requests are sent on
    pub fn req_cob_id(&self) -> CanId {
        self.req_cob_id
    }

    /// The time at which the outstanding transfer times out
    pub fn deadline_us(&self) -> Option<u64> {
        self.transaction.as_ref().and_then(|t| t.timer.deadline())
    }

    fn begin(
        &mut self,
        index: u16,
        sub: u8,
        transfer: Transfer,
        request: SdoRequest,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), SdoClientError> {
        if self.is_busy() {
            return BusySnafu.fail();
        }
        let mut timer = Timer::new();
        timer.start(now_us, self.timeout_us);
        self.transaction = Some(Transaction {
            index,
            sub,
            toggle: false,
            transfer,
            timer,
        });
        self.state = SdoClientState::AwaitingResponse;
        send(request.to_can_message(self.req_cob_id));
        Ok(())
    }

    /// Start reading a sub object
    ///
    /// The uploaded bytes are decoded as `data_type`, or returned as an octet string if no type
    /// is given. Fails with `Busy` if a transfer is outstanding.
    pub fn upload(
        &mut self,
        index: u16,
        sub: u8,
        data_type: Option<DataType>,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), SdoClientError> {
        let transfer = Transfer::Upload {
            data_type,
            buffer: Vec::new(),
            size: None,
        };
        let request = SdoRequest::initiate_upload(index, sub);
        self.begin(index, sub, transfer, request, now_us, send)
    }

    /// Start writing a sub object
    ///
    /// Data of 1 to 4 bytes is sent expedited, anything else is segmented. Fails with `Busy` if a
    /// transfer is outstanding.
    pub fn download(
        &mut self,
        index: u16,
        sub: u8,
        data: &[u8],
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), SdoClientError> {
        let (transfer, request) = if !data.is_empty() && data.len() <= 4 {
            (
                Transfer::ExpeditedDownload,
                SdoRequest::expedited_download(index, sub, data),
            )
        } else {
            (
                Transfer::SegmentedDownload {
                    data: data.to_vec(),
                    offset: 0,
                },
                SdoRequest::initiate_download(index, sub, Some(data.len() as u32)),
            )
        };
        self.begin(index, sub, transfer, request, now_us, send)
    }

    /// Check for a timeout
    ///
    /// On timeout, an abort is sent to the server and the transfer completes with `Timeout`.
    pub fn process(
        &mut self,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Option<SdoCompletion> {
        let tx = self.transaction.as_mut()?;
        if !tx.timer.take_expired(now_us) {
            return None;
        }
        warn!(
            "SDO transfer 0x{:04X}sub{} on {} timed out",
            tx.index, tx.sub, self.req_cob_id
        );
        let abort = SdoRequest::abort(tx.index, tx.sub, AbortCode::SdoTimeout);
        send(abort.to_can_message(self.req_cob_id));
        self.finish(Err(SdoClientError::Timeout))
    }

    fn finish(&mut self, result: Result<SdoOutcome, SdoClientError>) -> Option<SdoCompletion> {
        let mut tx = self.transaction.take()?;
        tx.timer.cancel();
        self.state = if result.is_ok() {
            SdoClientState::Complete
        } else {
            SdoClientState::Aborted
        };
        Some(SdoCompletion {
            index: tx.index,
            sub: tx.sub,
            result,
        })
    }

    fn violation(
        &mut self,
        reason: &'static str,
        abort_code: AbortCode,
        send: &mut dyn FnMut(CanMessage),
    ) -> Option<SdoCompletion> {
        let tx = self.transaction.as_ref()?;
        send(SdoRequest::abort(tx.index, tx.sub, abort_code).to_can_message(self.req_cob_id));
        self.finish(Err(SdoClientError::ProtocolViolation { reason }))
    }

    /// Handle a frame from the bus
    ///
    /// Frames not on this client's response ID, or arriving while no transfer is outstanding,
    /// are ignored. Returns the completion if the frame finished the transfer.
    pub fn handle_response(
        &mut self,
        msg: &CanMessage,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Option<SdoCompletion> {
        if msg.id() != self.resp_cob_id {
            return None;
        }
        if self.transaction.is_none() {
            debug!("Ignoring SDO response on {} with no transfer open", msg.id());
            return None;
        }
        let resp = match SdoResponse::try_from(msg.data()) {
            Ok(resp) => resp,
            Err(_) => {
                return self.violation(
                    "malformed response",
                    AbortCode::InvalidCommandSpecifier,
                    send,
                )
            }
        };
        if let SdoResponse::Abort { abort_code, .. } = resp {
            return self.finish(Err(SdoClientError::PeerAborted {
                abort_code: abort_code.into(),
            }));
        }

        match self.state {
            SdoClientState::AwaitingResponse => self.handle_initiate_response(resp, now_us, send),
            SdoClientState::AwaitingNextSegment => self.handle_segment_response(resp, now_us, send),
            _ => None,
        }
    }

    fn handle_initiate_response(
        &mut self,
        resp: SdoResponse,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Option<SdoCompletion> {
        let timeout_us = self.timeout_us;
        let req_cob_id = self.req_cob_id;
        let tx = self.transaction.as_mut()?;

        match (&mut tx.transfer, resp) {
            (
                Transfer::Upload {
                    data_type,
                    buffer,
                    size,
                },
                SdoResponse::ConfirmUpload {
                    n,
                    e,
                    s,
                    index,
                    sub,
                    data,
                },
            ) if index == tx.index && sub == tx.sub => {
                if e {
                    let len = if s {
                        4 - (n as usize).min(4)
                    } else {
                        // Without a size, trust the declared width where there is one
                        data_type.and_then(|dt| dt.fixed_size()).unwrap_or(4).min(4)
                    };
                    let result = decode(*data_type, &data[..len]);
                    self.finish(result)
                } else {
                    *size = s.then(|| u32::from_le_bytes(data) as usize);
                    buffer.clear();
                    tx.toggle = false;
                    tx.timer.start(now_us, timeout_us);
                    self.state = SdoClientState::AwaitingNextSegment;
                    send(SdoRequest::upload_segment_request(false).to_can_message(req_cob_id));
                    None
                }
            }
            (Transfer::ExpeditedDownload, SdoResponse::ConfirmDownload { index, sub })
                if index == tx.index && sub == tx.sub =>
            {
                self.finish(Ok(SdoOutcome::Downloaded))
            }
            (Transfer::SegmentedDownload { .. }, SdoResponse::ConfirmDownload { index, sub })
                if index == tx.index && sub == tx.sub =>
            {
                tx.toggle = false;
                self.state = SdoClientState::AwaitingNextSegment;
                self.send_next_segment(now_us, send);
                None
            }
            _ => self.violation(
                "unexpected response to initiate",
                AbortCode::InvalidCommandSpecifier,
                send,
            ),
        }
    }

    fn send_next_segment(&mut self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        let timeout_us = self.timeout_us;
        let req_cob_id = self.req_cob_id;
        let Some(tx) = self.transaction.as_mut() else {
            return;
        };
        if let Transfer::SegmentedDownload { data, offset } = &mut tx.transfer {
            let end = (*offset + 7).min(data.len());
            let last = end == data.len();
            let request = SdoRequest::download_segment(tx.toggle, last, &data[*offset..end]);
            *offset = end;
            tx.timer.start(now_us, timeout_us);
            send(request.to_can_message(req_cob_id));
        }
    }

    fn handle_segment_response(
        &mut self,
        resp: SdoResponse,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Option<SdoCompletion> {
        let timeout_us = self.timeout_us;
        let req_cob_id = self.req_cob_id;
        let tx = self.transaction.as_mut()?;

        match (&mut tx.transfer, resp) {
            (
                Transfer::Upload {
                    data_type,
                    buffer,
                    size,
                },
                SdoResponse::UploadSegment { t, n, c, data },
            ) => {
                if t != tx.toggle {
                    return self.violation(
                        "toggle bit not alternated",
                        AbortCode::ToggleNotAlternated,
                        send,
                    );
                }
                buffer.extend_from_slice(&data[..7 - (n as usize).min(7)]);
                if c {
                    if size.is_some_and(|size| size != buffer.len()) {
                        return self.violation(
                            "uploaded length differs from indicated size",
                            AbortCode::GeneralError,
                            send,
                        );
                    }
                    let result = decode(*data_type, buffer);
                    self.finish(result)
                } else {
                    tx.toggle = !tx.toggle;
                    tx.timer.start(now_us, timeout_us);
                    send(SdoRequest::upload_segment_request(tx.toggle).to_can_message(req_cob_id));
                    None
                }
            }
            (
                Transfer::SegmentedDownload { data, offset },
                SdoResponse::ConfirmDownloadSegment { t },
            ) => {
                if t != tx.toggle {
                    return self.violation(
                        "toggle bit not alternated",
                        AbortCode::ToggleNotAlternated,
                        send,
                    );
                }
                if *offset >= data.len() {
                    self.finish(Ok(SdoOutcome::Downloaded))
                } else {
                    tx.toggle = !tx.toggle;
                    self.send_next_segment(now_us, send);
                    None
                }
            }
            _ => self.violation(
                "unexpected response to segment",
                AbortCode::InvalidCommandSpecifier,
                send,
            ),
        }
    }
}

fn decode(data_type: Option<DataType>, bytes: &[u8]) -> Result<SdoOutcome, SdoClientError> {
    match data_type {
        Some(dt) => Value::from_bytes(dt, bytes)
            .map(SdoOutcome::Uploaded)
            .map_err(|source| SdoClientError::Decode { source }),
        None => Ok(SdoOutcome::Uploaded(Value::OctetString(bytes.to_vec()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQ: CanId = CanId::Std(0x605);
    const RESP: CanId = CanId::Std(0x585);

    fn respond(
        client: &mut SdoClient,
        resp: SdoResponse,
        sent: &mut Vec<CanMessage>,
    ) -> Option<SdoCompletion> {
        client.handle_response(&resp.to_can_message(RESP), 0, &mut |m| sent.push(m))
    }

    fn last_request(sent: &[CanMessage]) -> SdoRequest {
        let msg = sent.last().unwrap();
        assert_eq!(REQ, msg.id());
        SdoRequest::try_from(msg.data()).unwrap()
    }

    #[test]
    fn test_expedited_upload() {
        let mut client = SdoClient::new_std(5, 1000);
        let mut sent = Vec::new();
        client
            .upload(0x2000, 1, Some(DataType::UInt16), 0, &mut |m| sent.push(m))
            .unwrap();
        assert_eq!(SdoRequest::initiate_upload(0x2000, 1), last_request(&sent));
        assert_eq!(SdoClientState::AwaitingResponse, client.state());

        let done = respond(
            &mut client,
            SdoResponse::expedited_upload(0x2000, 1, &[0x34, 0x12]),
            &mut sent,
        )
        .unwrap();
        assert_eq!(Ok(SdoOutcome::Uploaded(Value::UInt16(0x1234))), done.result);
        assert_eq!(SdoClientState::Complete, client.state());
        assert!(!client.is_busy());
    }

    #[test]
    fn test_segmented_download() {
        let mut client = SdoClient::new_std(5, 1000);
        let mut sent = Vec::new();
        let data: Vec<u8> = (0..20).collect();
        client
            .download(0x2001, 0, &data, 0, &mut |m| sent.push(m))
            .unwrap();
        assert_eq!(
            SdoRequest::initiate_download(0x2001, 0, Some(20)),
            last_request(&sent)
        );

        assert!(respond(
            &mut client,
            SdoResponse::download_acknowledge(0x2001, 0),
            &mut sent
        )
        .is_none());

        let mut received = Vec::new();
        let mut expected_toggle = false;
        loop {
            let SdoRequest::DownloadSegment { t, n, c, data } = last_request(&sent) else {
                panic!("Expected download segment");
            };
            assert_eq!(expected_toggle, t);
            received.extend_from_slice(&data[..7 - n as usize]);
            let done = respond(
                &mut client,
                SdoResponse::download_segment_acknowledge(t),
                &mut sent,
            );
            if c {
                assert_eq!(Ok(SdoOutcome::Downloaded), done.unwrap().result);
                break;
            }
            assert!(done.is_none());
            expected_toggle = !expected_toggle;
        }
        assert_eq!(data, received);
        // 1 initiate + 3 segments
        assert_eq!(4, sent.len());
    }

    #[test]
    fn test_busy_then_timeout_frees_slot() {
        let mut client = SdoClient::new_std(5, 1000);
        let mut sent = Vec::new();
        client.upload(0x2000, 0, None, 0, &mut |m| sent.push(m)).unwrap();
        assert_eq!(
            Err(SdoClientError::Busy),
            client.upload(0x2001, 0, None, 10, &mut |m| sent.push(m))
        );

        assert!(client.process(999, &mut |m| sent.push(m)).is_none());
        let done = client.process(1000, &mut |m| sent.push(m)).unwrap();
        assert_eq!(Err(SdoClientError::Timeout), done.result);
        assert_eq!(SdoClientState::Aborted, client.state());
        assert_eq!(
            SdoRequest::abort(0x2000, 0, AbortCode::SdoTimeout),
            last_request(&sent)
        );
        // Completion is only reported once
        assert!(client.process(2000, &mut |m| sent.push(m)).is_none());

        client.upload(0x2001, 0, None, 2000, &mut |m| sent.push(m)).unwrap();
        assert!(client.is_busy());
    }

    #[test]
    fn test_peer_abort() {
        let mut client = SdoClient::new_std(5, 1000);
        let mut sent = Vec::new();
        client
            .download(0x2000, 0, &[1], 0, &mut |m| sent.push(m))
            .unwrap();
        let done = respond(
            &mut client,
            SdoResponse::Abort {
                index: 0x2000,
                sub: 0,
                abort_code: 0x1234_5678,
            },
            &mut sent,
        )
        .unwrap();
        assert_eq!(
            Err(SdoClientError::PeerAborted {
                abort_code: RawAbortCode::Unknown(0x1234_5678)
            }),
            done.result
        );
        // No abort is sent back
        assert_eq!(1, sent.len());
    }

    #[test]
    fn test_toggle_violation() {
        let mut client = SdoClient::new_std(5, 1000);
        let mut sent = Vec::new();
        client.upload(0x2000, 0, None, 0, &mut |m| sent.push(m)).unwrap();
        respond(
            &mut client,
            SdoResponse::upload_acknowledge(0x2000, 0, 10),
            &mut sent,
        );
        let done = respond(
            &mut client,
            SdoResponse::upload_segment(true, false, &[1, 2, 3, 4, 5, 6, 7]),
            &mut sent,
        )
        .unwrap();
        assert!(matches!(
            done.result,
            Err(SdoClientError::ProtocolViolation { .. })
        ));
        assert_eq!(
            SdoRequest::abort(0x2000, 0, AbortCode::ToggleNotAlternated),
            last_request(&sent)
        );
    }

    #[test]
    fn test_stray_response_ignored() {
        let mut client = SdoClient::new_std(5, 1000);
        let mut sent = Vec::new();
        assert!(respond(
            &mut client,
            SdoResponse::download_acknowledge(0x2000, 0),
            &mut sent
        )
        .is_none());
        assert_eq!(SdoClientState::Idle, client.state());
        assert!(sent.is_empty());
    }
}
