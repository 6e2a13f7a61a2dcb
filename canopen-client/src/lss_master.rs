//! LSS master, used to assign node IDs to unconfigured devices
//!
//! Like the other client engines, the master never waits for a response. A request is sent and
//! remembered; the matching response is fed in through [`LssMaster::handle_message`], and
//! [`LssMaster::process`] reports a timeout if none arrives.
use canopen_common::{
    lss::{LssIdentity, LssMode, LssRequest, LssResponse},
    messages::LSS_RESP_ID,
    CanMessage, NodeId, Timer,
};
use log::{debug, warn};
use snafu::Snafu;

/// Default time to wait for an LSS response
pub const DEFAULT_LSS_TIMEOUT_US: u64 = 50_000;

/// Error returned by [`LssMaster`]
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum LssError {
    /// Timed out while waiting for an expected LSS response
    #[snafu(display("Timed out waiting for LSS response"))]
    Timeout,
    /// A request is already waiting for its response
    #[snafu(display("An LSS request is already in progress"))]
    Busy,
    /// The LSS slave returned an error code in response to a ConfigNodeId command
    #[snafu(display(
        "LSS slave returned an error in response to ConfigNodeId command. error: {}, Spec error: {}",
        error,
        spec_error
    ))]
    NodeIdConfigError {
        /// Error code
        ///
        /// 1 - Node address is invalid
        /// 255 - Special error code in spec_error
        error: u8,
        /// Manufacturer specific error code
        spec_error: u8,
    },
    /// The LSS slave returned an error code in response to a StoreConfiguration command
    #[snafu(display(
        "LSS slave returned an error in response to StoreConfiguration. error: {}, Spec error: {}",
        error,
        spec_error
    ))]
    NodeStoreConfigError {
        /// Error code
        ///
        /// 1 - Node does not support storing configuration
        error: u8,
        /// Manufacturer specific error code
        spec_error: u8,
    },
}

/// Completion of an LSS request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LssEvent {
    /// The addressed slave confirmed the selective switch and is in configuration mode
    SwitchedSelective,
    /// The slave accepted the pending node ID
    NodeIdConfigured {
        /// The configured ID
        node_id: u8,
    },
    /// The slave stored its configuration
    ConfigurationStored,
    /// The slave reported its active node ID
    NodeIdInquired {
        /// The reported ID
        node_id: u8,
    },
    /// The request failed
    Failed(LssError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    SwitchSelective,
    ConfigureNodeId { node_id: u8 },
    StoreConfiguration,
    InquireNodeId,
}

/// Non-blocking LSS master
#[derive(Debug)]
pub struct LssMaster {
    timeout_us: u64,
    pending: Option<Pending>,
    timer: Timer,
}

impl Default for LssMaster {
    fn default() -> Self {
        Self::new(DEFAULT_LSS_TIMEOUT_US)
    }
}

impl LssMaster {
    /// Create a master waiting at most `timeout_us` for each response
    pub fn new(timeout_us: u64) -> Self {
        Self {
            timeout_us,
            pending: None,
            timer: Timer::new(),
        }
    }

    /// True while a request is waiting for its response
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Deadline of the outstanding request
    pub fn deadline_us(&self) -> Option<u64> {
        self.timer.deadline()
    }

    fn begin(
        &mut self,
        pending: Pending,
        requests: &[LssRequest],
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), LssError> {
        if self.pending.is_some() {
            return BusySnafu.fail();
        }
        for req in requests {
            send((*req).into());
        }
        self.pending = Some(pending);
        self.timer.start(now_us, self.timeout_us);
        Ok(())
    }

    /// Put every slave on the bus into `mode`
    ///
    /// No response is expected.
    pub fn switch_mode_global(&mut self, mode: LssMode, send: &mut dyn FnMut(CanMessage)) {
        send(LssRequest::SwitchModeGlobal { mode }.into());
    }

    /// Put the slave with `identity` into configuration mode
    pub fn switch_selective(
        &mut self,
        identity: &LssIdentity,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), LssError> {
        self.begin(
            Pending::SwitchSelective,
            &LssRequest::switch_selective(identity),
            now_us,
            send,
        )
    }

    /// Set the pending node ID of the slave in configuration mode
    pub fn configure_node_id(
        &mut self,
        node_id: NodeId,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), LssError> {
        let node_id = node_id.raw();
        self.begin(
            Pending::ConfigureNodeId { node_id },
            &[LssRequest::ConfigureNodeId { node_id }],
            now_us,
            send,
        )
    }

    /// Ask the slave in configuration mode to persist its configuration
    pub fn store_configuration(
        &mut self,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), LssError> {
        self.begin(
            Pending::StoreConfiguration,
            &[LssRequest::StoreConfiguration],
            now_us,
            send,
        )
    }

    /// Ask the slave in configuration mode for its active node ID
    pub fn inquire_node_id(
        &mut self,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), LssError> {
        self.begin(
            Pending::InquireNodeId,
            &[LssRequest::InquireNodeId],
            now_us,
            send,
        )
    }

    /// Handle a frame received on the LSS response ID
    ///
    /// Returns an event when the frame completes the outstanding request. Other frames are
    /// ignored.
    pub fn handle_message(&mut self, msg: &CanMessage) -> Option<LssEvent> {
        if msg.id() != LSS_RESP_ID {
            return None;
        }
        let pending = self.pending?;
        let resp = match LssResponse::try_from(msg.data()) {
            Ok(resp) => resp,
            Err(_) => {
                debug!("Ignoring malformed LSS response {:?}", msg.data());
                return None;
            }
        };
        let event = match (pending, resp) {
            (Pending::SwitchSelective, LssResponse::SwitchStateResponse) => {
                LssEvent::SwitchedSelective
            }
            (
                Pending::ConfigureNodeId { node_id },
                LssResponse::ConfigureNodeIdAck { error, spec_error },
            ) => {
                if error == 0 {
                    LssEvent::NodeIdConfigured { node_id }
                } else {
                    LssEvent::Failed(LssError::NodeIdConfigError { error, spec_error })
                }
            }
            (
                Pending::StoreConfiguration,
                LssResponse::StoreConfigurationAck { error, spec_error },
            ) => {
                if error == 0 {
                    LssEvent::ConfigurationStored
                } else {
                    LssEvent::Failed(LssError::NodeStoreConfigError { error, spec_error })
                }
            }
            (Pending::InquireNodeId, LssResponse::InquireNodeIdAck { node_id }) => {
                LssEvent::NodeIdInquired { node_id }
            }
            _ => {
                debug!("Ignoring unexpected LSS response {:?}", resp);
                return None;
            }
        };
        self.pending = None;
        self.timer.cancel();
        Some(event)
    }

    /// Check for a response timeout
    pub fn process(&mut self, now_us: u64) -> Option<LssEvent> {
        if self.timer.take_expired(now_us) {
            warn!("LSS request {:?} timed out", self.pending);
            self.pending = None;
            return Some(LssEvent::Failed(LssError::Timeout));
        }
        None
    }
}
