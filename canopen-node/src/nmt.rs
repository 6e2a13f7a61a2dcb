//! Local NMT state machine and heartbeat producer
use canopen_common::{
    messages::{Heartbeat, NmtCommandSpecifier, NmtState},
    CanMessage, NodeId, Timer,
};
use defmt_or_log::info;

/// The NMT slave of a local node
///
/// The node starts in `Initializing`. The next call to [`process`](Self::process) completes the
/// startup: the node enters `PreOperational` and sends its bootup message. Heartbeats are sent in
/// every state except `Initializing`.
#[derive(Debug)]
pub struct NmtSlave {
    node_id: NodeId,
    state: NmtState,
    heartbeat_period_ms: u16,
    heartbeat_timer: Timer,
}

impl NmtSlave {
    /// Create a state machine for `node_id`, producing a heartbeat every `heartbeat_period_ms`
    ///
    /// A period of 0 disables the heartbeat.
    pub fn new(node_id: NodeId, heartbeat_period_ms: u16) -> Self {
        Self {
            node_id,
            state: NmtState::Initializing,
            heartbeat_period_ms,
            heartbeat_timer: Timer::new(),
        }
    }

    /// The current NMT state
    pub fn state(&self) -> NmtState {
        self.state
    }

    /// The node ID used for the bootup and heartbeat messages
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The configured heartbeat period
    pub fn heartbeat_period_ms(&self) -> u16 {
        self.heartbeat_period_ms
    }

    /// Change the heartbeat period
    ///
    /// The new period takes effect from the next heartbeat.
    pub fn set_heartbeat_period_ms(&mut self, period_ms: u16) {
        if period_ms != self.heartbeat_period_ms {
            self.heartbeat_period_ms = period_ms;
            self.heartbeat_timer.cancel();
        }
    }

    /// Apply an NMT command, returning true if the state changed
    ///
    /// The reset commands only move the state machine back to `Initializing`; restoring the object
    /// dictionary and communication parameters is up to the owner.
    pub fn apply_command(&mut self, cmd: NmtCommandSpecifier) -> bool {
        let prev = self.state;
        self.state = match cmd {
            NmtCommandSpecifier::EnterOperational => NmtState::Operational,
            NmtCommandSpecifier::EnterStopped => NmtState::Stopped,
            NmtCommandSpecifier::EnterPreOperational => NmtState::PreOperational,
            NmtCommandSpecifier::ResetNode | NmtCommandSpecifier::ResetCommunication => {
                self.heartbeat_timer.cancel();
                NmtState::Initializing
            }
        };
        if prev != self.state {
            info!("NMT state {} -> {}", u8::from(prev), u8::from(self.state));
        }
        prev != self.state
    }

    /// Drive the state machine
    ///
    /// Returns true if the node completed its bootup during this call.
    pub fn process(&mut self, now_us: u64, send: &mut dyn FnMut(CanMessage)) -> bool {
        if self.state == NmtState::Initializing {
            self.state = NmtState::PreOperational;
            send(
                Heartbeat {
                    node: self.node_id.raw(),
                    toggle: false,
                    state: NmtState::Initializing,
                }
                .into(),
            );
            self.start_heartbeat(now_us);
            return true;
        }

        if self.heartbeat_period_ms == 0 {
            return false;
        }
        if !self.heartbeat_timer.is_armed() {
            self.start_heartbeat(now_us);
        }
        if let Some(deadline) = self.heartbeat_timer.deadline() {
            if self.heartbeat_timer.take_expired(now_us) {
                send(
                    Heartbeat {
                        node: self.node_id.raw(),
                        toggle: false,
                        state: self.state,
                    }
                    .into(),
                );
                // Schedule from the deadline so late calls do not accumulate drift, but never
                // burst to catch up
                let period = self.period_us();
                let base = if deadline + period > now_us {
                    deadline
                } else {
                    now_us
                };
                self.heartbeat_timer.start(base, period);
            }
        }
        false
    }

    fn period_us(&self) -> u64 {
        self.heartbeat_period_ms as u64 * 1000
    }

    fn start_heartbeat(&mut self, now_us: u64) {
        if self.heartbeat_period_ms > 0 {
            self.heartbeat_timer.start(now_us, self.period_us());
        }
    }

    /// Time of the next scheduled heartbeat, if any
    pub fn next_heartbeat_us(&self) -> Option<u64> {
        self.heartbeat_timer.deadline()
    }
}
