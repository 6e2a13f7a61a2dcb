//! NMT master: node commands and remote node monitoring
use std::collections::BTreeMap;

use canopen_common::{
    messages::{Emergency, Heartbeat, NmtCommand, NmtCommandSpecifier, NmtState},
    node_id::InvalidNodeIdError,
    CanMessage, NodeId,
};
use log::{info, warn};

/// What the master knows about one remote node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteNode {
    /// The node's ID
    pub id: NodeId,
    /// The last known NMT state, from heartbeats or observed commands
    pub state: Option<NmtState>,
    /// Time the last heartbeat was received
    pub last_heartbeat_us: Option<u64>,
    /// Heartbeat consumer timeout. None disables monitoring.
    pub heartbeat_timeout_us: Option<u64>,
    /// False once the heartbeat timeout has elapsed, until the next heartbeat
    pub alive: bool,
    /// The last emergency received from the node
    pub last_emergency: Option<Emergency>,
}

impl RemoteNode {
    fn new(id: NodeId, heartbeat_timeout_us: Option<u64>) -> Self {
        Self {
            id,
            state: None,
            last_heartbeat_us: None,
            heartbeat_timeout_us,
            alive: true,
            last_emergency: None,
        }
    }
}

/// Events produced by the NMT master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtEvent {
    /// A node sent its bootup message
    Bootup {
        /// The node
        node: NodeId,
    },
    /// A node reported a different state than previously recorded
    StateChanged {
        /// The node
        node: NodeId,
        /// The previously recorded state, if any
        old: Option<NmtState>,
        /// The reported state
        new: NmtState,
    },
    /// No heartbeat was received from a monitored node within its timeout
    HeartbeatLost {
        /// The node
        node: NodeId,
    },
    /// A heartbeat was received from a node previously reported lost
    HeartbeatRecovered {
        /// The node
        node: NodeId,
    },
}

/// Sends NMT commands and keeps a table of remote nodes
///
/// Node records are created the first time a node is seen, through a heartbeat, an emergency, a
/// command addressed to it or an explicit call to [`monitor`](Self::monitor). They are never
/// removed.
#[derive(Debug, Default)]
pub struct NmtMaster {
    nodes: BTreeMap<u8, RemoteNode>,
    default_heartbeat_timeout_us: Option<u64>,
}

impl NmtMaster {
    /// Create a master with an empty node table
    pub fn new() -> Self {
        Self::default()
    }

    /// Heartbeat timeout applied to nodes discovered after this call
    pub fn set_default_heartbeat_timeout(&mut self, timeout_us: Option<u64>) {
        self.default_heartbeat_timeout_us = timeout_us;
    }

    fn entry(&mut self, id: NodeId) -> &mut RemoteNode {
        let timeout = self.default_heartbeat_timeout_us;
        self.nodes
            .entry(id.raw())
            .or_insert_with(|| RemoteNode::new(id, timeout))
    }

    /// Get the record of a node
    pub fn node(&self, id: u8) -> Option<&RemoteNode> {
        self.nodes.get(&id)
    }

    /// Iterate over all known nodes in ID order
    pub fn nodes(&self) -> impl Iterator<Item = &RemoteNode> {
        self.nodes.values()
    }

    /// Monitor the heartbeat of `node`, declaring it lost after `timeout_us` without one
    ///
    /// Monitoring starts with the first heartbeat received.
    pub fn monitor(&mut self, node: NodeId, timeout_us: u64) {
        self.entry(node).heartbeat_timeout_us = Some(timeout_us);
    }

    /// Build a command frame for `node` (0 for all nodes) and record its effect
    pub fn command(
        &mut self,
        cmd: NmtCommandSpecifier,
        node: u8,
    ) -> Result<CanMessage, InvalidNodeIdError> {
        if node != 0 {
            NodeId::new(node)?;
        }
        let command = NmtCommand { cmd, node };
        self.observe_command(&command);
        Ok(command.into())
    }

    /// Update the recorded states for an NMT command seen on the bus
    ///
    /// A broadcast updates every known node. A command for a specific node creates its record if
    /// needed.
    pub fn observe_command(&mut self, command: &NmtCommand) {
        let new_state = match command.cmd {
            NmtCommandSpecifier::EnterOperational => NmtState::Operational,
            NmtCommandSpecifier::EnterStopped => NmtState::Stopped,
            NmtCommandSpecifier::EnterPreOperational => NmtState::PreOperational,
            NmtCommandSpecifier::ResetNode | NmtCommandSpecifier::ResetCommunication => {
                NmtState::Initializing
            }
        };
        if command.node == 0 {
            for node in self.nodes.values_mut() {
                node.state = Some(new_state);
            }
        } else if let Ok(id) = NodeId::new(command.node) {
            self.entry(id).state = Some(new_state);
        } else {
            warn!("Ignoring NMT command for invalid node {}", command.node);
        }
    }

    /// Handle a received heartbeat or bootup message
    pub fn handle_heartbeat(&mut self, heartbeat: &Heartbeat, now_us: u64) -> Vec<NmtEvent> {
        let mut events = Vec::new();
        let Ok(id) = NodeId::new(heartbeat.node) else {
            return events;
        };
        let record = self.entry(id);
        // A node enters PreOperational right after sending its bootup message
        let state = if heartbeat.is_bootup() {
            NmtState::PreOperational
        } else {
            heartbeat.state
        };
        if heartbeat.is_bootup() {
            info!("Node {} booted", id);
            events.push(NmtEvent::Bootup { node: id });
        } else if record.state != Some(state) {
            events.push(NmtEvent::StateChanged {
                node: id,
                old: record.state,
                new: state,
            });
        }
        if !record.alive {
            info!("Heartbeat from node {} recovered", id);
            events.push(NmtEvent::HeartbeatRecovered { node: id });
        }
        record.state = Some(state);
        record.alive = true;
        record.last_heartbeat_us = Some(now_us);
        events
    }

    /// Record that `node` was seen on the bus, creating its record if needed
    ///
    /// Used for traffic which says nothing about the node's state, such as SDO responses.
    pub fn observe_traffic(&mut self, node: u8) {
        if let Ok(id) = NodeId::new(node) {
            self.entry(id);
        }
    }

    /// Record an emergency received from `node`
    pub fn handle_emergency(&mut self, node: u8, emcy: &Emergency) {
        if let Ok(id) = NodeId::new(node) {
            self.entry(id).last_emergency = Some(*emcy);
        }
    }

    /// Check heartbeat timeouts
    ///
    /// Each loss is reported once, until the node's heartbeat returns.
    pub fn process(&mut self, now_us: u64) -> Vec<NmtEvent> {
        let mut events = Vec::new();
        for node in self.nodes.values_mut() {
            let (Some(timeout), Some(last)) = (node.heartbeat_timeout_us, node.last_heartbeat_us)
            else {
                continue;
            };
            if node.alive && now_us.saturating_sub(last) >= timeout {
                warn!("Heartbeat from node {} lost", node.id);
                node.alive = false;
                events.push(NmtEvent::HeartbeatLost { node: node.id });
            }
        }
        events
    }

    /// Time of the earliest pending heartbeat timeout
    pub fn next_deadline_us(&self) -> Option<u64> {
        self.nodes
            .values()
            .filter(|n| n.alive)
            .filter_map(|n| Some(n.last_heartbeat_us? + n.heartbeat_timeout_us?))
            .min()
    }
}
