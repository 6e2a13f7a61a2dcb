//! A local CANopen node
use canopen_common::{
    constants::{object_ids, COB_ID_INVALID_BIT},
    messages::{
        Emergency, NmtCommand, NmtCommandSpecifier, NmtState, SDO_REQ_BASE, SDO_RESP_BASE,
        NMT_CMD_ID, SYNC_ID,
    },
    objects::ObjectId,
    CanId, CanMessage, NodeId, Value,
};
use defmt_or_log::{debug, warn};
use serde::Deserialize;
use snafu::{ensure, Snafu};

use crate::{
    emcy::EmcyProducer,
    nmt::NmtSlave,
    object_dict::{ObjectDictionary, OdError},
    pdo::{PdoEngine, PdoError, RpdoConfig, TpdoConfig},
    sdo_server::{SdoServer, DEFAULT_SDO_TIMEOUT_US},
};

fn default_sdo_timeout_ms() -> u32 {
    (DEFAULT_SDO_TIMEOUT_US / 1000) as u32
}

/// Run time settings of a local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSettings {
    /// Heartbeat period in ms. When absent, object 0x1017 is used, and 0 disables the heartbeat.
    #[serde(default)]
    pub heartbeat_period_ms: Option<u16>,
    /// Time the SDO server waits for the next segment of a transfer
    #[serde(default = "default_sdo_timeout_ms")]
    pub sdo_timeout_ms: u32,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: None,
            sdo_timeout_ms: default_sdo_timeout_ms(),
        }
    }
}

/// Errors returned by node operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum NodeError {
    /// The service may not be used in the current NMT state
    #[snafu(display("Service not allowed in NMT state {state}"))]
    ServiceNotAllowed {
        /// The state of the node
        state: NmtState,
    },
}

/// Read an SDO COB-ID parameter, adding the node ID if the parameter leaves it out
fn sdo_cob_id(od: &ObjectDictionary, sub: u8, base: u16, node_id: NodeId) -> Option<CanId> {
    let node = node_id.raw() as u16;
    match od.get_u32(object_ids::SDO_SERVER_PARAMETER, sub) {
        Some(raw) if raw & COB_ID_INVALID_BIT != 0 => None,
        Some(raw) if raw & (1 << 29) != 0 => Some(CanId::Extended(raw & 0x1FFF_FFFF)),
        Some(raw) if raw & 0x7F == 0 => Some(CanId::Std((raw & 0x7FF) as u16 + node)),
        Some(raw) => Some(CanId::Std((raw & 0x7FF) as u16)),
        None => Some(CanId::Std(base + node)),
    }
}

/// A local node: one object dictionary and the services operating on it
///
/// The node is driven from outside. Frames from the bus are passed to
/// [`handle_message`](Self::handle_message), and [`process`](Self::process) is called
/// periodically to run timers. Both take the current time and a callback used to send frames.
#[derive(Debug)]
pub struct Node {
    node_id: NodeId,
    settings: NodeSettings,
    od: ObjectDictionary,
    nmt: NmtSlave,
    sdo_server: SdoServer,
    sdo_rx_cob_id: Option<CanId>,
    sdo_tx_cob_id: Option<CanId>,
    pdo: PdoEngine,
    emcy: EmcyProducer,
}

impl Node {
    /// Create a node
    ///
    /// The node starts in the Initializing state, and boots on the first call to
    /// [`process`](Self::process).
    pub fn new(node_id: NodeId, od: ObjectDictionary, settings: NodeSettings) -> Self {
        let emcy = EmcyProducer::new(node_id, &od);
        let mut node = Self {
            node_id,
            settings,
            od,
            nmt: NmtSlave::new(node_id, 0),
            sdo_server: SdoServer::new(settings.sdo_timeout_ms as u64 * 1000),
            sdo_rx_cob_id: None,
            sdo_tx_cob_id: None,
            pdo: PdoEngine::new(),
            emcy,
        };
        node.reset_communication();
        node
    }

    /// The node's ID
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The current NMT state
    pub fn nmt_state(&self) -> NmtState {
        self.nmt.state()
    }

    /// Access the object dictionary
    pub fn od(&self) -> &ObjectDictionary {
        &self.od
    }

    /// Mutable access to the object dictionary
    ///
    /// Writes made through this reference are only forwarded to event driven PDOs on the next
    /// [`process`](Self::process) call. Use [`write`](Self::write) or [`set`](Self::set) to
    /// trigger them immediately.
    pub fn od_mut(&mut self) -> &mut ObjectDictionary {
        &mut self.od
    }

    /// The ID the SDO server listens on, if enabled
    pub fn sdo_rx_cob_id(&self) -> Option<CanId> {
        self.sdo_rx_cob_id
    }

    /// The ID the SDO server responds on, if enabled
    pub fn sdo_tx_cob_id(&self) -> Option<CanId> {
        self.sdo_tx_cob_id
    }

    /// The PDO engine
    pub fn pdo(&self) -> &PdoEngine {
        &self.pdo
    }

    fn heartbeat_period_ms(&self) -> u16 {
        self.settings.heartbeat_period_ms.unwrap_or_else(|| {
            self.od
                .get_u32(object_ids::HEARTBEAT_PRODUCER_TIME, 0)
                .map(|v| v as u16)
                .unwrap_or(0)
        })
    }

    fn reset_communication(&mut self) {
        self.sdo_rx_cob_id = sdo_cob_id(&self.od, 1, SDO_REQ_BASE, self.node_id);
        self.sdo_tx_cob_id = sdo_cob_id(&self.od, 2, SDO_RESP_BASE, self.node_id);
        self.sdo_server.reset();
        self.nmt.set_heartbeat_period_ms(self.heartbeat_period_ms());
        self.emcy.reload(self.node_id, &self.od);
        self.pdo.stop();
    }

    /// Handle a frame received from the bus
    ///
    /// Returns true if the frame was addressed to this node. Frames which fail to decode are
    /// logged and dropped.
    pub fn handle_message(
        &mut self,
        msg: &CanMessage,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> bool {
        let id = msg.id();
        if id == NMT_CMD_ID {
            match NmtCommand::try_from(*msg) {
                Ok(cmd) if cmd.targets(self.node_id.raw()) => {
                    self.apply_nmt_command(cmd.cmd, now_us);
                }
                Ok(_) => (),
                Err(_) => warn!("Dropping malformed NMT command"),
            }
            return true;
        }

        let state = self.nmt.state();
        if id == SYNC_ID {
            if state == NmtState::Operational {
                self.pdo.sync_received(now_us, &self.od, send);
            }
            return true;
        }

        if Some(id) == self.sdo_rx_cob_id {
            if matches!(state, NmtState::PreOperational | NmtState::Operational) {
                let resp = self
                    .sdo_server
                    .handle_request(msg.data(), &mut self.od, now_us);
                if let Some(resp) = resp {
                    if let Some(tx_id) = self.sdo_tx_cob_id {
                        send(resp.to_can_message(tx_id));
                    }
                }
                self.dispatch_updates(now_us, send);
            }
            return true;
        }

        if self.pdo.rpdo_for(id).is_none() {
            return false;
        }
        if state != NmtState::Operational {
            return true;
        }
        match self.pdo.receive(msg, &self.od) {
            Some(Ok(values)) => {
                for (obj, value) in values {
                    // Every field was checked writable by the unpack
                    if self.od.write(obj.index, obj.sub, value).is_err() {
                        warn!("RPDO write to 0x{:x}sub{} failed", obj.index, obj.sub);
                    }
                }
                self.dispatch_updates(now_us, send);
            }
            Some(Err(_)) => debug!("Dropping RPDO with bad payload on 0x{:x}", id.raw()),
            None => (),
        }
        true
    }

    /// Run timers: bootup, heartbeat, SDO server timeout and PDO transmission
    pub fn process(&mut self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        if self.nmt.process(now_us, send) {
            return;
        }
        if let Some(abort) = self.sdo_server.process(now_us) {
            if let Some(tx_id) = self.sdo_tx_cob_id {
                send(abort.to_can_message(tx_id));
            }
        }
        self.dispatch_updates(now_us, send);
        self.pdo.process(now_us, &self.od, send);
    }

    /// Apply an NMT command to this node
    pub fn apply_nmt_command(&mut self, cmd: NmtCommandSpecifier, now_us: u64) {
        match cmd {
            NmtCommandSpecifier::ResetNode => {
                self.od.reset_to_defaults();
                self.reset_communication();
            }
            NmtCommandSpecifier::ResetCommunication => self.reset_communication(),
            _ => (),
        }
        self.nmt.apply_command(cmd);
        if self.nmt.state() == NmtState::Operational {
            self.pdo.start(now_us);
        } else {
            self.pdo.stop();
        }
    }

    /// Read a value, subject to its access type
    pub fn read(&self, index: u16, sub: u8) -> Result<Value, OdError> {
        self.od.read(index, sub)
    }

    /// Write a value, subject to its access type
    ///
    /// Event driven PDOs mapping the object are sent before this returns.
    pub fn write(
        &mut self,
        index: u16,
        sub: u8,
        value: impl Into<Value>,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), OdError> {
        self.od.write(index, sub, value)?;
        self.dispatch_updates(now_us, send);
        Ok(())
    }

    /// Update a value as the application, ignoring read-only access
    ///
    /// Event driven PDOs mapping the object are sent before this returns.
    pub fn set(
        &mut self,
        index: u16,
        sub: u8,
        value: impl Into<Value>,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), OdError> {
        self.od.set(index, sub, value)?;
        self.dispatch_updates(now_us, send);
        Ok(())
    }

    /// Send an emergency message
    ///
    /// Emergencies can only be sent in the PreOperational and Operational states.
    pub fn raise_emergency(
        &mut self,
        emcy: Emergency,
        now_us: u64,
        send: &mut dyn FnMut(CanMessage),
    ) -> Result<(), NodeError> {
        let state = self.nmt.state();
        ensure!(
            matches!(state, NmtState::PreOperational | NmtState::Operational),
            ServiceNotAllowedSnafu { state }
        );
        if let Some(msg) = self.emcy.produce(&emcy, &mut self.od) {
            send(msg);
        }
        self.dispatch_updates(now_us, send);
        Ok(())
    }

    /// Add a transmit PDO
    pub fn add_tpdo(&mut self, config: TpdoConfig) -> Result<usize, PdoError> {
        self.pdo.add_tpdo(config, &self.od)
    }

    /// Add a receive PDO
    pub fn add_rpdo(&mut self, config: RpdoConfig) -> Result<usize, PdoError> {
        self.pdo.add_rpdo(config, &self.od)
    }

    fn dispatch_updates(&mut self, now_us: u64, send: &mut dyn FnMut(CanMessage)) {
        for id in self.od.take_updates() {
            if id == ObjectId::new(object_ids::HEARTBEAT_PRODUCER_TIME, 0) {
                self.nmt.set_heartbeat_period_ms(self.heartbeat_period_ms());
            }
            self.pdo.object_updated(id, now_us, &self.od, send);
        }
    }
}

#[cfg(test)]
mod tests {
    use canopen_common::{
        objects::{AccessType, DataType, PdoMappable},
        sdo::{AbortCode, SdoRequest, SdoResponse},
    };

    use super::*;
    use crate::{
        object_dict::{schema::communication_objects, EntryDefinition},
        pdo::{MappingEntry, TpdoTrigger},
    };

    fn test_node() -> Node {
        let mut defs = communication_objects("test node", 100);
        defs.push(
            EntryDefinition::new(0x2000, 0, "value", DataType::UInt16)
                .access(AccessType::Rw)
                .mappable(PdoMappable::Both),
        );
        let od = ObjectDictionary::from_definitions(defs).unwrap();
        Node::new(NodeId::new(4).unwrap(), od, NodeSettings::default())
    }

    fn sdo(node: &mut Node, req: SdoRequest) -> Vec<CanMessage> {
        let mut sent = Vec::new();
        node.handle_message(&req.to_can_message(CanId::Std(0x604)), 0, &mut |m| sent.push(m));
        sent
    }

    #[test]
    fn test_boot_and_sdo_gating() {
        let mut node = test_node();
        // Not booted yet: SDO requests get no answer
        assert!(sdo(&mut node, SdoRequest::initiate_upload(0x2000, 0)).is_empty());

        let mut sent = Vec::new();
        node.process(0, &mut |m| sent.push(m));
        assert_eq!(vec![CanMessage::new(CanId::Std(0x704), &[0])], sent);

        let sent = sdo(&mut node, SdoRequest::initiate_upload(0x2000, 0));
        assert_eq!(CanId::Std(0x584), sent[0].id());
        assert_eq!(
            SdoResponse::expedited_upload(0x2000, 0, &[0, 0]),
            SdoResponse::try_from(sent[0]).unwrap()
        );

        node.apply_nmt_command(NmtCommandSpecifier::EnterStopped, 0);
        assert!(sdo(&mut node, SdoRequest::initiate_upload(0x2000, 0)).is_empty());
    }

    #[test]
    fn test_reset_node_restores_defaults() {
        let mut node = test_node();
        node.process(0, &mut |_| ());
        node.write(0x2000, 0, 55u16, 0, &mut |_| ()).unwrap();
        node.handle_message(
            &NmtCommand {
                cmd: NmtCommandSpecifier::ResetNode,
                node: 0,
            }
            .into(),
            10,
            &mut |_| (),
        );
        assert_eq!(NmtState::Initializing, node.nmt_state());
        assert_eq!(Value::UInt16(0), node.read(0x2000, 0).unwrap());
    }

    #[test]
    fn test_nmt_for_other_node_ignored() {
        let mut node = test_node();
        node.process(0, &mut |_| ());
        node.handle_message(
            &NmtCommand {
                cmd: NmtCommandSpecifier::EnterOperational,
                node: 9,
            }
            .into(),
            10,
            &mut |_| (),
        );
        assert_eq!(NmtState::PreOperational, node.nmt_state());
    }

    #[test]
    fn test_on_change_pdo_before_write_returns() {
        let mut node = test_node();
        node.add_tpdo(TpdoConfig {
            cob_id: CanId::Std(0x184),
            trigger: TpdoTrigger::OnChange,
            inhibit_us: 0,
            mappings: vec![MappingEntry::new(0x2000, 0, 16)],
        })
        .unwrap();
        node.process(0, &mut |_| ());

        let mut sent = Vec::new();
        // PDOs are only sent in Operational
        node.write(0x2000, 0, 1u16, 0, &mut |m| sent.push(m)).unwrap();
        assert!(sent.is_empty());

        node.apply_nmt_command(NmtCommandSpecifier::EnterOperational, 0);
        node.write(0x2000, 0, 0x1234u16, 0, &mut |m| sent.push(m)).unwrap();
        assert_eq!(vec![CanMessage::new(CanId::Std(0x184), &[0x34, 0x12])], sent);

        // SDO writes trigger it too
        sent.clear();
        node.handle_message(
            &SdoRequest::expedited_download(0x2000, 0, &[7, 0]).to_can_message(CanId::Std(0x604)),
            0,
            &mut |m| sent.push(m),
        );
        assert_eq!(2, sent.len());
        assert_eq!(CanId::Std(0x184), sent[1].id());
    }

    #[test]
    fn test_emergency_gating() {
        let mut node = test_node();
        assert_eq!(
            Err(NodeError::ServiceNotAllowed {
                state: NmtState::Initializing
            }),
            node.raise_emergency(Emergency::default(), 0, &mut |_| ())
        );
        node.process(0, &mut |_| ());
        let mut sent = Vec::new();
        node.raise_emergency(Emergency::new(0x1000, 1, [0; 5]), 0, &mut |m| sent.push(m))
            .unwrap();
        assert_eq!(CanId::Std(0x84), sent[0].id());
    }

    #[test]
    fn test_heartbeat_from_od_changes_at_runtime() {
        let mut node = test_node();
        node.process(0, &mut |_| ());
        let mut sent = Vec::new();
        node.process(100_000, &mut |m| sent.push(m));
        assert_eq!(1, sent.len());

        let resp = sdo(&mut node, SdoRequest::expedited_download(0x1017, 0, &[0, 0]));
        assert_eq!(
            SdoResponse::download_acknowledge(0x1017, 0),
            SdoResponse::try_from(resp[0]).unwrap()
        );
        sent.clear();
        node.process(10_000_000, &mut |m| sent.push(m));
        assert!(sent.is_empty());
    }

    #[test]
    fn test_sdo_timeout_abort_sent() {
        let mut node = test_node();
        node.process(0, &mut |_| ());
        sdo(&mut node, SdoRequest::initiate_upload(0x1008, 0));
        let mut sent = Vec::new();
        node.process(DEFAULT_SDO_TIMEOUT_US, &mut |m| sent.push(m));
        assert!(sent.contains(
            &SdoResponse::abort(0x1008, 0, AbortCode::SdoTimeout).to_can_message(CanId::Std(0x584))
        ));
    }
}
