//! The composition of a local node and the client services on one bus
use std::collections::{BTreeMap, VecDeque};
use std::time::SystemTime;

use canopen_client::{
    nmt_master::{NmtEvent, NmtMaster, RemoteNode},
    sdo_client::{SdoClient, SdoClientError, SdoCompletion},
    LssError, LssEvent, LssMaster, SyncProducer, TimeProducer,
};
use canopen_common::{
    lss::{LssIdentity, LssMode},
    messages::{
        CanOpenMessage, Emergency, NmtCommandSpecifier, NmtState, SyncObject, TimeStamp,
        NMT_CMD_ID, SYNC_ID,
    },
    node_id::InvalidNodeIdError,
    objects::DataType,
    traits::CanSender,
    CanMessage, NodeId, Value,
};
use canopen_node::{object_dict::OdError, pdo::PdoError, Node, NodeError, ObjectDictionary};
use log::{debug, warn};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::config::{ConfigError, NetworkConfig};

/// Errors returned by [`Network`] requests
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum NetworkError {
    /// The request needs a local node, and none is configured
    NoLocalNode,
    /// A configuration names a local node but no object dictionary was given for it
    MissingObjectDictionary,
    /// A node ID is out of range
    #[snafu(display("Invalid node ID: {source}"))]
    InvalidNodeId {
        /// The underlying error
        source: InvalidNodeIdError,
    },
    /// The SDO client refused the request
    #[snafu(display("SDO request to node {node} failed: {source}"))]
    Sdo {
        /// The remote node
        node: u8,
        /// The underlying error
        source: SdoClientError,
    },
    /// The local object dictionary refused the access
    #[snafu(display("Object dictionary access failed: {source}"))]
    Od {
        /// The underlying error
        source: OdError,
    },
    /// The local node refused the request
    #[snafu(display("{source}"))]
    Node {
        /// The underlying error
        source: NodeError,
    },
    /// A PDO of the configuration is invalid
    #[snafu(display("Invalid PDO configuration: {source}"))]
    Pdo {
        /// The underlying error
        source: PdoError,
    },
    /// A configuration value could not be applied
    #[snafu(display("{source}"))]
    Config {
        /// The underlying error
        source: ConfigError,
    },
    /// A store entry of the configuration could not be written
    #[snafu(display("Failed to store 0x{index:04X}sub{sub}: {source}"))]
    Store {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
        /// The underlying error
        source: OdError,
    },
    /// LSS requests need the LSS master to be enabled
    LssDisabled,
    /// The LSS master refused the request
    #[snafu(display("{source}"))]
    Lss {
        /// The underlying error
        source: LssError,
    },
}

/// Events reported by the network, read with [`Network::poll_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// An emergency was received
    Emergency {
        /// The originating node
        node: u8,
        /// The emergency
        emcy: Emergency,
    },
    /// A node sent its bootup message
    Bootup {
        /// The node
        node: NodeId,
    },
    /// A heartbeat reported a new state
    NmtStateChanged {
        /// The node
        node: NodeId,
        /// The previously recorded state
        old: Option<NmtState>,
        /// The new state
        new: NmtState,
    },
    /// A monitored node stopped sending heartbeats
    HeartbeatLost {
        /// The node
        node: NodeId,
    },
    /// A node previously reported lost sent a heartbeat
    HeartbeatRecovered {
        /// The node
        node: NodeId,
    },
    /// An SDO transfer finished
    SdoCompleted {
        /// The server node
        node: u8,
        /// The result of the transfer
        completion: SdoCompletion,
    },
    /// A SYNC was received
    Sync(SyncObject),
    /// A TIME stamp was received
    TimeStamp(TimeStamp),
    /// An LSS request completed
    Lss(LssEvent),
}

impl From<NmtEvent> for NetworkEvent {
    fn from(value: NmtEvent) -> Self {
        match value {
            NmtEvent::Bootup { node } => NetworkEvent::Bootup { node },
            NmtEvent::StateChanged { node, old, new } => {
                NetworkEvent::NmtStateChanged { node, old, new }
            }
            NmtEvent::HeartbeatLost { node } => NetworkEvent::HeartbeatLost { node },
            NmtEvent::HeartbeatRecovered { node } => NetworkEvent::HeartbeatRecovered { node },
        }
    }
}

/// Wrap a sender as the callback the engines send through
///
/// The transport is a non-blocking queue. A frame it refuses is logged and dropped, like a frame
/// lost on the bus.
fn send_fn<S: CanSender>(sender: &mut S) -> impl FnMut(CanMessage) + '_ {
    move |msg| {
        if sender.send(msg).is_err() {
            warn!("Dropping frame on {}: transport refused it", msg.id());
        }
    }
}

/// Get the client for `node`, creating it on first use
fn sdo_client(
    clients: &mut BTreeMap<u8, SdoClient>,
    node: u8,
    timeout_us: u64,
) -> Result<&mut SdoClient, NetworkError> {
    let node = NodeId::new(node).context(InvalidNodeIdSnafu)?.raw();
    Ok(clients
        .entry(node)
        .or_insert_with(|| SdoClient::new_std(node, timeout_us)))
}

/// A CANopen network as seen from one process
///
/// The network owns the sending half of the transport, an optional local node, and the client
/// side services used to manage remote nodes. Received frames are passed in through
/// [`handle_message`](Self::handle_message), timers are run by [`process`](Self::process), and
/// everything of note is reported as a [`NetworkEvent`].
#[derive(Debug)]
pub struct Network<S: CanSender> {
    sender: S,
    node: Option<Node>,
    nmt: NmtMaster,
    sdo_clients: BTreeMap<u8, SdoClient>,
    sdo_timeout_us: u64,
    sync: Option<SyncProducer>,
    time: Option<TimeProducer>,
    lss: Option<LssMaster>,
    wall_clock: fn() -> SystemTime,
    events: VecDeque<NetworkEvent>,
}

impl<S: CanSender> Network<S> {
    /// Create a network with no local node
    pub fn new(sender: S) -> Self {
        Self {
            sender,
            node: None,
            nmt: NmtMaster::new(),
            sdo_clients: BTreeMap::new(),
            sdo_timeout_us: canopen_client::sdo_client::DEFAULT_SDO_CLIENT_TIMEOUT_US,
            sync: None,
            time: None,
            lss: None,
            wall_clock: SystemTime::now,
            events: VecDeque::new(),
        }
    }

    /// Create a network hosting `node`
    pub fn with_node(sender: S, node: Node) -> Self {
        let mut network = Self::new(sender);
        network.node = Some(node);
        network
    }

    /// Create a network from a configuration
    ///
    /// `od` is the object dictionary of the local node, and is required when the configuration
    /// has a `local_node` section. Producers are started at `now_us`.
    pub fn from_config(
        sender: S,
        config: &NetworkConfig,
        od: Option<ObjectDictionary>,
        now_us: u64,
    ) -> Result<Self, NetworkError> {
        let mut network = Self::new(sender);
        network.sdo_timeout_us = config.sdo_timeout_ms as u64 * 1000;

        if let Some(local) = &config.local_node {
            let od = od.context(MissingObjectDictionarySnafu)?;
            let node_id = NodeId::new(local.node_id).context(InvalidNodeIdSnafu)?;
            let mut node = Node::new(node_id, od, local.settings());
            for store in &local.store {
                node.od_mut()
                    .set(store.index, store.sub, store.value.clone())
                    .context(StoreSnafu {
                        index: store.index,
                        sub: store.sub,
                    })?;
            }
            for pdo in local.tpdo.iter().filter(|p| p.enabled) {
                let tpdo = pdo.to_tpdo().context(ConfigSnafu)?;
                node.add_tpdo(tpdo).context(PdoSnafu)?;
            }
            for pdo in local.rpdo.iter().filter(|p| p.enabled) {
                node.add_rpdo(pdo.to_rpdo()).context(PdoSnafu)?;
            }
            network.node = Some(node);
        }

        for consumer in &config.heartbeat_consumer {
            let node = NodeId::new(consumer.node).context(InvalidNodeIdSnafu)?;
            network.monitor_heartbeat(node, consumer.timeout_ms);
        }
        if let Some(sync) = config.sync {
            network.enable_sync(sync.period_ms as u64 * 1000, sync.overflow, now_us);
        }
        if let Some(time) = config.time {
            network.enable_time_producer(time.period_ms as u64 * 1000, now_us);
        }
        if let Some(lss) = config.lss.filter(|l| l.enabled) {
            network.enable_lss(lss.timeout_ms as u64 * 1000);
        }
        Ok(network)
    }

    /// The local node
    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    /// The local node, mutably
    pub fn node_mut(&mut self) -> Option<&mut Node> {
        self.node.as_mut()
    }

    /// The NMT master and its table of remote nodes
    pub fn nmt_master(&self) -> &NmtMaster {
        &self.nmt
    }

    /// What is known about a remote node
    pub fn remote_node(&self, id: u8) -> Option<&RemoteNode> {
        self.nmt.node(id)
    }

    /// The transport sender
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// Replace the source of wall clock time used by the TIME producer
    pub fn set_wall_clock(&mut self, clock: fn() -> SystemTime) {
        self.wall_clock = clock;
    }

    /// Take the next pending event
    pub fn poll_event(&mut self) -> Option<NetworkEvent> {
        self.events.pop_front()
    }

    fn push_nmt_events(&mut self, events: Vec<NmtEvent>) {
        self.events.extend(events.into_iter().map(NetworkEvent::from));
    }

    /// Handle a frame received from the bus
    ///
    /// Frames which fail to decode are logged and dropped. They never affect the handling of
    /// later frames.
    pub fn handle_message(&mut self, msg: CanMessage, now_us: u64) {
        let id = msg.id();
        if let Some(node) = self.node.as_mut() {
            let consumed = node.handle_message(&msg, now_us, &mut send_fn(&mut self.sender));
            // NMT commands and SYNC are also of interest to the client side
            if consumed && id != NMT_CMD_ID && id != SYNC_ID {
                return;
            }
        }

        let client = self
            .sdo_clients
            .iter_mut()
            .find(|(_, c)| c.resp_cob_id() == id);
        if let Some((&node, client)) = client {
            self.nmt.observe_traffic(node);
            let completion = client.handle_response(&msg, now_us, &mut send_fn(&mut self.sender));
            if let Some(completion) = completion {
                self.events
                    .push_back(NetworkEvent::SdoCompleted { node, completion });
            }
            return;
        }

        let decoded = match CanOpenMessage::try_from(msg) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Dropping frame on {id}: {e}");
                return;
            }
        };
        match decoded {
            CanOpenMessage::NmtCommand(cmd) => self.nmt.observe_command(&cmd),
            CanOpenMessage::Sync(sync) => self.events.push_back(NetworkEvent::Sync(sync)),
            CanOpenMessage::TimeStamp(stamp) => {
                self.events.push_back(NetworkEvent::TimeStamp(stamp))
            }
            CanOpenMessage::Emergency { node, emcy } => {
                self.nmt.handle_emergency(node, &emcy);
                self.events
                    .push_back(NetworkEvent::Emergency { node, emcy });
            }
            CanOpenMessage::Heartbeat(heartbeat) => {
                let events = self.nmt.handle_heartbeat(&heartbeat, now_us);
                self.push_nmt_events(events);
            }
            CanOpenMessage::LssResponse(_) => {
                if let Some(event) = self.lss.as_mut().and_then(|lss| lss.handle_message(&msg)) {
                    self.events.push_back(NetworkEvent::Lss(event));
                }
            }
            // A response between other nodes still shows the server is present
            CanOpenMessage::SdoResponse { node, .. } => self.nmt.observe_traffic(node),
            // Traffic between other nodes
            CanOpenMessage::SdoRequest { .. }
            | CanOpenMessage::Pdo(_)
            | CanOpenMessage::LssRequest(_) => (),
        }
    }

    /// Run all timers
    pub fn process(&mut self, now_us: u64) {
        let mut send = send_fn(&mut self.sender);

        if let Some(node) = self.node.as_mut() {
            node.process(now_us, &mut send);
        }

        for (&node, client) in self.sdo_clients.iter_mut() {
            if let Some(completion) = client.process(now_us, &mut send) {
                self.events
                    .push_back(NetworkEvent::SdoCompleted { node, completion });
            }
        }

        self.events
            .extend(self.nmt.process(now_us).into_iter().map(NetworkEvent::from));

        if let Some(sync) = self.sync.as_mut().and_then(|s| s.process(now_us, &mut send)) {
            // The local node does not receive its own frames from the bus
            if let Some(node) = self.node.as_mut() {
                node.handle_message(&CanMessage::from(sync), now_us, &mut send);
            }
        }

        if let Some(time) = self.time.as_mut() {
            time.process(now_us, (self.wall_clock)(), &mut send);
        }

        if let Some(event) = self.lss.as_mut().and_then(|lss| lss.process(now_us)) {
            self.events.push_back(NetworkEvent::Lss(event));
        }
    }

    /// The earliest time at which [`process`](Self::process) has work to do
    pub fn next_deadline_us(&self) -> Option<u64> {
        let clients = self.sdo_clients.values().filter_map(|c| c.deadline_us());
        [
            self.nmt.next_deadline_us(),
            self.sync.as_ref().and_then(|s| s.next_deadline_us()),
            self.time.as_ref().and_then(|t| t.next_deadline_us()),
            self.lss.as_ref().and_then(|l| l.deadline_us()),
        ]
        .into_iter()
        .flatten()
        .chain(clients)
        .min()
    }

    /// Start reading a sub object of a remote node
    ///
    /// The result is reported as a [`NetworkEvent::SdoCompleted`].
    pub fn sdo_upload(
        &mut self,
        node: u8,
        index: u16,
        sub: u8,
        data_type: Option<DataType>,
        now_us: u64,
    ) -> Result<(), NetworkError> {
        let client = sdo_client(&mut self.sdo_clients, node, self.sdo_timeout_us)?;
        client
            .upload(index, sub, data_type, now_us, &mut send_fn(&mut self.sender))
            .context(SdoSnafu { node })
    }

    /// Start writing a sub object of a remote node
    ///
    /// The result is reported as a [`NetworkEvent::SdoCompleted`].
    pub fn sdo_download(
        &mut self,
        node: u8,
        index: u16,
        sub: u8,
        data: &[u8],
        now_us: u64,
    ) -> Result<(), NetworkError> {
        let client = sdo_client(&mut self.sdo_clients, node, self.sdo_timeout_us)?;
        client
            .download(index, sub, data, now_us, &mut send_fn(&mut self.sender))
            .context(SdoSnafu { node })
    }

    /// Send an NMT command to `node`, or to all nodes with `node` 0
    ///
    /// The command is applied to the local node as well when it is targeted.
    pub fn nmt_command(
        &mut self,
        cmd: NmtCommandSpecifier,
        node: u8,
        now_us: u64,
    ) -> Result<(), NetworkError> {
        let msg = self.nmt.command(cmd, node).context(InvalidNodeIdSnafu)?;
        send_fn(&mut self.sender)(msg);
        if let Some(local) = self.node.as_mut() {
            if node == 0 || node == local.node_id().raw() {
                local.apply_nmt_command(cmd, now_us);
            }
        }
        Ok(())
    }

    /// Read a sub object of the local node
    pub fn read_local(&self, index: u16, sub: u8) -> Result<Value, NetworkError> {
        let node = self.node.as_ref().context(NoLocalNodeSnafu)?;
        node.read(index, sub).context(OdSnafu)
    }

    /// Write a sub object of the local node as the application
    ///
    /// The type is checked but the access type is not. Event driven PDOs mapping the object are
    /// sent before this returns.
    pub fn write_local(
        &mut self,
        index: u16,
        sub: u8,
        value: impl Into<Value>,
        now_us: u64,
    ) -> Result<(), NetworkError> {
        let node = self.node.as_mut().context(NoLocalNodeSnafu)?;
        node.set(index, sub, value, now_us, &mut send_fn(&mut self.sender))
            .context(OdSnafu)
    }

    /// Send an emergency from the local node
    pub fn raise_emergency(&mut self, emcy: Emergency, now_us: u64) -> Result<(), NetworkError> {
        let node = self.node.as_mut().context(NoLocalNodeSnafu)?;
        node.raise_emergency(emcy, now_us, &mut send_fn(&mut self.sender))
            .context(NodeSnafu)
    }

    /// Report [`NetworkEvent::HeartbeatLost`] when `node` sends no heartbeat for `timeout_ms`
    pub fn monitor_heartbeat(&mut self, node: NodeId, timeout_ms: u32) {
        self.nmt.monitor(node, timeout_ms as u64 * 1000);
    }

    /// Start producing SYNC every `period_us`
    pub fn enable_sync(&mut self, period_us: u64, overflow: u8, now_us: u64) {
        let mut sync = SyncProducer::new(period_us, overflow);
        sync.start(now_us);
        self.sync = Some(sync);
    }

    /// Stop producing SYNC
    pub fn disable_sync(&mut self) {
        self.sync = None;
    }

    /// Start producing a TIME stamp every `period_us`
    pub fn enable_time_producer(&mut self, period_us: u64, now_us: u64) {
        let mut time = TimeProducer::new(period_us);
        time.start(now_us);
        self.time = Some(time);
    }

    /// Stop producing TIME stamps
    pub fn disable_time_producer(&mut self) {
        self.time = None;
    }

    /// Create the LSS master
    pub fn enable_lss(&mut self, timeout_us: u64) {
        self.lss = Some(LssMaster::new(timeout_us));
    }

    fn lss(&mut self) -> Result<(&mut LssMaster, impl FnMut(CanMessage) + '_), NetworkError> {
        let lss = self.lss.as_mut().context(LssDisabledSnafu)?;
        Ok((lss, send_fn(&mut self.sender)))
    }

    /// Switch all LSS slaves into `mode`
    pub fn lss_switch_mode_global(&mut self, mode: LssMode) -> Result<(), NetworkError> {
        let (lss, mut send) = self.lss()?;
        lss.switch_mode_global(mode, &mut send);
        Ok(())
    }

    /// Put the slave with `identity` into configuration mode
    pub fn lss_switch_selective(
        &mut self,
        identity: &LssIdentity,
        now_us: u64,
    ) -> Result<(), NetworkError> {
        let (lss, mut send) = self.lss()?;
        lss.switch_selective(identity, now_us, &mut send)
            .context(LssSnafu)
    }

    /// Set the node ID of the slave in configuration mode
    pub fn lss_configure_node_id(
        &mut self,
        node_id: NodeId,
        now_us: u64,
    ) -> Result<(), NetworkError> {
        let (lss, mut send) = self.lss()?;
        lss.configure_node_id(node_id, now_us, &mut send)
            .context(LssSnafu)
    }

    /// Ask the slave in configuration mode to store its configuration
    pub fn lss_store_configuration(&mut self, now_us: u64) -> Result<(), NetworkError> {
        let (lss, mut send) = self.lss()?;
        lss.store_configuration(now_us, &mut send).context(LssSnafu)
    }

    /// Ask the slave in configuration mode for its node ID
    pub fn lss_inquire_node_id(&mut self, now_us: u64) -> Result<(), NetworkError> {
        let (lss, mut send) = self.lss()?;
        lss.inquire_node_id(now_us, &mut send).context(LssSnafu)
    }
}
