//! Drives several networks sharing one [`SimBus`]
use canopen_common::{CanMessage, NodeId};
use canopen_network::{Network, NetworkEvent};
use canopen_node::{Node, NodeSettings, ObjectDictionary};

use crate::sim_bus::{SimBus, SimBusReceiver, SimBusSender};

pub type SimNetwork = Network<SimBusSender>;

struct Participant {
    network: SimNetwork,
    receiver: SimBusReceiver,
}

/// A set of networks on one simulated bus, plus a monitor recording every frame
pub struct TestBus {
    bus: SimBus,
    participants: Vec<Participant>,
    monitor: SimBusReceiver,
}

impl Default for TestBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBus {
    pub fn new() -> Self {
        let mut bus = SimBus::new();
        let (_, monitor) = bus.attach();
        Self {
            bus,
            participants: Vec::new(),
            monitor,
        }
    }

    /// Attach a network built by `build`, returning its index
    pub fn add(&mut self, build: impl FnOnce(SimBusSender) -> SimNetwork) -> usize {
        let (sender, receiver) = self.bus.attach();
        self.participants.push(Participant {
            network: build(sender),
            receiver,
        });
        self.participants.len() - 1
    }

    /// Attach a network hosting a node with `node_id` and `od`
    pub fn add_node(&mut self, node_id: u8, od: ObjectDictionary) -> usize {
        let node_id = NodeId::new(node_id).unwrap();
        self.add(|sender| {
            Network::with_node(sender, Node::new(node_id, od, NodeSettings::default()))
        })
    }

    /// Attach a network with no local node
    pub fn add_master(&mut self) -> usize {
        self.add(Network::new)
    }

    /// Attach a raw participant, driven by the test itself
    pub fn attach_raw(&mut self) -> (SimBusSender, SimBusReceiver) {
        self.bus.attach()
    }

    pub fn net(&mut self, index: usize) -> &mut SimNetwork {
        &mut self.participants[index].network
    }

    /// Deliver queued frames until the bus is quiet
    pub fn deliver(&mut self, now_us: u64) {
        loop {
            let mut delivered = false;
            for p in self.participants.iter_mut() {
                while let Some(msg) = p.receiver.try_recv() {
                    p.network.handle_message(msg, now_us);
                    delivered = true;
                }
            }
            if !delivered {
                break;
            }
        }
    }

    /// Run every network's timers, then deliver the resulting traffic
    pub fn process(&mut self, now_us: u64) {
        for p in self.participants.iter_mut() {
            p.network.process(now_us);
        }
        self.deliver(now_us);
    }

    /// Call [`process`](Self::process) every `step_us` from `start_us` up to and including
    /// `end_us`
    pub fn run(&mut self, start_us: u64, end_us: u64, step_us: u64) {
        let mut now = start_us;
        while now <= end_us {
            self.process(now);
            now += step_us;
        }
    }

    /// Every frame sent on the bus since the last call
    pub fn take_frames(&mut self) -> Vec<CanMessage> {
        self.monitor.drain()
    }

    /// Every pending event of a network
    pub fn events(&mut self, index: usize) -> Vec<NetworkEvent> {
        let network = self.net(index);
        std::iter::from_fn(|| network.poll_event()).collect()
    }
}
