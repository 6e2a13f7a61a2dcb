use canopen_common::{
    messages::{NmtCommandSpecifier, NmtState},
    objects::DataType,
    CanId, NodeId,
};
use canopen_network::NetworkEvent;
use integration_tests::{object_dicts, test_bus::TestBus};

mod utils;
use utils::{download, master_and_io_module, upload, uploaded, NODE_ID};

fn three_node_bus() -> TestBus {
    let mut bus = TestBus::new();
    bus.add_master();
    for id in [1, 2, 3] {
        bus.add_node(id, object_dicts::minimal(0));
    }
    bus
}

fn node_state(bus: &mut TestBus, index: usize) -> NmtState {
    bus.net(index).node().unwrap().nmt_state()
}

fn recorded_state(bus: &mut TestBus, id: u8) -> Option<NmtState> {
    bus.net(0).remote_node(id).unwrap().state
}

#[test]
fn test_bootup() {
    let mut bus = three_node_bus();
    assert_eq!(NmtState::Initializing, node_state(&mut bus, 1));

    bus.process(0);
    let frames = bus.take_frames();
    let mut bootups: Vec<_> = frames.iter().map(|f| (f.id(), f.data().to_vec())).collect();
    bootups.sort_by_key(|(id, _)| id.raw());
    assert_eq!(
        vec![
            (CanId::Std(0x701), vec![0]),
            (CanId::Std(0x702), vec![0]),
            (CanId::Std(0x703), vec![0]),
        ],
        bootups
    );

    let bootup_events = bus
        .events(0)
        .into_iter()
        .filter(|e| matches!(e, NetworkEvent::Bootup { .. }))
        .count();
    assert_eq!(3, bootup_events);
    for index in 1..=3 {
        assert_eq!(NmtState::PreOperational, node_state(&mut bus, index));
    }
}

#[test]
fn test_broadcast_and_targeted_commands() {
    let mut bus = three_node_bus();
    bus.process(0);

    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterOperational, 0, 10)
        .unwrap();
    bus.deliver(10);
    for (index, id) in [(1, 1), (2, 2), (3, 3)] {
        assert_eq!(NmtState::Operational, node_state(&mut bus, index));
        assert_eq!(Some(NmtState::Operational), recorded_state(&mut bus, id));
    }

    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterStopped, 2, 20)
        .unwrap();
    bus.deliver(20);
    assert_eq!(NmtState::Operational, node_state(&mut bus, 1));
    assert_eq!(NmtState::Stopped, node_state(&mut bus, 2));
    assert_eq!(NmtState::Operational, node_state(&mut bus, 3));
    assert_eq!(Some(NmtState::Operational), recorded_state(&mut bus, 1));
    assert_eq!(Some(NmtState::Stopped), recorded_state(&mut bus, 2));
    assert_eq!(Some(NmtState::Operational), recorded_state(&mut bus, 3));

    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterPreOperational, 0, 30)
        .unwrap();
    bus.deliver(30);
    for index in 1..=3 {
        assert_eq!(NmtState::PreOperational, node_state(&mut bus, index));
    }

    let frame = bus.take_frames().pop().unwrap();
    assert_eq!(CanId::Std(0), frame.id());
    assert_eq!(&[128, 0], frame.data());
}

#[test]
fn test_commands_between_other_nodes_are_observed() {
    let mut bus = three_node_bus();
    // A second master, which only watches
    let observer = bus.add_master();
    bus.process(0);

    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterStopped, 3, 10)
        .unwrap();
    bus.deliver(10);
    let watched = bus.net(observer).remote_node(3).unwrap().state;
    assert_eq!(Some(NmtState::Stopped), watched);
    assert_eq!(
        Some(NmtState::PreOperational),
        bus.net(observer).remote_node(1).unwrap().state
    );
}

#[test]
fn test_reset_node_restores_defaults_and_reboots() {
    let mut bus = master_and_io_module();
    download(&mut bus, 0x2001, 0, &7u32.to_le_bytes(), 0).unwrap();
    assert_eq!(
        uploaded(7u32),
        upload(&mut bus, 0x2001, 0, Some(DataType::UInt32), 0)
    );

    bus.net(0)
        .nmt_command(NmtCommandSpecifier::ResetNode, NODE_ID, 10)
        .unwrap();
    bus.deliver(10);
    assert_eq!(NmtState::Initializing, node_state(&mut bus, 1));
    assert_eq!(
        Some(NmtState::Initializing),
        bus.net(0).remote_node(NODE_ID).unwrap().state
    );

    bus.process(20);
    assert_eq!(NmtState::PreOperational, node_state(&mut bus, 1));
    let node = NodeId::new(NODE_ID).unwrap();
    assert!(bus.events(0).contains(&NetworkEvent::Bootup { node }));
    assert_eq!(
        uploaded(0u32),
        upload(&mut bus, 0x2001, 0, Some(DataType::UInt32), 30)
    );
}

#[test]
fn test_reset_communication_keeps_values() {
    let mut bus = master_and_io_module();
    download(&mut bus, 0x2001, 0, &7u32.to_le_bytes(), 0).unwrap();

    bus.net(0)
        .nmt_command(NmtCommandSpecifier::ResetCommunication, NODE_ID, 10)
        .unwrap();
    bus.deliver(10);
    bus.process(20);
    assert_eq!(NmtState::PreOperational, node_state(&mut bus, 1));
    assert_eq!(
        uploaded(7u32),
        upload(&mut bus, 0x2001, 0, Some(DataType::UInt32), 30)
    );
}

#[test]
fn test_sdo_traffic_creates_records() {
    let mut bus = TestBus::new();
    bus.add_node(2, object_dicts::minimal(0));
    bus.process(0);
    // Both join after the bootup, so only the SDO exchange can tell them about node 2
    let client = bus.add_master();
    let observer = bus.add_master();
    assert!(bus.net(client).remote_node(2).is_none());
    assert!(bus.net(observer).remote_node(2).is_none());

    bus.net(client)
        .sdo_upload(2, 0x1000, 0, Some(DataType::UInt32), 10)
        .unwrap();
    bus.deliver(10);
    for index in [client, observer] {
        let seen = *bus.net(index).remote_node(2).unwrap();
        assert_eq!(None, seen.state);
        assert_eq!(None, seen.last_heartbeat_us);
    }
}
