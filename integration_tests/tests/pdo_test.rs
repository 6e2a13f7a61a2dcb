use canopen_common::{
    messages::NmtCommandSpecifier, traits::CanSender, CanId, CanMessage, NodeId, Value,
};
use canopen_network::Network;
use canopen_node::{
    pdo::{MappingEntry, RpdoConfig, TpdoConfig, TpdoTrigger},
    Node, NodeSettings,
};
use integration_tests::{object_dicts, test_bus::TestBus};

const MS: u64 = 1000;

const PRODUCER: usize = 1;
const CONSUMER: usize = 2;

const OUTPUTS_MAPPING: [MappingEntry; 3] = [
    MappingEntry::new(0x2000, 1, 4),
    MappingEntry::new(0x2000, 2, 4),
    MappingEntry::new(0x2000, 3, 4),
];

fn tpdo(
    cob_id: u16,
    trigger: TpdoTrigger,
    inhibit_us: u64,
    mappings: &[MappingEntry],
) -> TpdoConfig {
    TpdoConfig {
        cob_id: CanId::Std(cob_id),
        trigger,
        inhibit_us,
        mappings: mappings.to_vec(),
    }
}

fn rpdo(cob_id: u16, mappings: &[MappingEntry]) -> RpdoConfig {
    RpdoConfig {
        cob_id: CanId::Std(cob_id),
        mappings: mappings.to_vec(),
    }
}

/// A master, a producer with node ID 1 and a consumer with node ID 2, all booted
fn pdo_bus(tpdos: Vec<TpdoConfig>, rpdos: Vec<RpdoConfig>) -> TestBus {
    let mut bus = TestBus::new();
    bus.add_master();
    bus.add(|sender| {
        let mut node = Node::new(
            NodeId::new(1).unwrap(),
            object_dicts::io_module(0),
            NodeSettings::default(),
        );
        for config in tpdos {
            node.add_tpdo(config).unwrap();
        }
        Network::with_node(sender, node)
    });
    bus.add(|sender| {
        let mut node = Node::new(
            NodeId::new(2).unwrap(),
            object_dicts::io_module(0),
            NodeSettings::default(),
        );
        for config in rpdos {
            node.add_rpdo(config).unwrap();
        }
        Network::with_node(sender, node)
    });
    bus.process(0);
    bus.take_frames();
    bus
}

fn start_all(bus: &mut TestBus, now_us: u64) {
    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterOperational, 0, now_us)
        .unwrap();
    bus.deliver(now_us);
}

fn consumer_value(bus: &mut TestBus, index: u16, sub: u8) -> Value {
    bus.net(CONSUMER).read_local(index, sub).unwrap()
}

fn frames_on(bus: &mut TestBus, cob_id: u16) -> Vec<CanMessage> {
    bus.take_frames()
        .into_iter()
        .filter(|f| f.id() == CanId::Std(cob_id))
        .collect()
}

#[test]
fn test_periodic_bit_packed_pdo() {
    let mut bus = pdo_bus(
        vec![tpdo(
            0x181,
            TpdoTrigger::Periodic { interval_ms: 100 },
            0,
            &OUTPUTS_MAPPING,
        )],
        vec![rpdo(0x181, &OUTPUTS_MAPPING)],
    );
    let producer = bus.net(PRODUCER);
    producer.write_local(0x2000, 1, 0xAu8, 0).unwrap();
    producer.write_local(0x2000, 2, -3i8, 0).unwrap();
    producer.write_local(0x2000, 3, 5u16, 0).unwrap();

    // Nothing is sent before the nodes are Operational
    bus.run(10 * MS, 500 * MS, 10 * MS);
    assert!(frames_on(&mut bus, 0x181).is_empty());

    start_all(&mut bus, 500 * MS);
    bus.run(510 * MS, 1000 * MS, 10 * MS);
    let frames = frames_on(&mut bus, 0x181);
    assert_eq!(5, frames.len());
    // 0xA in bits 0..4, -3 as 0xD in bits 4..8, 5 in bits 8..12
    assert!(frames.iter().all(|f| f.data() == [0xDA, 0x05]));

    assert_eq!(Value::UInt8(0xA), consumer_value(&mut bus, 0x2000, 1));
    assert_eq!(Value::Int8(-3), consumer_value(&mut bus, 0x2000, 2));
    assert_eq!(Value::UInt16(5), consumer_value(&mut bus, 0x2000, 3));
}

#[test]
fn test_on_change_pdo_is_sent_immediately() {
    let counter = [MappingEntry::new(0x2001, 0, 32)];
    let mut bus = pdo_bus(
        vec![tpdo(0x182, TpdoTrigger::OnChange, 10 * MS, &counter)],
        vec![rpdo(0x182, &counter)],
    );
    start_all(&mut bus, 0);

    bus.net(PRODUCER)
        .write_local(0x2001, 0, 42u32, 1000 * MS)
        .unwrap();
    // Already on the bus, no process call needed
    let frames = frames_on(&mut bus, 0x182);
    assert_eq!(1, frames.len());
    assert_eq!(&[42, 0, 0, 0], frames[0].data());
    bus.deliver(1000 * MS);
    assert_eq!(Value::UInt32(42), consumer_value(&mut bus, 0x2001, 0));

    // Inside the inhibit time the transmission is deferred
    bus.net(PRODUCER)
        .write_local(0x2001, 0, 43u32, 1005 * MS)
        .unwrap();
    assert!(frames_on(&mut bus, 0x182).is_empty());
    bus.process(1009 * MS);
    assert!(frames_on(&mut bus, 0x182).is_empty());
    bus.process(1010 * MS);
    let frames = frames_on(&mut bus, 0x182);
    assert_eq!(1, frames.len());
    assert_eq!(&[43, 0, 0, 0], frames[0].data());
    assert_eq!(Value::UInt32(43), consumer_value(&mut bus, 0x2001, 0));
}

#[test]
fn test_sync_triggered_pdo() {
    let measurement = [MappingEntry::new(0x2003, 0, 32)];
    let mut bus = pdo_bus(
        vec![tpdo(0x183, TpdoTrigger::Sync { every: 2 }, 0, &measurement)],
        vec![],
    );
    bus.net(PRODUCER)
        .write_local(0x2003, 0, 0x1234_5678u32, 0)
        .unwrap();
    start_all(&mut bus, 0);
    bus.net(0).enable_sync(10 * MS, 0, 0);

    bus.run(10 * MS, 100 * MS, 10 * MS);
    let frames = bus.take_frames();
    let syncs = frames.iter().filter(|f| f.id() == CanId::Std(0x80)).count();
    let pdos: Vec<_> = frames
        .iter()
        .filter(|f| f.id() == CanId::Std(0x183))
        .collect();
    assert_eq!(10, syncs);
    assert_eq!(5, pdos.len());
    assert_eq!(&[0x78, 0x56, 0x34, 0x12], pdos[0].data());
}

#[test]
fn test_no_pdos_outside_operational() {
    let counter = [MappingEntry::new(0x2001, 0, 32)];
    let mut bus = pdo_bus(
        vec![
            tpdo(
                0x181,
                TpdoTrigger::Periodic { interval_ms: 10 },
                0,
                &OUTPUTS_MAPPING,
            ),
            tpdo(0x182, TpdoTrigger::OnChange, 0, &counter),
        ],
        vec![rpdo(0x182, &counter)],
    );
    start_all(&mut bus, 0);
    bus.run(10 * MS, 50 * MS, 10 * MS);
    assert_eq!(5, frames_on(&mut bus, 0x181).len());

    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterStopped, 1, 50 * MS)
        .unwrap();
    bus.deliver(50 * MS);
    bus.net(PRODUCER).write_local(0x2001, 0, 1u32, 55 * MS).unwrap();
    bus.run(60 * MS, 200 * MS, 10 * MS);
    let frames = bus.take_frames();
    assert!(frames.iter().all(|f| f.id() != CanId::Std(0x181)));
    assert!(frames.iter().all(|f| f.id() != CanId::Std(0x182)));

    // A PreOperational consumer ignores RPDOs
    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterPreOperational, 2, 200 * MS)
        .unwrap();
    bus.deliver(200 * MS);
    let mut raw = bus.net(0).sender().clone();
    raw.send(CanMessage::new(CanId::Std(0x182), &[9, 0, 0, 0]))
        .unwrap();
    bus.deliver(200 * MS);
    assert_eq!(Value::UInt32(0), consumer_value(&mut bus, 0x2001, 0));

    // And applies them once Operational
    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterOperational, 2, 210 * MS)
        .unwrap();
    bus.deliver(210 * MS);
    raw.send(CanMessage::new(CanId::Std(0x182), &[9, 0, 0, 0]))
        .unwrap();
    bus.deliver(210 * MS);
    assert_eq!(Value::UInt32(9), consumer_value(&mut bus, 0x2001, 0));
}
