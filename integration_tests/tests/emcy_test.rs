use canopen_client::sdo_client::SdoOutcome;
use canopen_common::{
    messages::{Emergency, NmtCommandSpecifier, NmtState},
    objects::DataType,
    CanId, Value,
};
use canopen_network::{NetworkError, NetworkEvent};
use canopen_node::NodeError;
use integration_tests::{object_dicts, test_bus::TestBus};

mod utils;
use utils::sdo_results;

const NODE: usize = 1;

fn bus_with_node_5() -> TestBus {
    let mut bus = TestBus::new();
    bus.add_master();
    bus.add_node(5, object_dicts::minimal(0));
    bus.process(0);
    bus.events(0);
    bus.take_frames();
    bus
}

#[test]
fn test_emergency_reaches_master() {
    let mut bus = bus_with_node_5();
    let emcy = Emergency::new(0x1000, 0x01, [0; 5]);
    bus.net(NODE).raise_emergency(emcy, 10).unwrap();

    let frames = bus.take_frames();
    assert_eq!(1, frames.len());
    assert_eq!(CanId::Std(0x85), frames[0].id());
    assert_eq!(&[0x00, 0x10, 0x01, 0, 0, 0, 0, 0], frames[0].data());

    bus.deliver(10);
    assert_eq!(
        vec![NetworkEvent::Emergency { node: 5, emcy }],
        bus.events(0)
    );
    assert_eq!(Some(emcy), bus.net(0).remote_node(5).unwrap().last_emergency);

    // The error register of the node follows the last emergency
    bus.net(0)
        .sdo_upload(5, 0x1001, 0, Some(DataType::UInt8), 20)
        .unwrap();
    bus.deliver(20);
    assert_eq!(
        vec![Ok(SdoOutcome::Uploaded(Value::UInt8(1)))],
        sdo_results(&mut bus, 0)
    );
}

#[test]
fn test_error_reset() {
    let mut bus = bus_with_node_5();
    bus.net(NODE)
        .raise_emergency(Emergency::new(0x3210, 0x05, [1, 2, 3, 4, 5]), 10)
        .unwrap();
    bus.net(NODE)
        .raise_emergency(Emergency::new(0, 0, [0; 5]), 20)
        .unwrap();
    bus.deliver(20);
    let events = bus.events(0);
    assert_eq!(2, events.len());
    let NetworkEvent::Emergency { emcy, .. } = events[1] else {
        panic!("Expected an emergency, got {:?}", events[1]);
    };
    assert!(emcy.is_error_reset());
}

#[test]
fn test_no_emergency_when_stopped() {
    let mut bus = bus_with_node_5();
    bus.net(0)
        .nmt_command(NmtCommandSpecifier::EnterStopped, 5, 10)
        .unwrap();
    bus.deliver(10);
    bus.take_frames();

    let result = bus
        .net(NODE)
        .raise_emergency(Emergency::new(0x1000, 0x01, [0; 5]), 20);
    assert!(matches!(
        result,
        Err(NetworkError::Node {
            source: NodeError::ServiceNotAllowed {
                state: NmtState::Stopped
            }
        })
    ));
    assert!(bus.take_frames().is_empty());
}
