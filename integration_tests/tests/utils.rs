#![allow(dead_code)]
use canopen_client::sdo_client::{SdoClientError, SdoOutcome};
use canopen_common::Value;
use canopen_network::NetworkEvent;
use integration_tests::{object_dicts, test_bus::TestBus};

pub const NODE_ID: u8 = 1;

/// A bus with a master at index 0 and a booted I/O module with ID [`NODE_ID`] at index 1
pub fn master_and_io_module() -> TestBus {
    let mut bus = TestBus::new();
    bus.add_master();
    bus.add_node(NODE_ID, object_dicts::io_module(0));
    bus.process(0);
    bus.events(0);
    bus.take_frames();
    bus
}

/// The results of every SDO transfer the network at `index` completed since the last call
pub fn sdo_results(bus: &mut TestBus, index: usize) -> Vec<Result<SdoOutcome, SdoClientError>> {
    bus.events(index)
        .into_iter()
        .filter_map(|e| match e {
            NetworkEvent::SdoCompleted { completion, .. } => Some(completion.result),
            _ => None,
        })
        .collect()
}

/// Upload from the I/O module and return the single result
pub fn upload(
    bus: &mut TestBus,
    index: u16,
    sub: u8,
    data_type: Option<canopen_common::objects::DataType>,
    now_us: u64,
) -> Result<SdoOutcome, SdoClientError> {
    bus.net(0)
        .sdo_upload(NODE_ID, index, sub, data_type, now_us)
        .unwrap();
    bus.deliver(now_us);
    let mut results = sdo_results(bus, 0);
    assert_eq!(1, results.len());
    results.remove(0)
}

/// Download to the I/O module and return the single result
pub fn download(
    bus: &mut TestBus,
    index: u16,
    sub: u8,
    data: &[u8],
    now_us: u64,
) -> Result<SdoOutcome, SdoClientError> {
    bus.net(0)
        .sdo_download(NODE_ID, index, sub, data, now_us)
        .unwrap();
    bus.deliver(now_us);
    let mut results = sdo_results(bus, 0);
    assert_eq!(1, results.len());
    results.remove(0)
}

pub fn uploaded(value: impl Into<Value>) -> Result<SdoOutcome, SdoClientError> {
    Ok(SdoOutcome::Uploaded(value.into()))
}
