//! Client side CANopen services
//!
//! The crate provides the engines a network master uses to talk to remote nodes:
//!
//! - An [SDO client](SdoClient) for reading/writing a node's object dictionary via its SDO server
//! - An [NMT master](NmtMaster) for commanding node states and monitoring heartbeats
//! - A [SYNC producer](SyncProducer) and a [TIME stamp producer](TimeProducer)
//! - An [LSS master](LssMaster) for configuring node IDs of un-configured nodes
//!
//! None of the engines perform I/O or block. Each is driven by received frames and by periodic
//! `process` calls taking the current time in microseconds, and emits frames through a `send`
//! callback. `canopen-network` wires them to a bus.
#![warn(missing_docs, missing_debug_implementations)]

pub mod lss_master;
pub mod nmt_master;
pub mod sdo_client;
pub mod sync_producer;
pub mod time_producer;

pub use canopen_common as common;

pub use lss_master::{LssError, LssEvent, LssMaster};
pub use nmt_master::{NmtEvent, NmtMaster, RemoteNode};
pub use sdo_client::{SdoClient, SdoClientError, SdoCompletion, SdoOutcome};
pub use sync_producer::SyncProducer;
pub use time_producer::TimeProducer;
