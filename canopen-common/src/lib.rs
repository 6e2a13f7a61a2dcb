//! Common functionality shared among the canopen crates
//!
//! This crate holds everything which both a node and a client need to agree on: the CAN frame
//! type, the wire format of each CANopen service, the description of object dictionary entries and
//! the typed values stored in them.
#![warn(missing_docs, missing_copy_implementations)]

pub mod constants;
pub mod lss;
pub mod messages;
pub mod node_id;
pub mod objects;
pub mod sdo;
pub mod timer;
pub mod traits;
pub mod value;

pub use messages::{CanId, CanMessage};
pub use node_id::NodeId;
pub use timer::Timer;
pub use value::Value;
