//! A library to implement a CANopen node in Rust
//!
//! canopen-node holds the server side of a CANopen (CiA301) device. It provides the following
//! features:
//!
//! * An *object dictionary*, built from a list of entry definitions, which stores typed values and
//!   enforces their access types.
//! * An *SDO* server, allowing a remote client to access objects in the dictionary using expedited
//!   or segmented transfers.
//! * The *NMT* slave state machine, including the bootup message and the heartbeat producer.
//! * Transmit and receive *PDOs*, mapping objects bit-accurately into frames, sent periodically, on
//!   SYNC or whenever a mapped object is written.
//! * An *EMCY* producer.
//!
//! # Driving a node
//!
//! A [`Node`] does no I/O of its own and never reads a clock. The application passes every
//! received frame to [`Node::handle_message`], and calls [`Node::process`] periodically. Both
//! take the current time in microseconds and a callback used to send frames.
//!
//! ```
//! use canopen_node::{
//!     common::{objects::DataType, NodeId},
//!     object_dict::{schema, ObjectDictionary},
//!     Node, NodeSettings,
//! };
//!
//! let mut defs = schema::communication_objects("example", 1000);
//! defs.push(schema::var(0x2000, "setpoint", DataType::UInt32));
//! let od = ObjectDictionary::from_definitions(defs).unwrap();
//! let mut node = Node::new(NodeId::new(10).unwrap(), od, NodeSettings::default());
//!
//! let mut outbox = Vec::new();
//! node.process(0, &mut |msg| outbox.push(msg));
//! // The first process call sends the bootup message
//! assert_eq!(1, outbox.len());
//! ```
#![warn(missing_docs, missing_debug_implementations)]

pub mod emcy;
pub mod nmt;
mod node;
pub mod object_dict;
pub mod pdo;
pub mod sdo_server;

pub use canopen_common as common;

pub use node::{Node, NodeError, NodeSettings};
pub use object_dict::ObjectDictionary;
