//! A CANopen network, composed of an optional local node and the client services used to manage
//! remote nodes
//!
//! [`Network`] is the single entry point for one bus. It owns the sending half of the transport
//! (anything implementing [`CanSender`](canopen_common::traits::CanSender)), and every received
//! frame is passed to [`Network::handle_message`], which routes it by identifier:
//!
//! - NMT commands, SYNC, SDO requests and RPDOs to the local [`Node`](canopen_node::Node)
//! - Heartbeats and observed NMT commands to the NMT master's node table
//! - SDO responses to the SDO client of the responding node
//! - EMCY, TIME and LSS responses to their consumers
//!
//! Everything the application needs to know about is queued as a [`NetworkEvent`]. A network can
//! be built in code, or from a TOML [`NetworkConfig`].
#![warn(missing_docs, missing_debug_implementations)]

pub mod config;
mod network;

pub use canopen_client as client;
pub use canopen_common as common;
pub use canopen_node as node;

pub use config::{ConfigError, NetworkConfig};
pub use network::{Network, NetworkError, NetworkEvent};
