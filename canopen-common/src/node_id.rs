//! Node ID type
use serde::Deserialize;
use snafu::Snafu;

/// A validated CANopen node ID
///
/// Node IDs are in the range 1..=127. 0 is reserved as the broadcast target of NMT commands and is
/// never a valid node ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub struct NodeId(u8);

impl NodeId {
    /// The largest valid node ID
    pub const MAX: u8 = 127;

    /// Create a node ID, failing if `value` is outside 1..=127
    pub fn new(value: u8) -> Result<Self, InvalidNodeIdError> {
        if value > 0 && value <= Self::MAX {
            Ok(NodeId(value))
        } else {
            InvalidNodeIdSnafu { value }.fail()
        }
    }

    /// The numeric value
    pub fn raw(&self) -> u8 {
        self.0
    }
}

/// Error returned when creating a [`NodeId`] from an out of range value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("Invalid node ID {value}"))]
pub struct InvalidNodeIdError {
    /// The rejected value
    pub value: u8,
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.raw()
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range() {
        assert!(NodeId::new(0).is_err());
        assert!(NodeId::new(128).is_err());
        assert_eq!(1, NodeId::new(1).unwrap().raw());
        assert_eq!(127, NodeId::try_from(127).unwrap().raw());
    }
}
