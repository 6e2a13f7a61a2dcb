//! Common traits

use crate::messages::CanMessage;

/// Error type for CAN send operations containing the failed message
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct CanSendError(pub CanMessage);

impl core::fmt::Display for CanSendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to send CAN message: {:?}", self.0)
    }
}

impl std::error::Error for CanSendError {}

/// A synchronous can sender
///
/// Sending must not block: implementations enqueue the frame and return.
pub trait CanSender {
    /// Send a message to the bus
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError>;
}

impl<T: CanSender + ?Sized> CanSender for &mut T {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        (**self).send(msg)
    }
}
