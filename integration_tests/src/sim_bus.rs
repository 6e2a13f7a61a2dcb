//! A simulated CAN bus
//!
//! Every participant attached to the bus gets a sender and a receiver. A frame sent by one
//! participant is queued for every other participant; it is never delivered back to its sender,
//! just like on a real bus.
use std::{cell::RefCell, rc::Rc};

use canopen_common::{
    traits::{CanSendError, CanSender},
    CanMessage,
};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

type SharedQueueList = Vec<(usize, UnboundedSender<CanMessage>)>;

#[derive(Debug, Default)]
pub struct SimBus {
    queues: Rc<RefCell<SharedQueueList>>,
    next_id: usize,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new participant
    pub fn attach(&mut self) -> (SimBusSender, SimBusReceiver) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = unbounded();
        self.queues.borrow_mut().push((id, tx));
        let sender = SimBusSender {
            id,
            queues: self.queues.clone(),
        };
        (sender, SimBusReceiver { receiver: rx })
    }
}

#[derive(Debug, Clone)]
pub struct SimBusSender {
    id: usize,
    queues: Rc<RefCell<SharedQueueList>>,
}

impl CanSender for SimBusSender {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        for (id, queue) in self.queues.borrow().iter() {
            if *id == self.id {
                continue;
            }
            queue
                .unbounded_send(msg)
                .map_err(|e| CanSendError(e.into_inner()))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimBusReceiver {
    receiver: UnboundedReceiver<CanMessage>,
}

impl SimBusReceiver {
    /// Take the next queued frame, if any
    pub fn try_recv(&mut self) -> Option<CanMessage> {
        self.receiver.try_next().ok().flatten()
    }

    /// Take every queued frame
    pub fn drain(&mut self) -> Vec<CanMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use canopen_common::CanId;

    use super::*;

    #[test]
    fn test_no_loopback() {
        let mut bus = SimBus::new();
        let (mut a_tx, mut a_rx) = bus.attach();
        let (_b_tx, mut b_rx) = bus.attach();
        let (_c_tx, mut c_rx) = bus.attach();

        a_tx.send(CanMessage::new(CanId::Std(0x123), &[1])).unwrap();
        assert_eq!(None, a_rx.try_recv());
        assert_eq!(1, b_rx.drain().len());
        assert_eq!(1, c_rx.drain().len());
    }
}
