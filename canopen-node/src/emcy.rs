//! Emergency producer
use canopen_common::{
    constants::{object_ids, COB_ID_INVALID_BIT},
    messages::{Emergency, EMCY_BASE},
    CanId, CanMessage, NodeId, Value,
};
use defmt_or_log::debug;

use crate::object_dict::ObjectDictionary;

/// Builds emergency frames for a local node
///
/// The COB-ID is taken from object 0x1014 when the dictionary defines it, otherwise `0x80 +
/// node_id` is used. If object 0x1001 exists, the error register reported in each message is
/// also stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmcyProducer {
    cob_id: Option<CanId>,
}

impl EmcyProducer {
    /// Create a producer, reading the COB-ID from the dictionary
    pub fn new(node_id: NodeId, od: &ObjectDictionary) -> Self {
        let mut producer = Self { cob_id: None };
        producer.reload(node_id, od);
        producer
    }

    /// Re-read the COB-ID, e.g. after a communication reset
    pub fn reload(&mut self, node_id: NodeId, od: &ObjectDictionary) {
        self.cob_id = match od.get_u32(object_ids::EMCY_COB_ID, 0) {
            Some(raw) if raw & COB_ID_INVALID_BIT != 0 => None,
            Some(raw) if raw & (1 << 29) != 0 => Some(CanId::Extended(raw & 0x1FFF_FFFF)),
            // A base without a node ID gets the node ID added, as for the SDO parameters
            Some(raw) if raw & 0x7F == 0 && raw & 0x7FF != 0 => {
                Some(CanId::Std((raw & 0x7FF) as u16 + node_id.raw() as u16))
            }
            Some(raw) if raw & 0x7FF != 0 => Some(CanId::Std((raw & 0x7FF) as u16)),
            _ => Some(CanId::Std(EMCY_BASE + node_id.raw() as u16)),
        };
    }

    /// The ID emergencies are sent on, or None if the producer is disabled
    pub fn cob_id(&self) -> Option<CanId> {
        self.cob_id
    }

    /// Build the frame for an emergency and update the error register
    ///
    /// Returns None if the producer is disabled through object 0x1014.
    pub fn produce(&self, emcy: &Emergency, od: &mut ObjectDictionary) -> Option<CanMessage> {
        if od.contains(object_ids::ERROR_REGISTER, 0) {
            // The register is application owned; failure only means it was declared constant
            let register = Value::UInt8(emcy.error_register);
            if od.set(object_ids::ERROR_REGISTER, 0, register).is_err() {
                debug!("Error register is constant, not updated");
            }
        }
        let cob_id = self.cob_id?;
        debug!(
            "EMCY code 0x{:x} register 0x{:x}",
            emcy.error_code, emcy.error_register
        );
        Some(emcy.to_message_with_id(cob_id))
    }
}
