//! Process data objects
//!
//! A PDO maps an ordered list of sub objects, each truncated to a bit length, into a single frame
//! of up to 64 bits. Fields are packed little endian starting at bit 0 with no padding.
use canopen_common::{
    objects::{DataType, ObjectId},
    CanId, CanMessage, Timer, Value,
};
use serde::Deserialize;
use snafu::{ensure, ResultExt, Snafu};

use crate::object_dict::{ObjectDictionary, OdError};

/// Maximum number of bits a single PDO can carry
pub const MAX_PDO_BITS: u32 = 64;

/// One field of a PDO mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MappingEntry {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
    /// Number of bits of the value carried in the PDO
    pub bits: u8,
}

impl MappingEntry {
    /// Create a mapping entry
    pub const fn new(index: u16, sub: u8, bits: u8) -> Self {
        Self { index, sub, bits }
    }

    /// The mapped sub object
    pub fn id(&self) -> ObjectId {
        ObjectId::new(self.index, self.sub)
    }
}

/// Determines when a TPDO is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpdoTrigger {
    /// Send every `interval_ms` milliseconds
    Periodic {
        /// Transmit interval
        interval_ms: u32,
    },
    /// Send whenever one of the mapped sub objects is written
    OnChange,
    /// Send on every Nth received SYNC, with N in 1..=240
    Sync {
        /// Number of SYNCs between transmissions
        every: u8,
    },
}

/// Configuration of a transmit PDO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpdoConfig {
    /// The ID the PDO is sent on
    pub cob_id: CanId,
    /// When the PDO is sent
    pub trigger: TpdoTrigger,
    /// Minimum time between two transmissions, in microseconds. 0 disables inhibiting.
    pub inhibit_us: u64,
    /// The mapped fields, in frame order
    pub mappings: Vec<MappingEntry>,
}

/// Configuration of a receive PDO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpdoConfig {
    /// The ID the PDO is received on
    pub cob_id: CanId,
    /// The mapped fields, in frame order
    pub mappings: Vec<MappingEntry>,
}

/// Errors raised when configuring or receiving PDOs
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PdoError {
    /// The mapped fields add up to more than 64 bits
    #[snafu(display("Mapping is {bits} bits long, the limit is {MAX_PDO_BITS}"))]
    MappingTooLong {
        /// Total mapped bits
        bits: u32,
    },
    /// The sub object may not be mapped into this kind of PDO
    #[snafu(display("0x{index:04X}sub{sub} cannot be mapped"))]
    NotMappable {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
    },
    /// The bit length is 0, wider than the type, or truncates a floating point value
    #[snafu(display("Invalid bit length {bits} for 0x{index:04X}sub{sub}"))]
    InvalidBitLength {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
        /// The requested bit length
        bits: u8,
    },
    /// A received PDO is shorter than its mapping
    #[snafu(display("PDO on {cob_id} carries {actual} bytes, mapping needs {expected}"))]
    PayloadTooShort {
        /// ID of the received frame
        cob_id: CanId,
        /// Bytes required by the mapping
        expected: usize,
        /// Bytes received
        actual: usize,
    },
    /// The object dictionary rejected an access
    #[snafu(display("Object dictionary error: {source}"))]
    Od {
        /// The underlying error
        source: OdError,
    },
}

/// Which side of the bus a mapping is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Transmit,
    Receive,
}

fn validate_mapping(
    od: &ObjectDictionary,
    mappings: &[MappingEntry],
    direction: Direction,
) -> Result<(), PdoError> {
    let mut total_bits = 0u32;
    for entry in mappings {
        let MappingEntry { index, sub, bits } = *entry;
        let info = od.sub_info(index, sub).context(OdSnafu)?;
        let allowed = match direction {
            Direction::Transmit => {
                info.pdo_mapping.supports_tpdo() && info.access_type.is_readable()
            }
            Direction::Receive => {
                info.pdo_mapping.supports_rpdo() && info.access_type.is_writable()
            }
        };
        ensure!(
            allowed && !info.data_type.is_str(),
            NotMappableSnafu { index, sub }
        );
        let width = (info.size * 8) as u8;
        let bits_ok = if info.data_type.is_float() {
            bits == width
        } else {
            bits >= 1 && bits <= width
        };
        ensure!(bits_ok, InvalidBitLengthSnafu { index, sub, bits });
        total_bits += bits as u32;
    }
    ensure!(
        total_bits <= MAX_PDO_BITS,
        MappingTooLongSnafu { bits: total_bits }
    );
    Ok(())
}

fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn mapped_bytes(mappings: &[MappingEntry]) -> usize {
    let bits: usize = mappings.iter().map(|m| m.bits as usize).sum();
    bits.div_ceil(8)
}

/// Pack the current values of the mapped sub objects into a PDO payload
///
/// Returns the payload and the number of bytes used.
pub fn pack(
    od: &ObjectDictionary,
    mappings: &[MappingEntry],
) -> Result<([u8; 8], usize), PdoError> {
    let mut packed = 0u64;
    let mut offset = 0u32;
    for entry in mappings {
        let raw = od.get(entry.index, entry.sub).context(OdSnafu)?.to_bytes();
        let mut bytes = [0u8; 8];
        let n = raw.len().min(8);
        bytes[..n].copy_from_slice(&raw[..n]);
        let field = u64::from_le_bytes(bytes) & mask(entry.bits);
        if offset < 64 {
            packed |= field << offset;
        }
        offset += entry.bits as u32;
    }
    Ok((packed.to_le_bytes(), mapped_bytes(mappings)))
}

fn field_value(data_type: DataType, field: u64, bits: u8) -> Option<Value> {
    let width = data_type.fixed_size()?;
    let bytes = if data_type.is_signed() && bits < 64 {
        let shift = 64 - bits as u32;
        (((field << shift) as i64) >> shift).to_le_bytes()
    } else {
        field.to_le_bytes()
    };
    Value::from_bytes(data_type, &bytes[..width]).ok()
}

/// Unpack a received PDO payload into typed values, one per mapping entry
///
/// Nothing is returned unless every field can be decoded and written, so a caller applying the
/// values never leaves a PDO half written.
pub fn unpack(
    od: &ObjectDictionary,
    cob_id: CanId,
    mappings: &[MappingEntry],
    payload: &[u8],
) -> Result<Vec<(ObjectId, Value)>, PdoError> {
    let expected = mapped_bytes(mappings);
    ensure!(
        payload.len() >= expected,
        PayloadTooShortSnafu {
            cob_id,
            expected,
            actual: payload.len(),
        }
    );
    let mut bytes = [0u8; 8];
    let n = payload.len().min(8);
    bytes[..n].copy_from_slice(&payload[..n]);
    let packed = u64::from_le_bytes(bytes);

    let mut values = Vec::with_capacity(mappings.len());
    let mut offset = 0u32;
    for entry in mappings {
        let info = od.sub_info(entry.index, entry.sub).context(OdSnafu)?;
        ensure!(
            info.access_type.is_writable(),
            NotMappableSnafu {
                index: entry.index,
                sub: entry.sub,
            }
        );
        let data_type = info.data_type;
        let field = if offset < 64 {
            (packed >> offset) & mask(entry.bits)
        } else {
            0
        };
        offset += entry.bits as u32;
        let value = field_value(data_type, field, entry.bits).ok_or(PdoError::NotMappable {
            index: entry.index,
            sub: entry.sub,
        })?;
        values.push((entry.id(), value));
    }
    Ok(values)
}

#[derive(Debug)]
struct Tpdo {
    config: TpdoConfig,
    timer: Timer,
    pending: bool,
    last_sent_us: Option<u64>,
    sync_count: u8,
}

impl Tpdo {
    fn maps(&self, id: ObjectId) -> bool {
        self.config.mappings.iter().any(|m| m.id() == id)
    }

    fn inhibited(&self, now_us: u64) -> bool {
        match self.last_sent_us {
            Some(last) => now_us < last.saturating_add(self.config.inhibit_us),
            None => false,
        }
    }
}

/// Runs the configured TPDOs and decodes received RPDOs for one node
#[derive(Debug, Default)]
pub struct PdoEngine {
    tpdos: Vec<Tpdo>,
    rpdos: Vec<RpdoConfig>,
    running: bool,
}

impl PdoEngine {
    /// Create an engine with no PDOs
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transmit PDO, returning its number
    pub fn add_tpdo(
        &mut self,
        config: TpdoConfig,
        od: &ObjectDictionary,
    ) -> Result<usize, PdoError> {
        validate_mapping(od, &config.mappings, Direction::Transmit)?;
        self.tpdos.push(Tpdo {
            config,
            timer: Timer::new(),
            pending: false,
            last_sent_us: None,
            sync_count: 0,
        });
        Ok(self.tpdos.len() - 1)
    }

    /// Add a receive PDO, returning its number
    pub fn add_rpdo(
        &mut self,
        config: RpdoConfig,
        od: &ObjectDictionary,
    ) -> Result<usize, PdoError> {
        validate_mapping(od, &config.mappings, Direction::Receive)?;
        self.rpdos.push(config);
        Ok(self.rpdos.len() - 1)
    }

    /// The configured TPDOs
    pub fn tpdos(&self) -> impl Iterator<Item = &TpdoConfig> {
        self.tpdos.iter().map(|t| &t.config)
    }

    /// The configured RPDOs
    pub fn rpdos(&self) -> impl Iterator<Item = &RpdoConfig> {
        self.rpdos.iter()
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop)
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start transmitting, e.g. on entering Operational
    pub fn start(&mut self, now_us: u64) {
        if self.running {
            return;
        }
        self.running = true;
        for tpdo in &mut self.tpdos {
            if let TpdoTrigger::Periodic { interval_ms } = tpdo.config.trigger {
                tpdo.timer.start(now_us, interval_ms as u64 * 1000);
            }
            tpdo.sync_count = 0;
        }
    }

    /// Stop transmitting and drop any deferred transmissions
    pub fn stop(&mut self) {
        self.running = false;
        for tpdo in &mut self.tpdos {
            tpdo.timer.cancel();
            tpdo.pending = false;
        }
    }

    /// Notify the engine that a sub object was written
    ///
    /// Event driven TPDOs mapping the object are sent immediately unless inhibited, in which case
    /// the transmission is deferred to a later [`process`](Self::process) call.
    pub fn object_updated(
        &mut self,
        id: ObjectId,
        now_us: u64,
        od: &ObjectDictionary,
        send: &mut dyn FnMut(CanMessage),
    ) {
        if !self.running {
            return;
        }
        for tpdo in &mut self.tpdos {
            if tpdo.config.trigger == TpdoTrigger::OnChange && tpdo.maps(id) {
                tpdo.pending = true;
            }
        }
        self.flush(now_us, od, send);
    }

    /// Handle a received SYNC
    pub fn sync_received(
        &mut self,
        now_us: u64,
        od: &ObjectDictionary,
        send: &mut dyn FnMut(CanMessage),
    ) {
        if !self.running {
            return;
        }
        for tpdo in &mut self.tpdos {
            if let TpdoTrigger::Sync { every } = tpdo.config.trigger {
                tpdo.sync_count = tpdo.sync_count.saturating_add(1);
                if tpdo.sync_count >= every.max(1) {
                    tpdo.sync_count = 0;
                    tpdo.pending = true;
                }
            }
        }
        self.flush(now_us, od, send);
    }

    /// Drive periodic and deferred transmissions
    pub fn process(
        &mut self,
        now_us: u64,
        od: &ObjectDictionary,
        send: &mut dyn FnMut(CanMessage),
    ) {
        if !self.running {
            return;
        }
        for tpdo in &mut self.tpdos {
            if let TpdoTrigger::Periodic { interval_ms } = tpdo.config.trigger {
                // PDOs added while running start their period now
                if !tpdo.timer.is_armed() {
                    tpdo.timer.start(now_us, interval_ms as u64 * 1000);
                }
                if let Some(deadline) = tpdo.timer.deadline() {
                    if tpdo.timer.take_expired(now_us) {
                        tpdo.pending = true;
                        let interval = interval_ms as u64 * 1000;
                        let base = if deadline + interval > now_us {
                            deadline
                        } else {
                            now_us
                        };
                        tpdo.timer.start(base, interval);
                    }
                }
            }
        }
        self.flush(now_us, od, send);
    }

    fn flush(&mut self, now_us: u64, od: &ObjectDictionary, send: &mut dyn FnMut(CanMessage)) {
        for tpdo in &mut self.tpdos {
            if !tpdo.pending || tpdo.inhibited(now_us) {
                continue;
            }
            tpdo.pending = false;
            // Mappings were validated against this dictionary, so packing only fails if the
            // dictionary was swapped underneath us
            if let Ok((data, len)) = pack(od, &tpdo.config.mappings) {
                send(CanMessage::new(tpdo.config.cob_id, &data[..len]));
                tpdo.last_sent_us = Some(now_us);
            }
        }
    }

    /// Time of the earliest pending periodic or deferred transmission
    pub fn next_deadline_us(&self) -> Option<u64> {
        self.tpdos
            .iter()
            .filter_map(|t| {
                let deferred = if t.pending {
                    t.last_sent_us.map(|l| l + t.config.inhibit_us)
                } else {
                    None
                };
                match (t.timer.deadline(), deferred) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            })
            .min()
    }

    /// Find the RPDO configured for `cob_id`
    pub fn rpdo_for(&self, cob_id: CanId) -> Option<&RpdoConfig> {
        self.rpdos.iter().find(|r| r.cob_id == cob_id)
    }

    /// Decode a received frame if it matches an RPDO
    ///
    /// Returns None if no RPDO uses the frame's ID.
    pub fn receive(
        &self,
        msg: &CanMessage,
        od: &ObjectDictionary,
    ) -> Option<Result<Vec<(ObjectId, Value)>, PdoError>> {
        let rpdo = self.rpdo_for(msg.id())?;
        Some(unpack(od, msg.id(), &rpdo.mappings, msg.data()))
    }
}
