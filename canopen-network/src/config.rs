//! TOML network configuration
use std::path::Path;

use canopen_client::{lss_master::DEFAULT_LSS_TIMEOUT_US, sync_producer::DEFAULT_SYNC_OVERFLOW};
use canopen_common::{objects::DataType, CanId, Value};
use canopen_node::{
    pdo::{MappingEntry, RpdoConfig, TpdoConfig, TpdoTrigger},
    NodeSettings,
};
use serde::{de, Deserialize, Deserializer};
use snafu::{ResultExt, Snafu};

/// Error returned when loading network configuration files
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The file could not be read
    #[snafu(display("IO error loading {path}: {source:?}"))]
    Io {
        /// The path of the file
        path: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The content is not a valid configuration
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization {
        /// The parse error
        source: toml::de::Error,
    },
    /// A TPDO uses a transmission type which is not supported
    #[snafu(display("Unsupported PDO transmission type {value}"))]
    InvalidTransmissionType {
        /// The configured transmission type
        value: u8,
    },
}

fn default_sdo_timeout_ms() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_transmission_type() -> u8 {
    254
}

fn default_sync_overflow() -> u8 {
    DEFAULT_SYNC_OVERFLOW
}

fn default_lss_timeout_ms() -> u32 {
    (DEFAULT_LSS_TIMEOUT_US / 1000) as u32
}

/// Configuration of a [`Network`](crate::Network)
///
/// Every section is optional:
///
/// ```toml
/// sdo_timeout_ms = 500
///
/// [local_node]
/// node_id = 1
/// heartbeat_period_ms = 100
///
/// [[local_node.tpdo]]
/// cob_id = 0x181
/// transmission_type = 254
/// event_timer_ms = 50
/// mappings = [{ index = 0x2000, sub = 0, bits = 16 }]
///
/// [[local_node.store]]
/// index = 0x2001
/// sub = 0
/// type = "uint32"
/// value = 12
///
/// [[heartbeat_consumer]]
/// node = 2
/// timeout_ms = 200
///
/// [sync]
/// period_ms = 10
///
/// [time]
/// period_ms = 1000
///
/// [lss]
/// enabled = true
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Time SDO clients wait for each response
    #[serde(default = "default_sdo_timeout_ms")]
    pub sdo_timeout_ms: u32,
    /// The node hosted by this process, if any
    #[serde(default)]
    pub local_node: Option<LocalNodeConfig>,
    /// Remote nodes whose heartbeat is monitored
    #[serde(default)]
    pub heartbeat_consumer: Vec<HeartbeatConsumerConfig>,
    /// SYNC producer
    #[serde(default)]
    pub sync: Option<SyncConfig>,
    /// TIME stamp producer
    #[serde(default)]
    pub time: Option<TimeConfig>,
    /// LSS master
    #[serde(default)]
    pub lss: Option<LssConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            sdo_timeout_ms: default_sdo_timeout_ms(),
            local_node: None,
            heartbeat_consumer: Vec::new(),
            sync: None,
            time: None,
            lss: None,
        }
    }
}

impl NetworkConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<NetworkConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Read a configuration from a string
    pub fn load_from_str(s: &str) -> Result<NetworkConfig, ConfigError> {
        toml::from_str(s).context(TomlDeserializationSnafu)
    }
}

/// Configuration of the local node
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalNodeConfig {
    /// The node ID, 1 to 127
    pub node_id: u8,
    /// Heartbeat period. When absent, object 0x1017 is used.
    #[serde(default)]
    pub heartbeat_period_ms: Option<u16>,
    /// Time the SDO server waits for the next segment of a transfer
    #[serde(default = "default_sdo_timeout_ms")]
    pub sdo_timeout_ms: u32,
    /// Transmit PDOs
    #[serde(default)]
    pub tpdo: Vec<PdoConfig>,
    /// Receive PDOs
    #[serde(default)]
    pub rpdo: Vec<PdoConfig>,
    /// Values written to the object dictionary at startup
    #[serde(default, deserialize_with = "deserialize_store")]
    pub store: Vec<Store>,
}

impl LocalNodeConfig {
    /// The run time settings of the node
    pub fn settings(&self) -> NodeSettings {
        NodeSettings {
            heartbeat_period_ms: self.heartbeat_period_ms,
            sdo_timeout_ms: self.sdo_timeout_ms,
        }
    }
}

/// Represents the configuration parameters for a single PDO
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdoConfig {
    /// The COB ID this PDO will use to send/receive. Bit 29 selects an extended ID.
    pub cob_id: u32,
    /// Disabled PDOs are skipped
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Specifies when a TPDO is sent
    ///
    /// - 1 - 240: Sent in response to every Nth sync
    /// - 254, 255: Event driven. Sent periodically when `event_timer_ms` is non-zero, otherwise
    ///   whenever a mapped object changes.
    #[serde(default = "default_transmission_type")]
    pub transmission_type: u8,
    /// Period of an event driven TPDO
    #[serde(default)]
    pub event_timer_ms: u16,
    /// Minimum time between transmissions, in multiples of 100us
    #[serde(default)]
    pub inhibit_time: u16,
    /// The mapped sub objects, in frame order
    pub mappings: Vec<MappingEntry>,
}

impl PdoConfig {
    /// The configured COB ID
    pub fn can_id(&self) -> CanId {
        if self.cob_id & (1 << 29) != 0 {
            CanId::Extended(self.cob_id & 0x1FFF_FFFF)
        } else {
            CanId::Std((self.cob_id & 0x7FF) as u16)
        }
    }

    /// Convert to a transmit PDO configuration
    pub fn to_tpdo(&self) -> Result<TpdoConfig, ConfigError> {
        let trigger = match self.transmission_type {
            every @ 1..=240 => TpdoTrigger::Sync { every },
            254 | 255 if self.event_timer_ms > 0 => TpdoTrigger::Periodic {
                interval_ms: self.event_timer_ms as u32,
            },
            254 | 255 => TpdoTrigger::OnChange,
            value => return InvalidTransmissionTypeSnafu { value }.fail(),
        };
        Ok(TpdoConfig {
            cob_id: self.can_id(),
            trigger,
            inhibit_us: self.inhibit_time as u64 * 100,
            mappings: self.mappings.clone(),
        })
    }

    /// Convert to a receive PDO configuration
    pub fn to_rpdo(&self) -> RpdoConfig {
        RpdoConfig {
            cob_id: self.can_id(),
            mappings: self.mappings.clone(),
        }
    }
}

/// A remote node whose heartbeat is monitored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConsumerConfig {
    /// The remote node ID
    pub node: u8,
    /// Time without a heartbeat after which the node is reported lost
    pub timeout_ms: u32,
}

/// SYNC producer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Time between SYNCs
    pub period_ms: u32,
    /// Counter overflow value. 0 sends SYNCs without a counter.
    #[serde(default = "default_sync_overflow")]
    pub overflow: u8,
}

/// TIME stamp producer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeConfig {
    /// Time between stamps
    pub period_ms: u32,
}

/// LSS master configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LssConfig {
    /// Create the LSS master
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Time to wait for each LSS response
    #[serde(default = "default_lss_timeout_ms")]
    pub timeout_ms: u32,
}

/// A value to write to an object at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    /// Index of the object to be written
    pub index: u16,
    /// Sub index to be written
    pub sub: u8,
    /// The value to be written to the sub object
    pub value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreSerializer {
    pub index: u16,
    pub sub: u8,
    pub value: toml::Value,
    #[serde(rename = "type")]
    pub ty: DataType,
}

fn int<T: TryFrom<i64>>(raw: &toml::Value) -> Result<T, String> {
    let value = raw
        .as_integer()
        .ok_or_else(|| format!("expected an integer, found {raw}"))?;
    T::try_from(value).map_err(|_| format!("{value} is out of range for the type"))
}

fn float(raw: &toml::Value) -> Result<f64, String> {
    raw.as_float()
        .or_else(|| raw.as_integer().map(|i| i as f64))
        .ok_or_else(|| format!("expected a float, found {raw}"))
}

fn store_value(ty: DataType, raw: &toml::Value) -> Result<Value, String> {
    Ok(match ty {
        DataType::Boolean => Value::Boolean(
            raw.as_bool()
                .ok_or_else(|| format!("expected a boolean, found {raw}"))?,
        ),
        DataType::Int8 => Value::Int8(int(raw)?),
        DataType::Int16 => Value::Int16(int(raw)?),
        DataType::Int32 => Value::Int32(int(raw)?),
        DataType::Int64 => Value::Int64(int(raw)?),
        DataType::UInt8 => Value::UInt8(int(raw)?),
        DataType::UInt16 => Value::UInt16(int(raw)?),
        DataType::UInt32 => Value::UInt32(int(raw)?),
        DataType::UInt64 => Value::UInt64(int(raw)?),
        DataType::Real32 => Value::Real32(float(raw)? as f32),
        DataType::Real64 => Value::Real64(float(raw)?),
        DataType::VisibleString => Value::VisibleString(
            raw.as_str()
                .ok_or_else(|| format!("expected a string, found {raw}"))?
                .to_string(),
        ),
        DataType::OctetString => {
            let items = raw
                .as_array()
                .ok_or_else(|| format!("expected an array of bytes, found {raw}"))?;
            Value::OctetString(items.iter().map(int).collect::<Result<Vec<u8>, _>>()?)
        }
    })
}

fn deserialize_store<'de, D>(deserializer: D) -> Result<Vec<Store>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw_store = Vec::<StoreSerializer>::deserialize(deserializer)?;
    raw_store
        .into_iter()
        .map(|raw| {
            Ok(Store {
                index: raw.index,
                sub: raw.sub,
                value: store_value(raw.ty, &raw.value).map_err(de::Error::custom)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_parse() {
        let config = NetworkConfig::load_from_str(
            r#"
            sdo_timeout_ms = 250

            [local_node]
            node_id = 3
            heartbeat_period_ms = 100

            [[local_node.tpdo]]
            cob_id = 0x183
            event_timer_ms = 20
            inhibit_time = 50
            mappings = [
                { index = 0x2000, sub = 1, bits = 4 },
                { index = 0x2000, sub = 2, bits = 8 },
            ]

            [[local_node.tpdo]]
            cob_id = 0x283
            transmission_type = 2
            mappings = [{ index = 0x2001, sub = 0, bits = 32 }]

            [[local_node.rpdo]]
            cob_id = 0x203
            mappings = [{ index = 0x2002, sub = 0, bits = 16 }]

            [[local_node.store]]
            index = 0x2001
            sub = 0
            type = "uint32"
            value = 12

            [[local_node.store]]
            index = 0x2003
            sub = 0
            type = "visiblestring"
            value = "pump"

            [[heartbeat_consumer]]
            node = 5
            timeout_ms = 200

            [sync]
            period_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(250, config.sdo_timeout_ms);
        let node = config.local_node.as_ref().unwrap();
        assert_eq!(3, node.node_id);
        assert_eq!(Some(100), node.settings().heartbeat_period_ms);

        let tpdo = node.tpdo[0].to_tpdo().unwrap();
        assert_eq!(CanId::Std(0x183), tpdo.cob_id);
        assert_eq!(TpdoTrigger::Periodic { interval_ms: 20 }, tpdo.trigger);
        assert_eq!(5000, tpdo.inhibit_us);
        assert_eq!(
            TpdoTrigger::Sync { every: 2 },
            node.tpdo[1].to_tpdo().unwrap().trigger
        );
        assert_eq!(CanId::Std(0x203), node.rpdo[0].to_rpdo().cob_id);

        assert_eq!(Value::UInt32(12), node.store[0].value);
        assert_eq!(Value::VisibleString("pump".into()), node.store[1].value);

        assert_eq!(
            vec![HeartbeatConsumerConfig {
                node: 5,
                timeout_ms: 200
            }],
            config.heartbeat_consumer
        );
        assert_eq!(DEFAULT_SYNC_OVERFLOW, config.sync.unwrap().overflow);
        assert!(config.time.is_none());
        assert!(config.lss.is_none());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            NetworkConfig::load_from_str("unknown_key = 1"),
            Err(ConfigError::TomlDeserialization { .. })
        ));
        assert!(NetworkConfig::load_from_str(
            r#"
            [local_node]
            node_id = 1
            [[local_node.store]]
            index = 0x2000
            sub = 0
            type = "uint8"
            value = 300
            "#
        )
        .is_err());

        let pdo = PdoConfig {
            cob_id: 0x181,
            enabled: true,
            transmission_type: 0,
            event_timer_ms: 0,
            inhibit_time: 0,
            mappings: Vec::new(),
        };
        assert!(matches!(
            pdo.to_tpdo(),
            Err(ConfigError::InvalidTransmissionType { value: 0 })
        ));
    }

    #[test]
    fn test_extended_cob_id() {
        let pdo = PdoConfig {
            cob_id: (1 << 29) | 0x12345,
            enabled: true,
            transmission_type: 254,
            event_timer_ms: 0,
            inhibit_time: 0,
            mappings: Vec::new(),
        };
        assert_eq!(CanId::Extended(0x12345), pdo.can_id());
        assert_eq!(TpdoTrigger::OnChange, pdo.to_tpdo().unwrap().trigger);
    }
}
