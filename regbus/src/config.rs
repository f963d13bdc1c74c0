use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::decode::{AppDecodeLevel, DecodeLevel, FrameDecodeLevel, PhysDecodeLevel};
use crate::error::ConfigError;
use crate::server::{DeviceConfig, DeviceMap, SlaveHandle};
use crate::types::{UnitId, WordOrder};

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

/// Validated JSON configuration of a complete server
///
/// ```json
/// {
///   "transport": { "mode": "tcp", "port": 1502 },
///   "slaves": [
///     { "address": 10, "coils": 1, "input_registers": 8, "holding_registers": 2 }
///   ],
///   "debug": false
/// }
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Transport to serve on
    pub transport: TransportConfig,
    /// One or more slave devices
    pub slaves: Vec<SlaveConfig>,
    /// Budget handed to each poll iteration, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Enables protocol decode logging
    #[serde(default)]
    pub debug: bool,
}

/// Transport section of the configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Modbus TCP
    Tcp {
        /// Listen address, defaults to all interfaces
        #[serde(default = "default_listen_address")]
        address: String,
        /// Listen port
        port: u16,
    },
    /// Modbus RTU over a serial line
    Rtu {
        /// Serial device path, e.g. `/dev/ttyUSB0`
        device: String,
        /// Baud rate, defaults to 9600
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (5 ..= 8), defaults to 8
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Stop bits (1 or 2), defaults to 1
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
        /// Parity, defaults to even per the Modbus line spec
        #[serde(default)]
        parity: ParityConfig,
    },
}

/// Parity setting of the serial line
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    /// No parity bit
    None,
    /// Even parity, the Modbus default
    #[default]
    Even,
    /// Odd parity
    Odd,
}

/// One slave device definition
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SlaveConfig {
    /// Unit id in the range 1 ..= 247
    pub address: u8,
    /// Number of coils
    #[serde(default)]
    pub coils: u16,
    /// Number of discrete inputs
    #[serde(default)]
    pub discrete_inputs: u16,
    /// Number of input registers
    #[serde(default)]
    pub input_registers: u16,
    /// Number of holding registers
    #[serde(default)]
    pub holding_registers: u16,
    /// Word order of the 32-bit register accessors
    #[serde(default)]
    pub word_order: WordOrder,
}

impl SlaveConfig {
    /// The table sizes and conventions of this slave
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::new(
            self.coils,
            self.discrete_inputs,
            self.input_registers,
            self.holding_registers,
        )
        .with_word_order(self.word_order)
    }
}

impl ServerConfig {
    /// Load and validate a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.slaves.is_empty() {
            return Err(ConfigError::NoSlaves);
        }

        let mut seen = std::collections::BTreeSet::new();
        for slave in &self.slaves {
            if slave.address == 0 || slave.address > 247 {
                return Err(ConfigError::InvalidUnitId(slave.address));
            }
            if !seen.insert(slave.address) {
                return Err(ConfigError::DuplicateUnitId(slave.address));
            }
            if slave.coils == 0
                && slave.discrete_inputs == 0
                && slave.input_registers == 0
                && slave.holding_registers == 0
            {
                return Err(ConfigError::EmptyDevice(slave.address));
            }
        }

        if let TransportConfig::Rtu {
            data_bits,
            stop_bits,
            ..
        } = &self.transport
        {
            if !(5..=8).contains(data_bits) {
                return Err(ConfigError::InvalidSerialSettings(format!(
                    "data bits must be 5 ..= 8, got {data_bits}"
                )));
            }
            if !(1..=2).contains(stop_bits) {
                return Err(ConfigError::InvalidSerialSettings(format!(
                    "stop bits must be 1 or 2, got {stop_bits}"
                )));
            }
        }

        Ok(())
    }

    /// Build the device map, returning the handles in the order the slaves
    /// were declared
    pub fn build_device_map(&self) -> Result<(DeviceMap, Vec<SlaveHandle>), ConfigError> {
        let mut devices = DeviceMap::new();
        let mut handles = Vec::with_capacity(self.slaves.len());
        for slave in &self.slaves {
            handles.push(devices.register(UnitId::new(slave.address), slave.device_config())?);
        }
        Ok((devices, handles))
    }

    /// Budget handed to each poll iteration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Decode level implied by the debug flag
    pub fn decode_level(&self) -> DecodeLevel {
        if self.debug {
            DecodeLevel::new(
                AppDecodeLevel::DataValues,
                FrameDecodeLevel::Header,
                PhysDecodeLevel::Nothing,
            )
        } else {
            DecodeLevel::nothing()
        }
    }

    /// Serial settings of an RTU transport, `None` for TCP
    #[cfg(feature = "serial")]
    pub fn serial_settings(&self) -> Option<crate::serial::SerialSettings> {
        match &self.transport {
            TransportConfig::Tcp { .. } => None,
            TransportConfig::Rtu {
                baud_rate,
                data_bits,
                stop_bits,
                parity,
                ..
            } => {
                use crate::serial::{DataBits, Parity, SerialSettings, StopBits};

                let data_bits = match data_bits {
                    5 => DataBits::Five,
                    6 => DataBits::Six,
                    7 => DataBits::Seven,
                    _ => DataBits::Eight,
                };
                let stop_bits = match stop_bits {
                    2 => StopBits::Two,
                    _ => StopBits::One,
                };
                let parity = match parity {
                    ParityConfig::None => Parity::None,
                    ParityConfig::Even => Parity::Even,
                    ParityConfig::Odd => Parity::Odd,
                };

                Some(SerialSettings {
                    baud_rate: *baud_rate,
                    data_bits,
                    stop_bits,
                    parity,
                    ..SerialSettings::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOCK_SERVER_CONFIG: &str = r#"
    {
        "transport": { "mode": "tcp", "address": "127.0.0.1", "port": 1502 },
        "slaves": [
            {
                "address": 10,
                "coils": 1,
                "input_registers": 8,
                "holding_registers": 2,
                "word_order": "abcd"
            }
        ],
        "debug": true
    }
    "#;

    #[test]
    fn parses_the_clock_server_shape() {
        let config: ServerConfig = serde_json::from_str(CLOCK_SERVER_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.poll_timeout(), Duration::from_millis(100));
        assert!(config.debug);
        match &config.transport {
            TransportConfig::Tcp { address, port } => {
                assert_eq!(address, "127.0.0.1");
                assert_eq!(*port, 1502);
            }
            _ => panic!("expected tcp transport"),
        }

        let (devices, handles) = config.build_device_map().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(handles.len(), 1);
        handles[0].write_input_registers(1, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    }

    #[test]
    fn rejects_broadcast_and_duplicate_slave_addresses() {
        let bad: ServerConfig = serde_json::from_str(
            r#"{ "transport": { "mode": "tcp", "port": 1502 },
                 "slaves": [ { "address": 0, "coils": 1 } ] }"#,
        )
        .unwrap();
        assert_eq!(bad.validate(), Err(ConfigError::InvalidUnitId(0)));

        let dup: ServerConfig = serde_json::from_str(
            r#"{ "transport": { "mode": "tcp", "port": 1502 },
                 "slaves": [ { "address": 7, "coils": 1 }, { "address": 7, "coils": 1 } ] }"#,
        )
        .unwrap();
        assert_eq!(dup.validate(), Err(ConfigError::DuplicateUnitId(7)));
    }

    #[test]
    fn rejects_a_slave_without_any_table() {
        let empty: ServerConfig = serde_json::from_str(
            r#"{ "transport": { "mode": "tcp", "port": 1502 },
                 "slaves": [ { "address": 7 } ] }"#,
        )
        .unwrap();
        assert_eq!(empty.validate(), Err(ConfigError::EmptyDevice(7)));
    }

    #[test]
    fn rtu_transport_validates_line_settings() {
        let bad: ServerConfig = serde_json::from_str(
            r#"{ "transport": { "mode": "rtu", "device": "/dev/ttyUSB0", "data_bits": 9 },
                 "slaves": [ { "address": 7, "coils": 1 } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidSerialSettings(_))
        ));
    }
}
