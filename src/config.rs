//! Engine configuration
//!
//! Loaded from YAML or JSON. A minimal slave over TCP:
//!
//! ```yaml
//! role: slave
//! unit_address: 1
//! transport:
//!   type: tcp
//!   bind_address: "0.0.0.0:502"
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{Role, SlaveId};
use crate::rtu::RtuCodec;
use crate::socket::MBAP_HEADER_SIZE;
use crate::transport::{ModbusTransport, SerialTransport};
use crate::utils::validation::validate_slave_id;
use crate::{DEFAULT_RTU_BUFFER_CAPACITY, MAX_RTU_DECODE_SIZE, MAX_TCP_FRAME_SIZE};

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub role: Role,

    /// Local unit address (1-247); ignored by a master
    #[serde(default = "default_unit_address")]
    pub unit_address: SlaveId,

    pub transport: TransportConfig,

    /// Host tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Hex-trace every frame through `tracing`
    #[serde(default)]
    pub packet_logging: bool,
}

fn default_unit_address() -> SlaveId {
    1
}

fn default_tick_interval_ms() -> u64 {
    5
}

/// Wire and link selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Modbus RTU over a serial port
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Size of each of the inbound and outbound rings
        #[serde(default = "default_buffer_capacity")]
        buffer_capacity: usize,
    },
    /// Modbus TCP (MBAP framing)
    Tcp {
        bind_address: String,
        #[serde(default = "default_scratch_capacity")]
        scratch_capacity: usize,
    },
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_buffer_capacity() -> usize {
    DEFAULT_RTU_BUFFER_CAPACITY
}

fn default_scratch_capacity() -> usize {
    MAX_TCP_FRAME_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            role: Role::Slave,
            unit_address: default_unit_address(),
            transport: TransportConfig::Tcp {
                bind_address: format!("127.0.0.1:{}", crate::DEFAULT_TCP_PORT),
                scratch_capacity: default_scratch_capacity(),
            },
            tick_interval_ms: default_tick_interval_ms(),
            packet_logging: false,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> ModbusResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as YAML
    pub fn load<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Check field ranges
    pub fn validate(&self) -> ModbusResult<()> {
        if self.role == Role::Slave {
            validate_slave_id(self.unit_address)
                .map_err(|e| ModbusError::configuration(format!("unit_address: {}", e)))?;
        }

        if self.tick_interval_ms == 0 {
            return Err(ModbusError::configuration("tick_interval_ms must be non-zero"));
        }

        match &self.transport {
            TransportConfig::Rtu { port, baud_rate, buffer_capacity } => {
                if port.is_empty() {
                    return Err(ModbusError::configuration("Serial port name is empty"));
                }
                if *baud_rate == 0 {
                    return Err(ModbusError::configuration("baud_rate must be non-zero"));
                }
                if *buffer_capacity < MAX_RTU_DECODE_SIZE {
                    return Err(ModbusError::configuration(format!(
                        "buffer_capacity {} is below the longest RTU frame ({})",
                        buffer_capacity, MAX_RTU_DECODE_SIZE
                    )));
                }
            }
            TransportConfig::Tcp { bind_address, scratch_capacity } => {
                self.socket_address_of(bind_address)?;
                if *scratch_capacity < MAX_TCP_FRAME_SIZE {
                    return Err(ModbusError::configuration(format!(
                        "scratch_capacity {} is below one TCP frame ({})",
                        scratch_capacity, MAX_TCP_FRAME_SIZE
                    )));
                }
                // the MBAP length field is 16 bits
                let longest = MBAP_HEADER_SIZE + u16::MAX as usize;
                if *scratch_capacity > longest {
                    return Err(ModbusError::configuration(format!(
                        "scratch_capacity {} exceeds the MBAP length field ({})",
                        scratch_capacity, longest
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parsed TCP bind address
    pub fn bind_address(&self) -> ModbusResult<SocketAddr> {
        match &self.transport {
            TransportConfig::Tcp { bind_address, .. } => self.socket_address_of(bind_address),
            TransportConfig::Rtu { .. } => {
                Err(ModbusError::configuration("RTU configuration has no bind address"))
            }
        }
    }

    /// Open the configured serial port and wrap it in an RTU codec
    pub fn open_rtu(&self) -> ModbusResult<RtuCodec<SerialTransport>> {
        match &self.transport {
            TransportConfig::Rtu { port, baud_rate, buffer_capacity } => {
                let mut transport = SerialTransport::new(port, *baud_rate);
                transport.init()?;
                let mut codec = RtuCodec::with_capacity(transport, *buffer_capacity);
                codec.set_packet_logging(self.packet_logging);
                Ok(codec)
            }
            TransportConfig::Tcp { .. } => {
                Err(ModbusError::configuration("TCP configuration cannot open a serial port"))
            }
        }
    }

    fn socket_address_of(&self, text: &str) -> ModbusResult<SocketAddr> {
        text.parse().map_err(|e| {
            ModbusError::configuration(format!("Invalid bind address {}: {}", text, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_with_defaults() {
        let config = EngineConfig::from_yaml_str(
            "role: slave\ntransport:\n  type: rtu\n  port: /dev/ttyUSB0\n",
        )
        .unwrap();

        assert_eq!(config.unit_address, 1);
        assert_eq!(config.tick_interval_ms, 5);
        assert!(!config.packet_logging);
        assert_eq!(
            config.transport,
            TransportConfig::Rtu {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 9600,
                buffer_capacity: 512,
            }
        );
    }

    #[test]
    fn test_json_tcp_master() {
        let config = EngineConfig::from_json_str(
            r#"{"role":"master","unit_address":0,"packet_logging":true,
                "transport":{"type":"tcp","bind_address":"127.0.0.1:5020"}}"#,
        )
        .unwrap();

        assert_eq!(config.role, Role::Master);
        assert!(config.packet_logging);
        assert_eq!(config.bind_address().unwrap().port(), 5020);
        assert!(matches!(config.transport, TransportConfig::Tcp { scratch_capacity: 260, .. }));
    }

    #[test]
    fn test_slave_unit_address_is_validated() {
        let err = EngineConfig::from_yaml_str(concat!(
            "role: slave\nunit_address: 248\n",
            "transport:\n  type: tcp\n  bind_address: 0.0.0.0:502\n",
        ))
        .unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));

        let zero = EngineConfig { unit_address: 0, ..EngineConfig::default() };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_capacities_must_hold_a_frame() {
        let rtu = EngineConfig {
            transport: TransportConfig::Rtu {
                port: "COM1".to_string(),
                baud_rate: 19200,
                buffer_capacity: 0,
            },
            ..EngineConfig::default()
        };
        assert!(rtu.validate().is_err());

        let tcp = EngineConfig {
            transport: TransportConfig::Tcp {
                bind_address: "127.0.0.1:502".to_string(),
                scratch_capacity: 100,
            },
            ..EngineConfig::default()
        };
        assert!(tcp.validate().is_err());
    }

    fn rtu_with_capacity(buffer_capacity: usize) -> EngineConfig {
        EngineConfig {
            transport: TransportConfig::Rtu {
                port: "/dev/ttyS0".to_string(),
                baud_rate: 9600,
                buffer_capacity,
            },
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_rtu_ring_holds_longest_frame() {
        // a 256-byte ring cannot hold a write-multiple frame with 255 payload bytes
        let err = rtu_with_capacity(256).validate().unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));
        assert!(rtu_with_capacity(263).validate().is_err());

        assert!(rtu_with_capacity(crate::MAX_RTU_DECODE_SIZE).validate().is_ok());
        assert!(rtu_with_capacity(264).validate().is_ok());
    }

    #[test]
    fn test_scratch_capacity_fits_mbap_length() {
        let tcp_with = |scratch_capacity| EngineConfig {
            transport: TransportConfig::Tcp {
                bind_address: "127.0.0.1:502".to_string(),
                scratch_capacity,
            },
            ..EngineConfig::default()
        };

        assert!(tcp_with(70_000).validate().is_err());
        assert!(tcp_with(MBAP_HEADER_SIZE + u16::MAX as usize + 1).validate().is_err());
        assert!(tcp_with(MBAP_HEADER_SIZE + u16::MAX as usize).validate().is_ok());
        assert!(tcp_with(4096).validate().is_ok());
    }

    #[test]
    fn test_bad_bind_address_and_baud_rate() {
        let tcp = EngineConfig {
            transport: TransportConfig::Tcp {
                bind_address: "not an address".to_string(),
                scratch_capacity: 260,
            },
            ..EngineConfig::default()
        };
        assert!(tcp.validate().is_err());

        let rtu = EngineConfig {
            transport: TransportConfig::Rtu {
                port: "COM1".to_string(),
                baud_rate: 0,
                buffer_capacity: 512,
            },
            ..EngineConfig::default()
        };
        assert!(rtu.validate().is_err());
    }

    #[test]
    fn test_parse_error_maps_to_configuration() {
        let err = EngineConfig::from_yaml_str("role: [").unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));

        let err = EngineConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));
    }

    #[test]
    fn test_load_picks_format_by_extension() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("modbus_engine_config_{}.json", std::process::id()));
        let config = EngineConfig::default();
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
