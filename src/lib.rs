//! # Modbus Engine - Poll-Driven Modbus RTU/TCP Protocol Engine
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! A non-blocking Modbus engine for field devices and gateways. The host calls
//! [`ModbusEngine::tick`] from its own loop; each tick decodes at most one frame
//! from the transport and hands it to a registered hook.
//!
//! ## Features
//!
//! - **Two wire formats**: RTU (CRC-16, speculative resynchronizing decoder) and
//!   TCP (MBAP header, one frame per receive)
//! - **Both roles**: a slave answers requests, a master issues requests and
//!   consumes replies
//! - **Never blocks**: transports are polled, partial frames wait for the next tick
//! - **Fixed memory**: ring buffers and inline payload arrays sized at construction
//! - **Automatic exceptions**: unhandled slave requests get an Illegal Function reply
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust
//! use modbus_engine::{
//!     Message, ModbusEngine, ModbusFunction, Reply, Request, RtuCodec, TickOutcome,
//! };
//! use modbus_engine::transport::MemoryTransport;
//!
//! let (master_link, slave_link) = MemoryTransport::pair();
//!
//! let mut slave = ModbusEngine::slave(1, RtuCodec::new(slave_link));
//! slave.on(ModbusFunction::ReadHoldingRegisters, |_unit, message, responder| {
//!     if let Message::Request(request) = message {
//!         let mut reply = Reply::for_request(request).unwrap();
//!         reply.set_words(&[0x1234, 0x5678]).unwrap();
//!         responder.reply(reply).unwrap();
//!     }
//! });
//!
//! let mut master = ModbusEngine::master(RtuCodec::new(master_link));
//! master.on(ModbusFunction::ReadHoldingRegisters, |_unit, message, _responder| {
//!     if let Message::Reply(reply) = message {
//!         assert_eq!(reply.payload.as_words(), &[0x1234, 0x5678]);
//!     }
//! });
//!
//! let request = Request::read(ModbusFunction::ReadHoldingRegisters, 0, 2).unwrap();
//! master.send_request(1, request).unwrap();
//! master.flush().unwrap();
//!
//! assert_eq!(slave.tick(), TickOutcome::Dispatched);
//! assert_eq!(master.tick(), TickOutcome::Dispatched);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Application   │  hooks keyed by function code
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  ModbusEngine   │  tick(): decode once, dispatch, flush
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Codec          │  RtuCodec (rings + CRC) / SocketCodec (MBAP)
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Transport      │  serial / TCP / memory, non-blocking
//! └─────────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Modbus protocol definitions and message handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// Fixed-capacity byte ring with checkpoints
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod buffer;

/// CRC-16/MODBUS
pub mod crc;

/// Wire codec trait and shared PDU layouts
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod codec;

/// RTU framing over a byte stream
pub mod rtu;

/// TCP framing with the MBAP header
pub mod socket;

/// Non-blocking byte transports for TCP, serial and memory links
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// Poll-driven dispatch engine
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod engine;

/// YAML/JSON engine configuration
pub mod config;

/// Utility functions
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod utils;

/// Logging system for the library
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod logging;

// Re-export main types for convenience
pub use buffer::{Checkpoint, CircularBuffer};
pub use codec::{Codec, CodecStats};
pub use config::{EngineConfig, TransportConfig};
pub use engine::{EngineStats, ForwardHook, Hook, Message, ModbusEngine, Responder, TickOutcome};
pub use error::{ModbusError, ModbusResult};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};
pub use protocol::{
    Count, MbapHeader, ModbusException, ModbusFunction, Opcode, Package, PackageBody, Payload,
    Reply, Request, Role,
};
pub use rtu::RtuCodec;
pub use socket::SocketCodec;
pub use transport::{
    MemoryTransport, ModbusTransport, SerialTransport, TcpTransport, TransportStats,
};

/// Largest payload a package carries (byte count is a single byte)
pub const PAYLOAD_CAPACITY: usize = 256;

/// Default size of each RTU ring buffer
pub const DEFAULT_RTU_BUFFER_CAPACITY: usize = 512;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Longest RTU frame the decoder may wait for: unit, opcode, address, count,
/// byte count, 255 payload bytes and the CRC
pub const MAX_RTU_DECODE_SIZE: usize = 1 + 1 + 2 + 2 + 1 + 255 + 2;

/// Maximum number of coils that can be read in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Engine v{} - Poll-driven Modbus RTU/TCP engine by Evan Liu", VERSION)
}
