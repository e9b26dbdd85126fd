//! # Modbus Engine Error Handling
//!
//! Error types shared by the buffer, codecs, transports and the dispatch engine.
//!
//! ## Error Categories
//!
//! ### Framing Errors
//! - **Incomplete**: not enough bytes buffered yet; the frame is retried whole next tick
//! - **CRC / Invalid Function**: the RTU decoder drops one byte and resynchronizes
//! - **Frame**: MBAP length mismatch or truncated body; the receive is discarded
//!
//! ### Buffer Errors
//! - **Buffer Full**: an all-or-nothing write did not fit; nothing was written
//!
//! ### Transport Errors
//! - **I/O / Connection**: the transport reported a fatal failure
//! - **Send Abandoned**: the bounded partial-send loop ran out of attempts
//!
//! ## Usage
//!
//! ```rust
//! use modbus_engine::{ModbusError, ModbusResult};
//!
//! fn classify(result: ModbusResult<()>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(error) if error.is_incomplete() => {
//!             // wait for more bytes
//!         }
//!         Err(error) if error.requires_resync() => {
//!             println!("dropped one byte: {}", error);
//!         }
//!         Err(error) => println!("failed: {}", error),
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for engine operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus engine error types
///
/// Each variant carries enough context to log the failure and to decide how the
/// caller recovers: retry next tick, resynchronize, reinitialize the transport,
/// or give up on a send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// I/O related errors (network, serial)
    ///
    /// Returned by transports in place of a negative `recv`/`send` result.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// # Examples
    /// - Peer closed the TCP stream
    /// - Serial port could not be opened
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Protocol-level errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Opcode outside the allowed set
    ///
    /// On RTU this triggers a one-byte resynchronization.
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Invalid data value
    ///
    /// # Examples
    /// - Payload longer than 255 bytes
    /// - Payload class does not match the opcode
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// CRC validation failure
    ///
    /// Provides both the computed and the received CRC for debugging.
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Modbus exception reply
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Frame parsing errors
    ///
    /// # Examples
    /// - MBAP length field disagrees with the received byte count
    /// - MBAP body shorter than its byte count claims
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Not enough buffered bytes to finish a read
    ///
    /// Never fatal: the buffer is left untouched and the read is retried later.
    #[error("Incomplete frame: {needed} more byte(s) required")]
    Incomplete { needed: usize },

    /// All-or-nothing write did not fit
    #[error("Buffer full: {needed} byte(s) requested, {free} free")]
    BufferFull { needed: usize, free: usize },

    /// Bounded partial-send loop gave up
    #[error("Send abandoned after {attempts} attempt(s), {remaining} byte(s) unsent")]
    SendAbandoned { attempts: usize, remaining: usize },

    /// Operation not supported for this role/transport combination
    #[error("Unsupported: {message}")]
    Unsupported { message: String },

    /// Configuration errors
    ///
    /// # Examples
    /// - Slave unit address outside 1..=247
    /// - Ring buffer smaller than one frame
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a CRC mismatch error
    ///
    /// # Arguments
    ///
    /// * `expected` - CRC computed over the received bytes
    /// * `actual` - CRC carried in the frame trailer
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// Automatically maps standard exception codes to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create an incomplete-frame error
    pub fn incomplete(needed: usize) -> Self {
        Self::Incomplete { needed }
    }

    /// Create a buffer-full error
    pub fn buffer_full(needed: usize, free: usize) -> Self {
        Self::BufferFull { needed, free }
    }

    /// Create a send-abandoned error
    pub fn send_abandoned(attempts: usize, remaining: usize) -> Self {
        Self::SendAbandoned { attempts, remaining }
    }

    /// Create an unsupported-operation error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error only means "not enough bytes yet"
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }

    /// Check if an RTU decoder must drop one byte to realign on the stream
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modbus_engine::ModbusError;
    ///
    /// assert!(ModbusError::crc_mismatch(0x1234, 0x4321).requires_resync());
    /// assert!(ModbusError::invalid_function(0x2B).requires_resync());
    /// assert!(!ModbusError::incomplete(2).requires_resync());
    /// ```
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::CrcMismatch { .. } | Self::InvalidFunction { .. })
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modbus_engine::ModbusError;
    ///
    /// assert!(ModbusError::incomplete(1).is_recoverable());
    /// assert!(!ModbusError::send_abandoned(20, 4).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Incomplete { .. } => true,
            Self::BufferFull { .. } => true,
            Self::Exception { code, .. } => {
                // Acknowledge, Busy
                matches!(code, 0x05 | 0x06)
            }
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::SendAbandoned { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
                | Self::CrcMismatch { .. }
        )
    }
}

/// Convert from std::io::Error
///
/// A closed or reset connection maps to `Connection`, everything else to `Io`.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => Self::connection(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ModbusError::incomplete(3);
        assert!(err.is_incomplete());
        assert!(err.is_recoverable());
        assert!(!err.requires_resync());

        let err = ModbusError::crc_mismatch(0x1234, 0x5678);
        assert!(err.requires_resync());
        assert!(err.is_protocol_error());
        assert!(!err.is_recoverable());

        let err = ModbusError::send_abandoned(20, 12);
        assert!(err.is_transport_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ModbusError::crc_mismatch(0x1234, 0x5678);
        let msg = format!("{}", err);
        assert!(msg.contains("CRC validation failed"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("5678"));

        let msg = ModbusError::exception(0x03, 0x02).to_string();
        assert!(msg.contains("Illegal Data Address"));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: ModbusError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, ModbusError::Connection { .. }));

        let err: ModbusError = std::io::Error::from(std::io::ErrorKind::Other).into();
        assert!(matches!(err, ModbusError::Io { .. }));
    }
}
