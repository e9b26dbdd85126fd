use std::sync::Arc;

use crate::codec::pdu_bytes;
use crate::protocol::{Count, ModbusException, Package, PackageBody, Payload};
use crate::utils::format::registers_to_hex;

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for packet display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw packet data only
    Raw,
    /// Show interpreted packet data with field descriptions
    Interpreted,
    /// Show both raw and interpreted data
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode: LoggingMode::Interpreted,
        }
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(
        callback: Option<LogCallback>,
        min_level: LogLevel,
        mode: LoggingMode,
    ) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error => eprintln!("[{}] ERROR: {}", timestamp, message),
                LogLevel::Warn => eprintln!("[{}] WARN: {}", timestamp, message),
                LogLevel::Info => println!("[{}] INFO: {}", timestamp, message),
                LogLevel::Debug => println!("[{}] DEBUG: {}", timestamp, message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Set logging mode
    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    /// Get current logging mode
    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Check if a message at the given level should be logged
    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log packet data with hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }

        let message = format!(
            "{} packet ({} bytes): {}",
            direction,
            data.len(),
            hex::encode_upper(data)
        );
        self.log(level, &message);
    }

    /// Log a decoded or outgoing package according to the logging mode
    ///
    /// Raw mode shows the unframed PDU (unit, opcode, body); framing bytes such
    /// as the CRC or MBAP header are left to transport packet logging.
    pub fn log_package(&self, direction: &str, package: &Package) {
        if !self.should_log(LogLevel::Info) {
            return;
        }

        let kind = match package.body {
            PackageBody::Request(_) => "Request",
            PackageBody::Reply(_) => "Reply",
        };

        match self.mode {
            LoggingMode::Raw => {
                self.info(&format!("Modbus {} {} Raw: {}", kind, direction, self.raw(package)));
            }
            LoggingMode::Interpreted => {
                self.info(&format!("Modbus {} {} {}", kind, direction, self.interpret(package)));
            }
            LoggingMode::Both => {
                self.info(&format!("Modbus {} {} {}", kind, direction, self.interpret(package)));
                self.debug(&format!("Modbus {} {} Raw: {}", kind, direction, self.raw(package)));
            }
        }
    }

    fn raw(&self, package: &Package) -> String {
        match pdu_bytes(package) {
            Ok(bytes) => hex::encode_upper(bytes),
            Err(e) => format!("<unencodable: {}>", e),
        }
    }

    /// Interpret a package with field descriptions
    fn interpret(&self, package: &Package) -> String {
        let (opcode, address, count, payload) = match &package.body {
            PackageBody::Request(r) => (r.opcode, r.address, r.count, &r.payload),
            PackageBody::Reply(r) => (r.opcode, r.address, r.count, &r.payload),
        };

        let mut text = format!(
            "Unit: {}, Function: {} ({})",
            package.unit,
            self.get_function_name(opcode.function_code()),
            opcode
        );

        if opcode.is_exception() {
            let code = payload.as_bits().first().copied().unwrap_or(0);
            let name = ModbusException::from_u8(code)
                .map(|e| format!("{:?}", e))
                .unwrap_or_else(|| "Unknown".to_string());
            text.push_str(&format!(", Exception: 0x{:02X} ({})", code, name));
            return text;
        }

        let has_attributes = match package.body {
            PackageBody::Request(_) => true,
            PackageBody::Reply(_) => opcode.reply_has_attributes(),
        };
        if has_attributes {
            match count {
                Count::Length(quantity) => {
                    text.push_str(&format!(", Address: {}, Quantity: {}", address, quantity))
                }
                Count::Value(value) if opcode.function_code() == 0x05 => text.push_str(&format!(
                    ", Address: {}, Value: 0x{:04X} ({})",
                    address,
                    value,
                    if value == 0xFF00 { "ON" } else { "OFF" }
                )),
                Count::Value(value) => {
                    text.push_str(&format!(
                        ", Address: {}, Value: {} (0x{:04X})",
                        address, value, value
                    ))
                }
            }
        }

        match payload {
            Payload::None => {}
            Payload::Bits { len, .. } => {
                let bits = payload.to_bools(8 * *len as usize);
                text.push_str(&format!(
                    ", Byte count: {}, Coils: {:?}",
                    len,
                    &bits[..bits.len().min(16)]
                ))
            }
            Payload::Words { len, .. } => {
                let words = payload.as_words();
                text.push_str(&format!(
                    ", Byte count: {}, Registers: [{}]",
                    len,
                    registers_to_hex(&words[..words.len().min(8)])
                ))
            }
        }
        text
    }

    /// Get human-readable function name
    fn get_function_name(&self, function_code: u8) -> &'static str {
        match function_code {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x0F => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ModbusFunction, Reply, Request};
    use std::sync::Mutex;

    fn capture(mode: LoggingMode, level: LogLevel) -> (CallbackLogger, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let callback: LogCallback = Box::new(move |level, message| {
            sink.lock().unwrap().push(format!("{} {}", level.as_str(), message));
        });
        (crate::custom_logger!(callback, level, mode), lines)
    }

    #[test]
    fn test_interpreted_request() {
        let (logger, lines) = capture(LoggingMode::Interpreted, LogLevel::Info);
        let request = Request::read(ModbusFunction::ReadHoldingRegisters, 100, 4).unwrap();
        logger.log_package("<-", &Package::request(1, request));

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Read Holding Registers"));
        assert!(lines[0].contains("Address: 100, Quantity: 4"));
    }

    #[test]
    fn test_raw_reply() {
        let (logger, lines) = capture(LoggingMode::Raw, LogLevel::Info);
        let request = Request::read(ModbusFunction::ReadHoldingRegisters, 0, 1).unwrap();
        let mut reply = Reply::for_request(&request).unwrap();
        reply.set_words(&[0xABCD]).unwrap();
        logger.log_package("->", &Package::reply(1, reply));

        assert_eq!(lines.lock().unwrap()[0], "INFO Modbus Reply -> Raw: 010302ABCD");
    }

    #[test]
    fn test_both_mode_respects_level() {
        let (logger, lines) = capture(LoggingMode::Both, LogLevel::Info);
        let request = Request::write_single_coil(3, true);
        logger.log_package("<-", &Package::request(1, request));

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Value: 0xFF00 (ON)"));
    }

    #[test]
    fn test_exception_interpretation() {
        let (logger, lines) = capture(LoggingMode::Interpreted, LogLevel::Debug);
        let request = Request::read(ModbusFunction::ReadCoils, 0, 1).unwrap();
        let reply = Reply::exception(&request, ModbusException::IllegalDataAddress);
        logger.log_package("->", &Package::reply(1, reply));

        assert!(lines.lock().unwrap()[0].contains("Exception: 0x02 (IllegalDataAddress)"));
    }

    #[test]
    fn test_disabled_logger_is_silent() {
        let logger = CallbackLogger::disabled();
        logger.log_package("<-", &Package::request(1, Request::write_single_register(0, 1)));
        logger.log_packet(LogLevel::Error, "send", &[1, 2]);
    }
}
