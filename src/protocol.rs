/// Modbus protocol definitions and data structures
///
/// This module contains the core Modbus protocol definitions: function codes,
/// opcode classification, exception codes, and the request/reply/package values
/// that travel between the codecs and the dispatch engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};
use crate::{MAX_COILS_PER_REQUEST, MAX_REGISTERS_PER_REQUEST, PAYLOAD_CAPACITY};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus slave/unit identifier (1-247, 0 = broadcast)
pub type SlaveId = u8;

/// Unit address every slave accepts but never answers
pub const BROADCAST_ADDRESS: SlaveId = 0;

/// Bit 7 of the opcode marks an exception reply
pub const EXCEPTION_MASK: u8 = 0x80;

/// Lower seven bits of the opcode select the function
pub const FUNCTION_MASK: u8 = 0x7F;

/// Coil value meaning "on" in a Write Single Coil request
pub const COIL_ON: u16 = 0xFF00;

/// Coil value meaning "off" in a Write Single Coil request
pub const COIL_OFF: u16 = 0x0000;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// All supported functions, in opcode order
    pub const ALL: [ModbusFunction; 8] = [
        ModbusFunction::ReadCoils,
        ModbusFunction::ReadDiscreteInputs,
        ModbusFunction::ReadHoldingRegisters,
        ModbusFunction::ReadInputRegisters,
        ModbusFunction::WriteSingleCoil,
        ModbusFunction::WriteSingleRegister,
        ModbusFunction::WriteMultipleCoils,
        ModbusFunction::WriteMultipleRegisters,
    ];

    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(self,
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "The function code received in the query is not an allowable action for the server",
            ModbusException::IllegalDataAddress => "The data address received in the query is not an allowable address for the server",
            ModbusException::IllegalDataValue => "A value contained in the query data field is not an allowable value for server",
            ModbusException::ServerDeviceFailure => "An unrecoverable error occurred while the server was attempting to perform the requested action",
            ModbusException::Acknowledge => "The server has accepted the request and is processing it, but a long duration of time will be required to do so",
            ModbusException::ServerDeviceBusy => "The server is engaged in processing a long-duration program command",
            ModbusException::MemoryParityError => "The server attempted to read record file, but detected a parity error in the memory",
            ModbusException::GatewayPathUnavailable => "Gateway was unable to allocate an internal communication path",
            ModbusException::GatewayTargetDeviceFailedToRespond => "No response was obtained from the target device",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// Which body layout a payload uses on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadClass {
    None,
    /// Raw packed bytes (coils, discrete inputs, exception code)
    Bits,
    /// Big-endian 16-bit registers
    Words,
}

/// Raw function-code byte as seen on the wire
///
/// Unlike [`ModbusFunction`] this keeps the exception bit and any unsupported
/// code, so frames can be classified before they are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

impl Opcode {
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Function code with the exception bit masked off
    pub fn function_code(self) -> u8 {
        self.0 & FUNCTION_MASK
    }

    /// Hook-table key for this opcode, if the function is supported
    pub fn function(self) -> Option<ModbusFunction> {
        ModbusFunction::from_u8(self.function_code()).ok()
    }

    pub fn is_exception(self) -> bool {
        self.0 & EXCEPTION_MASK == EXCEPTION_MASK
    }

    /// Whether a decoder should accept a frame carrying this opcode
    ///
    /// Any exception opcode is allowed, whatever its function bits.
    pub fn is_allowed(self) -> bool {
        self.function().is_some() || self.is_exception()
    }

    /// Opcode with the exception bit set
    pub fn to_exception(self) -> Opcode {
        Opcode(self.0 | EXCEPTION_MASK)
    }

    /// Payload layout of a request with this opcode
    pub fn request_payload(self) -> PayloadClass {
        match self.0 {
            0x0F => PayloadClass::Bits,
            0x10 => PayloadClass::Words,
            _ => PayloadClass::None,
        }
    }

    /// Payload layout of a reply with this opcode
    pub fn reply_payload(self) -> PayloadClass {
        if self.is_exception() {
            return PayloadClass::Bits;
        }
        match self.0 {
            0x01 | 0x02 => PayloadClass::Bits,
            0x03 | 0x04 => PayloadClass::Words,
            _ => PayloadClass::None,
        }
    }

    /// Whether a reply echoes the request's address and count
    pub fn reply_has_attributes(self) -> bool {
        matches!(self.0, 0x05 | 0x06 | 0x0F | 0x10)
    }

    /// Whether the count field holds a value rather than a length
    pub fn carries_value(self) -> bool {
        matches!(self.function_code(), 0x05 | 0x06)
    }
}

impl From<ModbusFunction> for Opcode {
    fn from(function: ModbusFunction) -> Self {
        Opcode(function.to_u8())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Second 16-bit field of a request or reply
///
/// Single writes carry the value to write; every other function carries a
/// quantity of coils or registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Length(u16),
    Value(u16),
}

impl Count {
    /// Tag a raw wire value according to the opcode
    pub fn for_opcode(opcode: Opcode, raw: u16) -> Self {
        if opcode.carries_value() {
            Count::Value(raw)
        } else {
            Count::Length(raw)
        }
    }

    /// Wire value
    pub fn raw(self) -> u16 {
        match self {
            Count::Length(v) | Count::Value(v) => v,
        }
    }
}

impl Default for Count {
    fn default() -> Self {
        Count::Length(0)
    }
}

/// Body data of a request or reply
///
/// Storage is inline and bounded. `len` is always the byte count carried on
/// the wire, so a `Words` payload of `len` bytes holds `len / 2` registers.
#[derive(Clone)]
pub enum Payload {
    None,
    Bits { len: u8, bytes: [u8; PAYLOAD_CAPACITY] },
    Words { len: u8, words: [u16; PAYLOAD_CAPACITY / 2] },
}

impl Payload {
    /// Zero-filled payload of the given class and wire length
    pub fn zeroed(class: PayloadClass, len: u8) -> Self {
        match class {
            PayloadClass::None => Payload::None,
            PayloadClass::Bits => Payload::Bits { len, bytes: [0; PAYLOAD_CAPACITY] },
            PayloadClass::Words => Payload::Words { len, words: [0; PAYLOAD_CAPACITY / 2] },
        }
    }

    /// Bits payload holding a copy of `data`
    pub fn bits(data: &[u8]) -> ModbusResult<Self> {
        let len = wire_len(data.len())?;
        let mut bytes = [0; PAYLOAD_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Payload::Bits { len, bytes })
    }

    /// Words payload holding a copy of `data`
    pub fn words(data: &[u16]) -> ModbusResult<Self> {
        let len = wire_len(data.len() * 2)?;
        let mut words = [0; PAYLOAD_CAPACITY / 2];
        words[..data.len()].copy_from_slice(data);
        Ok(Payload::Words { len, words })
    }

    pub fn class(&self) -> PayloadClass {
        match self {
            Payload::None => PayloadClass::None,
            Payload::Bits { .. } => PayloadClass::Bits,
            Payload::Words { .. } => PayloadClass::Words,
        }
    }

    /// Byte count as carried on the wire
    pub fn byte_len(&self) -> u8 {
        match self {
            Payload::None => 0,
            Payload::Bits { len, .. } | Payload::Words { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }

    /// Packed bytes of a `Bits` payload, empty for any other class
    pub fn as_bits(&self) -> &[u8] {
        match self {
            Payload::Bits { len, bytes } => &bytes[..*len as usize],
            _ => &[],
        }
    }

    /// Registers of a `Words` payload, empty for any other class
    pub fn as_words(&self) -> &[u16] {
        match self {
            Payload::Words { len, words } => &words[..*len as usize / 2],
            _ => &[],
        }
    }

    pub fn bits_mut(&mut self) -> &mut [u8] {
        match self {
            Payload::Bits { len, bytes } => &mut bytes[..*len as usize],
            _ => &mut [],
        }
    }

    pub fn words_mut(&mut self) -> &mut [u16] {
        match self {
            Payload::Words { len, words } => &mut words[..*len as usize / 2],
            _ => &mut [],
        }
    }

    /// Unpack the first `count` bits, LSB first
    pub fn to_bools(&self, count: usize) -> Vec<bool> {
        data_utils::unpack_bits(self.as_bits(), count)
    }
}

fn wire_len(len: usize) -> ModbusResult<u8> {
    u8::try_from(len).map_err(|_| {
        ModbusError::invalid_data(format!("Payload of {} bytes exceeds 255", len))
    })
}

impl Default for Payload {
    fn default() -> Self {
        Payload::None
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::None, Payload::None) => true,
            (Payload::Bits { len: a, .. }, Payload::Bits { len: b, .. }) => {
                a == b && self.as_bits() == other.as_bits()
            }
            (Payload::Words { len: a, .. }, Payload::Words { len: b, .. }) => {
                a == b && self.as_words() == other.as_words()
            }
            _ => false,
        }
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => write!(f, "None"),
            Payload::Bits { len, .. } => f
                .debug_struct("Bits")
                .field("len", len)
                .field("bytes", &self.as_bits())
                .finish(),
            Payload::Words { len, .. } => f
                .debug_struct("Words")
                .field("len", len)
                .field("words", &self.as_words())
                .finish(),
        }
    }
}

/// Modbus request (master to slave)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub address: ModbusAddress,
    pub count: Count,
    pub payload: Payload,
}

impl Request {
    /// Request with an empty payload of the opcode's request class
    pub fn new(opcode: Opcode, address: ModbusAddress, count: u16) -> Self {
        Self {
            opcode,
            address,
            count: Count::for_opcode(opcode, count),
            payload: Payload::zeroed(opcode.request_payload(), 0),
        }
    }

    /// Create a new read request
    pub fn read(
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> ModbusResult<Self> {
        if !function.is_read_function() {
            return Err(ModbusError::invalid_data(format!("{} is not a read function", function)));
        }
        if quantity == 0 {
            return Err(ModbusError::invalid_data("Quantity cannot be zero"));
        }
        Ok(Self::new(function.into(), address, quantity))
    }

    pub fn write_single_coil(address: ModbusAddress, on: bool) -> Self {
        let value = if on { COIL_ON } else { COIL_OFF };
        Self::new(ModbusFunction::WriteSingleCoil.into(), address, value)
    }

    pub fn write_single_register(address: ModbusAddress, value: ModbusValue) -> Self {
        Self::new(ModbusFunction::WriteSingleRegister.into(), address, value)
    }

    pub fn write_multiple_coils(address: ModbusAddress, coils: &[bool]) -> ModbusResult<Self> {
        let quantity = quantity_of(coils.len())?;
        let mut request = Self::new(ModbusFunction::WriteMultipleCoils.into(), address, quantity);
        request.payload = Payload::bits(&data_utils::pack_bits(coils))?;
        Ok(request)
    }

    pub fn write_multiple_registers(address: ModbusAddress, values: &[u16]) -> ModbusResult<Self> {
        let quantity = quantity_of(values.len())?;
        let mut request =
            Self::new(ModbusFunction::WriteMultipleRegisters.into(), address, quantity);
        request.payload = Payload::words(values)?;
        Ok(request)
    }

    pub fn function(&self) -> Option<ModbusFunction> {
        self.opcode.function()
    }

    /// Coil state of a Write Single Coil request
    pub fn coil_value(&self) -> Option<bool> {
        match (self.function(), self.count) {
            (Some(ModbusFunction::WriteSingleCoil), Count::Value(v)) => Some(v == COIL_ON),
            _ => None,
        }
    }
}

fn check_quantity(quantity: u16, max: u16) -> ModbusResult<()> {
    if quantity > max {
        return Err(ModbusError::invalid_data(format!(
            "Quantity {} exceeds the limit of {}",
            quantity, max
        )));
    }
    Ok(())
}

fn quantity_of(len: usize) -> ModbusResult<u16> {
    if len == 0 {
        return Err(ModbusError::invalid_data("Quantity cannot be zero"));
    }
    u16::try_from(len).map_err(|_| ModbusError::invalid_data(format!("Quantity {} too large", len)))
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.function() {
            Some(function) => write!(f, "{}", function)?,
            None => write!(f, "Function {}", self.opcode)?,
        }
        write!(f, " addr={}", self.address)?;
        match self.count {
            Count::Length(n) => write!(f, " qty={}", n)?,
            Count::Value(v) => write!(f, " value=0x{:04X}", v)?,
        }
        if !self.payload.is_empty() {
            write!(f, " bytes={}", self.payload.byte_len())?;
        }
        Ok(())
    }
}

/// Modbus reply (slave to master)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub opcode: Opcode,
    pub address: ModbusAddress,
    pub count: Count,
    pub payload: Payload,
}

impl Reply {
    /// Reply with no attributes and an empty payload of the opcode's reply class
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            address: 0,
            count: Count::for_opcode(opcode, 0),
            payload: Payload::zeroed(opcode.reply_payload(), 0),
        }
    }

    /// Reply skeleton answering `request`
    ///
    /// Copies opcode, address and count, then sizes a zeroed payload for the
    /// requested quantity: `ceil(count / 8)` bytes of bits or `count * 2` bytes
    /// of registers. Quantities above 2000 coils or 125 registers are rejected.
    pub fn for_request(request: &Request) -> ModbusResult<Self> {
        let opcode = request.opcode;
        let quantity = request.count.raw();
        let count = quantity as usize;
        let class = opcode.reply_payload();
        let len = match class {
            PayloadClass::None => 0,
            PayloadClass::Bits => {
                check_quantity(quantity, MAX_COILS_PER_REQUEST)?;
                wire_len((count + 7) / 8)?
            }
            PayloadClass::Words => {
                check_quantity(quantity, MAX_REGISTERS_PER_REQUEST)?;
                wire_len(count * 2)?
            }
        };

        Ok(Self {
            opcode,
            address: request.address,
            count: request.count,
            payload: Payload::zeroed(class, len),
        })
    }

    /// Exception reply to `request` carrying `code`
    pub fn exception(request: &Request, code: ModbusException) -> Self {
        let mut bytes = [0; PAYLOAD_CAPACITY];
        bytes[0] = code.to_u8();
        Self {
            opcode: request.opcode.to_exception(),
            address: request.address,
            count: request.count,
            payload: Payload::Bits { len: 1, bytes },
        }
    }

    pub fn function(&self) -> Option<ModbusFunction> {
        self.opcode.function()
    }

    pub fn is_exception(&self) -> bool {
        self.opcode.is_exception()
    }

    /// Exception code carried by an exception reply
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.payload.as_bits().first().copied()
        } else {
            None
        }
    }

    /// Convert an exception reply into the matching error
    pub fn check(&self) -> ModbusResult<()> {
        match self.exception_code() {
            Some(code) => Err(ModbusError::exception(self.opcode.function_code(), code)),
            None => Ok(()),
        }
    }

    /// Fill a bits payload from boolean values, LSB first
    pub fn set_bits(&mut self, values: &[bool]) -> ModbusResult<()> {
        if self.opcode.reply_payload() != PayloadClass::Bits {
            return Err(ModbusError::invalid_data(format!(
                "Opcode {} does not carry bits",
                self.opcode
            )));
        }
        self.payload = Payload::bits(&data_utils::pack_bits(values))?;
        Ok(())
    }

    /// Fill a words payload from register values
    pub fn set_words(&mut self, values: &[u16]) -> ModbusResult<()> {
        if self.opcode.reply_payload() != PayloadClass::Words {
            return Err(ModbusError::invalid_data(format!(
                "Opcode {} does not carry registers",
                self.opcode
            )));
        }
        self.payload = Payload::words(values)?;
        Ok(())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.exception_code() {
            return match ModbusException::from_u8(code) {
                Some(exception) => write!(f, "Exception {} {}", self.opcode, exception),
                None => write!(f, "Exception {} code=0x{:02X}", self.opcode, code),
            };
        }
        match self.function() {
            Some(function) => write!(f, "{}", function)?,
            None => write!(f, "Function {}", self.opcode)?,
        }
        if self.opcode.reply_has_attributes() {
            write!(f, " addr={} count=0x{:04X}", self.address, self.count.raw())?;
        }
        if !self.payload.is_empty() {
            write!(f, " bytes={}", self.payload.byte_len())?;
        }
        Ok(())
    }
}

/// MBAP header fields echoed from request to reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbapHeader {
    pub transaction: u16,
    pub protocol: u16,
}

/// Which side of the conversation an engine plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Decodes requests, encodes replies
    Slave,
    /// Encodes requests, decodes replies
    Master,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Slave => write!(f, "slave"),
            Role::Master => write!(f, "master"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageBody {
    Request(Request),
    Reply(Reply),
}

/// One decoded or to-be-encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub unit: SlaveId,
    pub body: PackageBody,
    /// MBAP header, present only on the socket transport
    pub extra: Option<MbapHeader>,
}

impl Package {
    pub fn request(unit: SlaveId, request: Request) -> Self {
        Self { unit, body: PackageBody::Request(request), extra: None }
    }

    pub fn reply(unit: SlaveId, reply: Reply) -> Self {
        Self { unit, body: PackageBody::Reply(reply), extra: None }
    }

    pub fn with_header(mut self, header: Option<MbapHeader>) -> Self {
        self.extra = header;
        self
    }

    pub fn opcode(&self) -> Opcode {
        match &self.body {
            PackageBody::Request(request) => request.opcode,
            PackageBody::Reply(reply) => reply.opcode,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.unit == BROADCAST_ADDRESS
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit={} ", self.unit)?;
        match &self.body {
            PackageBody::Request(request) => write!(f, "{}", request),
            PackageBody::Reply(reply) => write!(f, "{}", reply),
        }
    }
}

/// Data conversion utilities
pub mod data_utils {
    /// Pack boolean values into bytes
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];

        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                let byte_index = i / 8;
                let bit_index = i % 8;
                bytes[byte_index] |= 1 << bit_index;
            }
        }

        bytes
    }

    /// Unpack bytes into boolean values
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        let mut bits = Vec::with_capacity(bit_count);

        for i in 0..bit_count {
            let byte_index = i / 8;
            let bit_index = i % 8;

            if byte_index < bytes.len() {
                let bit_value = (bytes[byte_index] & (1 << bit_index)) != 0;
                bits.push(bit_value);
            } else {
                bits.push(false);
            }
        }

        bits
    }
}
