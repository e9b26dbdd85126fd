/// Wire codec abstraction and shared PDU body layouts
///
/// Both wire formats carry the same request/reply bodies after the unit and
/// opcode bytes; only the framing around them differs. The functions here read
/// and write those bodies on a [`CircularBuffer`], leaving framing to the RTU
/// and socket codecs.

use byteorder::BigEndian;
use serde::Serialize;

use crate::buffer::CircularBuffer;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{
    Count, Opcode, Package, PackageBody, Payload, PayloadClass, Reply, Request, Role,
};
use crate::PAYLOAD_CAPACITY;

/// Frame decoder/encoder bound to one transport
///
/// `decode` is called once per engine tick and must never block. An
/// `Incomplete` error means "nothing to do yet"; any other error means input
/// was rejected and the engine should move on.
pub trait Codec: Send {
    /// Decode at most one package for the given role
    ///
    /// A slave decodes requests, a master decodes replies.
    fn decode(&mut self, role: Role) -> ModbusResult<Package>;

    /// Encode one package for the given role
    ///
    /// A slave encodes replies, a master encodes requests.
    fn encode(&mut self, role: Role, package: &Package) -> ModbusResult<()>;

    /// Push any buffered output to the transport
    fn flush(&mut self) -> ModbusResult<()> {
        Ok(())
    }

    /// Check if the underlying transport is open
    fn is_connected(&self) -> bool;

    /// Framing counters
    fn stats(&self) -> CodecStats;
}

impl<C: Codec + ?Sized> Codec for Box<C> {
    fn decode(&mut self, role: Role) -> ModbusResult<Package> {
        (**self).decode(role)
    }

    fn encode(&mut self, role: Role, package: &Package) -> ModbusResult<()> {
        (**self).encode(role, package)
    }

    fn flush(&mut self) -> ModbusResult<()> {
        (**self).flush()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn stats(&self) -> CodecStats {
        (**self).stats()
    }
}

/// Codec statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodecStats {
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    /// Bytes dropped to realign on the stream
    pub resyncs: u64,
    pub crc_errors: u64,
    pub frame_errors: u64,
    pub encode_failures: u64,
    /// Transport kill/init cycles after an I/O failure
    pub reinitializations: u64,
    pub sends_abandoned: u64,
}

/// Read a request body (everything after the opcode)
pub fn read_request(opcode: Opcode, buf: &mut CircularBuffer) -> ModbusResult<Request> {
    let address = buf.read_u16::<BigEndian>()?;
    let count = buf.read_u16::<BigEndian>()?;

    let payload = match opcode.request_payload() {
        PayloadClass::None => Payload::None,
        class => {
            let len = buf.read_u8()?;
            read_payload(class, len, buf)?
        }
    };

    Ok(Request {
        opcode,
        address,
        count: Count::for_opcode(opcode, count),
        payload,
    })
}

/// Read a reply body (everything after the opcode)
///
/// Exception replies carry a single code byte without a length prefix.
pub fn read_reply(opcode: Opcode, buf: &mut CircularBuffer) -> ModbusResult<Reply> {
    let (address, count) = if opcode.reply_has_attributes() {
        (buf.read_u16::<BigEndian>()?, buf.read_u16::<BigEndian>()?)
    } else {
        (0, 0)
    };

    let payload = match opcode.reply_payload() {
        PayloadClass::None => Payload::None,
        class => {
            let len = if opcode.is_exception() { 1 } else { buf.read_u8()? };
            read_payload(class, len, buf)?
        }
    };

    Ok(Reply {
        opcode,
        address,
        count: Count::for_opcode(opcode, count),
        payload,
    })
}

/// Read `len` payload bytes of the given class
fn read_payload(class: PayloadClass, len: u8, buf: &mut CircularBuffer) -> ModbusResult<Payload> {
    let mut payload = Payload::zeroed(class, len);
    match &mut payload {
        Payload::None => {}
        Payload::Bits { bytes, .. } => {
            let len = len as usize;
            let available = buf.len();
            if available < len {
                return Err(ModbusError::incomplete(len - available));
            }
            buf.read(&mut bytes[..len]);
        }
        Payload::Words { words, .. } => {
            for word in words.iter_mut().take(len as usize / 2) {
                *word = buf.read_u16::<BigEndian>()?;
            }
        }
    }
    Ok(payload)
}

/// Write a request body
pub fn write_request(request: &Request, buf: &mut CircularBuffer) -> ModbusResult<()> {
    buf.write_u16::<BigEndian>(request.address)?;
    buf.write_u16::<BigEndian>(request.count.raw())?;

    let class = request.opcode.request_payload();
    if class != PayloadClass::None {
        check_class(request.opcode, class, &request.payload)?;
        buf.write_u8(request.payload.byte_len())?;
        write_payload(&request.payload, buf)?;
    }
    Ok(())
}

/// Write a reply body
pub fn write_reply(reply: &Reply, buf: &mut CircularBuffer) -> ModbusResult<()> {
    if reply.opcode.reply_has_attributes() {
        buf.write_u16::<BigEndian>(reply.address)?;
        buf.write_u16::<BigEndian>(reply.count.raw())?;
    }

    let class = reply.opcode.reply_payload();
    if class != PayloadClass::None {
        check_class(reply.opcode, class, &reply.payload)?;
        if !reply.opcode.is_exception() {
            buf.write_u8(reply.payload.byte_len())?;
        }
        write_payload(&reply.payload, buf)?;
    }
    Ok(())
}

fn write_payload(payload: &Payload, buf: &mut CircularBuffer) -> ModbusResult<()> {
    match payload {
        Payload::None => Ok(()),
        Payload::Bits { .. } => buf.write_all(payload.as_bits()),
        Payload::Words { .. } => {
            for word in payload.as_words() {
                buf.write_u16::<BigEndian>(*word)?;
            }
            Ok(())
        }
    }
}

fn check_class(opcode: Opcode, expected: PayloadClass, payload: &Payload) -> ModbusResult<()> {
    if payload.class() != expected {
        return Err(ModbusError::invalid_data(format!(
            "Opcode {} expects a {:?} payload, got {:?}",
            opcode,
            expected,
            payload.class()
        )));
    }
    Ok(())
}

/// Check that a package body matches what `role` may send
pub fn check_outgoing(role: Role, package: &Package) -> ModbusResult<()> {
    match (role, &package.body) {
        (Role::Slave, PackageBody::Reply(_)) | (Role::Master, PackageBody::Request(_)) => Ok(()),
        (Role::Slave, PackageBody::Request(_)) => {
            Err(ModbusError::invalid_data("A slave can only send replies"))
        }
        (Role::Master, PackageBody::Reply(_)) => {
            Err(ModbusError::invalid_data("A master can only send requests"))
        }
    }
}

/// Write unit, opcode and body
pub fn write_pdu(package: &Package, buf: &mut CircularBuffer) -> ModbusResult<()> {
    buf.write_u8(package.unit)?;
    buf.write_u8(package.opcode().raw())?;
    match &package.body {
        PackageBody::Request(request) => write_request(request, buf),
        PackageBody::Reply(reply) => write_reply(reply, buf),
    }
}

/// Unit, opcode and body as a byte vector, without framing
pub fn pdu_bytes(package: &Package) -> ModbusResult<Vec<u8>> {
    // unit + opcode + address + count + length prefix + payload
    let mut buf = CircularBuffer::new(PAYLOAD_CAPACITY + 7);
    write_pdu(package, &mut buf)?;
    let (head, tail) = buf.peek(buf.len());
    Ok([head, tail].concat())
}
