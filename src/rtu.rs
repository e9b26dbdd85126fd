//! # Modbus RTU codec
//!
//! Frames are `[unit][opcode][body][crc lo][crc hi]` with no length field, so
//! the decoder works speculatively on an inbound ring: it parses as far as the
//! opcode dictates and checks the trailing CRC.
//!
//! - Not enough bytes yet: the cursors roll back and the frame is retried
//!   whole on the next call.
//! - Unknown opcode or CRC mismatch: the cursors roll back and exactly one
//!   byte is dropped, so the decoder slides along the stream until it lines up
//!   with a real frame boundary.
//! - Not enough bytes while the ring is already full: treated like a bad
//!   opcode, since the awaited frame can never fit.
//!
//! Encoded frames are queued on an outbound ring and pushed to the transport
//! as it accepts them.

use byteorder::LittleEndian;
use log::{debug, warn};

use crate::buffer::{Checkpoint, CircularBuffer};
use crate::codec::{self, Codec, CodecStats};
use crate::crc::crc16_parts;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{Opcode, Package, PackageBody, Role};
use crate::transport::{log_packet, ModbusTransport};
use crate::DEFAULT_RTU_BUFFER_CAPACITY;

/// RTU codec owning its transport and both rings
pub struct RtuCodec<T: ModbusTransport> {
    transport: T,
    inbound: CircularBuffer,
    outbound: CircularBuffer,
    stats: CodecStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl<T: ModbusTransport> RtuCodec<T> {
    /// Create a codec with default-sized rings
    pub fn new(transport: T) -> Self {
        Self::with_capacity(transport, DEFAULT_RTU_BUFFER_CAPACITY)
    }

    /// Create a codec whose rings each hold `capacity` bytes
    pub fn with_capacity(transport: T, capacity: usize) -> Self {
        Self {
            transport,
            inbound: CircularBuffer::new(capacity),
            outbound: CircularBuffer::new(capacity),
            stats: CodecStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Bytes received but not yet decoded
    pub fn inbound(&self) -> &CircularBuffer {
        &self.inbound
    }

    /// Encoded bytes not yet accepted by the transport
    pub fn outbound(&self) -> &CircularBuffer {
        &self.outbound
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Top up the inbound ring from the transport
    fn pull(&mut self) {
        let transport = &mut self.transport;
        if let Err(e) = self.inbound.fill_from(|region| transport.recv(region)) {
            warn!("RTU receive failed, reinitializing transport: {}", e);
            self.reinitialize();
        }
    }

    /// Offer queued output to the transport
    fn push(&mut self) -> ModbusResult<usize> {
        let transport = &mut self.transport;
        match self.outbound.drain_into(|bytes| transport.send(bytes)) {
            Ok(sent) => Ok(sent),
            Err(e) => {
                warn!("RTU send failed, reinitializing transport: {}", e);
                self.reinitialize();
                Err(e)
            }
        }
    }

    fn reinitialize(&mut self) {
        self.transport.kill();
        if let Err(e) = self.transport.init() {
            warn!("RTU transport init failed: {}", e);
        }
        self.stats.reinitializations += 1;
    }

    /// Attempt one frame parse on the inbound ring
    fn parse(&mut self, role: Role) -> ModbusResult<Package> {
        let cp = self.inbound.checkpoint();
        match parse_frame(&mut self.inbound, role, &cp) {
            Ok(package) => {
                if self.packet_logging {
                    let (head, tail) = self.inbound.peek_since(&cp);
                    log_packet("recv", &[head, tail].concat(), "RTU", Some(package.unit));
                }
                self.stats.frames_decoded += 1;
                Ok(package)
            }
            Err(e) if e.is_incomplete() => {
                self.inbound.rollback(cp);
                if !self.inbound.is_full() {
                    return Err(e);
                }
                // no further bytes can arrive, so this frame start is bogus
                self.inbound.skip(1);
                self.stats.resyncs += 1;
                debug!("RTU resync on a full ring, dropped one byte: {}", e);
                Err(ModbusError::frame("Frame does not fit the inbound ring"))
            }
            Err(e) => {
                self.inbound.rollback(cp);
                self.inbound.skip(1);
                self.stats.resyncs += 1;
                if matches!(e, ModbusError::CrcMismatch { .. }) {
                    self.stats.crc_errors += 1;
                }
                debug!("RTU resync, dropped one byte: {}", e);
                Err(e)
            }
        }
    }
}

/// Parse one frame starting at the read cursor
///
/// On error the cursor is left wherever parsing stopped; the caller rolls back.
fn parse_frame(
    buf: &mut CircularBuffer,
    role: Role,
    cp: &Checkpoint,
) -> ModbusResult<Package> {
    let unit = buf.read_u8()?;
    let opcode = Opcode(buf.read_u8()?);
    if !opcode.is_allowed() {
        return Err(ModbusError::invalid_function(opcode.raw()));
    }

    let body = match role {
        Role::Slave => PackageBody::Request(codec::read_request(opcode, buf)?),
        Role::Master => PackageBody::Reply(codec::read_reply(opcode, buf)?),
    };

    let expected = crc16_parts(buf.peek_since(cp));
    let actual = buf.read_u16::<LittleEndian>()?;
    if actual != expected {
        return Err(ModbusError::crc_mismatch(expected, actual));
    }

    Ok(Package { unit, body, extra: None })
}

/// Write one complete frame at the write cursor
fn write_frame(
    buf: &mut CircularBuffer,
    package: &Package,
    cp: &Checkpoint,
) -> ModbusResult<()> {
    codec::write_pdu(package, buf)?;
    let crc = crc16_parts(buf.written_region(cp));
    buf.write_u16::<LittleEndian>(crc)
}

impl<T: ModbusTransport> Codec for RtuCodec<T> {
    fn decode(&mut self, role: Role) -> ModbusResult<Package> {
        self.pull();
        // send failures already reinitialized the transport
        let _ = self.push();

        if self.inbound.is_empty() {
            return Err(ModbusError::incomplete(1));
        }
        self.parse(role)
    }

    fn encode(&mut self, role: Role, package: &Package) -> ModbusResult<()> {
        codec::check_outgoing(role, package)?;

        let cp = self.outbound.checkpoint();
        if let Err(e) = write_frame(&mut self.outbound, package, &cp) {
            self.outbound.rollback(cp);
            self.stats.encode_failures += 1;
            return Err(e);
        }

        if self.packet_logging {
            let (head, tail) = self.outbound.written_region(&cp);
            log_packet("send", &[head, tail].concat(), "RTU", Some(package.unit));
        }
        self.stats.frames_encoded += 1;
        Ok(())
    }

    fn flush(&mut self) -> ModbusResult<()> {
        self.push().map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn stats(&self) -> CodecStats {
        self.stats.clone()
    }
}
