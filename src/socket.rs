//! # Modbus TCP (MBAP) codec
//!
//! Each receive is treated as exactly one frame:
//! `[transaction:2][protocol:2][length:2][unit][opcode][body]`, big-endian.
//! A frame whose length field disagrees with the bytes received is rejected
//! outright; there is no resynchronization on a stream transport.
//!
//! Encoding writes a zeroed header, the PDU, then backpatches the header once
//! the body length is known. The frame is sent with a bounded number of
//! attempts, each resuming after the bytes already accepted.

use byteorder::BigEndian;
use log::{debug, warn};

use crate::buffer::CircularBuffer;
use crate::codec::{self, Codec, CodecStats};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{MbapHeader, Opcode, Package, PackageBody, Role};
use crate::transport::{log_packet, ModbusTransport};
use crate::MAX_TCP_FRAME_SIZE;

/// Modbus TCP Application Protocol header size
pub const MBAP_HEADER_SIZE: usize = 6;

/// Send calls made for one frame before giving up
pub const SEND_RETRY_LIMIT: usize = 20;

/// MBAP codec owning its transport and a one-frame scratch ring
pub struct SocketCodec<T: ModbusTransport> {
    transport: T,
    scratch: CircularBuffer,
    transaction_id: u16,
    stats: CodecStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl<T: ModbusTransport> SocketCodec<T> {
    pub fn new(transport: T) -> Self {
        Self::with_capacity(transport, MAX_TCP_FRAME_SIZE)
    }

    pub fn with_capacity(transport: T, capacity: usize) -> Self {
        Self {
            transport,
            scratch: CircularBuffer::new(capacity),
            transaction_id: 0,
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

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Get next transaction ID
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    /// Header for an outgoing package
    fn header_for(&mut self, role: Role, package: &Package) -> ModbusResult<MbapHeader> {
        match (role, package.extra) {
            (_, Some(header)) => Ok(header),
            (Role::Slave, None) => Err(ModbusError::protocol(
                "A TCP reply needs the MBAP header of its request",
            )),
            (Role::Master, None) => Ok(MbapHeader {
                transaction: self.next_transaction_id(),
                protocol: 0,
            }),
        }
    }

    /// Parse the single frame held in the scratch ring
    fn parse(&mut self, role: Role) -> ModbusResult<Package> {
        let buf = &mut self.scratch;
        let header = MbapHeader {
            transaction: buf.read_u16::<BigEndian>().map_err(truncated)?,
            protocol: buf.read_u16::<BigEndian>().map_err(truncated)?,
        };
        let length = buf.read_u16::<BigEndian>().map_err(truncated)? as usize;
        if length != buf.len() {
            return Err(ModbusError::frame(format!(
                "MBAP length {} but {} byte(s) follow the header",
                length,
                buf.len()
            )));
        }

        let unit = buf.read_u8().map_err(truncated)?;
        let opcode = Opcode(buf.read_u8().map_err(truncated)?);

        let body = match role {
            Role::Slave => {
                PackageBody::Request(codec::read_request(opcode, buf).map_err(truncated)?)
            }
            Role::Master => {
                return Err(ModbusError::unsupported("Decoding replies over TCP"));
            }
        };

        Ok(Package { unit, body, extra: Some(header) })
    }

    /// Send the scratch ring content with a bounded number of attempts
    fn send_scratch(&mut self) -> ModbusResult<()> {
        let mut attempts = 0;
        while !self.scratch.is_empty() {
            if attempts == SEND_RETRY_LIMIT {
                let remaining = self.scratch.len();
                warn!(
                    "TCP send abandoned after {} attempts, {} byte(s) unsent",
                    attempts, remaining
                );
                self.stats.sends_abandoned += 1;
                return Err(ModbusError::send_abandoned(attempts, remaining));
            }

            let (pending, _) = self.scratch.peek(self.scratch.len());
            let sent = match self.transport.send(pending) {
                Ok(sent) => sent,
                Err(e) => {
                    warn!("TCP send failed: {}", e);
                    self.stats.sends_abandoned += 1;
                    return Err(e);
                }
            };
            self.scratch.skip(sent);
            attempts += 1;
        }
        Ok(())
    }
}

fn truncated(e: ModbusError) -> ModbusError {
    if e.is_incomplete() {
        ModbusError::frame("Truncated MBAP frame")
    } else {
        e
    }
}

impl<T: ModbusTransport> Codec for SocketCodec<T> {
    fn decode(&mut self, role: Role) -> ModbusResult<Package> {
        self.scratch.clear();
        let transport = &mut self.transport;
        let received = match self.scratch.fill_once(|region| transport.recv(region)) {
            Ok(received) => received,
            Err(e) => {
                warn!("TCP receive failed, closing link: {}", e);
                self.transport.kill();
                return Err(e);
            }
        };
        if received == 0 {
            return Err(ModbusError::incomplete(MBAP_HEADER_SIZE));
        }

        if self.packet_logging {
            let (head, tail) = self.scratch.peek(received);
            log_packet("recv", &[head, tail].concat(), "TCP", None);
        }

        match self.parse(role) {
            Ok(package) => {
                self.stats.frames_decoded += 1;
                Ok(package)
            }
            Err(e) => {
                if matches!(e, ModbusError::Frame { .. }) {
                    self.stats.frame_errors += 1;
                }
                debug!("TCP frame rejected: {}", e);
                Err(e)
            }
        }
    }

    fn encode(&mut self, role: Role, package: &Package) -> ModbusResult<()> {
        codec::check_outgoing(role, package)?;
        let header = self.header_for(role, package)?;

        self.scratch.clear();
        let cp = self.scratch.checkpoint();
        let written = self
            .scratch
            .write_all(&[0; MBAP_HEADER_SIZE])
            .and_then(|_| codec::write_pdu(package, &mut self.scratch));
        if let Err(e) = written {
            self.scratch.clear();
            self.stats.encode_failures += 1;
            return Err(e);
        }

        let body_len = self.scratch.written_since(&cp) - MBAP_HEADER_SIZE;
        let length = match u16::try_from(body_len) {
            Ok(length) => length,
            Err(_) => {
                self.scratch.clear();
                self.stats.encode_failures += 1;
                return Err(ModbusError::frame(format!(
                    "MBAP length {} does not fit 16 bits",
                    body_len
                )));
            }
        };
        let mut mbap = [0u8; MBAP_HEADER_SIZE];
        mbap[0..2].copy_from_slice(&header.transaction.to_be_bytes());
        mbap[2..4].copy_from_slice(&header.protocol.to_be_bytes());
        mbap[4..6].copy_from_slice(&length.to_be_bytes());
        self.scratch.patch(&cp, 0, &mbap)?;

        if self.packet_logging {
            let (head, tail) = self.scratch.written_region(&cp);
            log_packet("send", &[head, tail].concat(), "TCP", Some(package.unit));
        }
        self.stats.frames_encoded += 1;

        self.send_scratch()
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn stats(&self) -> CodecStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Count, ModbusFunction, Reply, Request};
    use crate::transport::MemoryTransport;

    const READ_REQUEST: [u8; 12] = [
        0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x10, 0x00, 0x02,
    ];

    fn codec() -> (SocketCodec<MemoryTransport>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let wire = transport.clone();
        (SocketCodec::new(transport), wire)
    }

    #[test]
    fn test_decode_request_keeps_header() {
        let (mut codec, wire) = codec();
        wire.inject(&READ_REQUEST);

        let package = codec.decode(Role::Slave).unwrap();
        assert_eq!(package.unit, 1);
        assert_eq!(package.extra, Some(MbapHeader { transaction: 7, protocol: 0 }));
        match package.body {
            PackageBody::Request(request) => {
                assert_eq!(request.address, 0x10);
                assert_eq!(request.count, Count::Length(2));
            }
            PackageBody::Reply(_) => panic!("expected a request"),
        }
    }

    #[test]
    fn test_nothing_received_is_incomplete() {
        let (mut codec, _wire) = codec();
        assert!(codec.decode(Role::Slave).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let (mut codec, wire) = codec();
        let mut frame = READ_REQUEST.to_vec();
        frame[5] = 0x07;
        wire.inject(&frame);

        let err = codec.decode(Role::Slave).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
        assert_eq!(codec.stats().frame_errors, 1);
    }

    #[test]
    fn test_truncated_body_is_a_frame_error() {
        let (mut codec, wire) = codec();
        // write multiple coils claiming two payload bytes but carrying one
        wire.inject(&[
            0x00, 0x01, 0x00, 0x00, 0x00, 0x08, 0x01, 0x0F, 0x00, 0x00, 0x00, 0x10, 0x02, 0xFF,
        ]);
        let err = codec.decode(Role::Slave).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[test]
    fn test_receive_failure_closes_link() {
        let (mut codec, wire) = codec();
        wire.fail_next_recv(1);
        assert!(codec.decode(Role::Slave).unwrap_err().is_transport_error());
        assert!(!codec.is_connected());
        assert_eq!(wire.kills(), 1);
    }

    #[test]
    fn test_master_decode_unsupported() {
        let (mut codec, wire) = codec();
        wire.inject(&READ_REQUEST);
        let err = codec.decode(Role::Master).unwrap_err();
        assert!(matches!(err, ModbusError::Unsupported { .. }));
    }

    #[test]
    fn test_encode_reply_backpatches_header() {
        let (mut codec, wire) = codec();
        let request = Request::read(ModbusFunction::ReadHoldingRegisters, 0x10, 2).unwrap();
        let mut reply = Reply::for_request(&request).unwrap();
        reply.set_words(&[0x1234, 0x5678]).unwrap();
        let header = MbapHeader { transaction: 7, protocol: 0 };

        codec.encode(Role::Slave, &Package::reply(1, reply).with_header(Some(header))).unwrap();
        assert_eq!(
            wire.take_sent(),
            vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn test_slave_reply_without_header_is_rejected() {
        let (mut codec, wire) = codec();
        let reply = Reply::for_request(&Request::write_single_register(0, 1)).unwrap();
        assert!(codec.encode(Role::Slave, &Package::reply(1, reply)).is_err());
        assert!(wire.take_sent().is_empty());
    }

    #[test]
    fn test_master_encode_numbers_transactions() {
        let (mut codec, wire) = codec();
        let request = Request::read(ModbusFunction::ReadCoils, 0, 8).unwrap();
        codec.encode(Role::Master, &Package::request(1, request.clone())).unwrap();
        codec.encode(Role::Master, &Package::request(1, request)).unwrap();

        let sent = wire.take_sent();
        assert_eq!(sent.len(), 24);
        assert_eq!(
            &sent[..12],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x08]
        );
        assert_eq!(&sent[12..14], &[0x00, 0x02]);
    }

    #[test]
    fn test_partial_sends_resume_after_sent_prefix() {
        let (mut codec, wire) = codec();
        wire.set_send_limit(Some(5));
        let reply = Reply::for_request(&Request::write_single_register(1, 3)).unwrap();
        let header = MbapHeader { transaction: 1, protocol: 0 };

        codec.encode(Role::Slave, &Package::reply(1, reply).with_header(Some(header))).unwrap();
        assert_eq!(
            wire.take_sent(),
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x03]
        );
    }

    #[test]
    fn test_stalled_send_is_abandoned() {
        let (mut codec, wire) = codec();
        wire.set_send_limit(Some(0));
        let reply = Reply::for_request(&Request::write_single_register(1, 3)).unwrap();
        let header = MbapHeader { transaction: 1, protocol: 0 };

        let err = codec
            .encode(Role::Slave, &Package::reply(1, reply).with_header(Some(header)))
            .unwrap_err();
        assert_eq!(err, ModbusError::send_abandoned(SEND_RETRY_LIMIT, 12));
        assert_eq!(codec.stats().sends_abandoned, 1);
    }

    #[test]
    fn test_send_error_abandons_immediately() {
        let (mut codec, wire) = codec();
        wire.fail_next_send(1);
        let reply = Reply::for_request(&Request::write_single_register(1, 3)).unwrap();
        let header = MbapHeader::default();

        let err = codec
            .encode(Role::Slave, &Package::reply(1, reply).with_header(Some(header)))
            .unwrap_err();
        assert!(err.is_transport_error());
        assert!(wire.take_sent().is_empty());
    }
}
