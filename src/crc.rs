//! CRC-16/MODBUS checksum
//!
//! Reflected polynomial 0xA001, initial value 0xFFFF. The RTU trailer carries the
//! result low byte first.

use crc::{Crc, CRC_16_MODBUS};

use crate::buffer::CircularBuffer;

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Checksum of a contiguous slice
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Checksum of a ring region split in two slices
pub fn crc16_parts((head, tail): (&[u8], &[u8])) -> u16 {
    let mut digest = CRC_MODBUS.digest();
    digest.update(head);
    digest.update(tail);
    digest.finalize()
}

/// Checksum of the next `len` unread bytes, without consuming them
pub fn crc16_unread(buffer: &CircularBuffer, len: usize) -> u16 {
    crc16_parts(buffer.peek(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(crc16(&[0x01]), 0x807E);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
        assert_eq!(crc16(&[0xFF, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x1E90);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_split_region_matches_contiguous() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        for split in 0..=frame.len() {
            let (head, tail) = frame.split_at(split);
            assert_eq!(crc16_parts((head, tail)), 0x0BC4);
        }
    }

    #[test]
    fn test_unread_over_wrapped_buffer() {
        let mut buffer = CircularBuffer::new(8);
        buffer.write(&[0; 5]);
        buffer.skip(5);
        buffer.write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);

        assert_eq!(crc16_unread(&buffer, 6), 0x0BC4);
        assert_eq!(buffer.len(), 8);
    }
}
