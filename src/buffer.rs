//! Fixed-capacity circular byte buffer
//!
//! The buffer backs both wire codecs: the RTU codec keeps one inbound and one
//! outbound ring, the socket codec uses one ring as scratch for a single frame.
//!
//! Parsing is done speculatively. A decoder takes a [`Checkpoint`], reads as far
//! as it can, and either keeps the consumed bytes or rolls the cursors back so the
//! same bytes are seen again on the next attempt.
//!
//! ```rust
//! use modbus_engine::buffer::CircularBuffer;
//! use byteorder::BigEndian;
//!
//! let mut ring = CircularBuffer::new(8);
//! ring.write(&[0x12, 0x34, 0x56]);
//!
//! let cp = ring.checkpoint();
//! assert_eq!(ring.read_u16::<BigEndian>().unwrap(), 0x1234);
//! assert!(ring.read_u16::<BigEndian>().is_err());
//! ring.rollback(cp);
//! assert_eq!(ring.len(), 3);
//! ```

use byteorder::ByteOrder;

use crate::error::{ModbusError, ModbusResult};

/// Snapshot of the buffer cursors
///
/// Restoring a checkpoint undoes every read and write made after it. Bytes
/// read since the checkpoint stay in storage until overwritten, so they can be
/// inspected again through [`CircularBuffer::peek_since`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    readpos: usize,
    writpos: usize,
    empty: bool,
    full: bool,
}

/// Ring of bytes with separate read and write cursors
///
/// `empty` and `full` disambiguate the case where both cursors point at the
/// same slot. They are never set together.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    storage: Box<[u8]>,
    readpos: usize,
    writpos: usize,
    empty: bool,
    full: bool,
}

impl CircularBuffer {
    /// Create an empty buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            readpos: 0,
            writpos: 0,
            empty: true,
            full: false,
        }
    }

    /// Create a full buffer holding a copy of `bytes`
    ///
    /// Used as a linear reader over a single received datagram.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::new(bytes.len());
        buffer.write(bytes);
        buffer
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unread bytes
    pub fn len(&self) -> usize {
        if self.empty {
            return 0;
        }
        if self.full {
            return self.capacity();
        }
        (self.writpos + self.capacity() - self.readpos) % self.capacity()
    }

    /// Number of bytes that can still be written
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Drop all content and reset both cursors
    pub fn clear(&mut self) {
        self.readpos = 0;
        self.writpos = 0;
        self.empty = true;
        self.full = false;
    }

    /// Append all of `bytes`, or nothing
    ///
    /// Returns the number of bytes written: `bytes.len()` on success, 0 when
    /// the data does not fit.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len();
        if len == 0 || len > self.free() {
            return 0;
        }

        let cap = self.capacity();
        let first = len.min(cap - self.writpos);
        self.storage[self.writpos..self.writpos + first].copy_from_slice(&bytes[..first]);
        self.storage[..len - first].copy_from_slice(&bytes[first..]);
        self.advance_writer(len);
        len
    }

    /// Read up to `out.len()` bytes
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let len = self.len().min(out.len());
        if len == 0 {
            return 0;
        }

        let (head, tail) = self.region(self.readpos, len);
        out[..head.len()].copy_from_slice(head);
        out[head.len()..len].copy_from_slice(tail);
        self.advance_reader(len);
        len
    }

    /// Discard up to `len` unread bytes, returning how many were dropped
    pub fn skip(&mut self, len: usize) -> usize {
        let len = self.len().min(len);
        self.advance_reader(len);
        len
    }

    /// Up to `len` unread bytes as two contiguous slices, without consuming them
    pub fn peek(&self, len: usize) -> (&[u8], &[u8]) {
        self.region(self.readpos, self.len().min(len))
    }

    pub fn read_u8(&mut self) -> ModbusResult<u8> {
        let mut byte = [0u8; 1];
        if self.read(&mut byte) != 1 {
            return Err(ModbusError::incomplete(1));
        }
        Ok(byte[0])
    }

    /// Read a 16-bit value in byte order `B`
    ///
    /// Nothing is consumed when fewer than two bytes are available.
    pub fn read_u16<B: ByteOrder>(&mut self) -> ModbusResult<u16> {
        let available = self.len();
        if available < 2 {
            return Err(ModbusError::incomplete(2 - available));
        }
        let mut bytes = [0u8; 2];
        self.read(&mut bytes);
        Ok(B::read_u16(&bytes))
    }

    pub fn write_u8(&mut self, value: u8) -> ModbusResult<()> {
        self.write_all(&[value])
    }

    /// Write a 16-bit value in byte order `B`
    pub fn write_u16<B: ByteOrder>(&mut self, value: u16) -> ModbusResult<()> {
        let mut bytes = [0u8; 2];
        B::write_u16(&mut bytes, value);
        self.write_all(&bytes)
    }

    /// Like [`write`](Self::write), reporting a short buffer as an error
    pub fn write_all(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        let free = self.free();
        if bytes.len() > free {
            return Err(ModbusError::buffer_full(bytes.len(), free));
        }
        self.write(bytes);
        Ok(())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            readpos: self.readpos,
            writpos: self.writpos,
            empty: self.empty,
            full: self.full,
        }
    }

    pub fn rollback(&mut self, cp: Checkpoint) {
        self.readpos = cp.readpos;
        self.writpos = cp.writpos;
        self.empty = cp.empty;
        self.full = cp.full;
    }

    /// Bytes read since `cp`
    pub fn consumed_since(&self, cp: &Checkpoint) -> usize {
        let cap = self.capacity();
        if cap == 0 {
            return 0;
        }
        let distance = (self.readpos + cap - cp.readpos) % cap;
        if distance == 0 && cp.full && !self.full {
            cap
        } else {
            distance
        }
    }

    /// Bytes read since `cp`, as two slices
    ///
    /// Only meaningful while nothing has been written after the checkpoint.
    pub fn peek_since(&self, cp: &Checkpoint) -> (&[u8], &[u8]) {
        self.region(cp.readpos, self.consumed_since(cp))
    }

    /// Bytes written since `cp`
    pub fn written_since(&self, cp: &Checkpoint) -> usize {
        let cap = self.capacity();
        if cap == 0 {
            return 0;
        }
        let distance = (self.writpos + cap - cp.writpos) % cap;
        if distance == 0 && cp.empty && !self.empty {
            cap
        } else {
            distance
        }
    }

    /// Bytes written since `cp`, as two slices
    pub fn written_region(&self, cp: &Checkpoint) -> (&[u8], &[u8]) {
        self.region(cp.writpos, self.written_since(cp))
    }

    /// Overwrite already-written bytes at `offset` past the checkpoint's write cursor
    pub fn patch(&mut self, cp: &Checkpoint, offset: usize, bytes: &[u8]) -> ModbusResult<()> {
        let written = self.written_since(cp);
        if offset + bytes.len() > written {
            return Err(ModbusError::internal(format!(
                "patch of {} byte(s) at offset {} outside {} written byte(s)",
                bytes.len(),
                offset,
                written
            )));
        }

        let cap = self.capacity();
        for (i, byte) in bytes.iter().enumerate() {
            self.storage[(cp.writpos + offset + i) % cap] = *byte;
        }
        Ok(())
    }

    /// Pull bytes from `source` until the buffer is full or the source runs dry
    ///
    /// `source` is handed a contiguous free region and returns how many bytes it
    /// stored there. Bytes accepted before an error stay in the buffer.
    pub fn fill_from<F>(&mut self, mut source: F) -> ModbusResult<usize>
    where
        F: FnMut(&mut [u8]) -> ModbusResult<usize>,
    {
        let mut total = 0;
        while self.free() > 0 {
            let offered = self.contiguous_free();
            let start = self.writpos;
            let received = source(&mut self.storage[start..start + offered])?.min(offered);
            self.advance_writer(received);
            total += received;
            if received < offered {
                break;
            }
        }
        Ok(total)
    }

    /// Make exactly one `source` call into the contiguous free region
    pub fn fill_once<F>(&mut self, source: F) -> ModbusResult<usize>
    where
        F: FnOnce(&mut [u8]) -> ModbusResult<usize>,
    {
        if self.free() == 0 {
            return Ok(0);
        }
        let offered = self.contiguous_free();
        let start = self.writpos;
        let received = source(&mut self.storage[start..start + offered])?.min(offered);
        self.advance_writer(received);
        Ok(received)
    }

    /// Offer unread bytes to `sink` until it stops accepting or the buffer is empty
    ///
    /// `sink` returns how many of the offered bytes it took; those are consumed.
    pub fn drain_into<F>(&mut self, mut sink: F) -> ModbusResult<usize>
    where
        F: FnMut(&[u8]) -> ModbusResult<usize>,
    {
        let mut total = 0;
        while !self.is_empty() {
            let offered = self.contiguous_len();
            let start = self.readpos;
            let sent = sink(&self.storage[start..start + offered])?.min(offered);
            self.advance_reader(sent);
            total += sent;
            if sent < offered {
                break;
            }
        }
        Ok(total)
    }

    fn region(&self, start: usize, len: usize) -> (&[u8], &[u8]) {
        if len == 0 {
            return (&[], &[]);
        }
        let first = len.min(self.capacity() - start);
        (&self.storage[start..start + first], &self.storage[..len - first])
    }

    fn contiguous_free(&self) -> usize {
        if self.full {
            0
        } else if self.readpos > self.writpos {
            self.readpos - self.writpos
        } else {
            self.capacity() - self.writpos
        }
    }

    fn contiguous_len(&self) -> usize {
        if self.empty {
            0
        } else if self.writpos > self.readpos {
            self.writpos - self.readpos
        } else {
            self.capacity() - self.readpos
        }
    }

    fn advance_writer(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.writpos = (self.writpos + len) % self.capacity();
        self.full = self.writpos == self.readpos;
        self.empty = false;
    }

    fn advance_reader(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.readpos = (self.readpos + len) % self.capacity();
        self.empty = self.readpos == self.writpos;
        self.full = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;
    use std::collections::VecDeque;

    fn assert_flags(buffer: &CircularBuffer) {
        assert!(!(buffer.is_empty() && buffer.is_full()));
        assert_eq!(buffer.len() + buffer.free(), buffer.capacity());
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let mut buffer = CircularBuffer::new(4);
        assert_eq!(buffer.write(&[1, 2, 3]), 3);
        assert_eq!(buffer.write(&[4, 5]), 0);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.write(&[4]), 1);
        assert!(buffer.is_full());
        assert_flags(&buffer);
    }

    #[test]
    fn test_zero_length_write_changes_nothing() {
        let mut buffer = CircularBuffer::new(4);
        assert_eq!(buffer.write(&[]), 0);
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_wraparound_read_write() {
        let mut buffer = CircularBuffer::new(5);
        buffer.write(&[1, 2, 3, 4]);
        let mut out = [0u8; 3];
        assert_eq!(buffer.read(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);

        // writes across the end of storage
        assert_eq!(buffer.write(&[5, 6, 7, 8]), 4);
        assert!(buffer.is_full());

        let (head, tail) = buffer.peek(5);
        assert_eq!([head, tail].concat(), vec![4, 5, 6, 7, 8]);

        let mut out = [0u8; 8];
        assert_eq!(buffer.read(&mut out), 5);
        assert_eq!(&out[..5], &[4, 5, 6, 7, 8]);
        assert!(buffer.is_empty());
        assert_flags(&buffer);
    }

    #[test]
    fn test_skip_is_clamped() {
        let mut buffer = CircularBuffer::new(4);
        buffer.write(&[1, 2]);
        assert_eq!(buffer.skip(10), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_u16_byte_orders() {
        let mut buffer = CircularBuffer::new(4);
        buffer.write_u16::<BigEndian>(0x1234).unwrap();
        buffer.write_u16::<LittleEndian>(0x1234).unwrap();
        let (head, tail) = buffer.peek(4);
        assert_eq!([head, tail].concat(), vec![0x12, 0x34, 0x34, 0x12]);
        assert_eq!(buffer.read_u16::<BigEndian>().unwrap(), 0x1234);
        assert_eq!(buffer.read_u16::<LittleEndian>().unwrap(), 0x1234);
    }

    #[test]
    fn test_short_reads_consume_nothing() {
        let mut buffer = CircularBuffer::new(4);
        assert!(buffer.read_u8().unwrap_err().is_incomplete());
        buffer.write(&[0xAB]);
        assert_eq!(
            buffer.read_u16::<BigEndian>().unwrap_err(),
            ModbusError::incomplete(1)
        );
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_short_writes_report_buffer_full() {
        let mut buffer = CircularBuffer::new(3);
        buffer.write(&[1, 2]);
        assert_eq!(
            buffer.write_u16::<BigEndian>(7).unwrap_err(),
            ModbusError::buffer_full(2, 1)
        );
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_checkpoint_rollback() {
        let mut buffer = CircularBuffer::new(6);
        buffer.write(&[9, 9, 9]);
        buffer.skip(3);
        buffer.write(&[1, 2, 3, 4, 5]);

        let cp = buffer.checkpoint();
        buffer.read_u8().unwrap();
        buffer.read_u16::<BigEndian>().unwrap();
        buffer.read_u8().unwrap();
        assert_eq!(buffer.consumed_since(&cp), 4);
        let (head, tail) = buffer.peek_since(&cp);
        assert_eq!([head, tail].concat(), vec![1, 2, 3, 4]);

        buffer.rollback(cp);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.read_u8().unwrap(), 1);
    }

    #[test]
    fn test_consumed_since_full_buffer() {
        let mut buffer = CircularBuffer::new(3);
        buffer.write(&[1, 2, 3]);
        let cp = buffer.checkpoint();
        buffer.skip(3);
        assert_eq!(buffer.consumed_since(&cp), 3);
    }

    #[test]
    fn test_patch_written_bytes() {
        let mut buffer = CircularBuffer::new(6);
        buffer.write(&[0, 0, 0, 0]);
        buffer.skip(4);

        let cp = buffer.checkpoint();
        buffer.write(&[0, 0, 0xAA, 0xBB]);
        assert_eq!(buffer.written_since(&cp), 4);
        buffer.patch(&cp, 0, &[0x12, 0x34]).unwrap();
        let (head, tail) = buffer.written_region(&cp);
        assert_eq!([head, tail].concat(), vec![0x12, 0x34, 0xAA, 0xBB]);

        assert!(buffer.patch(&cp, 3, &[1, 2]).is_err());
    }

    #[test]
    fn test_fill_from_wraps_and_stops_when_source_runs_dry() {
        let mut buffer = CircularBuffer::new(6);
        buffer.write(&[0, 0, 0, 0]);
        buffer.skip(4);

        let mut source: VecDeque<u8> = (1..=5).collect();
        let filled = buffer
            .fill_from(|region| {
                let n = region.len().min(source.len());
                for slot in region.iter_mut().take(n) {
                    *slot = source.pop_front().unwrap();
                }
                Ok(n)
            })
            .unwrap();
        assert_eq!(filled, 5);
        let (head, tail) = buffer.peek(6);
        assert_eq!([head, tail].concat(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_fill_from_keeps_bytes_before_error() {
        let mut buffer = CircularBuffer::new(4);
        let mut calls = 0;
        let result = buffer.fill_from(|region| {
            calls += 1;
            if calls == 1 {
                region[0] = 7;
                Ok(1)
            } else {
                Err(ModbusError::io("gone"))
            }
        });
        assert_eq!(result.unwrap(), 1);
        assert_eq!(buffer.len(), 1);

        let result = buffer.fill_from(|_| Err(ModbusError::io("gone")));
        assert!(result.is_err());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_drain_into_partial_sink() {
        let mut buffer = CircularBuffer::new(8);
        buffer.write(&[1, 2, 3, 4, 5]);
        let mut sent = Vec::new();
        let drained = buffer
            .drain_into(|bytes| {
                let n = bytes.len().min(2);
                sent.extend_from_slice(&bytes[..n]);
                Ok(n)
            })
            .unwrap();
        assert_eq!(drained, 2);
        assert_eq!(sent, vec![1, 2]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_randomized_fifo_matches_model() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut buffer = CircularBuffer::new(37);
        let mut model: VecDeque<u8> = VecDeque::new();

        for _ in 0..5_000 {
            if rng.gen_bool(0.5) {
                let len = rng.gen_range(0..12);
                let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                let written = buffer.write(&bytes);
                if !bytes.is_empty() && bytes.len() <= 37 - model.len() {
                    assert_eq!(written, bytes.len());
                    model.extend(bytes);
                } else {
                    assert_eq!(written, 0);
                }
            } else {
                let mut out = vec![0u8; rng.gen_range(0..12)];
                let read = buffer.read(&mut out);
                assert_eq!(read, out.len().min(model.len()));
                for byte in &out[..read] {
                    assert_eq!(Some(*byte), model.pop_front());
                }
            }

            assert_eq!(buffer.len(), model.len());
            assert_eq!(buffer.is_empty(), model.is_empty());
            assert_eq!(buffer.is_full(), model.len() == 37);
            assert_flags(&buffer);
        }
    }
}
