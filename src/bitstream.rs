use std::io::SeekFrom;
use std::sync::Arc;

use crate::error::{PargzError, Result};
use crate::file_reader::FileReader;

/// Default byte buffer size. Power of two, large enough that sequential
/// decoding refills rarely, small enough to keep per-worker memory bounded.
pub const BYTE_BUFFER_SIZE: usize = 128 * 1024;

const_assert!(BYTE_BUFFER_SIZE.is_power_of_two());

/// Lazy sequence of bits over a [`FileReader`], LSB-first inside each byte
/// (bit 0 is the lowest-addressed bit, as in all DEFLATE streams).
///
/// Two levels of buffering: a byte buffer refilled with sequential reads from
/// the source, and a bit buffer refilled bytewise from the byte buffer.
/// `tell()` always equals the number of bits logically consumed, independent
/// of what the buffers currently hold.
pub struct BitReader {
    source: Arc<dyn FileReader>,

    byte_buffer: Box<[u8]>,
    /// File offset of `byte_buffer[0]`.
    buffer_file_offset: u64,
    /// Valid bytes in `byte_buffer`.
    buffer_len: usize,
    /// Next byte to move into the bit buffer.
    byte_pos: usize,

    /// Holds up to 64 + 7 pending bits, lowest bit is the next one.
    bit_buffer: u128,
    bit_count: u32,
}

impl Clone for BitReader {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            byte_buffer: self.byte_buffer.clone(),
            buffer_file_offset: self.buffer_file_offset,
            buffer_len: self.buffer_len,
            byte_pos: self.byte_pos,
            bit_buffer: self.bit_buffer,
            bit_count: self.bit_count,
        }
    }
}

impl BitReader {
    pub fn new(source: Arc<dyn FileReader>) -> Self {
        Self::with_buffer_size(source, BYTE_BUFFER_SIZE)
    }

    pub fn with_buffer_size(source: Arc<dyn FileReader>, buffer_size: usize) -> Self {
        Self {
            source,
            byte_buffer: vec![0u8; buffer_size.max(8)].into_boxed_slice(),
            buffer_file_offset: 0,
            buffer_len: 0,
            byte_pos: 0,
            bit_buffer: 0,
            bit_count: 0,
        }
    }

    /// Total size of the underlying source in bits.
    #[inline]
    pub fn size(&self) -> u64 {
        self.source.size() * 8
    }

    /// Bit offset of the next bit a `read` would return.
    #[inline]
    pub fn tell(&self) -> u64 {
        (self.buffer_file_offset + self.byte_pos as u64) * 8 - self.bit_count as u64
    }

    #[inline]
    pub fn eof(&self) -> bool {
        self.tell() >= self.size()
    }

    pub fn source(&self) -> &Arc<dyn FileReader> {
        &self.source
    }

    #[cold]
    fn refill_byte_buffer(&mut self) -> Result<()> {
        self.buffer_file_offset += self.buffer_len as u64;
        self.byte_pos = 0;
        self.buffer_len = self
            .source
            .read_at(self.buffer_file_offset, &mut self.byte_buffer)?;
        Ok(())
    }

    /// Pull bytes from the byte buffer until at least `count` bits are
    /// pending or the source is exhausted.
    #[inline]
    fn fill_bit_buffer(&mut self, count: u32) -> Result<()> {
        debug_assert!(count <= 64);
        while self.bit_count < count {
            if self.byte_pos == self.buffer_len {
                self.refill_byte_buffer()?;
                if self.buffer_len == 0 {
                    return Ok(()); // end of source, caller checks bit_count
                }
            }
            self.bit_buffer |= (self.byte_buffer[self.byte_pos] as u128) << self.bit_count;
            self.byte_pos += 1;
            self.bit_count += 8;
        }
        Ok(())
    }

    /// Next `count` bits without advancing, zero-padded past end of source.
    /// `count` must be in `[0, 64]`.
    #[inline]
    pub fn peek(&mut self, count: u32) -> Result<u64> {
        debug_assert!(count <= 64);
        self.fill_bit_buffer(count)?;
        Ok(low_bits(self.bit_buffer, count.min(self.bit_count)))
    }

    /// How many bits a `peek(count)` actually has available.
    #[inline]
    pub fn peek_available(&self, count: u32) -> u32 {
        let remaining = self.size().saturating_sub(self.tell());
        (count as u64).min(remaining) as u32
    }

    /// Read and consume `count` bits, `count` in `[0, 64]`. `read(0)` is a
    /// no-op returning 0.
    #[inline]
    pub fn read(&mut self, count: u32) -> Result<u64> {
        debug_assert!(count <= 64);
        if count == 0 {
            return Ok(0);
        }
        self.fill_bit_buffer(count)?;
        if self.bit_count < count {
            return Err(PargzError::UnexpectedEof);
        }
        let result = low_bits(self.bit_buffer, count);
        self.remove_bits(count);
        Ok(result)
    }

    /// Drop `count` already-peeked bits.
    #[inline]
    pub fn remove_bits(&mut self, count: u32) {
        debug_assert!(count <= self.bit_count);
        self.bit_buffer >>= count;
        self.bit_count -= count;
    }

    /// Skip to the next byte boundary, discarding up to 7 bits.
    #[inline]
    pub fn align_to_byte(&mut self) {
        let partial = (self.tell() % 8) as u32;
        if partial != 0 {
            self.remove_bits((8 - partial).min(self.bit_count));
        }
    }

    /// Byte-aligned bulk read. The caller must be at a byte boundary.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(self.tell() % 8, 0);

        let mut written = 0;
        // Drain whole bytes still pending in the bit buffer first.
        while self.bit_count >= 8 && written < out.len() {
            out[written] = (self.bit_buffer & 0xFF) as u8;
            self.remove_bits(8);
            written += 1;
        }
        while written < out.len() {
            if self.byte_pos == self.buffer_len {
                self.refill_byte_buffer()?;
                if self.buffer_len == 0 {
                    return Err(PargzError::UnexpectedEof);
                }
            }
            let available = (self.buffer_len - self.byte_pos).min(out.len() - written);
            out[written..written + available]
                .copy_from_slice(&self.byte_buffer[self.byte_pos..self.byte_pos + available]);
            self.byte_pos += available;
            written += available;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(8)? as u8)
    }

    pub fn read_le_u16(&mut self) -> Result<u16> {
        Ok(self.read(16)? as u16)
    }

    pub fn read_le_u32(&mut self) -> Result<u32> {
        Ok(self.read(32)? as u32)
    }

    /// Seek to an absolute/relative/from-end bit offset.
    ///
    /// Fast paths: a forward seek inside the bit buffer only drops bits; a
    /// seek inside the byte buffer keeps it and refills only the bit buffer;
    /// anything else refills both.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let current = self.tell() as i128;
        let target = match pos {
            SeekFrom::Start(bits) => bits as i128,
            SeekFrom::Current(delta) => current + delta as i128,
            SeekFrom::End(delta) => self.size() as i128 + delta as i128,
        };
        if target < 0 {
            return Err(PargzError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            )));
        }
        let target = target as u64;

        // Forward seek within the pending bits.
        if target >= current as u64 && target - current as u64 <= self.bit_count as u64 {
            self.remove_bits((target - current as u64) as u32);
            return Ok(target);
        }

        let buffer_start_bits = self.buffer_file_offset * 8;
        let buffer_end_bits = (self.buffer_file_offset + self.buffer_len as u64) * 8;
        if target >= buffer_start_bits && target < buffer_end_bits {
            // Stay inside the byte buffer, rebuild only the bit buffer.
            self.bit_buffer = 0;
            self.bit_count = 0;
            self.byte_pos = ((target - buffer_start_bits) / 8) as usize;
            let partial = (target % 8) as u32;
            if partial != 0 {
                self.fill_bit_buffer(8)?;
                self.remove_bits(partial.min(self.bit_count));
            }
            return Ok(target);
        }

        // Out of buffered range: position the byte buffer at the target byte.
        self.bit_buffer = 0;
        self.bit_count = 0;
        self.buffer_len = 0;
        self.byte_pos = 0;
        self.buffer_file_offset = target / 8;
        let partial = (target % 8) as u32;
        if partial != 0 {
            self.fill_bit_buffer(8)?;
            self.remove_bits(partial.min(self.bit_count));
        }
        Ok(target)
    }
}

#[inline(always)]
fn low_bits(value: u128, count: u32) -> u64 {
    if count == 0 {
        0
    } else {
        (value & ((1u128 << count) - 1)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MemoryFileReader;

    fn reader_over(data: Vec<u8>) -> BitReader {
        BitReader::new(Arc::new(MemoryFileReader::new(data)))
    }

    #[test]
    fn read_lsb_first() {
        let mut reader = reader_over(vec![0b1010_0110, 0xFF, 0x00]);
        assert_eq!(reader.read(1).unwrap(), 0);
        assert_eq!(reader.read(2).unwrap(), 0b11);
        assert_eq!(reader.read(5).unwrap(), 0b10100);
        assert_eq!(reader.tell(), 8);
        assert_eq!(reader.read(8).unwrap(), 0xFF);
        assert_eq!(reader.read(0).unwrap(), 0);
        assert_eq!(reader.read(8).unwrap(), 0);
        assert!(matches!(reader.read(1), Err(PargzError::UnexpectedEof)));
    }

    #[test]
    fn peek_does_not_advance() {
        let mut reader = reader_over(vec![0x12, 0x34, 0x56, 0x78, 0x01, 0x23, 0x45, 0x67, 0x89]);
        assert_eq!(reader.peek(16).unwrap(), 0x3412);
        assert_eq!(reader.peek(16).unwrap(), 0x3412);
        assert_eq!(reader.tell(), 0);
        reader.remove_bits(7);
        assert_eq!(reader.tell(), 7);
        let _ = reader.peek(16).unwrap();
        reader.remove_bits(9);
        assert_eq!(reader.peek(12).unwrap(), 0x856);
    }

    #[test]
    fn read_full_word() {
        let mut reader = reader_over((0u8..16).collect());
        reader.read(3).unwrap();
        let value = reader.read(64).unwrap();
        // Bits 3..67 of the little-endian byte sequence 00 01 02 ...
        let full = u128::from_le_bytes([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(value, ((full >> 3) & u64::MAX as u128) as u64);
        assert_eq!(reader.tell(), 67);
    }

    #[test]
    fn seek_fast_paths() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        let mut reader =
            BitReader::with_buffer_size(Arc::new(MemoryFileReader::new(data.clone())), 256);

        // Forward seek within the bit buffer.
        reader.peek(32).unwrap();
        reader.seek(SeekFrom::Current(13)).unwrap();
        assert_eq!(reader.tell(), 13);
        let expected = (u32::from_le_bytes([data[1], data[2], data[3], data[4]]) >> 5) & 0xFF;
        assert_eq!(reader.read(8).unwrap(), expected as u64);

        // Backward seek within the byte buffer.
        reader.seek(SeekFrom::Start(5)).unwrap();
        assert_eq!(reader.tell(), 5);
        let expected = ((data[0] as u64 | (data[1] as u64) << 8) >> 5) & 0xFF;
        assert_eq!(reader.read(8).unwrap(), expected);

        // Seek outside of the byte buffer.
        reader.seek(SeekFrom::Start(800 * 8 + 3)).unwrap();
        assert_eq!(reader.tell(), 800 * 8 + 3);
        let expected = (u16::from_le_bytes([data[800], data[801]]) >> 3) & 0xFF;
        assert_eq!(reader.read(8).unwrap(), expected as u64);

        // From-end seek.
        reader.seek(SeekFrom::End(-8)).unwrap();
        assert_eq!(reader.tell(), 1024 * 8 - 8);
        assert_eq!(reader.read(8).unwrap(), data[1023] as u64);
        assert!(reader.eof());
    }

    #[test]
    fn byte_aligned_bulk_read() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut reader = reader_over(data.clone());
        reader.read(16).unwrap();
        let mut out = vec![0u8; 50];
        reader.read_bytes(&mut out).unwrap();
        assert_eq!(&out[..], &data[2..52]);
        assert_eq!(reader.tell(), 52 * 8);
    }

    #[test]
    fn align_to_byte_discards_partial_bits() {
        let mut reader = reader_over(vec![0xAB, 0xCD]);
        reader.read(3).unwrap();
        reader.align_to_byte();
        assert_eq!(reader.tell(), 8);
        assert_eq!(reader.read(8).unwrap(), 0xCD);
        reader.align_to_byte();
        assert_eq!(reader.tell(), 16);
    }
}
