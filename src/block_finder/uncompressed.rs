use std::io::SeekFrom;

use crate::bitstream::BitReader;
use crate::error::Result;

const DEFLATE_MAGIC_BIT_COUNT: u32 = 3;
/// The block header may sit up to 7 padding bits before the byte-aligned
/// size field: 3 header bits + up to 7 zeros.
const MAX_PRECEDING_BITS: u32 = DEFLATE_MAGIC_BIT_COUNT + 7;

/// Finder for non-final uncompressed (stored) blocks: scans byte-aligned
/// positions for the `LEN ~LEN` signature, then looks back up to 10 bits for
/// the zero header and padding.
///
/// Because the padding consists of don't-care zeros, several bit offsets may
/// legitimately begin the block; candidates are therefore inclusive
/// `(start_lo, start_hi)` ranges.
pub struct UncompressedBlockFinder {
    reader: BitReader,
    start_bits: u64,
    until_bits: u64,
    /// Byte offset of the LEN field currently under the scan cursor.
    size_field_byte: u64,
    rolling: u32,
    primed: bool,
    exhausted: bool,
}

impl UncompressedBlockFinder {
    pub fn new(reader: BitReader, start_bits: u64, until_bits: u64) -> Self {
        // The LEN field needs at least the 3 header bits in front of it and
        // starts on a byte boundary.
        let first_size_byte = ((start_bits + DEFLATE_MAGIC_BIT_COUNT as u64 + 7) / 8).max(1);
        Self {
            reader,
            start_bits,
            until_bits,
            size_field_byte: first_size_byte,
            rolling: 0,
            primed: false,
            exhausted: false,
        }
    }

    /// Next candidate range with `start_lo < until` and `start_hi >= start`.
    pub fn find_next(&mut self) -> Result<Option<(u64, u64)>> {
        if self.exhausted {
            return Ok(None);
        }
        if !self.primed {
            self.primed = true;
            self.reader.seek(SeekFrom::Start(self.size_field_byte * 8))?;
            let mut first = [0u8; 4];
            if self.read_exact(&mut first)?.is_none() {
                self.exhausted = true;
                return Ok(None);
            }
            self.rolling = u32::from_le_bytes(first);
        }

        loop {
            // The size field itself may lie a few bits past the bound.
            if self.size_field_byte * 8 >= self.until_bits + MAX_PRECEDING_BITS as u64 + 8 {
                return Ok(None);
            }

            let matched = if (self.rolling ^ (self.rolling >> 16)) & 0xFFFF == 0xFFFF {
                self.inspect_match()?
            } else {
                None
            };

            if self.advance()?.is_none() {
                self.exhausted = true;
                return Ok(matched);
            }
            if matched.is_some() {
                return Ok(matched);
            }
        }
    }

    /// Look back from the size field for the zero run holding header and
    /// padding.
    fn inspect_match(&mut self) -> Result<Option<(u64, u64)>> {
        let size_offset_bits = self.size_field_byte * 8;
        if size_offset_bits < MAX_PRECEDING_BITS as u64 {
            return Ok(None);
        }
        let resume = self.reader.tell();

        self.reader
            .seek(SeekFrom::Start(size_offset_bits - MAX_PRECEDING_BITS as u64))?;
        let preceding = self.reader.peek(MAX_PRECEDING_BITS)? as u32;
        self.reader.seek(SeekFrom::Start(resume))?;

        // The three bits right before the size are the highest of the peek;
        // they must be zero whether they are the header itself or padding.
        if (preceding >> (MAX_PRECEDING_BITS - DEFLATE_MAGIC_BIT_COUNT)) & 0b111 != 0 {
            return Ok(None);
        }

        // Extend the zero run backwards, bit by bit.
        let mut zero_run = DEFLATE_MAGIC_BIT_COUNT;
        for j in DEFLATE_MAGIC_BIT_COUNT + 1..=MAX_PRECEDING_BITS {
            if (preceding >> (MAX_PRECEDING_BITS - j)) & 1 != 0 {
                break;
            }
            zero_run = j;
        }

        let start_lo = size_offset_bits - zero_run as u64;
        let start_hi = size_offset_bits - DEFLATE_MAGIC_BIT_COUNT as u64;
        if start_hi < self.start_bits || start_lo >= self.until_bits {
            return Ok(None);
        }
        Ok(Some((start_lo, start_hi)))
    }

    fn advance(&mut self) -> Result<Option<()>> {
        let mut next = [0u8; 1];
        if self.read_exact(&mut next)?.is_none() {
            return Ok(None);
        }
        self.rolling = (self.rolling >> 8) | (next[0] as u32) << 24;
        self.size_field_byte += 1;
        Ok(Some(()))
    }

    fn read_exact(&mut self, out: &mut [u8]) -> Result<Option<()>> {
        if self.reader.peek_available(8 * out.len() as u32) < 8 * out.len() as u32 {
            return Ok(None);
        }
        self.reader.read_bytes(out)?;
        Ok(Some(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MemoryFileReader;
    use crate::testing::DeflateWriter;
    use std::sync::Arc;

    fn reader_over(data: Vec<u8>) -> BitReader {
        BitReader::new(Arc::new(MemoryFileReader::new(data)))
    }

    fn collect(data: Vec<u8>, until_bits: u64) -> Vec<(u64, u64)> {
        let mut finder = UncompressedBlockFinder::new(reader_over(data), 0, until_bits);
        let mut found = Vec::new();
        while let Some(range) = finder.find_next().unwrap() {
            found.push(range);
        }
        found
    }

    #[test]
    fn finds_stored_block_after_odd_bit_data() {
        // A fixed block ending off-byte, then a non-final stored block: the
        // header starts right where the fixed block ends, padding fills to
        // the LEN field.
        let mut writer = DeflateWriter::new();
        writer.begin_fixed_block(false);
        for &byte in b"unaligned" {
            writer.literal(byte);
        }
        writer.end_block();
        let header_offset = writer.bit_len();
        writer.stored_block(&[0x11u8; 32], false);
        writer.stored_block(b"end", true);
        let data = writer.finish();

        let size_field = (header_offset + 3 + 7) / 8 * 8;
        let ranges = collect(data, header_offset + 1);
        assert!(
            ranges
                .iter()
                .any(|&(lo, hi)| lo <= header_offset && header_offset <= hi),
            "header at {} not inside {:?}",
            header_offset,
            ranges
        );
        // Ranges never extend past the latest possible header position.
        for &(lo, hi) in &ranges {
            assert!(lo <= hi);
            assert!(hi + 3 <= size_field);
        }
    }

    #[test]
    fn exact_range_for_byte_aligned_block() {
        // Data byte 0x81 ends in a one bit, so the zero run before the LEN
        // field is exactly the 3 header bits + 5 padding zeros.
        let mut writer = DeflateWriter::new();
        writer.stored_block(&[0x81u8; 16], false);
        let second_header = writer.bit_len();
        writer.stored_block(&[0x81u8; 8], false);
        writer.stored_block(b"end", true);
        let data = writer.finish();

        assert_eq!(second_header % 8, 0);
        let size_field = second_header + 8; // 3 header bits + 5 padding
        let ranges = collect(data, second_header + 1);
        assert!(
            ranges.contains(&(second_header, size_field - 3)),
            "{:?} missing exact ({}, {})",
            ranges,
            second_header,
            size_field - 3
        );
    }

    #[test]
    fn zero_padded_header_widens_the_range() {
        // 0x00 data before the stored block extends the zero run to the
        // 10-bit maximum.
        let mut writer = DeflateWriter::new();
        writer.stored_block(&[0x00u8; 16], false);
        let second_header = writer.bit_len();
        writer.stored_block(b"payload", false);
        writer.stored_block(b"end", true);
        let data = writer.finish();

        let size_field = second_header + 8;
        let ranges = collect(data, second_header + 1);
        assert!(
            ranges.contains(&(size_field - 10, size_field - 3)),
            "{:?}",
            ranges
        );
    }

    #[test]
    fn no_candidates_in_incompressible_data() {
        let data: Vec<u8> = (0..512u32).map(|i| (i * 37 + 101) as u8).collect();
        // No LEN/~LEN pair exists in this sequence.
        let ranges = collect(data, 512 * 8);
        assert!(ranges.is_empty(), "{:?}", ranges);
    }
}
