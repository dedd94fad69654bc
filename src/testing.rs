//! Hand-rolled deflate/gzip writers for tests. Encoding stays out of the
//! product surface; these emit just enough of RFC 1951/1952 to build
//! fixtures covering stored, fixed and dynamic blocks without shipping
//! binary files.
#![doc(hidden)]

use crate::deflate_constants::{
    DISTANCE_BASE, DISTANCE_EXTRA_BITS, LENGTH_BASE, LENGTH_EXTRA_BITS,
};
use crate::huffman::CanonicalCode;

/// One deflate instruction for the dynamic-block fixture writer.
#[derive(Clone, Copy)]
pub enum DeflateOp {
    Literal(u8),
    Match { length: u16, distance: u16 },
}

/// LSB-first bit sink matching the deflate bit order.
pub struct BitWriter {
    bytes: Vec<u8>,
    /// Bits already used in the last byte, 0 when byte-aligned.
    bit_pos: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_pos: 0,
        }
    }

    pub fn push_bits(&mut self, value: u64, count: u32) {
        for i in 0..count {
            let bit = ((value >> i) & 1) as u8;
            if self.bit_pos == 0 {
                self.bytes.push(0);
            }
            let last = self.bytes.last_mut().unwrap();
            *last |= bit << self.bit_pos;
            self.bit_pos = (self.bit_pos + 1) % 8;
        }
    }

    /// Huffman codewords go out MSB-first.
    pub fn push_code(&mut self, code: u32, length: u32) {
        for i in (0..length).rev() {
            self.push_bits((code >> i) as u64 & 1, 1);
        }
    }

    pub fn align_to_byte(&mut self) {
        self.bit_pos = 0;
    }

    pub fn bit_len(&self) -> u64 {
        if self.bit_pos == 0 {
            self.bytes.len() as u64 * 8
        } else {
            (self.bytes.len() as u64 - 1) * 8 + self.bit_pos as u64
        }
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        assert_eq!(self.bit_pos, 0, "byte writes require alignment");
        self.bytes.extend_from_slice(data);
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Deflate stream builder over [`BitWriter`].
pub struct DeflateWriter {
    pub writer: BitWriter,
}

impl DeflateWriter {
    pub fn new() -> Self {
        Self {
            writer: BitWriter::new(),
        }
    }

    pub fn bit_len(&self) -> u64 {
        self.writer.bit_len()
    }

    /// Non-final empty stored block, the pigz flush marker (00 00 FF FF once
    /// byte-aligned).
    pub fn pigz_flush_marker(&mut self) {
        self.stored_block(&[], false);
    }

    pub fn stored_block(&mut self, data: &[u8], final_block: bool) {
        self.writer.push_bits(final_block as u64, 1);
        self.writer.push_bits(0b00, 2);
        self.writer.align_to_byte();
        let len = data.len() as u16;
        self.writer.push_bytes(&len.to_le_bytes());
        self.writer.push_bytes(&(!len).to_le_bytes());
        self.writer.push_bytes(data);
    }

    pub fn begin_fixed_block(&mut self, final_block: bool) {
        self.writer.push_bits(final_block as u64, 1);
        self.writer.push_bits(0b01, 2);
    }

    pub fn literal(&mut self, byte: u8) {
        let symbol = byte as u32;
        if symbol < 144 {
            self.writer.push_code(0x30 + symbol, 8);
        } else {
            self.writer.push_code(0b1_1001_0000 + (symbol - 144), 9);
        }
    }

    fn litlen_length_symbol(length: u16) -> (u32, u32, u16) {
        assert!((3..=258).contains(&length));
        // 258 must use symbol 285 with no extra bits.
        if length == 258 {
            return (285, 0, 0);
        }
        for symbol in (0..28).rev() {
            let base = LENGTH_BASE[symbol];
            if length >= base {
                let extra_bits = LENGTH_EXTRA_BITS[symbol] as u32;
                return (257 + symbol as u32, extra_bits, length - base);
            }
        }
        unreachable!()
    }

    fn distance_symbol(distance: u16) -> (u32, u32, u16) {
        assert!((1..=32768).contains(&(distance as u32)));
        for symbol in (0..30).rev() {
            let base = DISTANCE_BASE[symbol];
            if distance >= base {
                let extra_bits = DISTANCE_EXTRA_BITS[symbol] as u32;
                return (symbol as u32, extra_bits, distance - base);
            }
        }
        unreachable!()
    }

    pub fn match_ref(&mut self, length: u16, distance: u16) {
        let (symbol, extra_bits, extra) = Self::litlen_length_symbol(length);
        if symbol < 280 {
            self.writer.push_code(symbol - 256, 7);
        } else {
            self.writer.push_code(0b1100_0000 + (symbol - 280), 8);
        }
        self.writer.push_bits(extra as u64, extra_bits);

        let (symbol, extra_bits, extra) = Self::distance_symbol(distance);
        self.writer.push_code(symbol, 5);
        self.writer.push_bits(extra as u64, extra_bits);
    }

    pub fn end_block(&mut self) {
        self.writer.push_code(0, 7);
    }

    /// A dynamic Huffman block carrying `data` as literals: every byte gets a
    /// 9-bit code, end-of-block a 1-bit code, and a single 1-bit distance
    /// code is declared (never used).
    pub fn dynamic_block_from_bytes(&mut self, data: &[u8], final_block: bool) {
        self.writer.push_bits(final_block as u64, 1);
        self.writer.push_bits(0b10, 2);

        self.writer.push_bits(0, 5); // HLIT: 257 symbols
        self.writer.push_bits(0, 5); // HDIST: 1 symbol
        self.writer.push_bits(14, 4); // HCLEN: 18 precode lengths

        // Permutation order 16,17,18,0,8,7,9,6,10,5,11,4,12,3,13,2,14,1;
        // used precode symbols: 16 -> length 2, 9 -> length 1, 1 -> length 2.
        let precode_lengths = [2u64, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
        for length in precode_lengths {
            self.writer.push_bits(length, 3);
        }

        // Canonical precode: symbol 9 -> 0 (1 bit), symbol 1 -> 10,
        // symbol 16 -> 11 (2 bits each).
        let emit_nine = |writer: &mut BitWriter| writer.push_code(0, 1);
        let emit_one = |writer: &mut BitWriter| writer.push_code(0b10, 2);
        let emit_repeat = |writer: &mut BitWriter, count: u64| {
            writer.push_code(0b11, 2);
            writer.push_bits(count - 3, 2);
        };

        // Litlen lengths: 256 nines then one 1 (end of block).
        emit_nine(&mut self.writer);
        let mut remaining = 255u64;
        while remaining > 0 {
            let step = remaining.min(6).max(3);
            // Tail shorter than 3 cannot happen: 255 = 42 * 6 + 3.
            emit_repeat(&mut self.writer, step);
            remaining -= step;
        }
        emit_one(&mut self.writer);
        // Distance lengths: a single 1.
        emit_one(&mut self.writer);

        // Literal codewords are 256 + byte (9 bits), end of block is 0.
        for &byte in data {
            self.writer.push_code(0b1_0000_0000 + byte as u32, 9);
        }
        self.writer.push_code(0, 1);
    }

    /// A dynamic Huffman block that supports matches: a fixed synthetic code
    /// covering all literals, every length symbol and every distance symbol,
    /// with all code lengths written explicitly (no 16/17/18 run codes).
    pub fn dynamic_block_ops(&mut self, ops: &[DeflateOp], final_block: bool) {
        // Litlen lengths: literals 9, end-of-block 2, lengths 257..=284 get
        // 7, 285 gets 5. Kraft: 256/512 + 1/4 + 28/128 + 1/32 = 1.
        let mut litlen_lengths = vec![9u8; 256];
        litlen_lengths.push(2);
        litlen_lengths.extend_from_slice(&[7u8; 28]);
        litlen_lengths.push(5);
        // Distance lengths: symbols 0 and 1 get 4 bits, 2..=29 get 5.
        // Kraft: 2/16 + 28/32 = 1.
        let mut distance_lengths = vec![4u8, 4];
        distance_lengths.extend_from_slice(&[5u8; 28]);

        let litlen_code = CanonicalCode::from_lengths(&litlen_lengths, 15).unwrap();
        let distance_code = CanonicalCode::from_lengths(&distance_lengths, 15).unwrap();
        let litlen_words: std::collections::HashMap<u16, (u8, u32)> = litlen_code
            .codewords()
            .into_iter()
            .map(|(symbol, len, word)| (symbol, (len, word)))
            .collect();
        let distance_words: std::collections::HashMap<u16, (u8, u32)> = distance_code
            .codewords()
            .into_iter()
            .map(|(symbol, len, word)| (symbol, (len, word)))
            .collect();

        self.writer.push_bits(final_block as u64, 1);
        self.writer.push_bits(0b10, 2);
        self.writer.push_bits(29, 5); // HLIT: 286 symbols
        self.writer.push_bits(29, 5); // HDIST: 30 symbols
        self.writer.push_bits(12, 4); // HCLEN: 16 precode entries

        // Precode: presym 9 -> 1 bit, presyms 2/4/5/7 -> 3 bits.
        // Permutation order 16,17,18,0,8,7,9,6,10,5,11,4,12,3,13,2.
        let precode_lengths = [0u64, 0, 0, 0, 0, 3, 1, 0, 0, 3, 0, 3, 0, 0, 0, 3];
        for length in precode_lengths {
            self.writer.push_bits(length, 3);
        }

        // Canonical precode codewords: 9 -> 0 (1 bit); at 3 bits,
        // 2 -> 100, 4 -> 101, 5 -> 110, 7 -> 111.
        let emit_presym = |writer: &mut BitWriter, length: u8| match length {
            9 => writer.push_code(0b0, 1),
            2 => writer.push_code(0b100, 3),
            4 => writer.push_code(0b101, 3),
            5 => writer.push_code(0b110, 3),
            7 => writer.push_code(0b111, 3),
            other => panic!("presym {} not in the synthetic precode", other),
        };
        for &length in litlen_lengths.iter().chain(distance_lengths.iter()) {
            emit_presym(&mut self.writer, length);
        }

        for op in ops {
            match *op {
                DeflateOp::Literal(byte) => {
                    let (len, word) = litlen_words[&(byte as u16)];
                    self.writer.push_code(word, len as u32);
                }
                DeflateOp::Match { length, distance } => {
                    let (symbol, extra_bits, extra) = Self::litlen_length_symbol(length);
                    let (len, word) = litlen_words[&(symbol as u16)];
                    self.writer.push_code(word, len as u32);
                    self.writer.push_bits(extra as u64, extra_bits);

                    let (symbol, extra_bits, extra) = Self::distance_symbol(distance);
                    let (len, word) = distance_words[&(symbol as u16)];
                    self.writer.push_code(word, len as u32);
                    self.writer.push_bits(extra as u64, extra_bits);
                }
            }
        }
        let (len, word) = litlen_words[&256];
        self.writer.push_code(word, len as u32);
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.finish()
    }
}

/// Adler-32 of a whole buffer, for zlib fixtures.
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = crate::decompress_gzip::Adler32::new();
    hasher.update(data);
    hasher.finalize()
}

/// Options for gzip member fixtures.
#[derive(Default)]
pub struct GzipMemberOptions {
    pub file_name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    pub extra: Option<Vec<u8>>,
    pub header_crc: bool,
    pub mtime: u32,
}

/// Wrap a raw deflate stream into one gzip member; `original` is the
/// uncompressed payload, needed for the footer.
pub fn gzip_wrap_with(deflate_stream: &[u8], original: &[u8], options: &GzipMemberOptions) -> Vec<u8> {
    let mut flags = 0u8;
    if options.extra.is_some() {
        flags |= 0x04;
    }
    if options.file_name.is_some() {
        flags |= 0x08;
    }
    if options.comment.is_some() {
        flags |= 0x10;
    }
    if options.header_crc {
        flags |= 0x02;
    }

    let mut out = vec![0x1F, 0x8B, 0x08, flags];
    out.extend_from_slice(&options.mtime.to_le_bytes());
    out.push(0); // XFL
    out.push(255); // OS: unknown

    if let Some(extra) = &options.extra {
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(extra);
    }
    if let Some(name) = &options.file_name {
        out.extend_from_slice(name);
        out.push(0);
    }
    if let Some(comment) = &options.comment {
        out.extend_from_slice(comment);
        out.push(0);
    }
    if options.header_crc {
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&(crc as u16).to_le_bytes());
    }

    out.extend_from_slice(deflate_stream);
    out.extend_from_slice(&crc32fast::hash(original).to_le_bytes());
    out.extend_from_slice(&(original.len() as u32).to_le_bytes());
    out
}

pub fn gzip_wrap(deflate_stream: &[u8], original: &[u8]) -> Vec<u8> {
    gzip_wrap_with(deflate_stream, original, &GzipMemberOptions::default())
}

/// One gzip member holding `data` in stored blocks.
pub fn gzip_member_stored(data: &[u8]) -> Vec<u8> {
    let mut writer = DeflateWriter::new();
    let mut chunks = data.chunks(0xFFFF).peekable();
    if data.is_empty() {
        writer.stored_block(&[], true);
    }
    while let Some(chunk) = chunks.next() {
        writer.stored_block(chunk, chunks.peek().is_none());
    }
    gzip_wrap(&writer.finish(), data)
}

/// A bgzf-style member: FEXTRA with the `BC` subfield carrying the total
/// member size minus one.
pub fn bgzf_member_stored(data: &[u8]) -> Vec<u8> {
    assert!(data.len() < 0xFF00);
    let mut writer = DeflateWriter::new();
    writer.stored_block(data, true);
    let deflate_stream = writer.finish();

    // Header(10) + XLEN(2) + subfield(6) + deflate + footer(8).
    let block_size = 18 + deflate_stream.len() + 8;
    let bc = (block_size - 1) as u16;
    let mut extra = vec![b'B', b'C', 2, 0];
    extra.extend_from_slice(&bc.to_le_bytes());

    gzip_wrap_with(
        &deflate_stream,
        data,
        &GzipMemberOptions {
            extra: Some(extra),
            ..Default::default()
        },
    )
}

/// Zlib wrapping (RFC 1950) with a 32 KiB window declared.
pub fn zlib_wrap(deflate_stream: &[u8], original: &[u8]) -> Vec<u8> {
    let cmf = 0x78u8;
    let mut flg = 0x00u8;
    // FCHECK makes (cmf * 256 + flg) divisible by 31.
    let remainder = ((cmf as u32) * 256 + flg as u32) % 31;
    if remainder != 0 {
        flg += (31 - remainder) as u8;
    }
    let mut out = vec![cmf, flg];
    out.extend_from_slice(deflate_stream);
    out.extend_from_slice(&adler32(original).to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_writer_is_lsb_first() {
        let mut writer = BitWriter::new();
        writer.push_bits(0b1, 1);
        writer.push_bits(0b01, 2);
        writer.push_bits(0b10101, 5);
        assert_eq!(writer.finish(), vec![0b1010_1011]);
    }

    #[test]
    fn push_code_is_msb_first() {
        let mut writer = BitWriter::new();
        writer.push_code(0b0011_0000, 8); // fixed code of literal 0
        assert_eq!(writer.finish(), vec![0b0000_1100]);
    }

    #[test]
    fn adler32_vectors() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"abc"), 0x024D0127);
        assert_eq!(adler32(b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn pigz_marker_bytes() {
        let mut writer = DeflateWriter::new();
        writer.literal_aligned_filler();
        writer.pigz_flush_marker();
        let bytes = writer.finish();
        assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x00, 0xFF, 0xFF]);
    }
}

impl DeflateWriter {
    /// Pad with a stored block so the next block starts byte-aligned; only
    /// used by fixture tests.
    pub fn literal_aligned_filler(&mut self) {
        self.stored_block(b"?", false);
    }
}
