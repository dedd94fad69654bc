use nightly_quirks::branch_pred::{likely, unlikely};

use crate::bitstream::BitReader;
use crate::chunk::DecodedChunk;
use crate::deflate_constants::*;
use crate::error::{PargzError, Result};
use crate::huffman::double_literal::Decoded;
use crate::huffman::{DoubleLiteralCached, HuffmanDecoder, SingleLutCached};

/// Parsed deflate block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub final_block: bool,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Uncompressed,
    FixedHuffman,
    DynamicHuffman,
}

/// Result of decoding one whole block.
#[derive(Debug, Clone, Copy)]
pub struct BlockSummary {
    pub header: BlockHeader,
    /// Bytes this block contributed to the chunk output.
    pub decoded_size: u64,
    /// Size field of an uncompressed block, when applicable.
    pub uncompressed_size: Option<u16>,
}

/// Read BFINAL and BTYPE. Callers are at an assumed block boundary.
pub fn read_block_header(reader: &mut BitReader) -> Result<BlockHeader> {
    let final_block = reader.read(1)? != 0;
    let kind = match reader.read(2)? as u8 {
        DEFLATE_BLOCKTYPE_UNCOMPRESSED => BlockKind::Uncompressed,
        DEFLATE_BLOCKTYPE_STATIC_HUFFMAN => BlockKind::FixedHuffman,
        DEFLATE_BLOCKTYPE_DYNAMIC_HUFFMAN => BlockKind::DynamicHuffman,
        other => return Err(PargzError::InvalidBlockType(other)),
    };
    Ok(BlockHeader { final_block, kind })
}

/// Dynamic block prelude: the litlen/distance code lengths, expanded through
/// the precode. Public because the block finder uses it to filter candidate
/// offsets.
pub struct DynamicCodeLengths {
    pub litlen: Vec<u8>,
    pub distance: Vec<u8>,
}

/// Parse HLIT/HDIST/HCLEN, the precode, and the run-length encoded code
/// lengths of a dynamic Huffman block, per RFC 1951 §3.2.7.
pub fn read_dynamic_code_lengths(reader: &mut BitReader) -> Result<DynamicCodeLengths> {
    let num_litlen_syms = reader.read(5)? as usize + 257;
    let num_distance_syms = reader.read(5)? as usize + 1;
    let num_explicit_precode_lens = reader.read(4)? as usize + 4;

    if num_litlen_syms > DEFLATE_NUM_LITLEN_SYMS - 2 {
        // 286 and 287 cannot carry codes.
        return Err(PargzError::InvalidBlock);
    }

    let mut precode_lens = [0u8; DEFLATE_NUM_PRECODE_SYMS];
    for i in 0..num_explicit_precode_lens {
        precode_lens[DEFLATE_PRECODE_LENS_PERMUTATION[i] as usize] = reader.read(3)? as u8;
    }

    let precode = SingleLutCached::from_lengths(&precode_lens, DEFLATE_MAX_PRE_CODEWORD_LEN)?;

    let total = num_litlen_syms + num_distance_syms;
    let mut lens = vec![0u8; total];
    let mut i = 0;
    while i < total {
        let presym = precode.decode(reader)?;
        match presym {
            0..=15 => {
                lens[i] = presym as u8;
                i += 1;
            }
            16 => {
                /* Repeat the previous length 3..=6 times. A run may neither
                 * cross from the litlen section into the distance section
                 * nor extend past the total count. */
                if i == 0 {
                    return Err(PargzError::InvalidBlock);
                }
                let repeat = 3 + reader.read(2)? as usize;
                if i + repeat > total {
                    return Err(PargzError::InvalidBlock);
                }
                if i < num_litlen_syms && i + repeat > num_litlen_syms {
                    return Err(PargzError::InvalidBlock);
                }
                let value = lens[i - 1];
                lens[i..i + repeat].fill(value);
                i += repeat;
            }
            17 => {
                /* Repeat zero 3..=10 times. */
                let repeat = 3 + reader.read(3)? as usize;
                if i + repeat > total {
                    return Err(PargzError::InvalidBlock);
                }
                if i < num_litlen_syms && i + repeat > num_litlen_syms {
                    return Err(PargzError::InvalidBlock);
                }
                i += repeat;
            }
            18 => {
                /* Repeat zero 11..=138 times. */
                let repeat = 11 + reader.read(7)? as usize;
                if i + repeat > total {
                    return Err(PargzError::InvalidBlock);
                }
                if i < num_litlen_syms && i + repeat > num_litlen_syms {
                    return Err(PargzError::InvalidBlock);
                }
                i += repeat;
            }
            _ => return Err(PargzError::InvalidBlock),
        }
    }

    let distance = lens.split_off(num_litlen_syms);
    Ok(DynamicCodeLengths {
        litlen: lens,
        distance,
    })
}

/// Per-chunk deflate state machine: block header parse, Huffman decode loop,
/// 32 KiB sliding window and marker emission.
///
/// Every window slot is a u16: real bytes in [0, 256), markers in
/// [256, 256 + 32768) standing for "byte at that position of the window that
/// precedes the chunk". A speculative start fills the window with markers;
/// once no marker remains among the last 32 KiB of output, everything further
/// is promoted to real bytes.
pub struct DeflateDecoder {
    window: Box<[u16]>,
    window_pos: usize,
    window_marker_count: usize,
    total_emitted: u64,
    marker_mode: bool,

    fused: Option<DoubleLiteralCached>,
    /// Avoid rebuilding the fixed tables across consecutive fixed blocks.
    fixed_codes_loaded: bool,

    /// Output byte budget; exceeding it aborts the chunk.
    budget: u64,
}

impl DeflateDecoder {
    /// Speculative start: the preceding window is unknown, emit markers.
    pub fn new_with_markers() -> Self {
        let mut window = vec![0u16; DEFLATE_WINDOW_SIZE].into_boxed_slice();
        for (position, slot) in window.iter_mut().enumerate() {
            *slot = MARKER_BASE + position as u16;
        }
        Self {
            window,
            window_pos: 0,
            window_marker_count: DEFLATE_WINDOW_SIZE,
            total_emitted: 0,
            marker_mode: true,
            fused: None,
            fixed_codes_loaded: false,
            budget: u64::MAX,
        }
    }

    /// Known-window start. Shorter windows (stream start) are padded with
    /// leading zeros; the all-zero window is the valid initial gzip state.
    pub fn new_with_window(window_bytes: &[u8]) -> Self {
        let mut window = vec![0u16; DEFLATE_WINDOW_SIZE].into_boxed_slice();
        let used = window_bytes.len().min(DEFLATE_WINDOW_SIZE);
        let offset = DEFLATE_WINDOW_SIZE - used;
        for (slot, &byte) in window[offset..].iter_mut().zip(&window_bytes[window_bytes.len() - used..]) {
            *slot = byte as u16;
        }
        Self {
            window,
            window_pos: 0,
            window_marker_count: 0,
            total_emitted: 0,
            marker_mode: false,
            fused: None,
            fixed_codes_loaded: false,
            budget: u64::MAX,
        }
    }

    pub fn set_budget(&mut self, budget: u64) {
        self.budget = budget;
    }

    #[inline]
    pub fn in_marker_mode(&self) -> bool {
        self.marker_mode
    }

    #[inline]
    pub fn total_emitted(&self) -> u64 {
        self.total_emitted
    }

    /// The real window is known after all: patch every marker slot and stop
    /// emitting markers. Output already produced still needs [`DecodedChunk::resolve`].
    pub fn supply_window(&mut self, window_bytes: &[u8]) {
        debug_assert!(window_bytes.len() >= DEFLATE_WINDOW_SIZE);
        if !self.marker_mode && self.window_marker_count == 0 {
            return;
        }
        let base = window_bytes.len() - DEFLATE_WINDOW_SIZE;
        for slot in self.window.iter_mut() {
            let value = *slot;
            if value >= MARKER_BASE {
                *slot = window_bytes[base + (value - MARKER_BASE) as usize] as u16;
            }
        }
        self.window_marker_count = 0;
        self.marker_mode = false;
    }

    /// The last 32 KiB of output as real bytes, oldest first, when no marker
    /// is left in the window.
    pub fn window_if_resolved(&self) -> Option<Vec<u8>> {
        if self.window_marker_count != 0 {
            return None;
        }
        let mut out = Vec::with_capacity(DEFLATE_WINDOW_SIZE);
        for i in 0..DEFLATE_WINDOW_SIZE {
            out.push(self.window[(self.window_pos + i) & DEFLATE_WINDOW_MASK] as u8);
        }
        Some(out)
    }

    /// Decode one whole block into `out`. The reader must sit on the block
    /// header; on success it sits just past the end-of-block symbol (or the
    /// stored data).
    pub fn decode_block(
        &mut self,
        reader: &mut BitReader,
        out: &mut DecodedChunk,
    ) -> Result<BlockSummary> {
        let header = read_block_header(reader)?;
        let start_len = out.decoded_len();

        let uncompressed_size = match header.kind {
            BlockKind::Uncompressed => Some(self.decode_stored_block(reader, out)?),
            BlockKind::FixedHuffman => {
                if !self.fixed_codes_loaded {
                    self.fused = Some(DoubleLiteralCached::new(
                        &fixed_litlen_lengths(),
                        &fixed_distance_lengths(),
                    )?);
                    self.fixed_codes_loaded = true;
                }
                self.decode_huffman_block(reader, out)?;
                None
            }
            BlockKind::DynamicHuffman => {
                let lengths = read_dynamic_code_lengths(reader)?;
                self.fused = Some(DoubleLiteralCached::new(&lengths.litlen, &lengths.distance)?);
                self.fixed_codes_loaded = false;
                self.decode_huffman_block(reader, out)?;
                None
            }
        };

        Ok(BlockSummary {
            header,
            decoded_size: out.decoded_len() - start_len,
            uncompressed_size,
        })
    }

    fn decode_stored_block(&mut self, reader: &mut BitReader, out: &mut DecodedChunk) -> Result<u16> {
        reader.align_to_byte();
        let len = reader.read_le_u16()?;
        let nlen = reader.read_le_u16()?;
        if len != !nlen {
            return Err(PargzError::InvalidBlock);
        }

        if out.decoded_len() + len as u64 > self.budget {
            return Err(PargzError::ChunkExceededBudget);
        }

        let mut remaining = len as usize;
        let mut buffer = [0u8; 512];
        while remaining > 0 {
            let step = remaining.min(buffer.len());
            reader.read_bytes(&mut buffer[..step])?;
            for &byte in &buffer[..step] {
                self.emit(byte as u16, out);
            }
            remaining -= step;
        }
        Ok(len)
    }

    fn decode_huffman_block(&mut self, reader: &mut BitReader, out: &mut DecodedChunk) -> Result<()> {
        // The decoder tables are taken out for the duration of the loop so
        // that `emit` can borrow `self` mutably.
        let fused = self.fused.take().expect("decoder tables must be built");
        let result = self.huffman_decode_loop(&fused, reader, out);
        self.fused = Some(fused);
        result
    }

    fn huffman_decode_loop(
        &mut self,
        fused: &DoubleLiteralCached,
        reader: &mut BitReader,
        out: &mut DecodedChunk,
    ) -> Result<()> {
        loop {
            if unlikely(out.decoded_len() > self.budget) {
                return Err(PargzError::ChunkExceededBudget);
            }

            match fused.decode(reader)? {
                Decoded::DoubleLiteral(first, second) => {
                    self.emit(first as u16, out);
                    self.emit(second as u16, out);
                }
                Decoded::Literal(byte) => self.emit(byte as u16, out),
                Decoded::Match { length, distance } => {
                    if unlikely(distance as usize > DEFLATE_WINDOW_SIZE || distance == 0) {
                        return Err(PargzError::InvalidDistance);
                    }
                    if unlikely(
                        length as usize > DEFLATE_MAX_MATCH_LEN || (length as usize) < 3,
                    ) {
                        return Err(PargzError::InvalidLength);
                    }
                    // Overlap (distance < length) is legal and handled
                    // naturally by the per-symbol copy.
                    let distance = distance as usize;
                    for _ in 0..length {
                        let symbol = self.window
                            [(self.window_pos + DEFLATE_WINDOW_SIZE - distance) & DEFLATE_WINDOW_MASK];
                        self.emit(symbol, out);
                    }
                }
                Decoded::EndOfBlock => return Ok(()),
            }
        }
    }

    #[inline(always)]
    fn emit(&mut self, symbol: u16, out: &mut DecodedChunk) {
        let old = std::mem::replace(&mut self.window[self.window_pos], symbol);
        self.window_pos = (self.window_pos + 1) & DEFLATE_WINDOW_MASK;
        self.total_emitted += 1;

        if likely(!self.marker_mode) {
            out.bytes.push(symbol as u8);
            return;
        }

        self.window_marker_count += (symbol >= MARKER_BASE) as usize;
        self.window_marker_count -= (old >= MARKER_BASE) as usize;
        out.markers.push(symbol);

        // Every window slot is real now: any further back-reference yields
        // real bytes, so later emissions go to the byte buffer directly.
        if self.window_marker_count == 0 {
            self.marker_mode = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MemoryFileReader;
    use crate::testing::DeflateWriter;
    use std::sync::Arc;

    fn bit_reader(data: Vec<u8>) -> BitReader {
        BitReader::new(Arc::new(MemoryFileReader::new(data)))
    }

    fn decode_all(data: Vec<u8>, mut decoder: DeflateDecoder) -> (DecodedChunk, Vec<BlockSummary>) {
        let mut reader = bit_reader(data);
        let mut chunk = DecodedChunk::new(0);
        let mut summaries = Vec::new();
        loop {
            let summary = decoder.decode_block(&mut reader, &mut chunk).unwrap();
            summaries.push(summary);
            if summary.header.final_block {
                break;
            }
        }
        (chunk, summaries)
    }

    #[test]
    fn stored_block_round_trip() {
        let payload = b"stored block payload".to_vec();
        let mut writer = DeflateWriter::new();
        writer.stored_block(&payload, true);
        let (chunk, summaries) = decode_all(writer.finish(), DeflateDecoder::new_with_window(&[]));
        assert_eq!(chunk.bytes, payload);
        assert_eq!(summaries[0].header.kind, BlockKind::Uncompressed);
        assert_eq!(summaries[0].uncompressed_size, Some(payload.len() as u16));
    }

    #[test]
    fn fixed_block_with_backreference() {
        let mut writer = DeflateWriter::new();
        writer.begin_fixed_block(true);
        for &byte in b"abcabc" {
            writer.literal(byte);
        }
        // "abcabc" + copy of the whole 6-byte prefix.
        writer.match_ref(6, 6);
        writer.end_block();
        let (chunk, summaries) = decode_all(writer.finish(), DeflateDecoder::new_with_window(&[]));
        assert_eq!(chunk.bytes, b"abcabcabcabc");
        assert_eq!(summaries[0].header.kind, BlockKind::FixedHuffman);
    }

    #[test]
    fn overlapping_copy_repeats_byte() {
        let mut writer = DeflateWriter::new();
        writer.begin_fixed_block(true);
        writer.literal(b'x');
        writer.match_ref(10, 1);
        writer.end_block();
        let (chunk, _) = decode_all(writer.finish(), DeflateDecoder::new_with_window(&[]));
        assert_eq!(chunk.bytes, vec![b'x'; 11]);
    }

    #[test]
    fn dynamic_block_round_trip() {
        let payload = b"dynamically coded data / dynamically decoded data".to_vec();
        let mut writer = DeflateWriter::new();
        writer.dynamic_block_from_bytes(&payload, true);
        let (chunk, summaries) = decode_all(writer.finish(), DeflateDecoder::new_with_window(&[]));
        assert_eq!(chunk.bytes, payload);
        assert_eq!(summaries[0].header.kind, BlockKind::DynamicHuffman);
    }

    #[test]
    fn marker_mode_emits_window_references() {
        // A back-reference to data before the chunk start must come out as
        // markers pointing into the unknown window.
        let mut writer = DeflateWriter::new();
        writer.begin_fixed_block(true);
        writer.match_ref(4, 100);
        writer.literal(b'!');
        writer.end_block();

        let mut decoder = DeflateDecoder::new_with_markers();
        let mut reader = bit_reader(writer.finish());
        let mut chunk = DecodedChunk::new(0);
        decoder.decode_block(&mut reader, &mut chunk).unwrap();

        // Window position of "distance 100 before the chunk" is 32768 - 100.
        let base = (DEFLATE_WINDOW_SIZE - 100) as u16;
        assert_eq!(
            chunk.markers,
            vec![256 + base, 256 + base + 1, 256 + base + 2, 256 + base + 3, b'!' as u16]
        );
        assert!(chunk.bytes.is_empty());

        // Resolving against a concrete window yields those bytes.
        let mut window = vec![0u8; DEFLATE_WINDOW_SIZE];
        window[DEFLATE_WINDOW_SIZE - 100..DEFLATE_WINDOW_SIZE - 96].copy_from_slice(b"wxyz");
        chunk.resolve(&window).unwrap();
        assert_eq!(chunk.bytes, b"wxyz!");
    }

    #[test]
    fn marker_mode_switches_off_after_full_window() {
        // 32 KiB of literals flush every marker out of the window; the next
        // emissions land in the byte buffer.
        let mut writer = DeflateWriter::new();
        writer.stored_block(&vec![0x42u8; DEFLATE_WINDOW_SIZE], false);
        writer.begin_fixed_block(true);
        writer.match_ref(8, 16);
        writer.end_block();

        let mut decoder = DeflateDecoder::new_with_markers();
        let mut reader = bit_reader(writer.finish());
        let mut chunk = DecodedChunk::new(0);
        decoder.decode_block(&mut reader, &mut chunk).unwrap();
        assert!(!decoder.in_marker_mode());
        decoder.decode_block(&mut reader, &mut chunk).unwrap();

        assert_eq!(chunk.markers.len(), DEFLATE_WINDOW_SIZE);
        assert_eq!(chunk.bytes, vec![0x42u8; 8]);
        assert!(decoder.window_if_resolved().is_some());
    }

    #[test]
    fn supply_window_mid_chunk_stops_marker_emission() {
        let mut writer = DeflateWriter::new();
        writer.begin_fixed_block(true);
        writer.match_ref(3, 50);
        writer.end_block();
        writer.begin_fixed_block(true);
        writer.match_ref(3, 3);
        writer.end_block();

        let mut decoder = DeflateDecoder::new_with_markers();
        let mut reader = bit_reader(writer.finish());
        let mut chunk = DecodedChunk::new(0);
        decoder.decode_block(&mut reader, &mut chunk).unwrap();
        assert_eq!(chunk.markers.len(), 3);

        let mut window = vec![0u8; DEFLATE_WINDOW_SIZE];
        window[DEFLATE_WINDOW_SIZE - 50] = b'A';
        window[DEFLATE_WINDOW_SIZE - 49] = b'B';
        window[DEFLATE_WINDOW_SIZE - 48] = b'C';
        decoder.supply_window(&window);

        decoder.decode_block(&mut reader, &mut chunk).unwrap();
        // Emissions after the supplied window are real bytes. The second
        // match re-reads what the first match wrote into the ring.
        assert_eq!(chunk.bytes, b"ABC");

        chunk.resolve(&window).unwrap();
        assert_eq!(chunk.bytes, b"ABCABC");
    }

    #[test]
    fn budget_is_enforced() {
        let mut writer = DeflateWriter::new();
        writer.stored_block(&vec![0u8; 4096], true);
        let mut decoder = DeflateDecoder::new_with_window(&[]);
        decoder.set_budget(1024);
        let mut reader = bit_reader(writer.finish());
        let mut chunk = DecodedChunk::new(0);
        assert!(matches!(
            decoder.decode_block(&mut reader, &mut chunk),
            Err(PargzError::ChunkExceededBudget)
        ));
    }

    /// Dynamic header prelude (HLIT = 0, HDIST = 0) whose code lengths are
    /// 254 or 255 explicit nines followed by one repeat-previous run of 3;
    /// the shorter variant ends exactly at the litlen/distance boundary,
    /// the longer one crosses it.
    fn code_lengths_with_run(explicit_nines: usize) -> Vec<u8> {
        let mut writer = crate::testing::BitWriter::new();
        writer.push_bits(0, 5); // HLIT: 257 symbols
        writer.push_bits(0, 5); // HDIST: 1 symbol
        writer.push_bits(14, 4); // HCLEN: 18 precode lengths
        // Precode as in the literal-only dynamic fixture:
        // 16 -> length 2 (code 11), 9 -> length 1 (code 0), 1 -> length 2
        // (code 10).
        for length in [2u64, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2] {
            writer.push_bits(length, 3);
        }
        for _ in 0..explicit_nines {
            writer.push_code(0, 1);
        }
        writer.push_code(0b11, 2); // presym 16
        writer.push_bits(0, 2); // repeat count 3
        if explicit_nines == 254 {
            // Run ends at the boundary; the single distance length follows.
            writer.push_code(0b10, 2); // presym 1
        }
        writer.push_bits(0, 16); // padding so reads never hit EOF
        writer.finish()
    }

    #[test]
    fn run_crossing_litlen_distance_boundary_is_rejected() {
        // 255 nines + repeat 3 would span positions 255..258, crossing the
        // boundary at 257.
        let mut reader = bit_reader(code_lengths_with_run(255));
        assert!(matches!(
            read_dynamic_code_lengths(&mut reader),
            Err(PargzError::InvalidBlock)
        ));
    }

    #[test]
    fn run_ending_at_litlen_distance_boundary_is_accepted() {
        // 254 nines + repeat 3 fills exactly the 257 litlen lengths.
        let mut reader = bit_reader(code_lengths_with_run(254));
        let lengths = read_dynamic_code_lengths(&mut reader).unwrap();
        assert_eq!(lengths.litlen.len(), 257);
        assert!(lengths.litlen.iter().all(|&len| len == 9));
        assert_eq!(lengths.distance, vec![1]);
    }

    #[test]
    fn invalid_block_type_is_rejected() {
        // BFINAL = 1, BTYPE = 0b11.
        let mut reader = bit_reader(vec![0b0000_0111]);
        let mut decoder = DeflateDecoder::new_with_window(&[]);
        let mut chunk = DecodedChunk::new(0);
        assert!(matches!(
            decoder.decode_block(&mut reader, &mut chunk),
            Err(PargzError::InvalidBlockType(3))
        ));
    }

    #[test]
    fn stored_block_length_complement_is_checked() {
        let mut reader = bit_reader(vec![0b0000_0000, 0x10, 0x00, 0xCD, 0xAB]);
        let mut decoder = DeflateDecoder::new_with_window(&[]);
        let mut chunk = DecodedChunk::new(0);
        assert!(matches!(
            decoder.decode_block(&mut reader, &mut chunk),
            Err(PargzError::InvalidBlock)
        ));
    }
}
