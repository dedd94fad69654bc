use std::collections::HashSet;
use std::io::SeekFrom;

use lazy_static::lazy_static;

use crate::bitstream::BitReader;
use crate::decompress_deflate::{read_block_header, read_dynamic_code_lengths, BlockKind};
use crate::deflate_constants::{DEFLATE_NUM_PRECODE_SYMS, DEFLATE_PRECODE_LENS_PERMUTATION};
use crate::error::Result;
use crate::huffman::DoubleLiteralCached;

/// Bits of a candidate header the skip LUT can rule out at once:
/// BFINAL(1) + BTYPE(2) + HLIT(5) + HDIST(5) + one HCLEN bit.
pub const CANDIDATE_BITS: u32 = 14;

/// A candidate prefix survives when none of the checks that fit into
/// `bit_count` bits disproves it: final bit clear, dynamic block type,
/// HLIT + 257 <= 286, HDIST + 1 <= 30.
fn candidate_is_plausible(bits: u32, bit_count: u32) -> bool {
    if bit_count >= 1 && bits & 1 != 0 {
        return false;
    }
    if bit_count >= 3 && (bits >> 1) & 0b11 != 0b10 {
        return false;
    }
    if bit_count >= 8 && (bits >> 3) & 0b1_1111 > 29 {
        return false;
    }
    if bit_count >= 13 && (bits >> 8) & 0b1_1111 > 29 {
        return false;
    }
    true
}

fn build_skip_lut() -> Vec<u8> {
    (0u32..1 << CANDIDATE_BITS)
        .map(|value| {
            let mut bits = value;
            let mut remaining = CANDIDATE_BITS;
            let mut skip = 0u8;
            while skip < CANDIDATE_BITS as u8 && !candidate_is_plausible(bits, remaining) {
                bits >>= 1;
                remaining -= 1;
                skip += 1;
            }
            skip
        })
        .collect()
}

/// All histograms of precode code lengths (bins for lengths 1..=7, 5 bits
/// per bin) that satisfy Kraft's equality, plus the single-symbol special
/// case. Enumerated once; membership rejects invalid precodes in O(1).
fn enumerate_valid_histograms() -> HashSet<u64> {
    fn recurse(depth: u32, remaining: u32, free_bits: u32, histogram: u64, set: &mut HashSet<u64>) {
        for count in 0..=remaining.min(free_bits) {
            let updated = histogram | (count as u64) << ((depth - 1) * 5);
            let new_free_bits = (free_bits - count) * 2;

            if depth == 1 && count == 1 {
                // Single 1-bit code, the allowed incomplete shape.
                set.insert(updated);
            }

            if depth == 7 {
                if new_free_bits == 0 {
                    set.insert(updated);
                }
            } else if count == free_bits {
                // Code complete at this depth, deeper bins stay zero.
                set.insert(updated);
            } else {
                recurse(depth + 1, remaining - count, new_free_bits, updated, set);
            }
        }
    }

    let mut set = HashSet::new();
    recurse(1, DEFLATE_NUM_PRECODE_SYMS as u32, 2, 0, &mut set);
    set
}

lazy_static! {
    static ref NEXT_CANDIDATE_SKIP: Vec<u8> = build_skip_lut();
    static ref VALID_PRECODE_HISTOGRAMS: HashSet<u64> = enumerate_valid_histograms();
}

/// Histogram membership test over the 19 permuted precode lengths.
fn precode_histogram_is_valid(precode_lens: &[u8; DEFLATE_NUM_PRECODE_SYMS]) -> bool {
    let mut histogram = 0u64;
    for &len in precode_lens {
        if len != 0 {
            histogram += 1u64 << ((len as u64 - 1) * 5);
        }
    }
    VALID_PRECODE_HISTOGRAMS.contains(&histogram)
}

/// Streaming finder for non-final dynamic Huffman block starts. False
/// positives are possible and filtered by the downstream decoder; false
/// negatives within the bound are not.
pub struct DynamicBlockFinder {
    reader: BitReader,
    until_bits: u64,
}

impl DynamicBlockFinder {
    pub fn new(mut reader: BitReader, start_bits: u64, until_bits: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(start_bits))?;
        Ok(Self { reader, until_bits })
    }

    /// Next candidate at or after the current position, strictly below the
    /// search bound.
    pub fn find_next(&mut self) -> Result<Option<u64>> {
        loop {
            let offset = self.reader.tell();
            if offset >= self.until_bits || self.reader.peek_available(1) == 0 {
                return Ok(None);
            }

            let bits = self.reader.peek(CANDIDATE_BITS)?;
            let skip = NEXT_CANDIDATE_SKIP[bits as usize];
            if skip != 0 {
                self.reader.seek(SeekFrom::Current(skip as i64))?;
                continue;
            }

            if self.check_candidate(offset)? {
                // Resume one bit further on the next call.
                self.reader.seek(SeekFrom::Start(offset + 1))?;
                return Ok(Some(offset));
            }
            self.reader.seek(SeekFrom::Start(offset + 1))?;
        }
    }

    /// Two-stage filter: the precode histogram LUT first, then a full header
    /// parse with litlen/distance table construction.
    fn check_candidate(&mut self, offset: u64) -> Result<bool> {
        // Skip the already-validated 17 header bits.
        self.reader.seek(SeekFrom::Start(offset + 3 + 5 + 5))?;
        let num_explicit = match self.reader.read(4) {
            Ok(value) => value as usize + 4,
            Err(_) => return Ok(false),
        };

        let mut precode_lens = [0u8; DEFLATE_NUM_PRECODE_SYMS];
        for i in 0..num_explicit {
            match self.reader.read(3) {
                Ok(len) => {
                    precode_lens[DEFLATE_PRECODE_LENS_PERMUTATION[i] as usize] = len as u8
                }
                Err(_) => return Ok(false),
            }
        }
        if !precode_histogram_is_valid(&precode_lens) {
            return Ok(false);
        }

        // Full validation: expand the code lengths and build both decoders.
        self.reader.seek(SeekFrom::Start(offset))?;
        let header = match read_block_header(&mut self.reader) {
            Ok(header) => header,
            Err(_) => return Ok(false),
        };
        debug_assert!(!header.final_block && header.kind == BlockKind::DynamicHuffman);

        let lengths = match read_dynamic_code_lengths(&mut self.reader) {
            Ok(lengths) => lengths,
            Err(_) => return Ok(false),
        };
        Ok(DoubleLiteralCached::new(&lengths.litlen, &lengths.distance).is_ok())
    }
}

/// One-shot search inside a range.
pub fn find_in(reader: BitReader, range: std::ops::Range<u64>) -> Result<Option<u64>> {
    DynamicBlockFinder::new(reader, range.start, range.end)?.find_next()
}
