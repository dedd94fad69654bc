use crate::bitstream::BitReader;
use crate::deflate_constants::{
    DISTANCE_BASE, DISTANCE_EXTRA_BITS, LENGTH_BASE, LENGTH_EXTRA_BITS,
};
use crate::error::{PargzError, Result};
use crate::huffman::{HuffmanDecoder, SymbolsPerLength};

/*
 * The main table fully matches up to LITLEN_LUT_BITS peeked bits in the
 * format <literal>{1,2} | <length><length extra bits><distance codeword>?.
 * Everything the peek window cannot hold falls back to the per-length
 * descent, the same way the original fast table borrows from the slow
 * multi-table lookup.
 */
pub const LITLEN_LUT_BITS: u32 = 12;
pub const DISTANCE_LUT_BITS: u32 = 8;

const KIND_LONG_PATH: u8 = 0;
const KIND_LITERAL: u8 = 1;
const KIND_DOUBLE_LITERAL: u8 = 2;
const KIND_END_OF_BLOCK: u8 = 3;
/// Full length value resolved, distance codeword fused into the entry; only
/// the distance extra bits remain in the stream.
const KIND_LENGTH_FUSED: u8 = 4;
/// Full length value resolved, distance must be decoded separately.
const KIND_LENGTH: u8 = 5;
/// Litlen symbol 286/287, invalid in any stream.
const KIND_INVALID: u8 = 6;

#[derive(Copy, Clone)]
struct FusedEntry {
    /// Bits consumed by everything the entry resolved. 0 flags the long path.
    bits_to_skip: u8,
    kind: u8,
    /// Literal, two packed literals, or the complete length value.
    value: u16,
    distance_base: u16,
    distance_extra_bits: u8,
}

impl Default for FusedEntry {
    fn default() -> Self {
        Self {
            bits_to_skip: 0,
            kind: KIND_LONG_PATH,
            value: 0,
            distance_base: 0,
            distance_extra_bits: 0,
        }
    }
}

#[derive(Copy, Clone, Default)]
struct DistanceEntry {
    bits_to_skip: u8, // 0 => long path
    base: u16,
    extra_bits: u8,
}

/// One decoded deflate instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Literal(u8),
    DoubleLiteral(u8, u8),
    Match { length: u16, distance: u16 },
    EndOfBlock,
}

/// The production deflate decoder: one LUT probe resolves either two
/// literals, or a complete length (extra bits applied) plus the following
/// distance codeword when everything fits in the peek window.
pub struct DoubleLiteralCached {
    litlen_lut: Box<[FusedEntry]>,
    litlen_long: SymbolsPerLength,
    distance: Option<DistanceTable>,
}

struct DistanceTable {
    lut: Box<[DistanceEntry]>,
    long_path: SymbolsPerLength,
}

impl DoubleLiteralCached {
    pub fn new(litlen_lengths: &[u8], distance_lengths: &[u8]) -> Result<Self> {
        let litlen_long = SymbolsPerLength::from_lengths(litlen_lengths, 15)?;

        let distance = if distance_lengths.iter().all(|&len| len == 0) {
            // A block without matches needs no distance code at all.
            None
        } else {
            let long_path = SymbolsPerLength::from_lengths(distance_lengths, 15)?;
            let mut lut = vec![DistanceEntry::default(); 1 << DISTANCE_LUT_BITS].into_boxed_slice();
            for (index, entry) in lut.iter_mut().enumerate() {
                if let Some((symbol, used)) =
                    long_path.decode_from_bits(index as u64, DISTANCE_LUT_BITS)
                {
                    if symbol < 30 {
                        *entry = DistanceEntry {
                            bits_to_skip: used as u8,
                            base: DISTANCE_BASE[symbol as usize],
                            extra_bits: DISTANCE_EXTRA_BITS[symbol as usize],
                        };
                    }
                    // Symbols 30/31 keep the long-path marker and error there.
                }
            }
            Some(DistanceTable { lut, long_path })
        };

        let mut litlen_lut = vec![FusedEntry::default(); 1 << LITLEN_LUT_BITS].into_boxed_slice();
        for index in 0..litlen_lut.len() {
            litlen_lut[index] = Self::build_entry(&litlen_long, distance.as_ref(), index as u64);
        }

        Ok(Self {
            litlen_lut,
            litlen_long,
            distance,
        })
    }

    fn build_entry(
        litlen: &SymbolsPerLength,
        distance: Option<&DistanceTable>,
        bits: u64,
    ) -> FusedEntry {
        let (symbol, used) = match litlen.decode_from_bits(bits, LITLEN_LUT_BITS) {
            Some(result) => result,
            None => return FusedEntry::default(),
        };

        if symbol < 256 {
            // Try to append a second literal inside the same window.
            if let Some((second, used2)) = litlen.decode_from_bits(bits >> used, LITLEN_LUT_BITS - used)
            {
                if second < 256 {
                    return FusedEntry {
                        bits_to_skip: (used + used2) as u8,
                        kind: KIND_DOUBLE_LITERAL,
                        value: symbol | (second << 8),
                        distance_base: 0,
                        distance_extra_bits: 0,
                    };
                }
            }
            return FusedEntry {
                bits_to_skip: used as u8,
                kind: KIND_LITERAL,
                value: symbol,
                distance_base: 0,
                distance_extra_bits: 0,
            };
        }

        if symbol == 256 {
            return FusedEntry {
                bits_to_skip: used as u8,
                kind: KIND_END_OF_BLOCK,
                value: 0,
                distance_base: 0,
                distance_extra_bits: 0,
            };
        }

        if symbol > 285 {
            return FusedEntry {
                bits_to_skip: used as u8,
                kind: KIND_INVALID,
                value: 0,
                distance_base: 0,
                distance_extra_bits: 0,
            };
        }

        let extra_bits = LENGTH_EXTRA_BITS[(symbol - 257) as usize] as u32;
        if used + extra_bits > LITLEN_LUT_BITS {
            return FusedEntry::default(); // length extras out of window
        }
        let extra = (bits >> used) & ((1u64 << extra_bits) - 1);
        let length = LENGTH_BASE[(symbol - 257) as usize] + extra as u16;
        let consumed = used + extra_bits;

        // Fuse the distance codeword too when it still fits; its extra bits
        // are read from the stream after the skip.
        if let Some(table) = distance {
            if let Some((dist_symbol, dist_used)) = table
                .long_path
                .decode_from_bits(bits >> consumed, LITLEN_LUT_BITS - consumed)
            {
                if dist_symbol < 30 && consumed + dist_used <= LITLEN_LUT_BITS {
                    return FusedEntry {
                        bits_to_skip: (consumed + dist_used) as u8,
                        kind: KIND_LENGTH_FUSED,
                        value: length,
                        distance_base: DISTANCE_BASE[dist_symbol as usize],
                        distance_extra_bits: DISTANCE_EXTRA_BITS[dist_symbol as usize],
                    };
                }
            }
        }

        FusedEntry {
            bits_to_skip: consumed as u8,
            kind: KIND_LENGTH,
            value: length,
            distance_base: 0,
            distance_extra_bits: 0,
        }
    }

    /// Decode the next instruction, advancing the reader past everything the
    /// instruction consumed (codewords and extra bits).
    #[inline]
    pub fn decode(&self, reader: &mut BitReader) -> Result<Decoded> {
        let bits = reader.peek(LITLEN_LUT_BITS)?;
        let entry = self.litlen_lut[bits as usize];

        if entry.bits_to_skip != 0 {
            if reader.peek_available(entry.bits_to_skip as u32) < entry.bits_to_skip as u32 {
                return Err(PargzError::UnexpectedEof);
            }
            reader.remove_bits(entry.bits_to_skip as u32);
        }

        match entry.kind {
            KIND_LITERAL => Ok(Decoded::Literal(entry.value as u8)),
            KIND_DOUBLE_LITERAL => Ok(Decoded::DoubleLiteral(
                entry.value as u8,
                (entry.value >> 8) as u8,
            )),
            KIND_END_OF_BLOCK => Ok(Decoded::EndOfBlock),
            KIND_LENGTH_FUSED => {
                let extra = reader.read(entry.distance_extra_bits as u32)? as u16;
                Ok(Decoded::Match {
                    length: entry.value,
                    distance: entry.distance_base + extra,
                })
            }
            KIND_LENGTH => {
                let distance = self.decode_distance(reader)?;
                Ok(Decoded::Match {
                    length: entry.value,
                    distance,
                })
            }
            KIND_INVALID => Err(PargzError::InvalidBlock),
            _ => self.decode_long_path(reader),
        }
    }

    #[cold]
    fn decode_long_path(&self, reader: &mut BitReader) -> Result<Decoded> {
        let symbol = self.litlen_long.decode(reader)?;
        if symbol < 256 {
            return Ok(Decoded::Literal(symbol as u8));
        }
        if symbol == 256 {
            return Ok(Decoded::EndOfBlock);
        }
        if symbol > 285 {
            return Err(PargzError::InvalidBlock);
        }
        let extra_bits = LENGTH_EXTRA_BITS[(symbol - 257) as usize] as u32;
        let extra = reader.read(extra_bits)? as u16;
        let length = LENGTH_BASE[(symbol - 257) as usize] + extra;
        let distance = self.decode_distance(reader)?;
        Ok(Decoded::Match { length, distance })
    }

    #[inline]
    fn decode_distance(&self, reader: &mut BitReader) -> Result<u16> {
        let table = match &self.distance {
            Some(table) => table,
            // A length symbol cannot appear when the block declared no
            // distance code.
            None => return Err(PargzError::InvalidBlock),
        };

        let bits = reader.peek(DISTANCE_LUT_BITS)?;
        let entry = table.lut[bits as usize];
        if entry.bits_to_skip != 0 {
            if reader.peek_available(entry.bits_to_skip as u32) < entry.bits_to_skip as u32 {
                return Err(PargzError::UnexpectedEof);
            }
            reader.remove_bits(entry.bits_to_skip as u32);
            let extra = reader.read(entry.extra_bits as u32)? as u32;
            return Ok((entry.base as u32 + extra) as u16);
        }

        let symbol = table.long_path.decode(reader)?;
        if symbol >= 30 {
            return Err(PargzError::InvalidDistance);
        }
        let extra = reader.read(DISTANCE_EXTRA_BITS[symbol as usize] as u32)? as u32;
        Ok((DISTANCE_BASE[symbol as usize] as u32 + extra) as u16)
    }
}

impl HuffmanDecoder for DoubleLiteralCached {
    /// Litlen-only construction, for validation against the other variants.
    fn from_lengths(lengths: &[u8], _max_code_length: u8) -> Result<Self> {
        Self::new(lengths, &[])
    }

    fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        // Decode a bare litlen symbol through the long path so that fused
        // entries do not over-consume; only used by validation tests.
        self.litlen_long.decode(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate_constants::{fixed_distance_lengths, fixed_litlen_lengths};
    use crate::file_reader::MemoryFileReader;
    use std::sync::Arc;

    fn fixed_decoder() -> DoubleLiteralCached {
        DoubleLiteralCached::new(&fixed_litlen_lengths(), &fixed_distance_lengths()).unwrap()
    }

    fn bit_reader(data: Vec<u8>) -> BitReader {
        BitReader::new(Arc::new(MemoryFileReader::new(data)))
    }

    #[test]
    fn fixed_end_of_block_is_seven_zero_bits() {
        let decoder = fixed_decoder();
        let mut reader = bit_reader(vec![0x00, 0x00]);
        assert_eq!(decoder.decode(&mut reader).unwrap(), Decoded::EndOfBlock);
        assert_eq!(reader.tell(), 7);
    }

    #[test]
    fn fixed_literal_zero() {
        // Symbol 0 is the 8-bit codeword 0b0011_0000 MSB-first, so the
        // LSB-first stream carries 0b0000_1100.
        let decoder = fixed_decoder();
        let mut reader = bit_reader(vec![0b0000_1100, 0x00]);
        match decoder.decode(&mut reader).unwrap() {
            Decoded::Literal(0) => assert_eq!(reader.tell(), 8),
            // The window may have fused the following end-of-block bits away;
            // symbol 0 must still be the first literal.
            Decoded::DoubleLiteral(0, _) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn distance_symbol_values() {
        // RFC 1951 distance expansions: symbol 4 + no extra = 5,
        // symbol 19 + extra 0 = 769, symbol 29 + max extra = 32768.
        assert_eq!(DISTANCE_BASE[4], 5);
        assert_eq!(DISTANCE_EXTRA_BITS[4], 1);
        assert_eq!(DISTANCE_BASE[19], 769);
        assert_eq!(DISTANCE_EXTRA_BITS[19], 8);
        assert_eq!(
            DISTANCE_BASE[29] as u32 + ((1u32 << DISTANCE_EXTRA_BITS[29]) - 1),
            32768
        );
    }

    #[test]
    fn fixed_match_decodes_length_and_distance() {
        // Codeword for symbol 257 (length 3): 7 bits 0b0000001 MSB-first,
        // i.e. LSB-first stream bits 1,0,0,0,0,0,0. Distance code 0
        // (distance 1): five zero bits.
        let mut bits = 0u32;
        // litlen 257: MSB-first 0000001 -> stream order reversed
        bits |= 0b1000000 << 0; // bit 0 is the first stream bit: MSB of code
        let data = bits.to_le_bytes().to_vec();
        let decoder = fixed_decoder();
        let mut reader = bit_reader(data);
        assert_eq!(
            decoder.decode(&mut reader).unwrap(),
            Decoded::Match {
                length: 3,
                distance: 1
            }
        );
        assert_eq!(reader.tell(), 12);
    }

    #[test]
    fn agrees_with_reference_across_random_patterns() {
        let litlen = fixed_litlen_lengths();
        let fast = fixed_decoder();
        let reference = SymbolsPerLength::from_lengths(&litlen, 15).unwrap();

        let mut state = 0xDEADBEEFu32;
        for _ in 0..512 {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let data: Vec<u8> = state
                .to_le_bytes()
                .iter()
                .chain(state.to_be_bytes().iter())
                .copied()
                .collect();

            let mut fast_reader = bit_reader(data.clone());
            let mut slow_reader = bit_reader(data);

            let fast_result = fast.decode(&mut fast_reader);
            let slow_symbol = reference.decode(&mut slow_reader);

            match (fast_result, slow_symbol) {
                (Ok(Decoded::Literal(byte)), Ok(symbol)) => assert_eq!(byte as u16, symbol),
                (Ok(Decoded::DoubleLiteral(first, _)), Ok(symbol)) => {
                    assert_eq!(first as u16, symbol)
                }
                (Ok(Decoded::EndOfBlock), Ok(symbol)) => assert_eq!(symbol, 256),
                (Ok(Decoded::Match { length, .. }), Ok(symbol)) => {
                    assert!(symbol > 256);
                    let base = LENGTH_BASE[(symbol - 257) as usize];
                    let max_extra = (1u16 << LENGTH_EXTRA_BITS[(symbol - 257) as usize]) - 1;
                    assert!(length >= base && length <= base + max_extra);
                }
                (Err(_), _) => {}
                (Ok(other), Err(_)) => panic!("fast decoded {:?} where reference failed", other),
            }
        }
    }
}
