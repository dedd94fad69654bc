use crate::bitstream::BitReader;
use crate::error::{PargzError, Result};
use crate::huffman::{HuffmanDecoder, SymbolsPerLength};

/// Number of peeked bits indexing the lookup table. Codewords no longer than
/// this decode with a single table probe.
pub const LUT_BITS: u32 = 11;

/// One table entry: bits to skip and the decoded symbol. `bits_to_skip == 0`
/// flags "codeword longer than LUT_BITS, consult the long-code path".
#[derive(Copy, Clone, Default)]
struct LutEntry {
    bits_to_skip: u8,
    symbol: u16,
}

/// LUT-accelerated decoder. The peeked LSB-first bit pattern is a direct
/// table index because the cached codewords are stored bit-reversed; codes
/// longer than [`LUT_BITS`] fall back to the per-length descent.
pub struct SingleLutCached {
    lut: Box<[LutEntry]>,
    long_path: SymbolsPerLength,
}

impl HuffmanDecoder for SingleLutCached {
    fn from_lengths(lengths: &[u8], max_code_length: u8) -> Result<Self> {
        let long_path = SymbolsPerLength::from_lengths(lengths, max_code_length)?;

        let mut lut = vec![LutEntry::default(); 1 << LUT_BITS].into_boxed_slice();
        for (symbol, length, codeword) in long_path.canonical().codewords() {
            if length as u32 > LUT_BITS {
                continue; // stays a long-path entry (bits_to_skip == 0)
            }
            // Bit-reverse the MSB-first codeword so that it matches the
            // peeked LSB-first pattern, then fill every index sharing the
            // reversed prefix (stride 2^length).
            let reversed = (codeword.reverse_bits() >> (32 - length as u32)) as usize;
            let mut index = reversed;
            while index < lut.len() {
                lut[index] = LutEntry {
                    bits_to_skip: length,
                    symbol,
                };
                index += 1 << length;
            }
        }

        // The single-symbol special case fills the whole table at length 1.
        if let Some(symbol) = long_path.canonical().single_symbol() {
            for entry in lut.iter_mut() {
                *entry = LutEntry {
                    bits_to_skip: 1,
                    symbol,
                };
            }
        }

        Ok(Self { lut, long_path })
    }

    #[inline]
    fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        let bits = reader.peek(LUT_BITS)?;
        let entry = self.lut[bits as usize];
        if entry.bits_to_skip != 0 {
            if reader.peek_available(entry.bits_to_skip as u32) < entry.bits_to_skip as u32 {
                return Err(PargzError::UnexpectedEof);
            }
            reader.remove_bits(entry.bits_to_skip as u32);
            Ok(entry.symbol)
        } else {
            self.long_path.decode(reader)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate_constants::{fixed_litlen_lengths, DEFLATE_MAX_CODEWORD_LEN};
    use crate::file_reader::MemoryFileReader;
    use crate::huffman::LinearSearch;
    use std::sync::Arc;

    #[test]
    fn agrees_with_linear_search_on_fixed_code() {
        let lengths = fixed_litlen_lengths();
        let fast = SingleLutCached::from_lengths(&lengths, DEFLATE_MAX_CODEWORD_LEN).unwrap();
        let slow = LinearSearch::from_lengths(&lengths, DEFLATE_MAX_CODEWORD_LEN).unwrap();

        // Pseudo-random bit patterns, enough for codes of every length.
        let mut state = 0x12345678u32;
        for _ in 0..256 {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let data = state.to_le_bytes().to_vec();
            let mut a = BitReader::new(Arc::new(MemoryFileReader::new(data.clone())));
            let mut b = BitReader::new(Arc::new(MemoryFileReader::new(data)));
            match (fast.decode(&mut a), slow.decode(&mut b)) {
                (Ok(x), Ok(y)) => {
                    assert_eq!(x, y);
                    assert_eq!(a.tell(), b.tell());
                }
                (Err(_), Err(_)) => {}
                other => panic!("divergent results: {:?}", other),
            }
        }
    }

    #[test]
    fn long_codes_fall_back() {
        // A skewed alphabet with codewords up to 14 bits.
        let mut lengths = vec![1u8];
        for len in 2..=13 {
            lengths.push(len);
        }
        lengths.push(14);
        lengths.push(14);
        let decoder = SingleLutCached::from_lengths(&lengths, 15).unwrap();

        // The all-ones pattern selects the deepest codeword.
        let mut reader = BitReader::new(Arc::new(MemoryFileReader::new(vec![0xFF, 0xFF])));
        assert_eq!(decoder.decode(&mut reader).unwrap(), 14);
        assert_eq!(reader.tell(), 14);
    }
}
