pub mod double_literal;
pub mod linear_search;
pub mod single_lut;
pub mod symbols_per_length;

pub use double_literal::DoubleLiteralCached;
pub use linear_search::LinearSearch;
pub use single_lut::SingleLutCached;
pub use symbols_per_length::SymbolsPerLength;

use crate::bitstream::BitReader;
use crate::error::{PargzError, Result};

/// Canonical Huffman decoder over code lengths, one length per symbol,
/// 0 meaning "symbol absent".
///
/// All variants share construction and validation; they differ only in how a
/// symbol is looked up. `DoubleLiteralCached` is the production deflate
/// decoder; the others exist for validation and for the precode.
pub trait HuffmanDecoder: Sized {
    fn from_lengths(lengths: &[u8], max_code_length: u8) -> Result<Self>;

    /// Decode one symbol, advancing the reader by the codeword length.
    fn decode(&self, reader: &mut BitReader) -> Result<u16>;
}

/// Shared canonical-code bookkeeping: per-length counts, minimum codes and
/// the symbol table sorted by (length, symbol).
///
/// Canonical codes: shorter lengths precede longer ones; within one length,
/// codes are assigned in ascending symbol order, via
/// `minimum_code[len] = (minimum_code[len - 1] + count[len - 1]) << 1`.
#[derive(Clone)]
pub struct CanonicalCode {
    max_length: u8,
    counts: [u16; 16],
    minimum_codes: [u32; 16],
    /// Start of each length's run inside `symbols`.
    offsets: [u16; 16],
    /// Symbols with non-zero lengths, sorted by (length, symbol).
    symbols: Vec<u16>,
    /// Set for the single-symbol length-1 special case, where both codewords
    /// 0 and 1 decode to the symbol.
    single_symbol: Option<u16>,
}

impl CanonicalCode {
    /// Validate lengths and build the canonical tables.
    ///
    /// Error kinds, each distinct: empty alphabet, a length above
    /// `max_code_length`, per-depth Kraft overflow, and a bloating
    /// (under-full) code, with the single-1-bit-code exception.
    pub fn from_lengths(lengths: &[u8], max_code_length: u8) -> Result<Self> {
        debug_assert!(max_code_length <= 15);

        let mut counts = [0u16; 16];
        let mut non_zero = 0usize;
        for &len in lengths {
            if len > max_code_length {
                return Err(PargzError::InvalidCodeLengths);
            }
            counts[len as usize] += 1;
            non_zero += (len != 0) as usize;
        }
        if non_zero == 0 {
            return Err(PargzError::EmptyAlphabet);
        }

        // Kraft sums, checked per depth so overfull prefixes are rejected
        // even when a later deficit would rebalance the total.
        let mut minimum_codes = [0u32; 16];
        let mut code = 0u32;
        for len in 1..=max_code_length as usize {
            code = (code + counts[len - 1] as u32) << 1;
            minimum_codes[len] = code;
            if code + counts[len] as u32 > 1u32 << len {
                return Err(PargzError::InvalidHuffmanCode);
            }
        }

        let codespace_used: u32 = (1..=max_code_length as u32)
            .map(|len| (counts[len as usize] as u32) << (max_code_length as u32 - len))
            .sum();

        let mut single_symbol = None;
        if codespace_used < 1u32 << max_code_length {
            // Bloating code. The one allowed shape is a single symbol with a
            // 1-bit codeword, which zlib also permits.
            if non_zero == 1 && counts[1] == 1 {
                single_symbol = lengths
                    .iter()
                    .position(|&len| len != 0)
                    .map(|symbol| symbol as u16);
            } else {
                return Err(PargzError::BloatingHuffmanCoding);
            }
        }

        let mut offsets = [0u16; 16];
        for len in 1..=max_code_length as usize {
            offsets[len] = offsets[len - 1] + counts[len - 1];
        }
        offsets[0] = 0;

        let mut symbols = vec![0u16; non_zero];
        let mut cursor = offsets;
        cursor[0] = u16::MAX; // length 0 symbols are not stored
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbols[cursor[len as usize] as usize] = symbol as u16;
                cursor[len as usize] += 1;
            }
        }

        Ok(Self {
            max_length: max_code_length,
            counts,
            minimum_codes,
            offsets,
            symbols,
            single_symbol,
        })
    }

    #[inline]
    pub fn max_length(&self) -> u8 {
        self.max_length
    }

    #[inline]
    pub fn single_symbol(&self) -> Option<u16> {
        self.single_symbol
    }

    /// Bit-serial decode, reading one bit at a time. MSB-first canonical
    /// codewords are reconstructed from the LSB-first stream by appending
    /// each new bit at the bottom of the running code.
    pub fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        if let Some(symbol) = self.single_symbol {
            reader.read(1)?;
            return Ok(symbol);
        }

        let mut code = 0u32;
        for len in 1..=self.max_length as usize {
            code = (code << 1) | reader.read(1)? as u32;
            let count = self.counts[len] as u32;
            if count != 0 && code < self.minimum_codes[len] + count {
                let index = self.offsets[len] as usize + (code - self.minimum_codes[len]) as usize;
                return Ok(self.symbols[index]);
            }
        }
        Err(PargzError::InvalidHuffmanCode)
    }

    /// Decode from an already-peeked LSB-first bit pattern. Returns the
    /// symbol and the number of bits consumed, or `None` when `available`
    /// bits do not contain a full codeword. Used to fill lookup tables.
    pub fn decode_from_bits(&self, bits: u64, available: u32) -> Option<(u16, u32)> {
        if let Some(symbol) = self.single_symbol {
            return if available >= 1 { Some((symbol, 1)) } else { None };
        }

        let mut code = 0u32;
        for len in 1..=(self.max_length as u32).min(available) {
            code = (code << 1) | ((bits >> (len - 1)) & 1) as u32;
            let count = self.counts[len as usize] as u32;
            if count != 0 && code < self.minimum_codes[len as usize] + count {
                let index = self.offsets[len as usize] as usize
                    + (code - self.minimum_codes[len as usize]) as usize;
                return Some((self.symbols[index], len));
            }
        }
        None
    }

    /// All (symbol, length, msb-first codeword) triples, for the slow
    /// search-based variants and for tests.
    pub fn codewords(&self) -> Vec<(u16, u8, u32)> {
        let mut result = Vec::with_capacity(self.symbols.len());
        for len in 1..=self.max_length as usize {
            for i in 0..self.counts[len] as usize {
                let symbol = self.symbols[self.offsets[len] as usize + i];
                result.push((symbol, len as u8, self.minimum_codes[len] + i as u32));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate_constants::{fixed_litlen_lengths, DEFLATE_MAX_CODEWORD_LEN};
    use crate::file_reader::MemoryFileReader;
    use std::sync::Arc;

    fn bit_reader(data: Vec<u8>) -> BitReader {
        BitReader::new(Arc::new(MemoryFileReader::new(data)))
    }

    #[test]
    fn rejects_empty_alphabet() {
        assert!(matches!(
            CanonicalCode::from_lengths(&[0, 0, 0], 15),
            Err(PargzError::EmptyAlphabet)
        ));
    }

    #[test]
    fn rejects_too_long_codes() {
        assert!(matches!(
            CanonicalCode::from_lengths(&[8, 8], 7),
            Err(PargzError::InvalidCodeLengths)
        ));
    }

    #[test]
    fn rejects_overfull_code() {
        // Three 1-bit codes can never fit.
        assert!(matches!(
            CanonicalCode::from_lengths(&[1, 1, 1], 15),
            Err(PargzError::InvalidHuffmanCode)
        ));
    }

    #[test]
    fn rejects_bloating_code() {
        // Two 3-bit codes leave three quarters of the codespace unused.
        assert!(matches!(
            CanonicalCode::from_lengths(&[3, 3], 15),
            Err(PargzError::BloatingHuffmanCoding)
        ));
    }

    #[test]
    fn accepts_single_length_one_code() {
        let code = CanonicalCode::from_lengths(&[0, 1, 0], 15).unwrap();
        assert_eq!(code.single_symbol(), Some(1));
        // Both codewords decode to the symbol.
        let mut reader = bit_reader(vec![0b01]);
        assert_eq!(code.decode(&mut reader).unwrap(), 1);
        assert_eq!(code.decode(&mut reader).unwrap(), 1);
    }

    #[test]
    fn canonical_code_assignment() {
        // Classic RFC 1951 example: lengths (3, 3, 3, 3, 3, 2, 4, 4)
        // produce codes 010..111, 00, 1110, 1111.
        let code = CanonicalCode::from_lengths(&[3, 3, 3, 3, 3, 2, 4, 4], 15).unwrap();
        let codewords = code.codewords();
        assert_eq!(codewords[0], (5, 2, 0b00));
        assert_eq!(codewords[1], (0, 3, 0b010));
        assert_eq!(codewords[5], (4, 3, 0b110));
        assert_eq!(codewords[6], (6, 4, 0b1110));
        assert_eq!(codewords[7], (7, 4, 0b1111));
    }

    #[test]
    fn fixed_litlen_codewords_match_rfc() {
        // RFC 1951 fixed code: symbol 256 -> 7 zero bits, symbol 0 ->
        // 0b0011_0000,
        // symbol 144 -> 0b1_1001_0000 (all MSB-first).
        let code =
            CanonicalCode::from_lengths(&fixed_litlen_lengths(), DEFLATE_MAX_CODEWORD_LEN).unwrap();
        let by_symbol: std::collections::HashMap<u16, (u8, u32)> = code
            .codewords()
            .into_iter()
            .map(|(symbol, len, word)| (symbol, (len, word)))
            .collect();
        assert_eq!(by_symbol[&256], (7, 0));
        assert_eq!(by_symbol[&0], (8, 0b0011_0000));
        assert_eq!(by_symbol[&144], (9, 0b1_1001_0000));
        assert_eq!(by_symbol[&279], (7, 0b0010_111));
        assert_eq!(by_symbol[&287], (8, 0b1100_0111));
    }

    #[test]
    fn bit_pattern_decode_matches_reader_decode() {
        let code = CanonicalCode::from_lengths(&[2, 3, 3, 2, 3, 3], 15).unwrap();
        for pattern in 0u64..64 {
            let (symbol, consumed) = code.decode_from_bits(pattern, 6).unwrap();
            let mut reader = bit_reader(vec![pattern as u8]);
            assert_eq!(code.decode(&mut reader).unwrap(), symbol);
            assert_eq!(reader.tell(), consumed as u64);
        }
    }
}
