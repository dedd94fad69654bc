use crate::bitstream::BitReader;
use crate::error::{PargzError, Result};
use crate::huffman::{CanonicalCode, HuffmanDecoder};

/// Reference decoder that compares the growing codeword against every stored
/// codeword of the current length. Far too slow for production but trivially
/// correct, so the faster variants are validated against it.
pub struct LinearSearch {
    /// (symbol, length, msb-first codeword), sorted by (length, codeword).
    codewords: Vec<(u16, u8, u32)>,
    max_length: u8,
    single_symbol: Option<u16>,
}

impl HuffmanDecoder for LinearSearch {
    fn from_lengths(lengths: &[u8], max_code_length: u8) -> Result<Self> {
        let canonical = CanonicalCode::from_lengths(lengths, max_code_length)?;
        Ok(Self {
            codewords: canonical.codewords(),
            max_length: canonical.max_length(),
            single_symbol: canonical.single_symbol(),
        })
    }

    fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        if let Some(symbol) = self.single_symbol {
            reader.read(1)?;
            return Ok(symbol);
        }

        let mut code = 0u32;
        for length in 1..=self.max_length {
            code = (code << 1) | reader.read(1)? as u32;
            for &(symbol, len, word) in &self.codewords {
                if len == length && word == code {
                    return Ok(symbol);
                }
            }
        }
        Err(PargzError::InvalidHuffmanCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MemoryFileReader;
    use std::sync::Arc;

    #[test]
    fn decodes_fixed_distance_alphabet() {
        let decoder = LinearSearch::from_lengths(&[5u8; 32], 15).unwrap();
        // 5-bit codes are the symbol value itself, MSB-first in the stream.
        let mut reader = BitReader::new(Arc::new(MemoryFileReader::new(vec![
            0b000_00101, // 0b10100 = 20 then partial
        ])));
        // First codeword: bits 1,0,1,0,0 -> MSB-first 0b10100 = 20.
        assert_eq!(decoder.decode(&mut reader).unwrap(), 0b10100);
    }
}
