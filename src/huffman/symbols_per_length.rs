use crate::bitstream::BitReader;
use crate::error::{PargzError, Result};
use crate::huffman::{CanonicalCode, HuffmanDecoder};

/// Per-length minimum-code descent over symbols sorted by length.
///
/// One `peek` of the maximum codeword length replaces bit-by-bit reads; the
/// consumed length is removed once the symbol is known. This is the long-code
/// fallback used by the LUT variants.
pub struct SymbolsPerLength {
    canonical: CanonicalCode,
}

impl SymbolsPerLength {
    #[inline]
    pub fn canonical(&self) -> &CanonicalCode {
        &self.canonical
    }

    /// Decode from a peeked LSB-first pattern; `None` when `available` bits
    /// do not hold a full codeword.
    #[inline]
    pub fn decode_from_bits(&self, bits: u64, available: u32) -> Option<(u16, u32)> {
        self.canonical.decode_from_bits(bits, available)
    }
}

impl HuffmanDecoder for SymbolsPerLength {
    fn from_lengths(lengths: &[u8], max_code_length: u8) -> Result<Self> {
        Ok(Self {
            canonical: CanonicalCode::from_lengths(lengths, max_code_length)?,
        })
    }

    fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        let max_length = self.canonical.max_length() as u32;
        let bits = reader.peek(max_length)?;
        let available = reader.peek_available(max_length);
        match self.canonical.decode_from_bits(bits, available) {
            Some((symbol, consumed)) => {
                reader.remove_bits(consumed);
                Ok(symbol)
            }
            None => {
                if available < max_length {
                    Err(PargzError::UnexpectedEof)
                } else {
                    Err(PargzError::InvalidHuffmanCode)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MemoryFileReader;
    use std::sync::Arc;

    #[test]
    fn matches_bit_serial_reference() {
        let lengths = [4u8, 4, 4, 4, 4, 4, 3, 3, 3, 2];
        let decoder = SymbolsPerLength::from_lengths(&lengths, 15).unwrap();
        let reference = CanonicalCode::from_lengths(&lengths, 15).unwrap();

        for byte in 0u16..256 {
            let data = vec![byte as u8, 0xA5];
            let mut a = BitReader::new(Arc::new(MemoryFileReader::new(data.clone())));
            let mut b = BitReader::new(Arc::new(MemoryFileReader::new(data)));
            let expected = reference.decode(&mut b);
            let actual = decoder.decode(&mut a);
            match (expected, actual) {
                (Ok(x), Ok(y)) => {
                    assert_eq!(x, y);
                    assert_eq!(a.tell(), b.tell());
                }
                (Err(_), Err(_)) => {}
                other => panic!("divergent results: {:?}", other),
            }
        }
    }
}
