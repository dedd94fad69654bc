pub mod gztool;
pub mod indexed_gzip;
pub mod native;

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{PargzError, Result};
use crate::window::Window;

/// Supported seekpoint-table layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Native,
    IndexedGzip,
    Gztool,
    GztoolWithLines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewlineFormat {
    LineFeed,
    CarriageReturn,
}

impl Default for NewlineFormat {
    fn default() -> Self {
        NewlineFormat::LineFeed
    }
}

/// One seekpoint: a compressed/uncompressed offset pair with the sliding
/// window needed to restart decoding there.
#[derive(Clone)]
pub struct Checkpoint {
    pub compressed_offset_bits: u64,
    pub uncompressed_offset_bytes: u64,
    /// Lines before this point, when the index carries line offsets.
    pub line_offset: Option<u64>,
    /// Absent for stream-boundary points where the window is empty.
    pub window: Option<Arc<Window>>,
}

/// In-memory form of a seekpoint table, convertible to and from all
/// supported file layouts.
#[derive(Clone, Default)]
pub struct GzipIndex {
    pub compressed_size_bytes: u64,
    pub uncompressed_size_bytes: u64,
    pub checkpoint_spacing: u64,
    pub window_size: u64,
    pub has_line_offsets: bool,
    pub newline_format: NewlineFormat,
    pub checkpoints: Vec<Checkpoint>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            compressed_offset_bits: 0,
            uncompressed_offset_bytes: 0,
            line_offset: None,
            window: None,
        }
    }
}

impl GzipIndex {
    /// Ordering and sentinel invariants every well-formed index satisfies.
    pub fn validate(&self) -> Result<()> {
        for pair in self.checkpoints.windows(2) {
            if pair[1].compressed_offset_bits <= pair[0].compressed_offset_bits {
                return Err(PargzError::IndexFormatInvalid(
                    "compressed offsets not strictly increasing",
                ));
            }
            if pair[1].uncompressed_offset_bytes < pair[0].uncompressed_offset_bytes {
                return Err(PargzError::IndexFormatInvalid(
                    "uncompressed offsets decreasing",
                ));
            }
        }
        Ok(())
    }

    /// Structural equality ignoring window storage form (windows compared
    /// decompressed).
    pub fn same_seekpoints(&self, other: &GzipIndex) -> bool {
        if self.checkpoints.len() != other.checkpoints.len() {
            return false;
        }
        self.checkpoints.iter().zip(&other.checkpoints).all(|(a, b)| {
            a.compressed_offset_bits == b.compressed_offset_bits
                && a.uncompressed_offset_bytes == b.uncompressed_offset_bytes
                && a.line_offset == b.line_offset
                && match (&a.window, &b.window) {
                    (None, None) => true,
                    (Some(x), Some(y)) => match (x.decompress(), y.decompress()) {
                        (Ok(wx), Ok(wy)) => wx == wy,
                        _ => false,
                    },
                    _ => false,
                }
        })
    }
}

/// Sniff the format from the first bytes and parse.
pub fn read_index(reader: &mut dyn Read) -> Result<GzipIndex> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(PargzError::from)?;

    if magic == *native::MAGIC {
        return native::read_after_magic(reader);
    }
    if magic[..5] == *b"GZIDX" {
        return indexed_gzip::read_after_magic(&magic, reader);
    }
    if magic == [0u8; 8] {
        return gztool::read_after_zero_run(reader);
    }
    Err(PargzError::IndexFormatInvalid("unknown index magic"))
}

pub fn write_index(writer: &mut dyn Write, index: &GzipIndex, format: IndexFormat) -> Result<()> {
    index.validate()?;
    match format {
        IndexFormat::Native => native::write(writer, index),
        IndexFormat::IndexedGzip => indexed_gzip::write(writer, index),
        IndexFormat::Gztool => gztool::write(writer, index, false),
        IndexFormat::GztoolWithLines => gztool::write(writer, index, true),
    }
}

/* Little/big-endian field helpers shared by the format modules. */

pub(crate) fn read_u64_le(reader: &mut dyn Read) -> Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes).map_err(PargzError::from)?;
    Ok(u64::from_le_bytes(bytes))
}

pub(crate) fn read_u32_le(reader: &mut dyn Read) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(PargzError::from)?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_u8(reader: &mut dyn Read) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte).map_err(PargzError::from)?;
    Ok(byte[0])
}

pub(crate) fn read_u64_be(reader: &mut dyn Read) -> Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes).map_err(PargzError::from)?;
    Ok(u64::from_be_bytes(bytes))
}

pub(crate) fn read_u32_be(reader: &mut dyn Read) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(PargzError::from)?;
    Ok(u32::from_be_bytes(bytes))
}

pub(crate) fn read_exact_vec(reader: &mut dyn Read, len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    reader.read_exact(&mut out).map_err(PargzError::from)?;
    Ok(out)
}

pub(crate) fn write_all(writer: &mut dyn Write, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).map_err(PargzError::from)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::deflate_constants::DEFLATE_WINDOW_SIZE;
    use crate::window::WindowCompression;

    /// A representative index: stream-boundary point without window, inner
    /// points with full windows, EOS sentinel.
    pub fn sample_index(with_lines: bool) -> GzipIndex {
        let window_a: Vec<u8> = (0..DEFLATE_WINDOW_SIZE).map(|i| (i % 253) as u8).collect();
        let window_b: Vec<u8> = (0..DEFLATE_WINDOW_SIZE).map(|i| (i % 101) as u8).collect();

        GzipIndex {
            compressed_size_bytes: 1_000_000,
            uncompressed_size_bytes: 4_000_000,
            checkpoint_spacing: 1_048_576,
            window_size: DEFLATE_WINDOW_SIZE as u64,
            has_line_offsets: with_lines,
            newline_format: NewlineFormat::LineFeed,
            checkpoints: vec![
                Checkpoint {
                    compressed_offset_bits: 80,
                    uncompressed_offset_bytes: 0,
                    line_offset: with_lines.then_some(0),
                    window: None,
                },
                Checkpoint {
                    compressed_offset_bits: 2_000_005,
                    uncompressed_offset_bytes: 1_333_333,
                    line_offset: with_lines.then_some(10_000),
                    window: Some(Arc::new(Window::new(&window_a, WindowCompression::Deflate))),
                },
                Checkpoint {
                    compressed_offset_bits: 5_500_001,
                    uncompressed_offset_bytes: 2_666_000,
                    line_offset: with_lines.then_some(20_481),
                    window: Some(Arc::new(Window::new(&window_b, WindowCompression::Raw))),
                },
                Checkpoint {
                    compressed_offset_bits: 8_000_000,
                    uncompressed_offset_bytes: 4_000_000,
                    line_offset: with_lines.then_some(31_024),
                    window: None,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::sample_index;

    fn round_trip(format: IndexFormat, with_lines: bool) {
        let index = sample_index(with_lines);
        let mut buffer = Vec::new();
        write_index(&mut buffer, &index, format).unwrap();
        let reread = read_index(&mut buffer.as_slice()).unwrap();
        assert!(index.same_seekpoints(&reread), "{:?}", format);
        assert_eq!(reread.compressed_size_bytes, index.compressed_size_bytes);
        assert_eq!(reread.uncompressed_size_bytes, index.uncompressed_size_bytes);
        assert_eq!(reread.has_line_offsets, with_lines);
    }

    #[test]
    fn native_round_trip() {
        round_trip(IndexFormat::Native, false);
    }

    #[test]
    fn indexed_gzip_round_trip() {
        round_trip(IndexFormat::IndexedGzip, false);
    }

    #[test]
    fn gztool_round_trip() {
        round_trip(IndexFormat::Gztool, false);
    }

    #[test]
    fn gztool_with_lines_round_trip() {
        round_trip(IndexFormat::GztoolWithLines, true);
    }

    #[test]
    fn cross_format_legacy_interop() {
        // Export native -> import -> export indexed_gzip -> import: the
        // seekpoint tables stay identical (line offsets are
        // format-exclusive and dropped by design).
        let index = sample_index(false);
        let mut native_bytes = Vec::new();
        write_index(&mut native_bytes, &index, IndexFormat::Native).unwrap();
        let from_native = read_index(&mut native_bytes.as_slice()).unwrap();

        let mut legacy_bytes = Vec::new();
        write_index(&mut legacy_bytes, &from_native, IndexFormat::IndexedGzip).unwrap();
        let from_legacy = read_index(&mut legacy_bytes.as_slice()).unwrap();
        assert!(from_native.same_seekpoints(&from_legacy));

        let mut gztool_bytes = Vec::new();
        write_index(&mut gztool_bytes, &from_legacy, IndexFormat::Gztool).unwrap();
        let from_gztool = read_index(&mut gztool_bytes.as_slice()).unwrap();
        assert!(from_legacy.same_seekpoints(&from_gztool));
    }

    #[test]
    fn writing_twice_is_deterministic() {
        let index = sample_index(true);
        for format in [
            IndexFormat::Native,
            IndexFormat::IndexedGzip,
            IndexFormat::Gztool,
            IndexFormat::GztoolWithLines,
        ] {
            let mut first = Vec::new();
            let mut second = Vec::new();
            write_index(&mut first, &index, format).unwrap();
            write_index(&mut second, &index, format).unwrap();
            assert_eq!(first, second, "{:?}", format);
        }
    }

    #[test]
    fn unordered_index_is_rejected() {
        let mut index = sample_index(false);
        index.checkpoints.swap(1, 2);
        let mut buffer = Vec::new();
        assert!(matches!(
            write_index(&mut buffer, &index, IndexFormat::Native),
            Err(PargzError::IndexFormatInvalid(_))
        ));
    }

    #[test]
    fn garbage_magic_is_rejected() {
        let garbage = vec![0xABu8; 64];
        assert!(matches!(
            read_index(&mut garbage.as_slice()),
            Err(PargzError::IndexFormatInvalid(_))
        ));
    }
}
