use std::io::SeekFrom;

use crate::bitstream::BitReader;
use crate::decompress_gzip::read_gzip_header;
use crate::error::Result;

/// Bgzf members start with the gzip magic plus FEXTRA flagged; the `BC`
/// subfield then tells the member size, making every boundary a guaranteed
/// restart point.
const BGZF_MAGIC: [u8; 4] = [0x1F, 0x8B, 0x08, 0x04];

/// Finder for bgzf member boundaries. Prefers following the `BC` size chain;
/// falls back to a byte scan for the magic when the chain breaks.
pub struct BgzfBlockFinder {
    reader: BitReader,
    next_byte: u64,
    until_bits: u64,
}

impl BgzfBlockFinder {
    pub fn new(reader: BitReader, start_bits: u64, until_bits: u64) -> Self {
        Self {
            reader,
            next_byte: (start_bits + 7) / 8,
            until_bits,
        }
    }

    /// Whether the stream itself is bgzf (first member carries `BC`).
    pub fn looks_like_bgzf(mut reader: BitReader) -> bool {
        if reader.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        matches!(
            read_gzip_header(&mut reader),
            Ok(header) if header.bgzf_block_size.is_some()
        )
    }

    pub fn find_next(&mut self) -> Result<Option<u64>> {
        loop {
            let offset_bits = self.next_byte * 8;
            if offset_bits >= self.until_bits || offset_bits >= self.reader.size() {
                return Ok(None);
            }

            match self.member_size_at(self.next_byte)? {
                Some(size) => {
                    let member_offset = self.next_byte;
                    self.next_byte += size;
                    return Ok(Some(member_offset * 8));
                }
                None => {
                    // Chain broken: scan forward for the next magic.
                    match self.scan_for_magic(self.next_byte + 1)? {
                        Some(byte) => self.next_byte = byte,
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Parse the header at `byte` and return the full member size from the
    /// `BC` subfield.
    fn member_size_at(&mut self, byte: u64) -> Result<Option<u64>> {
        self.reader.seek(SeekFrom::Start(byte * 8))?;
        match read_gzip_header(&mut self.reader) {
            Ok(header) => Ok(header.bgzf_block_size.map(|size| size as u64 + 1)),
            Err(_) => Ok(None),
        }
    }

    fn scan_for_magic(&mut self, from_byte: u64) -> Result<Option<u64>> {
        self.reader.seek(SeekFrom::Start(from_byte * 8))?;
        let mut rolling = [0u8; 4];
        let mut filled = 0usize;
        let mut position = from_byte;
        loop {
            if (position + filled as u64) * 8 >= self.until_bits {
                return Ok(None);
            }
            if self.reader.peek_available(8) < 8 {
                return Ok(None);
            }
            let byte = self.reader.read_u8()?;
            if filled < 4 {
                rolling[filled] = byte;
                filled += 1;
            } else {
                rolling.rotate_left(1);
                rolling[3] = byte;
                position += 1;
            }
            if filled == 4 && rolling == BGZF_MAGIC {
                return Ok(Some(position));
            }
        }
    }
}

/// Finder for pigz flush markers: the two-byte empty stored block leaves the
/// byte pattern 00 00 FF FF, after which the next block starts byte-aligned.
pub struct PigzBlockFinder {
    reader: BitReader,
    scan_byte: u64,
    until_bits: u64,
    rolling: u32,
    primed: bool,
    exhausted: bool,
}

impl PigzBlockFinder {
    pub fn new(reader: BitReader, start_bits: u64, until_bits: u64) -> Self {
        Self {
            reader,
            scan_byte: (start_bits + 7) / 8,
            until_bits,
            rolling: 0,
            primed: false,
            exhausted: false,
        }
    }

    /// Bit offset of the block that starts right after the next flush
    /// marker.
    pub fn find_next(&mut self) -> Result<Option<u64>> {
        if self.exhausted {
            return Ok(None);
        }
        if !self.primed {
            self.primed = true;
            self.reader.seek(SeekFrom::Start(self.scan_byte * 8))?;
            if self.reader.peek_available(32) < 32 {
                self.exhausted = true;
                return Ok(None);
            }
            let mut first = [0u8; 4];
            self.reader.read_bytes(&mut first)?;
            self.rolling = u32::from_le_bytes(first);
        }

        loop {
            let after_marker = (self.scan_byte + 4) * 8;
            if after_marker >= self.until_bits {
                return Ok(None);
            }

            let matched = self.rolling == 0xFFFF_0000;

            if self.reader.peek_available(8) < 8 {
                self.exhausted = true;
                return Ok(if matched { Some(after_marker) } else { None });
            }
            let byte = self.reader.read_u8()?;
            self.rolling = (self.rolling >> 8) | (byte as u32) << 24;
            self.scan_byte += 1;

            if matched {
                return Ok(Some(after_marker));
            }
        }
    }
}
