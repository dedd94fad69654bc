use crate::bitstream::BitReader;
use crate::error::{PargzError, Result};

pub const GZIP_ID1: u8 = 0x1F;
pub const GZIP_ID2: u8 = 0x8B;
pub const GZIP_CM_DEFLATE: u8 = 8;

pub const GZIP_FTEXT: u8 = 0x01;
pub const GZIP_FHCRC: u8 = 0x02;
pub const GZIP_FEXTRA: u8 = 0x04;
pub const GZIP_FNAME: u8 = 0x08;
pub const GZIP_FCOMMENT: u8 = 0x10;
pub const GZIP_FRESERVED: u8 = 0xE0;

/// Outer wrapper around the deflate stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Gzip,
    Zlib,
    RawDeflate,
}

/// Parsed RFC 1952 member header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipHeader {
    pub mtime: u32,
    pub extra_flags: u8,
    pub os: u8,
    pub is_text: bool,
    pub extra: Option<Vec<u8>>,
    pub file_name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    pub had_header_crc: bool,
    /// Size of the bgzf member minus one, from the `BC` extra subfield.
    pub bgzf_block_size: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipFooter {
    pub crc32: u32,
    /// Uncompressed size modulo 2^32.
    pub uncompressed_size_mod32: u32,
}

/// Parse one member header. The reader must be byte-aligned at the member
/// start; on success it is byte-aligned at the first deflate block.
pub fn read_gzip_header(reader: &mut BitReader) -> Result<GzipHeader> {
    debug_assert_eq!(reader.tell() % 8, 0);

    // Raw header bytes are kept around for the optional FHCRC check.
    let mut raw = Vec::with_capacity(32);
    let mut read_byte = |reader: &mut BitReader, raw: &mut Vec<u8>| -> Result<u8> {
        let byte = reader.read_u8()?;
        raw.push(byte);
        Ok(byte)
    };

    if read_byte(reader, &mut raw)? != GZIP_ID1 || read_byte(reader, &mut raw)? != GZIP_ID2 {
        return Err(PargzError::InvalidMagic);
    }
    let method = read_byte(reader, &mut raw)?;
    if method != GZIP_CM_DEFLATE {
        return Err(PargzError::UnsupportedCompressionMethod(method));
    }
    let flags = read_byte(reader, &mut raw)?;
    if flags & GZIP_FRESERVED != 0 {
        return Err(PargzError::InvalidFlags(flags));
    }

    let mut mtime_bytes = [0u8; 4];
    for byte in &mut mtime_bytes {
        *byte = read_byte(reader, &mut raw)?;
    }
    let extra_flags = read_byte(reader, &mut raw)?;
    let os = read_byte(reader, &mut raw)?;

    let mut header = GzipHeader {
        mtime: u32::from_le_bytes(mtime_bytes),
        extra_flags,
        os,
        is_text: flags & GZIP_FTEXT != 0,
        ..Default::default()
    };

    if flags & GZIP_FEXTRA != 0 {
        let len = read_byte(reader, &mut raw)? as usize
            | (read_byte(reader, &mut raw)? as usize) << 8;
        let mut extra = vec![0u8; len];
        for byte in &mut extra {
            *byte = read_byte(reader, &mut raw)?;
        }
        header.bgzf_block_size = parse_bgzf_subfield(&extra);
        header.extra = Some(extra);
    }

    if flags & GZIP_FNAME != 0 {
        header.file_name = Some(read_zero_terminated(reader, &mut raw)?);
    }
    if flags & GZIP_FCOMMENT != 0 {
        header.comment = Some(read_zero_terminated(reader, &mut raw)?);
    }

    if flags & GZIP_FHCRC != 0 {
        header.had_header_crc = true;
        let computed = crc32fast::hash(&raw) as u16;
        let stored = reader.read_le_u16()?;
        if stored != computed {
            return Err(PargzError::HeaderCrcMismatch { stored, computed });
        }
    }

    Ok(header)
}

fn read_zero_terminated(reader: &mut BitReader, raw: &mut Vec<u8>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let byte = reader.read_u8()?;
        raw.push(byte);
        if byte == 0 {
            return Ok(out);
        }
        out.push(byte);
    }
}

/// The bgzf `BC` subfield: total member size minus one, little-endian.
pub fn parse_bgzf_subfield(extra: &[u8]) -> Option<u16> {
    let mut rest = extra;
    while rest.len() >= 4 {
        let (id, len) = (&rest[..2], u16::from_le_bytes([rest[2], rest[3]]) as usize);
        let payload = rest.get(4..4 + len)?;
        if id == b"BC" && len == 2 {
            return Some(u16::from_le_bytes([payload[0], payload[1]]));
        }
        rest = &rest[4 + len..];
    }
    None
}

/// Read the member footer. The caller must have aligned to a byte boundary
/// after the final block.
pub fn read_gzip_footer(reader: &mut BitReader) -> Result<GzipFooter> {
    debug_assert_eq!(reader.tell() % 8, 0);
    Ok(GzipFooter {
        crc32: reader.read_le_u32()?,
        uncompressed_size_mod32: reader.read_le_u32()?,
    })
}

/// Verify a parsed footer against locally computed values. CRC checking may
/// be disabled, in which case `crc32` is `None`.
pub fn verify_footer(footer: &GzipFooter, crc32: Option<u32>, decoded_bytes: u64) -> Result<()> {
    if let Some(computed) = crc32 {
        if computed != footer.crc32 {
            return Err(PargzError::ChecksumMismatch {
                stored: footer.crc32,
                computed,
            });
        }
    }
    let computed = decoded_bytes as u32;
    if computed != footer.uncompressed_size_mod32 {
        return Err(PargzError::SizeMismatch {
            stored: footer.uncompressed_size_mod32,
            computed,
        });
    }
    Ok(())
}

/// RFC 1950 header: CMF/FLG with the FCHECK constraint, deflate only,
/// no preset dictionary.
pub fn read_zlib_header(reader: &mut BitReader) -> Result<()> {
    debug_assert_eq!(reader.tell() % 8, 0);
    let cmf = reader.read_u8()?;
    let flg = reader.read_u8()?;
    if cmf & 0x0F != GZIP_CM_DEFLATE {
        return Err(PargzError::UnsupportedCompressionMethod(cmf & 0x0F));
    }
    if (cmf as u32 * 256 + flg as u32) % 31 != 0 {
        return Err(PargzError::InvalidMagic);
    }
    if flg & 0x20 != 0 {
        // FDICT: preset dictionaries never occur in the supported streams.
        return Err(PargzError::InvalidFlags(flg));
    }
    Ok(())
}

/// Zlib footer: big-endian Adler-32 of the decompressed data.
pub fn read_zlib_footer(reader: &mut BitReader) -> Result<u32> {
    debug_assert_eq!(reader.tell() % 8, 0);
    let mut bytes = [0u8; 4];
    reader.read_bytes(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

/// Rolling Adler-32 (RFC 1950 §8) over the decoded member bytes.
pub struct Adler32 {
    inner: adler32::RollingAdler32,
}

impl Adler32 {
    pub fn new() -> Self {
        Self {
            inner: adler32::RollingAdler32::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update_buffer(data);
    }

    pub fn finalize(&self) -> u32 {
        self.inner.hash()
    }
}

impl Clone for Adler32 {
    fn clone(&self) -> Self {
        Self {
            inner: adler32::RollingAdler32::from_value(self.inner.hash()),
        }
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Sniff the wrapper from the first bytes. Raw deflate cannot be reliably
/// detected, so it stays a caller decision; this only separates gzip from
/// zlib for the auto path.
pub fn detect_stream_kind(first_bytes: &[u8]) -> StreamKind {
    if first_bytes.len() >= 2 && first_bytes[0] == GZIP_ID1 && first_bytes[1] == GZIP_ID2 {
        StreamKind::Gzip
    } else if first_bytes.len() >= 2
        && first_bytes[0] & 0x0F == GZIP_CM_DEFLATE
        && (first_bytes[0] as u32 * 256 + first_bytes[1] as u32) % 31 == 0
    {
        StreamKind::Zlib
    } else {
        StreamKind::RawDeflate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MemoryFileReader;
    use crate::testing;
    use std::sync::Arc;

    fn bit_reader(data: Vec<u8>) -> BitReader {
        BitReader::new(Arc::new(MemoryFileReader::new(data)))
    }

    #[test]
    fn plain_header_round_trip() {
        let member = testing::gzip_member_stored(b"data");
        let mut reader = bit_reader(member);
        let header = read_gzip_header(&mut reader).unwrap();
        assert_eq!(header.file_name, None);
        assert_eq!(header.bgzf_block_size, None);
        assert_eq!(reader.tell(), 10 * 8);
    }

    #[test]
    fn header_with_name_comment_and_crc() {
        let mut writer = testing::DeflateWriter::new();
        writer.stored_block(b"x", true);
        let member = testing::gzip_wrap_with(
            &writer.finish(),
            b"x",
            &testing::GzipMemberOptions {
                file_name: Some(b"name.txt".to_vec()),
                comment: Some(b"a comment".to_vec()),
                header_crc: true,
                mtime: 0x61DB04F5,
                ..Default::default()
            },
        );
        let mut reader = bit_reader(member);
        let header = read_gzip_header(&mut reader).unwrap();
        assert_eq!(header.file_name.as_deref(), Some(b"name.txt".as_ref()));
        assert_eq!(header.comment.as_deref(), Some(b"a comment".as_ref()));
        assert!(header.had_header_crc);
        assert_eq!(header.mtime, 0x61DB04F5);
    }

    #[test]
    fn corrupted_header_crc_is_detected() {
        let mut writer = testing::DeflateWriter::new();
        writer.stored_block(b"x", true);
        let mut member = testing::gzip_wrap_with(
            &writer.finish(),
            b"x",
            &testing::GzipMemberOptions {
                header_crc: true,
                ..Default::default()
            },
        );
        member[4] ^= 0xFF; // flip an mtime byte covered by the CRC
        let mut reader = bit_reader(member);
        assert!(matches!(
            read_gzip_header(&mut reader),
            Err(PargzError::HeaderCrcMismatch { .. })
        ));
    }

    #[test]
    fn reserved_flags_are_rejected() {
        let mut member = testing::gzip_member_stored(b"x");
        member[3] |= 0x80;
        let mut reader = bit_reader(member);
        assert!(matches!(
            read_gzip_header(&mut reader),
            Err(PargzError::InvalidFlags(_))
        ));
    }

    #[test]
    fn bgzf_subfield_is_exposed() {
        let member = testing::bgzf_member_stored(b"bgzf payload");
        let expected = member.len() as u16 - 1;
        let mut reader = bit_reader(member);
        let header = read_gzip_header(&mut reader).unwrap();
        assert_eq!(header.bgzf_block_size, Some(expected));
    }

    #[test]
    fn zlib_header_and_footer() {
        let mut writer = testing::DeflateWriter::new();
        writer.stored_block(b"zlib data", true);
        let stream = testing::zlib_wrap(&writer.finish(), b"zlib data");
        let mut reader = bit_reader(stream.clone());
        read_zlib_header(&mut reader).unwrap();
        // Skip the deflate payload, check the trailing Adler-32.
        reader
            .seek(std::io::SeekFrom::End(-32))
            .unwrap();
        let adler = read_zlib_footer(&mut reader).unwrap();
        let mut hasher = Adler32::new();
        hasher.update(b"zlib data");
        assert_eq!(adler, hasher.finalize());
    }

    #[test]
    fn truncated_header_reports_eof() {
        let mut reader = bit_reader(vec![0x1F, 0x8B, 0x08]);
        assert!(matches!(
            read_gzip_header(&mut reader),
            Err(PargzError::UnexpectedEof)
        ));
    }
}
