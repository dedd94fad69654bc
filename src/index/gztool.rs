use std::io::{Read, Write};
use std::sync::Arc;

use super::*;
use crate::error::{PargzError, Result};
use crate::window::Window;

/// gztool-compatible layout. All integers are big-endian, following the
/// legacy tool:
///
/// ```text
/// 8 zero bytes
/// "gzipindx"  (v0) or "gzipindX" (v1, with line offsets)
/// count       u64
/// [v1] line_number_format u32  (0 = '\n', 1 = '\r')
/// count * {
///     out        u64  (uncompressed byte offset)
///     in         u64  (compressed byte offset; point is `bits` earlier)
///     bits       u32  (0..=7)
///     [v1] line_number u64
///     window_len u32
///     window bytes (deflate), absent when window_len == 0
/// }
/// compressed_size   u64
/// uncompressed_size u64
/// [v1] number_of_lines u64
/// ```
///
/// Stream-boundary checkpoints carry zero-length windows, per the legacy
/// convention.
const MAGIC_V0: &[u8; 8] = b"gzipindx";
const MAGIC_V1: &[u8; 8] = b"gzipindX";

pub fn write(writer: &mut dyn Write, index: &GzipIndex, with_lines: bool) -> Result<()> {
    write_all(writer, &[0u8; 8])?;
    write_all(writer, if with_lines { MAGIC_V1 } else { MAGIC_V0 })?;
    write_all(writer, &(index.checkpoints.len() as u64).to_be_bytes())?;
    if with_lines {
        let format = match index.newline_format {
            NewlineFormat::LineFeed => 0u32,
            NewlineFormat::CarriageReturn => 1u32,
        };
        write_all(writer, &format.to_be_bytes())?;
    }

    for checkpoint in &index.checkpoints {
        let bits = (8 - checkpoint.compressed_offset_bits % 8) % 8;
        let in_offset = (checkpoint.compressed_offset_bits + bits) / 8;
        write_all(writer, &checkpoint.uncompressed_offset_bytes.to_be_bytes())?;
        write_all(writer, &in_offset.to_be_bytes())?;
        write_all(writer, &(bits as u32).to_be_bytes())?;
        if with_lines {
            write_all(writer, &checkpoint.line_offset.unwrap_or(0).to_be_bytes())?;
        }
        match &checkpoint.window {
            None => write_all(writer, &0u32.to_be_bytes())?,
            Some(window) => {
                let payload = window.to_deflate_payload()?;
                write_all(writer, &(payload.len() as u32).to_be_bytes())?;
                write_all(writer, &payload)?;
            }
        }
    }

    write_all(writer, &index.compressed_size_bytes.to_be_bytes())?;
    write_all(writer, &index.uncompressed_size_bytes.to_be_bytes())?;
    if with_lines {
        let total_lines = index
            .checkpoints
            .last()
            .and_then(|checkpoint| checkpoint.line_offset)
            .unwrap_or(0);
        write_all(writer, &total_lines.to_be_bytes())?;
    }
    Ok(())
}

/// The sniffer consumed the 8 zero bytes already.
pub fn read_after_zero_run(reader: &mut dyn Read) -> Result<GzipIndex> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(PargzError::from)?;
    let with_lines = match &magic {
        m if m == MAGIC_V0 => false,
        m if m == MAGIC_V1 => true,
        _ => return Err(PargzError::IndexFormatInvalid("bad gztool magic")),
    };

    let count = read_u64_be(reader)? as usize;
    let newline_format = if with_lines {
        match read_u32_be(reader)? {
            0 => NewlineFormat::LineFeed,
            1 => NewlineFormat::CarriageReturn,
            _ => return Err(PargzError::IndexFormatInvalid("unknown newline format")),
        }
    } else {
        NewlineFormat::default()
    };

    let mut checkpoints = Vec::with_capacity(count);
    for _ in 0..count {
        let out_offset = read_u64_be(reader)?;
        let in_offset = read_u64_be(reader)?;
        let bits = read_u32_be(reader)?;
        if bits > 7 {
            return Err(PargzError::IndexFormatInvalid("bit offset above 7"));
        }
        let line_offset = if with_lines {
            Some(read_u64_be(reader)?)
        } else {
            None
        };
        let window_len = read_u32_be(reader)? as usize;
        let window = if window_len == 0 {
            None
        } else {
            let payload = read_exact_vec(reader, window_len)?;
            let bytes = crate::window::inflate_raw(&payload)?;
            Some(Arc::new(Window::from_deflate_payload(payload, bytes.len())))
        };
        checkpoints.push(Checkpoint {
            compressed_offset_bits: in_offset * 8 - bits as u64,
            uncompressed_offset_bytes: out_offset,
            line_offset,
            window,
        });
    }

    let compressed_size_bytes = read_u64_be(reader)?;
    let uncompressed_size_bytes = read_u64_be(reader)?;
    if with_lines {
        let _total_lines = read_u64_be(reader)?;
    }

    let index = GzipIndex {
        compressed_size_bytes,
        uncompressed_size_bytes,
        checkpoint_spacing: 0,
        window_size: crate::deflate_constants::DEFLATE_WINDOW_SIZE as u64,
        has_line_offsets: with_lines,
        newline_format,
        checkpoints,
    };
    index.validate()?;
    Ok(index)
}
