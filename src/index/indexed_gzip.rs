use std::io::{Read, Write};
use std::sync::Arc;

use super::*;
use crate::error::{PargzError, Result};
use crate::window::{Window, WindowCompression};

/// indexed_gzip-compatible layout, little-endian:
///
/// ```text
/// magic "GZIDX"     (5 bytes)
/// version           u8    (1)
/// flags             u8    (bit 0: window payloads deflate-compressed)
/// compressed_size   u64
/// uncompressed_size u64
/// spacing           u32
/// window_size       u32
/// count             u32
/// count * {
///     cmp_offset    u64   (bytes; the seekpoint lies `bits` bits before)
///     uncmp_offset  u64
///     bits          u8    (0..=7)
///     data_flag     u8    (1 when a window payload follows in the data
///                          section)
/// }
/// count * { payload_length u32, payload bytes }   (data_flag points only)
/// ```
const VERSION: u8 = 1;
const FLAG_COMPRESSED_WINDOWS: u8 = 0x01;

pub fn write(writer: &mut dyn Write, index: &GzipIndex) -> Result<()> {
    write_all(writer, b"GZIDX")?;
    write_all(writer, &[VERSION, FLAG_COMPRESSED_WINDOWS])?;
    write_all(writer, &index.compressed_size_bytes.to_le_bytes())?;
    write_all(writer, &index.uncompressed_size_bytes.to_le_bytes())?;
    write_all(writer, &(index.checkpoint_spacing as u32).to_le_bytes())?;
    write_all(writer, &(index.window_size as u32).to_le_bytes())?;
    write_all(writer, &(index.checkpoints.len() as u32).to_le_bytes())?;

    for checkpoint in &index.checkpoints {
        let bits = (8 - checkpoint.compressed_offset_bits % 8) % 8;
        let cmp_offset = (checkpoint.compressed_offset_bits + bits) / 8;
        write_all(writer, &cmp_offset.to_le_bytes())?;
        write_all(writer, &checkpoint.uncompressed_offset_bytes.to_le_bytes())?;
        write_all(writer, &[bits as u8, checkpoint.window.is_some() as u8])?;
    }

    for checkpoint in &index.checkpoints {
        if let Some(window) = &checkpoint.window {
            let payload = window.to_deflate_payload()?;
            write_all(writer, &(payload.len() as u32).to_le_bytes())?;
            write_all(writer, &payload)?;
        }
    }
    Ok(())
}

/// `magic` holds the first 8 bytes already consumed by the sniffer:
/// "GZIDX" + version + flags + the first byte of compressed_size.
pub fn read_after_magic(magic: &[u8; 8], reader: &mut dyn Read) -> Result<GzipIndex> {
    let version = magic[5];
    if version > VERSION {
        return Err(PargzError::IndexVersionUnsupported(version as u64));
    }
    let flags = magic[6];
    let compressed_windows = flags & FLAG_COMPRESSED_WINDOWS != 0;

    let mut compressed_size_bytes = [0u8; 8];
    compressed_size_bytes[0] = magic[7];
    reader
        .read_exact(&mut compressed_size_bytes[1..])
        .map_err(PargzError::from)?;
    let compressed_size_bytes = u64::from_le_bytes(compressed_size_bytes);

    let uncompressed_size_bytes = read_u64_le(reader)?;
    let checkpoint_spacing = read_u32_le(reader)? as u64;
    let window_size = read_u32_le(reader)? as u64;
    let count = read_u32_le(reader)? as usize;

    let mut raw_points = Vec::with_capacity(count);
    for _ in 0..count {
        let cmp_offset = read_u64_le(reader)?;
        let uncmp_offset = read_u64_le(reader)?;
        let bits = read_u8(reader)?;
        let data_flag = read_u8(reader)?;
        if bits > 7 {
            return Err(PargzError::IndexFormatInvalid("bit offset above 7"));
        }
        if cmp_offset * 8 < bits as u64 {
            return Err(PargzError::IndexFormatInvalid("negative bit offset"));
        }
        raw_points.push((cmp_offset, uncmp_offset, bits, data_flag != 0));
    }

    let mut checkpoints = Vec::with_capacity(count);
    for (cmp_offset, uncmp_offset, bits, has_data) in raw_points {
        let window = if has_data {
            let length = read_u32_le(reader)? as usize;
            let payload = read_exact_vec(reader, length)?;
            if compressed_windows {
                let bytes = crate::window::inflate_raw(&payload)?;
                Some(Arc::new(Window::from_deflate_payload(payload, bytes.len())))
            } else {
                Some(Arc::new(Window::new(&payload, WindowCompression::Raw)))
            }
        } else {
            None
        };
        checkpoints.push(Checkpoint {
            compressed_offset_bits: cmp_offset * 8 - bits as u64,
            uncompressed_offset_bytes: uncmp_offset,
            line_offset: None,
            window,
        });
    }

    let index = GzipIndex {
        compressed_size_bytes,
        uncompressed_size_bytes,
        checkpoint_spacing,
        window_size,
        has_line_offsets: false,
        newline_format: NewlineFormat::default(),
        checkpoints,
    };
    index.validate()?;
    Ok(index)
}
