use std::io::{Read, Write};
use std::sync::Arc;

use super::*;
use crate::error::{PargzError, Result};
use crate::window::Window;

/// Native layout, little-endian throughout:
///
/// ```text
/// magic "pargzidx"  (8 bytes)
/// version           u64
/// compressed_size   u64 (bytes)
/// uncompressed_size u64 (bytes)
/// window_size       u64
/// checkpoint_spacing u64
/// count             u64
/// count * {
///     compressed_bit_offset   u64
///     uncompressed_byte_offset u64
///     window_length           u32   (deflate-compressed byte count;
///                                    0 = reuse the predecessor's window)
///     window_bytes            [u8; window_length]
/// }
/// ```
pub const MAGIC: &[u8; 8] = b"pargzidx";
const VERSION: u64 = 1;

pub fn write(writer: &mut dyn Write, index: &GzipIndex) -> Result<()> {
    write_all(writer, MAGIC)?;
    write_all(writer, &VERSION.to_le_bytes())?;
    write_all(writer, &index.compressed_size_bytes.to_le_bytes())?;
    write_all(writer, &index.uncompressed_size_bytes.to_le_bytes())?;
    write_all(writer, &index.window_size.to_le_bytes())?;
    write_all(writer, &index.checkpoint_spacing.to_le_bytes())?;
    write_all(writer, &(index.checkpoints.len() as u64).to_le_bytes())?;

    let mut previous_window: Option<&Arc<Window>> = None;
    for checkpoint in &index.checkpoints {
        write_all(writer, &checkpoint.compressed_offset_bits.to_le_bytes())?;
        write_all(writer, &checkpoint.uncompressed_offset_bytes.to_le_bytes())?;

        match &checkpoint.window {
            None => {
                // An absent window is encoded as an empty deflate stream.
                let payload = Window::new(&[], crate::window::WindowCompression::Deflate)
                    .to_deflate_payload()?;
                write_all(writer, &(payload.len() as u32).to_le_bytes())?;
                write_all(writer, &payload)?;
            }
            Some(window) => {
                if previous_window.map_or(false, |prev| Arc::ptr_eq(prev, window)) {
                    // Shared with the predecessor; legal only for
                    // checkpoints that are not block boundaries.
                    write_all(writer, &0u32.to_le_bytes())?;
                } else {
                    let payload = window.to_deflate_payload()?;
                    write_all(writer, &(payload.len() as u32).to_le_bytes())?;
                    write_all(writer, &payload)?;
                }
                previous_window = Some(window);
            }
        }
    }
    Ok(())
}

pub fn read_after_magic(reader: &mut dyn Read) -> Result<GzipIndex> {
    let version = read_u64_le(reader)?;
    if version != VERSION {
        return Err(PargzError::IndexVersionUnsupported(version));
    }

    let compressed_size_bytes = read_u64_le(reader)?;
    let uncompressed_size_bytes = read_u64_le(reader)?;
    let window_size = read_u64_le(reader)?;
    let checkpoint_spacing = read_u64_le(reader)?;
    let count = read_u64_le(reader)?;
    if count > (1 << 40) {
        return Err(PargzError::IndexFormatInvalid("implausible checkpoint count"));
    }

    let mut checkpoints = Vec::with_capacity(count as usize);
    let mut previous_window: Option<Arc<Window>> = None;
    for _ in 0..count {
        let compressed_offset_bits = read_u64_le(reader)?;
        let uncompressed_offset_bytes = read_u64_le(reader)?;
        let window_length = read_u32_le(reader)? as usize;

        let window = if window_length == 0 {
            match &previous_window {
                Some(window) => Some(Arc::clone(window)),
                None => {
                    return Err(PargzError::IndexFormatInvalid(
                        "first checkpoint cannot reference a predecessor window",
                    ))
                }
            }
        } else {
            let payload = read_exact_vec(reader, window_length)?;
            let bytes = crate::window::inflate_raw(&payload)?;
            if bytes.is_empty() {
                None
            } else {
                Some(Arc::new(Window::from_deflate_payload(payload, bytes.len())))
            }
        };

        if let Some(window) = &window {
            previous_window = Some(Arc::clone(window));
        }
        checkpoints.push(Checkpoint {
            compressed_offset_bits,
            uncompressed_offset_bytes,
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
