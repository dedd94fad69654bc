use crate::deflate_constants::{DEFLATE_WINDOW_SIZE, MARKER_BASE};
use crate::error::{PargzError, Result};

/*
 * Marker replacement is the hottest part of chunk stitching: every
 * speculatively decoded byte passes through here exactly once. The output is
 * half the size of the input, which allows the replacement to run in place:
 * iteration i reads the u16 at element index i (byte offset 2i) and writes
 * one u8 at byte offset i, so the write cursor can never overtake unread
 * input. SIMD gathers could replace the scalar loop; the aliasing argument
 * stays the same.
 */

/// Replace each 16-bit value with its real byte: values below 256 are the
/// byte itself, values in [256, 256 + 32768) index the supplied window.
/// Returns the resolved bytes; `buffer` contents are consumed.
pub fn resolve_markers(buffer: &mut [u16], window: &[u8]) -> Result<Vec<u8>> {
    debug_assert!(window.len() >= DEFLATE_WINDOW_SIZE);

    let len = buffer.len();
    let base = buffer.as_mut_ptr();

    unsafe {
        let read = base as *const u16;
        let write = base as *mut u8;

        for i in 0..len {
            let value = read.add(i).read();
            let byte = if value < MARKER_BASE {
                value as u8
            } else {
                let position = (value - MARKER_BASE) as usize;
                if position >= DEFLATE_WINDOW_SIZE {
                    return Err(PargzError::InvalidBlock);
                }
                window[window.len() - DEFLATE_WINDOW_SIZE + position]
            };
            write.add(i).write(byte);
        }

        Ok(std::slice::from_raw_parts(base as *const u8, len).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_with(position: usize, value: u8) -> Vec<u8> {
        let mut window = vec![0u8; DEFLATE_WINDOW_SIZE];
        window[position] = value;
        window
    }

    #[test]
    fn literals_pass_through() {
        let window = vec![0u8; DEFLATE_WINDOW_SIZE];
        let mut buffer: Vec<u16> = (0u16..256).collect();
        let resolved = resolve_markers(&mut buffer, &window).unwrap();
        assert_eq!(resolved, (0u16..256).map(|value| value as u8).collect::<Vec<_>>());
    }

    #[test]
    fn markers_index_the_window() {
        let window = window_with(12345, 0x5A);
        let mut buffer = vec![256 + 12345u16, 7, 256u16];
        let resolved = resolve_markers(&mut buffer, &window).unwrap();
        assert_eq!(resolved, vec![0x5A, 7, 0]);
    }

    #[test]
    fn marker_at_window_end() {
        let window = window_with(DEFLATE_WINDOW_SIZE - 1, 0xEE);
        let mut buffer = vec![256 + (DEFLATE_WINDOW_SIZE as u16 - 1)];
        assert_eq!(resolve_markers(&mut buffer, &window).unwrap(), vec![0xEE]);
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let window = vec![0u8; DEFLATE_WINDOW_SIZE];
        let mut buffer = vec![(256 + DEFLATE_WINDOW_SIZE) as u16];
        assert!(resolve_markers(&mut buffer, &window).is_err());
    }

    #[test]
    fn long_buffer_resolves_in_place() {
        let mut window = vec![0u8; DEFLATE_WINDOW_SIZE];
        for (position, slot) in window.iter_mut().enumerate() {
            *slot = (position % 251) as u8;
        }
        let mut buffer: Vec<u16> = (0..100_000u32)
            .map(|i| {
                if i % 3 == 0 {
                    (i % 256) as u16
                } else {
                    256 + (i % DEFLATE_WINDOW_SIZE as u32) as u16
                }
            })
            .collect();
        let expected: Vec<u8> = buffer
            .iter()
            .map(|&value| {
                if value < 256 {
                    value as u8
                } else {
                    window[(value - 256) as usize]
                }
            })
            .collect();
        assert_eq!(resolve_markers(&mut buffer, &window).unwrap(), expected);
    }
}
