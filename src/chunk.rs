use crate::deflate_constants::DEFLATE_WINDOW_SIZE;
use crate::error::Result;
use crate::marker;

/// A deflate block boundary crossed while decoding a chunk, for sub-chunk
/// seekpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBoundary {
    /// Absolute bit offset of the boundary in the compressed stream.
    pub bit_offset: u64,
    /// Bytes decoded by this chunk up to the boundary.
    pub decoded_size: u64,
}

/// A gzip member footer encountered inside a chunk, kept for the scheduler's
/// CRC accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFooter {
    /// Bytes decoded by this chunk when the footer was reached.
    pub decoded_size: u64,
    pub crc32: u32,
    pub uncompressed_size_mod32: u32,
}

/// Decoded output of one scheduling unit.
///
/// `markers` always precedes `bytes`; once resolved, `markers` is empty and
/// its values have been promoted into `bytes`.
#[derive(Default, Clone)]
pub struct DecodedChunk {
    /// Compressed bit range [begin, end) this chunk actually consumed.
    pub begin_bits: u64,
    pub end_bits: u64,

    pub markers: Vec<u16>,
    pub bytes: Vec<u8>,

    pub block_boundaries: Vec<BlockBoundary>,
    pub footers: Vec<ChunkFooter>,

    /// Set when the chunk consumed the end of the final gzip member.
    pub reached_end_of_stream: bool,

    /// Set when `end_bits` sits on a gzip member boundary (a member header
    /// follows), so the right neighbor must reparse framing, not deflate.
    pub ends_at_member_boundary: bool,

    /// How many block-start candidates were tried before one decoded.
    pub speculative_attempts: u32,
}

impl DecodedChunk {
    pub fn new(begin_bits: u64) -> Self {
        Self {
            begin_bits,
            end_bits: begin_bits,
            ..Self::default()
        }
    }

    /// Total decoded size, resolved or not.
    #[inline]
    pub fn decoded_len(&self) -> u64 {
        (self.markers.len() + self.bytes.len()) as u64
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.markers.is_empty()
    }

    /// Replace all markers using the 32 KiB window preceding this chunk and
    /// promote them into `bytes`. Idempotent: resolving a resolved chunk is
    /// a no-op.
    pub fn resolve(&mut self, window: &[u8]) -> Result<()> {
        if self.markers.is_empty() {
            return Ok(());
        }

        let mut resolved = marker::resolve_markers(&mut self.markers, window)?;
        self.markers = Vec::new();
        resolved.extend_from_slice(&self.bytes);
        self.bytes = resolved;
        Ok(())
    }

    /// The 32 KiB window right after this chunk, to seed the right neighbor.
    /// `previous_window` fills the gap when the chunk decoded fewer than
    /// 32 KiB. Requires a resolved chunk.
    pub fn trailing_window(&self, previous_window: &[u8]) -> Vec<u8> {
        debug_assert!(self.is_resolved());

        let mut window = Vec::with_capacity(DEFLATE_WINDOW_SIZE);
        let own = self.bytes.len().min(DEFLATE_WINDOW_SIZE);
        let borrowed = DEFLATE_WINDOW_SIZE - own;

        if borrowed > 0 {
            let start = previous_window.len().saturating_sub(borrowed);
            // Streams shorter than the window are padded with leading zeros.
            window.resize(borrowed - (previous_window.len() - start), 0);
            window.extend_from_slice(&previous_window[start..]);
        }
        window.extend_from_slice(&self.bytes[self.bytes.len() - own..]);
        window
    }
}
