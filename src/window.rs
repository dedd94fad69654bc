use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bitstream::BitReader;
use crate::chunk::DecodedChunk;
use crate::decompress_deflate::DeflateDecoder;
use crate::error::{PargzError, Result};
use crate::file_reader::MemoryFileReader;

/// Storage form of a sliding-window snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCompression {
    Raw,
    /// Wrapped into a raw deflate stream (stored blocks), the form index
    /// files carry.
    Deflate,
    /// Zero-run/literal-run form for windows that are mostly unreferenced.
    Sparse,
}

/// Immutable 32 KiB window snapshot at a deflate block boundary. Stream
/// boundaries legitimately carry shorter (even empty) windows.
pub struct Window {
    payload: Vec<u8>,
    compression: WindowCompression,
    decompressed_size: usize,
}

impl Window {
    pub fn new(bytes: &[u8], compression: WindowCompression) -> Self {
        let payload = match compression {
            WindowCompression::Raw => bytes.to_vec(),
            WindowCompression::Deflate => deflate_stored_wrap(bytes),
            WindowCompression::Sparse => sparse_encode(bytes),
        };
        Self {
            payload,
            compression,
            decompressed_size: bytes.len(),
        }
    }

    /// Build directly from an already deflate-compressed payload (index
    /// import path).
    pub fn from_deflate_payload(payload: Vec<u8>, decompressed_size: usize) -> Self {
        Self {
            payload,
            compression: WindowCompression::Deflate,
            decompressed_size,
        }
    }

    /// Zero out every byte the following chunk never referenced, then store
    /// sparse. The used ranges come from tracing the chunk's back-references.
    pub fn new_minimized(bytes: &[u8], used: &[(usize, usize)]) -> Self {
        let mut minimized = vec![0u8; bytes.len()];
        for &(start, end) in used {
            let end = end.min(bytes.len());
            if start < end {
                minimized[start..end].copy_from_slice(&bytes[start..end]);
            }
        }
        Self::new(&minimized, WindowCompression::Sparse)
    }

    pub fn compression(&self) -> WindowCompression {
        self.compression
    }

    pub fn compressed_size(&self) -> usize {
        self.payload.len()
    }

    pub fn decompressed_size(&self) -> usize {
        self.decompressed_size
    }

    /// Raw deflate bytes of the window, for index export.
    pub fn to_deflate_payload(&self) -> Result<Vec<u8>> {
        match self.compression {
            WindowCompression::Deflate => Ok(self.payload.clone()),
            _ => Ok(deflate_stored_wrap(&self.decompress()?)),
        }
    }

    pub fn decompress(&self) -> Result<Vec<u8>> {
        match self.compression {
            WindowCompression::Raw => Ok(self.payload.clone()),
            WindowCompression::Deflate => {
                let bytes = inflate_raw(&self.payload)?;
                if bytes.len() != self.decompressed_size {
                    return Err(PargzError::IndexFormatInvalid("window size mismatch"));
                }
                Ok(bytes)
            }
            WindowCompression::Sparse => sparse_decode(&self.payload, self.decompressed_size),
        }
    }
}

/// Wrap bytes into raw-deflate stored blocks; valid input for any inflater.
fn deflate_stored_wrap(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 0xFFFF * 5 + 6);
    let mut chunks = bytes.chunks(0xFFFF).peekable();
    if bytes.is_empty() {
        out.extend_from_slice(&[0x01, 0x00, 0x00, 0xFF, 0xFF]);
        return out;
    }
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        out.push(last as u8); // BFINAL + BTYPE 00, byte-aligned
        let len = chunk.len() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out
}

/// Inflate a raw deflate stream held in memory (window payloads only).
pub fn inflate_raw(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = BitReader::new(Arc::new(MemoryFileReader::new(data.to_vec())));
    let mut decoder = DeflateDecoder::new_with_window(&[]);
    let mut chunk = DecodedChunk::new(0);
    loop {
        let summary = decoder.decode_block(&mut reader, &mut chunk)?;
        if summary.header.final_block {
            break;
        }
    }
    Ok(chunk.bytes)
}

/* Sparse form: repeated (zero_run varint, literal_run varint, literals). */

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or(PargzError::IndexFormatInvalid("truncated varint"))?;
        *pos += 1;
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(PargzError::IndexFormatInvalid("varint overflow"));
        }
    }
}

fn sparse_encode(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let zero_start = pos;
        while pos < bytes.len() && bytes[pos] == 0 {
            pos += 1;
        }
        let literal_start = pos;
        // A literal run ends at the next "long enough" zero run; short zero
        // gaps are cheaper kept literal than run-encoded.
        while pos < bytes.len() {
            if bytes[pos] != 0 {
                pos += 1;
                continue;
            }
            let mut probe = pos;
            while probe < bytes.len() && bytes[probe] == 0 {
                probe += 1;
            }
            if probe - pos >= 4 || probe == bytes.len() {
                break;
            }
            pos = probe;
        }
        push_varint(&mut out, (literal_start - zero_start) as u64);
        push_varint(&mut out, (pos - literal_start) as u64);
        out.extend_from_slice(&bytes[literal_start..pos]);
    }
    out
}

fn sparse_decode(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_size);
    let mut pos = 0usize;
    while pos < data.len() {
        let zeros = read_varint(data, &mut pos)? as usize;
        let literals = read_varint(data, &mut pos)? as usize;
        if out.len() + zeros + literals > expected_size || pos + literals > data.len() {
            return Err(PargzError::IndexFormatInvalid("sparse window overflow"));
        }
        out.resize(out.len() + zeros, 0);
        out.extend_from_slice(&data[pos..pos + literals]);
        pos += literals;
    }
    if out.len() > expected_size {
        return Err(PargzError::IndexFormatInvalid("sparse window overflow"));
    }
    out.resize(expected_size, 0);
    Ok(out)
}

/// Content store of window snapshots keyed by the compressed bit offset they
/// belong to. Windows are immutable; replacing a speculative window with a
/// resolved one swaps the entry.
pub struct WindowMap {
    windows: Mutex<HashMap<u64, Arc<Window>>>,
}

impl WindowMap {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, offset_bits: u64) -> Option<Arc<Window>> {
        self.windows.lock().unwrap().get(&offset_bits).cloned()
    }

    /// Idempotent: the first insertion for an offset wins.
    pub fn put(&self, offset_bits: u64, window: Arc<Window>) {
        self.windows
            .lock()
            .unwrap()
            .entry(offset_bits)
            .or_insert(window);
    }

    /// Forced replacement, for resolved windows superseding speculative ones.
    pub fn replace(&self, offset_bits: u64, window: Arc<Window>) {
        self.windows.lock().unwrap().insert(offset_bits, window);
    }

    pub fn contains(&self, offset_bits: u64) -> bool {
        self.windows.lock().unwrap().contains_key(&offset_bits)
    }

    pub fn len(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.windows.lock().unwrap().clear();
    }

    pub fn offsets(&self) -> Vec<u64> {
        let mut offsets: Vec<u64> = self.windows.lock().unwrap().keys().copied().collect();
        offsets.sort_unstable();
        offsets
    }
}

impl Default for WindowMap {
    fn default() -> Self {
        Self::new()
    }
}
