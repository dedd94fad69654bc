use std::sync::Arc;

use crate::bitstream::BitReader;
use crate::chunk::DecodedChunk;
use crate::decompress_deflate::{BlockKind, DeflateDecoder};
use crate::decompress_gzip::{
    read_gzip_footer, read_gzip_header, read_zlib_footer, read_zlib_header, verify_footer,
    Adler32, GzipHeader, StreamKind,
};
use crate::error::{PargzError, Result};
use crate::file_reader::FileReader;

/// Positions at which [`GzipReader::read_with_stops`] returns control to the
/// caller in addition to "output buffer full".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoppingPoints {
    pub end_of_block: bool,
    pub end_of_stream: bool,
}

impl StoppingPoints {
    pub const NONE: Self = Self {
        end_of_block: false,
        end_of_stream: false,
    };
    pub const END_OF_BLOCK: Self = Self {
        end_of_block: true,
        end_of_stream: false,
    };
    pub const END_OF_STREAM: Self = Self {
        end_of_block: false,
        end_of_stream: true,
    };
}

/// Which stopping point was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppedAt {
    EndOfBlock,
    /// A gzip member (or the zlib/raw stream) ended; footer was verified.
    EndOfStream,
}

enum ReaderState {
    ExpectHeader,
    InStream,
    Finished,
}

/// Single-threaded sequential decoder over a whole file. The parallel
/// scheduler uses the same block machinery chunk-wise; this reader is the
/// reference path and powers `--analyze`.
pub struct GzipReader {
    reader: BitReader,
    kind: StreamKind,
    decoder: DeflateDecoder,
    state: ReaderState,

    /// Decoded-but-undelivered bytes.
    pending: DecodedChunk,
    pending_drained: usize,

    verify_crc: bool,
    member_hasher: crc32fast::Hasher,
    member_adler: Adler32,
    member_decoded: u64,
    total_decoded: u64,
}

impl GzipReader {
    pub fn new(source: Arc<dyn FileReader>, kind: StreamKind) -> Self {
        Self {
            reader: BitReader::new(source),
            kind,
            decoder: DeflateDecoder::new_with_window(&[]),
            state: ReaderState::ExpectHeader,
            pending: DecodedChunk::new(0),
            pending_drained: 0,
            verify_crc: true,
            member_hasher: crc32fast::Hasher::new(),
            member_adler: Adler32::new(),
            member_decoded: 0,
            total_decoded: 0,
        }
    }

    pub fn set_crc32_enabled(&mut self, enabled: bool) {
        self.verify_crc = enabled;
    }

    /// Compressed bit offset of the next undecoded bit.
    pub fn tell_compressed_bits(&self) -> u64 {
        self.reader.tell()
    }

    /// Decoded bytes delivered so far.
    pub fn tell(&self) -> u64 {
        self.total_decoded
    }

    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        Ok(self.read_with_stops(out, StoppingPoints::NONE)?.0)
    }

    /// Fill `out` with decoded bytes, stopping early at the requested
    /// stopping points. Returns bytes written plus the stop that fired.
    pub fn read_with_stops(
        &mut self,
        out: &mut [u8],
        stops: StoppingPoints,
    ) -> Result<(usize, Option<StoppedAt>)> {
        let mut written = 0;

        loop {
            written += self.drain_pending(&mut out[written..]);
            if written == out.len() && !out.is_empty() {
                return Ok((written, None));
            }

            match self.state {
                ReaderState::Finished => return Ok((written, None)),
                ReaderState::ExpectHeader => {
                    match self.kind {
                        StreamKind::Gzip => {
                            let _header: GzipHeader = read_gzip_header(&mut self.reader)?;
                        }
                        StreamKind::Zlib => read_zlib_header(&mut self.reader)?,
                        StreamKind::RawDeflate => {}
                    }
                    self.member_hasher = crc32fast::Hasher::new();
                    self.member_adler = Adler32::new();
                    self.member_decoded = 0;
                    self.state = ReaderState::InStream;
                }
                ReaderState::InStream => {
                    let before = self.pending.decoded_len() as usize;
                    let summary = self.decoder.decode_block(&mut self.reader, &mut self.pending)?;
                    let decoded = &self.pending.bytes[before..];
                    self.member_hasher.update(decoded);
                    if matches!(self.kind, StreamKind::Zlib) {
                        self.member_adler.update(decoded);
                    }
                    self.member_decoded += decoded.len() as u64;

                    if summary.header.final_block {
                        self.finish_member()?;
                        if stops.end_of_stream {
                            written += self.drain_pending(&mut out[written..]);
                            return Ok((written, Some(StoppedAt::EndOfStream)));
                        }
                    } else if stops.end_of_block {
                        written += self.drain_pending(&mut out[written..]);
                        return Ok((written, Some(StoppedAt::EndOfBlock)));
                    }
                }
            }
        }
    }

    fn finish_member(&mut self) -> Result<()> {
        self.reader.align_to_byte();
        match self.kind {
            StreamKind::Gzip => {
                let footer = read_gzip_footer(&mut self.reader)?;
                let crc = self.verify_crc.then(|| self.member_hasher.clone().finalize());
                verify_footer(&footer, crc, self.member_decoded)?;
                if self.reader.eof() {
                    self.state = ReaderState::Finished;
                } else {
                    self.state = ReaderState::ExpectHeader;
                }
            }
            StreamKind::Zlib => {
                let stored = read_zlib_footer(&mut self.reader)?;
                if self.verify_crc {
                    let computed = self.member_adler.finalize();
                    if stored != computed {
                        return Err(PargzError::ChecksumMismatch { stored, computed });
                    }
                }
                self.state = ReaderState::Finished;
            }
            StreamKind::RawDeflate => {
                self.state = ReaderState::Finished;
            }
        }
        Ok(())
    }

    fn drain_pending(&mut self, out: &mut [u8]) -> usize {
        let available = self.pending.bytes.len() - self.pending_drained;
        let count = available.min(out.len());
        out[..count]
            .copy_from_slice(&self.pending.bytes[self.pending_drained..self.pending_drained + count]);
        self.pending_drained += count;
        self.total_decoded += count as u64;

        // Compact once everything delivered, keeping allocations bounded.
        if self.pending_drained == self.pending.bytes.len() && self.pending_drained > 0 {
            self.pending.bytes.clear();
            self.pending.block_boundaries.clear();
            self.pending.footers.clear();
            self.pending_drained = 0;
        }
        count
    }

    /// Decode everything, discarding output. Returns (decoded size, member
    /// count); CRCs are verified when enabled.
    pub fn drain(&mut self) -> Result<u64> {
        let mut sink = [0u8; 64 * 1024];
        loop {
            let (count, _) = self.read_with_stops(&mut sink, StoppingPoints::NONE)?;
            if count == 0 {
                return Ok(self.total_decoded);
            }
        }
    }
}

/// Per-block report of `--analyze`.
#[derive(Debug, Clone)]
pub struct BlockReport {
    pub member_index: usize,
    pub kind: BlockKind,
    pub final_block: bool,
    pub encoded_offset_bits: u64,
    pub encoded_size_bits: u64,
    pub decoded_size_bytes: u64,
}

/// Walk all blocks of the stream sequentially, collecting per-block
/// geometry. Used by the CLI's `--analyze`.
pub fn analyze(source: Arc<dyn FileReader>, kind: StreamKind) -> Result<Vec<BlockReport>> {
    let mut reader = BitReader::new(Arc::clone(&source));
    let mut reports = Vec::new();
    let mut member_index = 0usize;

    loop {
        match kind {
            StreamKind::Gzip => {
                read_gzip_header(&mut reader)?;
            }
            StreamKind::Zlib => read_zlib_header(&mut reader)?,
            StreamKind::RawDeflate => {}
        }

        let mut decoder = DeflateDecoder::new_with_window(&[]);
        let mut chunk = DecodedChunk::new(reader.tell());
        loop {
            let offset = reader.tell();
            let before = chunk.decoded_len();
            let summary = decoder.decode_block(&mut reader, &mut chunk)?;
            reports.push(BlockReport {
                member_index,
                kind: summary.header.kind,
                final_block: summary.header.final_block,
                encoded_offset_bits: offset,
                encoded_size_bits: reader.tell() - offset,
                decoded_size_bytes: chunk.decoded_len() - before,
            });
            // Bound memory: analysis only needs sizes, not content.
            if chunk.decoded_len() > (32 << 20) {
                chunk.bytes.clear();
            }
            if summary.header.final_block {
                break;
            }
        }

        reader.align_to_byte();
        match kind {
            StreamKind::Gzip => {
                read_gzip_footer(&mut reader)?;
                if reader.eof() {
                    return Ok(reports);
                }
                member_index += 1;
            }
            StreamKind::Zlib => {
                read_zlib_footer(&mut reader)?;
                return Ok(reports);
            }
            StreamKind::RawDeflate => return Ok(reports),
        }
    }
}

/// Find the compressed bit offset of the first deflate block, i.e. the size
/// of the leading header for the wrapper kind.
pub fn first_block_offset(source: &Arc<dyn FileReader>, kind: StreamKind) -> Result<u64> {
    let mut reader = BitReader::new(Arc::clone(source));
    match kind {
        StreamKind::Gzip => {
            read_gzip_header(&mut reader)?;
        }
        StreamKind::Zlib => read_zlib_header(&mut reader)?,
        StreamKind::RawDeflate => {}
    }
    Ok(reader.tell())
}
