use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bitstream::BitReader;
use crate::block_finder::dynamic_huffman::DynamicBlockFinder;
use crate::block_finder::special::PigzBlockFinder;
use crate::block_finder::uncompressed::UncompressedBlockFinder;
use crate::chunk::{BlockBoundary, ChunkFooter, DecodedChunk};
use crate::decompress_deflate::DeflateDecoder;
use crate::decompress_gzip::{
    read_gzip_footer, read_gzip_header, read_zlib_footer, read_zlib_header, StreamKind,
};
use crate::error::{PargzError, Result};
use crate::file_reader::FileReader;

/// How often the decoder retries from the next block-start candidate before
/// giving up on a speculative chunk.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Clone)]
pub struct ChunkDecodeConfig {
    pub stream_kind: StreamKind,
    pub max_attempts: u32,
    /// Hard cap on decoded bytes per chunk.
    pub decoded_budget: u64,
}

impl Default for ChunkDecodeConfig {
    fn default() -> Self {
        Self {
            stream_kind: StreamKind::Gzip,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            decoded_budget: 1 << 31,
        }
    }
}

/// How a chunk decode starts.
pub enum ChunkStart<'a> {
    /// The preceding window is known; `begin_bits` is an exact block
    /// boundary.
    KnownWindow(&'a [u8]),
    /// `begin_bits` is an exact gzip member boundary (bgzf chunks, stream
    /// start): parse the member header, then decode with the empty window.
    MemberBoundary,
    /// `begin_bits` only bounds the search; find a plausible block start and
    /// decode in marker mode.
    Speculative,
}

/// Decompress a bounded byte range, possibly across block and member
/// boundaries. Decoding continues past `end_hint_bits` until a block
/// boundary is reached.
pub fn decode_chunk(
    source: &Arc<dyn FileReader>,
    begin_bits: u64,
    end_hint_bits: u64,
    start: ChunkStart<'_>,
    config: &ChunkDecodeConfig,
    cancel: &AtomicBool,
) -> Result<DecodedChunk> {
    match start {
        ChunkStart::KnownWindow(window) => {
            let mut reader = BitReader::new(Arc::clone(source));
            reader.seek(SeekFrom::Start(begin_bits))?;
            let decoder = DeflateDecoder::new_with_window(window);
            decode_from(reader, decoder, begin_bits, end_hint_bits, false, config, cancel)
        }
        ChunkStart::MemberBoundary => {
            let mut reader = BitReader::new(Arc::clone(source));
            reader.seek(SeekFrom::Start(begin_bits))?;
            let decoder = DeflateDecoder::new_with_window(&[]);
            decode_from(reader, decoder, begin_bits, end_hint_bits, true, config, cancel)
        }
        ChunkStart::Speculative => decode_speculative(source, begin_bits, end_hint_bits, config, cancel),
    }
}

fn decode_speculative(
    source: &Arc<dyn FileReader>,
    begin_bits: u64,
    end_hint_bits: u64,
    config: &ChunkDecodeConfig,
    cancel: &AtomicBool,
) -> Result<DecodedChunk> {
    let mut candidates = CandidateIterator::new(source, begin_bits, end_hint_bits);
    let mut reader = BitReader::new(Arc::clone(source));

    for attempt in 0..config.max_attempts {
        if cancel.load(Ordering::Relaxed) {
            return Err(PargzError::Cancelled);
        }
        let candidate = match candidates.next()? {
            Some(candidate) => candidate,
            None => return Err(PargzError::NoValidBlockFound),
        };

        reader.seek(SeekFrom::Start(candidate))?;
        let decoder = DeflateDecoder::new_with_markers();
        match decode_from(
            reader.clone(),
            decoder,
            candidate,
            end_hint_bits,
            false,
            config,
            cancel,
        ) {
            Ok(mut chunk) => {
                chunk.speculative_attempts = attempt + 1;
                // A sane result decoded something and either crossed the
                // hint or ended cleanly at a stream end.
                if chunk.decoded_len() > 0 || chunk.reached_end_of_stream {
                    return Ok(chunk);
                }
                log::debug!(
                    "candidate at bit {} decoded zero bytes, trying the next one",
                    candidate
                );
            }
            // Anything the data itself could fake is just a wrong candidate;
            // only external conditions and the output cap abort the search.
            Err(error @ PargzError::Cancelled)
            | Err(error @ PargzError::IoError(_))
            | Err(error @ PargzError::ChunkExceededBudget) => return Err(error),
            Err(error) => {
                log::debug!("candidate at bit {} rejected: {}", candidate, error);
            }
        }
    }
    Err(PargzError::NoValidBlockFound)
}

/// Decode blocks from an exact position until the first block boundary at or
/// past the hint, a stream end, or an error.
fn decode_from(
    mut reader: BitReader,
    mut decoder: DeflateDecoder,
    begin_bits: u64,
    end_hint_bits: u64,
    mut at_member_header: bool,
    config: &ChunkDecodeConfig,
    cancel: &AtomicBool,
) -> Result<DecodedChunk> {
    let mut chunk = DecodedChunk::new(begin_bits);
    decoder.set_budget(config.decoded_budget);

    // Decoded size at the start of the current member, when the chunk has
    // seen the member's beginning and can verify its footer size field.
    let mut member_start: Option<u64> = if at_member_header { Some(0) } else { None };

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(PargzError::Cancelled);
        }

        // Both block boundaries and member boundaries are valid stopping
        // points once the hint is crossed.
        if reader.tell() >= end_hint_bits {
            chunk.ends_at_member_boundary = at_member_header;
            break;
        }

        if at_member_header {
            match config.stream_kind {
                StreamKind::Gzip => {
                    read_gzip_header(&mut reader)?;
                }
                StreamKind::Zlib => {
                    read_zlib_header(&mut reader)?;
                }
                StreamKind::RawDeflate => {}
            }
            at_member_header = false;
        }

        let summary = decoder.decode_block(&mut reader, &mut chunk)?;
        chunk.block_boundaries.push(BlockBoundary {
            bit_offset: reader.tell(),
            decoded_size: chunk.decoded_len(),
        });

        if !summary.header.final_block {
            continue;
        }

        // Final block: footer, then either EOF or another member.
        reader.align_to_byte();
        match config.stream_kind {
            StreamKind::Gzip => {
                let footer = read_gzip_footer(&mut reader)?;
                if let Some(start) = member_start {
                    let member_size = chunk.decoded_len() - start;
                    if footer.uncompressed_size_mod32 != member_size as u32 {
                        return Err(PargzError::SizeMismatch {
                            stored: footer.uncompressed_size_mod32,
                            computed: member_size as u32,
                        });
                    }
                }
                chunk.footers.push(ChunkFooter {
                    decoded_size: chunk.decoded_len(),
                    crc32: footer.crc32,
                    uncompressed_size_mod32: footer.uncompressed_size_mod32,
                });
                chunk.block_boundaries.push(BlockBoundary {
                    bit_offset: reader.tell(),
                    decoded_size: chunk.decoded_len(),
                });

                if reader.eof() {
                    chunk.reached_end_of_stream = true;
                    break;
                }
                // Concatenated member follows.
                member_start = Some(chunk.decoded_len());
                at_member_header = true;
            }
            StreamKind::Zlib => {
                let _adler = read_zlib_footer(&mut reader)?;
                chunk.reached_end_of_stream = true;
                break;
            }
            StreamKind::RawDeflate => {
                chunk.reached_end_of_stream = true;
                break;
            }
        }
    }

    chunk.end_bits = reader.tell();
    Ok(chunk)
}

/// Merged candidate stream over the three finder strategies. Pigz flush
/// markers are guaranteed boundaries and win ties; otherwise the smallest
/// next offset is taken.
struct CandidateIterator {
    dynamic: DynamicBlockFinder,
    uncompressed: UncompressedBlockFinder,
    pigz: PigzBlockFinder,
    pending_dynamic: Option<u64>,
    pending_uncompressed: Option<u64>,
    pending_pigz: Option<u64>,
    primed: bool,
}

impl CandidateIterator {
    fn new(source: &Arc<dyn FileReader>, begin_bits: u64, until_bits: u64) -> Self {
        Self {
            dynamic: DynamicBlockFinder::new(BitReader::new(Arc::clone(source)), begin_bits, until_bits)
                .unwrap_or_else(|_| {
                    DynamicBlockFinder::new(BitReader::new(Arc::clone(source)), 0, 0)
                        .expect("empty finder construction cannot fail")
                }),
            uncompressed: UncompressedBlockFinder::new(
                BitReader::new(Arc::clone(source)),
                begin_bits,
                until_bits,
            ),
            pigz: PigzBlockFinder::new(BitReader::new(Arc::clone(source)), begin_bits, until_bits),
            pending_dynamic: None,
            pending_uncompressed: None,
            pending_pigz: None,
            primed: false,
        }
    }

    fn next(&mut self) -> Result<Option<u64>> {
        if !self.primed {
            self.primed = true;
            self.pending_dynamic = self.dynamic.find_next()?;
            self.pending_uncompressed = self
                .uncompressed
                .find_next()?
                .map(|(_, start_hi)| start_hi);
            self.pending_pigz = self.pigz.find_next()?;
        }

        let smallest = [
            self.pending_pigz,
            self.pending_dynamic,
            self.pending_uncompressed,
        ]
        .into_iter()
        .flatten()
        .min();
        let smallest = match smallest {
            Some(offset) => offset,
            None => return Ok(None),
        };

        // Pigz markers at the same offset shadow the other strategies.
        if self.pending_pigz == Some(smallest) {
            self.pending_pigz = self.pigz.find_next()?;
        }
        if self.pending_dynamic == Some(smallest) {
            self.pending_dynamic = self.dynamic.find_next()?;
        }
        if self.pending_uncompressed == Some(smallest) {
            self.pending_uncompressed = self
                .uncompressed
                .find_next()?
                .map(|(_, start_hi)| start_hi);
        }
        Ok(Some(smallest))
    }
}
