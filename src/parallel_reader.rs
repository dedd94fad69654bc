use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::block_finder::{BlockFinder, ChunkPartitioner};
use crate::block_map::{BlockInfo, BlockMap};
use crate::cache::ChunkCache;
use crate::chunk::DecodedChunk;
use crate::chunk_decoder::{decode_chunk, ChunkDecodeConfig, ChunkStart};
use crate::crc32::CrcAccumulator;
use crate::decompress_gzip::{detect_stream_kind, StreamKind};
use crate::error::{PargzError, Result};
use crate::file_reader::{open_file, FileReader, IoReadMethod};
use crate::gzip_reader::first_block_offset;
use crate::index::{Checkpoint, GzipIndex, NewlineFormat};
use crate::prefetcher::FetchMultiStream;
use crate::streamed_results::GetOutcome;
use crate::thread_pool::{TaskResult, ThreadPool};
use crate::window::{Window, WindowCompression, WindowMap};

/// Reader configuration; `Default` matches the CLI defaults.
#[derive(Clone)]
pub struct Config {
    /// Worker threads; 0 selects the available hardware parallelism.
    pub parallelism: usize,
    /// Compressed bytes per scheduling unit.
    pub chunk_size: usize,
    pub verify_crc: bool,
    /// Defaults to 16 + parallelism.
    pub cache_capacity: Option<usize>,
    pub io_read_method: IoReadMethod,
    /// Safety cap on one chunk's decoded bytes.
    pub max_decompressed_chunk_size: u64,
    /// Count newlines per chunk, for line-aware indexes and `--count-lines`.
    pub track_line_offsets: bool,
    /// Wrapper format; `None` sniffs gzip vs. zlib from the first bytes.
    pub stream_kind: Option<StreamKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallelism: 0,
            chunk_size: 4 << 20,
            verify_crc: true,
            cache_capacity: None,
            io_read_method: IoReadMethod::default(),
            max_decompressed_chunk_size: 1 << 31,
            track_line_offsets: false,
            stream_kind: None,
        }
    }
}

/// Introspection counters, printed by the CLI in verbose mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReaderStatistics {
    pub chunks_stitched: u64,
    pub sequential_fallbacks: u64,
    pub speculative_attempts: u64,
    pub prefetches_issued: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
}

struct PendingTask {
    task: TaskResult<Result<DecodedChunk>>,
    offset: u64,
    /// Errors from speculative starts fall back to sequential decoding;
    /// errors from known-window starts are fatal.
    speculative: bool,
}

struct StitchState {
    next_index: usize,
    /// Trailing 32 KiB window after the last stitched chunk.
    window: Vec<u8>,
    decoded_offset: u64,
    /// Exact bit offset where the next chunk must begin.
    expected_begin: Option<u64>,
    member_crc: CrcAccumulator,
    lines: u64,
    finished: bool,
}

/// Seekable byte stream over the decompressed data, decoded by a pool of
/// workers on speculative chunk boundaries and stitched back in order.
pub struct ParallelGzipReader {
    source: Arc<dyn FileReader>,
    config: Config,
    stream_kind: StreamKind,
    decode_config: ChunkDecodeConfig,
    first_block_offset: u64,

    pool: ThreadPool,
    cancel: Arc<AtomicBool>,
    chunk_finder: BlockFinder,
    cache: ChunkCache,
    prefetcher: FetchMultiStream,
    window_map: WindowMap,
    block_map: BlockMap,
    /// Cache key of the chunk backing each block-map entry.
    block_chunks: Vec<usize>,
    /// Cumulative newline count at each block-map entry.
    block_lines: Vec<u64>,
    pending: HashMap<usize, PendingTask>,
    bgzf_boundaries: bool,
    /// Bit offsets known to be gzip member boundaries (a header follows).
    member_boundaries: std::collections::HashSet<u64>,

    stitch: StitchState,
    position: u64,
    size: Option<u64>,
    /// Fatal error observed while draining prefetched tasks, surfaced at the
    /// next caller-facing operation.
    deferred_error: Option<PargzError>,
    statistics: ReaderStatistics,
    crc_enabled: bool,
    /// Member verification is impossible for data skipped via an imported
    /// index; accounting restarts at the next member boundary.
    crc_in_sync: bool,
}

impl ParallelGzipReader {
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let source = open_file(path, config.io_read_method)?;
        Self::new(source, config)
    }

    pub fn new(source: Arc<dyn FileReader>, config: Config) -> Result<Self> {
        let stream_kind = match config.stream_kind {
            Some(kind) => kind,
            None => {
                let mut first = [0u8; 2];
                let got = source.read_at(0, &mut first)?;
                detect_stream_kind(&first[..got])
            }
        };
        let first_offset = first_block_offset(&source, stream_kind)?;

        let parallelism = if config.parallelism == 0 {
            ThreadPool::hardware_concurrency()
        } else {
            config.parallelism
        };
        let cache_capacity = config.cache_capacity.unwrap_or(16 + parallelism);

        let partitioner = ChunkPartitioner::new(&source, first_offset, config.chunk_size);
        let bgzf_boundaries =
            crate::block_finder::special::BgzfBlockFinder::looks_like_bgzf(
                crate::bitstream::BitReader::new(Arc::clone(&source)),
            );

        let decode_config = ChunkDecodeConfig {
            stream_kind,
            max_attempts: crate::chunk_decoder::DEFAULT_MAX_ATTEMPTS,
            decoded_budget: config.max_decompressed_chunk_size,
        };

        let window_map = WindowMap::new();
        window_map.put(
            first_offset,
            Arc::new(Window::new(&[], WindowCompression::Raw)),
        );

        let verify_crc = config.verify_crc;
        Ok(Self {
            source,
            stream_kind,
            decode_config,
            first_block_offset: first_offset,
            pool: ThreadPool::new(parallelism),
            cancel: Arc::new(AtomicBool::new(false)),
            chunk_finder: BlockFinder::new(Box::new(partitioner)),
            cache: ChunkCache::new(cache_capacity),
            prefetcher: FetchMultiStream::new(),
            window_map,
            block_map: BlockMap::new(),
            block_chunks: Vec::new(),
            block_lines: Vec::new(),
            pending: HashMap::new(),
            bgzf_boundaries,
            member_boundaries: std::collections::HashSet::new(),
            stitch: StitchState {
                next_index: 0,
                window: Vec::new(),
                decoded_offset: 0,
                expected_begin: None,
                member_crc: CrcAccumulator::new(),
                lines: 0,
                finished: false,
            },
            position: 0,
            size: None,
            deferred_error: None,
            statistics: ReaderStatistics::default(),
            crc_enabled: verify_crc,
            crc_in_sync: true,
            config: Config {
                parallelism,
                cache_capacity: Some(cache_capacity),
                ..config
            },
        })
    }

    pub fn set_crc32_enabled(&mut self, enabled: bool) {
        self.crc_enabled = enabled;
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        // Only effective before the first chunk is scheduled.
        if self.stitch.next_index == 0 && self.pending.is_empty() {
            self.config.chunk_size = chunk_size;
            self.chunk_finder = BlockFinder::new(Box::new(ChunkPartitioner::new(
                &self.source,
                self.first_block_offset,
                chunk_size,
            )));
        }
    }

    /// Decoded size; known after the first complete pass or an index import.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Total newlines; tracked when `track_line_offsets` is enabled and the
    /// whole stream has been stitched.
    pub fn line_count(&self) -> Option<u64> {
        (self.config.track_line_offsets && self.stitch.finished).then_some(self.stitch.lines)
    }

    pub fn statistics(&self) -> ReaderStatistics {
        let mut statistics = self.statistics;
        let (hits, misses, evictions) = self.cache.statistics().snapshot();
        statistics.cache_hits = hits;
        statistics.cache_misses = misses;
        statistics.cache_evictions = evictions;
        statistics
    }

    /// (encoded bit offset, decoded byte offset) pairs of all known chunk
    /// boundaries.
    pub fn block_offsets(&self) -> Vec<(u64, u64)> {
        self.block_map.block_offsets()
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => {
                let size = match self.size {
                    Some(size) => size,
                    None => {
                        self.run_to_end()?;
                        self.size.expect("size known after full pass")
                    }
                };
                size as i128 + delta as i128
            }
        };
        if target < 0 {
            return Err(PargzError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            )));
        }
        self.position = target as u64;
        Ok(self.position)
    }

    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if let Some(error) = self.deferred_error.take() {
            return Err(error);
        }
        let mut written = 0;
        while written < out.len() {
            // Stitch forward until the read position is covered.
            while !self.stitch.finished && self.position >= self.stitch.decoded_offset {
                self.stitch_next()?;
            }
            if self.position >= self.stitch.decoded_offset {
                break; // end of stream
            }

            let info = self
                .block_map
                .find_data_offset(self.position)
                .expect("stitched region must be mapped");
            let chunk = self.chunk_for_block(&info)?;

            let offset_in_chunk = (self.position - info.decoded_offset_bytes) as usize;
            let available = chunk.bytes.len().saturating_sub(offset_in_chunk);
            if available == 0 {
                // Zero-size entry (stream boundary); skip forward.
                self.position = info.decoded_offset_bytes + info.decoded_size_bytes.max(1);
                continue;
            }
            let count = available.min(out.len() - written);
            out[written..written + count]
                .copy_from_slice(&chunk.bytes[offset_in_chunk..offset_in_chunk + count]);
            written += count;
            self.position += count as u64;
        }
        Ok(written)
    }

    /// Decode and stitch the remaining stream without moving the read
    /// position; afterwards `size()` is known and the index is complete.
    pub fn run_to_end(&mut self) -> Result<()> {
        while !self.stitch.finished {
            self.stitch_next()?;
        }
        Ok(())
    }

    /* ---------------- scheduling ---------------- */

    /// Partition offset of chunk `index`. Blocks briefly while the finder
    /// thread catches up; `None` once the partitioner ran off the stream end.
    fn chunk_region(&self, index: usize) -> Option<u64> {
        match self.chunk_finder.get(index, Some(Duration::from_secs(5))) {
            GetOutcome::Found(offset) => Some(offset),
            GetOutcome::OutOfRange => None,
            // Treat a stuck finder as end-of-partitions; decoding falls back
            // to unbounded hints which are always correct.
            GetOutcome::Timeout => None,
        }
    }

    fn schedule(&mut self, index: usize, offset: u64) {
        if self.pending.contains_key(&index) || self.cache.contains(index) {
            return;
        }

        let end_hint = self
            .chunk_region(index + 1)
            .unwrap_or(u64::MAX)
            .max(offset + 1);

        let source = Arc::clone(&self.source);
        let cancel = Arc::clone(&self.cancel);
        let decode_config = self.decode_config.clone();
        let window = self.window_map.get(offset);
        let member_start = self.bgzf_boundaries || self.member_boundaries.contains(&offset);
        let speculative = !member_start && window.is_none();

        let task = self.pool.submit(move || {
            if member_start {
                return decode_chunk(
                    &source,
                    offset,
                    end_hint,
                    ChunkStart::MemberBoundary,
                    &decode_config,
                    &cancel,
                );
            }
            match &window {
                Some(window) => {
                    // Known window: exact block boundary start.
                    let bytes = window.decompress()?;
                    decode_chunk(
                        &source,
                        offset,
                        end_hint,
                        ChunkStart::KnownWindow(&bytes),
                        &decode_config,
                        &cancel,
                    )
                }
                None => decode_chunk(
                    &source,
                    offset,
                    end_hint,
                    ChunkStart::Speculative,
                    &decode_config,
                    &cancel,
                ),
            }
        });
        self.pending.insert(
            index,
            PendingTask {
                task,
                offset,
                speculative,
            },
        );
    }

    fn drain_finished_tasks(&mut self) {
        let ready: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.task.is_ready())
            .map(|(&index, _)| index)
            .collect();
        for index in ready {
            if let Some(pending) = self.pending.remove(&index) {
                match pending.task.wait() {
                    Ok(chunk) => {
                        self.statistics.speculative_attempts += chunk.speculative_attempts as u64;
                        self.cache.insert(index, Arc::new(chunk));
                    }
                    Err(error) if pending.speculative => {
                        // Cached as empty; the stitcher's sequential
                        // fallback recovers when the chunk is consumed.
                        log::debug!("prefetched chunk {} failed: {}", index, error);
                        self.cache
                            .insert(index, Arc::new(DecodedChunk::new(pending.offset)));
                    }
                    Err(error) => {
                        if self.deferred_error.is_none() {
                            self.deferred_error = Some(error);
                        }
                    }
                }
            }
        }
    }

    fn issue_prefetches(&mut self) {
        self.drain_finished_tasks();
        let max_ahead = self.config.parallelism * 2;
        let predictions = self.prefetcher.prefetch(max_ahead);
        for index in predictions {
            if self.cache.contains(index) || self.pending.contains_key(&index) {
                continue;
            }
            match self.chunk_region(index) {
                Some(offset) => {
                    self.statistics.prefetches_issued += 1;
                    self.schedule(index, offset);
                }
                None => break,
            }
        }
    }

    /// Chunk for `index`: cached, pending, or scheduled on demand. `None`
    /// when the stream has no such chunk.
    fn obtain_chunk(&mut self, index: usize) -> Result<Option<Arc<DecodedChunk>>> {
        self.prefetcher.fetch(index);

        if let Some(chunk) = self.cache.get(index) {
            self.issue_prefetches();
            return Ok(Some(chunk));
        }

        let offset = match self.chunk_finder.get(index, None) {
            GetOutcome::Found(offset) => offset,
            GetOutcome::OutOfRange => return Ok(None),
            GetOutcome::Timeout => unreachable!("untimed get cannot time out"),
        };

        self.schedule(index, offset);
        self.issue_prefetches();

        // The prefetch drain above may already have moved the finished task
        // into the cache.
        let pending = match self.pending.remove(&index) {
            Some(pending) => pending,
            None => {
                if let Some(error) = self.deferred_error.take() {
                    return Err(error);
                }
                return Ok(Some(
                    self.cache
                        .get(index)
                        .expect("drained chunk must be cached"),
                ));
            }
        };
        match pending.task.wait() {
            Ok(chunk) => {
                self.statistics.speculative_attempts += chunk.speculative_attempts as u64;
                let chunk = Arc::new(chunk);
                self.cache.insert(index, Arc::clone(&chunk));
                Ok(Some(chunk))
            }
            Err(PargzError::Cancelled) => Err(PargzError::Cancelled),
            Err(error) if pending.speculative => {
                log::debug!("chunk {} speculative decode failed: {}", index, error);
                Ok(Some(Arc::new(DecodedChunk::new(offset)))) // empty, begin == end
            }
            // Known-window decodes failing is real corruption.
            Err(error) => Err(error),
        }
    }

    /* ---------------- stitching ---------------- */

    /// Consume the next chunk in index order: resolve its markers with the
    /// running window, verify member footers, publish its trailing window
    /// and extend the block map. The cascade that turns speculative chunks
    /// real is exactly this loop walking left to right.
    fn stitch_next(&mut self) -> Result<()> {
        if self.stitch.finished {
            return Ok(());
        }
        let index = self.stitch.next_index;
        let obtained = self.obtain_chunk(index)?;

        let chunk = match obtained {
            None => {
                // The partitioner ran out of offsets. Normally the previous
                // chunk already consumed the stream end; if not (e.g. no
                // chunk start was findable), decode the remainder
                // sequentially from the known position.
                match self.stitch.expected_begin {
                    Some(expected) if expected < self.source.size() * 8 => {
                        self.statistics.sequential_fallbacks += 1;
                        let chunk = self.decode_at_known(expected, u64::MAX)?;
                        let chunk = Arc::new(chunk);
                        self.cache.insert(index, Arc::clone(&chunk));
                        chunk
                    }
                    _ => {
                        self.finish_stream();
                        return Ok(());
                    }
                }
            }
            Some(chunk) => chunk,
        };

        let chunk = self.reconcile(index, chunk)?;

        // Resolve markers against the stitched window; replace the cache
        // entry so later readers see the resolved payload.
        let chunk = if chunk.is_resolved() {
            chunk
        } else {
            let mut owned: DecodedChunk = (*chunk).clone();
            let mut window = vec![0u8; crate::deflate_constants::DEFLATE_WINDOW_SIZE];
            let have = self.stitch.window.len().min(window.len());
            let window_len = window.len();
            window[window_len - have..]
                .copy_from_slice(&self.stitch.window[self.stitch.window.len() - have..]);
            owned.resolve(&window)?;
            let resolved = Arc::new(owned);
            self.cache.insert(index, Arc::clone(&resolved));
            resolved
        };

        self.account_chunk(&chunk)?;

        // Publish the window at the chunk's end for the right neighbor and
        // for O(1) re-decodes after cache eviction.
        let trailing = chunk.trailing_window(&self.stitch.window);
        self.window_map.put(
            chunk.end_bits,
            Arc::new(Window::new(&trailing, WindowCompression::Raw)),
        );

        // Extend the chunk-boundary map.
        let entries_before = self.block_map.len();
        self.block_map.push(
            chunk.begin_bits,
            chunk.end_bits - chunk.begin_bits,
            chunk.decoded_len(),
        );
        if self.block_map.len() > entries_before {
            self.block_chunks.push(index);
            self.block_lines.push(self.stitch.lines);
        } else if chunk.decoded_len() > 0 {
            if let Some(last) = self.block_chunks.last_mut() {
                *last = index;
            }
        }

        if self.config.track_line_offsets {
            self.stitch.lines += chunk.bytes.iter().filter(|&&b| b == b'\n').count() as u64;
        }

        self.stitch.window = trailing;
        self.stitch.decoded_offset += chunk.decoded_len();
        self.stitch.expected_begin = Some(chunk.end_bits);
        self.stitch.next_index += 1;
        self.statistics.chunks_stitched += 1;

        if chunk.ends_at_member_boundary {
            self.member_boundaries.insert(chunk.end_bits);
        }
        if chunk.reached_end_of_stream {
            self.finish_stream();
        }
        Ok(())
    }

    /// Decode from an exact offset whose window (or member-boundary nature)
    /// is known from stitching.
    fn decode_at_known(&self, begin: u64, end_hint: u64) -> Result<DecodedChunk> {
        let start = if self.bgzf_boundaries || self.member_boundaries.contains(&begin) {
            ChunkStart::MemberBoundary
        } else {
            ChunkStart::KnownWindow(&self.stitch.window)
        };
        decode_chunk(
            &self.source,
            begin,
            end_hint,
            start,
            &self.decode_config,
            &self.cancel,
        )
    }

    /// Make the chunk line up with the previous chunk's real end offset,
    /// re-decoding from the known window when the speculative start was
    /// wrong, and shrinking to nothing when the previous chunk already
    /// consumed this region.
    fn reconcile(&mut self, index: usize, chunk: Arc<DecodedChunk>) -> Result<Arc<DecodedChunk>> {
        let expected = match self.stitch.expected_begin {
            None => return Ok(chunk), // first chunk starts at a known offset
            Some(expected) => expected,
        };

        if chunk.begin_bits == expected {
            return Ok(chunk);
        }
        if expected >= chunk.end_bits {
            // Fully consumed by the left neighbor.
            let empty = Arc::new(DecodedChunk::new(expected));
            self.cache.insert(index, Arc::clone(&empty));
            return Ok(empty);
        }

        // The speculative start disagrees with the observed consumption:
        // decode again from the exact offset with the known window.
        self.statistics.sequential_fallbacks += 1;
        log::debug!(
            "chunk {} speculative start {} != expected {}, re-decoding",
            index,
            chunk.begin_bits,
            expected
        );
        let end_hint = self
            .chunk_region(index + 1)
            .unwrap_or(u64::MAX)
            .max(expected + 1);
        let redecoded = Arc::new(self.decode_at_known(expected, end_hint)?);
        self.cache.insert(index, Arc::clone(&redecoded));
        Ok(redecoded)
    }

    /// CRC accounting in strict chunk order: per-chunk segment CRCs are
    /// combined into the running member CRC and compared at each footer.
    fn account_chunk(&mut self, chunk: &DecodedChunk) -> Result<()> {
        if !self.crc_enabled {
            return Ok(());
        }
        let mut segment_start = 0usize;
        for footer in &chunk.footers {
            let segment = &chunk.bytes[segment_start..footer.decoded_size as usize];
            self.stitch
                .member_crc
                .append(crc32fast::hash(segment), segment.len() as u64);
            if self.crc_in_sync {
                if self.stitch.member_crc.crc() != footer.crc32 {
                    return Err(PargzError::ChecksumMismatch {
                        stored: footer.crc32,
                        computed: self.stitch.member_crc.crc(),
                    });
                }
            }
            self.stitch.member_crc.reset();
            self.crc_in_sync = true;
            segment_start = footer.decoded_size as usize;
        }
        let tail = &chunk.bytes[segment_start..];
        if !tail.is_empty() {
            self.stitch
                .member_crc
                .append(crc32fast::hash(tail), tail.len() as u64);
        }
        Ok(())
    }

    fn finish_stream(&mut self) {
        self.stitch.finished = true;
        self.block_map.finalize();
        self.chunk_finder.finalize(Some(self.stitch.next_index));
        self.size = Some(self.stitch.decoded_offset);
        // The sentinel entry needs a chunk mapping too.
        if self.block_chunks.len() < self.block_map.len() {
            self.block_chunks.push(self.stitch.next_index.saturating_sub(1));
            self.block_lines.push(self.stitch.lines);
        }
    }

    /// Chunk payload for an already-stitched block, re-decoding with the
    /// stored window when the cache evicted it.
    fn chunk_for_block(&mut self, info: &BlockInfo) -> Result<Arc<DecodedChunk>> {
        let index = self.block_chunks[info.block_index];
        self.prefetcher.fetch(index);
        if let Some(chunk) = self.cache.get(index) {
            self.issue_prefetches();
            return Ok(chunk);
        }
        self.issue_prefetches();

        let window = self
            .window_map
            .get(info.encoded_offset_bits)
            .ok_or(PargzError::IndexStreamMismatch)?;
        let bytes = window.decompress()?;
        let start = if self.bgzf_boundaries
            || self.member_boundaries.contains(&info.encoded_offset_bits)
        {
            ChunkStart::MemberBoundary
        } else {
            ChunkStart::KnownWindow(&bytes)
        };
        let chunk = decode_chunk(
            &self.source,
            info.encoded_offset_bits,
            info.encoded_offset_bits + info.encoded_size_bits,
            start,
            &self.decode_config,
            &self.cancel,
        )?;
        let chunk = Arc::new(chunk);
        self.cache.insert(index, Arc::clone(&chunk));
        Ok(chunk)
    }

    /* ---------------- index import/export ---------------- */

    /// Load a seekpoint table, enabling O(1) seeks without a first pass.
    pub fn import_index(&mut self, index: GzipIndex) -> Result<()> {
        index.validate()?;
        if index.compressed_size_bytes != 0
            && index.compressed_size_bytes != self.source.size()
        {
            return Err(PargzError::IndexStreamMismatch);
        }
        if index.checkpoints.is_empty() {
            return Err(PargzError::IndexFormatInvalid("no checkpoints"));
        }

        self.cache.clear();
        self.pending.clear();
        self.window_map.clear();
        self.block_chunks.clear();
        self.block_lines.clear();

        let mut offsets = Vec::with_capacity(index.checkpoints.len());
        for (i, checkpoint) in index.checkpoints.iter().enumerate() {
            offsets.push((
                checkpoint.compressed_offset_bits,
                checkpoint.uncompressed_offset_bytes,
            ));
            self.block_chunks.push(i);
            self.block_lines.push(checkpoint.line_offset.unwrap_or(0));
            let window = match &checkpoint.window {
                Some(window) => Arc::clone(window),
                None => {
                    // Windowless checkpoints (other than the first block of
                    // the stream) sit on member boundaries.
                    if i != 0 || checkpoint.compressed_offset_bits != self.first_block_offset {
                        self.member_boundaries
                            .insert(checkpoint.compressed_offset_bits);
                    }
                    Arc::new(Window::new(&[], WindowCompression::Raw))
                }
            };
            self.window_map.put(checkpoint.compressed_offset_bits, window);
        }

        let last = index.checkpoints.last().unwrap();
        self.block_map.set_block_offsets(offsets.clone());
        self.chunk_finder
            .set_block_offsets(offsets.iter().take(offsets.len() - 1).map(|&(o, _)| o).collect());

        self.stitch.finished = true;
        self.stitch.decoded_offset = last.uncompressed_offset_bytes;
        self.stitch.expected_begin = Some(last.compressed_offset_bits);
        self.stitch.next_index = index.checkpoints.len() - 1;
        self.size = Some(last.uncompressed_offset_bytes);
        // Member CRCs cannot be reconstructed for skipped regions.
        self.crc_in_sync = false;
        if index.has_line_offsets {
            self.stitch.lines = last.line_offset.unwrap_or(0);
        }
        Ok(())
    }

    /// Snapshot the seekpoint table. Runs the stream to its end first so the
    /// index is complete.
    pub fn export_index(&mut self) -> Result<GzipIndex> {
        self.run_to_end()?;

        let offsets = self.block_map.block_offsets();
        let mut checkpoints = Vec::with_capacity(offsets.len());
        for (i, &(encoded_bits, decoded_bytes)) in offsets.iter().enumerate() {
            // Member boundaries carry no window, following the gztool
            // convention for stream-boundary seekpoints.
            let window = if self.member_boundaries.contains(&encoded_bits) {
                None
            } else {
                self.window_map
                    .get(encoded_bits)
                    .and_then(|window| (window.decompressed_size() > 0).then_some(window))
            };
            checkpoints.push(Checkpoint {
                compressed_offset_bits: encoded_bits,
                uncompressed_offset_bytes: decoded_bytes,
                line_offset: self
                    .config
                    .track_line_offsets
                    .then(|| self.block_lines.get(i).copied().unwrap_or(self.stitch.lines)),
                window,
            });
        }

        Ok(GzipIndex {
            compressed_size_bytes: self.source.size(),
            uncompressed_size_bytes: self.size.unwrap_or(0),
            checkpoint_spacing: self.config.chunk_size as u64,
            window_size: crate::deflate_constants::DEFLATE_WINDOW_SIZE as u64,
            has_line_offsets: self.config.track_line_offsets,
            newline_format: NewlineFormat::LineFeed,
            checkpoints,
        })
    }

    pub fn stream_kind(&self) -> StreamKind {
        self.stream_kind
    }

    /// Position the reader at the first byte of line `line` (0-based).
    /// Needs line tracking or an imported line-aware index; the per-chunk
    /// line table narrows the scan to one chunk.
    pub fn seek_to_line(&mut self, line: u64) -> Result<u64> {
        if !self.config.track_line_offsets {
            return Err(PargzError::IndexFormatInvalid(
                "line offsets not tracked; enable line tracking or import a line-aware index",
            ));
        }
        self.run_to_end()?;
        if line == 0 {
            self.position = 0;
            return Ok(0);
        }

        // Last block starting strictly before the target newline; the
        // newline ending line `line - 1` is at or after its start.
        let block = match self.block_lines.binary_search(&line) {
            Ok(mut found) => {
                while found > 0 && self.block_lines[found - 1] == line {
                    found -= 1;
                }
                found.saturating_sub(1)
            }
            Err(insertion) => insertion.saturating_sub(1),
        };
        let info = self
            .block_map
            .block_info(block)
            .ok_or(PargzError::IndexFormatInvalid("line table out of range"))?;

        let mut remaining = line - self.block_lines[block];
        self.position = info.decoded_offset_bytes;
        let mut buffer = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let count = self.read(&mut buffer)?;
            if count == 0 {
                break; // fewer lines than requested: park at EOF
            }
            let mut consumed = 0usize;
            for (i, &byte) in buffer[..count].iter().enumerate() {
                if byte == b'\n' {
                    remaining -= 1;
                    if remaining == 0 {
                        consumed = i + 1;
                        break;
                    }
                }
            }
            if remaining > 0 {
                continue;
            }
            // Rewind the overshoot within this buffer.
            self.position = self.position - count as u64 + consumed as u64;
        }
        Ok(self.position)
    }
}

impl Drop for ParallelGzipReader {
    fn drop(&mut self) {
        // Cancellation first: in-flight tasks observe the flag at the next
        // block boundary; the pool join below then cannot hang.
        self.cancel.store(true, Ordering::SeqCst);
        self.chunk_finder.finalize(None);
        self.pool.stop();
    }
}
