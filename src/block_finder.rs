pub mod dynamic_huffman;
pub mod special;
pub mod uncompressed;

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bitstream::BitReader;
use crate::file_reader::FileReader;
use crate::streamed_results::{GetOutcome, StreamedResults};
use crate::thread_pool::ThreadPool;

/// A synchronous source of monotonically increasing block offsets (bits).
pub trait RawBlockFinder: Send + 'static {
    fn find_next(&mut self) -> Option<u64>;
}

struct FinderControl {
    state: Mutex<ControlState>,
    changed: Condvar,
}

struct ControlState {
    highest_requested: usize,
    cancelled: bool,
    started: bool,
}

/// Future-like wrapper running a [`RawBlockFinder`] on a background thread.
///
/// Results stream into an append-only database; consumers block on
/// `get(index, timeout)`. The finder thread only runs ahead of the highest
/// requested index by a bounded prefetch distance so that it cannot starve
/// the decoding threads of CPU.
pub struct BlockFinder {
    results: Arc<StreamedResults<u64>>,
    control: Arc<FinderControl>,
    raw: Mutex<Option<Box<dyn RawBlockFinder>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    prefetch_distance: usize,
}

impl BlockFinder {
    pub fn new(raw: Box<dyn RawBlockFinder>) -> Self {
        Self {
            results: Arc::new(StreamedResults::new()),
            control: Arc::new(FinderControl {
                state: Mutex::new(ControlState {
                    highest_requested: 0,
                    cancelled: false,
                    started: false,
                }),
                changed: Condvar::new(),
            }),
            raw: Mutex::new(Some(raw)),
            thread: Mutex::new(None),
            prefetch_distance: 3 * ThreadPool::hardware_concurrency(),
        }
    }

    /// Prefilled, finalized finder (index import path).
    pub fn from_offsets(offsets: Vec<u64>) -> Self {
        let finder = Self::new(Box::new(EmptyFinder));
        finder.results.set_results(offsets);
        finder
    }

    fn start_thread(&self) {
        let mut state = self.control.state.lock().unwrap();
        if state.started {
            return;
        }
        state.started = true;
        drop(state);

        let raw = self.raw.lock().unwrap().take();
        let raw = match raw {
            Some(raw) => raw,
            None => return,
        };
        let results = Arc::clone(&self.results);
        let control = Arc::clone(&self.control);
        let prefetch_distance = self.prefetch_distance;
        let handle = std::thread::Builder::new()
            .name("pargz-block-finder".into())
            .spawn(move || finder_main(raw, &results, &control, prefetch_distance))
            .expect("failed to spawn block finder thread");
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn finalized(&self) -> bool {
        self.results.finalized()
    }

    /// Block offset for `index`. Tracks the request so the background loop
    /// looks far enough ahead. With no timeout this blocks until the offset
    /// exists or the stream ran out of blocks.
    pub fn get(&self, index: usize, timeout: Option<Duration>) -> GetOutcome<u64> {
        if !self.results.finalized() {
            self.start_thread();
        }
        {
            let mut state = self.control.state.lock().unwrap();
            state.highest_requested = state.highest_requested.max(index);
            self.control.changed.notify_all();
        }
        self.results.get(index, timeout)
    }

    /// Index of the block at exactly `offset_bits` among the found blocks.
    pub fn find(&self, offset_bits: u64) -> Option<usize> {
        let offsets = self.results.snapshot();
        offsets.binary_search(&offset_bits).ok()
    }

    /// Stop the finder and keep only the first `keep_count` results.
    pub fn finalize(&self, keep_count: Option<usize>) {
        self.stop_thread();
        self.results.finalize(keep_count);
    }

    pub fn set_block_offsets(&self, offsets: Vec<u64>) {
        self.stop_thread();
        self.results.set_results(offsets);
    }

    pub fn block_offsets(&self) -> Vec<u64> {
        self.results.snapshot()
    }

    fn stop_thread(&self) {
        {
            let mut state = self.control.state.lock().unwrap();
            state.cancelled = true;
            self.control.changed.notify_all();
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BlockFinder {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn finder_main(
    mut raw: Box<dyn RawBlockFinder>,
    results: &StreamedResults<u64>,
    control: &FinderControl,
    prefetch_distance: usize,
) {
    loop {
        {
            let mut state = control.state.lock().unwrap();
            loop {
                if state.cancelled {
                    results.finalize(None);
                    return;
                }
                if results.len() <= state.highest_requested + prefetch_distance {
                    break;
                }
                state = control.changed.wait(state).unwrap();
            }
        }

        // The actual search runs without any lock held; it is the
        // compute-intensive part.
        match raw.find_next() {
            Some(offset) => results.push(offset),
            None => break,
        }
    }
    results.finalize(None);
}

struct EmptyFinder;

impl RawBlockFinder for EmptyFinder {
    fn find_next(&mut self) -> Option<u64> {
        None
    }
}

/// Chunk-spacing partitioner: the raw finder feeding the parallel reader.
///
/// For ordinary gzip it emits the first deflate block offset followed by
/// fixed-spacing guesses, which the chunk decoder refines speculatively.
/// For bgzf it snaps every offset to a real member boundary, so chunks start
/// at guaranteed block starts with a known (empty) window.
pub struct ChunkPartitioner {
    total_bits: u64,
    spacing_bits: u64,
    next_offset: u64,
    bgzf: Option<special::BgzfBlockFinder>,
    done: bool,
}

impl ChunkPartitioner {
    pub fn new(
        source: &Arc<dyn FileReader>,
        first_block_offset_bits: u64,
        spacing_bytes: usize,
    ) -> Self {
        let total_bits = source.size() * 8;
        let reader = BitReader::new(Arc::clone(source));
        let bgzf = if special::BgzfBlockFinder::looks_like_bgzf(reader.clone()) {
            Some(special::BgzfBlockFinder::new(reader, 0, total_bits))
        } else {
            None
        };
        Self {
            total_bits,
            spacing_bits: (spacing_bytes as u64) * 8,
            // Bgzf chunks snap to member boundaries, starting at the very
            // first member; everything else starts at the first block.
            next_offset: if bgzf.is_some() {
                0
            } else {
                first_block_offset_bits
            },
            bgzf,
            done: false,
        }
    }
}

impl RawBlockFinder for ChunkPartitioner {
    fn find_next(&mut self) -> Option<u64> {
        if self.done {
            return None;
        }

        if let Some(bgzf) = &mut self.bgzf {
            // Skip members until the spacing is covered.
            while let Ok(Some(offset)) = bgzf.find_next() {
                if offset >= self.next_offset {
                    self.next_offset = offset + self.spacing_bits.max(1);
                    return Some(offset);
                }
            }
            self.done = true;
            return None;
        }

        if self.next_offset >= self.total_bits {
            self.done = true;
            return None;
        }
        let offset = self.next_offset;
        // Subsequent guesses land on spacing multiples.
        let next = (offset / self.spacing_bits + 1) * self.spacing_bits;
        self.next_offset = next;
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MemoryFileReader;
    use crate::testing;

    struct CountingFinder {
        offsets: Vec<u64>,
        cursor: usize,
    }

    impl RawBlockFinder for CountingFinder {
        fn find_next(&mut self) -> Option<u64> {
            let value = self.offsets.get(self.cursor).copied();
            self.cursor += 1;
            value
        }
    }

    #[test]
    fn streams_results_and_finalizes() {
        let finder = BlockFinder::new(Box::new(CountingFinder {
            offsets: vec![10, 20, 30],
            cursor: 0,
        }));
        assert_eq!(finder.get(0, None), GetOutcome::Found(10));
        assert_eq!(finder.get(2, None), GetOutcome::Found(30));
        assert_eq!(finder.get(3, None), GetOutcome::OutOfRange);
        assert!(finder.finalized());
        assert_eq!(finder.find(20), Some(1));
        assert_eq!(finder.find(21), None);
    }

    #[test]
    fn prefilled_finder_serves_without_thread() {
        let finder = BlockFinder::from_offsets(vec![0, 4096, 8192]);
        assert_eq!(finder.get(1, None), GetOutcome::Found(4096));
        assert_eq!(finder.get(5, None), GetOutcome::OutOfRange);
    }

    #[test]
    fn partitioner_spaces_plain_gzip() {
        let file = testing::gzip_member_stored(&vec![0x33u8; 100_000]);
        let source: Arc<dyn crate::file_reader::FileReader> =
            Arc::new(MemoryFileReader::new(file.clone()));
        let mut partitioner = ChunkPartitioner::new(&source, 10 * 8, 16 * 1024);

        let first = partitioner.find_next().unwrap();
        assert_eq!(first, 80);
        let second = partitioner.find_next().unwrap();
        assert_eq!(second, 16 * 1024 * 8);
        let third = partitioner.find_next().unwrap();
        assert_eq!(third, 32 * 1024 * 8);
        // Offsets stop at the file size.
        let mut last = third;
        while let Some(offset) = partitioner.find_next() {
            assert!(offset > last);
            assert!(offset < file.len() as u64 * 8);
            last = offset;
        }
    }

    #[test]
    fn partitioner_snaps_to_bgzf_members() {
        let mut file = Vec::new();
        let mut boundaries = Vec::new();
        for i in 0..6u8 {
            boundaries.push(file.len() as u64 * 8);
            file.extend_from_slice(&testing::bgzf_member_stored(&vec![i; 3000]));
        }
        let source: Arc<dyn crate::file_reader::FileReader> =
            Arc::new(MemoryFileReader::new(file));
        // Spacing of two members.
        let member_bytes = (boundaries[1] / 8) as usize;
        let mut partitioner = ChunkPartitioner::new(&source, 0, member_bytes + 1);

        let mut offsets = Vec::new();
        while let Some(offset) = partitioner.find_next() {
            offsets.push(offset);
        }
        // Every returned offset is a true member boundary, spaced at least
        // one spacing apart.
        for offset in &offsets {
            assert!(boundaries.contains(offset), "{} not in {:?}", offset, boundaries);
        }
        assert!(offsets.len() >= 2);
        for pair in offsets.windows(2) {
            assert!(pair[1] - pair[0] >= boundaries[1]);
        }
    }
}
