use std::collections::VecDeque;

/// Adaptive prefetcher able to detect multiple interleaved forward streams,
/// as produced by several consumers walking the chunk sequence in parallel.
///
/// Detection sorts the memorized accesses, finds maximal consecutive runs and
/// extrapolates each run past its head. The amount per run scales
/// exponentially with the run's share of the memory, so pure random access
/// prefetches nothing while a fully sequential pattern prefetches the whole
/// allowance.
pub struct FetchMultiStream {
    /// Most recent access at the front.
    previous: VecDeque<usize>,
    memory_size: usize,
    memory_per_stream: usize,
}

impl FetchMultiStream {
    pub const DEFAULT_MEMORY_PER_STREAM: usize = 3;
    pub const DEFAULT_STREAM_COUNT: usize = 16;

    pub fn new() -> Self {
        Self::with_memory(Self::DEFAULT_MEMORY_PER_STREAM, Self::DEFAULT_STREAM_COUNT)
    }

    pub fn with_memory(memory_per_stream: usize, stream_count: usize) -> Self {
        let memory_per_stream = memory_per_stream.max(1);
        Self {
            previous: VecDeque::new(),
            memory_size: memory_per_stream * stream_count.max(1),
            memory_per_stream,
        }
    }

    /// Record a cache access.
    pub fn fetch(&mut self, index: usize) {
        // Repeated accesses to the same chunk mean the caller reads it in
        // small pieces; they carry no pattern information.
        if self.previous.front() == Some(&index) {
            return;
        }
        self.previous.push_front(index);
        while self.previous.len() > self.memory_size {
            self.previous.pop_back();
        }
    }

    pub fn last_fetched(&self) -> Option<usize> {
        self.previous.front().copied()
    }

    /// True when the memorized accesses form one strictly sequential run.
    pub fn is_sequential(&self) -> bool {
        self.previous
            .iter()
            .zip(self.previous.iter().skip(1))
            .all(|(&newer, &older)| older + 1 == newer)
    }

    fn memory_full(&self) -> bool {
        self.previous.len() >= self.memory_size
    }

    /// Exponential interpolation between "no prefetch" for random access and
    /// `max_amount` for saturated sequential access.
    fn extrapolate_forward(
        highest_value: usize,
        consecutive_values: usize,
        saturation_count: usize,
        max_amount: usize,
    ) -> Vec<usize> {
        if max_amount == 0 {
            return Vec::new();
        }
        let ratio = if saturation_count == 0 {
            1.0
        } else {
            consecutive_values.min(saturation_count) as f64 / saturation_count as f64
        };
        let amount = (ratio * (max_amount as f64).log2()).exp2().round() as usize;
        let amount = amount.min(max_amount);
        (highest_value + 1..=highest_value + amount).collect()
    }

    /// Predict up to `max_amount` chunk indexes to decode ahead of demand.
    pub fn prefetch(&self, max_amount: usize) -> Vec<usize> {
        if self.previous.is_empty() || max_amount == 0 {
            return Vec::new();
        }

        if self.previous.len() == 1 {
            // First access: extrapolate fully so a cold sequential read pays
            // exactly one cache miss.
            let start = self.previous[0] + 1;
            return (start..start + max_amount).collect();
        }

        let mut sorted: Vec<usize> = self.previous.iter().copied().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut per_stream_predictions: Vec<Vec<usize>> = Vec::new();
        let mut run_start = 0usize;
        for i in 0..sorted.len() {
            let run_ends = i + 1 == sorted.len() || sorted[i] + 1 != sorted[i + 1];
            if !run_ends {
                continue;
            }
            let run = &sorted[run_start..=i];
            run_start = i + 1;

            // The sorted run may be an artifact of ordering; re-check how
            // long the run is when walked through the true access order, so
            // a perfect backward pattern is not mistaken for forward.
            let mut sequence_length = 0usize;
            let mut search_from = 0usize;
            for &value in run.iter().rev() {
                match self.previous.iter().skip(search_from).position(|&p| p == value) {
                    Some(found) => {
                        search_from += found + 1;
                        sequence_length += 1;
                    }
                    None => break,
                }
            }

            // Random single access in a saturated memory: not a stream.
            if self.memory_full() && sequence_length == 1 {
                continue;
            }

            let consecutive_values = if sequence_length <= 1 {
                0
            } else {
                sequence_length
            };
            // Before the memory saturates, extrapolate fully for faster
            // first-time decoding.
            let saturation_count = if !self.memory_full() && consecutive_values > 0 {
                consecutive_values
            } else {
                self.memory_per_stream
            };
            per_stream_predictions.push(Self::extrapolate_forward(
                *run.last().unwrap(),
                consecutive_values,
                saturation_count,
                max_amount,
            ));
        }

        let mut result = interleave(&per_stream_predictions);
        result.retain(|value| !self.previous.contains(value));
        result.truncate(max_amount);
        result
    }

    /// A cached chunk was split into `split_count` sub-chunks: the recorded
    /// index becomes that many consecutive indexes and all higher recorded
    /// indexes shift up.
    pub fn split_index(&mut self, index_to_split: usize, split_count: usize) {
        if split_count <= 1 {
            return;
        }
        let shift = split_count - 1;
        let mut updated = VecDeque::with_capacity(self.previous.len());
        for &index in &self.previous {
            if index == index_to_split {
                for i in 0..split_count {
                    updated.push_back(index + shift - i);
                }
            } else if index > index_to_split {
                updated.push_back(index + shift);
            } else {
                updated.push_back(index);
            }
        }
        self.previous = updated;
    }
}

impl Default for FetchMultiStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Round-robin merge: first elements of every stream, then second elements,
/// and so on.
fn interleave(streams: &[Vec<usize>]) -> Vec<usize> {
    let longest = streams.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut result = Vec::new();
    for position in 0..longest {
        for stream in streams {
            if let Some(&value) = stream.get(position) {
                result.push(value);
            }
        }
    }
    result
}
