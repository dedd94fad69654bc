use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Outcome of a [`StreamedResults::get`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome<T> {
    Found(T),
    Timeout,
    /// The producer finalized and the requested index will never exist.
    OutOfRange,
}

/// Append-only result database filled by an asynchronous producer and read
/// by any number of consumers. Readers block on a condition variable when
/// requesting an index beyond what has been produced.
pub struct StreamedResults<T> {
    inner: Mutex<Inner<T>>,
    changed: Condvar,
}

struct Inner<T> {
    results: Vec<T>,
    finalized: bool,
}

impl<T: Clone> StreamedResults<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                results: Vec::new(),
                finalized: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finalized(&self) -> bool {
        self.inner.lock().unwrap().finalized
    }

    /// Push one more result. Panics if already finalized, that is a logic
    /// error in the producer.
    pub fn push(&self, value: T) {
        let mut inner = self.inner.lock().unwrap();
        assert!(!inner.finalized, "push into finalized streamed results");
        inner.results.push(value);
        self.changed.notify_all();
    }

    /// No more results will come; optionally truncate to `keep_count`.
    pub fn finalize(&self, keep_count: Option<usize>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(count) = keep_count {
            inner.results.truncate(count);
        }
        inner.finalized = true;
        self.changed.notify_all();
    }

    /// Replace all contents, finalizing. Used when loading from an index.
    pub fn set_results(&self, results: Vec<T>) {
        let mut inner = self.inner.lock().unwrap();
        inner.results = results;
        inner.finalized = true;
        self.changed.notify_all();
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().unwrap().results.clone()
    }

    /// Wait for the result at `index`. `None` timeout blocks until the value
    /// exists or the producer finalizes without it.
    pub fn get(&self, index: usize, timeout: Option<Duration>) -> GetOutcome<T> {
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        let mut inner = self.inner.lock().unwrap();
        loop {
            if index < inner.results.len() {
                return GetOutcome::Found(inner.results[index].clone());
            }
            if inner.finalized {
                return GetOutcome::OutOfRange;
            }
            match deadline {
                None => inner = self.changed.wait(inner).unwrap(),
                Some(deadline) => {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return GetOutcome::Timeout;
                    }
                    let (guard, _) = self.changed.wait_timeout(inner, deadline - now).unwrap();
                    inner = guard;
                }
            }
        }
    }
}

impl<T: Clone> Default for StreamedResults<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn get_blocks_until_pushed() {
        let results = Arc::new(StreamedResults::<u64>::new());
        let producer = {
            let results = Arc::clone(&results);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                results.push(42);
                results.finalize(None);
            })
        };

        assert_eq!(results.get(0, None), GetOutcome::Found(42));
        assert_eq!(results.get(1, None), GetOutcome::OutOfRange);
        producer.join().unwrap();
    }

    #[test]
    fn timeout_fires_without_producer() {
        let results = StreamedResults::<u64>::new();
        assert_eq!(
            results.get(0, Some(Duration::from_millis(10))),
            GetOutcome::Timeout
        );
    }

    #[test]
    fn finalize_truncates() {
        let results = StreamedResults::new();
        for i in 0..10u64 {
            results.push(i);
        }
        results.finalize(Some(4));
        assert_eq!(results.len(), 4);
        assert_eq!(results.get(3, None), GetOutcome::Found(3));
        assert_eq!(results.get(4, None), GetOutcome::OutOfRange);
    }
}
