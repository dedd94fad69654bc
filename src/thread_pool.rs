use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// One-shot result cell connecting a submitted task to its consumer.
pub struct TaskResult<T> {
    shared: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> Clone for TaskResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> TaskResult<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    pub fn set(&self, value: T) {
        let (slot, signal) = &*self.shared;
        *slot.lock().unwrap() = Some(value);
        signal.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        self.shared.0.lock().unwrap().is_some()
    }

    /// Block until the value arrives and take it.
    pub fn wait(&self) -> T {
        let (slot, signal) = &*self.shared;
        let mut guard = slot.lock().unwrap();
        loop {
            if let Some(value) = guard.take() {
                return value;
            }
            guard = signal.wait(guard).unwrap();
        }
    }

    /// Take the value if it arrives within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let (slot, signal) = &*self.shared;
        let mut guard = slot.lock().unwrap();
        if let Some(value) = guard.take() {
            return Some(value);
        }
        let (mut guard, result) = signal.wait_timeout(guard, timeout).unwrap();
        let _ = result;
        guard.take()
    }
}

impl<T> Default for TaskResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

type Task = Box<dyn FnOnce() + Send>;

struct PoolShared {
    state: Mutex<PoolState>,
    /// Guards `state.tasks` and the running flag together, or notifications
    /// could go unnoticed.
    ping_workers: Condvar,
}

struct PoolState {
    tasks: VecDeque<Task>,
    running: bool,
}

/// Fixed pool of OS worker threads. Tasks are type-erased closures; results
/// travel through [`TaskResult`]. Workers never suspend inside a task.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                running: true,
            }),
            ping_workers: Condvar::new(),
        });

        let threads = (0..thread_count)
            .map(|worker_index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("pargz-worker-{}", worker_index))
                    .spawn(move || worker_main(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, threads }
    }

    pub fn hardware_concurrency() -> usize {
        std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1)
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }

    pub fn unprocessed_task_count(&self) -> usize {
        self.shared.state.lock().unwrap().tasks.len()
    }

    /// Submit a closure; the returned handle yields its result when needed.
    pub fn submit<T, F>(&self, task: F) -> TaskResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let result = TaskResult::new();
        let completion = result.clone();
        let mut state = self.shared.state.lock().unwrap();
        state.tasks.push_back(Box::new(move || {
            completion.set(task());
        }));
        drop(state);
        self.shared.ping_workers.notify_one();
        result
    }

    /// Stop accepting work, drop queued tasks and join every worker.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.running = false;
            state.tasks.clear();
        }
        self.shared.ping_workers.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_main(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if !state.running {
                    return;
                }
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                state = shared.ping_workers.wait(state).unwrap();
            }
        };
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn executes_submitted_tasks() {
        let pool = ThreadPool::new(4);
        let results: Vec<TaskResult<usize>> =
            (0..32).map(|i| pool.submit(move || i * i)).collect();
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.wait(), i * i);
        }
    }

    #[test]
    fn tasks_run_in_parallel_workers() {
        let pool = ThreadPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let results: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for result in results {
            result.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn wait_timeout_elapses_for_slow_tasks() {
        let pool = ThreadPool::new(1);
        let result = pool.submit(|| {
            std::thread::sleep(Duration::from_millis(200));
            1
        });
        assert!(result.wait_timeout(Duration::from_millis(10)).is_none());
        assert_eq!(result.wait(), 1);
    }

    #[test]
    fn stop_drops_queued_tasks() {
        let mut pool = ThreadPool::new(1);
        let _blocker = pool.submit(|| std::thread::sleep(Duration::from_millis(50)));
        for _ in 0..16 {
            pool.submit(|| std::thread::sleep(Duration::from_millis(50)));
        }
        pool.stop();
        assert_eq!(pool.unprocessed_task_count(), 0);
    }
}
