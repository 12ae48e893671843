//! Execution contexts that continuations are dispatched on.
//!
//! A [`Scheduler`] runs boxed units of work. Two shapes ship with the crate:
//!
//! - [`QueueScheduler`]: an asynchronous queue served by worker threads.
//!   Enqueued work is picked up on its own, `wake` does nothing.
//! - [`RunLoop`]: a cooperative loop driven by whoever calls one of its `run`
//!   methods. Work is picked up on the next iteration and `wake` unblocks a
//!   loop that is idle.

use std::cell::Cell;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// An injected execution context.
pub trait Scheduler: Send + Sync {
    /// Queues `work` to run on this context.
    fn schedule(&self, work: Work);

    /// Prods a cooperative context into running queued work promptly.
    fn wake(&self) {}

    /// Whether the calling thread is already executing inside this context.
    ///
    /// Promises run their continuations inline instead of re-enqueuing when
    /// this returns `true`. The default never claims the current thread.
    fn is_current(&self) -> bool {
        false
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, work: Work) {
        (**self).schedule(work)
    }

    fn wake(&self) {
        (**self).wake()
    }

    fn is_current(&self) -> bool {
        (**self).is_current()
    }
}

static GLOBAL_QUEUE: LazyLock<QueueScheduler> = LazyLock::new(|| QueueScheduler::default().persistent());
static WAIT_QUEUE: LazyLock<QueueScheduler> = LazyLock::new(|| QueueScheduler::new(2).persistent());

/// The process-wide queue promises dispatch on unless told otherwise.
pub fn global() -> &'static QueueScheduler {
    &GLOBAL_QUEUE
}

/// A queue reserved for the blocking adapter's wake-up signals, so a waiting
/// thread never depends on a context it may itself be occupying.
pub(crate) fn wait_queue() -> &'static QueueScheduler {
    &WAIT_QUEUE
}

thread_local! {
    static CURRENT: Cell<u64> = const { Cell::new(0) };
}

fn next_key() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn is_current(key: u64) -> bool {
    CURRENT.with(|current| current.get() == key)
}

/// Marks the current thread as running inside a scheduler until dropped.
struct Enter {
    previous: u64,
}

impl Enter {
    fn new(key: u64) -> Self {
        Self {
            previous: CURRENT.with(|current| current.replace(key)),
        }
    }
}

impl Drop for Enter {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(self.previous));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An asynchronous work queue served by up to `max_workers` threads.
///
/// Workers are spawned on demand, when work arrives and no worker is idle.
#[derive(Clone)]
pub struct QueueScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    key: u64,
    max_workers: usize,
    /// Set on the process-wide queues, which ignore `shutdown`.
    persistent: bool,
    state: Mutex<Locked>,
    ready: Condvar,
}

struct Locked {
    queue: VecDeque<Work>,
    n_idle_workers: usize,
    shutdown: bool,
    workers: Vec<JoinHandle<()>>,
}

impl QueueScheduler {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            shared: Arc::new(Shared {
                key: next_key(),
                max_workers,
                persistent: false,
                state: Mutex::new(Locked {
                    queue: VecDeque::new(),
                    n_idle_workers: 0,
                    shutdown: false,
                    workers: Vec::with_capacity(max_workers),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Number of worker threads spawned so far.
    pub fn workers(&self) -> usize {
        lock(&self.shared.state).workers.len()
    }

    fn persistent(mut self) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.persistent = true;
        }
        self
    }

    /// Stops accepting work and lets the workers exit once the queue is empty.
    ///
    /// Does nothing on the process-wide queue returned by [`global`].
    pub fn shutdown(&self) {
        if self.shared.persistent {
            log::warn!("ignoring shutdown of a process-wide queue");
            return;
        }
        let workers = {
            let mut state = lock(&self.shared.state);
            state.shutdown = true;
            std::mem::take(&mut state.workers)
        };
        self.shared.ready.notify_all();
        for worker in workers {
            if worker.thread().id() == std::thread::current().id() {
                continue;
            }
            if worker.join().is_err() {
                log::warn!("queue worker panicked before shutdown");
            }
        }
    }

    fn spawn_worker(&self, id: usize) -> std::io::Result<JoinHandle<()>> {
        let shared = self.shared.clone();
        std::thread::Builder::new()
            .name(format!("promise-queue-{id}"))
            .spawn(move || {
                log::trace!("Worker {id}: starting");
                let _enter = Enter::new(shared.key);
                while let Some(work) = shared.next_job() {
                    work();
                }
                log::trace!("Worker {id}: exiting");
            })
    }
}

impl Shared {
    fn next_job(&self) -> Option<Work> {
        let mut state = lock(&self.state);
        loop {
            if let Some(work) = state.queue.pop_front() {
                return Some(work);
            }
            if state.shutdown {
                return None;
            }
            state.n_idle_workers += 1;
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
            state.n_idle_workers -= 1;
        }
    }
}

impl Default for QueueScheduler {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(parallelism.clamp(2, 64))
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, work: Work) {
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            log::warn!("work scheduled on a shut down queue was dropped");
            return;
        }
        state.queue.push_back(work);
        // A notified worker stays counted as idle until it reacquires the lock.
        if state.queue.len() > state.n_idle_workers && state.workers.len() < self.shared.max_workers {
            let id = state.workers.len();
            match self.spawn_worker(id) {
                Ok(worker) => state.workers.push(worker),
                Err(err) => log::error!("failed to spawn queue worker {id}: {err}"),
            }
        }
        let notify = state.n_idle_workers > 0;
        drop(state);
        if notify {
            self.shared.ready.notify_one();
        }
    }

    fn is_current(&self) -> bool {
        is_current(self.shared.key)
    }
}

impl std::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("QueueScheduler")
            .field("queued", &state.queue.len())
            .field("workers", &state.workers.len())
            .field("max_workers", &self.shared.max_workers)
            .finish()
    }
}

/// A cooperative loop. Nothing runs until a thread drives it with
/// [`run_once`](RunLoop::run_once), [`run_until_idle`](RunLoop::run_until_idle),
/// [`run_for`](RunLoop::run_for) or [`run`](RunLoop::run).
#[derive(Clone)]
pub struct RunLoop {
    shared: Arc<LoopShared>,
}

struct LoopShared {
    key: u64,
    state: Mutex<LoopState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct LoopState {
    queue: VecDeque<Work>,
    woken: bool,
    stopped: bool,
}

impl RunLoop {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                key: next_key(),
                state: Mutex::new(LoopState::default()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Work queued and not yet run.
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// One iteration: runs the work that was queued before this call. Work
    /// queued while the iteration runs waits for the next one.
    pub fn run_once(&self) -> usize {
        let batch = std::mem::take(&mut lock(&self.shared.state).queue);
        let count = batch.len();
        let _enter = Enter::new(self.shared.key);
        for work in batch {
            work();
        }
        count
    }

    /// Iterates until the queue is empty.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            match self.run_once() {
                0 => return total,
                n => total += n,
            }
        }
    }

    /// Iterates until [`stop`](RunLoop::stop) is called, sleeping while idle.
    pub fn run(&self) {
        self.run_inner(None)
    }

    /// Iterates until `duration` has elapsed or the loop is stopped.
    pub fn run_for(&self, duration: Duration) {
        self.run_inner(Instant::now().checked_add(duration))
    }

    /// Makes a running loop return. The next call to a `run` method resets it.
    pub fn stop(&self) {
        lock(&self.shared.state).stopped = true;
        self.shared.wakeup.notify_all();
    }

    fn run_inner(&self, deadline: Option<Instant>) {
        lock(&self.shared.state).stopped = false;
        loop {
            self.run_once();
            let mut state = lock(&self.shared.state);
            while state.queue.is_empty() && !state.woken && !state.stopped {
                state = match deadline {
                    None => self.shared.wakeup.wait(state).unwrap_or_else(PoisonError::into_inner),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return;
                        }
                        self.shared
                            .wakeup
                            .wait_timeout(state, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                };
            }
            state.woken = false;
            if state.stopped {
                return;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return;
            }
        }
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for RunLoop {
    fn schedule(&self, work: Work) {
        lock(&self.shared.state).queue.push_back(work);
    }

    fn wake(&self) {
        lock(&self.shared.state).woken = true;
        self.shared.wakeup.notify_all();
    }

    fn is_current(&self) -> bool {
        is_current(self.shared.key)
    }
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop").field("queued", &self.queued()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_queue_runs_work() {
        let queue = QueueScheduler::new(2);
        let (tx, rx) = channel();
        for i in 0..4 {
            let tx = tx.clone();
            queue.schedule(Box::new(move || tx.send(i).unwrap()));
        }
        let mut seen: Vec<i32> = (0..4).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(queue.workers() <= 2);
        queue.shutdown();
    }

    #[test]
    fn test_queue_is_current_inside_worker() {
        let queue = QueueScheduler::new(1);
        let (tx, rx) = channel();
        let inner = queue.clone();
        queue.schedule(Box::new(move || tx.send(inner.is_current()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!queue.is_current());
        queue.shutdown();
    }

    #[test]
    fn test_run_loop_defers_until_driven() {
        let run_loop = RunLoop::new();
        let (tx, rx) = channel();
        run_loop.schedule(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.try_recv().is_err());
        assert_eq!(run_loop.run_once(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_run_loop_work_queued_during_iteration_waits() {
        let run_loop = RunLoop::new();
        let again = run_loop.clone();
        run_loop.schedule(Box::new(move || {
            let nested = again.clone();
            again.schedule(Box::new(move || assert!(nested.is_current())));
        }));
        assert_eq!(run_loop.run_once(), 1);
        assert_eq!(run_loop.queued(), 1);
        assert_eq!(run_loop.run_until_idle(), 1);
        assert!(!run_loop.is_current());
    }

    #[test]
    fn test_run_loop_wake_unblocks_idle_loop() {
        let run_loop = RunLoop::new();
        let driver = run_loop.clone();
        let handle = std::thread::spawn(move || driver.run());
        let (tx, rx) = channel();
        let stopper = run_loop.clone();
        run_loop.schedule(Box::new(move || {
            tx.send(()).unwrap();
            stopper.stop();
        }));
        run_loop.wake();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().expect("The run loop thread has panicked");
    }

    #[test]
    fn test_run_for_returns_at_deadline() {
        let run_loop = RunLoop::new();
        let start = Instant::now();
        run_loop.run_for(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_back_to_back_work_gets_its_own_worker() {
        let queue = QueueScheduler::new(2);
        let (tx, rx) = channel();
        queue.schedule(Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let start = Instant::now();
        while lock(&queue.shared.state).n_idle_workers == 0 {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::yield_now();
        }
        assert_eq!(queue.workers(), 1);

        let (open_tx, open_rx) = channel();
        let (done_tx, done_rx) = channel();
        queue.schedule(Box::new(move || {
            done_tx.send(open_rx.recv_timeout(Duration::from_secs(2)).is_ok()).unwrap()
        }));
        queue.schedule(Box::new(move || open_tx.send(()).unwrap()));
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert_eq!(queue.workers(), 2);
        queue.shutdown();
    }

    #[test]
    fn test_global_queue_ignores_shutdown() {
        global().shutdown();
        let (tx, rx) = channel();
        global().schedule(Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
