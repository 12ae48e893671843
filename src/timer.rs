//! A single background thread firing deadline-ordered callbacks.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::scheduler::Work;

static TIMER: LazyLock<Timer> = LazyLock::new(Timer::start);

/// Runs `fire` on the timer thread once `deadline` has passed.
pub(crate) fn schedule_at(deadline: Instant, fire: Work) {
    TIMER.push(deadline, fire);
}

struct Entry {
    deadline: Instant,
    seq: u64,
    fire: Work,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct Heap {
    entries: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

struct Timer {
    shared: Arc<(Mutex<Heap>, Condvar)>,
}

fn lock(heap: &Mutex<Heap>) -> MutexGuard<'_, Heap> {
    heap.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Timer {
    fn start() -> Self {
        let shared = Arc::new((Mutex::new(Heap::default()), Condvar::new()));
        let worker = shared.clone();
        let spawned = std::thread::Builder::new()
            .name("promise-timer".into())
            .spawn(move || Timer::run(&worker));
        if let Err(err) = spawned {
            log::error!("failed to spawn the timer thread, timers will never fire: {err}");
        }
        Self { shared }
    }

    fn push(&self, deadline: Instant, fire: Work) {
        let (heap, changed) = &*self.shared;
        {
            let mut heap = lock(heap);
            let seq = heap.next_seq;
            heap.next_seq += 1;
            heap.entries.push(Reverse(Entry { deadline, seq, fire }));
        }
        changed.notify_one();
    }

    fn run(shared: &(Mutex<Heap>, Condvar)) {
        let (heap, changed) = shared;
        let mut guard = lock(heap);
        loop {
            let now = Instant::now();
            match guard.entries.peek().map(|Reverse(entry)| entry.deadline) {
                None => {
                    guard = changed.wait(guard).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) if deadline > now => {
                    guard = changed
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                Some(_) => {
                    if let Some(Reverse(entry)) = guard.entries.pop() {
                        drop(guard);
                        (entry.fire)();
                        guard = lock(heap);
                    }
                }
            }
        }
    }
}
