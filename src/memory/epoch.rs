use crossbeam::epoch::Guard;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::fmt;
use thread_local::ThreadLocal;
use tracing::debug;
use super::Reclaim;

const DEFAULT_MAX_RETIRED: usize = 64;

/// Epoch based reclamation with per-thread retirement bookkeeping.
///
/// Each retirement is handed to the pinned `crossbeam-epoch` guard of the caller, so it
/// runs only after every thread that could have seen the record has moved on. Every
/// thread counts its own retirements; once a thread has retired more than `max_retired`
/// records since its last flush, it pushes its local garbage bag to the global queue so
/// that long transactions do not hoard memory.
pub struct EpochManager {
    thread_info: ThreadLocal<ThreadLocalInfo>,
    max_retired: usize
}

#[derive(Debug, Default)]
struct ThreadLocalInfo {
    // Only written by the owning thread, read by anyone summing the totals
    retired_number: AtomicUsize,
    since_flush: AtomicUsize
}

impl EpochManager {
    /// Create a manager which flushes a thread's garbage after `max_retired` retirements.
    /// # Examples
    /// ```
    /// use rustcurrent::memory::EpochManager;
    /// let manager = EpochManager::new(128);
    /// assert_eq!(manager.retired(), 0);
    /// ```
    pub fn new(max_retired: usize) -> Self {
        EpochManager {
            thread_info: ThreadLocal::new(),
            max_retired
        }
    }

    /// Total number of records retired through this manager, across all threads.
    pub fn retired(&self) -> usize {
        self.thread_info.iter()
            .map(|info| info.retired_number.load(Ordering::Relaxed))
            .sum()
    }

    pub fn max_retired(&self) -> usize {
        self.max_retired
    }

    fn get_thread_info(&self) -> &ThreadLocalInfo {
        self.thread_info.get_or(ThreadLocalInfo::default)
    }
}

impl Reclaim for EpochManager {
    unsafe fn retire<N: 'static>(&self, guard: &Guard, record: *mut N) {
        guard.defer_unchecked(move || {
            drop(Box::from_raw(record));
        });

        let thread_info = self.get_thread_info();
        thread_info.retired_number.fetch_add(1, Ordering::Relaxed);
        let pending = thread_info.since_flush.fetch_add(1, Ordering::Relaxed) + 1;
        if pending > self.max_retired {
            debug!(pending, "flushing retired records");
            thread_info.since_flush.store(0, Ordering::Relaxed);
            guard.flush();
        }
    }
}

impl Default for EpochManager {
    fn default() -> Self {
        EpochManager::new(DEFAULT_MAX_RETIRED)
    }
}

impl fmt::Debug for EpochManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EpochManager(retired: {}, max_retired: {})", self.retired(), self.max_retired)
    }
}
