use std::sync::atomic::{AtomicU64, Ordering, fence};
use std::fmt;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;

/// Low bits hold the id of the thread holding the lock.
pub const THREADID_MASK: u64 = 0xFFFF;
pub const LOCK_BIT: u64 = 1 << 16;
/// Marks a node that is physically linked but not logically present.
pub const INVALID_BIT: u64 = 1 << 17;
pub const NONOPAQUE_BIT: u64 = 1 << 18;
/// Smallest step of the timestamp part of a version.
pub const INCREMENT_VALUE: u64 = 1 << 19;

const LOCK_MASK: u64 = LOCK_BIT | THREADID_MASK;
const TIMESTAMP_MASK: u64 = !(INCREMENT_VALUE - 1);

/// The version every fresh node starts from, older than any commit timestamp.
pub const INITIALIZED_VERSION: u64 = INCREMENT_VALUE;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
// Ids of exited threads, handed out again before fresh ones
static FREE_THREAD_IDS: Mutex<Vec<u64>> = parking_lot::const_mutex(Vec::new());

/// An owner id held by one live thread, returned to the free list when it exits.
struct ThreadIdSlot(u64);

impl ThreadIdSlot {
    fn acquire() -> Self {
        if let Some(id) = FREE_THREAD_IDS.lock().pop() {
            return ThreadIdSlot(id);
        }
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        assert!(id <= THREADID_MASK, "more than {} live threads need a version owner id", THREADID_MASK);
        ThreadIdSlot(id)
    }
}

impl Drop for ThreadIdSlot {
    fn drop(&mut self) {
        FREE_THREAD_IDS.lock().push(self.0);
    }
}

thread_local! {
    static THREAD_ID: ThreadIdSlot = ThreadIdSlot::acquire();
}

/// The id this thread writes into the owner bits of the versions it locks. Ids are
/// unique among live threads and never 0.
pub fn thread_id() -> u64 {
    THREAD_ID.with(|slot| slot.0)
}

pub fn is_locked(version: u64) -> bool {
    version & LOCK_BIT != 0
}

pub fn is_locked_here(version: u64) -> bool {
    is_locked(version) && version & THREADID_MASK == thread_id()
}

pub fn is_locked_elsewhere(version: u64) -> bool {
    is_locked(version) && version & THREADID_MASK != thread_id()
}

pub fn is_valid(version: u64) -> bool {
    version & INVALID_BIT == 0
}

/// A version word with the lock, validity and timestamp packed together.
///
/// Layout, from the low bits up:
///
/// * bits 0-15: id of the owning thread, meaningful only while locked
/// * bit 16: lock
/// * bit 17: invalid (logically absent but still linked)
/// * bit 18: non-opaque (timestamp was bumped rather than assigned)
/// * bits 19-63: timestamp
///
/// Readers take a `snapshot`, do their reads, and later compare with
/// `check_version`. Writers `try_lock`, write, then publish the new timestamp with
/// `set_version_unlock` or `set_version` followed by `unlock`.
pub struct TVersion {
    value: AtomicU64
}

impl TVersion {
    pub fn new(value: u64) -> Self {
        TVersion {
            value: AtomicU64::new(value)
        }
    }

    /// A version created already locked by this thread and marked invalid. Used for
    /// nodes inserted by a transaction which has not committed yet.
    pub fn new_locked_invalid() -> Self {
        Self::new(INITIALIZED_VERSION | INVALID_BIT | LOCK_BIT | thread_id())
    }

    pub fn snapshot(&self) -> u64 {
        let value = self.value.load(Ordering::Acquire);
        fence(Ordering::Acquire);
        value
    }

    pub fn is_locked(&self) -> bool {
        is_locked(self.snapshot())
    }

    pub fn is_locked_here(&self) -> bool {
        is_locked_here(self.snapshot())
    }

    pub fn is_valid(&self) -> bool {
        is_valid(self.snapshot())
    }

    /// Attempt to take the lock once. Fails if anyone, this thread included, holds it.
    pub fn try_lock(&self) -> bool {
        let current = self.value.load(Ordering::Acquire);
        if is_locked(current) {
            return false;
        }
        let locked = current | LOCK_BIT | thread_id();
        self.value.compare_exchange(current, locked, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Attempt to take the lock, spinning with backoff until the backoff is exhausted.
    pub fn try_lock_spin(&self) -> bool {
        let backoff = Backoff::new();
        loop {
            if self.try_lock() {
                return true;
            }
            if backoff.is_completed() {
                return false;
            }
            backoff.snooze();
        }
    }

    /// Spin until the lock is ours.
    pub fn lock(&self) {
        let backoff = Backoff::new();
        while !self.try_lock() {
            backoff.snooze();
        }
    }

    pub fn unlock(&self) {
        debug_assert!(self.is_locked_here());
        self.value.fetch_and(!LOCK_MASK, Ordering::Release);
    }

    /// Replace the timestamp, keeping the lock. Clears the invalid and non-opaque bits.
    pub fn set_version(&self, timestamp: u64) {
        debug_assert!(self.is_locked_here());
        let current = self.value.load(Ordering::Relaxed);
        self.value.store((timestamp & TIMESTAMP_MASK) | (current & LOCK_MASK), Ordering::Release);
    }

    /// Publish a timestamp and release the lock in one store. Clears every flag.
    pub fn set_version_unlock(&self, timestamp: u64) {
        self.value.store(timestamp & TIMESTAMP_MASK, Ordering::Release);
    }

    /// Advance the timestamp by one step without consulting the commit clock.
    pub fn inc_nonopaque_version(&self) {
        debug_assert!(self.is_locked_here());
        let current = self.value.load(Ordering::Relaxed);
        let next = ((current & TIMESTAMP_MASK) + INCREMENT_VALUE) | NONOPAQUE_BIT | (current & LOCK_MASK);
        self.value.store(next, Ordering::Release);
    }

    pub fn mark_invalid(&self) {
        self.value.fetch_or(INVALID_BIT, Ordering::SeqCst);
    }

    /// True if nothing but our own lock changed since `observed` was read.
    pub fn check_version(&self, observed: u64) -> bool {
        let current = self.snapshot();
        if is_locked_elsewhere(current) {
            return false;
        }
        (current ^ observed) & !LOCK_MASK == 0
    }
}

impl fmt::Debug for TVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let v = self.value.load(Ordering::Relaxed);
        write!(f, "TVersion {{ timestamp: {}, locked: {}, owner: {}, valid: {} }}",
               v >> 19, is_locked(v), v & THREADID_MASK, is_valid(v))
    }
}

/// A busy-wait mutual exclusion flag built on a version word.
#[derive(Debug)]
pub struct SpinLock {
    version: TVersion
}

/// Proof that the holder owns a `SpinLock`. Releases it on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a> {
    lock: &'a SpinLock
}

impl SpinLock {
    pub fn new() -> Self {
        SpinLock {
            version: TVersion::new(0)
        }
    }

    pub fn lock(&self) -> SpinGuard<'_> {
        self.version.lock();
        SpinGuard { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        self.version.is_locked()
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        SpinLock::new()
    }
}

impl<'a> Drop for SpinGuard<'a> {
    fn drop(&mut self) {
        self.lock.version.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_lock_records_owner() {
        let v = TVersion::new(INITIALIZED_VERSION);
        assert!(v.try_lock());
        assert!(v.is_locked_here());
        assert!(!v.try_lock());
        v.unlock();
        assert!(!v.is_locked());
        assert_eq!(v.snapshot(), INITIALIZED_VERSION);
    }

    #[test]
    fn test_locked_elsewhere() {
        let v = Arc::new(TVersion::new(INITIALIZED_VERSION));
        let observed = v.snapshot();
        let v_clone = v.clone();
        thread::spawn(move || {
            assert!(v_clone.try_lock());
        }).join().unwrap();

        assert!(v.is_locked());
        assert!(!v.is_locked_here());
        assert!(is_locked_elsewhere(v.snapshot()));
        assert!(!v.check_version(observed));
        assert!(!v.try_lock_spin());
    }

    #[test]
    fn test_check_version_ignores_own_lock() {
        let v = TVersion::new(INITIALIZED_VERSION * 3);
        let observed = v.snapshot();
        assert!(v.try_lock());
        assert!(v.check_version(observed));
        v.set_version(INITIALIZED_VERSION * 5);
        assert!(v.is_locked_here());
        assert!(!v.check_version(observed));
        v.unlock();
    }

    #[test]
    fn test_new_locked_invalid() {
        let v = TVersion::new_locked_invalid();
        assert!(!v.is_valid());
        assert!(v.is_locked_here());
        v.set_version_unlock(INCREMENT_VALUE * 9);
        assert!(v.is_valid());
        assert!(!v.is_locked());
        assert_eq!(v.snapshot(), INCREMENT_VALUE * 9);
    }

    #[test]
    fn test_mark_invalid_changes_version() {
        let v = TVersion::new(INITIALIZED_VERSION);
        let observed = v.snapshot();
        v.mark_invalid();
        assert!(!v.is_valid());
        assert!(!v.check_version(observed));
    }

    #[test]
    fn test_nonopaque_increment() {
        let v = TVersion::new(INITIALIZED_VERSION);
        assert!(v.try_lock());
        v.inc_nonopaque_version();
        let bumped = v.snapshot();
        assert!(is_locked_here(bumped));
        assert_eq!(bumped & TIMESTAMP_MASK, INITIALIZED_VERSION + INCREMENT_VALUE);
        assert!(bumped & NONOPAQUE_BIT != 0);
        v.unlock();
    }

    #[test]
    fn test_thread_ids_unique_while_live() {
        let main_id = thread_id();
        let barrier = Arc::new(Barrier::new(16));
        let mut wait_vec = Vec::new();
        for _ in 0..16 {
            let barrier = barrier.clone();
            wait_vec.push(thread::spawn(move || {
                let id = thread_id();
                // Keep every thread alive until all have taken an id
                barrier.wait();
                id
            }));
        }
        let mut ids: Vec<u64> = wait_vec.into_iter().map(|handle| handle.join().unwrap()).collect();
        ids.push(main_id);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 17);
        assert!(ids.iter().all(|id| *id != 0 && *id <= THREADID_MASK));
    }

    #[test]
    fn test_thread_ids_recycled_past_mask() {
        let main_id = thread_id();
        let v = TVersion::new(INITIALIZED_VERSION);
        let observed = v.snapshot();
        for _ in 0..(THREADID_MASK + 16) {
            let v = &v;
            let collided = crossbeam::thread::scope(|scope| {
                scope.spawn(move |_| {
                    let id = thread_id();
                    if id == main_id {
                        assert!(v.try_lock());
                    }
                    id == main_id
                }).join().unwrap()
            }).unwrap();
            assert!(!collided);
        }
        assert!(!v.is_locked());
        assert!(v.check_version(observed));
    }

    #[test]
    fn test_spin_lock_excludes() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(AtomicU64::new(0));
        let mut wait_vec = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let counter = counter.clone();
            wait_vec.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let _guard = lock.lock();
                    // Non-atomic read-modify-write, only correct under the lock
                    let c = counter.load(Ordering::Relaxed);
                    counter.store(c + 1, Ordering::Relaxed);
                }
            }));
        }
        for handle in wait_vec {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
        assert!(!lock.is_locked());
    }
}
