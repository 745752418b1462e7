//! A module for deferred memory reclamation.
//!
//! Nodes unlinked from a shared structure may still be read by threads that loaded a
//! pointer to them before the unlink. The types here make sure such records are only
//! freed once no thread can still be looking at them.
//!
//! Reclamation is pluggable through the [`Reclaim`] trait. The default implementation,
//! [`EpochManager`], defers destruction through `crossbeam-epoch`: a record retired while
//! some thread is pinned is not dropped until that thread unpins.

pub use self::epoch::EpochManager;

use crossbeam::epoch::Guard;

mod epoch;

/// A strategy for freeing records that concurrent readers may still hold.
pub trait Reclaim: Send + Sync {
    /// Schedule `record` to be dropped once every thread pinned at the time of the call
    /// has unpinned.
    ///
    /// # Safety
    /// `record` must come from `Box::into_raw`, must already be unreachable for any
    /// thread that pins after this call, and must not be retired twice.
    unsafe fn retire<N: 'static>(&self, guard: &Guard, record: *mut N);
}
