use std::sync::Arc;
use std::fmt;
use parking_lot::{Mutex, RawMutex, RawRwLock, RwLock};
use parking_lot::lock_api::{ArcMutexGuard, ArcRwLockReadGuard, ArcRwLockUpgradableReadGuard, ArcRwLockWriteGuard};
use super::TxError;

/// An abstract lock taken by a transaction on behalf of some higher level operation.
pub type AbstractLock = Arc<Mutex<()>>;
/// An abstract reader/writer lock, see [`LockSet::read_for_upgrade`].
pub type AbstractRwLock = Arc<RwLock<()>>;

enum HeldRwLock {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Upgradable(ArcRwLockUpgradableReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>)
}

/// Handle to a read lock taken with [`LockSet::read_for_upgrade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeHandle(usize);

/// The locks a transaction holds until it commits or aborts.
///
/// Every acquisition is a single attempt; a lock held by someone else fails with
/// `TxError::LockContention` so the transaction can abort rather than wait. Whatever is
/// held is released when the owning transaction finishes, either way: plain locks
/// first, then reader/writer locks.
#[derive(Default)]
pub struct LockSet {
    locks: Vec<ArcMutexGuard<RawMutex, ()>>,
    rwlocks: Vec<Option<HeldRwLock>>
}

impl LockSet {
    pub fn new() -> Self {
        LockSet::default()
    }

    pub fn lock(&mut self, lock: &AbstractLock) -> Result<(), TxError> {
        match Mutex::try_lock_arc(lock) {
            Some(guard) => {
                self.locks.push(guard);
                Ok(())
            },
            None => Err(TxError::LockContention)
        }
    }

    pub fn read(&mut self, lock: &AbstractRwLock) -> Result<(), TxError> {
        match RwLock::try_read_arc(lock) {
            Some(guard) => {
                self.rwlocks.push(Some(HeldRwLock::Read(guard)));
                Ok(())
            },
            None => Err(TxError::LockContention)
        }
    }

    pub fn write(&mut self, lock: &AbstractRwLock) -> Result<(), TxError> {
        match RwLock::try_write_arc(lock) {
            Some(guard) => {
                self.rwlocks.push(Some(HeldRwLock::Write(guard)));
                Ok(())
            },
            None => Err(TxError::LockContention)
        }
    }

    /// Take a read lock which may later be turned into a write lock with `upgrade`.
    /// Only one such reader may exist per lock at a time.
    pub fn read_for_upgrade(&mut self, lock: &AbstractRwLock) -> Result<UpgradeHandle, TxError> {
        match RwLock::try_upgradable_read_arc(lock) {
            Some(guard) => {
                self.rwlocks.push(Some(HeldRwLock::Upgradable(guard)));
                Ok(UpgradeHandle(self.rwlocks.len() - 1))
            },
            None => Err(TxError::LockContention)
        }
    }

    /// Turn a read lock taken with `read_for_upgrade` into a write lock. On contention the
    /// read lock stays held.
    pub fn upgrade(&mut self, handle: UpgradeHandle) -> Result<(), TxError> {
        let slot = &mut self.rwlocks[handle.0];
        match slot.take() {
            Some(HeldRwLock::Upgradable(guard)) => {
                match ArcRwLockUpgradableReadGuard::try_upgrade(guard) {
                    Ok(write_guard) => {
                        *slot = Some(HeldRwLock::Write(write_guard));
                        Ok(())
                    },
                    Err(guard) => {
                        *slot = Some(HeldRwLock::Upgradable(guard));
                        Err(TxError::LockContention)
                    }
                }
            },
            other => {
                // Already a write lock, or not an upgradable one: nothing to do
                let already_written = match other {
                    Some(HeldRwLock::Write(_)) => true,
                    _ => false
                };
                *slot = other;
                if already_written { Ok(()) } else { Err(TxError::LockContention) }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len() + self.rwlocks.iter().filter(|held| held.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release everything, plain locks before reader/writer locks.
    pub fn release(&mut self) {
        self.locks.clear();
        self.rwlocks.clear();
    }
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LockSet(locks: {}, rwlocks: {})", self.locks.len(), self.rwlocks.len())
    }
}
