//! An optimistic transaction manager in the style of software transactional memory.
//!
//! A [`Transaction`] collects one [`TransItem`] per (structure, key) pair it touches.
//! Structures take part by implementing [`Shared`], the five callbacks invoked over
//! those items at commit time:
//!
//! * `lock` every item with a pending write,
//! * allocate a commit timestamp,
//! * `check` every item with a recorded read,
//! * `install` every item with a pending write,
//! * `unlock` whatever was locked, and finally `cleanup` every item.
//!
//! A failed `lock` or `check` aborts the transaction: nothing is installed and every
//! item is cleaned up with `committed == false`. The manager never retries on its own;
//! [`atomically`] provides a retry loop for callers who want one.
//!
//! # Example
//! ```
//! use rustcurrent::structures::List;
//! use rustcurrent::transaction::{atomically, Transaction};
//!
//! let list: List<u32> = List::new();
//! let mut txn = Transaction::new();
//! assert_eq!(list.trans_insert(&mut txn, 5), Ok(true));
//! assert_eq!(list.trans_insert(&mut txn, 3), Ok(true));
//! txn.commit().unwrap();
//!
//! let found = atomically(|txn| list.trans_find(txn, &3)).unwrap();
//! assert_eq!(found, Some(3));
//! ```

pub use self::error::TxError;
pub use self::item::{TransItem, ItemKey, Flags, READ_BIT, WRITE_BIT, LOCKED_BIT, USER0_BIT};
pub use self::lock_set::{LockSet, AbstractLock, AbstractRwLock, UpgradeHandle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use std::{cmp, mem, thread};
use crossbeam::epoch::{self, Guard};
use rand::Rng;
use tracing::trace;
use crate::structures::utils::version::INCREMENT_VALUE;

mod error;
mod item;
mod lock_set;

const MAX_BACKOFF: u32 = 2048;

// Starts one step past the version fresh nodes are created with
static GLOBAL_TID: AtomicU64 = AtomicU64::new(INCREMENT_VALUE);

pub(crate) fn next_commit_tid() -> u64 {
    GLOBAL_TID.fetch_add(INCREMENT_VALUE, Ordering::AcqRel) + INCREMENT_VALUE
}

/// The commit protocol a structure implements to take part in transactions.
///
/// Each callback receives one of the items the structure registered. Keys are chosen by
/// the structure and are opaque to the manager.
pub trait Shared: Sync {
    /// Lock whatever `item` will write. Returning false aborts the commit.
    fn lock(&self, item: &mut TransItem<'_>, txn: &Transaction<'_>) -> bool;
    /// Validate the read recorded in `item`. Returning false aborts the commit.
    fn check(&self, item: &TransItem<'_>, txn: &Transaction<'_>) -> bool;
    /// Make the write recorded in `item` visible, stamped with `txn.commit_tid()`.
    fn install(&self, item: &mut TransItem<'_>, txn: &Transaction<'_>);
    /// Release what `lock` acquired.
    fn unlock(&self, item: &mut TransItem<'_>);
    /// Called once for every item after the transaction commits or aborts.
    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, txn: &Transaction<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    Aborted(TxError)
}

/// A single optimistic transaction.
///
/// The transaction pins the current thread's epoch for its whole lifetime, so every node
/// it has seen stays allocated until it finishes. It is therefore tied to the thread that
/// created it. Dropping a transaction that has not committed aborts it.
pub struct Transaction<'a> {
    items: Vec<TransItem<'a>>,
    index: HashMap<(usize, ItemKey), usize>,
    state: TxState,
    commit_tid: u64,
    locks: LockSet,
    guard: Guard
}

impl<'a> Transaction<'a> {
    pub fn new() -> Self {
        Transaction {
            items: Vec::new(),
            index: HashMap::new(),
            state: TxState::Active,
            commit_tid: 0,
            locks: LockSet::new(),
            guard: epoch::pin()
        }
    }

    fn owner_id(owner: &(dyn Shared + 'a)) -> usize {
        owner as *const (dyn Shared + 'a) as *const u8 as usize
    }

    /// Get the item for `key` in `owner`, creating it on first access.
    pub fn item(&mut self, owner: &'a (dyn Shared + 'a), key: ItemKey) -> &mut TransItem<'a> {
        let id = (Self::owner_id(owner), key);
        let position = match self.index.get(&id) {
            Some(&position) => position,
            None => {
                self.items.push(TransItem::new(owner, key));
                self.index.insert(id, self.items.len() - 1);
                self.items.len() - 1
            }
        };
        &mut self.items[position]
    }

    /// Look up the item for `key` in `owner` without creating it.
    pub fn check_item(&self, owner: &(dyn Shared + 'a), key: ItemKey) -> Option<&TransItem<'a>> {
        self.index.get(&(Self::owner_id(owner), key)).map(|&position| &self.items[position])
    }

    /// The epoch guard pinned for the lifetime of this transaction.
    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    /// The timestamp of this commit. Only meaningful inside `Shared::install`.
    pub fn commit_tid(&self) -> u64 {
        self.commit_tid
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// The reason this transaction aborted, if it has.
    pub fn abort_reason(&self) -> Option<TxError> {
        match self.state {
            TxState::Aborted(reason) => Some(reason),
            _ => None
        }
    }

    /// Fails with the abort reason once the transaction has aborted.
    pub fn check_active(&self) -> Result<(), TxError> {
        match self.state {
            TxState::Aborted(reason) => Err(reason),
            _ => Ok(())
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// The abstract locks held by this transaction, released when it finishes.
    pub fn lock_set(&mut self) -> &mut LockSet {
        &mut self.locks
    }

    /// Abort the transaction: every item is cleaned up right away and every abstract
    /// lock released. Returns `reason` so callers can write `return Err(txn.abort(..))`.
    /// Aborting an already finished transaction keeps the first reason.
    pub fn abort(&mut self, reason: TxError) -> TxError {
        if self.state != TxState::Active {
            return self.abort_reason().unwrap_or(reason);
        }
        trace!(?reason, items = self.items.len(), "transaction aborted");
        self.state = TxState::Aborted(reason);
        let mut items = mem::replace(&mut self.items, Vec::new());
        for item in items.iter_mut() {
            let owner = item.owner;
            owner.cleanup(item, false, self);
        }
        self.items = items;
        self.locks.release();
        reason
    }

    /// Give up on the transaction.
    pub fn rollback(mut self) {
        self.abort(TxError::UserAbort);
    }

    /// Run the commit protocol over every item.
    ///
    /// # Errors
    /// The abort reason if the transaction had already aborted, `LockContention` if a
    /// write could not be locked, or `ValidationFailed` if a recorded read went stale.
    pub fn commit(mut self) -> Result<(), TxError> {
        self.check_active()?;
        let mut items = mem::replace(&mut self.items, Vec::new());

        let mut result = Ok(());
        for item in items.iter_mut().filter(|item| item.has_write()) {
            let owner = item.owner;
            if owner.lock(item, &self) {
                item.set_locked(true);
            } else {
                result = Err(TxError::LockContention);
                break;
            }
        }

        if result.is_ok() {
            self.commit_tid = next_commit_tid();
            if items.iter().filter(|item| item.has_read()).any(|item| !item.owner.check(item, &self)) {
                result = Err(TxError::ValidationFailed);
            }
        }

        if result.is_ok() {
            for item in items.iter_mut().filter(|item| item.has_write()) {
                let owner = item.owner;
                owner.install(item, &self);
            }
            trace!(commit_tid = self.commit_tid, items = items.len(), "transaction committed");
        }

        for item in items.iter_mut().filter(|item| item.is_locked()) {
            let owner = item.owner;
            owner.unlock(item);
            item.set_locked(false);
        }

        match result {
            Ok(()) => {
                self.state = TxState::Committed;
                for item in items.iter_mut() {
                    let owner = item.owner;
                    owner.cleanup(item, true, &self);
                }
                self.locks.release();
            },
            Err(reason) => {
                self.items = items;
                self.abort(reason);
            }
        }
        result
    }
}

impl<'a> Default for Transaction<'a> {
    fn default() -> Self {
        Transaction::new()
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            self.abort(TxError::UserAbort);
        }
    }
}

fn backoff(max_backoff: u32) -> u32 {
    let backoff_time = rand::thread_rng().gen_range(0..max_backoff);
    thread::sleep(Duration::new(0, backoff_time * 10));
    cmp::min(max_backoff * 2, MAX_BACKOFF)
}

/// Run `body` in a fresh transaction and commit it, retrying with randomized
/// exponential backoff for as long as the failure is retryable.
///
/// # Errors
/// Any non-retryable error returned by `body`, such as `TxError::UserAbort`.
pub fn atomically<'a, F, R>(mut body: F) -> Result<R, TxError>
where F: FnMut(&mut Transaction<'a>) -> Result<R, TxError>
{
    let mut max_backoff = 1;
    loop {
        let mut txn = Transaction::new();
        let error = match body(&mut txn) {
            Ok(result) => match txn.commit() {
                Ok(()) => return Ok(result),
                Err(error) => error
            },
            Err(error) => {
                txn.abort(error);
                error
            }
        };
        if !error.is_retryable() {
            return Err(error);
        }
        max_backoff = backoff(max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Arc;
    use parking_lot::Mutex;

    /// Records every callback it receives.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
        refuse_lock: bool,
        refuse_check: bool
    }

    impl Recorder {
        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl Shared for Recorder {
        fn lock(&self, item: &mut TransItem<'_>, _: &Transaction<'_>) -> bool {
            self.log.lock().push(format!("lock {:?}", item.key()));
            !self.refuse_lock
        }

        fn check(&self, item: &TransItem<'_>, _: &Transaction<'_>) -> bool {
            self.log.lock().push(format!("check {:?}", item.key()));
            !self.refuse_check
        }

        fn install(&self, item: &mut TransItem<'_>, txn: &Transaction<'_>) {
            assert!(txn.commit_tid() > 0);
            self.log.lock().push(format!("install {:?}", item.key()));
        }

        fn unlock(&self, item: &mut TransItem<'_>) {
            self.log.lock().push(format!("unlock {:?}", item.key()));
        }

        fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, _: &Transaction<'_>) {
            self.log.lock().push(format!("cleanup {:?} {}", item.key(), committed));
        }
    }

    fn key(n: usize) -> ItemKey {
        ItemKey::sentinel(n)
    }

    #[test]
    fn test_commit_phases_in_order() {
        let recorder = Recorder::default();
        let mut txn = Transaction::new();
        txn.item(&recorder, key(1)).add_write(1u32);
        assert!(txn.item(&recorder, key(2)).observe(INCREMENT_VALUE));
        assert_eq!(txn.item_count(), 2);
        assert!(txn.commit().is_ok());

        assert_eq!(recorder.log(), vec![
            "lock ItemKey(1)", "check ItemKey(2)", "install ItemKey(1)",
            "unlock ItemKey(1)", "cleanup ItemKey(1) true", "cleanup ItemKey(2) true"
        ]);
    }

    #[test]
    fn test_failed_lock_aborts() {
        let recorder = Recorder { refuse_lock: true, ..Recorder::default() };
        let mut txn = Transaction::new();
        txn.item(&recorder, key(1)).add_write(());
        assert_eq!(txn.commit(), Err(TxError::LockContention));
        assert_eq!(recorder.log(), vec!["lock ItemKey(1)", "cleanup ItemKey(1) false"]);
    }

    #[test]
    fn test_failed_check_unlocks_and_aborts() {
        let recorder = Recorder { refuse_check: true, ..Recorder::default() };
        let mut txn = Transaction::new();
        txn.item(&recorder, key(1)).add_write(());
        assert!(txn.item(&recorder, key(1)).observe(INCREMENT_VALUE));
        assert_eq!(txn.commit(), Err(TxError::ValidationFailed));
        assert_eq!(recorder.log(), vec![
            "lock ItemKey(1)", "check ItemKey(1)", "unlock ItemKey(1)", "cleanup ItemKey(1) false"
        ]);
    }

    #[test]
    fn test_drop_aborts_once() {
        let recorder = Recorder::default();
        {
            let mut txn = Transaction::new();
            txn.item(&recorder, key(3));
            assert_eq!(txn.abort(TxError::Conflict), TxError::Conflict);
            assert_eq!(txn.abort(TxError::UserAbort), TxError::Conflict);
            assert_eq!(txn.check_active(), Err(TxError::Conflict));
        }
        assert_eq!(recorder.log(), vec!["cleanup ItemKey(3) false"]);

        {
            let mut txn = Transaction::new();
            txn.item(&recorder, key(4));
        }
        assert_eq!(recorder.log().last().map(|s| s.as_str()), Some("cleanup ItemKey(4) false"));
    }

    #[test]
    fn test_items_are_per_owner() {
        let first = Recorder::default();
        let second = Recorder::default();
        let mut txn = Transaction::new();
        txn.item(&first, key(1)).set_stash(1i64);
        txn.item(&second, key(1)).set_stash(2i64);
        assert_eq!(txn.check_item(&first, key(1)).map(|i| i.stash_value(0i64)), Some(1));
        assert_eq!(txn.check_item(&second, key(1)).map(|i| i.stash_value(0i64)), Some(2));
        assert!(txn.check_item(&first, key(2)).is_none());
        txn.rollback();
    }

    #[test]
    fn test_lock_set_released_on_commit_and_abort() {
        let lock: AbstractLock = Arc::new(Mutex::new(()));
        let mut txn = Transaction::new();
        txn.lock_set().lock(&lock).unwrap();
        assert!(lock.is_locked());
        txn.commit().unwrap();
        assert!(!lock.is_locked());

        let mut txn = Transaction::new();
        txn.lock_set().lock(&lock).unwrap();
        txn.abort(TxError::Conflict);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_atomically_retries_until_success() {
        let attempts = RefCell::new(0);
        let result = atomically(|txn| {
            *attempts.borrow_mut() += 1;
            if *attempts.borrow() < 3 {
                return Err(txn.abort(TxError::Conflict));
            }
            Ok(*attempts.borrow())
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_atomically_stops_on_user_abort() {
        let result: Result<(), TxError> = atomically(|txn| Err(txn.abort(TxError::UserAbort)));
        assert_eq!(result, Err(TxError::UserAbort));
    }

    #[test]
    fn test_commit_tids_increase() {
        let first = next_commit_tid();
        let second = next_commit_tid();
        assert!(second > first);
        assert_eq!((second - first) % INCREMENT_VALUE, 0);
    }
}
