use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering, fence};
use std::cmp::{self, Ordering as CmpOrdering};
use std::marker::PhantomData;
use std::fmt::{self, Debug};
use std::{mem, ptr};
use crossbeam::epoch::{self, Guard};
use crate::memory::{EpochManager, Reclaim};
use crate::transaction::{next_commit_tid, Flags, ItemKey, Shared, TransItem, Transaction, TxError, USER0_BIT};
use super::config::{Compare, ListConfig, NaturalOrder};
use super::utils::version::{SpinGuard, SpinLock, TVersion, INITIALIZED_VERSION};

/// Item flag: this transaction inserted the node.
pub const INSERT_BIT: Flags = USER0_BIT;
/// Item flag: this transaction deletes the node.
pub const DELETE_BIT: Flags = USER0_BIT << 1;
/// Item flag: this transaction deleted the node and then inserted an equal element,
/// which commits as an in-place update.
pub const DOUPDATE_BIT: Flags = USER0_BIT << 2;

// Sentinel keys, never valid node addresses
const LIST_KEY: ItemKey = ItemKey::sentinel(0);
const SIZE_KEY: ItemKey = ItemKey::sentinel(1);

/// What a transaction has done so far to one node, derived from its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Untouched,
    Read,
    Insert,
    Delete,
    DeleteThenInsert
}

struct Node<T> {
    val: AtomicPtr<T>,
    next: AtomicPtr<Node<T>>,
    vers: TVersion
}

impl<T> Node<T> {
    fn new_as_pointer(val: T, next: *mut Node<T>, txnal: bool) -> *mut Self {
        let vers = if txnal {
            // Nobody else may treat it as present until the inserting transaction commits
            TVersion::new_locked_invalid()
        } else {
            TVersion::new(INITIALIZED_VERSION)
        };
        Box::into_raw(Box::new(Node {
            val: AtomicPtr::new(Box::into_raw(Box::new(val))),
            next: AtomicPtr::new(next),
            vers
        }))
    }

    /// # Safety
    /// The caller must be pinned, or otherwise know that the value cannot be retired
    /// for the lifetime `'g`.
    unsafe fn value<'g>(&self) -> &'g T {
        &*self.val.load(Ordering::Acquire)
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        let val = *self.val.get_mut();
        if !val.is_null() {
            unsafe { drop(Box::from_raw(val)); }
        }
    }
}

/// Result of linking an element into the node chain.
enum Inserted<T> {
    /// A new node was linked in.
    Fresh(*mut Node<T>),
    /// An equal element was already there; the element is handed back.
    Existing(*mut Node<T>, T)
}

/// A linked list usable both directly and from inside transactions.
///
/// Direct (non-transactional) operations serialise on a list-wide spin lock and take
/// effect immediately. Transactional operations are optimistic: they read without locks,
/// record what they saw as items of the [`Transaction`], and only publish their effects
/// when the transaction commits through the [`Shared`] implementation below.
///
/// Every node carries a version word combining a lock bit, an invalid bit and a
/// timestamp. A node inserted by a transaction is linked in straight away but stays
/// invalid, and locked by its creator, until that transaction commits; other
/// transactions that run into it abort. A node deleted by a transaction stays valid until
/// commit, when it is marked invalid, unlinked and retired through the list's
/// [`Reclaim`] implementation. A separate size version is bumped on every committed
/// insert or delete, direct ones included, so lookups that found nothing and size queries can be validated.
///
/// The comparator defines the order of a sorted list and which elements are duplicates.
///
/// # Examples
/// ```
/// use rustcurrent::structures::List;
/// use rustcurrent::transaction::Transaction;
///
/// let list: List<u32> = List::new();
/// assert!(list.insert(4));
/// assert!(!list.insert(4));
///
/// let mut txn = Transaction::new();
/// assert_eq!(list.trans_delete(&mut txn, &4), Ok(true));
/// assert_eq!(list.trans_insert(&mut txn, 4), Ok(true));
/// txn.commit().unwrap();
/// assert_eq!(list.nontrans_size(), 1);
/// ```
pub struct List<T, C = NaturalOrder, R = EpochManager> {
    head: AtomicPtr<Node<T>>,
    listsize: AtomicIsize,
    listlock: SpinLock,
    sizeversion: TVersion,
    comp: C,
    config: ListConfig,
    manager: R,
    marker: PhantomData<Box<Node<T>>>
}

unsafe impl<T: Send + Sync, C: Send, R: Send> Send for List<T, C, R> {}
unsafe impl<T: Send + Sync, C: Sync, R: Sync> Sync for List<T, C, R> {}

impl<T> List<T>
where T: Ord + Send + Sync + 'static
{
    /// Create a sorted list without duplicates, ordered by `Ord`.
    pub fn new() -> Self {
        List::with_config(ListConfig::default())
    }

    pub fn with_config(config: ListConfig) -> Self {
        List::with_parts(config, NaturalOrder, EpochManager::default())
    }
}

impl<T, C, R> List<T, C, R>
where T: Send + Sync + 'static,
      C: Compare<T>,
      R: Reclaim
{
    /// Create a list from its policy objects: the configuration, the comparator and
    /// the reclaimer used for unlinked nodes.
    pub fn with_parts(config: ListConfig, comp: C, manager: R) -> Self {
        List {
            head: AtomicPtr::default(),
            listsize: AtomicIsize::new(0),
            listlock: SpinLock::new(),
            sizeversion: TVersion::new(INITIALIZED_VERSION),
            comp,
            config,
            manager,
            marker: PhantomData
        }
    }

    pub fn config(&self) -> &ListConfig {
        &self.config
    }

    pub fn reclaimer(&self) -> &R {
        &self.manager
    }

    /// Scan for the first node comparing equal to `elem`, valid or not. A sorted scan
    /// gives up as soon as it passes the place `elem` would be.
    fn find_node(&self, elem: &T, guard: &Guard) -> *mut Node<T> {
        self.find_node_where(elem, |_| true, guard)
    }

    fn find_node_where<F>(&self, elem: &T, accept: F, _guard: &Guard) -> *mut Node<T>
    where F: Fn(&Node<T>) -> bool
    {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            match self.comp.compare(unsafe { node.value() }, elem) {
                CmpOrdering::Equal if accept(node) => return cur,
                CmpOrdering::Greater if self.config.sorted => return ptr::null_mut(),
                _ => {}
            }
            cur = node.next.load(Ordering::Acquire);
        }
        ptr::null_mut()
    }

    /// Link `elem` in under the structural lock. Transactional inserts create the node
    /// invalid and locked by this thread, and leave the size counter alone.
    fn insert_node(&self, elem: T, txnal: bool, _guard: &Guard) -> Inserted<T> {
        let _held = self.listlock.lock();
        if !self.config.sorted && self.config.duplicates {
            let node = Node::new_as_pointer(elem, self.head.load(Ordering::Relaxed), txnal);
            self.head.store(node, Ordering::Release);
            if !txnal {
                self.listsize.fetch_add(1, Ordering::AcqRel);
            }
            return Inserted::Fresh(node);
        }

        let mut prev: *mut Node<T> = ptr::null_mut();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            let c = self.comp.compare(unsafe { node.value() }, &elem);
            if !self.config.duplicates && c == CmpOrdering::Equal {
                return Inserted::Existing(cur, elem);
            } else if self.config.sorted && c != CmpOrdering::Less {
                break;
            }
            prev = cur;
            cur = node.next.load(Ordering::Acquire);
        }

        let node = Node::new_as_pointer(elem, cur, txnal);
        if prev.is_null() {
            self.head.store(node, Ordering::Release);
        } else {
            unsafe { (*prev).next.store(node, Ordering::Release); }
        }
        if !txnal {
            self.listsize.fetch_add(1, Ordering::AcqRel);
        }
        Inserted::Fresh(node)
    }

    /// Unlink and retire the first node satisfying `found`. The caller proves it holds
    /// the structural lock by passing the guard.
    fn remove_where<F>(&self, _held: &SpinGuard<'_>, mut found: F, txnal: bool, guard: &Guard) -> bool
    where F: FnMut(&Node<T>) -> bool
    {
        let mut prev: *mut Node<T> = ptr::null_mut();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            let next = node.next.load(Ordering::Acquire);
            if found(node) {
                node.vers.mark_invalid();
                if prev.is_null() {
                    self.head.store(next, Ordering::Release);
                } else {
                    unsafe { (*prev).next.store(next, Ordering::Release); }
                }
                // Concurrent lock-free scanners may still be standing on this node
                unsafe { self.manager.retire(guard, cur); }
                if !txnal {
                    self.listsize.fetch_sub(1, Ordering::AcqRel);
                }
                return true;
            }
            prev = cur;
            cur = next;
        }
        false
    }

    fn remove_node(&self, target: *mut Node<T>, guard: &Guard) -> bool {
        let held = self.listlock.lock();
        self.remove_where(&held, |node| ptr::eq(node, target), true, guard)
    }

    /// Insert outside of any transaction. Returns false if an equal element is already
    /// present and the list does not allow duplicates.
    /// # Examples
    /// ```
    /// use rustcurrent::structures::List;
    /// let list: List<u8> = List::new();
    /// assert!(list.insert(1));
    /// assert!(!list.insert(1));
    /// ```
    pub fn insert(&self, elem: T) -> bool {
        let guard = epoch::pin();
        self.with_size_version(|| match self.insert_node(elem, false, &guard) {
            Inserted::Fresh(_) => true,
            Inserted::Existing(..) => false
        })
    }

    /// Remove the first committed element equal to `elem` outside of any transaction.
    pub fn remove(&self, elem: &T) -> bool {
        let guard = epoch::pin();
        let comp = &self.comp;
        self.with_size_version(|| {
            let held = self.listlock.lock();
            self.remove_where(&held, |node| {
                node.vers.is_valid() && comp.compare(unsafe { node.value() }, elem) == CmpOrdering::Equal
            }, false, &guard)
        })
    }

    /// Run a direct update with the size version locked, and bump it if the update
    /// changed the list, so running transactions that depend on it fail validation.
    /// The size version is always taken before the structural lock, as commits do.
    fn with_size_version<F>(&self, update: F) -> bool
    where F: FnOnce() -> bool
    {
        self.sizeversion.lock();
        let changed = update();
        if changed {
            self.bump_size_version(next_commit_tid());
        }
        self.sizeversion.unlock();
        changed
    }

    /// Number of committed elements, ignoring any transaction in flight.
    pub fn nontrans_size(&self) -> usize {
        cmp::max(self.listsize.load(Ordering::Acquire), 0) as usize
    }

    /// True if there is no committed element. Pending inserts of running transactions
    /// do not count.
    pub fn is_empty(&self) -> bool {
        let _guard = epoch::pin();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            if node.vers.is_valid() {
                return false;
            }
            cur = node.next.load(Ordering::Acquire);
        }
        true
    }

    /// Free every node right away. Taking `&mut self` guarantees that no reader or
    /// transaction can still reach them.
    pub fn clear(&mut self) {
        let mut cur = mem::replace(self.head.get_mut(), ptr::null_mut());
        while !cur.is_null() {
            let mut node = unsafe { Box::from_raw(cur) };
            cur = *node.next.get_mut();
        }
        *self.listsize.get_mut() = 0;
    }

    fn has_insert(item: &TransItem<'_>) -> bool {
        item.has_write() && !Self::has_delete(item) && !Self::has_doupdate(item)
    }

    fn has_delete(item: &TransItem<'_>) -> bool {
        item.flags() & DELETE_BIT != 0
    }

    fn has_doupdate(item: &TransItem<'_>) -> bool {
        item.flags() & DOUPDATE_BIT != 0
    }

    /// The state of a node within the transaction holding `item`.
    pub fn state_of(item: &TransItem<'_>) -> NodeState {
        if Self::has_delete(item) {
            NodeState::Delete
        } else if Self::has_doupdate(item) {
            NodeState::DeleteThenInsert
        } else if Self::has_insert(item) {
            NodeState::Insert
        } else if item.has_read() {
            NodeState::Read
        } else {
            NodeState::Untouched
        }
    }

    /// A node may be looked at if it is committed, or if this transaction inserted it.
    fn validity_check(node: &Node<T>, item: &TransItem<'_>) -> bool {
        node.vers.is_valid() || item.flags() & INSERT_BIT != 0
    }

    fn bump_size_version(&self, commit_tid: u64) {
        if self.config.opacity {
            self.sizeversion.set_version(commit_tid);
        } else {
            self.sizeversion.inc_nonopaque_version();
        }
    }

    /// # Safety
    /// `item` must be keyed by a node of this list and the caller's transaction must
    /// still be pinned.
    unsafe fn node_of<'n>(item: &TransItem<'_>) -> &'n Node<T> {
        &*item.key().as_ptr::<Node<T>>()
    }
}

impl<T, C, R> List<T, C, R>
where T: Clone + Send + Sync + 'static,
      C: Compare<T> + Sync,
      R: Reclaim
{
    /// Look up a committed element outside of any transaction.
    pub fn find(&self, elem: &T) -> Option<T> {
        let guard = epoch::pin();
        let n = self.find_node_where(elem, |node| node.vers.is_valid(), &guard);
        if n.is_null() {
            None
        } else {
            Some(unsafe { (*n).value() }.clone())
        }
    }

    /// Iterate over the committed elements, outside of any transaction.
    pub fn iter(&self) -> Iter<'_, T> {
        let guard = epoch::pin();
        let cur = self.head.load(Ordering::Acquire);
        Iter {
            _guard: guard,
            cur,
            marker: PhantomData
        }
    }

    /// Record that this transaction depends on the list's size version being `readv`.
    fn verify_list<'a>(&'a self, txn: &mut Transaction<'a>, readv: u64) -> Result<(), TxError> {
        if !txn.item(self, LIST_KEY).observe(readv) {
            return Err(txn.abort(TxError::Conflict));
        }
        fence(Ordering::Acquire);
        Ok(())
    }

    fn add_lock_list_item<'a>(&'a self, txn: &mut Transaction<'a>) {
        txn.item(self, LIST_KEY).add_write(());
    }

    fn add_trans_size_offs<'a>(&'a self, txn: &mut Transaction<'a>, size_offs: i64) {
        let item = txn.item(self, SIZE_KEY);
        let current = item.stash_value::<i64>(0);
        item.set_stash(current + size_offs);
    }

    fn trans_size_offs<'a>(&'a self, txn: &Transaction<'a>) -> i64 {
        txn.check_item(self, SIZE_KEY).map_or(0, |item| item.stash_value::<i64>(0))
    }

    /// Look up `elem` inside `txn`.
    ///
    /// A hit records the node's version; a miss records the list's size version, so a
    /// concurrent commit inserting `elem` invalidates this transaction.
    ///
    /// # Errors
    /// `TxError::Conflict` if the node found belongs to another transaction's pending
    /// insert, or is locked by a committing transaction. The transaction is aborted.
    pub fn trans_find<'a>(&'a self, txn: &mut Transaction<'a>, elem: &T) -> Result<Option<T>, TxError> {
        txn.check_active()?;
        let listv = self.sizeversion.snapshot();
        let n = self.find_node(elem, txn.guard());
        if n.is_null() {
            self.verify_list(txn, listv)?;
            return Ok(None);
        }

        let node = unsafe { &*n };
        let version = node.vers.snapshot();
        let item = txn.item(self, ItemKey::from_ptr(n));
        if !Self::validity_check(node, item) {
            return Err(txn.abort(TxError::Conflict));
        }
        match Self::state_of(item) {
            NodeState::Delete => Ok(None),
            NodeState::DeleteThenInsert => Ok(item.write_value::<T>().cloned()),
            NodeState::Untouched | NodeState::Read | NodeState::Insert => {
                if !item.observe(version) {
                    return Err(txn.abort(TxError::Conflict));
                }
                Ok(Some(unsafe { node.value() }.clone()))
            }
        }
    }

    /// Insert `elem` inside `txn`. Returns false if an equal element is already visible
    /// to the transaction.
    ///
    /// Inserting over an element this transaction deleted becomes an update of that
    /// node, applied at commit.
    ///
    /// # Errors
    /// `TxError::Conflict` if an equal element is pending in another transaction.
    pub fn trans_insert<'a>(&'a self, txn: &mut Transaction<'a>, elem: T) -> Result<bool, TxError> {
        txn.check_active()?;
        let (n, elem) = match self.insert_node(elem, true, txn.guard()) {
            Inserted::Fresh(n) => {
                self.add_trans_size_offs(txn, 1);
                self.add_lock_list_item(txn);
                txn.item(self, ItemKey::from_ptr(n)).add_write(()).add_flags(INSERT_BIT);
                return Ok(true);
            },
            Inserted::Existing(n, elem) => (n, elem)
        };

        let node = unsafe { &*n };
        let version = node.vers.snapshot();
        let item = txn.item(self, ItemKey::from_ptr(n));
        if !Self::validity_check(node, item) {
            return Err(txn.abort(TxError::Conflict));
        }
        match Self::state_of(item) {
            NodeState::Insert | NodeState::DeleteThenInsert => Ok(false),
            NodeState::Delete => {
                // The delete already observed the node's version
                item.clear_write().add_write(elem);
                item.assign_flags(DOUPDATE_BIT);
                self.add_trans_size_offs(txn, 1);
                Ok(true)
            },
            NodeState::Untouched | NodeState::Read => {
                // A failed insert still depends on the element being there at commit
                if !item.observe(version) {
                    return Err(txn.abort(TxError::Conflict));
                }
                Ok(false)
            }
        }
    }

    /// Delete `elem` inside `txn`. Returns false if no such element is visible to the
    /// transaction.
    ///
    /// Deleting an element this transaction inserted undoes the insert on the spot.
    ///
    /// # Errors
    /// `TxError::Conflict` if the element found is pending in another transaction.
    pub fn trans_delete<'a>(&'a self, txn: &mut Transaction<'a>, elem: &T) -> Result<bool, TxError> {
        txn.check_active()?;
        let listv = self.sizeversion.snapshot();
        let n = self.find_node(elem, txn.guard());
        if n.is_null() {
            self.verify_list(txn, listv)?;
            return Ok(false);
        }

        let node = unsafe { &*n };
        let version = node.vers.snapshot();
        let item = txn.item(self, ItemKey::from_ptr(n));
        if !Self::validity_check(node, item) {
            return Err(txn.abort(TxError::Conflict));
        }
        match Self::state_of(item) {
            NodeState::Delete => Ok(false),
            NodeState::DeleteThenInsert => {
                item.clear_write().add_write(());
                item.assign_flags(DELETE_BIT);
                self.add_trans_size_offs(txn, -1);
                Ok(true)
            },
            NodeState::Insert => {
                item.remove_read().remove_write().clear_flags(INSERT_BIT);
                self.remove_node(n, txn.guard());
                self.add_trans_size_offs(txn, -1);
                // Nobody else may insert the element before we commit either
                self.verify_list(txn, listv)?;
                Ok(true)
            },
            NodeState::Untouched | NodeState::Read => {
                if !item.observe(version) {
                    return Err(txn.abort(TxError::Conflict));
                }
                item.assign_flags(DELETE_BIT);
                item.add_write(());
                self.add_lock_list_item(txn);
                self.add_trans_size_offs(txn, -1);
                Ok(true)
            }
        }
    }

    /// Number of elements as seen by `txn`, including its own pending inserts and
    /// deletes.
    pub fn size<'a>(&'a self, txn: &mut Transaction<'a>) -> Result<usize, TxError> {
        txn.check_active()?;
        let listv = self.sizeversion.snapshot();
        self.verify_list(txn, listv)?;
        let size = self.listsize.load(Ordering::Acquire) as i64 + self.trans_size_offs(txn);
        Ok(cmp::max(size, 0) as usize)
    }

    /// Iterate over the elements visible to `txn`.
    ///
    /// The size version is validated once, up front, so any committed insert or delete
    /// invalidates the transaction. Elements this transaction deleted are skipped and
    /// pending updates show their new value.
    pub fn trans_iter<'a, 't>(&'a self, txn: &'t mut Transaction<'a>) -> Result<TransIter<'a, 't, T, C, R>, TxError> {
        txn.check_active()?;
        let listv = self.sizeversion.snapshot();
        self.verify_list(txn, listv)?;
        let cur = self.head.load(Ordering::Acquire);
        Ok(TransIter {
            list: self,
            txn,
            cur,
            failed: false
        })
    }
}

impl<T, C, R> Shared for List<T, C, R>
where T: Send + Sync + 'static,
      C: Compare<T> + Sync,
      R: Reclaim
{
    fn lock(&self, item: &mut TransItem<'_>, _txn: &Transaction<'_>) -> bool {
        if item.key() == LIST_KEY {
            self.sizeversion.try_lock_spin()
        } else if !Self::has_insert(item) {
            unsafe { Self::node_of(item) }.vers.try_lock_spin()
        } else {
            // Our own insert, already locked since creation
            true
        }
    }

    fn check(&self, item: &TransItem<'_>, _txn: &Transaction<'_>) -> bool {
        if item.key() == LIST_KEY {
            return self.sizeversion.check_version(item.read_value());
        }
        let node = unsafe { Self::node_of(item) };
        if !node.vers.is_valid() {
            return Self::has_insert(item);
        }
        node.vers.check_version(item.read_value())
    }

    fn install(&self, item: &mut TransItem<'_>, txn: &Transaction<'_>) {
        if item.key() == LIST_KEY {
            return;
        }
        let n = item.key().as_ptr::<Node<T>>();
        let node = unsafe { &*n };
        if Self::has_delete(item) {
            if self.remove_node(n, txn.guard()) {
                self.listsize.fetch_sub(1, Ordering::AcqRel);
            }
            self.bump_size_version(txn.commit_tid());
        } else if Self::has_doupdate(item) {
            if let Some(value) = item.take_write::<T>() {
                let old = node.val.swap(Box::into_raw(Box::new(value)), Ordering::AcqRel);
                unsafe { self.manager.retire(txn.guard(), old); }
            }
            node.vers.set_version(txn.commit_tid());
        } else {
            // Clears the invalid and lock bits taken at creation
            node.vers.set_version_unlock(txn.commit_tid());
            self.listsize.fetch_add(1, Ordering::AcqRel);
            self.bump_size_version(txn.commit_tid());
        }
    }

    fn unlock(&self, item: &mut TransItem<'_>) {
        if item.key() == LIST_KEY {
            self.sizeversion.unlock();
        } else if !Self::has_insert(item) {
            unsafe { Self::node_of(item) }.vers.unlock();
        }
    }

    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, txn: &Transaction<'_>) {
        if !committed && item.flags() & INSERT_BIT != 0 {
            // Never installed, so nobody else can have come to depend on it
            self.remove_node(item.key().as_ptr::<Node<T>>(), txn.guard());
        }
    }
}

impl<T, C, R> Drop for List<T, C, R> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            let mut node = unsafe { Box::from_raw(cur) };
            cur = *node.next.get_mut();
        }
    }
}

impl<T> Default for List<T>
where T: Ord + Send + Sync + 'static
{
    fn default() -> Self {
        List::new()
    }
}

impl<T: Debug, C, R> Debug for List<T, C, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let _guard = epoch::pin();
        let mut entries = Vec::new();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            entries.push(format!("{:?}{}", unsafe { node.value() },
                                 if node.vers.is_valid() { "" } else { " (invalid)" }));
            cur = node.next.load(Ordering::Acquire);
        }
        write!(f, "List(size: {}, [{}])", self.listsize.load(Ordering::Relaxed), entries.join(", "))
    }
}

/// Non-transactional iterator over the committed elements of a `List`.
pub struct Iter<'l, T> {
    _guard: Guard,
    cur: *mut Node<T>,
    marker: PhantomData<&'l T>
}

impl<'l, T: Clone> Iterator for Iter<'l, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while !self.cur.is_null() {
            let node = unsafe { &*self.cur };
            self.cur = node.next.load(Ordering::Acquire);
            if node.vers.is_valid() {
                return Some(unsafe { node.value() }.clone());
            }
        }
        None
    }
}

/// Transactional iterator over a `List`, created by [`List::trans_iter`].
///
/// Yields `Err` once, and then stops, if it meets an element pending in another
/// transaction; the transaction is aborted at that point.
pub struct TransIter<'a, 't, T, C, R> {
    list: &'a List<T, C, R>,
    txn: &'t mut Transaction<'a>,
    cur: *mut Node<T>,
    failed: bool
}

impl<'a, 't, T, C, R> Iterator for TransIter<'a, 't, T, C, R>
where T: Clone + Send + Sync + 'static,
      C: Compare<T> + Sync,
      R: Reclaim
{
    type Item = Result<T, TxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while !self.cur.is_null() {
            let node = unsafe { &*self.cur };
            let (own_insert, own_delete, pending) = match self.txn.check_item(self.list, ItemKey::from_ptr(self.cur)) {
                Some(item) => (
                    item.flags() & INSERT_BIT != 0,
                    List::<T, C, R>::has_delete(item),
                    item.write_value::<T>().cloned()
                ),
                None => (false, false, None)
            };
            if !node.vers.is_valid() && !own_insert {
                self.failed = true;
                return Some(Err(self.txn.abort(TxError::Conflict)));
            }
            self.cur = node.next.load(Ordering::Acquire);
            if own_delete {
                continue;
            }
            return Some(Ok(pending.unwrap_or_else(|| unsafe { node.value() }.clone())));
        }
        None
    }
}
