use std::any::Any;
use std::fmt;
use crate::structures::utils::version;
use super::Shared;

pub type Flags = u16;

pub const READ_BIT: Flags = 1 << 0;
pub const WRITE_BIT: Flags = 1 << 1;
pub const LOCKED_BIT: Flags = 1 << 2;
/// First flag bit free for the owning structure.
pub const USER0_BIT: Flags = 1 << 8;

const INTERNAL_MASK: Flags = USER0_BIT - 1;

/// Identifies what an item refers to inside its owner: usually a node address, or one
/// of a few small sentinel values that no allocation can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemKey(usize);

impl ItemKey {
    pub const fn sentinel(n: usize) -> Self {
        ItemKey(n)
    }

    pub fn from_ptr<N>(ptr: *const N) -> Self {
        ItemKey(ptr as usize)
    }

    pub fn as_ptr<N>(&self) -> *mut N {
        self.0 as *mut N
    }
}

/// The record a transaction keeps for one (structure, key) pair it touched.
///
/// Created on the first access within a transaction, updated on every later access to
/// the same key, and handed back to its owner exactly once per commit phase.
pub struct TransItem<'a> {
    pub(crate) owner: &'a (dyn Shared + 'a),
    key: ItemKey,
    flags: Flags,
    read_version: u64,
    write: Option<Box<dyn Any>>,
    stash: Option<Box<dyn Any>>
}

impl<'a> TransItem<'a> {
    pub(crate) fn new(owner: &'a (dyn Shared + 'a), key: ItemKey) -> Self {
        TransItem {
            owner,
            key,
            flags: 0,
            read_version: 0,
            write: None,
            stash: None
        }
    }

    pub fn key(&self) -> ItemKey {
        self.key
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn has_read(&self) -> bool {
        self.flags & READ_BIT != 0
    }

    pub fn has_write(&self) -> bool {
        self.flags & WRITE_BIT != 0
    }

    pub fn is_locked(&self) -> bool {
        self.flags & LOCKED_BIT != 0
    }

    /// Record a version read by this transaction, to be validated at commit.
    ///
    /// Returns false, without recording anything, if the version was locked by another
    /// thread when it was read: the data behind it may have been mid-update.
    /// Only the first observation of an item is kept.
    pub fn observe(&mut self, version: u64) -> bool {
        if version::is_locked_elsewhere(version) {
            return false;
        }
        if !self.has_read() {
            self.read_version = version;
            self.flags |= READ_BIT;
        }
        true
    }

    pub fn read_value(&self) -> u64 {
        self.read_version
    }

    pub fn add_write<V: Any>(&mut self, value: V) -> &mut Self {
        self.write = Some(Box::new(value));
        self.flags |= WRITE_BIT;
        self
    }

    pub fn write_value<V: Any>(&self) -> Option<&V> {
        self.write.as_ref().and_then(|value| value.downcast_ref::<V>())
    }

    pub fn take_write<V: Any>(&mut self) -> Option<V> {
        match self.write.take() {
            Some(value) => match value.downcast::<V>() {
                Ok(v) => Some(*v),
                Err(other) => {
                    self.write = Some(other);
                    None
                }
            },
            None => None
        }
    }

    /// Drop the pending write and its value.
    pub fn clear_write(&mut self) -> &mut Self {
        self.write = None;
        self.flags &= !WRITE_BIT;
        self
    }

    pub fn remove_read(&mut self) -> &mut Self {
        self.flags &= !READ_BIT;
        self
    }

    pub fn remove_write(&mut self) -> &mut Self {
        self.flags &= !WRITE_BIT;
        self
    }

    pub fn add_flags(&mut self, flags: Flags) -> &mut Self {
        self.flags |= flags & !INTERNAL_MASK;
        self
    }

    /// Replace every owner-defined flag with `flags`, leaving read/write state alone.
    pub fn assign_flags(&mut self, flags: Flags) -> &mut Self {
        self.flags = (self.flags & INTERNAL_MASK) | (flags & !INTERNAL_MASK);
        self
    }

    pub fn clear_flags(&mut self, flags: Flags) -> &mut Self {
        self.flags &= !(flags & !INTERNAL_MASK);
        self
    }

    pub fn stash_value<V: Any + Clone>(&self, default: V) -> V {
        self.stash.as_ref()
            .and_then(|value| value.downcast_ref::<V>())
            .cloned()
            .unwrap_or(default)
    }

    pub fn set_stash<V: Any>(&mut self, value: V) -> &mut Self {
        self.stash = Some(Box::new(value));
        self
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        if locked {
            self.flags |= LOCKED_BIT;
        } else {
            self.flags &= !LOCKED_BIT;
        }
    }
}

impl<'a> fmt::Debug for TransItem<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TransItem {{ key: {:?}, flags: {:#06x}, read_version: {:#x}, write: {}, stash: {} }}",
               self.key, self.flags, self.read_version, self.write.is_some(), self.stash.is_some())
    }
}
