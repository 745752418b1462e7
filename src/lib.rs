//! A transactional linked list for Rust.
//!
//! This crate provides a sorted or unsorted linked list which can be used directly or
//! from inside optimistic transactions, together with the transaction manager it plugs
//! into and the deferred memory reclamation that keeps lock-free readers safe.
//!
//! * [`structures`] holds the `List` and the version words it is built on.
//! * [`transaction`] holds the `Transaction` type, its commit protocol and `atomically`.
//! * [`memory`] holds the epoch based reclamation used for unlinked nodes.

extern crate crossbeam;
extern crate parking_lot;
extern crate rand;
extern crate thiserror;
extern crate thread_local;
extern crate tracing;

pub mod structures;
pub mod memory;
pub mod transaction;
