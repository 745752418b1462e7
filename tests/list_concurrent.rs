//! Multi-threaded behaviour of transactional lists.

extern crate crossbeam;
extern crate rand;
extern crate rayon;
extern crate rustcurrent;

use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use rand::Rng;
use rayon::prelude::*;
use rustcurrent::structures::List;
use rustcurrent::transaction::{atomically, Transaction, TxError};

#[test]
fn test_racing_inserts_of_one_key() {
    for _ in 0..50 {
        let list: Arc<List<u32>> = Arc::new(List::new());
        let barrier = Arc::new(Barrier::new(2));
        let successes = Arc::new(AtomicUsize::new(0));
        let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();
        for _ in 0..2 {
            let list = list.clone();
            let barrier = barrier.clone();
            let successes = successes.clone();
            wait_vec.push(thread::spawn(move || {
                barrier.wait();
                if atomically(|txn| list.trans_insert(txn, 7)).unwrap() {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in wait_vec {
            handle.join().unwrap();
        }
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(list.nontrans_size(), 1);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![7]);
    }
}

#[test]
fn test_pending_insert_blocks_other_thread() {
    let list: List<u32> = List::new();
    let mut owner = Transaction::new();
    assert_eq!(list.trans_insert(&mut owner, 7), Ok(true));

    crossbeam::thread::scope(|scope| {
        scope.spawn(|_| {
            let mut txn = Transaction::new();
            assert_eq!(list.trans_insert(&mut txn, 7), Err(TxError::Conflict));
            let mut txn = Transaction::new();
            assert_eq!(list.trans_find(&mut txn, &7), Err(TxError::Conflict));
        });
    }).unwrap();

    owner.commit().unwrap();
    crossbeam::thread::scope(|scope| {
        scope.spawn(|_| {
            assert_eq!(atomically(|txn| list.trans_insert(txn, 7)), Ok(false));
            assert_eq!(atomically(|txn| list.trans_find(txn, &7)), Ok(Some(7)));
        });
    }).unwrap();
}

#[test]
fn test_moves_preserve_size() {
    let list: List<u32> = List::new();
    for key in 0..32 {
        list.insert(key * 2);
    }

    crossbeam::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|_| {
                let mut rng = rand::thread_rng();
                for _ in 0..500 {
                    let from = rng.gen_range(0..64);
                    let to = rng.gen_range(0..64);
                    atomically(|txn| {
                        if from == to || list.trans_find(txn, &from)?.is_none() {
                            return Ok(false);
                        }
                        if !list.trans_insert(txn, to)? {
                            return Ok(false);
                        }
                        list.trans_delete(txn, &from)
                    }).unwrap();
                }
            });
        }
    }).unwrap();

    let contents: Vec<u32> = list.iter().collect();
    assert_eq!(contents.len(), 32);
    assert_eq!(list.nontrans_size(), 32);
    assert!(contents.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_size_agrees_with_iteration() {
    let list: List<u32> = List::new();
    let stop = AtomicUsize::new(0);

    crossbeam::thread::scope(|scope| {
        for t in 0..4 {
            let list = &list;
            let stop = &stop;
            scope.spawn(move |_| {
                for n in 0..400u32 {
                    let key = (n * 5 + t) % 48;
                    atomically(|txn| {
                        if list.trans_delete(txn, &key)? {
                            Ok(())
                        } else {
                            list.trans_insert(txn, key).map(|_| ())
                        }
                    }).unwrap();
                }
                stop.fetch_add(1, Ordering::SeqCst);
            });
        }
        for _ in 0..2 {
            scope.spawn(|_| {
                while stop.load(Ordering::SeqCst) < 4 {
                    let (size, seen) = atomically(|txn| {
                        let size = list.size(txn)?;
                        let seen = list.trans_iter(txn)?.collect::<Result<Vec<_>, _>>()?;
                        Ok((size, seen))
                    }).unwrap();
                    assert_eq!(size, seen.len());
                    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
                }
            });
        }
    }).unwrap();

    assert_eq!(list.nontrans_size(), list.iter().count());
}

#[test]
fn test_parallel_disjoint_inserts() {
    let list: List<u32> = List::new();
    (0..1000u32).into_par_iter().for_each(|key| {
        assert_eq!(atomically(|txn| list.trans_insert(txn, key)), Ok(true));
    });
    assert_eq!(list.nontrans_size(), 1000);
    assert_eq!(list.iter().collect::<Vec<_>>(), (0..1000).collect::<Vec<_>>());

    (0..1000u32).into_par_iter().filter(|key| key % 2 == 0).for_each(|key| {
        assert_eq!(atomically(|txn| list.trans_delete(txn, &key)), Ok(true));
    });
    assert_eq!(list.nontrans_size(), 500);
    assert!(list.iter().all(|key| key % 2 == 1));
}

#[test]
fn test_user_abort_is_not_retried() {
    let list: List<u32> = List::new();
    let attempts = AtomicUsize::new(0);
    let result: Result<bool, TxError> = atomically(|txn| {
        attempts.fetch_add(1, Ordering::SeqCst);
        list.trans_insert(txn, 1)?;
        Err(txn.abort(TxError::UserAbort))
    });
    assert_eq!(result, Err(TxError::UserAbort));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(list.is_empty());
}
