//! The generation of storage CMap is currently backed by, plus the
//! bookkeeping a cooperative migration needs to track progress. The
//! successor link is a `crossbeam_epoch::Atomic` rather than a raw
//! `AtomicPtr`, so an old table can be reclaimed once no guard can still
//! observe it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

use super::slot::Slot;

pub(crate) struct Table<K, V> {
    pub(crate) slots: Box<[Slot<K, V>]>,
    pub(crate) mask: usize,
    pub(crate) threshold: usize,
    pub(crate) count: AtomicUsize,
    pub(crate) tombstones: AtomicUsize,
    pub(crate) successor: Atomic<Table<K, V>>,
    pub(crate) copy_idx: AtomicUsize,
    pub(crate) copy_done: AtomicUsize,
    pub(crate) migration_done: AtomicBool,
}

impl<K, V> Table<K, V> {
    pub(crate) fn new(length: usize, load_factor: f64) -> Self {
        debug_assert!(length.is_power_of_two());
        let mut slots = Vec::with_capacity(length);
        slots.resize_with(length, Slot::new);
        Table {
            slots: slots.into_boxed_slice(),
            mask: length - 1,
            threshold: ((length as f64) * load_factor).floor() as usize,
            count: AtomicUsize::new(0),
            tombstones: AtomicUsize::new(0),
            successor: Atomic::null(),
            copy_idx: AtomicUsize::new(0),
            copy_done: AtomicUsize::new(0),
            migration_done: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn load_successor<'g>(&self, order: Ordering, guard: &'g Guard) -> Shared<'g, Table<K, V>> {
        self.successor.load(order, guard)
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // Key/value teardown for occupied slots is `Slot::drop`'s job, run
        // when `self.slots` drops right after this; doing it here too
        // would double-drop every live entry.
        //
        // At this point the table has no observers left (it was either
        // never published, or reached us through `defer_destroy`), so a
        // plain unprotected load/teardown of the successor link is sound.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let succ = self.successor.swap(Shared::null(), Ordering::Relaxed, guard);
        if !succ.is_null() {
            unsafe { drop(succ.into_owned()) };
        }
    }
}

#[inline]
pub(crate) fn log2(n: usize) -> usize {
    debug_assert!(n.is_power_of_two());
    n.trailing_zeros() as usize
}
