//! `CMap`: the lock-free concurrent hash map.
//!
//! A current table pointer, cooperative migration triggered by load, and
//! probe-then-CAS inserts. Allocating the next table is arbitrated through
//! a `claim` table keyed by `log2(length)` rather than a single
//! `fetch_add` counter, and old tables are reclaimed through
//! `crossbeam_epoch` rather than raw `Box::into_raw`/`from_raw`.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use log::{debug, info, trace};

use crate::config::{MapConfig, CMAP_DEFAULT_LOAD_FACTOR, CMAP_MIN_CAPACITY};
use crate::error::Result;
use crate::hash::{fingerprint7, hash_of, home_bucket_concurrent, mix32};
use crate::probe::UnitProbe;

use super::iter::Iter;
use super::slot::SlotState;
use super::table::{log2, Table};

/// A lock-free hash map. Any number of threads may call its `&self` methods
/// concurrently; resizing is cooperative, not owned by a background thread
/// -- whichever caller first observes the load threshold allocates the next
/// table, and every caller that subsequently touches a table mid-migration
/// helps move a chunk of it before doing its own work.
pub struct CMap<K, V, S = RandomState> {
    current: Atomic<Table<K, V>>,
    claim: Box<[AtomicUsize]>,
    hash_builder: S,
    load_factor: f64,
    start: Instant,
}

impl<K, V> CMap<K, V, RandomState> {
    pub fn new() -> Self {
        MapConfig::new()
            .load_factor(CMAP_DEFAULT_LOAD_FACTOR)
            .build()
            .expect("default configuration is always valid")
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MapConfig::new()
            .capacity(capacity)
            .load_factor(CMAP_DEFAULT_LOAD_FACTOR)
            .build()
            .expect("capacity-only configuration is always valid")
    }

    pub fn try_with_config(config: MapConfig) -> Result<Self> {
        config.build()
    }
}

impl<K, V> Default for CMap<K, V, RandomState> {
    fn default() -> Self {
        CMap::new()
    }
}

impl MapConfig {
    /// Builds a `CMap` from this configuration.
    pub fn build<K, V>(&self) -> Result<CMap<K, V, RandomState>> {
        let (length, load_factor) = self.resolve(CMAP_MIN_CAPACITY)?;
        Ok(CMap {
            current: Atomic::new(Table::new(length, load_factor)),
            claim: new_claim_table(),
            hash_builder: RandomState::new(),
            load_factor,
            start: Instant::now(),
        })
    }
}

fn new_claim_table() -> Box<[AtomicUsize]> {
    (0..usize::BITS as usize).map(|i| AtomicUsize::new(1usize << i)).collect()
}

impl<K, V, S> CMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub fn with_hasher(hash_builder: S) -> Self {
        let length = CMAP_MIN_CAPACITY;
        CMap {
            current: Atomic::new(Table::new(length, CMAP_DEFAULT_LOAD_FACTOR)),
            claim: new_claim_table(),
            hash_builder,
            load_factor: CMAP_DEFAULT_LOAD_FACTOR,
            start: Instant::now(),
        }
    }

    #[inline]
    fn hash32<Q: Hash + ?Sized>(&self, key: &Q) -> u32 {
        mix32(hash_of(key, &self.hash_builder))
    }

    /// Current entry count across the live table. Eventually consistent
    /// with respect to any migration in flight.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        let table = unsafe { self.current.load(Ordering::Acquire, &guard).deref() };
        table.count.load(Ordering::Acquire).saturating_sub(table.tombstones.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `key`/`value` if `key` is not already present. Returns
    /// `false` without modifying the map if it was.
    pub fn emplace(&self, key: K, value: V) -> bool {
        let guard = epoch::pin();
        let h32 = self.hash32(&key);
        let f = fingerprint7(h32);
        let mut cur = self.current.load(Ordering::Acquire, &guard);
        loop {
            let table = unsafe { cur.deref() };
            if table.count.load(Ordering::Acquire) >= table.threshold {
                cur = self.migrate_step(cur, &guard);
                continue;
            }
            let home = home_bucket_concurrent(h32, table.mask);
            let mut moved_on = false;
            for idx in UnitProbe::new(home, table.mask).take(table.len()) {
                let slot = &table.slots[idx];
                let backoff = Backoff::new();
                loop {
                    match slot.load_state(Ordering::Acquire) {
                        SlotState::Empty | SlotState::Tombstone => {
                            let from = slot.load_state(Ordering::Acquire);
                            match slot.cas_state(
                                from,
                                SlotState::InProgress,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            ) {
                                Ok(()) => {
                                    unsafe { slot.write_key_value(key, value) };
                                    slot.store_state(SlotState::Occupied(f), Ordering::Release);
                                    table.count.fetch_add(1, Ordering::AcqRel);
                                    trace!("emplace: inserted at slot {idx}");
                                    return true;
                                }
                                Err(_) => continue,
                            }
                        }
                        SlotState::Occupied(g) if g == f && unsafe { slot.key_ref() } == &key => {
                            return false;
                        }
                        SlotState::Resizing => {
                            cur = self.migrate_step(cur, &guard);
                            moved_on = true;
                            break;
                        }
                        SlotState::InProgress => {
                            // Another thread is mid-transition on this exact
                            // slot. Spin on it rather than advance: if it
                            // resolves to our own key, advancing past it
                            // would let us insert a duplicate further down
                            // the probe.
                            backoff.snooze();
                            continue;
                        }
                        _ => break, // fingerprint mismatch: advance the probe
                    }
                }
                if moved_on {
                    break;
                }
            }
            if moved_on {
                continue;
            }
            // Exhausted the probe without an empty/tombstone slot: the table
            // is saturated with collisions ahead of its load threshold.
            // Force a resize rather than loop forever.
            debug!("emplace: probe exhausted on a table below threshold, forcing resize");
            cur = self.migrate_step(cur, &guard);
        }
    }

    /// Looks up `key`, cloning out its value.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let guard = epoch::pin();
        let h32 = self.hash32(key);
        let f = fingerprint7(h32);
        let mut cur = self.current.load(Ordering::Acquire, &guard);
        loop {
            let table = unsafe { cur.deref() };
            let home = home_bucket_concurrent(h32, table.mask);
            for idx in UnitProbe::new(home, table.mask).take(table.len()) {
                let slot = &table.slots[idx];
                match slot.load_state(Ordering::Acquire) {
                    SlotState::Empty => break,
                    SlotState::Occupied(g) if g == f && unsafe { slot.key_ref() }.borrow() == key => {
                        return Some(unsafe { slot.value_ref() }.clone());
                    }
                    SlotState::Resizing => {
                        cur = self.migrate_step(cur, &guard);
                        break;
                    }
                    _ => continue,
                }
            }
            if self.in_migration(table, &guard) {
                cur = self.migrate_step(cur, &guard);
                continue;
            }
            return None;
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = epoch::pin();
        let h32 = self.hash32(key);
        let f = fingerprint7(h32);
        let mut cur = self.current.load(Ordering::Acquire, &guard);
        loop {
            let table = unsafe { cur.deref() };
            let home = home_bucket_concurrent(h32, table.mask);
            for idx in UnitProbe::new(home, table.mask).take(table.len()) {
                let slot = &table.slots[idx];
                match slot.load_state(Ordering::Acquire) {
                    SlotState::Empty => break,
                    SlotState::Occupied(g) if g == f && unsafe { slot.key_ref() }.borrow() == key => {
                        return true;
                    }
                    SlotState::Resizing => {
                        cur = self.migrate_step(cur, &guard);
                        break;
                    }
                    _ => continue,
                }
            }
            if self.in_migration(table, &guard) {
                cur = self.migrate_step(cur, &guard);
                continue;
            }
            return false;
        }
    }

    /// Overwrites the value of an existing key in place. Returns `false`
    /// without effect if `key` is absent.
    pub fn update<Q>(&self, key: &Q, value: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = epoch::pin();
        let h32 = self.hash32(key);
        let f = fingerprint7(h32);
        let mut cur = self.current.load(Ordering::Acquire, &guard);
        loop {
            let table = unsafe { cur.deref() };
            let home = home_bucket_concurrent(h32, table.mask);
            for idx in UnitProbe::new(home, table.mask).take(table.len()) {
                let slot = &table.slots[idx];
                match slot.load_state(Ordering::Acquire) {
                    SlotState::Empty => break,
                    SlotState::Occupied(g) if g == f && unsafe { slot.key_ref() }.borrow() == key => {
                        if slot
                            .cas_state(SlotState::Occupied(g), SlotState::InProgress, Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                        {
                            // lost the race (concurrent remove/migrate); re-read the table from the top
                            break;
                        }
                        unsafe { slot.replace_value(value) };
                        slot.store_state(SlotState::Occupied(g), Ordering::Release);
                        return true;
                    }
                    SlotState::Resizing => {
                        cur = self.migrate_step(cur, &guard);
                        break;
                    }
                    _ => continue,
                }
            }
            if self.in_migration(table, &guard) {
                cur = self.migrate_step(cur, &guard);
                continue;
            }
            return false;
        }
    }

    /// Removes `key`, returning its value if present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = epoch::pin();
        let h32 = self.hash32(key);
        let f = fingerprint7(h32);
        let mut cur = self.current.load(Ordering::Acquire, &guard);
        loop {
            let table = unsafe { cur.deref() };
            let home = home_bucket_concurrent(h32, table.mask);
            for idx in UnitProbe::new(home, table.mask).take(table.len()) {
                let slot = &table.slots[idx];
                match slot.load_state(Ordering::Acquire) {
                    SlotState::Empty => break,
                    SlotState::Occupied(g) if g == f && unsafe { slot.key_ref() }.borrow() == key => {
                        if slot
                            .cas_state(SlotState::Occupied(g), SlotState::InProgress, Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                        {
                            break;
                        }
                        let (_, value) = unsafe { slot.take_key_value() };
                        slot.store_state(SlotState::Tombstone, Ordering::Release);
                        table.tombstones.fetch_add(1, Ordering::AcqRel);
                        return Some(value);
                    }
                    SlotState::Resizing => {
                        cur = self.migrate_step(cur, &guard);
                        break;
                    }
                    _ => continue,
                }
            }
            if self.in_migration(table, &guard) {
                cur = self.migrate_step(cur, &guard);
                continue;
            }
            return None;
        }
    }

    /// A snapshot-free view over whatever entries are visible at the time
    /// each step of iteration runs: concurrent writers
    /// may or may not be observed.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter::new(self)
    }

    #[inline]
    pub(crate) fn current_table<'g>(&self, guard: &'g Guard) -> &'g Table<K, V> {
        unsafe { self.current.load(Ordering::Acquire, guard).deref() }
    }

    fn in_migration(&self, table: &Table<K, V>, guard: &Guard) -> bool {
        !table.load_successor(Ordering::Acquire, guard).is_null()
    }

    /// Ensures a successor to `old` exists, allocating it and winning the
    /// `claim` ticket for its length if nobody has yet. Never does copy
    /// work itself; callers that need the migration to progress go through
    /// `migrate_step`.
    fn ensure_successor<'g>(&self, old: &Table<K, V>, guard: &'g Guard) -> Shared<'g, Table<K, V>> {
        let existing = old.load_successor(Ordering::Acquire, guard);
        if !existing.is_null() {
            return existing;
        }
        let newlen = old.len() * 2;
        let idx = log2(newlen);
        if self.claim[idx].compare_exchange(newlen, 0, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            debug!("ensure_successor: claimed allocation of length {newlen}");
            let new_table = Owned::new(Table::new(newlen, self.load_factor));
            match old.successor.compare_exchange(
                Shared::null(),
                new_table,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(installed) => installed,
                Err(e) => {
                    drop(e.new.into_box());
                    old.load_successor(Ordering::Acquire, guard)
                }
            }
        } else {
            let backoff = Backoff::new();
            loop {
                let s = old.load_successor(Ordering::Acquire, guard);
                if !s.is_null() {
                    break s;
                }
                backoff.snooze();
            }
        }
    }

    /// Ensures `old` has a successor, copies one bounded chunk of `old`
    /// into it, promotes the successor to `current` once every slot has
    /// been accounted for, and returns the table callers should retry
    /// against (the successor, or `current` if the migration just
    /// finished).
    fn migrate_step<'g>(&self, cur: Shared<'g, Table<K, V>>, guard: &'g Guard) -> Shared<'g, Table<K, V>> {
        let old = unsafe { cur.deref() };
        if old.migration_done.load(Ordering::Acquire) {
            return self.current.load(Ordering::Acquire, guard);
        }
        let successor = self.ensure_successor(old, guard);
        let new = unsafe { successor.deref() };
        let oldlen = old.len();
        const CHUNK: usize = 1024;
        let start = old.copy_idx.fetch_add(CHUNK, Ordering::AcqRel);
        if start < oldlen {
            let end = (start + CHUNK).min(oldlen);
            let mut done_here = 0usize;
            for i in start..end {
                if self.copy_slot(old, new, i) {
                    done_here += 1;
                }
            }
            if done_here > 0 {
                let total = old.copy_done.fetch_add(done_here, Ordering::AcqRel) + done_here;
                if total >= oldlen {
                    self.promote(cur, successor, guard);
                }
            }
        }
        if old.migration_done.load(Ordering::Acquire) {
            self.current.load(Ordering::Acquire, guard)
        } else {
            successor
        }
    }

    fn copy_slot(&self, old: &Table<K, V>, new: &Table<K, V>, idx: usize) -> bool {
        let slot = &old.slots[idx];
        loop {
            let state = slot.load_state(Ordering::Acquire);
            match state {
                SlotState::Resizing => return false,
                SlotState::InProgress => {
                    std::hint::spin_loop();
                    continue;
                }
                SlotState::Empty | SlotState::Tombstone => {
                    match slot.cas_state(state, SlotState::Resizing, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(()) => return true,
                        Err(_) => continue,
                    }
                }
                SlotState::Occupied(_) => {
                    match slot.cas_state(state, SlotState::Resizing, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(()) => {
                            let (key, value) = unsafe { slot.take_key_value() };
                            self.insert_forwarded(new, key, value);
                            return true;
                        }
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    /// Places a forwarded entry into a freshly allocated successor table.
    /// Only empty slots are candidates: every key is forwarded at most once
    /// by construction, so no equality check against existing occupants is
    /// needed.
    fn insert_forwarded(&self, new: &Table<K, V>, key: K, value: V) {
        let h32 = self.hash32(&key);
        let f = fingerprint7(h32);
        let home = home_bucket_concurrent(h32, new.mask);
        for idx in UnitProbe::new(home, new.mask).take(new.len()) {
            let slot = &new.slots[idx];
            if slot.load_state(Ordering::Acquire) == SlotState::Empty
                && slot
                    .cas_state(SlotState::Empty, SlotState::InProgress, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                unsafe { slot.write_key_value(key, value) };
                slot.store_state(SlotState::Occupied(f), Ordering::Release);
                new.count.fetch_add(1, Ordering::AcqRel);
                return;
            }
        }
        unreachable!("successor table exhausted while forwarding a migrated entry");
    }

    fn promote<'g>(&self, old: Shared<'g, Table<K, V>>, new: Shared<'g, Table<K, V>>, guard: &'g Guard) {
        if self
            .current
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire, guard)
            .is_ok()
        {
            let old_ref = unsafe { old.deref() };
            old_ref.migration_done.store(true, Ordering::Release);
            info!(
                "promote: migration complete after {:.3}s, new length {}",
                self.start.elapsed().as_secs_f64(),
                unsafe { new.deref() }.len()
            );
            unsafe { guard.defer_destroy(old) };
        }
    }
}

impl<K, V, S> Drop for CMap<K, V, S> {
    fn drop(&mut self) {
        let guard = unsafe { epoch::unprotected() };
        let cur = self.current.swap(Shared::null(), Ordering::Relaxed, guard);
        if !cur.is_null() {
            unsafe { drop(cur.into_owned()) };
        }
    }
}

impl<K, V, S> fmt::Debug for CMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CMap").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn emplace_get_remove_roundtrip() {
        let map: CMap<String, i32> = CMap::new();
        assert!(map.emplace("a".to_string(), 1));
        assert!(!map.emplace("a".to_string(), 2));
        assert_eq!(map.get("a"), Some(1));
        assert!(map.update("a", 9));
        assert_eq!(map.get("a"), Some(9));
        assert_eq!(map.remove("a"), Some(9));
        assert_eq!(map.get("a"), None);
        assert!(!map.contains("a"));
    }

    #[test]
    fn resize_across_threshold() {
        let map: CMap<u64, u64> = CMap::with_capacity(16);
        for i in 0..10_000u64 {
            assert!(map.emplace(i, i * 2));
        }
        assert_eq!(map.len(), 10_000);
        for i in 0..10_000u64 {
            assert_eq!(map.get(&i), Some(i * 2));
        }
    }

    #[test]
    fn concurrent_emplace_across_threads() {
        let map = Arc::new(CMap::<u64, u64>::with_capacity(16));
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..2_000u64 {
                    let k = t * 2_000 + i;
                    map.emplace(k, k);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 16_000);
        for k in 0..16_000u64 {
            assert_eq!(map.get(&k), Some(k));
        }
    }
}
