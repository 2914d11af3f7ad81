//! Eventually-consistent iteration over a live `CMap`.
//!
//! There is no snapshot: the iterator walks whatever table is current when
//! each step runs, so entries inserted, removed, or migrated concurrently
//! may or may not be observed, and never more than once per still-occupied
//! slot at the moment it is visited.

use std::hash::Hash;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Guard};

use super::map::CMap;
use super::slot::SlotState;
use super::table::Table;

pub struct Iter<'a, K, V, S> {
    map: &'a CMap<K, V, S>,
    guard: Guard,
    idx: usize,
}

impl<'a, K, V, S> Iter<'a, K, V, S>
where
    K: Hash + Eq,
{
    pub(crate) fn new(map: &'a CMap<K, V, S>) -> Self {
        Iter { map, guard: epoch::pin(), idx: 0 }
    }

    fn table(&self) -> &Table<K, V> {
        self.map.current_table(&self.guard)
    }
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let table = self.table();
            if self.idx >= table.len() {
                return None;
            }
            let slot = &table.slots[self.idx];
            self.idx += 1;
            // SAFETY: the slot was just observed Occupied under an Acquire
            // load while pinned; the epoch guard keeps this table's memory
            // alive for the duration of the clone. A concurrent remove may
            // tombstone the slot right after this check -- the entry is
            // still read from valid memory, it may just already be
            // logically gone by the time the caller sees it.
            if let SlotState::Occupied(_) = slot.load_state(Ordering::Acquire) {
                let key = unsafe { slot.key_ref() }.clone();
                let value = unsafe { slot.value_ref() }.clone();
                return Some((key, value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::map::CMap;
    use std::collections::HashSet;

    #[test]
    fn iterates_every_inserted_key_when_quiescent() {
        let map: CMap<u32, u32> = CMap::new();
        for i in 0..50u32 {
            map.emplace(i, i * 10);
        }
        let seen: HashSet<u32> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(seen.len(), 50);
        for i in 0..50u32 {
            assert!(seen.contains(&i));
        }
    }
}
