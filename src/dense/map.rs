//! `DenseMap`: the single-threaded, SIMD group-probed map variant.
//!
//! A swisstable-style split between a control-byte array (scanned 16 at a
//! time via `group`) and an entries array: there is no concurrent reader to
//! protect here, so a dense SIMD scan over plain bytes is strictly faster
//! than a per-slot atomic load.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;
use std::mem::MaybeUninit;

use crate::config::{MapConfig, DENSE_LOAD_FACTOR, DENSE_MIN_CAPACITY};
use crate::error::{MapError, Result};
use crate::hash::{control_byte, hash_of, home_group, mix32};
use crate::probe::GroupProbe;

use super::group::{self, EMPTY, GROUP_SIZE, TOMBSTONE};

pub struct DenseMap<K, V, S = RandomState> {
    ctrl: Vec<u8>,
    entries: Box<[MaybeUninit<(K, V)>]>,
    mask: usize,
    len: usize,
    tombstones: usize,
    load_factor: f64,
    hash_builder: S,
}

impl<K, V> DenseMap<K, V, RandomState> {
    pub fn try_new() -> Result<Self> {
        Self::try_with_config(MapConfig::new())
    }

    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        Self::try_with_config(MapConfig::new().capacity(capacity))
    }

    pub fn try_with_config(config: MapConfig) -> Result<Self> {
        if !group::hardware_supported() {
            return Err(MapError::HardwareUnsupported);
        }
        let (length, load_factor) = config.resolve(DENSE_MIN_CAPACITY)?;
        let length = length.next_multiple_of(GROUP_SIZE).max(GROUP_SIZE);
        Ok(DenseMap {
            ctrl: vec![EMPTY; length],
            entries: (0..length).map(|_| MaybeUninit::uninit()).collect(),
            mask: length - 1,
            len: 0,
            tombstones: 0,
            load_factor,
            hash_builder: RandomState::new(),
        })
    }
}

impl<K, V, S> DenseMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash32<Q: Hash + ?Sized>(&self, key: &Q) -> u32 {
        mix32(hash_of(key, &self.hash_builder))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn group_at(&self, idx: usize) -> &[u8; GROUP_SIZE] {
        self.ctrl[idx..idx + GROUP_SIZE].try_into().expect("group-aligned slice is 16 bytes")
    }

    fn threshold(&self) -> usize {
        (((self.mask + 1) as f64) * self.load_factor).floor() as usize
    }

    /// Inserts `key`/`value` if absent. Returns `false` without modifying
    /// the map if `key` was already present.
    pub fn emplace(&mut self, key: K, value: V) -> bool {
        if self.len + self.tombstones >= self.threshold() {
            self.grow();
        } else if self.tombstones > (self.mask + 1) / 8 {
            self.rehash_in_place();
        }
        let h32 = self.hash32(&key);
        let fp = control_byte(h32);
        let home = home_group(h32, self.mask);
        let mut first_available: Option<usize> = None;
        for group_idx in GroupProbe::new(home, self.mask).take((self.mask + 1) / GROUP_SIZE) {
            let group = self.group_at(group_idx);
            let mut candidates = group::match_byte(group, fp);
            while candidates != 0 {
                let lane = candidates.trailing_zeros() as usize;
                candidates &= candidates - 1;
                let i = group_idx + lane;
                if unsafe { self.entries[i].assume_init_ref() }.0 == key {
                    return false;
                }
            }
            if first_available.is_none() {
                let available = group::match_empty_or_tombstone(group);
                if available != 0 {
                    let lane = available.trailing_zeros() as usize;
                    first_available = Some(group_idx + lane);
                }
            }
            if group::match_empty(group) != 0 {
                break;
            }
        }
        let i = first_available.expect("load factor guarantees an available slot");
        if self.ctrl[i] == TOMBSTONE {
            self.tombstones -= 1;
        }
        self.ctrl[i] = fp;
        self.entries[i].write((key, value));
        self.len += 1;
        true
    }

    fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let h32 = self.hash32(key);
        let fp = control_byte(h32);
        let home = home_group(h32, self.mask);
        for group_idx in GroupProbe::new(home, self.mask).take((self.mask + 1) / GROUP_SIZE) {
            let group = self.group_at(group_idx);
            let mut candidates = group::match_byte(group, fp);
            while candidates != 0 {
                let lane = candidates.trailing_zeros() as usize;
                candidates &= candidates - 1;
                let i = group_idx + lane;
                if unsafe { self.entries[i].assume_init_ref() }.0.borrow() == key {
                    return Some(i);
                }
            }
            if group::match_empty(group) != 0 {
                return None;
            }
        }
        None
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|i| unsafe { &self.entries[i].assume_init_ref().1 })
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(move |i| unsafe { &mut self.entries[i].assume_init_mut().1 })
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Overwrites the value of an existing key in place. Returns `false`
    /// without effect if `key` is absent.
    pub fn update<Q>(&mut self, key: &Q, value: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.find(key) {
            Some(i) => {
                unsafe { self.entries[i].assume_init_mut() }.1 = value;
                true
            }
            None => false,
        }
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.find(key)?;
        // If the entry's own group still has an empty lane, probe chains
        // through it never needed to cross a tombstone to begin with, so
        // the slot can go straight back to EMPTY instead of accruing a
        // tombstone.
        let group_start = i - (i % GROUP_SIZE);
        if group::match_empty(self.group_at(group_start)) != 0 {
            self.ctrl[i] = EMPTY;
        } else {
            self.ctrl[i] = TOMBSTONE;
            self.tombstones += 1;
        }
        self.len -= 1;
        let (_, value) = unsafe { self.entries[i].assume_init_read() };
        Some(value)
    }

    /// Returns a mutable reference to `key`'s value, inserting
    /// `default()` first if it was absent. Probes once whether or not
    /// `key` is already present, rather than delegating to `find` and
    /// `emplace` separately, since either would need to consume `key` to
    /// search and insert with it.
    pub fn get_value_ref_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        if self.len + self.tombstones >= self.threshold() {
            self.grow();
        } else if self.tombstones > (self.mask + 1) / 8 {
            self.rehash_in_place();
        }
        let h32 = self.hash32(&key);
        let fp = control_byte(h32);
        let home = home_group(h32, self.mask);
        let mut first_available: Option<usize> = None;
        let mut found: Option<usize> = None;
        'outer: for group_idx in GroupProbe::new(home, self.mask).take((self.mask + 1) / GROUP_SIZE) {
            let group = self.group_at(group_idx);
            let mut candidates = group::match_byte(group, fp);
            while candidates != 0 {
                let lane = candidates.trailing_zeros() as usize;
                candidates &= candidates - 1;
                let i = group_idx + lane;
                if unsafe { self.entries[i].assume_init_ref() }.0 == key {
                    found = Some(i);
                    break 'outer;
                }
            }
            if first_available.is_none() {
                let available = group::match_empty_or_tombstone(group);
                if available != 0 {
                    let lane = available.trailing_zeros() as usize;
                    first_available = Some(group_idx + lane);
                }
            }
            if group::match_empty(group) != 0 {
                break;
            }
        }
        let i = match found {
            Some(i) => i,
            None => {
                let i = first_available.expect("load factor guarantees an available slot");
                if self.ctrl[i] == TOMBSTONE {
                    self.tombstones -= 1;
                }
                self.ctrl[i] = fp;
                self.entries[i].write((key, default()));
                self.len += 1;
                i
            }
        };
        unsafe { &mut self.entries[i].assume_init_mut().1 }
    }

    fn grow(&mut self) {
        self.rehash(((self.mask + 1) * 2).max(GROUP_SIZE));
    }

    fn rehash_in_place(&mut self) {
        self.rehash(self.mask + 1);
    }

    fn rehash(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.next_multiple_of(GROUP_SIZE).max(GROUP_SIZE);
        let mut new_ctrl = vec![EMPTY; new_capacity];
        let mut new_entries: Box<[MaybeUninit<(K, V)>]> = (0..new_capacity).map(|_| MaybeUninit::uninit()).collect();
        let new_mask = new_capacity - 1;

        for i in 0..self.ctrl.len() {
            if self.ctrl[i] == EMPTY || self.ctrl[i] == TOMBSTONE {
                continue;
            }
            let (key, value) = unsafe { self.entries[i].assume_init_read() };
            let h32 = self.hash32(&key);
            let fp = control_byte(h32);
            let home = home_group(h32, new_mask);
            'place: for group_idx in GroupProbe::new(home, new_mask).take((new_mask + 1) / GROUP_SIZE) {
                let group: &[u8; GROUP_SIZE] = new_ctrl[group_idx..group_idx + GROUP_SIZE]
                    .try_into()
                    .expect("group-aligned slice is 16 bytes");
                if let Some(lane) = (0..GROUP_SIZE).find(|&l| group[l] == EMPTY) {
                    let slot = group_idx + lane;
                    new_ctrl[slot] = fp;
                    new_entries[slot].write((key, value));
                    break 'place;
                }
            }
        }

        self.ctrl = new_ctrl;
        self.entries = new_entries;
        self.mask = new_mask;
        self.tombstones = 0;
    }
}

impl<K, V, S> Drop for DenseMap<K, V, S> {
    fn drop(&mut self) {
        for i in 0..self.ctrl.len() {
            if self.ctrl[i] != EMPTY && self.ctrl[i] != TOMBSTONE {
                unsafe { self.entries[i].assume_init_drop() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emplace_get_remove_roundtrip() {
        let mut map: DenseMap<String, i32> = DenseMap::try_new().unwrap();
        assert!(map.emplace("a".to_string(), 1));
        assert!(!map.emplace("a".to_string(), 2));
        assert_eq!(map.get("a"), Some(&1));
        assert!(map.update("a", 9));
        assert_eq!(map.get("a"), Some(&9));
        assert_eq!(map.remove("a"), Some(9));
        assert_eq!(map.get("a"), None::<&i32>);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut map: DenseMap<u64, u64> = DenseMap::try_with_capacity(16).unwrap();
        for i in 0..5_000u64 {
            assert!(map.emplace(i, i * 3));
        }
        assert_eq!(map.len(), 5_000);
        for i in 0..5_000u64 {
            assert_eq!(map.get(&i), Some(&(i * 3)));
        }
    }

    #[test]
    fn tombstone_heavy_workload_rehashes_in_place() {
        let mut map: DenseMap<u64, u64> = DenseMap::try_with_capacity(64).unwrap();
        for round in 0..20u64 {
            for i in 0..40u64 {
                map.emplace(i, round);
            }
            for i in 0..40u64 {
                map.remove(&i);
            }
        }
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn get_value_ref_or_insert_with_inserts_once() {
        let mut map: DenseMap<String, Vec<i32>> = DenseMap::try_new().unwrap();
        map.get_value_ref_or_insert_with("a".to_string(), Vec::new).push(1);
        map.get_value_ref_or_insert_with("a".to_string(), Vec::new).push(2);
        assert_eq!(map.get("a"), Some(&vec![1, 2]));
    }
}
