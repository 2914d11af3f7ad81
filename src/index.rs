//! `Index`/`IndexMut` façades, mirroring `std::HashMap`'s
//! panic-on-missing-key semantics.
//!
//! Only the single-threaded variants implement these traits. `std::ops::
//! Index::index` returns a plain `&V` with no way to tie its lifetime to a
//! reclamation guard, so `CMap` cannot implement it soundly; its `get`
//! returns an owned clone instead (see DESIGN.md).

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::ops::{Index, IndexMut};

use crate::dense::DenseMap;
use crate::secondary::RobinhoodMap;

impl<K, V, S, Q> Index<&Q> for DenseMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    S: BuildHasher,
    Q: Hash + Eq + ?Sized,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not found")
    }
}

impl<K, V, S, Q> IndexMut<&Q> for DenseMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    S: BuildHasher,
    Q: Hash + Eq + ?Sized,
{
    fn index_mut(&mut self, key: &Q) -> &mut V {
        self.get_mut(key).expect("key not found")
    }
}

impl<K, V, S, Q> Index<&Q> for RobinhoodMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    S: BuildHasher,
    Q: Hash + Eq + ?Sized,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not found")
    }
}

impl<K, V, S, Q> IndexMut<&Q> for RobinhoodMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    S: BuildHasher,
    Q: Hash + Eq + ?Sized,
{
    fn index_mut(&mut self, key: &Q) -> &mut V {
        self.get_mut(key).expect("key not found")
    }
}

#[cfg(test)]
mod tests {
    use crate::dense::DenseMap;
    use crate::secondary::RobinhoodMap;

    #[test]
    fn dense_index_panics_on_missing_key() {
        let map: DenseMap<String, i32> = DenseMap::try_new().unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| &map["missing"]));
        assert!(result.is_err());
    }

    #[test]
    fn robinhood_index_reads_present_key() {
        let mut map: RobinhoodMap<String, i32> = RobinhoodMap::new();
        map.emplace("a".to_string(), 7);
        assert_eq!(map["a"], 7);
    }
}
