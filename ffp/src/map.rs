/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

//! The idiomatic, safe-Rust map surface. `FfpMap` hashes keys with a pluggable
//! [`BuildHasher`] and otherwise delegates straight to [`RawTrie`], mirroring the shape of the
//! teacher's own `MTIndex` trait (`mt_insert`/`mt_get`/`mt_delete`, all `Guard`-threading).

use {
    crate::{config::FfpConfig, trie::RawTrie},
    std::{
        collections::hash_map::RandomState,
        hash::{BuildHasher, Hash, Hasher},
    },
};

pub use crate::sync::atm::{cpin as pin, Guard};

/// A lock-free, dynamically-expanding concurrent hash map.
///
/// Every method takes an explicit [`Guard`]; callers pin once per batch of operations with
/// [`pin`] rather than once per call, the same discipline the teacher's own index types expect
/// of their callers.
pub struct FfpMap<K, V, S = RandomState> {
    trie: RawTrie<K, V>,
    hasher: S,
}

impl<K, V> FfpMap<K, V, RandomState> {
    pub fn new(config: FfpConfig) -> Self {
        Self::with_hasher(config, RandomState::new())
    }
}

impl<K, V> Default for FfpMap<K, V, RandomState> {
    fn default() -> Self {
        Self::new(FfpConfig::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> FfpMap<K, V, S> {
    pub fn with_hasher(config: FfpConfig, hasher: S) -> Self {
        Self {
            trie: RawTrie::new(config),
            hasher,
        }
    }

    fn hash(&self, key: &K) -> u64 {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        h.finish()
    }

    /// Inserts `key -> value` if `key` is absent. Returns `false`, leaving the map unchanged, if
    /// the key is already present — this type has no `mt_upsert`/`mt_update` counterpart; a
    /// caller wanting replace-on-exists semantics does `remove` then `insert`.
    pub fn insert(&self, key: K, value: V, g: &Guard) -> bool {
        let hash = self.hash(&key);
        self.trie.insert(hash, key, value, g)
    }

    pub fn get<'g>(&self, key: &K, g: &'g Guard) -> Option<&'g V> {
        let hash = self.hash(key);
        self.trie.get(hash, key, g)
    }

    pub fn contains(&self, key: &K, g: &Guard) -> bool {
        let hash = self.hash(key);
        self.trie.contains(hash, key, g)
    }

    pub fn remove(&self, key: &K, g: &Guard) -> bool {
        let hash = self.hash(key);
        self.trie.remove(hash, key, g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let m: FfpMap<String, i32> = FfpMap::default();
        let g = pin();
        assert!(m.insert("alice".to_string(), 1, &g));
        assert_eq!(m.get(&"alice".to_string(), &g), Some(&1));
        assert!(!m.contains(&"bob".to_string(), &g));
    }

    #[test]
    fn remove_then_get_returns_none() {
        let m: FfpMap<u64, u64> = FfpMap::default();
        let g = pin();
        assert!(m.insert(5, 50, &g));
        assert!(m.remove(&5, &g));
        assert_eq!(m.get(&5, &g), None);
    }

    #[test]
    fn duplicate_insert_is_a_no_op() {
        let m: FfpMap<u64, u64> = FfpMap::default();
        let g = pin();
        assert!(m.insert(1, 10, &g));
        assert!(!m.insert(1, 20, &g));
        assert_eq!(m.get(&1, &g), Some(&10));
    }
}
