/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

//! A direct, safe-Rust rendering of the original interface
//! (`init`/`init_thread`/`end_thread`/`search`/`insert`/`remove`/`destroy`), for readers porting
//! code that already speaks that vocabulary. [`FfpMap`] is the idiomatic way to use this crate;
//! this module exists for interface parity, not because it adds capability.

use crate::{
    config::FfpConfig,
    error::{FfpError, FfpResult},
    sync::atm::cpin as pin,
    trie::RawTrie,
    registry::{ThreadId, ThreadRegistry},
};

pub use crate::registry::ThreadId as Tid;

/// `init(max_threads, config)`'s return value. Dropping it is `destroy`.
pub struct FfpHandle<K, V> {
    trie: RawTrie<K, V>,
    threads: ThreadRegistry,
}

/// Builds a trie bounded to at most `max_threads` concurrent participants.
pub fn init<K, V>(max_threads: usize, config: FfpConfig) -> FfpHandle<K, V> {
    FfpHandle {
        trie: RawTrie::new(config),
        threads: ThreadRegistry::new(max_threads),
    }
}

impl<K: Eq, V> FfpHandle<K, V> {
    /// Registers the calling thread. Fails with [`FfpError::ThreadSlotExhausted`] once
    /// `max_threads` participants are already registered.
    pub fn init_thread(&self) -> FfpResult<ThreadId> {
        self.threads.acquire().ok_or(FfpError::ThreadSlotExhausted)
    }

    /// Unregisters a thread previously returned by [`Self::init_thread`].
    pub fn end_thread(&self, tid: ThreadId) {
        self.threads.release(tid);
    }

    /// Looks up `key` under its caller-computed `hash`. `tid` is accepted for interface parity
    /// only; the lookup itself pins its own epoch guard for the duration of the call. The core
    /// never hashes `key` itself — hashing is always the caller's job, down to `RawTrie`.
    pub fn search(&self, hash: u64, key: &K, _tid: ThreadId) -> Option<V>
    where
        V: Clone,
    {
        let g = pin();
        self.trie.get(hash, key, &g).cloned()
    }

    /// Inserts `key -> value` under its caller-computed `hash` if absent.
    pub fn insert(&self, hash: u64, key: K, value: V, _tid: ThreadId) -> FfpResult<bool> {
        let g = pin();
        Ok(self.trie.insert(hash, key, value, &g))
    }

    pub fn remove(&self, hash: u64, key: &K, _tid: ThreadId) -> bool {
        let g = pin();
        self.trie.remove(hash, key, &g)
    }
}
