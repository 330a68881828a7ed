/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

//! The thread-id registry named in the C-parity façade's interface. The trie itself has no use
//! for thread ids — crossbeam-epoch's own thread-local pin already tracks participants — but
//! spec.md's external interface names `init_thread`/`end_thread` and a bounded `max_threads`, so
//! this bounded claim-flag array exists to make that bound an observable, testable condition.

use std::sync::atomic::{AtomicBool, Ordering};

/// A slot index handed out by [`ThreadRegistry::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadId(pub(crate) usize);

/// A bounded flat array of claim flags. `acquire` finds the first unclaimed slot and claims it;
/// `release` frees it for reuse. Claims are a simple linear scan under `AcqRel`/`Acquire`
/// compare-exchange: the registry is sized for `max_threads`, not for scale, so there's no need
/// for anything fancier.
pub struct ThreadRegistry {
    slots: Box<[AtomicBool]>,
}

impl ThreadRegistry {
    pub fn new(max_threads: usize) -> Self {
        Self {
            slots: (0..max_threads).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn acquire(&self) -> Option<ThreadId> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ThreadId(i));
            }
        }
        None
    }

    pub fn release(&self, tid: ThreadId) {
        self.slots[tid.0].store(false, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_frees_the_slot() {
        let r = ThreadRegistry::new(2);
        let a = r.acquire().unwrap();
        let b = r.acquire().unwrap();
        assert!(r.acquire().is_none());
        r.release(a);
        assert!(r.acquire().is_some());
        let _ = b;
    }

    #[test]
    fn exhaustion_returns_none() {
        let r = ThreadRegistry::new(0);
        assert!(r.acquire().is_none());
    }
}
