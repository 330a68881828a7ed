/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

//! The core algorithm: traversal, insertion, removal, bucket expansion and counter-based
//! compression. Grounded line-for-line against `find_node`, `search_insert`, `search_remove`,
//! `adjust_chain_nodes`, `adjust_node` and `make_invisible` in the original source, generalized
//! from a `void *` hash/value pair to a generic `K: Eq, V`. Every load of `next` or a bucket slot
//! is `Acquire`; every publishing CAS is `AcqRel` on success, `Acquire` on failure; nothing here
//! uses `SeqCst`.

use crate::{
    config::FfpConfig,
    node::{
        alloc_hash_node, alloc_leaf, is_claimed, is_invalid, strip_claim, valid_ptr, Entry,
        LeafData, CLAIM, INVALID,
    },
    sync::{
        atm::{upin, Atomic, CompareExchangeError, Guard, Shared, ORD_ACQ, ORD_ACR},
        Backoff,
    },
};

/// Outcome of a traversal to the chain position for `(hash, key)`.
enum FindOutcome<'g, K, V> {
    /// The key is present; `hnode` is the hash node owning the chain it lives in.
    Found {
        hnode: Shared<'g, Entry<K, V>>,
        leaf: Shared<'g, Entry<K, V>>,
    },
    /// The key is absent; the chain bottomed out at `hnode` with `count` live leaves walked.
    /// `slot` is the atomic link to CAS a new leaf (or expansion node) into, and `observed` is
    /// its last-read value (the CAS's expected-old).
    NotFound {
        hnode: Shared<'g, Entry<K, V>>,
        slot: &'g Atomic<Entry<K, V>>,
        observed: Shared<'g, Entry<K, V>>,
        count: usize,
    },
}

/// A lock-free, dynamically-expanding concurrent hash trie keyed by a caller-supplied `u64`
/// hash. Hashing is not this type's job (see `ffp::map::FfpMap` for a hashing convenience
/// layer); `RawTrie` only ever compares hashes it is given.
pub(crate) struct RawTrie<K, V> {
    root: Atomic<Entry<K, V>>,
    config: FfpConfig,
}

impl<K, V> RawTrie<K, V> {
    pub(crate) fn new(config: FfpConfig) -> Self {
        let g = unsafe { upin() };
        let root = alloc_hash_node::<K, V>(config.root_hash_bits, 0, Shared::null(), 0);
        Self {
            root: Atomic::from(root.into_shared(g)),
            config,
        }
    }

    fn find<'g>(&self, hash: u64, key: &K, g: &'g Guard) -> FindOutcome<'g, K, V>
    where
        K: Eq,
    {
        let mut hnode = self.root.ld_acq(g);
        'descend: loop {
            let h = unsafe { hnode.deref() }
                .as_hash()
                .expect("traversal invariant: hnode is always a hash node");
            let pos = h.bucket_index(hash);
            let mut slot = &h.buckets[pos];
            let mut iter = slot.ld_acq(g);
            if is_claimed(iter) {
                // `try_compress` is mid-decision on this node; its claim tag makes every bucket
                // here untrustworthy until it resolves one way or the other. Restart the whole
                // descent rather than busy-loop on this slot: the node itself may be collapsed
                // out from under us by the time the claim clears.
                hnode = self.root.ld_acq(g);
                continue 'descend;
            }
            let mut count = 0usize;
            loop {
                if iter == hnode {
                    return FindOutcome::NotFound {
                        hnode,
                        slot,
                        observed: iter,
                        count,
                    };
                }
                match unsafe { iter.deref() } {
                    Entry::Hash(_) => {
                        // a bucket was expanded underneath us; climb from the deepest observed
                        // node back up to the one directly parented by the current hnode, then
                        // restart the descent from there.
                        let mut desc = iter;
                        loop {
                            let desc_prev =
                                unsafe { desc.deref() }.as_hash().unwrap().prev.ld_acq(g);
                            if desc_prev == hnode {
                                break;
                            }
                            desc = desc_prev;
                        }
                        hnode = desc;
                        continue 'descend;
                    }
                    Entry::Leaf(l) => {
                        let tmp = l.next.ld_acq(g);
                        if !is_invalid(tmp) {
                            if l.hash == hash && &l.key == key {
                                return FindOutcome::Found { hnode, leaf: iter };
                            }
                            slot = &l.next;
                            iter = valid_ptr(tmp);
                            count += 1;
                        } else {
                            iter = valid_ptr(tmp);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn get<'g>(&self, hash: u64, key: &K, g: &'g Guard) -> Option<&'g V>
    where
        K: Eq,
    {
        match self.find(hash, key, g) {
            FindOutcome::Found { leaf, .. } => {
                Some(&unsafe { leaf.deref() }.as_leaf().unwrap().value)
            }
            FindOutcome::NotFound { .. } => None,
        }
    }

    pub(crate) fn contains(&self, hash: u64, key: &K, g: &Guard) -> bool
    where
        K: Eq,
    {
        matches!(self.find(hash, key, g), FindOutcome::Found { .. })
    }

    /// Inserts `(key, value)` if absent. Returns `false` without modifying the trie if the key
    /// is already present — matching the original's duplicate-insert behavior of returning the
    /// existing node untouched.
    pub(crate) fn insert(&self, hash: u64, mut key: K, mut value: V, g: &Guard) -> bool
    where
        K: Eq,
    {
        loop {
            match self.find(hash, &key, g) {
                FindOutcome::Found { .. } => return false,
                FindOutcome::NotFound {
                    hnode,
                    slot,
                    observed,
                    count,
                } => {
                    if count >= self.config.max_chain {
                        self.expand(hnode, slot, observed, hash, g);
                        continue;
                    }
                    let new_leaf = alloc_leaf(hash, key, value, hnode);
                    match slot.cx(observed, new_leaf, ORD_ACR, ORD_ACQ, g) {
                        Ok(_) => {
                            if count == 0 {
                                unsafe { hnode.deref() }
                                    .as_hash()
                                    .unwrap()
                                    .live
                                    .fetch_add(1, ORD_ACR);
                            }
                            return true;
                        }
                        Err(CompareExchangeError { new, .. }) => {
                            match *new.into_box() {
                                Entry::Leaf(LeafData {
                                    key: k, value: v, ..
                                }) => {
                                    key = k;
                                    value = v;
                                }
                                Entry::Hash(_) => unreachable!("just allocated a leaf"),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Splits a saturated bucket (`slot`, currently `observed`) of `hnode` into a new child hash
    /// node and migrates the chain into it. On CAS failure this is a no-op; the caller retries
    /// the whole operation from the root.
    fn expand<'g>(
        &self,
        hnode: Shared<'g, Entry<K, V>>,
        slot: &'g Atomic<Entry<K, V>>,
        observed: Shared<'g, Entry<K, V>>,
        hash: u64,
        g: &'g Guard,
    ) {
        let h = unsafe { hnode.deref() }.as_hash().unwrap();
        let pos = h.bucket_index(hash);
        let new_hash = alloc_hash_node::<K, V>(
            self.config.hash_bits,
            h.hash_pos + h.size,
            hnode,
            pos as u32,
        )
        .into_shared(g);
        match slot.cx(observed, new_hash, ORD_ACR, ORD_ACQ, g) {
            Ok(_) => {
                log::trace!("expanding bucket {pos} at hash_pos {}", h.hash_pos);
                let old_head = h.buckets[pos].ld_acq(g);
                self.adjust_chain_nodes(old_head, new_hash, g);
                h.buckets[pos].store_rel(new_hash);
            }
            Err(CompareExchangeError { new, .. }) => unsafe {
                // `new` was published nowhere; we're the only owner, safe to reclaim directly.
                drop(new.into_owned());
            },
        }
    }

    /// Post-order migration of a saturated chain into `dest`: migrate the tail before the head,
    /// so that a concurrent reader walking the old chain always finds either the original chain
    /// or `dest`, never a half-migrated structure.
    fn adjust_chain_nodes<'g>(
        &self,
        cnode: Shared<'g, Entry<K, V>>,
        dest: Shared<'g, Entry<K, V>>,
        g: &'g Guard,
    ) {
        if cnode == dest {
            return;
        }
        let l = unsafe { cnode.deref() }
            .as_leaf()
            .expect("chain migration only ever walks leaves");
        let tmp = l.next.ld_acq(g);
        let next = valid_ptr(tmp);
        if next != dest {
            self.adjust_chain_nodes(next, dest, g);
        }
        if !is_invalid(tmp) {
            self.adjust_node(cnode, dest, g);
        }
    }

    /// Re-links a single surviving leaf from the old chain into `dest`'s own bucket structure,
    /// recursively expanding `dest` if the target bucket saturates during migration.
    fn adjust_node<'g>(&self, leaf: Shared<'g, Entry<K, V>>, dest: Shared<'g, Entry<K, V>>, g: &'g Guard) {
        let leaf_data = unsafe { leaf.deref() }.as_leaf().unwrap();
        let dest_h = unsafe { dest.deref() }.as_hash().unwrap();
        let pos = dest_h.bucket_index(leaf_data.hash);
        let mut current_valid = &dest_h.buckets[pos];
        let mut expected = valid_ptr(current_valid.ld_acq(g));
        let mut iter = expected;
        let mut counter = 0usize;
        loop {
            match unsafe { iter.deref() } {
                Entry::Hash(_) => break,
                Entry::Leaf(l) => {
                    let tmp = l.next.ld_acq(g);
                    if !is_invalid(tmp) {
                        current_valid = &l.next;
                        expected = valid_ptr(tmp);
                        iter = expected;
                        counter += 1;
                    } else {
                        iter = valid_ptr(tmp);
                    }
                }
            }
        }
        if iter == dest {
            if counter >= self.config.max_chain {
                let new_hash = alloc_hash_node::<K, V>(
                    self.config.hash_bits,
                    dest_h.hash_pos + dest_h.size,
                    dest,
                    pos as u32,
                )
                .into_shared(g);
                match current_valid.cx(expected, new_hash, ORD_ACR, ORD_ACQ, g) {
                    Ok(_) => {
                        let old_head = dest_h.buckets[pos].ld_acq(g);
                        self.adjust_chain_nodes(old_head, new_hash, g);
                        dest_h.buckets[pos].store_rel(new_hash);
                        // the bucket was already non-empty (it held a saturated chain), so its
                        // live/non-live transition already happened; converting the chain into a
                        // child node doesn't change that, matching `expand`'s behavior.
                        return self.adjust_node(leaf, new_hash, g);
                    }
                    Err(CompareExchangeError { new, .. }) => unsafe {
                        drop(new.into_owned());
                    },
                }
            } else {
                if !self.force_cas(leaf, dest, g) {
                    return;
                }
                if current_valid.cx(expected, leaf, ORD_ACR, ORD_ACQ, g).is_ok() {
                    if counter == 0 {
                        dest_h.live.fetch_add(1, ORD_ACR);
                    }
                    if is_invalid(leaf_data.next.ld_acq(g)) {
                        self.make_invisible(leaf, dest, g);
                    }
                    return;
                }
            }
            return self.adjust_node(leaf, dest, g);
        }
        // `iter` descended into a deeper node installed by a concurrent expansion; climb back up
        // to the child directly parented by `dest` and retry there.
        let mut desc = iter;
        loop {
            let desc_prev = unsafe { desc.deref() }.as_hash().unwrap().prev.ld_acq(g);
            if desc_prev == dest {
                break;
            }
            desc = desc_prev;
        }
        self.adjust_node(leaf, desc, g)
    }

    /// CAS's `leaf.next` from its current value to `new_next`, failing (returning `false`)
    /// without retrying if the leaf has meanwhile been marked removed.
    fn force_cas<'g>(&self, leaf: Shared<'g, Entry<K, V>>, new_next: Shared<'g, Entry<K, V>>, g: &'g Guard) -> bool {
        let l = unsafe { leaf.deref() }.as_leaf().unwrap();
        let mut expected = l.next.ld_acq(g);
        let backoff = Backoff::new();
        loop {
            if is_invalid(expected) {
                return false;
            }
            match l.next.cx(expected, new_next, ORD_ACR, ORD_ACQ, g) {
                Ok(_) => return true,
                Err(CompareExchangeError { current, .. }) => {
                    expected = current;
                    backoff.snooze();
                }
            }
        }
    }

    /// Removes the key if present. Returns whether a leaf was found and marked removed.
    pub(crate) fn remove(&self, hash: u64, key: &K, g: &Guard) -> bool
    where
        K: Eq,
    {
        match self.find(hash, key, g) {
            FindOutcome::Found { hnode, leaf } => {
                if self.mark_invalid(leaf, g) {
                    self.make_invisible(leaf, hnode, g);
                }
                true
            }
            FindOutcome::NotFound { .. } => false,
        }
    }

    /// Sets the validity tag on `leaf.next`. Returns whether this call was the one to transition
    /// it (a concurrent remove winning the race returns `false`).
    fn mark_invalid(&self, leaf: Shared<'_, Entry<K, V>>, g: &Guard) -> bool {
        let l = unsafe { leaf.deref() }.as_leaf().unwrap();
        let prev = l.next.fetch_or(INVALID, ORD_ACR, g);
        !is_invalid(prev)
    }

    /// Unlinks a logically-removed `cnode` from the chain owned by `hnode`, retrying against a
    /// deeper node if a concurrent expansion moved the chain out from under it. On success, if
    /// the unlink emptied the bucket entirely, decrements `hnode`'s live-bucket counter and
    /// triggers compression.
    fn make_invisible<'g>(&self, cnode: Shared<'g, Entry<K, V>>, hnode: Shared<'g, Entry<K, V>>, g: &'g Guard) {
        let cleaf = unsafe { cnode.deref() }.as_leaf().unwrap();
        let mut valid_after = valid_ptr(cleaf.next.ld_acq(g));
        while let Entry::Leaf(l) = unsafe { valid_after.deref() } {
            let tmp = l.next.ld_acq(g);
            if !is_invalid(tmp) {
                break;
            }
            valid_after = valid_ptr(tmp);
        }
        let mut iter = valid_after;
        loop {
            match unsafe { iter.deref() } {
                Entry::Hash(_) => break,
                Entry::Leaf(l) => iter = valid_ptr(l.next.ld_acq(g)),
            }
        }
        if iter == hnode {
            let h = unsafe { hnode.deref() }.as_hash().unwrap();
            let pos = h.bucket_index(cleaf.hash);
            let mut valid_before = &h.buckets[pos];
            let mut valid_before_next = valid_before.ld_acq(g);
            let mut walk = valid_before_next;
            let mut before_count = 0usize;
            while walk != cnode {
                match unsafe { walk.deref() } {
                    Entry::Leaf(l) => {
                        let tmp = l.next.ld_acq(g);
                        if !is_invalid(tmp) {
                            valid_before = &l.next;
                            valid_before_next = valid_ptr(tmp);
                            walk = valid_before_next;
                            before_count += 1;
                        } else {
                            walk = valid_ptr(tmp);
                        }
                    }
                    Entry::Hash(_) => break,
                }
            }
            if walk == cnode {
                match valid_before.cx(valid_before_next, valid_after, ORD_ACR, ORD_ACQ, g) {
                    Ok(_) => {
                        unsafe {
                            g.defer_destroy(cnode);
                        }
                        if before_count == 0 && valid_after == hnode {
                            let prev = h.prev.ld_acq(g);
                            if h.live.fetch_sub(1, ORD_ACR) == 1 && !prev.is_null() {
                                self.try_compress(hnode, g);
                            }
                        }
                        return;
                    }
                    Err(_) => return self.make_invisible(cnode, hnode, g),
                }
            } else if walk == hnode {
                return;
            }
            return self.make_invisible(cnode, walk, g);
        }
        let iter_h = unsafe { iter.deref() }.as_hash().unwrap();
        let hnode_h = unsafe { hnode.deref() }.as_hash().unwrap();
        if iter_h.hash_pos < hnode_h.hash_pos {
            return;
        }
        self.make_invisible(cnode, iter, g)
    }

    /// Reference-counting compression (spec's chosen variant, §6 of the design notes): a node
    /// whose live-bucket counter has reached zero is collapsed out of its parent's bucket slot
    /// back to "empty" (the parent's self pointer), and the parent is checked for the same
    /// condition in turn.
    ///
    /// `live == 0` only means nobody had finished an insert into `hnode` as of the load; it does
    /// not stop one from landing in the window between that load and the parent-slot CAS below,
    /// because an insert's own CAS only ever touches a bucket *inside* `hnode`, never the
    /// parent's pointer to `hnode`. So before touching the parent, every one of `hnode`'s buckets
    /// is `fetch_or`-tagged with `CLAIM` — mirroring `NodeFlag::PENDING_DELETE` in
    /// `engine::idx::mtchm::mod.rs`'s `compress`. An insert racing this (`trie::find`'s
    /// `is_claimed` check) sees the tag, can't complete its own bucket CAS against an untagged
    /// expected value, and restarts from the root instead of landing inside a node that's about
    /// to be detached. If the claim reveals any bucket was genuinely repopulated since the
    /// `live` check, compression backs out and unclaims everything; otherwise it proceeds exactly
    /// as before.
    fn try_compress<'g>(&self, hnode: Shared<'g, Entry<K, V>>, g: &'g Guard) {
        let h = unsafe { hnode.deref() }.as_hash().unwrap();
        if h.live.load(ORD_ACQ) != 0 {
            return;
        }
        let prev = h.prev.ld_acq(g);
        if prev.is_null() {
            return;
        }
        let mut populated = false;
        for b in h.buckets.iter() {
            let old = b.fetch_or(CLAIM, ORD_ACR, g);
            if strip_claim(old) != hnode {
                populated = true;
            }
        }
        if populated {
            for b in h.buckets.iter() {
                b.fetch_and(!CLAIM, ORD_ACR, g);
            }
            return;
        }
        let parent = unsafe { prev.deref() }.as_hash().unwrap();
        let pos = h.pos_in_parent as usize;
        match parent.buckets[pos].cx(hnode, prev, ORD_ACR, ORD_ACQ, g) {
            Ok(_) => {
                log::trace!("compressing empty child at bucket {pos} back into parent");
                unsafe {
                    g.defer_destroy(hnode);
                }
                if parent.live.fetch_sub(1, ORD_ACR) == 1 {
                    self.try_compress(prev, g);
                }
            }
            Err(_) => {
                for b in h.buckets.iter() {
                    b.fetch_and(!CLAIM, ORD_ACR, g);
                }
            }
        }
    }
}

impl<K, V> Drop for RawTrie<K, V> {
    fn drop(&mut self) {
        let g = unsafe { upin() };
        let root = self.root.ld_acq(g);
        unsafe { rdrop(root, Shared::null(), g) };
    }
}

/// Frees `node` and everything reachable from it, recognizing `owner`'s self pointer (an empty
/// bucket, or a chain's terminator) as the point to stop. Exclusive access is assumed (this only
/// ever runs from `Drop`), so no concurrent reader can observe a half-freed structure.
unsafe fn rdrop<K, V>(node: Shared<'_, Entry<K, V>>, owner: Shared<'_, Entry<K, V>>, g: &Guard) {
    if node.is_null() || node == owner {
        return;
    }
    if unsafe { node.deref() }.is_hash() {
        let owned = unsafe { node.into_owned() };
        if let Entry::Hash(h) = &*owned {
            for b in h.buckets.iter() {
                let child = b.ld_acq(g);
                unsafe { rdrop(child, node, g) };
            }
        }
        return;
    }
    let mut cur = node;
    while cur != owner {
        match unsafe { cur.deref() } {
            Entry::Hash(_) => {
                unsafe { rdrop(cur, owner, g) };
                break;
            }
            Entry::Leaf(l) => {
                let next = valid_ptr(l.next.ld_acq(g));
                drop(unsafe { cur.into_owned() });
                cur = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::atm::cpin;

    fn trie(root_hash_bits: u32, hash_bits: u32, max_chain: usize) -> RawTrie<u64, u64> {
        RawTrie::new(FfpConfig::new(root_hash_bits, hash_bits, max_chain))
    }

    #[test]
    fn insert_then_get_round_trips() {
        let t = trie(4, 4, 5);
        let g = cpin();
        assert!(t.insert(42, 42, 100, &g));
        assert_eq!(t.get(42, &42, &g), Some(&100));
    }

    #[test]
    fn duplicate_insert_is_a_no_op() {
        let t = trie(4, 4, 5);
        let g = cpin();
        assert!(t.insert(1, 1, 10, &g));
        assert!(!t.insert(1, 1, 20, &g));
        assert_eq!(t.get(1, &1, &g), Some(&10));
    }

    #[test]
    fn remove_then_get_returns_none() {
        let t = trie(4, 4, 5);
        let g = cpin();
        assert!(t.insert(7, 7, 70, &g));
        assert!(t.remove(7, &7, &g));
        assert_eq!(t.get(7, &7, &g), None);
        assert!(!t.remove(7, &7, &g));
    }

    #[test]
    fn get_on_empty_trie_is_none() {
        let t = trie(4, 4, 5);
        let g = cpin();
        assert_eq!(t.get(9, &9, &g), None);
    }

    /// The worked example from the design notes: `root_hash_bits = 4`, `hash_bits = 2`,
    /// `max_chain = 3`, keys that collide heavily enough to force at least one expansion.
    #[test]
    fn worked_example_forces_expansion() {
        let t = trie(4, 2, 3);
        let g = cpin();
        // All five keys land in bucket 1 of the root (hash & 0b1111 == 0x1) and share every
        // subsequent 2-bit chunk, so inserting all of them saturates the root bucket and
        // forces an expansion chain.
        let keys: [u64; 5] = [0x1, 0x11, 0x21, 0x31, 0x41];
        for (i, &k) in keys.iter().enumerate() {
            assert!(t.insert(k, k, i as u64, &g), "insert {k:#x} failed");
        }
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(t.get(k, &k, &g), Some(&(i as u64)), "lookup {k:#x} failed");
        }
        for &k in &keys {
            assert!(t.remove(k, &k, &g));
        }
        for &k in &keys {
            assert_eq!(t.get(k, &k, &g), None);
        }
    }

    #[test]
    fn expand_then_compress_round_trip() {
        let t = trie(4, 2, 2);
        let g = cpin();
        let keys: [u64; 4] = [0x10, 0x20, 0x30, 0x40];
        for &k in &keys {
            assert!(t.insert(k, k, k, &g));
        }
        for &k in &keys {
            assert!(t.remove(k, &k, &g));
        }
        for &k in &keys {
            assert_eq!(t.get(k, &k, &g), None);
        }
        // the bucket should be fully compressible again; a fresh insert must still work
        assert!(t.insert(0x10, 0x10, 0xaa, &g));
        assert_eq!(t.get(0x10, &0x10, &g), Some(&0xaa));
    }

    #[test]
    fn many_keys_insert_get_remove() {
        let t = trie(4, 4, 4);
        let g = cpin();
        for k in 0..2000u64 {
            assert!(t.insert(k, k, k * 2, &g));
        }
        for k in 0..2000u64 {
            assert_eq!(t.get(k, &k, &g), Some(&(k * 2)));
        }
        for k in (0..2000u64).step_by(2) {
            assert!(t.remove(k, &k, &g));
        }
        for k in 0..2000u64 {
            if k % 2 == 0 {
                assert_eq!(t.get(k, &k, &g), None);
            } else {
                assert_eq!(t.get(k, &k, &g), Some(&(k * 2)));
            }
        }
    }
}
