/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

//! Node representation.
//!
//! Rust has no portable "union of two heap layouts behind one tagged pointer word" short of an
//! `enum`, so [`Entry`] plays the role of the original C's `struct lfht_node` union: every
//! bucket slot and every leaf's `next` field is an `Atomic<Entry<K, V>>`, and callers match on
//! the variant the way the original matches on `node->type`. Two independent bits get packed
//! into the pointer word itself, each scoped to a different field and never mixed: the leaf
//! validity flag, carried as the `Shared`/`Owned` tag on `Leaf::next` exactly as spec.md
//! describes, and the bucket-claim flag `try_compress` uses to interlock against a racing
//! insert, carried as the tag on `HashNode::buckets[i]`.

use {
    crate::sync::atm::{Atomic, Owned, Shared, ORD_RLX},
    std::sync::atomic::AtomicUsize,
};

/// Tag bit on a leaf's `next`: 0 = valid (live), 1 = logically removed.
pub(crate) const INVALID: usize = 1;

#[inline(always)]
pub(crate) fn valid_ptr<'g, K, V>(p: Shared<'g, Entry<K, V>>) -> Shared<'g, Entry<K, V>> {
    p.with_tag(0)
}

#[inline(always)]
pub(crate) fn is_invalid<K, V>(p: Shared<'_, Entry<K, V>>) -> bool {
    (p.tag() & INVALID) == INVALID
}

#[inline(always)]
pub(crate) fn invalid_ptr<'g, K, V>(p: Shared<'g, Entry<K, V>>) -> Shared<'g, Entry<K, V>> {
    p.with_tag(p.tag() | INVALID)
}

/// Tag bit on a *bucket slot*, unrelated to a leaf's validity bit above (different atomic
/// word, so the shared bit position carries no shared meaning): set by `try_compress` on every
/// one of a node's buckets while it decides whether the node is still fully empty. A concurrent
/// insert that finds a bucket carrying this bit cannot complete its CAS (its expected-old value
/// no longer matches), so it restarts from the root instead of racing the decision — the
/// analogue of `NodeFlag::PENDING_DELETE` in `engine::idx::mtchm::mod.rs`'s `compress`.
pub(crate) const CLAIM: usize = 1;

#[inline(always)]
pub(crate) fn is_claimed<K, V>(p: Shared<'_, Entry<K, V>>) -> bool {
    (p.tag() & CLAIM) == CLAIM
}

#[inline(always)]
pub(crate) fn strip_claim<'g, K, V>(p: Shared<'g, Entry<K, V>>) -> Shared<'g, Entry<K, V>> {
    p.with_tag(p.tag() & !CLAIM)
}

/// A trie node: either an interior hash node (a bucket array) or a collision-chain leaf.
pub(crate) enum Entry<K, V> {
    Hash(HashNode<K, V>),
    Leaf(LeafData<K, V>),
}

impl<K, V> Entry<K, V> {
    #[inline(always)]
    pub(crate) fn as_hash(&self) -> Option<&HashNode<K, V>> {
        match self {
            Self::Hash(h) => Some(h),
            Self::Leaf(_) => None,
        }
    }
    #[inline(always)]
    pub(crate) fn as_leaf(&self) -> Option<&LeafData<K, V>> {
        match self {
            Self::Hash(_) => None,
            Self::Leaf(l) => Some(l),
        }
    }
    #[inline(always)]
    pub(crate) fn is_hash(&self) -> bool {
        matches!(self, Self::Hash(_))
    }
}

/// An interior hash node: a fixed (for its lifetime) `2^size`-wide bucket array, each slot an
/// atomic pointer to either the node itself (empty), a leaf (chain head) or a child hash node.
pub(crate) struct HashNode<K, V> {
    pub(crate) size: u32,
    pub(crate) hash_pos: u32,
    pub(crate) prev: Atomic<Entry<K, V>>,
    /// This node's bucket index within `prev` (meaningless at the root). The original algorithm
    /// never needs this — it never collapses a node, so it never has to find its way back into
    /// a parent's bucket array — but compression does, and without a stored hash to recompute
    /// the index from, the index has to be remembered instead.
    pub(crate) pos_in_parent: u32,
    /// Count of non-empty buckets; used by the counter-based compression variant (spec.md
    /// §4.6). Incremented when a bucket transitions empty -> non-empty, decremented on the
    /// reverse transition. Reaching zero on a non-root node makes it a compression candidate.
    pub(crate) live: AtomicUsize,
    pub(crate) buckets: Box<[Atomic<Entry<K, V>>]>,
}

impl<K, V> HashNode<K, V> {
    #[inline(always)]
    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        get_bucket_index(hash, self.hash_pos, self.size)
    }
}

/// A collision-chain leaf.
pub(crate) struct LeafData<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
    /// Tagged pointer to the next chain element (another leaf) or the chain terminator (the
    /// owning hash node, or during expansion, a freshly-linked child). Tag bit 0 is the
    /// validity flag.
    pub(crate) next: Atomic<Entry<K, V>>,
}

#[inline(always)]
pub(crate) fn get_bucket_index(hash: u64, hash_pos: u32, size: u32) -> usize {
    ((hash >> hash_pos) & ((1u64 << size) - 1)) as usize
}

/// Allocates a new hash node with every bucket self-pointing (empty), and links it to `prev`.
/// The returned node is not yet published anywhere; the caller CASes it into place.
pub(crate) fn alloc_hash_node<'g, K, V>(
    size: u32,
    hash_pos: u32,
    prev: Shared<'g, Entry<K, V>>,
    pos_in_parent: u32,
) -> Owned<Entry<K, V>> {
    let n_buckets = 1usize << size;
    let buckets: Box<[Atomic<Entry<K, V>>]> = (0..n_buckets).map(|_| Atomic::null()).collect();
    let node = Owned::new(Entry::Hash(HashNode {
        size,
        hash_pos,
        prev: Atomic::from(prev),
        pos_in_parent,
        live: AtomicUsize::new(0),
        buckets,
    }));
    // SAFETY: the node hasn't been published yet, so the self-referencing stores below race
    // with nobody; they establish the "empty bucket == self pointer" invariant before any
    // other thread can observe this allocation.
    let raw: *const Entry<K, V> = &*node;
    let self_shared: Shared<'_, Entry<K, V>> = unsafe { Shared::from_raw(raw) };
    if let Entry::Hash(h) = &*node {
        for b in h.buckets.iter() {
            b.store(self_shared, ORD_RLX);
        }
    }
    node
}

/// Allocates a new leaf whose `next` initially points at `owner` (the chain terminator).
pub(crate) fn alloc_leaf<'g, K, V>(
    hash: u64,
    key: K,
    value: V,
    owner: Shared<'g, Entry<K, V>>,
) -> Owned<Entry<K, V>> {
    Owned::new(Entry::Leaf(LeafData {
        hash,
        key,
        value,
        next: Atomic::from(owner),
    }))
}
