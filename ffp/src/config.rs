/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

/// Construction-time tuning for a trie. These are not runtime-adjustable: the root fan-out and
/// interior fan-out are baked in at `init` and never resized (see the crate's Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfpConfig {
    /// Bit-width of the root level's index, i.e. the root fans out into `2^root_hash_bits`
    /// buckets. A larger root trades memory for shallower depth on large populations.
    pub root_hash_bits: u32,
    /// Bit-width of each interior (post-expansion) level's index.
    pub hash_bits: u32,
    /// `MAX_CHAIN`: the collision-chain length that triggers expansion.
    pub max_chain: usize,
}

impl FfpConfig {
    /// The original source's non-debug build constants: `HASH_SIZE = 4`, `MAX_NODES = 5`, with
    /// the root given the same fan-out as interior levels.
    pub const fn new(root_hash_bits: u32, hash_bits: u32, max_chain: usize) -> Self {
        assert!(root_hash_bits >= 1 && root_hash_bits <= 24);
        assert!(hash_bits >= 1 && hash_bits <= 16);
        assert!(max_chain >= 1);
        Self {
            root_hash_bits,
            hash_bits,
            max_chain,
        }
    }
}

impl Default for FfpConfig {
    fn default() -> Self {
        Self::new(4, 4, 5)
    }
}
