/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

use core::fmt;

/// The core's only externally-surfaced failure mode. Everything else that looks like an error (a
/// CAS losing a race, a traversal observing a stale node) is contention, not failure, and is
/// recovered internally by restart. Node allocation is not part of this taxonomy: every node this
/// crate allocates goes through `crossbeam_epoch::Owned::new`, i.e. a plain `Box`, and like every
/// other `Box`-allocating container in the teacher codebase (as opposed to its raw-buffer paths,
/// e.g. `skymap::raw`, which do check `alloc::alloc` against null) it aborts on OOM rather than
/// returning a recoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FfpError {
    /// `init_thread` found no free slot in the thread registry.
    ThreadSlotExhausted,
}

impl fmt::Display for FfpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::ThreadSlotExhausted => "thread registry has no free slot",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FfpError {}

pub type FfpResult<T> = Result<T, FfpError>;
