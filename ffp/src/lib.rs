/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
*/

//! FFP: a lock-free, dynamically-expanding concurrent hash trie.
//!
//! [`FfpMap`] is the idiomatic entry point. [`api`] is a C-parity façade for callers porting
//! code that speaks the original library's vocabulary (`init`/`init_thread`/`search`/...).
//!
//! Hashing is the caller's job everywhere below `FfpMap`: [`trie::RawTrie`] only ever compares
//! opaque `u64` hashes, matching the original design's separation of concerns.

pub mod api;
pub mod config;
pub mod error;
mod map;
mod node;
pub mod registry;
mod sync;
mod trie;

pub use config::FfpConfig;
pub use error::{FfpError, FfpResult};
pub use map::{pin, FfpMap, Guard};
