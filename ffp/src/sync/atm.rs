/*
 * This file is a part of the FFP concurrent hash trie.
 *
 * FFP is free software: you can redistribute it and/or modify it under the
 * terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * FFP is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for
 * more details.
*/

//! A thin wrapper over [`crossbeam_epoch`] that pins down the ordering used at every call
//! site. The wrapper exists so the rest of the crate never has to choose an ordering inline:
//! loads are acquire, publishing stores/CAS are acq-rel, and nothing in this crate ever needs
//! `SeqCst`.

use core::{fmt, mem, ops::Deref, sync::atomic::Ordering};
use crossbeam_epoch::{Atomic as CBAtomic, Pointable, Pointer};

pub use crossbeam_epoch::{
    pin as cpin, unprotected as upin, CompareExchangeError, Guard, Owned, Shared,
};

pub(crate) const ORD_RLX: Ordering = Ordering::Relaxed;
pub(crate) const ORD_ACQ: Ordering = Ordering::Acquire;
pub(crate) const ORD_REL: Ordering = Ordering::Release;
pub(crate) const ORD_ACR: Ordering = Ordering::AcqRel;

type CxResult<'g, T, P> = Result<Shared<'g, T>, CompareExchangeError<'g, T, P>>;

/// Compile-time check that `T`'s alignment leaves at least `fsize` low bits free for a tag.
pub(crate) const fn ensure_flag_align<T>(fsize: usize) -> bool {
    mem::align_of::<T>().trailing_zeros() as usize >= fsize
}

pub struct Atomic<T> {
    a: CBAtomic<T>,
}

// the derive enforces a spurious `T: Debug` bound
impl<T> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.a)
    }
}

impl<T: Pointable> Atomic<T> {
    const _ENSURE_FLAG_STATIC_CHECK: () = assert!(ensure_flag_align::<T>(1));

    /// Allocates a new node and wraps it.
    pub(crate) fn new_alloc(t: T) -> Self {
        let _ = Self::_ENSURE_FLAG_STATIC_CHECK;
        Self { a: CBAtomic::new(t) }
    }
    #[inline(always)]
    pub(crate) const fn null() -> Self {
        Self { a: CBAtomic::null() }
    }
    #[inline(always)]
    pub(crate) fn cx<'g, P>(
        &self,
        o: Shared<'g, T>,
        n: P,
        s: Ordering,
        f: Ordering,
        g: &'g Guard,
    ) -> CxResult<'g, T, P>
    where
        P: Pointer<T>,
    {
        self.a.compare_exchange(o, n, s, f, g)
    }
    #[inline(always)]
    pub(crate) fn cx_rel<'g, P>(&self, o: Shared<'g, T>, n: P, g: &'g Guard) -> CxResult<'g, T, P>
    where
        P: Pointer<T>,
    {
        self.cx(o, n, ORD_ACR, ORD_ACQ, g)
    }
    #[inline(always)]
    pub(crate) fn ld<'g>(&self, o: Ordering, g: &'g Guard) -> Shared<'g, T> {
        self.a.load(o, g)
    }
    #[inline(always)]
    pub(crate) fn ld_acq<'g>(&self, g: &'g Guard) -> Shared<'g, T> {
        self.ld(ORD_ACQ, g)
    }
    #[inline(always)]
    pub(crate) fn store_rel<P: Pointer<T>>(&self, n: P) {
        self.a.store(n, ORD_REL);
    }
}

impl<T, A> From<A> for Atomic<T>
where
    T: Pointable,
    A: Into<CBAtomic<T>>,
{
    fn from(t: A) -> Self {
        let _ = Self::_ENSURE_FLAG_STATIC_CHECK;
        Self { a: Into::into(t) }
    }
}

impl<T> Deref for Atomic<T> {
    type Target = CBAtomic<T>;
    fn deref(&self) -> &Self::Target {
        &self.a
    }
}
