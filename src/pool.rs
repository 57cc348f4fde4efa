// Copyright 2014-2015 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An exclusive-reference cache for one `Scratch` per `Program`.
//!
//! The interpreter's three stacks are worth reusing across scans, but
//! they aren't `Send`-safe to share between concurrent callers of the
//! same `Regex`. Rather than a general pool of N instances, this keeps
//! exactly one cached `Scratch` and hands it out to at most one caller
//! at a time; a second concurrent caller simply allocates its own
//! (dropped, not cached, when it's released and the slot is already
//! occupied).

use std::fmt;
use std::sync::Mutex;

use crate::interp::Scratch;
use crate::program::Program;

#[derive(Default)]
pub struct Pool {
    cached: Mutex<Option<Scratch>>,
}

impl Pool {
    pub fn new() -> Pool {
        Pool { cached: Mutex::new(None) }
    }

    /// Borrow the cached `Scratch`, or allocate a fresh one if it's
    /// either empty or already lent out. Always returns a usable
    /// `Scratch`; the guard's `Drop` is what makes the loan exclusive.
    pub fn acquire<'p>(&'p self, prog: &Program) -> PoolGuard<'p> {
        let cached = self.cached.lock().ok().and_then(|mut slot| slot.take());
        let scratch = cached.unwrap_or_else(|| Scratch::new(prog));
        PoolGuard { pool: self, scratch: Some(scratch) }
    }
}

/// A clone never inherits the original's cached `Scratch` — it starts
/// out empty, the same as `Pool::new()`. `Scratch` holds no state worth
/// copying across a clone boundary (it's pure reusable scratch space).
impl Clone for Pool {
    fn clone(&self) -> Pool {
        Pool::new()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

/// Releases its `Scratch` back to the pool on drop, so a scan that
/// returns early via `?` can't leak the loan. Only caches the returned
/// instance if the slot is still empty (a race with another concurrent
/// acquire just means one of the two `Scratch`es is dropped instead of
/// cached — correctness never depends on which).
pub struct PoolGuard<'p> {
    pool: &'p Pool,
    scratch: Option<Scratch>,
}

impl<'p> PoolGuard<'p> {
    pub fn scratch(&mut self) -> &mut Scratch {
        self.scratch.as_mut().expect("scratch taken before guard dropped")
    }
}

impl<'p> Drop for PoolGuard<'p> {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            if let Ok(mut slot) = self.pool.cached.lock() {
                if slot.is_none() {
                    *slot = Some(scratch);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::options::Options;
    use crate::parse::parse;

    fn program(pattern: &str) -> Program {
        let parsed = parse(pattern, Options::new()).unwrap();
        compile(pattern, &parsed, Options::new()).unwrap()
    }

    #[test]
    fn acquire_then_release_reuses_same_slot() {
        let prog = program("a+");
        let pool = Pool::new();
        {
            let mut guard = pool.acquire(&prog);
            let _ = guard.scratch();
        }
        assert!(pool.cached.lock().unwrap().is_some());
        {
            let mut guard = pool.acquire(&prog);
            let _ = guard.scratch();
        }
        assert!(pool.cached.lock().unwrap().is_some());
    }

    #[test]
    fn concurrent_acquire_does_not_share_one_scratch() {
        let prog = program("a+");
        let pool = Pool::new();
        let mut first = pool.acquire(&prog);
        let mut second = pool.acquire(&prog);
        let _ = first.scratch();
        let _ = second.scratch();
        // Both loans are independently usable; dropping one still
        // leaves the other live.
        drop(first);
        assert!(pool.cached.lock().unwrap().is_some());
        drop(second);
    }
}
