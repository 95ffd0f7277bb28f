//! Reentrancy guard with RAII release.
//!
//! [`ReentrancyGuard::enter`] hands out a [`GuardScope`]; dropping the scope
//! frees the lock, so early `?` returns release it too. The flag lives in a
//! `Cell` so a nested call arriving through an asset contract observes it
//! while the outer call is still on the stack.

use std::cell::Cell;
use treasury_core::{TreasuryError, TreasuryResult};

#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    locked: Cell<bool>,
}

impl ReentrancyGuard {
    pub const fn new() -> Self {
        Self {
            locked: Cell::new(false),
        }
    }

    pub fn enter(&self) -> TreasuryResult<GuardScope<'_>> {
        if self.locked.replace(true) {
            tracing::warn!("reentrant call rejected");
            return Err(TreasuryError::ReentrantCall);
        }
        tracing::trace!("reentrancy lock acquired");
        Ok(GuardScope { guard: self })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

/// Holds the lock for its lifetime.
#[must_use = "the lock is released as soon as the scope is dropped"]
pub struct GuardScope<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.guard.locked.set(false);
        tracing::trace!("reentrancy lock released");
    }
}
