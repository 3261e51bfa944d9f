//! Reentrancy guard for bootstrap-driven cache creation
//!
//! Creating a cache normally fires the creation listeners, and the bootstrap
//! loader reacts by asking the cluster for that cache's contents. Caches that
//! the bootstrap itself creates must not loop back into that path, so every
//! such creation runs while a [`SkipGuard`] is alive.
//!
//! The state is a per-thread depth counter rather than one process-wide flag:
//! nested guards compose, and two bootstraps running on different worker
//! threads never observe each other's guard. A `SkipGuard` is `!Send`, which
//! keeps it from being held across an `.await` in a spawned task; cache
//! creation is synchronous, so the guard only ever spans a synchronous call.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static SKIP_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Scoped token that suppresses bootstrap for caches created on this thread
///
/// Dropping the guard restores the previous state on every exit path,
/// including early returns, errors and unwinding panics.
#[must_use = "the skip state is released as soon as the guard is dropped"]
pub struct SkipGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for SkipGuard {
    fn drop(&mut self) {
        SKIP_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Enter the skip state on the current thread
pub fn enter_skip() -> SkipGuard {
    SKIP_DEPTH.with(|depth| depth.set(depth.get() + 1));
    SkipGuard {
        _not_send: PhantomData,
    }
}

/// Whether cache creation on the current thread must skip the bootstrap path
#[must_use]
pub fn is_skipping() -> bool {
    SKIP_DEPTH.with(|depth| depth.get() > 0)
}

/// Run `f` with the skip state held
pub fn with_skip<T>(f: impl FnOnce() -> T) -> T {
    let _guard = enter_skip();
    f()
}
