//! Poison-tolerant wrappers around `std::sync` primitives.
//!
//! Task bodies never run while one of our locks is held, so a poisoned lock
//! only means some unrelated thread panicked; the guarded data is still
//! consistent and we keep going.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait<'a, T>(cond: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
}
