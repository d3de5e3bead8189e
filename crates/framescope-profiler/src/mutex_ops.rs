//! Mutex wait/acquire/release log and an instrumented mutex.

use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::thread::with_current;

/// Identity of a lock: the address of the lock object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutexId(pub usize);

impl MutexId {
    /// Identity of the object behind `lock`.
    #[must_use]
    pub fn of<T: ?Sized>(lock: &T) -> Self {
        Self(std::ptr::from_ref(lock).cast::<()>() as usize)
    }
}

/// What happened to the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutexOp {
    /// Thread started waiting for the lock.
    Waiting,
    /// Thread got the lock.
    Acquired,
    /// Thread let go of the lock.
    Released,
}

/// One entry of a thread's per-frame mutex log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexOpRecord {
    /// Lock identity.
    pub mutex: MutexId,
    /// Operation.
    pub op: MutexOp,
    /// Cycle counter at the operation.
    pub cycle: u64,
}

/// Append-only log for one frame slot.
#[derive(Debug, Default)]
pub(crate) struct MutexOpLog {
    records: Vec<MutexOpRecord>,
    dropped: u32,
}

impl MutexOpLog {
    /// Append unless `capacity` records are already stored.
    #[inline]
    pub(crate) fn push(&mut self, record: MutexOpRecord, capacity: usize) -> bool {
        if self.records.len() >= capacity {
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }
        self.records.push(record);
        true
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.dropped = 0;
    }

    pub(crate) fn records(&self) -> &[MutexOpRecord] {
        &self.records
    }

    pub(crate) const fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// A `parking_lot::Mutex` that logs its contention to the calling thread's
/// profiler recorder.
///
/// Threads without an installed recorder lock it like a plain mutex.
#[derive(Debug, Default)]
pub struct TimedMutex<T> {
    inner: Mutex<T>,
}

impl<T> TimedMutex<T> {
    /// Wrap a value.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Identity recorded in mutex logs.
    #[must_use]
    pub fn id(&self) -> MutexId {
        MutexId::of(&self.inner)
    }

    /// Lock, logging the wait and the acquisition.
    pub fn lock(&self) -> TimedMutexGuard<'_, T> {
        let id = self.id();
        with_current(|r| r.mutex_waiting(id));
        let guard = self.inner.lock();
        with_current(|r| r.mutex_acquired(id));
        TimedMutexGuard { guard, id }
    }

    /// Consume the wrapper.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Guard returned by [`TimedMutex::lock`]; logs the release on drop.
pub struct TimedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    id: MutexId,
}

impl<T> Deref for TimedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for TimedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for TimedMutexGuard<'_, T> {
    fn drop(&mut self) {
        let id = self.id;
        // Logged while still held; the unlock itself follows right after.
        with_current(|r| r.mutex_released(id));
    }
}

/// Build a record stamped with the current cycle counter.
#[inline]
pub(crate) fn record_now(mutex: MutexId, op: MutexOp) -> MutexOpRecord {
    MutexOpRecord {
        mutex,
        op,
        cycle: clock::cycles(),
    }
}
