//! Pairing mutex waits with their acquire and release.

use serde::{Deserialize, Serialize};

use crate::mutex_ops::{MutexId, MutexOp, MutexOpRecord};
use crate::view::FrameView;

/// A completed wait: waiting, acquired and released, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentionWindow {
    /// Lock identity.
    pub mutex: MutexId,
    /// Cycle the wait began.
    pub waiting_cycle: u64,
    /// Cycle the lock was obtained.
    pub acquired_cycle: u64,
    /// Cycle the lock was let go.
    pub released_cycle: u64,
}

impl ContentionWindow {
    /// Cycles spent waiting for the lock.
    #[must_use]
    pub const fn wait_cycles(&self) -> u64 {
        self.acquired_cycle.saturating_sub(self.waiting_cycle)
    }

    /// Cycles the lock was held.
    #[must_use]
    pub const fn held_cycles(&self) -> u64 {
        self.released_cycle.saturating_sub(self.acquired_cycle)
    }
}

/// A wait with no matching acquire or release before the log ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnterminatedWait {
    /// Lock identity.
    pub mutex: MutexId,
    /// Cycle the wait began.
    pub waiting_cycle: u64,
    /// Whether the acquire was found (only the release is missing).
    pub acquired: bool,
}

/// Result of [`pair_mutex_waits`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutexPairing {
    /// Completed waits, in order of their `Waiting` record.
    pub windows: Vec<ContentionWindow>,
    /// Waits that never completed.
    pub unterminated: Vec<UnterminatedWait>,
}

fn find_after(log: &[MutexOpRecord], from: usize, mutex: MutexId, op: MutexOp) -> Option<usize> {
    log[from..]
        .iter()
        .position(|r| r.mutex == mutex && r.op == op)
        .map(|offset| from + offset)
}

/// Match every `Waiting` record with the next `Acquired` of the same mutex
/// and the `Released` after that.
#[must_use]
pub fn pair_mutex_waits(log: &[MutexOpRecord]) -> MutexPairing {
    let mut pairing = MutexPairing::default();
    for (i, wait) in log.iter().enumerate() {
        if wait.op != MutexOp::Waiting {
            continue;
        }
        let acquired = find_after(log, i + 1, wait.mutex, MutexOp::Acquired);
        let released =
            acquired.and_then(|a| find_after(log, a + 1, wait.mutex, MutexOp::Released));
        match (acquired, released) {
            (Some(a), Some(r)) => pairing.windows.push(ContentionWindow {
                mutex: wait.mutex,
                waiting_cycle: wait.cycle,
                acquired_cycle: log[a].cycle,
                released_cycle: log[r].cycle,
            }),
            _ => pairing.unterminated.push(UnterminatedWait {
                mutex: wait.mutex,
                waiting_cycle: wait.cycle,
                acquired: acquired.is_some(),
            }),
        }
    }
    pairing
}

/// Pair the mutex log of a pinned frame, logging unterminated waits.
#[must_use]
pub fn pair_frame_waits(view: &FrameView) -> MutexPairing {
    let pairing = pair_mutex_waits(view.mutex_ops());
    for wait in &pairing.unterminated {
        tracing::warn!(
            thread = %view.thread_name(),
            frame = view.frame(),
            mutex = wait.mutex.0,
            acquired = wait.acquired,
            "unterminated mutex wait"
        );
    }
    pairing
}
