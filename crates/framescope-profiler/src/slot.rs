//! Reader/writer handshake for one ring-buffer slot.
//!
//! A slot is either claimed by its owning thread for writing or pinned by
//! any number of readers, never both. The writer never waits: if a reader
//! still pins the slot it wants, the claim fails and is retried later.

use std::sync::atomic::{AtomicU32, Ordering};

const WRITING: u32 = 1 << 31;
const READERS: u32 = WRITING - 1;

/// Atomic state word: WRITING bit plus reader count.
#[derive(Debug, Default)]
pub(crate) struct SlotState(AtomicU32);

impl SlotState {
    /// Writer side: claim the slot if nobody reads it.
    ///
    /// Acquire pairs with the readers' Release in `unpin` so their last
    /// reads happen before any reuse of the slot.
    #[inline]
    pub(crate) fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(0, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Writer side: publish the slot's contents and allow readers.
    #[inline]
    pub(crate) fn release(&self) {
        self.0.fetch_and(!WRITING, Ordering::Release);
    }

    /// Reader side: pin the slot unless it is being written.
    pub(crate) fn try_pin(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current & WRITING != 0 || current & READERS == READERS {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Reader side: drop a pin taken with `try_pin`.
    pub(crate) fn unpin(&self) {
        let previous = self.0.fetch_sub(1, Ordering::Release);
        debug_assert!(previous & READERS != 0, "unpin without pin");
    }

    /// Whether the owning thread currently holds the slot.
    #[cfg(test)]
    fn is_writing(&self) -> bool {
        self.0.load(Ordering::Relaxed) & WRITING != 0
    }

    #[cfg(test)]
    fn readers(&self) -> u32 {
        self.0.load(Ordering::Relaxed) & READERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_excludes_readers() {
        let slot = SlotState::default();
        assert!(slot.try_claim());
        assert!(slot.is_writing());
        assert!(!slot.try_pin());
        slot.release();
        assert!(slot.try_pin());
    }

    #[test]
    fn readers_block_claim_until_unpinned() {
        let slot = SlotState::default();
        assert!(slot.try_pin());
        assert!(slot.try_pin());
        assert_eq!(slot.readers(), 2);
        assert!(!slot.try_claim());
        slot.unpin();
        assert!(!slot.try_claim());
        slot.unpin();
        assert!(slot.try_claim());
    }
}
