//! Global per-frame statistics ring.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::tree::NEVER_RECORDED;

/// Timing of one completed application frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Global frame id these stats describe.
    pub frame: u64,
    /// Cycle counter when the frame began.
    pub starting_cycle: u64,
    /// Cycles from frame begin to frame end.
    pub total_cycles: u64,
    /// Wall time of the frame as reported by the orchestrator.
    pub frame_ms: f64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            frame: NEVER_RECORDED,
            starting_cycle: 0,
            total_cycles: 0,
            frame_ms: 0.0,
        }
    }
}

impl FrameStats {
    /// Whether the orchestrator has written this entry.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        self.frame != NEVER_RECORDED
    }
}

/// Min/max/average frame time over the tracked history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTimeSummary {
    /// Fastest frame in milliseconds.
    pub min_ms: f64,
    /// Slowest frame in milliseconds.
    pub max_ms: f64,
    /// Mean frame time in milliseconds.
    pub avg_ms: f64,
    /// Number of frames summarized.
    pub frames: usize,
}

impl FrameTimeSummary {
    /// Summarize recorded entries, ignoring empty ones.
    #[must_use]
    pub fn from_stats<'a>(stats: impl IntoIterator<Item = &'a FrameStats>) -> Self {
        let mut summary = Self {
            min_ms: f64::MAX,
            ..Self::default()
        };
        let mut total = 0.0;
        for s in stats.into_iter().filter(|s| s.is_recorded()) {
            summary.min_ms = summary.min_ms.min(s.frame_ms);
            summary.max_ms = summary.max_ms.max(s.frame_ms);
            total += s.frame_ms;
            summary.frames += 1;
        }
        if summary.frames == 0 {
            return Self::default();
        }
        summary.avg_ms = total / summary.frames as f64;
        summary
    }
}

/// Ring of `FrameStats`, written once per frame by the orchestrator.
pub(crate) struct FrameStatsRing {
    entries: RwLock<Box<[FrameStats]>>,
}

impl FrameStatsRing {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            entries: RwLock::new(vec![FrameStats::default(); len].into_boxed_slice()),
        }
    }

    pub(crate) fn record(&self, stats: FrameStats) {
        let mut entries = self.entries.write();
        let slot = (stats.frame % entries.len() as u64) as usize;
        entries[slot] = stats;
    }

    pub(crate) fn get(&self, slot: usize) -> Option<FrameStats> {
        self.entries.read().get(slot).copied()
    }

    pub(crate) fn history(&self) -> Vec<FrameStats> {
        self.entries.read().to_vec()
    }

    pub(crate) fn summary(&self) -> FrameTimeSummary {
        FrameTimeSummary::from_stats(self.entries.read().iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(frame: u64, frame_ms: f64) -> FrameStats {
        FrameStats {
            frame,
            starting_cycle: frame * 100,
            total_cycles: 100,
            frame_ms,
        }
    }

    #[test]
    fn ring_wraps_by_frame_id() {
        let ring = FrameStatsRing::new(4);
        ring.record(stats(1, 16.0));
        ring.record(stats(5, 17.0));
        let slot = ring.get(1).unwrap();
        assert_eq!(slot.frame, 5);
        assert!(!ring.get(0).unwrap().is_recorded());
        assert!(ring.get(4).is_none());
    }

    #[test]
    fn summary_skips_unrecorded() {
        let ring = FrameStatsRing::new(8);
        ring.record(stats(0, 10.0));
        ring.record(stats(1, 20.0));
        ring.record(stats(2, 30.0));
        let summary = ring.summary();
        assert_eq!(summary.frames, 3);
        assert!((summary.min_ms - 10.0).abs() < f64::EPSILON);
        assert!((summary.max_ms - 30.0).abs() < f64::EPSILON);
        assert!((summary.avg_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_summary_is_zero() {
        let ring = FrameStatsRing::new(2);
        assert_eq!(ring.summary(), FrameTimeSummary::default());
    }
}
