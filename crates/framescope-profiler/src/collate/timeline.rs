//! Per-scope bars for a cycle timeline of one frame.

use serde::{Deserialize, Serialize};

use crate::arena::NodeId;
use crate::collate::unique::ExpansionState;
use crate::frame::FrameStats;
use crate::name::ScopePath;
use crate::view::ScopeSource;

/// One scope instance placed on the frame's cycle range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleBar {
    /// Scope name.
    pub name: String,
    /// Row of the bar; children sit one row below their parent.
    pub depth: u32,
    /// Raw [`ScopePath`], used to toggle the bar.
    pub path: u64,
    /// Cycles from frame start to scope start.
    pub start_offset: u64,
    /// Scope duration in cycles.
    pub cycles: u64,
    /// `start_offset` as a fraction of the frame.
    pub start_fraction: f32,
    /// `cycles` as a fraction of the frame.
    pub frame_fraction: f32,
}

fn fraction(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) as f32
    }
}

/// Every top-level scope as a bar, plus the children of expanded ones.
///
/// Unlike [`call_graph`](crate::call_graph), instances are not merged: each
/// call gets its own bar at its own position.
pub fn timeline<S: ScopeSource + ?Sized>(
    source: &S,
    frame: &FrameStats,
    expansion: &ExpansionState,
) -> Vec<CycleBar> {
    let mut bars = Vec::new();
    // (next sibling to emit, path of its parent, its row)
    let mut stack: Vec<(Option<NodeId>, ScopePath, u32)> =
        vec![(source.root(), ScopePath::ROOT, 0)];
    while let Some((next, parent, depth)) = stack.pop() {
        let Some(node) = next.and_then(|id| source.get(id)) else {
            continue;
        };

        let path = parent.child(node.name);
        let start_offset = node.starting_cycle.saturating_sub(frame.starting_cycle);
        bars.push(CycleBar {
            name: node.name.as_str().to_owned(),
            depth,
            path: path.raw(),
            start_offset,
            cycles: node.cycle_count,
            start_fraction: fraction(start_offset, frame.total_cycles),
            frame_fraction: fraction(node.cycle_count, frame.total_cycles),
        });

        // Children go on top so they are emitted before the next sibling.
        stack.push((node.sibling, parent, depth));
        if node.child.is_some() && expansion.is_expanded(path) {
            stack.push((node.child, path, depth + 1));
        }
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeBuilder;

    #[test]
    fn bars_are_placed_relative_to_frame() {
        let mut b = TreeBuilder::new(8);
        let update = b.open("update", 1_100).unwrap();
        b.leaf("step", 1_200, 1_300);
        b.close(update, 1_500);
        b.leaf("render", 1_500, 2_000);

        let frame = FrameStats {
            frame: 0,
            starting_cycle: 1_000,
            total_cycles: 1_000,
            frame_ms: 16.0,
        };
        let mut expansion = ExpansionState::new();
        let bars = timeline(&b, &frame, &expansion);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].start_offset, 100);
        assert!((bars[0].frame_fraction - 0.4).abs() < 1e-6);
        assert!((bars[1].start_fraction - 0.5).abs() < 1e-6);

        expansion.expand(ScopePath::from_raw(bars[0].path));
        let bars = timeline(&b, &frame, &expansion);
        let rows: Vec<_> = bars.iter().map(|b| (b.name.as_str(), b.depth)).collect();
        assert_eq!(rows, [("update", 0), ("step", 1), ("render", 0)]);
    }

    #[test]
    fn repeated_calls_get_separate_bars() {
        let mut b = TreeBuilder::new(8);
        b.leaf("tick", 0, 10);
        b.leaf("tick", 10, 30);
        let bars = timeline(&b, &FrameStats::default(), &ExpansionState::new());
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].cycles, 20);
        assert!(bars[1].frame_fraction.abs() < f32::EPSILON);
    }

    #[test]
    fn deeply_nested_frame_expands_fully() {
        const DEPTH: u64 = 60_000;
        let mut b = TreeBuilder::new(DEPTH as usize + 1);
        let ids: Vec<_> = (0..DEPTH).map(|i| b.open("deep", i).unwrap()).collect();
        for (i, id) in ids.into_iter().enumerate().rev() {
            b.close(id, 2 * DEPTH - i as u64);
        }
        b.leaf("after", 2 * DEPTH, 2 * DEPTH + 1);

        let mut expansion = ExpansionState::new();
        expansion.set_expand_all(true);
        let bars = timeline(&b, &FrameStats::default(), &expansion);

        assert_eq!(bars.len(), DEPTH as usize + 1);
        assert_eq!(bars[0].depth, 0);
        assert_eq!(bars[DEPTH as usize - 1].depth, DEPTH as u32 - 1);
        assert_eq!(bars[DEPTH as usize - 1].cycles, 2);
        let last = &bars[DEPTH as usize];
        assert_eq!((last.name.as_str(), last.depth), ("after", 0));
    }
}
