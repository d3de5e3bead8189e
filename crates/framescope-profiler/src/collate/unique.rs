//! Unique-sibling aggregation and the expandable call graph built on it.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::arena::{NodeId, ScopeNode};
use crate::name::{ScopeName, ScopePath};
use crate::view::ScopeSource;

/// All calls to one scope name among a set of siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueScope {
    /// Shared name.
    pub name: ScopeName,
    /// Number of sibling instances.
    pub call_count: u32,
    /// Sum of their cycle counts.
    pub total_cycles: u64,
    /// Shortest instance.
    pub min_cycles: u64,
    /// Longest instance.
    pub max_cycles: u64,
    /// First instance; its children are the ones shown when expanded.
    pub representative: NodeId,
}

impl UniqueScope {
    fn first(id: NodeId, node: &ScopeNode) -> Self {
        Self {
            name: node.name,
            call_count: 1,
            total_cycles: node.cycle_count,
            min_cycles: node.cycle_count,
            max_cycles: node.cycle_count,
            representative: id,
        }
    }

    fn add(&mut self, node: &ScopeNode) {
        self.call_count += 1;
        self.total_cycles += node.cycle_count;
        self.min_cycles = self.min_cycles.min(node.cycle_count);
        self.max_cycles = self.max_cycles.max(node.cycle_count);
    }

    /// Mean cycles per call.
    #[must_use]
    pub fn avg_cycles(&self) -> u64 {
        self.total_cycles / u64::from(self.call_count.max(1))
    }
}

/// Group nodes by name, in order of first appearance.
pub fn collate_unique(siblings: impl IntoIterator<Item = (NodeId, ScopeNode)>) -> Vec<UniqueScope> {
    let mut uniques: Vec<UniqueScope> = Vec::new();
    let mut by_name: HashMap<ScopeName, usize> = HashMap::new();
    for (id, node) in siblings {
        match by_name.get(&node.name) {
            Some(&i) => uniques[i].add(&node),
            None => {
                by_name.insert(node.name, uniques.len());
                uniques.push(UniqueScope::first(id, &node));
            }
        }
    }
    uniques
}

/// Group `first` and its following siblings by name.
pub fn collate_unique_siblings<S: ScopeSource + ?Sized>(
    source: &S,
    first: Option<NodeId>,
) -> Vec<UniqueScope> {
    collate_unique(source.siblings(first))
}

/// Which call-graph rows a viewer has unfolded.
///
/// Owned by the consumer and keyed by [`ScopePath`], so fold state carries
/// over between frames of the same shape without touching recorded data.
#[derive(Debug, Clone, Default)]
pub struct ExpansionState {
    /// Paths whose state differs from the `expand_all` default.
    toggled: HashSet<ScopePath>,
    expand_all: bool,
}

impl ExpansionState {
    /// Everything folded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether rows under `path` are shown.
    #[must_use]
    pub fn is_expanded(&self, path: ScopePath) -> bool {
        self.expand_all != self.toggled.contains(&path)
    }

    /// Show rows under `path`.
    pub fn expand(&mut self, path: ScopePath) {
        self.set(path, true);
    }

    /// Hide rows under `path`.
    pub fn collapse(&mut self, path: ScopePath) {
        self.set(path, false);
    }

    /// Flip `path`. Returns the new state.
    pub fn toggle(&mut self, path: ScopePath) -> bool {
        let expanded = !self.is_expanded(path);
        self.set(path, expanded);
        expanded
    }

    fn set(&mut self, path: ScopePath, expanded: bool) {
        if expanded == self.expand_all {
            self.toggled.remove(&path);
        } else {
            self.toggled.insert(path);
        }
    }

    /// Expand or fold every path, forgetting individual choices.
    pub fn set_expand_all(&mut self, expand_all: bool) {
        self.expand_all = expand_all;
        self.toggled.clear();
    }

    /// Whether paths default to expanded.
    #[must_use]
    pub const fn expand_all(&self) -> bool {
        self.expand_all
    }
}

/// One row of the call graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallGraphRow {
    /// Nesting level, for indentation.
    pub depth: u32,
    /// Raw [`ScopePath`], used to toggle the row.
    pub path: u64,
    /// Scope name.
    pub name: String,
    /// Sibling instances merged into this row.
    pub calls: u32,
    /// Summed cycles.
    pub total_cycles: u64,
    /// Shortest instance.
    pub min_cycles: u64,
    /// Longest instance.
    pub max_cycles: u64,
    /// Mean cycles per call.
    pub avg_cycles: u64,
    /// Share of the frame, 0 to 100.
    pub frame_percent: f32,
    /// Whether the representative has children.
    pub has_children: bool,
    /// Whether the children are listed below this row.
    pub expanded: bool,
}

/// Collapse a frame tree into call-graph rows, descending only into
/// expanded rows. Percentages are relative to `frame_cycles`.
pub fn call_graph<S: ScopeSource + ?Sized>(
    source: &S,
    expansion: &ExpansionState,
    frame_cycles: u64,
) -> Vec<CallGraphRow> {
    let mut rows = Vec::new();
    // One entry per open level: its remaining groups, parent path and depth.
    let mut stack = vec![(
        collate_unique_siblings(source, source.root()).into_iter(),
        ScopePath::ROOT,
        0u32,
    )];
    while let Some((uniques, parent, depth)) = stack.last_mut() {
        let (parent, depth) = (*parent, *depth);
        let Some(unique) = uniques.next() else {
            stack.pop();
            continue;
        };

        let path = parent.child(unique.name);
        let child = source.get(unique.representative).and_then(|n| n.child);
        let expanded = expansion.is_expanded(path);
        let frame_percent = if frame_cycles == 0 {
            0.0
        } else {
            (100.0 * unique.total_cycles as f64 / frame_cycles as f64) as f32
        };

        rows.push(CallGraphRow {
            depth,
            path: path.raw(),
            name: unique.name.as_str().to_owned(),
            calls: unique.call_count,
            total_cycles: unique.total_cycles,
            min_cycles: unique.min_cycles,
            max_cycles: unique.max_cycles,
            avg_cycles: unique.avg_cycles(),
            frame_percent,
            has_children: child.is_some(),
            expanded,
        });

        if expanded && child.is_some() {
            stack.push((collate_unique_siblings(source, child).into_iter(), path, depth + 1));
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeBuilder;

    static DRAW: &str = "draw";
    static UPDATE: &str = "update";

    #[test]
    fn siblings_aggregate_by_name() {
        let mut b = TreeBuilder::new(16);
        b.leaf(DRAW, 0, 5);
        b.leaf("cull", 5, 6);
        b.leaf(DRAW, 6, 16);
        b.leaf(DRAW, 16, 19);

        let uniques = collate_unique_siblings(&b, b.root());
        assert_eq!(uniques.len(), 2);
        let draw = uniques[0];
        assert_eq!(draw.name.as_str(), "draw");
        assert_eq!(draw.call_count, 3);
        assert_eq!(draw.total_cycles, 18);
        assert_eq!(draw.min_cycles, 3);
        assert_eq!(draw.max_cycles, 10);
        assert_eq!(draw.avg_cycles(), 6);
        assert_eq!(draw.representative, b.root().unwrap());
        assert_eq!(uniques[1].call_count, 1);
    }

    #[test]
    fn same_text_different_address_stays_separate() {
        let leaked: &'static str = Box::leak(String::from("draw").into_boxed_str());
        let mut b = TreeBuilder::new(4);
        b.leaf(DRAW, 0, 1);
        b.leaf(leaked, 1, 2);
        assert_eq!(collate_unique_siblings(&b, b.root()).len(), 2);
    }

    fn nested() -> TreeBuilder {
        let mut b = TreeBuilder::new(32);
        let first = b.open(UPDATE, 0).unwrap();
        b.leaf("physics", 0, 40);
        b.close(first, 50);
        let second = b.open(UPDATE, 50).unwrap();
        b.leaf("ai", 50, 60);
        b.close(second, 100);
        b
    }

    #[test]
    fn call_graph_descends_only_into_expanded_representative() {
        let b = nested();
        let mut expansion = ExpansionState::new();

        let rows = call_graph(&b, &expansion, 200);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].calls, 2);
        assert_eq!(rows[0].total_cycles, 100);
        assert!((rows[0].frame_percent - 50.0).abs() < 1e-4);
        assert!(rows[0].has_children);
        assert!(!rows[0].expanded);

        expansion.toggle(ScopePath::from_raw(rows[0].path));
        let rows = call_graph(&b, &expansion, 200);
        let names: Vec<_> = rows.iter().map(|r| (r.name.as_str(), r.depth)).collect();
        // Only the first "update" instance's children are listed.
        assert_eq!(names, [("update", 0), ("physics", 1)]);
    }

    #[test]
    fn expansion_state_survives_expand_all_toggles() {
        let path = ScopePath::ROOT.child(ScopeName::new("x"));
        let mut state = ExpansionState::new();
        assert!(!state.is_expanded(path));
        assert!(state.toggle(path));
        state.collapse(path);
        assert!(!state.is_expanded(path));

        state.set_expand_all(true);
        assert!(state.is_expanded(path));
        assert!(!state.toggle(path));
        state.expand(path);
        assert!(state.is_expanded(path));
    }

    #[test]
    fn zero_frame_cycles_gives_zero_percent() {
        let b = nested();
        let rows = call_graph(&b, &ExpansionState::new(), 0);
        assert!(rows.iter().all(|r| r.frame_percent.abs() < f32::EPSILON));
    }

    #[test]
    fn deeply_nested_frame_expands_fully() {
        const DEPTH: u64 = 60_000;
        let mut b = TreeBuilder::new(DEPTH as usize + 2);
        let ids: Vec<_> = (0..DEPTH).map(|i| b.open(UPDATE, i).unwrap()).collect();
        for (i, id) in ids.into_iter().enumerate().rev() {
            b.close(id, 2 * DEPTH - i as u64);
        }
        b.leaf(DRAW, 2 * DEPTH, 2 * DEPTH + 1);
        b.leaf(DRAW, 2 * DEPTH + 1, 2 * DEPTH + 3);

        let mut expansion = ExpansionState::new();
        expansion.set_expand_all(true);
        let rows = call_graph(&b, &expansion, 2 * DEPTH + 3);

        assert_eq!(rows.len(), DEPTH as usize + 1);
        let deepest = &rows[DEPTH as usize - 1];
        assert_eq!(deepest.depth, DEPTH as u32 - 1);
        assert!(!deepest.has_children);
        assert!(rows[..DEPTH as usize - 1].iter().all(|r| r.has_children));
        let last = &rows[DEPTH as usize];
        assert_eq!((last.name.as_str(), last.depth, last.calls), ("draw", 0, 2));
    }
}
