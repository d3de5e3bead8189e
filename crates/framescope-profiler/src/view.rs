//! Read-only access to recorded scope trees.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::arena::{NodeId, ScopeNode};
use crate::frame::FrameStats;
use crate::mutex_ops::MutexOpRecord;
use crate::thread::{FrameSlot, ThreadState};

/// Anything a completed scope tree can be read from.
///
/// Implemented by live [`FrameView`]s and by the offline
/// [`TreeBuilder`](crate::TreeBuilder), so every collation pass works on
/// both.
pub trait ScopeSource {
    /// First top-level scope.
    fn root(&self) -> Option<NodeId>;

    /// Look up a node. `None` for ids that do not belong to this tree.
    fn get(&self, id: NodeId) -> Option<ScopeNode>;

    /// Look up a node known to belong to this tree.
    ///
    /// # Panics
    /// Panics when `id` comes from another tree or frame.
    #[track_caller]
    fn node(&self, id: NodeId) -> ScopeNode {
        match self.get(id) {
            Some(node) => node,
            None => panic!("{id:?} does not belong to this scope tree"),
        }
    }

    /// `first` and every sibling after it, in call order.
    fn siblings(&self, first: Option<NodeId>) -> Siblings<'_, Self> {
        Siblings {
            source: self,
            next: first,
        }
    }

    /// Top-level scopes of the frame.
    fn top_level(&self) -> Siblings<'_, Self> {
        self.siblings(self.root())
    }

    /// Direct children of `id`.
    fn children(&self, id: NodeId) -> Siblings<'_, Self> {
        self.siblings(self.get(id).and_then(|n| n.child))
    }

    /// Pre-order walk over the whole tree, yielding each node with its depth.
    fn walk_depth_first(&self) -> DepthFirst<'_, Self> {
        DepthFirst {
            source: self,
            stack: self.root().map(|r| (r, 0)).into_iter().collect(),
        }
    }

    /// Number of scopes recorded.
    fn scope_count(&self) -> usize {
        self.walk_depth_first().count()
    }
}

/// Iterator over a sibling chain. See [`ScopeSource::siblings`].
pub struct Siblings<'a, S: ?Sized> {
    source: &'a S,
    next: Option<NodeId>,
}

impl<S: ScopeSource + ?Sized> Iterator for Siblings<'_, S> {
    type Item = (NodeId, ScopeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.source.get(id)?;
        self.next = node.sibling;
        Some((id, node))
    }
}

/// Pre-order iterator. See [`ScopeSource::walk_depth_first`].
pub struct DepthFirst<'a, S: ?Sized> {
    source: &'a S,
    stack: Vec<(NodeId, usize)>,
}

impl<S: ScopeSource + ?Sized> Iterator for DepthFirst<'_, S> {
    type Item = (NodeId, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        if let Some(node) = self.source.get(id) {
            if let Some(sibling) = node.sibling {
                self.stack.push((sibling, depth));
            }
            if let Some(child) = node.child {
                self.stack.push((child, depth + 1));
            }
        }
        Some((id, depth))
    }
}

/// Render a tree as indented text: name, cycles, start offset from
/// `frame_start`.
pub fn dump_tree<S: ScopeSource + ?Sized>(source: &S, frame_start: u64) -> String {
    let mut out = String::new();
    for (id, depth) in source.walk_depth_first() {
        let node = source.node(id);
        let _ = writeln!(
            out,
            "{:indent$}{} cycles={} start=+{}",
            "",
            node.name,
            node.cycle_count,
            node.starting_cycle.saturating_sub(frame_start),
            indent = depth * 2,
        );
    }
    out
}

/// A pinned, completed frame slot of one thread.
///
/// While the view lives, the owning thread cannot reclaim the slot; it
/// defers its claim and drops scopes instead. Views are meant to be short
/// lived: collate, then drop.
pub struct FrameView {
    thread: Arc<ThreadState>,
    slot: usize,
}

impl FrameView {
    /// Pin `slot` of `thread`, or `None` if it is being written.
    pub(crate) fn pin(thread: Arc<ThreadState>, slot: usize) -> Option<Self> {
        if thread.pin(slot) {
            Some(Self { thread, slot })
        } else {
            None
        }
    }

    fn data(&self) -> &FrameSlot {
        // SAFETY: the pin taken in `pin` keeps the writer off this slot
        // until `drop`.
        unsafe { self.thread.frame_slot(self.slot) }
    }

    /// Registration index of the thread (0 is the main thread).
    #[must_use]
    pub fn thread_index(&self) -> usize {
        self.thread.index()
    }

    /// Thread name given at registration.
    #[must_use]
    pub fn thread_name(&self) -> &str {
        self.thread.name()
    }

    /// Ring slot this view reads.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Global frame id recorded in this slot.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.data().tree.frame_recorded()
    }

    /// Mutex operations logged during the frame, in order.
    #[must_use]
    pub fn mutex_ops(&self) -> &[MutexOpRecord] {
        self.data().mutex_ops.records()
    }

    /// Mutex operations that did not fit the per-frame log.
    #[must_use]
    pub fn mutex_ops_dropped(&self) -> u32 {
        self.data().mutex_ops.dropped()
    }

    /// Whether the thread left a scope open when the frame ended.
    #[must_use]
    pub fn has_open_scope(&self) -> bool {
        self.data().tree.has_open_scope()
    }
}

impl ScopeSource for FrameView {
    fn root(&self) -> Option<NodeId> {
        self.data().tree.root_id(self.thread.pool_id())
    }

    fn get(&self, id: NodeId) -> Option<ScopeNode> {
        let frame = self.frame();
        if !self.thread.owns(id, frame) {
            return None;
        }
        // SAFETY: ids of the pinned frame only name nodes linked into it,
        // and the pin keeps the writer from recycling them.
        let raw = unsafe { self.thread.read_node(id.raw()) };
        Some(raw.resolve(id.pool(), frame))
    }
}

impl Drop for FrameView {
    fn drop(&mut self) {
        self.thread.unpin(self.slot);
    }
}

impl std::fmt::Debug for FrameView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameView")
            .field("thread", &self.thread_index())
            .field("slot", &self.slot)
            .field("frame", &self.frame())
            .finish()
    }
}

/// Why a thread is missing from a [`ReadFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The thread's slot holds a different frame: it did not run then.
    NotParticipating {
        /// Frame id found in the thread's slot.
        recorded: u64,
    },
    /// The thread is writing that slot right now.
    InFlight,
}

/// A thread left out of a read frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedThread {
    /// Registration index.
    pub thread_index: usize,
    /// Thread name.
    pub thread_name: String,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Every thread's tree for the selected read slot.
#[derive(Debug)]
pub struct ReadFrame {
    /// Slot that was read.
    pub slot: usize,
    /// Global frame id (the main thread's recording of the slot).
    pub frame: u64,
    /// Orchestrator statistics for that frame.
    pub stats: FrameStats,
    /// Participating threads, main thread first.
    pub threads: Vec<FrameView>,
    /// Threads that were not read.
    pub skipped: Vec<SkippedThread>,
}

impl ReadFrame {
    /// View of a given thread, if it participated.
    #[must_use]
    pub fn thread(&self, index: usize) -> Option<&FrameView> {
        self.threads.iter().find(|v| v.thread_index() == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeBuilder;

    fn sample() -> TreeBuilder {
        let mut b = TreeBuilder::new(16);
        let a = b.open("a", 100).unwrap();
        b.leaf("b", 110, 120);
        let c = b.open("c", 120).unwrap();
        b.leaf("d", 121, 125);
        b.close(c, 130);
        b.close(a, 140);
        b.leaf("e", 140, 150);
        b
    }

    #[test]
    fn depth_first_reports_depths() {
        let b = sample();
        let walk: Vec<_> = b
            .walk_depth_first()
            .map(|(id, depth)| (b.node(id).name.as_str(), depth))
            .collect();
        assert_eq!(
            walk,
            [("a", 0), ("b", 1), ("c", 1), ("d", 2), ("e", 0)]
        );
        assert_eq!(b.scope_count(), 5);
    }

    #[test]
    fn children_and_top_level() {
        let b = sample();
        let top: Vec<_> = b.top_level().map(|(_, n)| n.name.as_str()).collect();
        assert_eq!(top, ["a", "e"]);

        let a = b.root().unwrap();
        let kids: Vec<_> = b.children(a).map(|(_, n)| n.name.as_str()).collect();
        assert_eq!(kids, ["b", "c"]);
    }

    #[test]
    fn dump_indents_by_depth() {
        let b = sample();
        let text = dump_tree(&b, 100);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "a cycles=40 start=+0");
        assert_eq!(lines[3], "    d cycles=4 start=+21");
    }

    #[test]
    fn foreign_ids_do_not_resolve() {
        let b = sample();
        let other = sample();
        let id = other.root().unwrap();
        assert!(b.get(id).is_none());
        assert_eq!(b.children(id).count(), 0);
    }
}
