//! Per-frame call tree and its open/close cursor.

use crate::arena::{NodeArena, NodeId, NodePool, RawNode, ScopeNode};
use crate::name::ScopeName;
use crate::view::ScopeSource;

/// `frame_recorded` of a slot nobody has written yet.
pub const NEVER_RECORDED: u64 = u64::MAX;

/// Where the next opened scope gets linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Root,
    Child(u32),
    Sibling(u32),
}

/// One frame's call tree on one thread.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    root: Option<u32>,
    cursor: Cursor,
    parent_of_next: Option<u32>,
    frame_recorded: u64,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self {
            root: None,
            cursor: Cursor::Root,
            parent_of_next: None,
            frame_recorded: NEVER_RECORDED,
        }
    }
}

impl ScopeTree {
    /// Index of the first top-level scope.
    pub(crate) const fn raw_root(&self) -> Option<u32> {
        self.root
    }

    /// Frame id this tree was recorded for.
    #[must_use]
    pub const fn frame_recorded(&self) -> u64 {
        self.frame_recorded
    }

    /// Whether some scope of this frame is still open.
    #[must_use]
    pub const fn has_open_scope(&self) -> bool {
        self.parent_of_next.is_some()
    }

    pub(crate) fn root_id(&self, pool: u32) -> Option<NodeId> {
        self.root.map(|i| NodeId::new(i, pool, self.frame_recorded))
    }

    /// Empty the tree and stamp it with a new frame id.
    pub(crate) fn reset(&mut self, frame: u64) {
        self.root = None;
        self.cursor = Cursor::Root;
        self.parent_of_next = None;
        self.frame_recorded = frame;
    }

    /// Link a fresh node for `name` at the cursor and descend into it.
    ///
    /// `now` is sampled as the very last step so the bookkeeping above it
    /// is not billed to the scope.
    ///
    /// # Safety
    /// Caller is the pool's only writer and this tree's slot is claimed.
    #[inline]
    pub(crate) unsafe fn open(
        &mut self,
        pool: &NodePool,
        arena: &mut NodeArena,
        name: ScopeName,
        now: impl FnOnce() -> u64,
    ) -> Option<u32> {
        // SAFETY: single writer on a claimed slot, per the caller.
        let index = unsafe { arena.acquire(pool) }?;

        // SAFETY: as above; `index` was just taken off the free list.
        unsafe {
            match self.cursor {
                Cursor::Root => self.root = Some(index),
                Cursor::Child(parent) => pool.update(parent, |n| n.child = Some(index)),
                Cursor::Sibling(prev) => pool.update(prev, |n| n.sibling = Some(index)),
            }

            let parent = self.parent_of_next;
            pool.update(index, |n| {
                *n = RawNode {
                    name,
                    parent,
                    ..RawNode::EMPTY
                };
            });
        }
        self.cursor = Cursor::Child(index);
        self.parent_of_next = Some(index);

        let start = now();
        // SAFETY: as above.
        unsafe { pool.update(index, |n| n.starting_cycle = start) };
        Some(index)
    }

    /// Stamp the duration of `index` and move the cursor past it.
    ///
    /// Returns `false` when `index` was not the innermost open scope. The
    /// tree stays walkable either way.
    ///
    /// # Safety
    /// Caller is the pool's only writer, this tree's slot is claimed, and
    /// `index` was opened in this tree.
    #[inline]
    pub(crate) unsafe fn close(&mut self, pool: &NodePool, index: u32, end_cycle: u64) -> bool {
        let well_nested = self.parent_of_next == Some(index);

        // SAFETY: single writer on a claimed slot, per the caller.
        let parent = unsafe {
            pool.update(index, |n| {
                n.cycle_count = end_cycle.saturating_sub(n.starting_cycle);
                n.parent
            })
        };

        self.cursor = Cursor::Sibling(index);
        self.parent_of_next = parent;
        well_nested
    }
}

/// Builds a scope tree off the recording path, with explicit cycle values.
///
/// Useful for replaying captured data and for exercising collation on a
/// known tree shape.
pub struct TreeBuilder {
    pool: NodePool,
    arena: NodeArena,
    tree: ScopeTree,
}

impl TreeBuilder {
    /// Create a builder with room for `capacity` scopes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut tree = ScopeTree::default();
        tree.reset(0);
        Self {
            pool: NodePool::new(capacity),
            arena: NodeArena::new(capacity),
            tree,
        }
    }

    /// Open a scope starting at `start`. `None` when out of capacity.
    pub fn open(&mut self, name: &'static str, start: u64) -> Option<NodeId> {
        // SAFETY: `&mut self` makes this the pool's only accessor; no
        // reference into the pool outlives a single call.
        let index = unsafe {
            self.tree
                .open(&self.pool, &mut self.arena, ScopeName::new(name), || start)
        }?;
        Some(NodeId::new(index, self.pool.id(), self.tree.frame_recorded()))
    }

    /// Close a scope opened by this builder at `end`.
    ///
    /// Ids from another builder or from before the last `clear` are ignored.
    pub fn close(&mut self, id: NodeId, end: u64) -> bool {
        if !self.pool.owns(id, self.tree.frame_recorded()) {
            return false;
        }
        // SAFETY: as in `open`; the id belongs to the current tree.
        unsafe { self.tree.close(&self.pool, id.raw(), end) }
    }

    /// Open and immediately close a scope spanning `start..end`.
    pub fn leaf(&mut self, name: &'static str, start: u64, end: u64) -> Option<NodeId> {
        let id = self.open(name, start)?;
        self.close(id, end);
        Some(id)
    }

    /// The tree built so far.
    #[must_use]
    pub const fn tree(&self) -> &ScopeTree {
        &self.tree
    }

    /// Drop every scope and start over.
    pub fn clear(&mut self) {
        // SAFETY: as in `open`.
        unsafe {
            self.arena.recycle(&self.pool, self.tree.raw_root());
        }
        let next = self.tree.frame_recorded().wrapping_add(1);
        self.tree.reset(next);
    }
}

impl ScopeSource for TreeBuilder {
    fn root(&self) -> Option<NodeId> {
        self.tree.root_id(self.pool.id())
    }

    fn get(&self, id: NodeId) -> Option<ScopeNode> {
        if !self.pool.owns(id, self.tree.frame_recorded()) {
            return None;
        }
        // SAFETY: nothing writes the pool while `&self` is held.
        let raw = unsafe { self.pool.read(id.raw()) };
        Some(raw.resolve(id.pool(), id.frame()))
    }
}
