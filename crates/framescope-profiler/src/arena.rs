//! Fixed-capacity scope node storage and its free list.
//!
//! Every thread owns one [`NodePool`] sized at registration. Nodes are
//! linked into frame trees by index; a frame's nodes go back on the free
//! list only when that frame's ring slot is about to be reused. Nothing is
//! allocated on the recording path.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::name::ScopeName;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Handle to a recorded scope: pool slot, owning pool and frame.
///
/// Sources only resolve ids of their own pool and frame, so an id kept
/// from another thread or an older view can never reach a node that has
/// since been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    pool: u32,
    frame: u64,
}

impl NodeId {
    pub(crate) const fn new(index: u32, pool: u32, frame: u64) -> Self {
        Self { index, pool, frame }
    }

    /// Position in the owning thread's pool.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Frame the scope was recorded in.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> u64 {
        self.frame
    }

    pub(crate) const fn raw(self) -> u32 {
        self.index
    }

    pub(crate) const fn pool(self) -> u32 {
        self.pool
    }
}

/// One timed region instance, as seen by readers.
#[derive(Debug, Clone, Copy)]
pub struct ScopeNode {
    /// Scope identity.
    pub name: ScopeName,
    /// Counter value when the scope opened.
    pub starting_cycle: u64,
    /// Duration in cycles; 0 until closed.
    pub cycle_count: u64,
    /// Enclosing scope, `None` at the top level.
    pub parent: Option<NodeId>,
    /// First nested scope.
    pub child: Option<NodeId>,
    /// Next scope under the same parent.
    pub sibling: Option<NodeId>,
}

/// Pool-internal node. Links are indices into the same pool and always
/// point at nodes of the same frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawNode {
    pub(crate) name: ScopeName,
    pub(crate) starting_cycle: u64,
    pub(crate) cycle_count: u64,
    pub(crate) parent: Option<u32>,
    pub(crate) child: Option<u32>,
    pub(crate) sibling: Option<u32>,
}

impl RawNode {
    pub(crate) const EMPTY: Self = Self {
        name: ScopeName::EMPTY,
        starting_cycle: 0,
        cycle_count: 0,
        parent: None,
        child: None,
        sibling: None,
    };

    pub(crate) fn resolve(self, pool: u32, frame: u64) -> ScopeNode {
        let link = |index: Option<u32>| index.map(|i| NodeId::new(i, pool, frame));
        ScopeNode {
            name: self.name,
            starting_cycle: self.starting_cycle,
            cycle_count: self.cycle_count,
            parent: link(self.parent),
            child: link(self.child),
            sibling: link(self.sibling),
        }
    }
}

/// Backing storage for one thread's nodes.
///
/// Each node sits in its own cell so the owning thread can write the nodes
/// of its current frame while readers walk the nodes of completed frames.
/// Which thread may touch which node is decided by the slot protocol in
/// `slot.rs`; the accessors here are `unsafe` and state what they need.
pub(crate) struct NodePool {
    id: u32,
    nodes: Box<[UnsafeCell<RawNode>]>,
}

impl NodePool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            nodes: (0..capacity)
                .map(|_| UnsafeCell::new(RawNode::EMPTY))
                .collect(),
        }
    }

    pub(crate) const fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `id` was handed out for this pool in `frame`.
    pub(crate) fn owns(&self, id: NodeId, frame: u64) -> bool {
        id.pool() == self.id && id.frame() == frame && id.index() < self.nodes.len()
    }

    /// Copy a node out.
    ///
    /// # Safety
    /// No other thread may be writing node `index`.
    #[inline]
    pub(crate) unsafe fn read(&self, index: u32) -> RawNode {
        // SAFETY: no concurrent writer, per the caller.
        unsafe { *self.nodes[index as usize].get() }
    }

    /// Mutate a node in place.
    ///
    /// # Safety
    /// The caller must be the only thread accessing node `index`, and no
    /// reference obtained from another call may be live.
    #[inline]
    pub(crate) unsafe fn update<R>(&self, index: u32, f: impl FnOnce(&mut RawNode) -> R) -> R {
        // SAFETY: exclusive access, per the caller.
        unsafe { f(&mut *self.nodes[index as usize].get()) }
    }
}

/// Writer-side allocation state for a [`NodePool`].
pub(crate) struct NodeArena {
    /// Head of the recycled-node list, chained through `sibling`.
    free_head: Option<u32>,
    /// Nodes never handed out yet start here.
    fresh: u32,
    capacity: u32,
    live: usize,
    /// Reused traversal stack for `recycle`.
    scratch: Vec<u32>,
}

impl NodeArena {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free_head: None,
            fresh: 0,
            capacity: u32::try_from(capacity).unwrap_or(u32::MAX),
            live: 0,
            scratch: Vec::new(),
        }
    }

    /// Nodes that `acquire` can still hand out.
    pub(crate) fn available(&self) -> usize {
        self.capacity as usize - self.live
    }

    /// Nodes currently linked into some frame.
    pub(crate) const fn live(&self) -> usize {
        self.live
    }

    /// Take a node, or `None` when the pool is exhausted.
    ///
    /// # Safety
    /// Caller is the pool's only writer, and free nodes are not reachable
    /// from any readable frame.
    #[inline]
    pub(crate) unsafe fn acquire(&mut self, pool: &NodePool) -> Option<u32> {
        let index = if let Some(head) = self.free_head {
            // SAFETY: free nodes are only touched by the writer.
            self.free_head = unsafe { pool.read(head) }.sibling;
            head
        } else if self.fresh < self.capacity {
            let index = self.fresh;
            self.fresh += 1;
            index
        } else {
            return None;
        };
        self.live += 1;
        Some(index)
    }

    /// Return every node reachable from `root` (children and siblings) to
    /// the free list. Returns how many nodes were freed.
    ///
    /// # Safety
    /// Caller is the pool's only writer and no reader can reach `root`.
    pub(crate) unsafe fn recycle(&mut self, pool: &NodePool, root: Option<u32>) -> usize {
        let Some(root) = root else {
            return 0;
        };

        let mut freed = 0;
        self.scratch.clear();
        self.scratch.push(root);
        while let Some(index) = self.scratch.pop() {
            // SAFETY: the whole tree is unreachable for readers.
            let node = unsafe { pool.read(index) };
            if let Some(child) = node.child {
                self.scratch.push(child);
            }
            if let Some(sibling) = node.sibling {
                self.scratch.push(sibling);
            }

            let next_free = self.free_head;
            // SAFETY: as above.
            unsafe {
                pool.update(index, |n| {
                    *n = RawNode::EMPTY;
                    n.sibling = next_free;
                });
            }
            self.free_head = Some(index);
            freed += 1;
        }

        self.live = self.live.saturating_sub(freed);
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_returns_none() {
        let pool = NodePool::new(2);
        let mut arena = NodeArena::new(pool.capacity());
        // SAFETY: single-threaded test owns the pool.
        unsafe {
            assert!(arena.acquire(&pool).is_some());
            assert!(arena.acquire(&pool).is_some());
            assert!(arena.acquire(&pool).is_none());
        }
        assert_eq!(arena.available(), 0);
    }

    #[test]
    fn recycle_frees_whole_tree() {
        let pool = NodePool::new(4);
        let mut arena = NodeArena::new(pool.capacity());
        // SAFETY: single-threaded test owns the pool.
        unsafe {
            let a = arena.acquire(&pool).unwrap();
            let b = arena.acquire(&pool).unwrap();
            let c = arena.acquire(&pool).unwrap();
            pool.update(a, |n| n.child = Some(b));
            pool.update(b, |n| n.sibling = Some(c));
            assert_eq!(arena.live(), 3);

            assert_eq!(arena.recycle(&pool, Some(a)), 3);
            assert_eq!(arena.live(), 0);
            assert_eq!(arena.available(), 4);

            for _ in 0..4 {
                assert!(arena.acquire(&pool).is_some());
            }
            assert!(arena.acquire(&pool).is_none());
        }
    }

    #[test]
    fn recycled_nodes_come_back_clean() {
        let pool = NodePool::new(1);
        let mut arena = NodeArena::new(1);
        // SAFETY: single-threaded test owns the pool.
        unsafe {
            let a = arena.acquire(&pool).unwrap();
            pool.update(a, |n| n.cycle_count = 99);
            arena.recycle(&pool, Some(a));
            let again = arena.acquire(&pool).unwrap();
            assert_eq!(again, a);
            assert_eq!(pool.read(again).cycle_count, 0);
        }
    }

    #[test]
    fn resolve_tags_links_with_frame() {
        let raw = RawNode {
            parent: Some(3),
            child: None,
            sibling: Some(7),
            ..RawNode::EMPTY
        };
        let node = raw.resolve(9, 42);
        assert_eq!(node.parent, Some(NodeId::new(3, 9, 42)));
        assert_eq!(node.sibling.map(NodeId::frame), Some(42));
        assert!(node.child.is_none());
    }

    #[test]
    fn pools_only_own_their_ids() {
        let a = NodePool::new(4);
        let b = NodePool::new(4);
        let id = NodeId::new(1, a.id(), 7);
        assert!(a.owns(id, 7));
        assert!(!a.owns(id, 8));
        assert!(!b.owns(id, 7));
        assert!(!a.owns(NodeId::new(4, a.id(), 7), 7));
    }
}
