//! Per-thread recording state, the recorder handle and the thread-local
//! binding used by the macros.

use std::cell::{RefCell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};

use crate::arena::{NodeArena, NodeId, NodePool, RawNode};
use crate::clock;
use crate::config::ProfilerConfig;
use crate::context::Shared;
use crate::macros::ScopeGuard;
use crate::mutex_ops::{record_now, MutexId, MutexOp, MutexOpLog};
use crate::name::ScopeName;
use crate::slot::SlotState;
use crate::tree::{ScopeTree, NEVER_RECORDED};

/// Contents of one ring slot.
#[derive(Default)]
pub(crate) struct FrameSlot {
    pub(crate) tree: ScopeTree,
    pub(crate) mutex_ops: MutexOpLog,
}

struct SlotCell {
    state: SlotState,
    data: UnsafeCell<FrameSlot>,
}

/// State only the owning thread touches.
struct WriterState {
    arena: NodeArena,
    /// Whether the slot of `write_index` is claimed.
    claimed: bool,
    /// Last frame a capacity warning was logged for.
    warned_frame: u64,
}

#[derive(Default)]
struct ThreadCounters {
    scopes_opened: AtomicU64,
    scopes_dropped: AtomicU64,
    misnested_closes: AtomicU64,
    stale_closes: AtomicU64,
    mutex_ops_dropped: AtomicU64,
    live_nodes: AtomicU64,
}

/// Single-writer increment; readers only ever load.
#[inline]
fn bump(counter: &AtomicU64) {
    counter.store(counter.load(Ordering::Relaxed).wrapping_add(1), Ordering::Relaxed);
}

/// Snapshot of a thread's bookkeeping counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStats {
    /// Registration index (0 is the main thread).
    pub index: usize,
    /// Name given at registration.
    pub name: String,
    /// Frame the thread is currently recording.
    pub write_index: u64,
    /// Whether the recorder has been dropped.
    pub retired: bool,
    /// Scopes successfully opened.
    pub scopes_opened: u64,
    /// Scopes dropped for lack of nodes or a deferred slot claim.
    pub scopes_dropped: u64,
    /// Closes that did not match the innermost open scope.
    pub misnested_closes: u64,
    /// Closes that arrived after the thread moved to a new frame.
    pub stale_closes: u64,
    /// Mutex operations that did not fit the per-frame log.
    pub mutex_ops_dropped: u64,
    /// Nodes held by buffered frames at the last frame boundary.
    pub live_nodes: u64,
}

/// Everything one registered thread records into.
///
/// Only the owning thread, through its [`ThreadRecorder`], writes the node
/// pool, the writer state and claimed slots. Other threads pin completed
/// slots through [`SlotState`] and read them via [`FrameView`]s.
///
/// [`FrameView`]: crate::FrameView
pub(crate) struct ThreadState {
    index: usize,
    name: String,
    write_index: CachePadded<AtomicU64>,
    retired: AtomicBool,
    slots: Box<[SlotCell]>,
    pool: NodePool,
    writer: UnsafeCell<WriterState>,
    counters: ThreadCounters,
    max_mutex_ops: usize,
}

// SAFETY: the cells are partitioned by the slot protocol. `writer`, the
// pool nodes of the current frame and the claimed slot are only accessed by
// the owning thread (`ThreadRecorder` is !Send). Readers only access slots
// they pinned, which the writer cannot claim while pinned.
unsafe impl Sync for ThreadState {}

impl ThreadState {
    fn new(index: usize, name: String, config: &ProfilerConfig, frame: u64) -> Self {
        let slots = (0..config.frames_tracked)
            .map(|_| SlotCell {
                state: SlotState::default(),
                data: UnsafeCell::new(FrameSlot::default()),
            })
            .collect();
        Self {
            index,
            name,
            write_index: CachePadded::new(AtomicU64::new(frame)),
            retired: AtomicBool::new(false),
            slots,
            pool: NodePool::new(config.max_scopes_per_thread),
            writer: UnsafeCell::new(WriterState {
                arena: NodeArena::new(config.max_scopes_per_thread),
                claimed: false,
                warned_frame: NEVER_RECORDED,
            }),
            counters: ThreadCounters::default(),
            max_mutex_ops: config.max_mutex_ops_per_frame,
        }
    }

    pub(crate) const fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn write_index(&self) -> u64 {
        self.write_index.load(Ordering::Acquire)
    }

    /// Slot the thread is writing (or about to claim).
    pub(crate) fn write_slot(&self) -> usize {
        self.slot_of(self.write_index())
    }

    pub(crate) fn slot_of(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) const fn pool_id(&self) -> u32 {
        self.pool.id()
    }

    pub(crate) fn owns(&self, id: NodeId, frame: u64) -> bool {
        self.pool.owns(id, frame)
    }

    pub(crate) fn pin(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.state.try_pin())
    }

    pub(crate) fn unpin(&self, slot: usize) {
        self.slots[slot].state.unpin();
    }

    /// # Safety
    /// `slot` must be pinned by the caller for the lifetime of the borrow.
    pub(crate) unsafe fn frame_slot(&self, slot: usize) -> &FrameSlot {
        // SAFETY: pinned slots are never written, per the caller.
        unsafe { &*self.slots[slot].data.get() }
    }

    /// # Safety
    /// `index` must be a node of a frame slot pinned by the caller.
    pub(crate) unsafe fn read_node(&self, index: u32) -> RawNode {
        // SAFETY: nodes of pinned frames are never written, per the caller.
        unsafe { self.pool.read(index) }
    }

    pub(crate) fn stats(&self) -> ThreadStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ThreadStats {
            index: self.index,
            name: self.name.clone(),
            write_index: self.write_index(),
            retired: self.is_retired(),
            scopes_opened: load(&self.counters.scopes_opened),
            scopes_dropped: load(&self.counters.scopes_dropped),
            misnested_closes: load(&self.counters.misnested_closes),
            stale_closes: load(&self.counters.stale_closes),
            mutex_ops_dropped: load(&self.counters.mutex_ops_dropped),
            live_nodes: load(&self.counters.live_nodes),
        }
    }
}

/// Result of [`ThreadRecorder::open_scope`]; pass it back to
/// [`ThreadRecorder::close_scope`] exactly once.
///
/// A disabled handle (profiling off, pool exhausted, slot still pinned by a
/// reader) closes as a no-op.
#[must_use = "a scope handle must be closed"]
#[derive(Debug)]
pub struct ScopeHandle {
    node: Option<NodeId>,
    _not_send: PhantomData<*const ()>,
}

impl ScopeHandle {
    /// A handle that records nothing.
    pub const fn disabled() -> Self {
        Self {
            node: None,
            _not_send: PhantomData,
        }
    }

    /// Whether closing this handle will record anything.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.node.is_some()
    }

    /// Node backing the scope.
    #[must_use]
    pub const fn node(&self) -> Option<NodeId> {
        self.node
    }
}

/// Write access to one registered thread's recording state.
///
/// Obtained from [`Profiler::register_main_thread`] or
/// [`Profiler::register_worker_thread`] on the thread that will record.
/// Not `Send`. Dropping it retires the thread: its buffered frames stay
/// readable but it no longer holds back the read frontier.
///
/// [`Profiler::register_main_thread`]: crate::Profiler::register_main_thread
/// [`Profiler::register_worker_thread`]: crate::Profiler::register_worker_thread
pub struct ThreadRecorder {
    state: Arc<ThreadState>,
    shared: Arc<Shared>,
    _not_send: PhantomData<*const ()>,
}

impl ThreadRecorder {
    pub(crate) fn new(shared: Arc<Shared>, index: usize, name: String) -> (Self, Arc<ThreadState>) {
        let frame = shared.global_frame();
        let state = Arc::new(ThreadState::new(index, name, shared.config(), frame));
        let recorder = Self {
            state: Arc::clone(&state),
            shared,
            _not_send: PhantomData,
        };
        // SAFETY: the recorder was just created on its owning thread.
        unsafe { recorder.claim_current(&mut *recorder.state.writer.get()) };
        (recorder, state)
    }

    /// Registration index; 0 is the main thread.
    #[must_use]
    pub fn index(&self) -> usize {
        self.state.index()
    }

    /// Name given at registration.
    #[must_use]
    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Frame currently being recorded.
    #[must_use]
    pub fn write_index(&self) -> u64 {
        self.state.write_index.load(Ordering::Relaxed)
    }

    /// Whether this is the orchestrating thread.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.state.index() == 0
    }

    /// Counters of this thread.
    #[must_use]
    pub fn stats(&self) -> ThreadStats {
        self.state.stats()
    }

    /// Recycle and claim the slot of the current write index.
    ///
    /// Returns `false` when a reader still pins the slot. Logs nothing, so
    /// the caller can end its writer borrow before reporting.
    ///
    /// # Safety
    /// Must be called by the owning thread with the only live reference to
    /// its writer state.
    unsafe fn claim_current(&self, writer: &mut WriterState) -> bool {
        let frame = self.write_index();
        let cell = &self.state.slots[self.state.slot_of(frame)];
        if !cell.state.try_claim() {
            return false;
        }

        // SAFETY: the claim succeeded, so no reader pins this slot and none
        // can reach its nodes.
        let data = unsafe { &mut *cell.data.get() };
        // SAFETY: as above; the caller is the pool's only writer.
        unsafe { writer.arena.recycle(&self.state.pool, data.tree.raw_root()) };
        data.tree.reset(frame);
        data.mutex_ops.clear();
        writer.claimed = true;
        self.state
            .counters
            .live_nodes
            .store(writer.arena.live() as u64, Ordering::Relaxed);
        true
    }

    fn trace_deferred_claim(&self) {
        let frame = self.write_index();
        tracing::trace!(
            thread = self.state.index(),
            slot = self.state.slot_of(frame),
            frame,
            "slot still pinned by a reader, deferring claim"
        );
    }

    /// Open a scope in the current frame's tree.
    #[inline]
    pub fn open_scope(&self, name: impl Into<ScopeName>) -> ScopeHandle {
        if !self.shared.is_enabled() {
            return ScopeHandle::disabled();
        }

        let name = name.into();
        let frame = self.write_index();
        let slot = self.state.slot_of(frame);
        let (claimed, opened, warn) = {
            // SAFETY: `ThreadRecorder` is !Send and !Sync, and nothing in this
            // block can re-enter the recorder, so this is the only reference
            // to the writer state. It ends with the block, before any logging.
            let writer = unsafe { &mut *self.state.writer.get() };
            // SAFETY: as above.
            let claimed = writer.claimed || unsafe { self.claim_current(writer) };
            let opened = if claimed {
                // SAFETY: the slot is claimed by this thread.
                let data = unsafe { &mut *self.state.slots[slot].data.get() };
                // SAFETY: the slot is claimed and this is the pool's only writer.
                unsafe {
                    data.tree
                        .open(&self.state.pool, &mut writer.arena, name, clock::cycles)
                }
            } else {
                None
            };
            let warn = claimed && opened.is_none() && writer.warned_frame != frame;
            if warn {
                writer.warned_frame = frame;
            }
            (claimed, opened, warn)
        };

        if let Some(index) = opened {
            bump(&self.state.counters.scopes_opened);
            return ScopeHandle {
                node: Some(NodeId::new(index, self.state.pool_id(), frame)),
                _not_send: PhantomData,
            };
        }

        bump(&self.state.counters.scopes_dropped);
        if !claimed {
            self.trace_deferred_claim();
        } else if warn {
            tracing::warn!(
                thread = %self.state.name(),
                capacity = self.state.pool.capacity(),
                frame,
                "scope node pool exhausted, dropping scopes for this frame"
            );
        }
        ScopeHandle::disabled()
    }

    /// Close a scope opened on this recorder.
    #[inline]
    pub fn close_scope(&self, handle: ScopeHandle) {
        self.close_scope_at(handle, clock::cycles());
    }

    /// Close with a counter value sampled by the caller.
    #[inline]
    pub(crate) fn close_scope_at(&self, handle: ScopeHandle, end_cycle: u64) {
        let Some(id) = handle.node else {
            return;
        };
        if id.pool() != self.state.pool_id() {
            tracing::debug!(thread = %self.state.name(), "ignoring close of a foreign scope handle");
            return;
        }
        let frame = self.write_index();
        if id.frame() != frame {
            bump(&self.state.counters.stale_closes);
            return;
        }

        let slot = self.state.slot_of(frame);
        // SAFETY: `id` was opened in the current frame, whose slot this
        // thread claimed before opening it and holds until it advances.
        let data = unsafe { &mut *self.state.slots[slot].data.get() };
        // SAFETY: as above; the node belongs to this frame's tree.
        let well_nested = unsafe { data.tree.close(&self.state.pool, id.raw(), end_cycle) };
        if !well_nested {
            bump(&self.state.counters.misnested_closes);
            tracing::debug!(
                thread = %self.state.name(),
                frame,
                "scope closed out of order"
            );
        }
    }

    /// RAII scope closed when the guard drops.
    #[inline]
    pub fn scope(&self, name: &'static str) -> ScopeGuard<'_> {
        ScopeGuard::open(self, name)
    }

    /// Log that the thread starts waiting on `mutex`.
    #[inline]
    pub fn mutex_waiting(&self, mutex: MutexId) {
        self.record_mutex_op(mutex, MutexOp::Waiting);
    }

    /// Log that the thread acquired `mutex`.
    #[inline]
    pub fn mutex_acquired(&self, mutex: MutexId) {
        self.record_mutex_op(mutex, MutexOp::Acquired);
    }

    /// Log that the thread released `mutex`.
    #[inline]
    pub fn mutex_released(&self, mutex: MutexId) {
        self.record_mutex_op(mutex, MutexOp::Released);
    }

    fn record_mutex_op(&self, mutex: MutexId, op: MutexOp) {
        if !self.shared.is_enabled() {
            return;
        }
        let claimed = {
            // SAFETY: see `open_scope`.
            let writer = unsafe { &mut *self.state.writer.get() };
            // SAFETY: see `open_scope`.
            writer.claimed || unsafe { self.claim_current(writer) }
        };
        if !claimed {
            bump(&self.state.counters.mutex_ops_dropped);
            self.trace_deferred_claim();
            return;
        }
        let slot = self.state.slot_of(self.write_index());
        // SAFETY: the slot is claimed by this thread.
        let data = unsafe { &mut *self.state.slots[slot].data.get() };
        if !data.mutex_ops.push(record_now(mutex, op), self.state.max_mutex_ops) {
            bump(&self.state.counters.mutex_ops_dropped);
        }
    }

    /// Catch up with the global frame counter.
    ///
    /// Workers call this at the start of each dispatched batch of work.
    /// Frames the thread skipped leave their slots untouched.
    pub fn advance_frame(&self) {
        self.advance_to(self.shared.global_frame());
    }

    /// Finish the global frame and start the next one. Main thread only.
    ///
    /// Records the frame's statistics, publishes the new frame id to the
    /// workers and moves this thread to it. Returns the new frame id.
    pub fn advance_main_frame(&self, frame_ms: f64) -> u64 {
        if !self.is_main() {
            tracing::debug!(
                thread = %self.state.name(),
                "advance_main_frame called off the main thread, catching up instead"
            );
            self.advance_frame();
            return self.write_index();
        }
        let next = self.shared.finish_frame(frame_ms);
        self.advance_to(next);
        next
    }

    fn advance_to(&self, target: u64) {
        let current = self.write_index();
        if target <= current {
            return;
        }

        let claimed = {
            // SAFETY: see `open_scope`.
            let writer = unsafe { &mut *self.state.writer.get() };
            if writer.claimed {
                self.state.slots[self.state.slot_of(current)].state.release();
                writer.claimed = false;
            }
            self.state.write_index.store(target, Ordering::Release);
            // SAFETY: see `open_scope`.
            unsafe { self.claim_current(writer) }
        };
        if !claimed {
            self.trace_deferred_claim();
        }
    }

    /// Bind this recorder to the calling thread for the profiling macros and
    /// [`TimedMutex`](crate::TimedMutex). Returns the recorder it replaces.
    ///
    /// # Panics
    /// Panics when called from inside [`with_current`].
    pub fn install(self) -> Option<Self> {
        CURRENT.with(|current| current.replace(Some(self)))
    }
}

impl Drop for ThreadRecorder {
    fn drop(&mut self) {
        {
            // SAFETY: the recorder is going away on its owning thread.
            let writer = unsafe { &mut *self.state.writer.get() };
            if writer.claimed {
                self.state.slots[self.state.write_slot()].state.release();
                writer.claimed = false;
            }
        }
        self.state.retired.store(true, Ordering::Release);
        tracing::debug!(thread = %self.state.name(), "profiler thread retired");
    }
}

impl std::fmt::Debug for ThreadRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRecorder")
            .field("index", &self.index())
            .field("name", &self.name())
            .field("write_index", &self.write_index())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<ThreadRecorder>> = const { RefCell::new(None) };
}

/// Run `f` with the recorder installed on this thread, if any.
///
/// Returns `None` when no recorder is installed or during thread teardown.
#[inline]
pub fn with_current<R>(f: impl FnOnce(&ThreadRecorder) -> R) -> Option<R> {
    CURRENT
        .try_with(|current| current.try_borrow().ok().and_then(|r| r.as_ref().map(f)))
        .ok()
        .flatten()
}

/// Remove and return the recorder installed on this thread.
///
/// # Panics
/// Panics when called from inside [`with_current`].
pub fn uninstall_current() -> Option<ThreadRecorder> {
    CURRENT.try_with(RefCell::take).ok().flatten()
}
