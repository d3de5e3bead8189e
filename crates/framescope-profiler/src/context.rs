//! Profiler context: thread registry, global frame counter and read-side
//! selection.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};

use crate::clock;
use crate::config::ProfilerConfig;
use crate::draw_calls::{DrawCallRecord, DrawCallTable};
use crate::error::{ProfilerError, Result};
use crate::frame::{FrameStats, FrameStatsRing, FrameTimeSummary};
use crate::ipc::protocol::ClientMessage;
use crate::ipc::server::IpcServer;
use crate::name::ScopeName;
use crate::report::FrameReport;
use crate::thread::{ThreadRecorder, ThreadState, ThreadStats};
use crate::tree::NEVER_RECORDED;
use crate::view::{FrameView, ReadFrame, SkipReason, SkippedThread};

/// Viewer commands buffered until the host drains them.
const MAX_PENDING_COMMANDS: usize = 256;

/// State shared by the [`Profiler`] handles and every recorder.
pub(crate) struct Shared {
    config: ProfilerConfig,
    enabled: AtomicBool,
    frame: CachePadded<AtomicU64>,
    frame_start: AtomicU64,
    frame_stats: FrameStatsRing,
    threads: RwLock<Vec<Arc<ThreadState>>>,
    next_index: AtomicUsize,
    read_slot: AtomicUsize,
    draw_calls: Mutex<DrawCallTable>,
    server: Mutex<Option<IpcServer>>,
    commands: (Sender<ClientMessage>, Receiver<ClientMessage>),
}

impl Shared {
    pub(crate) const fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn global_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Record the running frame's stats and publish the next frame id.
    pub(crate) fn finish_frame(&self, frame_ms: f64) -> u64 {
        let now = clock::cycles();
        let finished = self.frame.load(Ordering::Relaxed);
        let started = self.frame_start.swap(now, Ordering::Relaxed);
        self.frame_stats.record(FrameStats {
            frame: finished,
            starting_cycle: started,
            total_cycles: now.saturating_sub(started),
            frame_ms,
        });
        let next = finished + 1;
        self.frame.store(next, Ordering::Release);
        next
    }

    fn slot_of(&self, frame: u64) -> usize {
        (frame % self.config.frames_tracked as u64) as usize
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(server) = self.server.get_mut().take() {
            server.stop();
        }
    }
}

/// Handle to a profiler instance.
///
/// Cheap to clone; the instance lives until the last handle and the last
/// [`ThreadRecorder`] are dropped.
#[derive(Clone)]
pub struct Profiler {
    shared: Arc<Shared>,
}

impl Profiler {
    /// Create a profiler. Starts the report server if the config asks for one.
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;

        let profiler = Self {
            shared: Arc::new(Shared {
                enabled: AtomicBool::new(config.enabled),
                frame: CachePadded::new(AtomicU64::new(0)),
                frame_start: AtomicU64::new(clock::cycles()),
                frame_stats: FrameStatsRing::new(config.frames_tracked),
                threads: RwLock::new(Vec::new()),
                next_index: AtomicUsize::new(1),
                read_slot: AtomicUsize::new(0),
                draw_calls: Mutex::new(DrawCallTable::new(config.draw_call_capacity)),
                server: Mutex::new(None),
                commands: channel::bounded(MAX_PENDING_COMMANDS),
                config,
            }),
        };

        if let Some(port) = profiler.shared.config.ipc_port {
            if let Err(e) = profiler.start_server(port) {
                tracing::warn!("Failed to start profiler report server: {}", e);
            }
        }
        Ok(profiler)
    }

    /// Configuration the profiler was built with.
    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.shared.config
    }

    /// Start serving reports on `port`. No-op if a server is running.
    pub fn start_server(&self, port: u16) -> Result<()> {
        let mut server = self.shared.server.lock();
        if server.is_none() {
            *server = Some(IpcServer::start(port, self.shared.commands.0.clone())?);
        }
        Ok(())
    }

    /// Stop the report server, if any.
    pub fn shutdown(&self) {
        if let Some(server) = self.shared.server.lock().take() {
            server.stop();
        }
    }

    /// Address the report server listens on.
    #[must_use]
    pub fn server_addr(&self) -> Option<std::net::SocketAddr> {
        self.shared.server.lock().as_ref().map(IpcServer::local_addr)
    }

    /// Whether new scopes are recorded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Toggle recording. Scopes already open still close normally.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Frame the orchestrator is currently running.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.shared.global_frame()
    }

    /// Ring buffer length.
    #[must_use]
    pub fn frames_tracked(&self) -> usize {
        self.shared.config.frames_tracked
    }

    /// Register the calling thread as the orchestrator (thread index 0).
    pub fn register_main_thread(&self) -> Result<ThreadRecorder> {
        let mut threads = self.shared.threads.write();
        if !threads.is_empty() {
            return Err(ProfilerError::MainThreadAlreadyRegistered);
        }
        let (recorder, state) = ThreadRecorder::new(Arc::clone(&self.shared), 0, "main".into());
        threads.push(state);
        tracing::debug!("profiler main thread registered");
        Ok(recorder)
    }

    /// Register the calling thread as a worker.
    ///
    /// Worker indices are never reused. Retired workers none of whose frames
    /// can still be read are dropped from the registry here.
    pub fn register_worker_thread(&self, name: impl Into<String>) -> Result<ThreadRecorder> {
        let mut threads = self.shared.threads.write();
        if threads.is_empty() {
            return Err(ProfilerError::MainThreadNotRegistered);
        }
        self.prune_retired(&mut threads);
        let index = self.shared.next_index.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        tracing::debug!(index, %name, "profiler worker thread registered");
        let (recorder, state) = ThreadRecorder::new(Arc::clone(&self.shared), index, name);
        threads.push(state);
        Ok(recorder)
    }

    /// Drop retired workers whose newest frame has left the ring and that no
    /// [`FrameView`] still holds.
    fn prune_retired(&self, threads: &mut Vec<Arc<ThreadState>>) {
        let global = self.shared.global_frame();
        let tracked = self.frames_tracked() as u64;
        let before = threads.len();
        threads.retain(|t| {
            t.index() == 0
                || !t.is_retired()
                || Arc::strong_count(t) > 1
                || t.write_index() + tracked > global
        });
        if threads.len() != before {
            tracing::debug!(pruned = before - threads.len(), "dropped retired profiler threads");
        }
    }

    /// Number of threads in the registry: every live thread plus retired
    /// workers whose frames may still be read.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.threads.read().len()
    }

    /// Counters of every thread in the registry.
    #[must_use]
    pub fn thread_stats(&self) -> Vec<ThreadStats> {
        self.shared.threads.read().iter().map(|t| t.stats()).collect()
    }

    /// Select the ring slot read by [`read_frame`](Self::read_frame).
    ///
    /// Rejects slots outside the ring and the slot the main thread is
    /// writing.
    pub fn set_read_frame(&self, slot: usize) -> Result<()> {
        let tracked = self.frames_tracked();
        if slot >= tracked {
            return Err(ProfilerError::FrameOutOfRange { slot, tracked });
        }
        if let Some(main) = self.shared.threads.read().first() {
            if !main.is_retired() && main.write_slot() == slot {
                return Err(ProfilerError::ActiveWriteSlot { slot });
            }
        }
        self.shared.read_slot.store(slot, Ordering::Relaxed);
        Ok(())
    }

    /// Currently selected read slot.
    #[must_use]
    pub fn read_frame_index(&self) -> usize {
        self.shared.read_slot.load(Ordering::Relaxed)
    }

    /// Newest frame every live thread has finished.
    ///
    /// When the slowest live thread lags a whole ring behind the main
    /// thread, none of its finished frames are buffered any more and this
    /// returns the oldest buffered frame instead. That thread did not finish
    /// it, so [`read_frame`](Self::read_frame) lists it as skipped.
    ///
    /// `None` until a frame is complete on every live thread or the ring has
    /// wrapped.
    #[must_use]
    pub fn read_frontier(&self) -> Option<u64> {
        let threads = self.shared.threads.read();
        let slowest = threads
            .iter()
            .filter(|t| !t.is_retired())
            .map(|t| t.write_index())
            .min()?;
        let newest_complete = slowest.checked_sub(1);
        let oldest_buffered = (self.shared.global_frame() + 1)
            .saturating_sub(self.frames_tracked() as u64);
        if oldest_buffered == 0 {
            return newest_complete;
        }
        Some(newest_complete.map_or(oldest_buffered, |f| f.max(oldest_buffered)))
    }

    /// Select the slot of [`read_frontier`](Self::read_frontier). Returns
    /// the frame id selected.
    pub fn select_frontier(&self) -> Result<u64> {
        let frame = self.read_frontier().ok_or(ProfilerError::FrameNotRecorded {
            slot: self.read_frame_index(),
        })?;
        self.set_read_frame(self.shared.slot_of(frame))?;
        Ok(frame)
    }

    /// Pin the selected slot on every thread that recorded the same frame
    /// as the main thread.
    pub fn read_frame(&self) -> Result<ReadFrame> {
        let slot = self.read_frame_index();
        let threads = self.shared.threads.read().clone();
        let (main, workers) = threads
            .split_first()
            .ok_or(ProfilerError::MainThreadNotRegistered)?;

        let main_view = FrameView::pin(Arc::clone(main), slot)
            .ok_or(ProfilerError::ActiveWriteSlot { slot })?;
        let frame = main_view.frame();
        if frame == NEVER_RECORDED {
            return Err(ProfilerError::FrameNotRecorded { slot });
        }

        let stats = self
            .shared
            .frame_stats
            .get(slot)
            .filter(|s| s.frame == frame)
            .unwrap_or_default();

        let mut views = vec![main_view];
        let mut skipped = Vec::new();
        for worker in workers {
            let reason = match FrameView::pin(Arc::clone(worker), slot) {
                Some(view) if view.frame() == frame => {
                    views.push(view);
                    continue;
                }
                Some(view) => SkipReason::NotParticipating {
                    recorded: view.frame(),
                },
                None => SkipReason::InFlight,
            };
            skipped.push(SkippedThread {
                thread_index: worker.index(),
                thread_name: worker.name().to_owned(),
                reason,
            });
        }

        Ok(ReadFrame {
            slot,
            frame,
            stats,
            threads: views,
            skipped,
        })
    }

    /// Pin one thread's tree in the selected slot.
    ///
    /// `Ok(None)` when the thread is writing the slot or recorded a
    /// different frame there than the main thread.
    pub fn read_tree(&self, thread_index: usize) -> Result<Option<FrameView>> {
        let slot = self.read_frame_index();
        let threads = self.shared.threads.read();
        let main = threads.first().ok_or(ProfilerError::MainThreadNotRegistered)?;
        let thread = threads
            .iter()
            .find(|t| t.index() == thread_index)
            .ok_or(ProfilerError::UnknownThread(thread_index))?;

        let Some(view) = FrameView::pin(Arc::clone(thread), slot) else {
            return Ok(None);
        };
        if thread_index == 0 {
            return Ok(Some(view));
        }
        let main_frame = FrameView::pin(Arc::clone(main), slot).map(|v| v.frame());
        Ok((main_frame == Some(view.frame())).then_some(view))
    }

    /// Stats of the frame held in `slot`.
    pub fn frame_stats(&self, slot: usize) -> Result<FrameStats> {
        let tracked = self.frames_tracked();
        let stats = self
            .shared
            .frame_stats
            .get(slot)
            .ok_or(ProfilerError::FrameOutOfRange { slot, tracked })?;
        if stats.is_recorded() {
            Ok(stats)
        } else {
            Err(ProfilerError::FrameNotRecorded { slot })
        }
    }

    /// Every slot of the frame-stats ring, in slot order.
    #[must_use]
    pub fn frame_history(&self) -> Vec<FrameStats> {
        self.shared.frame_stats.history()
    }

    /// Min/max/average frame time over the buffered frames.
    #[must_use]
    pub fn frame_time_summary(&self) -> FrameTimeSummary {
        self.shared.frame_stats.summary()
    }

    /// Count a draw call of `vertex_count` vertices from `caller`.
    ///
    /// A full table drops the update and logs a warning.
    pub fn track_draw_call(&self, caller: &'static str, vertex_count: u32) -> Result<()> {
        let result = self
            .shared
            .draw_calls
            .lock()
            .track(ScopeName::new(caller), vertex_count);
        if let Err(e) = &result {
            tracing::warn!(caller, "{}", e);
        }
        result
    }

    /// Draw-call entries, most called first.
    #[must_use]
    pub fn draw_calls(&self) -> Vec<DrawCallRecord> {
        self.shared.draw_calls.lock().snapshot()
    }

    /// Forget every draw call.
    pub fn reset_draw_calls(&self) {
        self.shared.draw_calls.lock().clear();
    }

    /// Commands received from report clients since the last call.
    #[must_use]
    pub fn drain_commands(&self) -> Vec<ClientMessage> {
        self.shared.commands.1.try_iter().collect()
    }

    /// Send a report to every connected client. Returns how many received it.
    pub fn publish(&self, report: &FrameReport) -> usize {
        self.shared
            .server
            .lock()
            .as_ref()
            .map_or(0, |server| server.broadcast(report))
    }

    /// Number of connected report clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared
            .server
            .lock()
            .as_ref()
            .map_or(0, IpcServer::client_count)
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("frame", &self.frame_index())
            .field("threads", &self.thread_count())
            .field("read_slot", &self.read_frame_index())
            .finish_non_exhaustive()
    }
}
