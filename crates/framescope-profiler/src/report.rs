//! Consumer-side collation of a read frame into a serializable report.

use serde::{Deserialize, Serialize};

use crate::collate::{
    call_graph, pair_frame_waits, timeline, CallCountTable, CallGraphRow, ContentionWindow,
    CycleBar, ExpansionState, RankedFunction,
};
use crate::config::ProfilerConfig;
use crate::context::Profiler;
use crate::draw_calls::DrawCallEntry;
use crate::error::Result;
use crate::frame::{FrameStats, FrameTimeSummary};
use crate::ipc::protocol::ClientMessage;
use crate::name::ScopePath;
use crate::thread::ThreadStats;
use crate::view::{FrameView, ReadFrame, ScopeSource, SkippedThread};

/// Collated data of one thread in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadReport {
    /// Registration index.
    pub thread_index: usize,
    /// Thread name.
    pub thread_name: String,
    /// Scopes recorded in the frame.
    pub scope_count: usize,
    /// Expanded call graph.
    pub call_graph: Vec<CallGraphRow>,
    /// Cycle timeline bars.
    pub timeline: Vec<CycleBar>,
    /// Mutex operations logged.
    pub mutex_ops: usize,
    /// Mutex operations that did not fit the log.
    pub mutex_ops_dropped: u32,
    /// Completed lock waits.
    pub contention: Vec<ContentionWindow>,
    /// Waits with no matching acquire or release.
    pub unterminated_waits: usize,
}

/// Everything a viewer needs to draw one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Ring slot read.
    pub slot: usize,
    /// Global frame id.
    pub frame: u64,
    /// Orchestrator statistics of the frame.
    pub stats: FrameStats,
    /// Frame times over the whole ring.
    pub summary: FrameTimeSummary,
    /// Participating threads, main thread first.
    pub threads: Vec<ThreadReport>,
    /// Threads that were not read.
    pub skipped: Vec<SkippedThread>,
    /// Most called scopes since the last reset.
    pub hot_functions: Vec<RankedFunction>,
    /// Draw calls since the last reset, most called first.
    pub draw_calls: Vec<DrawCallEntry>,
    /// Recorder counters of every registered thread.
    pub thread_stats: Vec<ThreadStats>,
}

/// Viewer-side collation state: fold choices and the running call ranking.
#[derive(Debug, Clone)]
pub struct Collator {
    expansion: ExpansionState,
    calls: CallCountTable,
    hot_limit: usize,
}

impl Collator {
    /// Number of ranked functions included in reports by default.
    pub const DEFAULT_HOT_LIMIT: usize = 32;

    /// Create a collator sized by `config`.
    #[must_use]
    pub fn new(config: &ProfilerConfig) -> Self {
        Self {
            expansion: ExpansionState::new(),
            calls: CallCountTable::new(config.call_count_capacity),
            hot_limit: Self::DEFAULT_HOT_LIMIT,
        }
    }

    /// Include at most `limit` ranked functions in reports.
    #[must_use]
    pub const fn with_hot_limit(mut self, limit: usize) -> Self {
        self.hot_limit = limit;
        self
    }

    /// Fold state.
    #[must_use]
    pub const fn expansion(&self) -> &ExpansionState {
        &self.expansion
    }

    /// Fold state, for viewer interaction.
    pub fn expansion_mut(&mut self) -> &mut ExpansionState {
        &mut self.expansion
    }

    /// Running call ranking.
    #[must_use]
    pub const fn call_counts(&self) -> &CallCountTable {
        &self.calls
    }

    /// Read the selected frame and collate it.
    pub fn collate(&mut self, profiler: &Profiler) -> Result<FrameReport> {
        let frame = profiler.read_frame()?;
        Ok(self.collate_frame(profiler, &frame))
    }

    /// Collate an already pinned frame.
    pub fn collate_frame(&mut self, profiler: &Profiler, frame: &ReadFrame) -> FrameReport {
        let frame_cycles = if frame.stats.is_recorded() {
            frame.stats.total_cycles
        } else {
            frame
                .thread(0)
                .map_or(0, |main| main.top_level().map(|(_, n)| n.cycle_count).sum())
        };

        let threads = frame
            .threads
            .iter()
            .map(|view| self.collate_thread(view, &frame.stats, frame_cycles))
            .collect();

        FrameReport {
            slot: frame.slot,
            frame: frame.frame,
            stats: frame.stats,
            summary: profiler.frame_time_summary(),
            threads,
            skipped: frame.skipped.clone(),
            hot_functions: self.calls.top(self.hot_limit),
            draw_calls: profiler.draw_calls().iter().map(DrawCallEntry::from).collect(),
            thread_stats: profiler.thread_stats(),
        }
    }

    fn collate_thread(
        &mut self,
        view: &FrameView,
        stats: &FrameStats,
        frame_cycles: u64,
    ) -> ThreadReport {
        let pass = self.calls.rank_tree(view);
        let pairing = pair_frame_waits(view);
        ThreadReport {
            thread_index: view.thread_index(),
            thread_name: view.thread_name().to_owned(),
            scope_count: pass.scopes,
            call_graph: call_graph(view, &self.expansion, frame_cycles),
            timeline: timeline(view, stats, &self.expansion),
            mutex_ops: view.mutex_ops().len(),
            mutex_ops_dropped: view.mutex_ops_dropped(),
            contention: pairing.windows,
            unterminated_waits: pairing.unterminated.len(),
        }
    }

    /// Act on a command from a report client.
    pub fn apply(&mut self, profiler: &Profiler, command: &ClientMessage) -> Result<()> {
        match command {
            ClientMessage::Reset => {
                self.calls.reset();
                profiler.reset_draw_calls();
            }
            ClientMessage::SelectFrame(slot) => profiler.set_read_frame(*slot as usize)?,
            ClientMessage::ToggleScope(path) => {
                self.expansion.toggle(ScopePath::from_raw(*path));
            }
            ClientMessage::Hello | ClientMessage::Goodbye => {}
        }
        Ok(())
    }

    /// Apply every pending client command, logging the ones that fail.
    pub fn apply_pending(&mut self, profiler: &Profiler) {
        for command in profiler.drain_commands() {
            if let Err(e) = self.apply(profiler, &command) {
                tracing::warn!(?command, "rejected profiler client command: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProfilerError, TimedMutex};

    static WORK: &str = "work";

    fn profiler() -> Profiler {
        Profiler::new(
            ProfilerConfig::default()
                .with_frames_tracked(4)
                .with_max_scopes_per_thread(64),
        )
        .unwrap()
    }

    #[test]
    fn report_covers_tree_mutexes_and_draw_calls() {
        let p = profiler();
        let main = p.register_main_thread().unwrap();
        {
            let _frame = main.scope("frame");
            main.close_scope(main.open_scope(WORK));
            main.close_scope(main.open_scope(WORK));

            let lock = TimedMutex::new(());
            main.mutex_waiting(lock.id());
            main.mutex_acquired(lock.id());
            main.mutex_released(lock.id());
            main.mutex_waiting(lock.id());
        }
        p.track_draw_call("terrain", 300).unwrap();
        main.advance_main_frame(16.0);
        p.set_read_frame(0).unwrap();

        let mut collator = Collator::new(p.config());
        collator.expansion_mut().set_expand_all(true);
        let report = collator.collate(&p).unwrap();

        assert_eq!(report.frame, 0);
        assert_eq!(report.threads.len(), 1);
        let thread = &report.threads[0];
        assert_eq!(thread.scope_count, 3);
        let rows: Vec<_> = thread
            .call_graph
            .iter()
            .map(|r| (r.name.as_str(), r.calls, r.depth))
            .collect();
        assert_eq!(rows, [("frame", 1, 0), ("work", 2, 1)]);
        assert_eq!(thread.timeline.len(), 3);
        assert_eq!(thread.mutex_ops, 4);
        assert_eq!(thread.contention.len(), 1);
        assert_eq!(thread.unterminated_waits, 1);

        assert_eq!(report.hot_functions[0].name, "work");
        assert_eq!(report.hot_functions[0].calls, 2);
        assert_eq!(report.draw_calls.len(), 1);
        assert_eq!(report.thread_stats.len(), 1);
        assert_eq!(report.summary.frames, 1);
    }

    #[test]
    fn client_commands_drive_the_collator() {
        let p = profiler();
        let main = p.register_main_thread().unwrap();
        main.close_scope(main.open_scope(WORK));
        main.advance_main_frame(1.0);
        p.set_read_frame(0).unwrap();

        let mut collator = Collator::new(p.config());
        let report = collator.collate(&p).unwrap();
        let path = report.threads[0].call_graph[0].path;
        assert!(!collator.expansion().is_expanded(ScopePath::from_raw(path)));

        collator.apply(&p, &ClientMessage::ToggleScope(path)).unwrap();
        assert!(collator.expansion().is_expanded(ScopePath::from_raw(path)));

        assert!(matches!(
            collator.apply(&p, &ClientMessage::SelectFrame(1)),
            Err(ProfilerError::ActiveWriteSlot { slot: 1 })
        ));

        assert!(!collator.call_counts().is_empty());
        collator.apply(&p, &ClientMessage::Reset).unwrap();
        assert!(collator.call_counts().is_empty());
    }
}
