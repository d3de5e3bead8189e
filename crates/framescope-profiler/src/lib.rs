//! Frame-oriented, multi-threaded scope profiler.
//!
//! Every registered thread records a tree of nested, cycle-timed scopes for
//! each frame into its own ring buffer. A consumer selects a completed frame,
//! pins it on every thread that took part, and collates the trees into call
//! graphs, timelines, call rankings and lock-contention windows.
//!
//! # Feature Flags
//!
//! - `profiling`: Enable the instrumentation macros. When disabled, all
//!   profiling macros expand to no-ops for zero overhead. The [`Profiler`]
//!   API itself is always available.
//!
//! # Usage
//!
//! Create the profiler and register the main thread at startup:
//!
//! ```ignore
//! let profiler = framescope_profiler::Profiler::new(ProfilerConfig::default())?;
//! profiler.register_main_thread()?.install();
//! ```
//!
//! Use the profiling macros to instrument code:
//!
//! ```ignore
//! use framescope_profiler::profile_scope;
//!
//! fn simulate() {
//!     profile_scope!("simulate");
//!     // ... simulation code
//! }
//! ```
//!
//! At the end of each frame, advance the main thread and read back an older,
//! completed frame:
//!
//! ```ignore
//! framescope_profiler::with_current(|main| main.advance_main_frame(frame_ms));
//! profiler.select_frontier()?;
//! let report = collator.collate(&profiler)?;
//! ```

mod arena;
pub mod clock;
pub mod collate;
mod config;
mod context;
mod draw_calls;
mod error;
mod frame;
pub mod ipc;
mod macros;
mod mutex_ops;
mod name;
mod report;
mod slot;
mod thread;
mod tree;
mod view;

// Re-export public API
pub use arena::{NodeId, ScopeNode};
pub use collate::{
    call_graph, collate_unique, collate_unique_siblings, pair_frame_waits, pair_mutex_waits,
    timeline, CallCountTable, CallGraphRow, CalledFunction, ContentionWindow, CycleBar,
    ExpansionState, MutexPairing, RankPass, RankedFunction, UniqueScope, UnterminatedWait,
};
pub use config::{ProfilerConfig, DEFAULT_FRAMES_TRACKED, DEFAULT_PORT};
pub use context::Profiler;
pub use draw_calls::{DrawCallEntry, DrawCallRecord, DrawCallTable};
pub use error::{ProfilerError, Result};
pub use frame::{FrameStats, FrameTimeSummary};
pub use macros::ScopeGuard;
pub use mutex_ops::{MutexId, MutexOp, MutexOpRecord, TimedMutex, TimedMutexGuard};
pub use name::{ScopeName, ScopePath};
pub use report::{Collator, FrameReport, ThreadReport};
pub use thread::{uninstall_current, with_current, ScopeHandle, ThreadRecorder, ThreadStats};
pub use tree::{ScopeTree, TreeBuilder, NEVER_RECORDED};
pub use view::{
    dump_tree, DepthFirst, FrameView, ReadFrame, ScopeSource, Siblings, SkipReason,
    SkippedThread,
};

// Re-export protocol types for viewers
pub use ipc::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
