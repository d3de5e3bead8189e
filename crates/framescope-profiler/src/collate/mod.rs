//! Turning recorded frames into aggregate statistics.
//!
//! Everything here runs on the consumer's thread against pinned frames or
//! offline trees; nothing touches recording state.

pub mod mutex_wait;
pub mod ranking;
pub mod timeline;
pub mod unique;

pub use mutex_wait::{
    pair_frame_waits, pair_mutex_waits, ContentionWindow, MutexPairing, UnterminatedWait,
};
pub use ranking::{CallCountTable, CalledFunction, RankPass, RankedFunction};
pub use timeline::{timeline, CycleBar};
pub use unique::{
    call_graph, collate_unique, collate_unique_siblings, CallGraphRow, ExpansionState, UniqueScope,
};
