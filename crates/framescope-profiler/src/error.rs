//! Error types for the profiler.

use thiserror::Error;

/// Profiler-wide error type.
///
/// Nothing on the recording path returns this; scope and mutex recording
/// degrade silently. Errors surface on the consumer side only.
#[derive(Error, Debug)]
pub enum ProfilerError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration rejected by `ProfilerConfig::validate`
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fixed-capacity table had no room for a new entry
    #[error("{table} table full (capacity {capacity})")]
    CapacityExhausted {
        /// Which table overflowed.
        table: &'static str,
        /// Its fixed capacity.
        capacity: usize,
    },

    /// Frame slot index outside the ring buffer
    #[error("Frame slot {slot} out of range ({tracked} frames tracked)")]
    FrameOutOfRange {
        /// Requested slot.
        slot: usize,
        /// Ring buffer length.
        tracked: usize,
    },

    /// Frame slot is currently being written
    #[error("Frame slot {slot} is being written")]
    ActiveWriteSlot {
        /// Requested slot.
        slot: usize,
    },

    /// Frame slot has never been recorded by the main thread
    #[error("Frame slot {slot} holds no recorded frame")]
    FrameNotRecorded {
        /// Requested slot.
        slot: usize,
    },

    /// `register_main_thread` called twice
    #[error("Main thread already registered")]
    MainThreadAlreadyRegistered,

    /// Worker registered, or frame read, before the main thread exists
    #[error("Main thread not registered")]
    MainThreadNotRegistered,

    /// Thread index not in the registry
    #[error("Unknown thread index {0}")]
    UnknownThread(usize),
}

impl From<bincode::Error> for ProfilerError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, ProfilerError>;
