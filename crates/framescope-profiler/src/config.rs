//! Profiler configuration.

use crate::error::{ProfilerError, Result};

/// Number of frames kept in each thread's ring buffer by default.
pub const DEFAULT_FRAMES_TRACKED: usize = 128;

/// TCP port for the report server.
pub const DEFAULT_PORT: u16 = 4242;

/// Profiler configuration.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Ring buffer length, shared by every thread and the frame-stats ring.
    pub frames_tracked: usize,
    /// Scope nodes available to each thread across all of its frame slots.
    pub max_scopes_per_thread: usize,
    /// Mutex operations recorded per thread per frame.
    pub max_mutex_ops_per_frame: usize,
    /// Entries in the call-count ranking table.
    pub call_count_capacity: usize,
    /// Entries in the draw-call table.
    pub draw_call_capacity: usize,
    /// Whether scopes are recorded at startup.
    pub enabled: bool,
    /// Start the report server on this port at construction.
    pub ipc_port: Option<u16>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            frames_tracked: DEFAULT_FRAMES_TRACKED,
            max_scopes_per_thread: 64 * 1024,
            max_mutex_ops_per_frame: 4096,
            call_count_capacity: 256,
            draw_call_capacity: 128,
            enabled: true,
            ipc_port: None,
        }
    }
}

impl ProfilerConfig {
    /// Set the ring buffer length.
    #[must_use]
    pub const fn with_frames_tracked(mut self, frames: usize) -> Self {
        self.frames_tracked = frames;
        self
    }

    /// Set the per-thread scope node capacity.
    #[must_use]
    pub const fn with_max_scopes_per_thread(mut self, scopes: usize) -> Self {
        self.max_scopes_per_thread = scopes;
        self
    }

    /// Set the per-frame mutex op capacity.
    #[must_use]
    pub const fn with_max_mutex_ops_per_frame(mut self, ops: usize) -> Self {
        self.max_mutex_ops_per_frame = ops;
        self
    }

    /// Set the call-count ranking table capacity.
    #[must_use]
    pub const fn with_call_count_capacity(mut self, capacity: usize) -> Self {
        self.call_count_capacity = capacity;
        self
    }

    /// Set the draw-call table capacity.
    #[must_use]
    pub const fn with_draw_call_capacity(mut self, capacity: usize) -> Self {
        self.draw_call_capacity = capacity;
        self
    }

    /// Enable or disable recording at startup.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Serve reports on the given port.
    #[must_use]
    pub const fn with_ipc_port(mut self, port: u16) -> Self {
        self.ipc_port = Some(port);
        self
    }

    /// Check the configuration for values the profiler cannot work with.
    pub fn validate(&self) -> Result<()> {
        // One slot is always being written, so a single slot could never be read.
        if self.frames_tracked < 2 {
            return Err(ProfilerError::InvalidConfig(format!(
                "frames_tracked must be at least 2, got {}",
                self.frames_tracked
            )));
        }
        if self.max_scopes_per_thread == 0 || self.max_scopes_per_thread > u32::MAX as usize {
            return Err(ProfilerError::InvalidConfig(format!(
                "max_scopes_per_thread must be in 1..={}, got {}",
                u32::MAX,
                self.max_scopes_per_thread
            )));
        }
        if self.call_count_capacity == 0 {
            return Err(ProfilerError::InvalidConfig(
                "call_count_capacity must be non-zero".into(),
            ));
        }
        if self.draw_call_capacity == 0 {
            return Err(ProfilerError::InvalidConfig(
                "draw_call_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
