//! Per-call-site draw-call counts.

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::name::ScopeName;

/// Counts for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCallRecord {
    /// Call-site identity.
    pub caller: ScopeName,
    /// Vertex count of the most recent call.
    pub vertex_count: u32,
    /// Calls since the table was last cleared.
    pub calls: u64,
}

/// Serializable copy of a [`DrawCallRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawCallEntry {
    /// Call-site name.
    pub caller: String,
    /// Vertex count of the most recent call.
    pub vertex_count: u32,
    /// Number of calls.
    pub calls: u64,
}

impl From<&DrawCallRecord> for DrawCallEntry {
    fn from(record: &DrawCallRecord) -> Self {
        Self {
            caller: record.caller.as_str().to_owned(),
            vertex_count: record.vertex_count,
            calls: record.calls,
        }
    }
}

/// Fixed-capacity open-addressed table keyed by call-site address.
#[derive(Debug, Clone)]
pub struct DrawCallTable {
    slots: Box<[Option<DrawCallRecord>]>,
    len: usize,
}

impl DrawCallTable {
    /// Create a table with room for `capacity` call sites.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Maximum number of call sites.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Call sites currently tracked.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been tracked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Count one call. The latest vertex count replaces the stored one.
    ///
    /// Fails without side effects when `caller` is new and every slot is
    /// taken.
    pub fn track(&mut self, caller: ScopeName, vertex_count: u32) -> Result<()> {
        let capacity = self.slots.len();
        if capacity == 0 {
            return Err(ProfilerError::CapacityExhausted {
                table: "draw call",
                capacity,
            });
        }

        let start = caller.addr() % capacity;
        for step in 0..capacity {
            let slot = &mut self.slots[(start + step) % capacity];
            match slot {
                Some(record) if record.caller == caller => {
                    record.vertex_count = vertex_count;
                    record.calls += 1;
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    *slot = Some(DrawCallRecord {
                        caller,
                        vertex_count,
                        calls: 1,
                    });
                    self.len += 1;
                    return Ok(());
                }
            }
        }

        Err(ProfilerError::CapacityExhausted {
            table: "draw call",
            capacity,
        })
    }

    /// Entry for `caller`, if tracked.
    #[must_use]
    pub fn get(&self, caller: ScopeName) -> Option<DrawCallRecord> {
        let capacity = self.slots.len();
        if capacity == 0 {
            return None;
        }
        let start = caller.addr() % capacity;
        for step in 0..capacity {
            match self.slots[(start + step) % capacity] {
                Some(record) if record.caller == caller => return Some(record),
                Some(_) => {}
                None => return None,
            }
        }
        None
    }

    /// Tracked entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = &DrawCallRecord> {
        self.slots.iter().flatten()
    }

    /// Entries sorted by call count, most called first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DrawCallRecord> {
        let mut records: Vec<_> = self.iter().copied().collect();
        records.sort_by(|a, b| b.calls.cmp(&a.calls));
        records
    }

    /// Forget every call site.
    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.len = 0;
    }
}
