//! Global call-count ranking.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::name::ScopeName;
use crate::view::ScopeSource;

/// One ranking table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalledFunction {
    /// Scope name.
    pub name: ScopeName,
    /// Calls counted since the last reset.
    pub calls: u64,
}

/// Serializable copy of a [`CalledFunction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedFunction {
    /// Scope name.
    pub name: String,
    /// Calls counted since the last reset.
    pub calls: u64,
}

impl From<&CalledFunction> for RankedFunction {
    fn from(entry: &CalledFunction) -> Self {
        Self {
            name: entry.name.as_str().to_owned(),
            calls: entry.calls,
        }
    }
}

/// Outcome of [`CallCountTable::rank_tree`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankPass {
    /// Scopes visited.
    pub scopes: usize,
    /// Scopes whose name did not fit the table.
    pub dropped: usize,
}

/// Fixed-capacity table of call counts, kept sorted by count (highest
/// first) after every single update.
#[derive(Debug, Clone)]
pub struct CallCountTable {
    entries: Vec<CalledFunction>,
    positions: HashMap<ScopeName, usize>,
    capacity: usize,
}

impl CallCountTable {
    /// Create a table for at most `capacity` distinct names.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Distinct names the table can hold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Distinct names counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, highest count first.
    #[must_use]
    pub fn entries(&self) -> &[CalledFunction] {
        &self.entries
    }

    /// Calls counted for `name`.
    #[must_use]
    pub fn calls(&self, name: ScopeName) -> Option<u64> {
        self.positions.get(&name).map(|&i| self.entries[i].calls)
    }

    /// Count one call to `name`.
    ///
    /// A new name with the table full is refused; the table is unchanged.
    pub fn record(&mut self, name: ScopeName) -> Result<()> {
        let Some(&position) = self.positions.get(&name) else {
            if self.entries.len() >= self.capacity {
                return Err(ProfilerError::CapacityExhausted {
                    table: "call count",
                    capacity: self.capacity,
                });
            }
            // A count of 1 already belongs at the end.
            self.positions.insert(name, self.entries.len());
            self.entries.push(CalledFunction { name, calls: 1 });
            return Ok(());
        };

        self.entries[position].calls += 1;
        let calls = self.entries[position].calls;

        // Entries before us are all >= calls - 1. Swap with the furthest one
        // still below the new count.
        let mut target = position;
        while target > 0 && self.entries[target - 1].calls < calls {
            target -= 1;
        }
        if target != position {
            self.entries.swap(target, position);
            self.positions.insert(self.entries[position].name, position);
            self.positions.insert(name, target);
        }
        Ok(())
    }

    /// Count every scope in a tree, depth first over children and siblings.
    ///
    /// Names that do not fit are dropped for this pass and logged once.
    pub fn rank_tree<S: ScopeSource + ?Sized>(&mut self, source: &S) -> RankPass {
        let mut pass = RankPass::default();
        for (id, _) in source.walk_depth_first() {
            let Some(node) = source.get(id) else {
                continue;
            };
            pass.scopes += 1;
            if self.record(node.name).is_err() {
                pass.dropped += 1;
            }
        }
        if pass.dropped > 0 {
            tracing::warn!(
                capacity = self.capacity,
                dropped = pass.dropped,
                "call count table full, scopes left uncounted"
            );
        }
        pass
    }

    /// The `limit` most called names.
    #[must_use]
    pub fn top(&self, limit: usize) -> Vec<RankedFunction> {
        self.entries.iter().take(limit).map(RankedFunction::from).collect()
    }

    /// Forget every count.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeBuilder;

    static NAMES: [&str; 5] = ["a", "b", "c", "d", "e"];

    fn is_sorted(table: &CallCountTable) -> bool {
        table.entries().windows(2).all(|w| w[0].calls >= w[1].calls)
    }

    #[test]
    fn stays_sorted_after_every_increment() {
        let mut table = CallCountTable::new(8);
        let sequence = [4, 3, 3, 0, 4, 4, 1, 2, 2, 2, 2, 0, 0, 0, 0, 0, 3, 1];
        for &i in &sequence {
            table.record(ScopeName::new(NAMES[i])).unwrap();
            assert!(is_sorted(&table), "unsorted after {}", NAMES[i]);
            for (position, entry) in table.entries().iter().enumerate() {
                assert_eq!(table.positions[&entry.name], position);
            }
        }
        assert_eq!(table.entries()[0].name.as_str(), "a");
        assert_eq!(table.calls(ScopeName::new(NAMES[0])), Some(6));
        assert_eq!(table.calls(ScopeName::new(NAMES[2])), Some(4));
    }

    #[test]
    fn full_table_refuses_new_names() {
        let mut table = CallCountTable::new(2);
        table.record(ScopeName::new(NAMES[0])).unwrap();
        table.record(ScopeName::new(NAMES[1])).unwrap();
        assert!(matches!(
            table.record(ScopeName::new(NAMES[2])),
            Err(ProfilerError::CapacityExhausted { capacity: 2, .. })
        ));
        table.record(ScopeName::new(NAMES[1])).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].name.as_str(), "b");
    }

    #[test]
    fn rank_tree_visits_children_and_siblings() {
        let mut b = TreeBuilder::new(16);
        let frame = b.open(NAMES[0], 0).unwrap();
        b.leaf(NAMES[1], 0, 1);
        b.leaf(NAMES[1], 1, 2);
        let c = b.open(NAMES[2], 2).unwrap();
        b.leaf(NAMES[1], 2, 3);
        b.close(c, 4);
        b.close(frame, 5);

        let mut table = CallCountTable::new(2);
        let pass = table.rank_tree(&b);
        assert_eq!(pass.scopes, 5);
        assert_eq!(pass.dropped, 1);
        assert_eq!(table.top(1)[0].name, "b");
        assert_eq!(table.top(1)[0].calls, 3);

        table.reset();
        assert!(table.is_empty());
    }
}
