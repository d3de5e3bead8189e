//! Scope identities.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Name of a timed region.
///
/// Callers pass string literals; two names are the same scope when they
/// point at the same bytes. Equal contents at different addresses are
/// different scopes.
#[derive(Clone, Copy)]
pub struct ScopeName(&'static str);

impl ScopeName {
    /// Placeholder carried by unused arena nodes.
    pub const EMPTY: Self = Self("");

    /// Wrap a static string.
    #[inline]
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The text of the name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }

    /// Address of the name's bytes, its identity.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl PartialEq for ScopeName {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr()) && self.0.len() == other.0.len()
    }
}

impl Eq for ScopeName {}

impl Hash for ScopeName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
        self.0.len().hash(state);
    }
}

impl fmt::Debug for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{:#x}", self.0, self.addr())
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&'static str> for ScopeName {
    fn from(name: &'static str) -> Self {
        Self(name)
    }
}

/// Structural position of a scope: the chain of names from a frame root.
///
/// Used by viewers to remember fold state across frames whose trees have
/// the same shape. Only meaningful within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScopePath(u64);

impl ScopePath {
    /// Path of the frame root (parent of every top-level scope).
    pub const ROOT: Self = Self(0);

    /// Path of a scope named `name` directly under this one.
    #[inline]
    #[must_use]
    pub fn child(self, name: ScopeName) -> Self {
        const SEED: u64 = 0x517c_c1b7_2722_0a95;
        let addr = name.addr() as u64;
        let mixed = (self.0.rotate_left(5) ^ addr ^ (name.as_str().len() as u64).rotate_left(48))
            .wrapping_mul(SEED);
        Self(mixed | 1)
    }

    /// Raw value, as carried over the wire.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw value received from a client.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    static UPDATE: &str = "update";

    #[test]
    fn identity_is_by_address() {
        let a = ScopeName::new(UPDATE);
        let b = ScopeName::new(UPDATE);
        assert_eq!(a, b);

        let owned: &'static str = Box::leak(String::from("update").into_boxed_str());
        let c = ScopeName::new(owned);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), c.as_str());
    }

    #[test]
    fn hash_follows_identity() {
        let mut set = HashSet::new();
        set.insert(ScopeName::new(UPDATE));
        set.insert(ScopeName::new(UPDATE));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn paths_distinguish_depth() {
        let name = ScopeName::new(UPDATE);
        let top = ScopePath::ROOT.child(name);
        let nested = top.child(name);
        assert_ne!(top, ScopePath::ROOT);
        assert_ne!(top, nested);
        assert_eq!(top, ScopePath::ROOT.child(name));
        assert_eq!(ScopePath::from_raw(nested.raw()), nested);
    }
}
