//! Operation identifier type

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Process-wide id counter. Only reachable through [`OpId::next`].
static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an operation
///
/// Ids are handed out by a single process-wide atomic counter. They are
/// unique and increase in allocation order; nothing else is promised.
/// Zero is never allocated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct OpId(u64);

impl OpId {
    /// Allocate a fresh id
    #[inline]
    pub fn next() -> Self {
        OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Default "my id" for an operation carrying this id
    #[inline]
    pub const fn as_my_id(self) -> i64 {
        self.0 as i64
    }
}

impl From<OpId> for u64 {
    #[inline]
    fn from(id: OpId) -> Self {
        id.0
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpId({})", self.0)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gid={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_ids_increase() {
        let a = OpId::next();
        let b = OpId::next();
        assert!(b > a);
        assert_ne!(a.as_u64(), 0);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| (0..1000).map(|_| OpId::next()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {:?}", id);
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_display() {
        let id = OpId::next();
        assert_eq!(id.to_string(), format!("gid={}", id.as_u64()));
        assert_eq!(id.as_my_id() as u64, id.as_u64());
    }
}
