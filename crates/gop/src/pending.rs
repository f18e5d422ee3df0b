//! Pending children of a queue
//!
//! Insertion-ordered, with O(1) removal by op id. Removed entries leave a
//! hole that is compacted away once holes outnumber live entries.

use std::collections::HashMap;

use gop_core::OpId;

use crate::op::Gop;

const COMPACT_MIN_SLOTS: usize = 32;

#[derive(Default)]
pub(crate) struct PendingSet {
    slots: Vec<Option<Gop>>,
    index: HashMap<OpId, usize>,
    live: usize,
}

impl PendingSet {
    pub(crate) fn push(&mut self, gop: Gop) {
        self.index.insert(gop.id(), self.slots.len());
        self.slots.push(Some(gop));
        self.live += 1;
    }

    /// Remove `gop`; `false` if it was not pending
    pub(crate) fn remove(&mut self, gop: &Gop) -> bool {
        let Some(slot) = self.index.remove(&gop.id()) else {
            return false;
        };
        self.slots[slot] = None;
        self.live -= 1;
        if self.slots.len() >= COMPACT_MIN_SLOTS && self.live * 2 < self.slots.len() {
            self.compact();
        }
        true
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Gop> {
        self.slots.iter().flatten()
    }

    pub(crate) fn to_vec(&self) -> Vec<Gop> {
        self.iter().cloned().collect()
    }

    /// Empty the set, returning the children in order
    pub(crate) fn take(&mut self) -> Vec<Gop> {
        self.index.clear();
        self.live = 0;
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }

    /// Reorder to follow `order`
    ///
    /// Entries of `order` that are no longer pending are skipped; pending
    /// children missing from `order` keep their relative order at the end.
    pub(crate) fn reorder(&mut self, order: &[Gop]) {
        let mut rest = self.take();
        let mut ordered = Vec::with_capacity(rest.len());
        {
            let mut at: HashMap<OpId, usize> =
                rest.iter().enumerate().map(|(i, g)| (g.id(), i)).collect();
            let mut moved = vec![false; rest.len()];
            for gop in order {
                if let Some(i) = at.remove(&gop.id()) {
                    ordered.push(rest[i].clone());
                    moved[i] = true;
                }
            }
            let mut i = 0;
            rest.retain(|_| {
                let keep = !moved[i];
                i += 1;
                keep
            });
        }
        ordered.append(&mut rest);
        for gop in ordered {
            self.push(gop);
        }
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (slot, gop) in self.slots.iter().flatten().enumerate() {
            self.index.insert(gop.id(), slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gop_core::OP_SUCCESS;

    fn ops(n: usize) -> Vec<Gop> {
        (0..n).map(|_| Gop::dummy(OP_SUCCESS)).collect()
    }

    fn ids(set: &PendingSet) -> Vec<OpId> {
        set.iter().map(Gop::id).collect()
    }

    #[test]
    fn test_remove_keeps_order() {
        let all = ops(5);
        let mut set = PendingSet::default();
        for g in &all {
            set.push(g.clone());
        }
        assert!(set.remove(&all[1]));
        assert!(set.remove(&all[3]));
        assert!(!set.remove(&all[3]));
        assert_eq!(set.len(), 3);
        assert_eq!(ids(&set), vec![all[0].id(), all[2].id(), all[4].id()]);
    }

    #[test]
    fn test_compaction_keeps_index_valid() {
        let all = ops(100);
        let mut set = PendingSet::default();
        for g in &all {
            set.push(g.clone());
        }
        for g in all.iter().filter(|g| g.id().as_u64() % 3 != 0) {
            assert!(set.remove(g));
        }
        let left: Vec<OpId> = all
            .iter()
            .map(Gop::id)
            .filter(|id| id.as_u64() % 3 == 0)
            .collect();
        assert_eq!(ids(&set), left);
        for g in all.iter().filter(|g| g.id().as_u64() % 3 == 0) {
            assert!(set.remove(g));
        }
        assert!(set.is_empty());
        assert!(set.take().is_empty());
    }

    #[test]
    fn test_reorder() {
        let all = ops(4);
        let mut set = PendingSet::default();
        for g in &all {
            set.push(g.clone());
        }
        set.remove(&all[0]);
        // all[0] is gone and all[1] is missing from the order.
        set.reorder(&[all[3].clone(), all[0].clone(), all[2].clone()]);
        assert_eq!(ids(&set), vec![all[3].id(), all[2].id(), all[1].id()]);
        assert!(set.remove(&all[2]));
        assert_eq!(set.len(), 2);
    }
}
