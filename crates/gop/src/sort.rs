//! Start-order hooks for queues
//!
//! Before a queue starts its pending children it hands them to a sort hook,
//! which may reorder them in place. Children are started in the resulting
//! order. The hook runs without the queue lock held.

use std::collections::HashMap;
use std::sync::Arc;

use crate::op::Gop;

/// Reorders a queue's children before they are started
pub type SortFn = Arc<dyn Fn(&mut Vec<Gop>) + Send + Sync>;

/// Group children sharing an affinity key next to each other
///
/// Groups are ordered by the first appearance of their key, and relative
/// order inside a group is kept. Children without a key stay where they
/// are relative to the groups around them. With no keys set this is the
/// identity.
pub fn default_sort_ops(ops: &mut Vec<Gop>) {
    let keys: Vec<Option<Arc<str>>> = ops.iter().map(Gop::affinity).collect();
    if keys.iter().all(Option::is_none) {
        return;
    }

    let mut first_seen: HashMap<Arc<str>, usize> = HashMap::new();
    let ranks: Vec<usize> = keys
        .iter()
        .enumerate()
        .map(|(idx, key)| match key {
            Some(k) => *first_seen.entry(Arc::clone(k)).or_insert(idx),
            None => idx,
        })
        .collect();

    let mut ranked: Vec<(usize, Gop)> = ranks.into_iter().zip(ops.drain(..)).collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ops.extend(ranked.into_iter().map(|(_, gop)| gop));
}

/// Hook that leaves the order alone
pub fn identity_sort(_ops: &mut Vec<Gop>) {}
