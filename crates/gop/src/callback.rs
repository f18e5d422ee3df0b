//! Completion callbacks
//!
//! Each op carries an ordered chain of closures. The chain fires once per
//! completion, in attach order, after the op is `Completed` with its status
//! latched and before other waiters are released. A panicking callback is
//! logged and skipped; the rest of the chain still runs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use gop_core::OpStatus;

use crate::op::Gop;
use crate::opque::OpQue;

/// Post-completion hook: receives the completed op and its status
pub type Callback = Arc<dyn Fn(&Gop, &OpStatus) + Send + Sync>;

/// Queue hook fired on the first failed child: `(queue, failed_child)`
pub type FailureCallback = Arc<dyn Fn(&OpQue, &Gop) + Send + Sync>;

/// Ordered list of completion callbacks
#[derive(Clone, Default)]
pub(crate) struct CallbackChain {
    entries: Vec<Callback>,
}

impl CallbackChain {
    pub(crate) fn push(&mut self, cb: Callback) {
        self.entries.push(cb);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Run every callback in order
    pub(crate) fn fire(&self, gop: &Gop, status: &OpStatus) {
        for (idx, cb) in self.entries.iter().enumerate() {
            fire_one(cb, gop, status, idx);
        }
    }
}

pub(crate) fn fire_one(cb: &Callback, gop: &Gop, status: &OpStatus, idx: usize) {
    if panic::catch_unwind(AssertUnwindSafe(|| cb(gop, status))).is_err() {
        tracing::error!(op = %gop.id(), callback = idx, "completion callback panicked");
    }
}

pub(crate) fn fire_failure(cb: &FailureCallback, queue: &OpQue, child: &Gop) {
    if panic::catch_unwind(AssertUnwindSafe(|| cb(queue, child))).is_err() {
        tracing::error!(queue = %queue.id(), child = %child.id(), "failure callback panicked");
    }
}
