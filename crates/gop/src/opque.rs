//! Operation queues
//!
//! An [`OpQue`] is a gop whose work is a set of child gops, which may be
//! queues themselves. It tracks
//!
//! - `pending`: children added but not yet completed
//! - `finished`: completed children not yet handed out by `wait_any`
//! - `failed`: completed children with a non-success status
//!
//! and completes itself, with the aggregate status, once submission is
//! closed and nothing is pending.
//!
//! # Ordering
//!
//! `wait_any` hands children out in completion order. A child added to a
//! queue that already started is put on `pending` first and started after
//! the queue lock is dropped, so it is counted by `tasks_left` before its
//! work can run and cannot be returned by `wait_any` before its work
//! function returned.
//!
//! # Locking
//!
//! `add` and `free` lock the queue, then a child; adding a queue to a queue
//! takes a process-wide topology lock before both. Completion reporting
//! takes only the queue lock. Counting nested queues takes one lock at a
//! time.

use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gop_core::{
    ExecMode, FreeMode, GopError, GopResult, OpId, OpState, OpStatus, OP_FAILURE, OP_SUCCESS,
};
use parking_lot::Mutex;

use crate::callback::{self, FailureCallback};
use crate::op::{Gop, OpCore, WaitOutcome};
use crate::pending::PendingSet;
use crate::sort::{default_sort_ops, SortFn};

/// Held across the cycle check and the link when a queue is added to a queue
static TOPOLOGY: Mutex<()> = parking_lot::const_mutex(());

/// Queue bookkeeping, guarded by the queue op's lock
pub(crate) struct QueueData {
    pub(crate) pending: PendingSet,
    pub(crate) finished: VecDeque<Gop>,
    pub(crate) failed: VecDeque<Gop>,
    pub(crate) nsubmitted: usize,
    /// Children freed before they ever completed
    ndetached: usize,
    nsucceeded: usize,
    nfailed: usize,
    pub(crate) finished_submission: bool,
    /// Set once the queue's own completion has been claimed
    completing: bool,
    failure_cb: Option<FailureCallback>,
    failure_fired: bool,
    sort: SortFn,
}

impl QueueData {
    pub(crate) fn new() -> Self {
        Self {
            pending: PendingSet::default(),
            finished: VecDeque::new(),
            failed: VecDeque::new(),
            nsubmitted: 0,
            ndetached: 0,
            nsucceeded: 0,
            nfailed: 0,
            finished_submission: false,
            completing: false,
            failure_cb: None,
            failure_fired: false,
            sort: Arc::new(default_sort_ops),
        }
    }

    /// Success iff no child failed so far
    pub(crate) fn aggregate(&self) -> OpStatus {
        if self.nfailed == 0 {
            OP_SUCCESS
        } else {
            OP_FAILURE
        }
    }

    /// File a completed child; returns the failure hook if this is the first failure
    fn record(&mut self, child: &Gop, status: OpStatus, keep: bool) -> Option<FailureCallback> {
        if keep {
            self.finished.push_back(child.clone());
        }
        if status.is_success() {
            self.nsucceeded += 1;
            return None;
        }
        self.nfailed += 1;
        self.failed.push_back(child.clone());
        if self.failure_fired {
            return None;
        }
        self.failure_fired = true;
        self.failure_cb.clone()
    }

    /// Claim the queue's completion once it became drainable
    fn take_completion(&mut self) -> Option<OpStatus> {
        if self.finished_submission && self.pending.is_empty() && !self.completing {
            self.completing = true;
            Some(self.aggregate())
        } else {
            None
        }
    }

    pub(crate) fn release(&mut self) {
        self.finished.clear();
        self.failure_cb = None;
        self.sort = Arc::new(default_sort_ops);
    }
}

/// Handle to an operation queue
///
/// Derefs to [`Gop`], so a queue can be started, waited on, given
/// callbacks, and added to another queue like any other op.
#[derive(Clone, PartialEq, Eq)]
pub struct OpQue {
    gop: Gop,
}

impl Default for OpQue {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for OpQue {
    type Target = Gop;

    fn deref(&self) -> &Gop {
        &self.gop
    }
}

impl From<OpQue> for Gop {
    fn from(q: OpQue) -> Gop {
        q.gop
    }
}

impl TryFrom<Gop> for OpQue {
    type Error = GopError;

    fn try_from(gop: Gop) -> GopResult<Self> {
        if gop.is_queue() {
            Ok(Self { gop })
        } else {
            Err(GopError::NotAQueue(gop.id()))
        }
    }
}

impl std::fmt::Debug for OpQue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpQue")
            .field("id", &self.id())
            .field("my_id", &self.my_id())
            .finish_non_exhaustive()
    }
}

impl OpQue {
    /// Empty queue
    pub fn new() -> Self {
        Self {
            gop: Gop::new_queue_op(),
        }
    }

    pub(crate) fn from_gop(gop: Gop) -> Self {
        debug_assert!(gop.is_queue());
        Self { gop }
    }

    #[inline]
    pub fn as_gop(&self) -> &Gop {
        &self.gop
    }

    #[inline]
    pub fn into_gop(self) -> Gop {
        self.gop
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Add `gop` as a child
    ///
    /// Fails once submission is finished, for ops already in a queue, and
    /// for adds that would make a queue contain itself. A child that
    /// already completed is filed straight away. If the queue already
    /// started, the child is started too; a Direct queue runs it before
    /// `add` returns.
    pub fn add(&self, gop: &Gop) -> GopResult<()> {
        let topology = gop.is_queue().then(|| TOPOLOGY.lock());
        if self.creates_cycle(gop) {
            return Err(GopError::SelfAdd(self.id()));
        }

        let (start_now, failure) = {
            let mut qcore = self.lock();
            if qcore.released {
                return Err(GopError::Released(self.id()));
            }
            if qcore.qdata_ref().finished_submission {
                return Err(GopError::SubmissionClosed(self.id()));
            }
            let queue_mode = qcore.exec_mode;

            let (done, keep) = {
                let mut ccore = gop.lock();
                if let Some(parent) = ccore.parent() {
                    return Err(GopError::AlreadyQueued {
                        op: gop.id(),
                        queue: parent.id,
                    });
                }
                if queue_mode == ExecMode::Direct && !ccore.started {
                    ccore.exec_mode = ExecMode::Direct;
                }
                ccore.parent = Some(Arc::downgrade(&self.gop.inner));
                let done = if ccore.state == OpState::Completed {
                    ccore.status
                } else {
                    None
                };
                (done, !ccore.auto_destroy)
            };

            let started = qcore.started;
            let q = qcore.qdata();
            q.nsubmitted += 1;
            let failure = match done {
                Some(status) => q.record(gop, status, keep),
                None => {
                    q.pending.push(gop.clone());
                    None
                }
            };
            qcore.notify();
            (started && done.is_none(), failure)
        };
        drop(topology);
        tracing::trace!(queue = %self.id(), child = %gop.id(), start_now, "added");

        if let Some(cb) = failure {
            callback::fire_failure(&cb, self, gop);
        }
        if start_now {
            gop.start_execution();
        }
        Ok(())
    }

    /// `gop` is this queue or one of its ancestors
    fn creates_cycle(&self, gop: &Gop) -> bool {
        let mut cursor = Some(self.gop.clone());
        while let Some(q) = cursor {
            if q.ptr_eq(gop) {
                return true;
            }
            cursor = q.lock().parent().map(|inner| Gop { inner });
        }
        false
    }

    /// No more children will be added
    ///
    /// With nothing pending the queue completes right here.
    pub fn finished_submission(&self) {
        let completion = {
            let mut core = self.lock();
            let q = core.qdata();
            q.finished_submission = true;
            q.take_completion()
        };
        if let Some(status) = completion {
            self.gop.finish(status);
        }
    }

    pub fn is_submission_finished(&self) -> bool {
        self.lock().qdata_ref().finished_submission
    }

    /// Replace the hook that orders children before they start
    pub fn set_sort<F>(&self, sort: F)
    where
        F: Fn(&mut Vec<Gop>) + Send + Sync + 'static,
    {
        self.lock().qdata().sort = Arc::new(sort);
    }

    /// Called once, for the first child that fails
    ///
    /// Receives the queue and the failed child. The engine cancels nothing
    /// by itself; the hook decides what to do with the siblings.
    pub fn set_failure_callback<F>(&self, f: F)
    where
        F: Fn(&OpQue, &Gop) + Send + Sync + 'static,
    {
        self.lock().qdata().failure_cb = Some(Arc::new(f));
    }

    pub(crate) fn start(&self) {
        let (mut children, sort) = {
            let mut core = self.lock();
            if core.started || core.status.is_some() {
                return;
            }
            if core.released {
                tracing::warn!(queue = %self.id(), "start of a released queue");
                return;
            }
            core.started = true;
            core.state = OpState::Running;
            core.started_at = Some(Instant::now());
            let direct = core.exec_mode == ExecMode::Direct;
            let q = core.qdata();
            if direct {
                for child in q.pending.iter() {
                    let mut ccore = child.lock();
                    if !ccore.started {
                        ccore.exec_mode = ExecMode::Direct;
                    }
                }
            }
            (q.pending.to_vec(), Arc::clone(&q.sort))
        };

        sort(&mut children);
        self.lock().qdata().pending.reorder(&children);
        tracing::debug!(queue = %self.id(), children = children.len(), "queue started");
        for child in &children {
            child.start_execution();
        }
    }

    // ========================================================================
    // Completion reporting
    // ========================================================================

    /// A child finished; file it and complete the queue if drainable
    fn on_child_completed(&self, child: &Gop, status: OpStatus, auto_destroy: bool) {
        let (failure, completion) = {
            let mut core = self.lock();
            let q = core.qdata();
            if !q.pending.remove(child) {
                tracing::trace!(queue = %self.id(), child = %child.id(), "completion of detached child");
                return;
            }
            let failure = q.record(child, status, !auto_destroy);
            let completion = q.take_completion();
            core.notify();
            (failure, completion)
        };

        if let Some(cb) = failure {
            callback::fire_failure(&cb, self, child);
        }
        if let Some(status) = completion {
            self.gop.finish(status);
        }
    }

    /// Take a never-completed child off `pending`
    pub(crate) fn detach_pending(&self, child: &Gop) {
        let completion = {
            let mut core = self.lock();
            let q = core.qdata();
            if !q.pending.remove(child) {
                return;
            }
            q.ndetached += 1;
            let completion = q.take_completion();
            core.notify();
            completion
        };
        if let Some(status) = completion {
            self.gop.finish(status);
        }
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Next completed child, in completion order
    ///
    /// Starts the queue if needed, then blocks until a child is available.
    /// `None` once nothing is pending and everything was handed out.
    pub fn wait_any(&self) -> Option<Gop> {
        self.start();
        let core = self.lock();
        let (mut core, _) = self.gop.block_until(core, None, drainable);
        core.qdata().finished.pop_front()
    }

    /// Like [`wait_any`](Self::wait_any), giving up after `timeout`
    pub fn wait_any_timed(&self, timeout: Duration) -> WaitOutcome<Option<Gop>> {
        self.start();
        let deadline = Instant::now() + timeout;
        let core = self.lock();
        match self.gop.block_until(core, Some(deadline), drainable) {
            (mut core, true) => WaitOutcome::Done(core.qdata().finished.pop_front()),
            (_, false) => WaitOutcome::StillRunning,
        }
    }

    /// Wait for every pending child; success iff none failed
    ///
    /// Starts the queue if needed. Completed children stay on `finished`
    /// for `wait_any`/`next_finished` to drain.
    pub fn wait_all(&self) -> OpStatus {
        self.start();
        let core = self.lock();
        let (core, _) = self.gop.block_until(core, None, nothing_pending);
        core.status.unwrap_or_else(|| core.qdata_ref().aggregate())
    }

    /// Like [`wait_all`](Self::wait_all), giving up after `timeout`
    pub fn wait_all_timed(&self, timeout: Duration) -> WaitOutcome<OpStatus> {
        self.start();
        let deadline = Instant::now() + timeout;
        let core = self.lock();
        match self.gop.block_until(core, Some(deadline), nothing_pending) {
            (core, true) => {
                WaitOutcome::Done(core.status.unwrap_or_else(|| core.qdata_ref().aggregate()))
            }
            (_, false) => WaitOutcome::StillRunning,
        }
    }

    /// Pop a completed child without blocking
    pub fn next_finished(&self) -> Option<Gop> {
        self.lock().qdata().finished.pop_front()
    }

    /// Pop a failed child without blocking
    pub fn next_failed(&self) -> Option<Gop> {
        self.lock().qdata().failed.pop_front()
    }

    /// Snapshot of the failed list
    pub fn failed_ops(&self) -> Vec<Gop> {
        self.lock().qdata_ref().failed.iter().cloned().collect()
    }

    // ========================================================================
    // Counts
    // ========================================================================

    /// Leaf tasks not yet completed, counting through nested queues
    pub fn tasks_left(&self) -> usize {
        let pending = self.lock().qdata_ref().pending.to_vec();
        pending
            .iter()
            .map(|child| match child.as_queue() {
                Some(q) => q.tasks_left(),
                None => 1,
            })
            .sum()
    }

    /// Children that completed successfully
    pub fn tasks_finished(&self) -> usize {
        self.lock().qdata_ref().nsucceeded
    }

    /// Children that completed with a non-success status
    ///
    /// Draining with `next_failed` does not lower the count.
    pub fn tasks_failed(&self) -> usize {
        self.lock().qdata_ref().nfailed
    }

    /// Children ever added
    pub fn task_count(&self) -> usize {
        self.lock().qdata_ref().nsubmitted
    }

    /// Children freed before they completed
    ///
    /// They stay in `task_count` but never reach `finished` or `failed`.
    pub fn tasks_detached(&self) -> usize {
        self.lock().qdata_ref().ndetached
    }

    /// Direct children not yet completed
    pub fn pending_count(&self) -> usize {
        self.lock().qdata_ref().pending.len()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release the queue and the children it still holds
    ///
    /// Pending children are detached, and they and the undrained finished
    /// and failed children are released; nested queues are freed with the
    /// same mode. Children already handed out by `wait_any` are left alone.
    /// `Finalize` fails while a pending child is still executing. `Destroy`
    /// also detaches and releases executing children (their completion
    /// goes nowhere). Nobody may be blocked on the queue's children during
    /// `Destroy`.
    pub fn free(self, mode: FreeMode) -> GopResult<()> {
        let (pending, done, parent) = {
            let mut core = self.lock();
            if mode == FreeMode::Finalize && core.qdata_ref().pending.iter().any(child_in_flight) {
                return Err(GopError::StillRunning(self.id()));
            }
            let parent = if core.state.is_terminal() {
                None
            } else {
                core.parent()
            };
            let q = core.qdata();
            let pending = q.pending.take();
            let mut done: Vec<Gop> = q.finished.drain(..).collect();
            let mut seen: HashSet<OpId> = done.iter().map(Gop::id).collect();
            done.extend(q.failed.drain(..).filter(|g| seen.insert(g.id())));
            q.finished_submission = true;
            q.completing = true;
            core.release_resources();
            // Release anybody still in wait_all / wait_any.
            if let Some(control) = core.control.take() {
                control.notify_all();
            }
            (pending, done, parent)
        };

        for child in &pending {
            let mut ccore = child.lock();
            let ours = ccore
                .parent()
                .is_some_and(|p| Arc::ptr_eq(&p, &self.gop.inner));
            if ours {
                ccore.parent = None;
            }
        }
        for child in pending.iter().chain(&done) {
            release_child(child, mode, self.id());
        }
        if let Some(inner) = parent {
            OpQue::from_gop(Gop { inner }).detach_pending(&self.gop);
        }
        tracing::debug!(
            queue = %self.id(),
            ?mode,
            detached = pending.len(),
            released = pending.len() + done.len(),
            "queue freed"
        );
        Ok(())
    }
}

impl Gop {
    /// Parent-side half of completion
    pub(crate) fn child_completed(&self, child: &Gop, status: OpStatus, auto_destroy: bool) {
        OpQue::from_gop(self.clone()).on_child_completed(child, status, auto_destroy);
    }
}

/// Nothing pending, and a claimed completion has been latched
fn settled(core: &OpCore) -> bool {
    let q = core.qdata_ref();
    q.pending.is_empty() && (!q.completing || core.is_done() || core.released)
}

fn drainable(core: &OpCore) -> bool {
    !core.qdata_ref().finished.is_empty() || settled(core)
}

fn nothing_pending(core: &OpCore) -> bool {
    settled(core)
}

fn child_in_flight(child: &Gop) -> bool {
    child.lock().in_flight()
}

fn release_child(child: &Gop, mode: FreeMode, queue: OpId) {
    match child.as_queue() {
        Some(sub) => {
            if let Err(e) = sub.free(mode) {
                tracing::warn!(%queue, child = %child.id(), error = %e, "nested free failed");
            }
        }
        None => child.lock().release_resources(),
    }
}
