//! Operation handles and the operation state machine
//!
//! A [`Gop`] is a cheap, cloneable handle to one operation: either a leaf
//! unit of work or an operation queue. All mutable state sits behind the
//! operation's own lock; waiters sleep on a control block leased from the
//! global [`ControlPool`] the first time somebody actually has to block.
//!
//! Completion runs in four steps:
//!
//! 1. latch the status and flip to `Completed` (under the op lock)
//! 2. fire the callback chain (no lock held)
//! 3. mark the callbacks done and wake waiters (under the op lock)
//! 4. report to the parent queue (under the parent lock only)
//!
//! so no two op locks are ever held at the same time while completing.
//! Waiters return after step 3, except on the completing thread itself:
//! a callback may wait on its own op and gets the latched status.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use gop_core::{
    ExecMode, FreeMode, GopError, GopResult, OpId, OpKind, OpState, OpStatus, Outcome, OP_ERROR,
    OP_FAILURE,
};
use gop_runtime::{current_worker_id, ControlLease, ControlPool, Executor, WorkerId};
use parking_lot::{Mutex, MutexGuard};

use crate::callback::{self, Callback, CallbackChain};
use crate::opque::{OpQue, QueueData};

/// Work function of a leaf op; receives the id of the worker running it
///
/// Kept behind an `Arc` so a reset op can run it again.
pub type WorkFn = Arc<dyn Fn(WorkerId) -> OpStatus + Send + Sync>;

/// Result of a timed wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The wait was satisfied
    Done(T),
    /// The timeout elapsed first; nothing changed
    StillRunning,
}

impl<T> WaitOutcome<T> {
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, WaitOutcome::Done(_))
    }

    #[inline]
    pub fn is_still_running(&self) -> bool {
        matches!(self, WaitOutcome::StillRunning)
    }

    /// The value, if the wait was satisfied
    pub fn done(self) -> Option<T> {
        match self {
            WaitOutcome::Done(v) => Some(v),
            WaitOutcome::StillRunning => None,
        }
    }
}

pub(crate) struct LeafWork {
    /// `None` for externally completed ops (and after release)
    work: Option<WorkFn>,
    /// `None` runs the work inline
    executor: Option<Arc<dyn Executor>>,
}

/// Per-kind payload
pub(crate) enum Body {
    Leaf(LeafWork),
    Queue(QueueData),
}

/// Lock-protected operation state
pub(crate) struct OpCore {
    pub(crate) state: OpState,
    pub(crate) status: Option<OpStatus>,
    pub(crate) started: bool,
    pub(crate) exec_mode: ExecMode,
    pub(crate) auto_destroy: bool,
    pub(crate) failure_mode: bool,
    /// Set by `free` and auto-destroy
    pub(crate) released: bool,
    pub(crate) parent: Option<Weak<GopInner>>,
    pub(crate) callbacks: CallbackChain,
    /// Leased on the first blocking wait, handed back at completion
    pub(crate) control: Option<Arc<ControlLease<'static>>>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) ended_at: Option<Instant>,
    /// Thread running the callback chain, between steps 1 and 3
    completer: Option<ThreadId>,
    callbacks_done: bool,
    pub(crate) affinity: Option<Arc<str>>,
    pub(crate) private: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) retries: u32,
    pub(crate) max_retries: Option<u32>,
    pub(crate) body: Body,
}

impl OpCore {
    fn new(body: Body, exec_mode: ExecMode) -> Self {
        Self {
            state: OpState::Created,
            status: None,
            started: false,
            exec_mode,
            auto_destroy: false,
            failure_mode: false,
            released: false,
            parent: None,
            callbacks: CallbackChain::default(),
            control: None,
            started_at: None,
            ended_at: None,
            completer: None,
            callbacks_done: false,
            affinity: None,
            private: None,
            retries: 0,
            max_retries: None,
            body,
        }
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<Arc<GopInner>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Started and not yet through its callback chain
    #[inline]
    pub(crate) fn in_flight(&self) -> bool {
        self.state.is_in_flight() || (self.status.is_some() && !self.callbacks_done)
    }

    /// Terminal as seen by a waiter on the current thread
    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.state.is_terminal()
            && (self.callbacks_done || self.completer == Some(thread::current().id()))
    }

    /// Queue payload; only called on queue ops
    pub(crate) fn qdata(&mut self) -> &mut QueueData {
        match &mut self.body {
            Body::Queue(q) => q,
            Body::Leaf(_) => unreachable!("queue access on a leaf op"),
        }
    }

    pub(crate) fn qdata_ref(&self) -> &QueueData {
        match &self.body {
            Body::Queue(q) => q,
            Body::Leaf(_) => unreachable!("queue access on a leaf op"),
        }
    }

    /// Wake everybody blocked on this op, if anybody ever blocked
    #[inline]
    pub(crate) fn notify(&self) {
        if let Some(control) = &self.control {
            control.notify_all();
        }
    }

    /// Drop everything an op holds beyond its identity and status
    pub(crate) fn release_resources(&mut self) {
        self.released = true;
        self.callbacks.clear();
        self.private = None;
        match &mut self.body {
            Body::Leaf(leaf) => {
                leaf.work = None;
                leaf.executor = None;
            }
            Body::Queue(q) => q.release(),
        }
    }
}

pub(crate) struct GopInner {
    pub(crate) id: OpId,
    pub(crate) kind: OpKind,
    my_id: AtomicI64,
    pub(crate) core: Mutex<OpCore>,
}

/// Handle to one asynchronous operation (a leaf op or a queue)
///
/// Clones refer to the same operation.
#[derive(Clone)]
pub struct Gop {
    pub(crate) inner: Arc<GopInner>,
}

impl Gop {
    fn build(kind: OpKind, body: Body, exec_mode: ExecMode) -> Self {
        let id = OpId::next();
        Gop {
            inner: Arc::new(GopInner {
                id,
                kind,
                my_id: AtomicI64::new(id.as_my_id()),
                core: Mutex::new(OpCore::new(body, exec_mode)),
            }),
        }
    }

    /// Leaf op run by `executor` (Queued mode)
    pub fn leaf<F>(executor: Arc<dyn Executor>, work: F) -> Self
    where
        F: Fn(WorkerId) -> OpStatus + Send + Sync + 'static,
    {
        let leaf = LeafWork {
            work: Some(Arc::new(work)),
            executor: Some(executor),
        };
        Self::build(OpKind::Operation, Body::Leaf(leaf), ExecMode::Queued)
    }

    /// Leaf op that always runs inline on the starting thread
    pub fn direct<F>(work: F) -> Self
    where
        F: Fn(WorkerId) -> OpStatus + Send + Sync + 'static,
    {
        let leaf = LeafWork {
            work: Some(Arc::new(work)),
            executor: None,
        };
        Self::build(OpKind::Operation, Body::Leaf(leaf), ExecMode::Direct)
    }

    /// Op with no work that completes with `status` as soon as it starts
    pub fn dummy(status: OpStatus) -> Self {
        Self::direct(move |_| status)
    }

    /// Op completed from outside through [`mark_completed`](Self::mark_completed)
    ///
    /// Starting it only moves it to `Running`.
    pub fn external() -> Self {
        let leaf = LeafWork {
            work: None,
            executor: None,
        };
        Self::build(OpKind::Operation, Body::Leaf(leaf), ExecMode::Direct)
    }

    pub(crate) fn new_queue_op() -> Self {
        Self::build(OpKind::Queue, Body::Queue(QueueData::new()), ExecMode::Queued)
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, OpCore> {
        self.inner.core.lock()
    }

    // ========================================================================
    // Identity
    // ========================================================================

    #[inline]
    pub fn id(&self) -> OpId {
        self.inner.id
    }

    /// Caller-assigned id; defaults to the numeric op id
    #[inline]
    pub fn my_id(&self) -> i64 {
        self.inner.my_id.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_my_id(&self, my_id: i64) {
        self.inner.my_id.store(my_id, Ordering::Relaxed);
    }

    #[inline]
    pub fn kind(&self) -> OpKind {
        self.inner.kind
    }

    #[inline]
    pub fn is_queue(&self) -> bool {
        self.inner.kind == OpKind::Queue
    }

    /// Same underlying operation
    #[inline]
    pub fn ptr_eq(&self, other: &Gop) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue view of this op
    pub fn as_queue(&self) -> Option<OpQue> {
        self.is_queue().then(|| OpQue::from_gop(self.clone()))
    }

    /// Queue this op was added to, while that queue is alive
    pub fn parent(&self) -> Option<OpQue> {
        self.lock()
            .parent()
            .map(|inner| OpQue::from_gop(Gop { inner }))
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn state(&self) -> OpState {
        self.lock().state
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.lock().exec_mode
    }

    /// Choose Queued or Direct execution; only before the op starts
    pub fn set_exec_mode(&self, mode: ExecMode) -> GopResult<()> {
        let mut core = self.lock();
        if core.started {
            return Err(GopError::AlreadyStarted(self.id()));
        }
        core.exec_mode = mode;
        Ok(())
    }

    /// Release work, callbacks and private data as soon as the op completes
    ///
    /// Auto-destroyed children are not kept on their queue's finished
    /// list; failed ones still land on the failed list.
    pub fn set_auto_destroy(&self, on: bool) {
        self.lock().auto_destroy = on;
    }

    pub fn auto_destroy(&self) -> bool {
        self.lock().auto_destroy
    }

    /// Turn a successful completion into `Failure`
    pub fn set_failure_mode(&self, on: bool) {
        self.lock().failure_mode = on;
    }

    pub fn failure_mode(&self) -> bool {
        self.lock().failure_mode
    }

    /// Grouping key for the default queue sort (host:port and the like)
    pub fn set_affinity(&self, key: impl Into<Arc<str>>) {
        self.lock().affinity = Some(key.into());
    }

    pub fn affinity(&self) -> Option<Arc<str>> {
        self.lock().affinity.clone()
    }

    /// Attach caller context to the op
    pub fn set_private<T: Any + Send + Sync>(&self, data: Arc<T>) {
        self.lock().private = Some(data);
    }

    /// Caller context, if set and of type `T`
    pub fn private<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.lock().private.clone()?;
        data.downcast::<T>().ok()
    }

    /// Times this op's work was resubmitted by a retry policy
    pub fn retry_count(&self) -> u32 {
        self.lock().retries
    }

    pub fn set_retry_count(&self, n: u32) {
        self.lock().retries = n;
    }

    /// Per-op retry budget, overriding the policy default
    pub fn max_retries(&self) -> Option<u32> {
        self.lock().max_retries
    }

    pub fn set_max_retries(&self, n: u32) {
        self.lock().max_retries = Some(n);
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Append a completion callback
    ///
    /// Callbacks fire once, in attach order, after the status is latched.
    /// Attached to an op that already latched its status, the callback
    /// runs immediately on the calling thread.
    pub fn add_callback<F>(&self, f: F)
    where
        F: Fn(&Gop, &OpStatus) + Send + Sync + 'static,
    {
        let cb: Callback = Arc::new(f);
        let latched = {
            let mut core = self.lock();
            let latched = core.status;
            if latched.is_none() {
                core.callbacks.push(Arc::clone(&cb));
            }
            latched
        };
        if let Some(status) = latched {
            callback::fire_one(&cb, self, &status, 0);
        }
    }

    pub fn callback_count(&self) -> usize {
        self.lock().callbacks.len()
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Start executing; a no-op once started
    ///
    /// Queued leaves go to their executor, Direct leaves run on this
    /// thread before this returns. Queues sort their pending children and
    /// start each of them.
    pub fn start_execution(&self) {
        match self.inner.kind {
            OpKind::Operation => self.start_leaf(),
            OpKind::Queue => OpQue::from_gop(self.clone()).start(),
        }
    }

    fn start_leaf(&self) {
        let (work, executor) = {
            let mut core = self.lock();
            if core.started || core.status.is_some() {
                return;
            }
            core.started = true;
            core.started_at = Some(Instant::now());

            let released = core.released;
            let mode = core.exec_mode;
            let Body::Leaf(leaf) = &core.body else {
                return;
            };
            let work = leaf.work.clone();
            let executor = match mode {
                ExecMode::Queued => leaf.executor.clone(),
                ExecMode::Direct => None,
            };
            if released {
                drop(core);
                tracing::warn!(op = %self.id(), "start of a released op");
                self.finish(OP_ERROR);
                return;
            }
            core.state = if executor.is_some() {
                OpState::Submitted
            } else {
                OpState::Running
            };
            (work, executor)
        };

        let Some(work) = work else {
            tracing::trace!(op = %self.id(), "external op started");
            return;
        };

        match executor {
            Some(executor) => {
                let gop = self.clone();
                let job = Box::new(move |worker: WorkerId| gop.run_work(&work, worker));
                if let Err(e) = executor.submit(job) {
                    tracing::warn!(op = %self.id(), error = %e, "submit failed");
                    self.finish(OP_ERROR);
                }
            }
            None => self.run_work(&work, current_worker_id()),
        }
    }

    fn run_work(&self, work: &WorkFn, worker: WorkerId) {
        {
            let mut core = self.lock();
            if core.state == OpState::Submitted {
                core.state = OpState::Running;
            }
        }
        let status = match panic::catch_unwind(AssertUnwindSafe(|| work(worker))) {
            Ok(status) => status,
            Err(_) => {
                tracing::error!(op = %self.id(), worker, "work function panicked");
                OP_ERROR
            }
        };
        self.finish(status);
    }

    /// Complete from the executing context, logging a lost race
    pub(crate) fn finish(&self, status: OpStatus) {
        if let Err(e) = self.complete(status) {
            tracing::warn!(op = %self.id(), error = %e, "completion ignored");
        }
    }

    /// Latch `status` on a leaf op
    ///
    /// For executors other than the built-in ones and for ops built with
    /// [`Gop::external`]. Fails if a status was already latched.
    pub fn mark_completed(&self, status: OpStatus) -> GopResult<()> {
        if self.is_queue() {
            return Err(GopError::IsAQueue(self.id()));
        }
        self.complete(status)
    }

    pub(crate) fn complete(&self, status: OpStatus) -> GopResult<()> {
        let (status, callbacks) = {
            let mut core = self.lock();
            if core.status.is_some() {
                return Err(GopError::AlreadyCompleted(self.id()));
            }
            let status = if core.failure_mode && status.is_success() {
                OP_FAILURE
            } else {
                status
            };
            core.status = Some(status);
            core.state = OpState::Completed;
            core.ended_at = Some(Instant::now());
            core.completer = Some(thread::current().id());
            (status, core.callbacks.clone())
        };

        callbacks.fire(self, &status);

        let (parent, auto_destroy) = {
            let mut core = self.lock();
            core.callbacks_done = true;
            core.completer = None;
            if let Some(control) = core.control.take() {
                control.notify_all();
            }
            if core.auto_destroy {
                core.release_resources();
            }
            (core.parent(), core.auto_destroy)
        };
        tracing::trace!(op = %self.id(), kind = %self.kind(), %status, "completed");

        if let Some(inner) = parent {
            Gop { inner }.child_completed(self, status, auto_destroy);
        }
        Ok(())
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Block on the op's control block until `done` holds
    ///
    /// Returns the guard and whether `done` holds; only a passed
    /// `deadline` makes it return `false`.
    pub(crate) fn block_until<'a, F>(
        &'a self,
        mut core: MutexGuard<'a, OpCore>,
        deadline: Option<Instant>,
        done: F,
    ) -> (MutexGuard<'a, OpCore>, bool)
    where
        F: Fn(&OpCore) -> bool,
    {
        if done(&core) {
            return (core, true);
        }
        let control = Arc::clone(
            core.control
                .get_or_insert_with(|| Arc::new(ControlPool::global().acquire())),
        );
        loop {
            match deadline {
                None => control.wait(&mut core),
                Some(deadline) => {
                    if control.wait_until(&mut core, deadline) {
                        let ok = done(&core);
                        return (core, ok);
                    }
                }
            }
            if done(&core) {
                return (core, true);
            }
        }
    }

    /// Block until the op completes; starts it first if needed
    ///
    /// On a queue this is [`OpQue::wait_all`].
    pub fn wait(&self) -> OpStatus {
        if let Some(q) = self.as_queue() {
            return q.wait_all();
        }
        self.start_execution();
        let core = self.lock();
        let (core, _) = self.block_until(core, None, OpCore::is_done);
        core.status.unwrap_or(OP_ERROR)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`
    pub fn wait_timed(&self, timeout: Duration) -> WaitOutcome<OpStatus> {
        if let Some(q) = self.as_queue() {
            return q.wait_all_timed(timeout);
        }
        self.start_execution();
        let deadline = Instant::now() + timeout;
        let core = self.lock();
        match self.block_until(core, Some(deadline), OpCore::is_done) {
            (core, true) => WaitOutcome::Done(core.status.unwrap_or(OP_ERROR)),
            (_, false) => WaitOutcome::StillRunning,
        }
    }

    /// Whether `wait` would block right now
    pub fn will_block(&self) -> bool {
        let core = self.lock();
        match &core.body {
            Body::Leaf(_) => !core.is_done(),
            Body::Queue(q) => q.finished.is_empty() && !q.pending.is_empty(),
        }
    }

    /// Latched status, `None` until then
    pub fn get_status(&self) -> Option<OpStatus> {
        self.lock().status
    }

    pub fn completed_successfully(&self) -> bool {
        self.get_status().is_some_and(|s| s.is_success())
    }

    /// Latched status for leaves, current aggregate for queues
    pub fn completion_status(&self) -> Option<OpStatus> {
        let core = self.lock();
        match &core.body {
            Body::Leaf(_) => core.status,
            Body::Queue(q) => Some(core.status.unwrap_or_else(|| q.aggregate())),
        }
    }

    /// Start and wait, returning the full status
    ///
    /// Fails on an op that already completed; `reset` it first.
    pub fn sync_exec_status(&self) -> GopResult<OpStatus> {
        {
            let core = self.lock();
            if core.status.is_some() {
                return Err(GopError::AlreadyCompleted(self.id()));
            }
            if core.released {
                return Err(GopError::Released(self.id()));
            }
        }
        self.start_execution();
        Ok(self.wait())
    }

    /// Start and wait, returning only the outcome
    pub fn sync_exec(&self) -> GopResult<Outcome> {
        self.sync_exec_status().map(|s| s.outcome)
    }

    /// Time between start and completion
    pub fn exec_time(&self) -> Option<Duration> {
        let core = self.lock();
        match (core.started_at, core.ended_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }

    // ========================================================================
    // Reuse and teardown
    // ========================================================================

    /// Return a leaf op to `Created` for another run
    ///
    /// Clears status and timing; keeps ids, settings and callbacks. A
    /// completed op also leaves its queue and may be added again.
    pub fn reset(&self) -> GopResult<()> {
        if self.is_queue() {
            return Err(GopError::IsAQueue(self.id()));
        }
        let mut core = self.lock();
        if core.in_flight() {
            return Err(GopError::StillRunning(self.id()));
        }
        if core.released {
            return Err(GopError::Released(self.id()));
        }
        if core.state.is_terminal() {
            core.parent = None;
        }
        core.state = OpState::Created;
        core.status = None;
        core.started = false;
        core.started_at = None;
        core.ended_at = None;
        core.callbacks_done = false;
        core.control = None;
        tracing::trace!(op = %self.id(), "reset");
        Ok(())
    }

    /// Release the op's resources
    ///
    /// Fails on a leaf that is still executing. An op freed before it
    /// started is also taken off its queue. Queues follow
    /// [`OpQue::free`].
    pub fn free(self, mode: FreeMode) -> GopResult<()> {
        if let Some(q) = self.as_queue() {
            return q.free(mode);
        }
        let parent = {
            let core = self.lock();
            if core.in_flight() {
                return Err(GopError::StillRunning(self.id()));
            }
            if core.state.is_terminal() {
                None
            } else {
                core.parent()
            }
        };
        if let Some(inner) = parent {
            OpQue::from_gop(Gop { inner }).detach_pending(&self);
        }
        let mut core = self.lock();
        core.release_resources();
        core.control = None;
        tracing::trace!(op = %self.id(), ?mode, "freed");
        Ok(())
    }
}

impl PartialEq for Gop {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Gop {}

impl fmt::Debug for Gop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gop")
            .field("id", &self.id())
            .field("my_id", &self.my_id())
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Gop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, my_id={})", self.id(), self.kind(), self.my_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gop_core::{OP_RETRY, OP_SUCCESS, OP_TIMEOUT};
    use gop_runtime::{PoolConfig, ThreadPool, INLINE_WORKER};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pool(n: usize) -> Arc<dyn Executor> {
        Arc::new(ThreadPool::new(&PoolConfig::new().num_workers(n).name("op-test")).unwrap())
    }

    #[test]
    fn test_new_op_defaults() {
        let gop = Gop::direct(|_| OP_SUCCESS);
        assert_eq!(gop.state(), OpState::Created);
        assert_eq!(gop.get_status(), None);
        assert_eq!(gop.my_id(), gop.id().as_my_id());
        assert!(!gop.auto_destroy());
        assert_eq!(gop.callback_count(), 0);
        assert!(!gop.is_queue());
        assert!(gop.parent().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Gop::dummy(OP_SUCCESS);
        let b = Gop::dummy(OP_SUCCESS);
        assert_ne!(a.id(), b.id());
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_queued_op_runs_on_pool() {
        let exec = pool(2);
        let gop = Gop::leaf(exec, |wid| {
            assert_ne!(wid, INLINE_WORKER);
            OP_SUCCESS
        });
        assert_eq!(gop.sync_exec().unwrap(), Outcome::Success);
        assert_eq!(gop.state(), OpState::Completed);
        assert!(gop.completed_successfully());
        assert!(gop.exec_time().is_some());
    }

    #[test]
    fn test_direct_mode_runs_once_on_caller_thread() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ran_on = Arc::new(Mutex::new(None));
        let exec = pool(2);

        let (c, r) = (Arc::clone(&counter), Arc::clone(&ran_on));
        let gop = Gop::leaf(exec, move |wid| {
            c.fetch_add(1, Ordering::SeqCst);
            *r.lock() = Some((thread::current().id(), wid));
            OP_SUCCESS
        });
        gop.set_exec_mode(ExecMode::Direct).unwrap();

        assert_eq!(gop.sync_exec().unwrap(), Outcome::Success);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(*ran_on.lock(), Some((thread::current().id(), INLINE_WORKER)));
    }

    #[test]
    fn test_exec_mode_locked_after_start() {
        let gop = Gop::dummy(OP_SUCCESS);
        gop.start_execution();
        assert!(matches!(
            gop.set_exec_mode(ExecMode::Queued),
            Err(GopError::AlreadyStarted(_))
        ));
    }

    #[test]
    fn test_start_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let gop = Gop::direct(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            OP_SUCCESS
        });
        gop.start_execution();
        gop.start_execution();
        assert_eq!(gop.wait(), OP_SUCCESS);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_fire_once_in_order_after_status() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let gop = Gop::leaf(pool(2), |_| OP_SUCCESS);
        for n in 1..=3 {
            let log = Arc::clone(&log);
            gop.add_callback(move |g, st| {
                assert_eq!(g.get_status(), Some(*st));
                log.lock().push(n);
            });
        }
        assert_eq!(gop.callback_count(), 3);

        gop.sync_exec().unwrap();
        assert_eq!(*log.lock(), vec![1, 2, 3]);

        // Waiting again does not re-fire anything.
        gop.wait();
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_callback_added_after_completion_runs_now() {
        let gop = Gop::dummy(OP_RETRY);
        gop.sync_exec().unwrap();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        gop.add_callback(move |_, st| *s.lock() = Some(*st));
        assert_eq!(*seen.lock(), Some(OP_RETRY));
    }

    #[test]
    fn test_callback_sees_completed_state_and_can_wait() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let gop = Gop::leaf(pool(1), |_| OP_SUCCESS);
        gop.add_callback(move |g, _| {
            s.lock().push((
                g.state(),
                g.wait_timed(Duration::from_millis(200)),
                g.wait(),
                g.will_block(),
            ));
        });

        assert_eq!(gop.sync_exec_status().unwrap(), OP_SUCCESS);
        assert_eq!(
            *seen.lock(),
            vec![(OpState::Completed, WaitOutcome::Done(OP_SUCCESS), OP_SUCCESS, false)]
        );
    }

    #[test]
    fn test_waiter_released_after_callbacks() {
        let gop = Gop::external();
        gop.start_execution();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        gop.add_callback(move |_, _| {
            thread::sleep(Duration::from_millis(50));
            f.fetch_add(1, Ordering::SeqCst);
        });

        let waiter = {
            let (g, f) = (gop.clone(), Arc::clone(&fired));
            thread::spawn(move || {
                let status = g.wait();
                (status, f.load(Ordering::SeqCst))
            })
        };
        thread::sleep(Duration::from_millis(20));
        gop.mark_completed(OP_SUCCESS).unwrap();
        assert_eq!(waiter.join().unwrap(), (OP_SUCCESS, 1));
    }

    #[test]
    fn test_double_completion_is_an_error() {
        let gop = Gop::external();
        gop.start_execution();
        assert_eq!(gop.state(), OpState::Running);
        gop.mark_completed(OP_SUCCESS).unwrap();
        let err = gop.mark_completed(OP_TIMEOUT).unwrap_err();
        assert!(matches!(err, GopError::AlreadyCompleted(id) if id == gop.id()));
        assert_eq!(gop.get_status(), Some(OP_SUCCESS));
    }

    #[test]
    fn test_resubmit_without_reset_fails() {
        let gop = Gop::dummy(OP_SUCCESS);
        gop.sync_exec().unwrap();
        assert!(matches!(gop.sync_exec(), Err(GopError::AlreadyCompleted(_))));
    }

    #[test]
    fn test_reset_then_rerun_gives_fresh_status() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let gop = Gop::leaf(pool(2), move |_| {
            if r.fetch_add(1, Ordering::SeqCst) == 0 {
                OP_FAILURE.with_code(-5)
            } else {
                OP_SUCCESS
            }
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        gop.add_callback(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(gop.sync_exec_status().unwrap(), OP_FAILURE.with_code(-5));
        let id = gop.id();
        gop.reset().unwrap();
        assert_eq!(gop.state(), OpState::Created);
        assert_eq!(gop.get_status(), None);
        assert_eq!(gop.exec_time(), None);

        assert_eq!(gop.sync_exec_status().unwrap(), OP_SUCCESS);
        assert_eq!(gop.id(), id);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        // Callback list survives the reset and fires once per run.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_refuses_running_op() {
        let gop = Gop::external();
        gop.start_execution();
        assert!(matches!(gop.reset(), Err(GopError::StillRunning(_))));
        gop.mark_completed(OP_SUCCESS).unwrap();
        gop.reset().unwrap();
    }

    #[test]
    fn test_timed_wait_reports_still_running() {
        let gop = Gop::leaf(pool(1), |_| {
            thread::sleep(Duration::from_millis(250));
            OP_SUCCESS
        });
        let first = gop.wait_timed(Duration::from_millis(50));
        assert!(first.is_still_running());
        assert_ne!(gop.state(), OpState::Completed);

        assert_eq!(gop.wait(), OP_SUCCESS);
        assert_eq!(gop.wait_timed(Duration::from_millis(1)), WaitOutcome::Done(OP_SUCCESS));
    }

    #[test]
    fn test_many_waiters_all_released() {
        let gop = Gop::external();
        gop.start_execution();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = gop.clone();
                thread::spawn(move || g.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        assert!(gop.will_block());
        gop.mark_completed(OP_TIMEOUT).unwrap();
        for h in handles {
            assert_eq!(h.join().unwrap(), OP_TIMEOUT);
        }
        assert!(!gop.will_block());
    }

    #[test]
    fn test_failure_mode_forces_failure() {
        let gop = Gop::dummy(OP_SUCCESS);
        gop.set_failure_mode(true);
        assert_eq!(gop.sync_exec().unwrap(), Outcome::Failure);
        assert!(!gop.completed_successfully());
    }

    #[test]
    fn test_panicking_work_completes_with_error() {
        let gop = Gop::direct(|_| panic!("work blew up"));
        assert_eq!(gop.sync_exec().unwrap(), Outcome::Error);
    }

    #[test]
    fn test_submit_after_shutdown_completes_with_error() {
        let tp = Arc::new(ThreadPool::new(&PoolConfig::new().num_workers(1)).unwrap());
        tp.shutdown();
        let gop = Gop::leaf(tp, |_| OP_SUCCESS);
        assert_eq!(gop.sync_exec().unwrap(), Outcome::Error);
    }

    #[test]
    fn test_private_data() {
        #[derive(Debug, PartialEq)]
        struct Ctx {
            path: String,
        }
        let gop = Gop::dummy(OP_SUCCESS);
        assert!(gop.private::<Ctx>().is_none());
        gop.set_private(Arc::new(Ctx { path: "/a/b".into() }));
        assert_eq!(gop.private::<Ctx>().unwrap().path, "/a/b");
        assert!(gop.private::<String>().is_none());
    }

    #[test]
    fn test_auto_destroy_releases_resources() {
        let gop = Gop::dummy(OP_SUCCESS);
        gop.add_callback(|_, _| {});
        gop.set_private(Arc::new(7u32));
        gop.set_auto_destroy(true);
        gop.sync_exec().unwrap();

        assert_eq!(gop.get_status(), Some(OP_SUCCESS));
        assert_eq!(gop.callback_count(), 0);
        assert!(gop.private::<u32>().is_none());
        assert!(matches!(gop.reset(), Err(GopError::Released(_))));
    }

    #[test]
    fn test_free_running_op_fails() {
        let gop = Gop::external();
        gop.start_execution();
        let err = gop.clone().free(FreeMode::Finalize).unwrap_err();
        assert!(matches!(err, GopError::StillRunning(_)));
        gop.mark_completed(OP_SUCCESS).unwrap();
        gop.free(FreeMode::Finalize).unwrap();
    }

    #[test]
    fn test_control_block_returned_after_wait() {
        let before = ControlPool::global().stats();
        let gop = Gop::leaf(pool(1), |_| {
            thread::sleep(Duration::from_millis(30));
            OP_SUCCESS
        });
        gop.wait();
        assert!(gop.lock().control.is_none());
        let after = ControlPool::global().stats();
        assert!(after.allocated + after.reused > before.allocated + before.reused);
    }
}
