//! Event Loop
//!
//! Implements the JavaScript event loop with proper microtask and macrotask
//! scheduling. Microtasks (promise reactions, thenable adoption,
//! `queueMicrotask`) always run before the next macrotask; the microtask queue
//! is drained until empty at every checkpoint, including microtasks enqueued
//! during the drain.
//!
//! The loop is single-threaded. [`EventLoop`] is a cheap handle; promises and
//! coroutines keep only a weak reference to it, so dropping the last handle
//! discards whatever work is still queued.

mod config;
mod queue;
mod rejection;

pub use config::{EventLoopConfig, DEFAULT_MAX_ADOPTION_DEPTH};
pub use queue::{Macrotask, MacrotaskId, TaskFn};
pub use rejection::UnhandledRejection;

pub(crate) use queue::Microtask;

use crate::error::{messages, Error, Result};
use crate::promise::{Promise, PromiseState};
use crate::value::{Function, Value};
use queue::{MacrotaskQueue, MicrotaskQueue};
use rejection::RejectionTracker;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// Whether the loop is currently inside `run`, `run_until_settled` or `tick`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Running,
}

/// Result of running the event loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: usize,
    /// Total number of macrotasks that were dequeued and processed
    pub macrotasks_processed: usize,
    /// Number of loop iterations (each iteration = at most one macrotask + a microtask checkpoint)
    pub iterations: usize,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventLoopStats {
    /// Total microtasks processed across all ticks
    pub total_microtasks: u64,
    /// Total macrotasks processed across all ticks
    pub total_macrotasks: u64,
    /// Total number of event loop ticks
    pub total_ticks: u64,
    /// Maximum microtasks drained in a single checkpoint
    pub max_microtasks_per_tick: u64,
    /// Longest tick duration in microseconds (wall-clock)
    pub longest_tick_us: u64,
    /// Total promises created
    pub total_promises_created: u64,
    /// Total promises settled (fulfilled or rejected)
    pub total_promises_settled: u64,
    /// Host callbacks that failed with a language exception
    pub uncaught_exceptions: u64,
    /// Rejections reported as unhandled
    pub unhandled_rejections: u64,
}

struct LoopInner {
    config: EventLoopConfig,
    microtasks: RefCell<MicrotaskQueue>,
    macrotasks: RefCell<MacrotaskQueue>,
    rejections: RefCell<RejectionTracker>,
    stats: RefCell<EventLoopStats>,
    state: Cell<LoopState>,
}

/// The event loop manages task queues and execution order
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

/// Weak back-reference held by promises and coroutines
#[derive(Clone, Debug)]
pub struct LoopHandle(Weak<LoopInner>);

impl LoopHandle {
    pub(crate) fn enqueue(&self, task: Microtask) {
        match self.0.upgrade() {
            Some(inner) => inner.microtasks.borrow_mut().push(task),
            None => trace!(?task, "event loop dropped, discarding microtask"),
        }
    }

    pub(crate) fn max_adoption_depth(&self) -> usize {
        self.0
            .upgrade()
            .map(|inner| inner.config.max_adoption_depth)
            .unwrap_or(DEFAULT_MAX_ADOPTION_DEPTH)
    }

    pub(crate) fn on_promise_created(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.stats.borrow_mut().total_promises_created += 1;
        }
    }

    pub(crate) fn on_promise_settled(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.stats.borrow_mut().total_promises_settled += 1;
        }
    }

    pub(crate) fn track_rejection(&self, promise: &Promise) {
        if let Some(inner) = self.0.upgrade() {
            inner.rejections.borrow_mut().on_reject(promise);
        }
    }

    pub(crate) fn track_handled(&self, promise: &Promise) {
        if let Some(inner) = self.0.upgrade() {
            inner.rejections.borrow_mut().on_handle(promise);
        }
    }
}

impl EventLoop {
    /// Create a new event loop with default configuration
    pub fn new() -> Self {
        Self::from_config(EventLoopConfig::default())
    }

    /// Create an event loop with the given configuration.
    ///
    /// Fails with [`Error::ConfigError`] for settings the loop cannot make
    /// progress with, such as a zero microtask budget.
    pub fn with_config(config: EventLoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: EventLoopConfig) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                config,
                microtasks: RefCell::new(MicrotaskQueue::default()),
                macrotasks: RefCell::new(MacrotaskQueue::default()),
                rejections: RefCell::new(RejectionTracker::default()),
                stats: RefCell::new(EventLoopStats::default()),
                state: Cell::new(LoopState::Idle),
            }),
        }
    }

    pub(crate) fn handle(&self) -> LoopHandle {
        LoopHandle(Rc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LoopState {
        self.inner.state.get()
    }

    /// Queue a host callback as a microtask (`queueMicrotask`)
    pub fn enqueue_microtask<F>(&self, callback: F)
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.inner
            .microtasks
            .borrow_mut()
            .push(Microtask::Callback(Box::new(callback)));
    }

    /// Queue a function value as a microtask. It is called with no arguments.
    pub fn queue_microtask_fn(&self, callback: Function) {
        self.enqueue_microtask(move || callback.call(&[]).map(|_| ()));
    }

    /// Schedule a macrotask. Lower `order_key` runs first; equal keys run in
    /// scheduling order.
    pub fn enqueue_macrotask<F>(&self, callback: F, order_key: u64) -> MacrotaskId
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.inner
            .macrotasks
            .borrow_mut()
            .push(order_key, Box::new(callback))
    }

    /// Cancel a macrotask that has not run yet (`clearTimeout`)
    pub fn cancel_macrotask(&self, id: MacrotaskId) -> bool {
        self.inner.macrotasks.borrow_mut().cancel(id)
    }

    /// Remove the next macrotask without running it
    pub fn pop_macrotask(&self) -> Option<Macrotask> {
        self.inner.macrotasks.borrow_mut().pop()
    }

    /// Run every queued microtask, including those queued along the way.
    /// Returns the number of microtasks run.
    ///
    /// Calling this from inside a task fails with [`Error::InternalError`];
    /// the running checkpoint already drains the queue.
    pub fn drain_microtasks(&self) -> Result<usize> {
        self.enter()?;
        let outcome = self.drain(None);
        self.leave();
        outcome
    }

    /// Number of queued microtasks
    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.borrow().len()
    }

    /// Number of queued macrotasks
    pub fn pending_macrotasks(&self) -> usize {
        self.inner.macrotasks.borrow().len()
    }

    /// Check if there are pending tasks
    pub fn has_pending_work(&self) -> bool {
        !self.inner.microtasks.borrow().is_empty() || !self.inner.macrotasks.borrow().is_empty()
    }

    /// Run the event loop until both queues are empty.
    ///
    /// Each iteration picks at most one macrotask (only when the microtask
    /// queue is empty) and then performs a microtask checkpoint. Unhandled
    /// rejections are reported once the loop goes idle.
    pub fn run(&self) -> Result<RunResult> {
        self.enter()?;
        let outcome = self.run_loop(None);
        self.leave();
        if outcome.is_ok() {
            self.on_idle();
        }
        outcome
    }

    /// Run the loop until `promise` settles and return its outcome.
    ///
    /// A rejection comes back as [`Error::Thrown`] and counts as handled.
    /// If the queues empty out first the result is [`Error::Unsettled`].
    pub fn run_until_settled(&self, promise: &Promise) -> Result<Value> {
        promise.mark_handled();
        self.enter()?;
        let outcome = self.run_loop(Some(promise));
        self.leave();
        outcome?;
        if !self.has_pending_work() {
            self.on_idle();
        }

        match promise.state() {
            PromiseState::Fulfilled => Ok(promise.result().unwrap_or(Value::Undefined)),
            PromiseState::Rejected => Err(Error::Thrown(promise.result().unwrap_or(Value::Undefined))),
            PromiseState::Pending => Err(Error::Unsettled),
        }
    }

    /// Run a single loop iteration. Returns whether work remains.
    pub fn tick(&self) -> Result<bool> {
        self.enter()?;
        let outcome = self.iterate();
        self.leave();
        outcome?;
        let pending = self.has_pending_work();
        if !pending {
            self.on_idle();
        }
        Ok(pending)
    }

    /// Get runtime statistics
    pub fn stats(&self) -> EventLoopStats {
        self.inner.stats.borrow().clone()
    }

    /// Reset runtime statistics
    pub fn reset_stats(&self) {
        *self.inner.stats.borrow_mut() = EventLoopStats::default();
    }

    /// Take the rejections reported as unhandled so far
    pub fn take_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        self.inner.rejections.borrow_mut().take_reported()
    }

    /// Clear all pending tasks and rejection bookkeeping
    pub fn clear(&self) {
        self.inner.microtasks.borrow_mut().clear();
        self.inner.macrotasks.borrow_mut().clear();
        self.inner.rejections.borrow_mut().clear();
    }

    fn enter(&self) -> Result<()> {
        if self.inner.state.get() == LoopState::Running {
            return Err(Error::internal(messages::NESTED_RUN));
        }
        self.inner.state.set(LoopState::Running);
        Ok(())
    }

    fn leave(&self) {
        self.inner.state.set(LoopState::Idle);
    }

    fn run_loop(&self, until: Option<&Promise>) -> Result<RunResult> {
        let mut result = RunResult {
            microtasks_processed: self.drain(None)?,
            ..RunResult::default()
        };

        loop {
            if until.is_some_and(|p| p.state() != PromiseState::Pending) {
                break;
            }
            if !self.has_pending_work() {
                break;
            }
            let (ran_macrotask, microtasks) = self.iterate()?;
            result.iterations += 1;
            result.microtasks_processed += microtasks;
            if ran_macrotask {
                result.macrotasks_processed += 1;
            }
        }

        debug!(
            iterations = result.iterations,
            microtasks = result.microtasks_processed,
            macrotasks = result.macrotasks_processed,
            "event loop finished"
        );
        Ok(result)
    }

    /// One iteration: a macrotask if no microtask is waiting, then a checkpoint
    fn iterate(&self) -> Result<(bool, usize)> {
        let tick_start = Instant::now();
        let mut ran_macrotask = false;

        if self.inner.microtasks.borrow().is_empty() {
            let task = self.pop_macrotask();
            if let Some(task) = task {
                trace!(id = task.id().0, order_key = task.order_key(), "running macrotask");
                self.inner.stats.borrow_mut().total_macrotasks += 1;
                ran_macrotask = true;
                self.report("macrotask", task.run())?;
            }
        }

        let microtasks = self.drain(self.inner.config.microtask_budget)?;

        let elapsed = tick_start.elapsed().as_micros() as u64;
        let mut stats = self.inner.stats.borrow_mut();
        stats.total_ticks += 1;
        stats.longest_tick_us = stats.longest_tick_us.max(elapsed);
        Ok((ran_macrotask, microtasks))
    }

    fn drain(&self, budget: Option<usize>) -> Result<usize> {
        let mut count = 0usize;
        loop {
            if budget.is_some_and(|max| count >= max) {
                debug!(remaining = self.pending_microtasks(), "microtask budget exhausted");
                break;
            }
            let task = self.inner.microtasks.borrow_mut().pop();
            let Some(task) = task else {
                break;
            };
            count += 1;
            self.inner.stats.borrow_mut().total_microtasks += 1;
            self.report("microtask", task.run())?;
        }

        let mut stats = self.inner.stats.borrow_mut();
        stats.max_microtasks_per_tick = stats.max_microtasks_per_tick.max(count as u64);
        Ok(count)
    }

    /// Host faults abort the loop; language exceptions from host callbacks
    /// are reported and the loop carries on.
    fn report(&self, what: &str, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_host_fault() => {
                error!(error = %e, "{} aborted the event loop", what);
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "uncaught exception in {}", what);
                self.inner.stats.borrow_mut().uncaught_exceptions += 1;
                Ok(())
            }
        }
    }

    fn on_idle(&self) {
        let reported = self.inner.rejections.borrow_mut().flush();
        if reported > 0 {
            self.inner.stats.borrow_mut().unhandled_rejections += reported as u64;
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("state", &self.state())
            .field("pending_microtasks", &self.pending_microtasks())
            .field("pending_macrotasks", &self.pending_macrotasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn log_task(log: &Rc<RefCell<Vec<String>>>, tag: &str) -> impl FnOnce() -> Result<()> + 'static {
        let log = log.clone();
        let tag = tag.to_string();
        move || {
            log.borrow_mut().push(tag);
            Ok(())
        }
    }

    #[test]
    fn test_microtasks_before_macrotasks() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        event_loop.enqueue_macrotask(log_task(&log, "macro"), 0);
        event_loop.enqueue_microtask(log_task(&log, "micro1"));
        event_loop.enqueue_microtask(log_task(&log, "micro2"));

        let result = event_loop.run().unwrap();
        assert_eq!(*log.borrow(), vec!["micro1", "micro2", "macro"]);
        assert_eq!(result.microtasks_processed, 2);
        assert_eq!(result.macrotasks_processed, 1);
    }

    #[test]
    fn test_microtask_enqueued_during_drain_runs_same_checkpoint() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_loop = event_loop.clone();
        let inner_log = log.clone();
        event_loop.enqueue_macrotask(log_task(&log, "macro"), 0);
        event_loop.enqueue_microtask(move || {
            inner_log.borrow_mut().push("outer".to_string());
            inner_loop.enqueue_microtask(log_task(&inner_log, "nested"));
            Ok(())
        });

        event_loop.run().unwrap();
        assert_eq!(*log.borrow(), vec!["outer", "nested", "macro"]);
    }

    #[test]
    fn test_microtasks_between_macrotasks() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let el = event_loop.clone();
        let l = log.clone();
        event_loop.enqueue_macrotask(
            move || {
                l.borrow_mut().push("macro1".to_string());
                el.enqueue_microtask(log_task(&l, "micro"));
                Ok(())
            },
            0,
        );
        event_loop.enqueue_macrotask(log_task(&log, "macro2"), 0);

        event_loop.run().unwrap();
        assert_eq!(*log.borrow(), vec!["macro1", "micro", "macro2"]);
    }

    #[test]
    fn test_microtask_budget_still_drains_before_macrotask() {
        let event_loop = EventLoop::with_config(EventLoopConfig::default().with_microtask_budget(1)).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        event_loop.enqueue_macrotask(log_task(&log, "macro"), 0);
        event_loop.enqueue_microtask(log_task(&log, "a"));
        event_loop.enqueue_microtask(log_task(&log, "b"));

        assert!(event_loop.tick().unwrap());
        assert_eq!(*log.borrow(), vec!["a"]);
        assert!(event_loop.tick().unwrap());
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert!(!event_loop.tick().unwrap());
        assert_eq!(*log.borrow(), vec!["a", "b", "macro"]);
    }

    #[test]
    fn test_uncaught_callback_error_does_not_stop_loop() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        event_loop.enqueue_microtask(|| Err(Error::thrown("boom")));
        event_loop.enqueue_microtask(log_task(&log, "after"));

        event_loop.run().unwrap();
        assert_eq!(*log.borrow(), vec!["after"]);
        assert_eq!(event_loop.stats().uncaught_exceptions, 1);
    }

    #[test]
    fn test_nested_run_is_rejected() {
        let event_loop = EventLoop::new();
        let inner = event_loop.clone();
        event_loop.enqueue_microtask(move || inner.run().map(|_| ()));

        let err = event_loop.run().unwrap_err();
        assert!(matches!(err, Error::InternalError(_)));
        assert_eq!(event_loop.state(), LoopState::Idle);
    }

    #[test]
    fn test_with_config_rejects_zero_budget() {
        let err = EventLoop::with_config(EventLoopConfig::default().with_microtask_budget(0)).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_drain_inside_task_is_rejected() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner = event_loop.clone();
        let l = log.clone();
        event_loop.enqueue_microtask(move || {
            l.borrow_mut().push("a-start".to_string());
            let nested = inner.drain_microtasks();
            assert!(matches!(nested, Err(Error::InternalError(_))));
            l.borrow_mut().push("a-end".to_string());
            Ok(())
        });
        event_loop.enqueue_microtask(log_task(&log, "b"));

        event_loop.run().unwrap();
        assert_eq!(*log.borrow(), vec!["a-start", "a-end", "b"]);
    }

    #[test]
    fn test_cancel_macrotask() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let id = event_loop.enqueue_macrotask(log_task(&log, "cancelled"), 0);
        event_loop.enqueue_macrotask(log_task(&log, "kept"), 1);
        assert!(event_loop.cancel_macrotask(id));

        event_loop.run().unwrap();
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn test_stats_and_clear() {
        let event_loop = EventLoop::new();
        event_loop.enqueue_microtask(|| Ok(()));
        event_loop.enqueue_macrotask(|| Ok(()), 0);
        assert!(event_loop.has_pending_work());

        event_loop.clear();
        assert!(!event_loop.has_pending_work());

        event_loop.enqueue_microtask(|| Ok(()));
        event_loop.run().unwrap();
        let stats = event_loop.stats();
        assert_eq!(stats.total_microtasks, 1);
        assert_eq!(stats.max_microtasks_per_tick, 1);

        event_loop.reset_stats();
        assert_eq!(event_loop.stats(), EventLoopStats::default());
    }

    #[test]
    fn test_empty_run() {
        let event_loop = EventLoop::new();
        assert_eq!(event_loop.run().unwrap(), RunResult::default());
    }
}
