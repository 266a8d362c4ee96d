//! Microtask and macrotask queues
//!
//! Microtasks are kept as plain data: promise reaction jobs and thenable
//! adoption jobs carry the handles they need instead of hiding them inside
//! closures. Only host callbacks (`queueMicrotask`, timers, I/O) are boxed.

use crate::error::Result;
use crate::promise::{ReactionJob, ThenableJob};
use rustc_hash::FxHashMap as HashMap;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// A boxed host callback
pub type TaskFn = Box<dyn FnOnce() -> Result<()>>;

/// A microtask to be executed (Promise reactions, thenable adoption, queueMicrotask)
pub(crate) enum Microtask {
    /// Run a promise reaction with the settled value or reason
    Reaction(ReactionJob),
    /// Adopt the state of a thenable into a promise
    ResolveThenable(ThenableJob),
    /// Host callback
    Callback(TaskFn),
}

impl Microtask {
    pub(crate) fn run(self) -> Result<()> {
        match self {
            Microtask::Reaction(job) => job.run(),
            Microtask::ResolveThenable(job) => job.run(),
            Microtask::Callback(callback) => callback(),
        }
    }
}

impl fmt::Debug for Microtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Microtask::Reaction(job) => write!(f, "Microtask::Reaction({:?})", job),
            Microtask::ResolveThenable(job) => write!(f, "Microtask::ResolveThenable({:?})", job),
            Microtask::Callback(_) => write!(f, "Microtask::Callback"),
        }
    }
}

/// FIFO microtask queue. Jobs enqueued while the queue is being drained
/// are appended and run in the same drain.
#[derive(Debug, Default)]
pub(crate) struct MicrotaskQueue {
    queue: VecDeque<Microtask>,
}

impl MicrotaskQueue {
    pub(crate) fn push(&mut self, task: Microtask) {
        self.queue.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<Microtask> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Identifier of a scheduled macrotask, usable for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacrotaskId(pub u64);

/// A macrotask to be executed (timers, I/O callbacks, etc.)
pub struct Macrotask {
    id: MacrotaskId,
    order_key: u64,
    callback: TaskFn,
}

impl Macrotask {
    /// Unique task ID
    pub fn id(&self) -> MacrotaskId {
        self.id
    }

    /// The ordering key the task was scheduled with
    pub fn order_key(&self) -> u64 {
        self.order_key
    }

    /// Execute the task
    pub fn run(self) -> Result<()> {
        (self.callback)()
    }
}

impl fmt::Debug for Macrotask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macrotask")
            .field("id", &self.id)
            .field("order_key", &self.order_key)
            .finish()
    }
}

/// Macrotask queue ordered by `order_key`, FIFO among equal keys.
///
/// Tasks are indexed by `(order_key, sequence)`; the sequence number doubles
/// as the task id, so ties pop in scheduling order.
#[derive(Default)]
pub(crate) struct MacrotaskQueue {
    tasks: BTreeMap<(u64, u64), Macrotask>,
    keys: HashMap<u64, u64>,
    next_id: u64,
}

impl MacrotaskQueue {
    pub(crate) fn push(&mut self, order_key: u64, callback: TaskFn) -> MacrotaskId {
        self.next_id += 1;
        let id = MacrotaskId(self.next_id);
        self.keys.insert(id.0, order_key);
        self.tasks.insert(
            (order_key, id.0),
            Macrotask {
                id,
                order_key,
                callback,
            },
        );
        id
    }

    pub(crate) fn pop(&mut self) -> Option<Macrotask> {
        let ((_, id), task) = self.tasks.pop_first()?;
        self.keys.remove(&id);
        Some(task)
    }

    /// Remove a task that has not run yet
    pub(crate) fn cancel(&mut self, id: MacrotaskId) -> bool {
        match self.keys.remove(&id.0) {
            Some(order_key) => self.tasks.remove(&(order_key, id.0)).is_some(),
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
        self.keys.clear();
    }
}

impl fmt::Debug for MacrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tasks.values()).finish()
    }
}
