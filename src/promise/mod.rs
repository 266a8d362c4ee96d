//! Promise implementation
//!
//! A promise settles at most once. Settling hands the value to every
//! registered reaction by enqueueing one microtask per reaction, in
//! registration order. Resolving with a thenable defers to a microtask that
//! calls the thenable's `then` with a fresh pair of resolving functions.

mod combinators;

pub use combinators::PromiseWithResolvers;

use crate::error::{messages, Error, ErrorKind, Result};
use crate::event_loop::{EventLoop, LoopHandle, Microtask};
use crate::value::{first_arg, Function, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// Global promise ID counter
static PROMISE_ID: AtomicU64 = AtomicU64::new(1);

/// Promise states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Which settlement a reaction listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReactionKind {
    Fulfill,
    Reject,
}

/// A handler registered through `then`, plus the derived promise it feeds
pub(crate) struct Reaction {
    /// `None` for internal reactions (await resumption, thenable adoption)
    capability: Option<ResolvingFunctions>,
    kind: ReactionKind,
    /// `None` passes the value (or reason) straight through
    handler: Option<Function>,
}

struct PromiseInner {
    state: PromiseState,
    result: Option<Value>,
    fulfill_reactions: Vec<Reaction>,
    reject_reactions: Vec<Reaction>,
    /// Whether a reaction was ever attached (for unhandled rejection tracking)
    handled: bool,
    /// Number of thenables adopted so far
    adoption_depth: usize,
    event_loop: LoopHandle,
}

/// A JavaScript promise
#[derive(Clone)]
pub struct Promise {
    id: u64,
    inner: Rc<RefCell<PromiseInner>>,
}

/// Non-owning reference to a promise
#[derive(Clone)]
pub(crate) struct WeakPromise {
    id: u64,
    inner: Weak<RefCell<PromiseInner>>,
}

impl WeakPromise {
    pub(crate) fn upgrade(&self) -> Option<Promise> {
        self.inner.upgrade().map(|inner| Promise { id: self.id, inner })
    }
}

impl Promise {
    /// Create a promise and run `executor` synchronously with its resolve and
    /// reject functions. An error from the executor rejects the promise.
    ///
    /// ```
    /// use mercury::prelude::*;
    ///
    /// let event_loop = EventLoop::new();
    /// let promise = Promise::new(&event_loop, |resolve, _reject| {
    ///     resolve.call(&[Value::from(42)])?;
    ///     Ok(())
    /// });
    /// assert_eq!(event_loop.run_until_settled(&promise).unwrap(), Value::from(42));
    /// ```
    pub fn new<F>(event_loop: &EventLoop, executor: F) -> Promise
    where
        F: FnOnce(Function, Function) -> Result<()>,
    {
        let functions = Promise::deferred(event_loop);
        if let Err(e) = executor(functions.resolve_function(), functions.reject_function()) {
            functions.reject(e.into_value());
        }
        functions.promise
    }

    /// Create a pending promise with no way to settle it from outside.
    /// Use [`Promise::deferred`] when the caller needs the resolving functions.
    pub fn pending(event_loop: &EventLoop) -> Promise {
        Promise::pending_in(&event_loop.handle())
    }

    /// Create a pending promise together with its resolving functions
    pub fn deferred(event_loop: &EventLoop) -> ResolvingFunctions {
        ResolvingFunctions::new(Promise::pending(event_loop))
    }

    /// `Promise.resolve(value)`. A promise is returned as is.
    pub fn resolved(event_loop: &EventLoop, value: Value) -> Promise {
        Promise::resolve_in(&event_loop.handle(), value)
    }

    /// `Promise.reject(reason)`
    pub fn rejected(event_loop: &EventLoop, reason: Value) -> Promise {
        Promise::reject_in(&event_loop.handle(), reason)
    }

    pub(crate) fn pending_in(event_loop: &LoopHandle) -> Promise {
        let id = PROMISE_ID.fetch_add(1, Ordering::Relaxed);
        event_loop.on_promise_created();
        Promise {
            id,
            inner: Rc::new(RefCell::new(PromiseInner {
                state: PromiseState::Pending,
                result: None,
                fulfill_reactions: Vec::new(),
                reject_reactions: Vec::new(),
                handled: false,
                adoption_depth: 0,
                event_loop: event_loop.clone(),
            })),
        }
    }

    pub(crate) fn resolve_in(event_loop: &LoopHandle, value: Value) -> Promise {
        if let Value::Promise(promise) = value {
            return promise;
        }
        let functions = ResolvingFunctions::new(Promise::pending_in(event_loop));
        functions.resolve(value);
        functions.promise
    }

    pub(crate) fn reject_in(event_loop: &LoopHandle, reason: Value) -> Promise {
        let promise = Promise::pending_in(event_loop);
        reject_promise(&promise, reason);
        promise
    }

    /// Unique promise ID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> PromiseState {
        self.inner.borrow().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// The fulfillment value or rejection reason, once settled
    pub fn result(&self) -> Option<Value> {
        self.inner.borrow().result.clone()
    }

    /// Whether any reaction has been attached
    pub fn is_handled(&self) -> bool {
        self.inner.borrow().handled
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn event_loop(&self) -> LoopHandle {
        self.inner.borrow().event_loop.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakPromise {
        WeakPromise {
            id: self.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Register fulfillment and rejection handlers. Returns the derived
    /// promise, resolved with the handler's return value or rejected with
    /// its error. A missing handler passes the settlement through.
    pub fn then(&self, on_fulfilled: Option<Function>, on_rejected: Option<Function>) -> Promise {
        let capability = ResolvingFunctions::new(Promise::pending_in(&self.event_loop()));
        let derived = capability.promise.clone();
        self.perform_then(on_fulfilled, on_rejected, Some(capability));
        derived
    }

    /// `promise.catch(onRejected)`
    pub fn catch(&self, on_rejected: Function) -> Promise {
        self.then(None, Some(on_rejected))
    }

    /// `promise.finally(onFinally)`
    ///
    /// `on_finally` runs with no arguments on either outcome. The derived
    /// promise keeps the original settlement unless `on_finally` throws or
    /// returns a promise that rejects.
    pub fn finally(&self, on_finally: Function) -> Promise {
        let event_loop = self.event_loop();

        let then_finally = {
            let on_finally = on_finally.clone();
            let event_loop = event_loop.clone();
            Function::new("thenFinally", move |args| {
                let value = first_arg(args);
                let result = on_finally.call(&[])?;
                let promise = Promise::resolve_in(&event_loop, result);
                let value_thunk = Function::new("valueThunk", move |_| Ok(value.clone()));
                Ok(Value::Promise(promise.then(Some(value_thunk), None)))
            })
        };

        let catch_finally = Function::new("catchFinally", move |args| {
            let reason = first_arg(args);
            let result = on_finally.call(&[])?;
            let promise = Promise::resolve_in(&event_loop, result);
            let thrower = Function::new("thrower", move |_| Err(Error::Thrown(reason.clone())));
            Ok(Value::Promise(promise.then(Some(thrower), None)))
        });

        self.then(Some(then_finally), Some(catch_finally))
    }

    /// Attach reactions. With `capability == None` nothing is derived, which
    /// is what `await` and thenable adoption use internally.
    pub(crate) fn perform_then(
        &self,
        on_fulfilled: Option<Function>,
        on_rejected: Option<Function>,
        capability: Option<ResolvingFunctions>,
    ) {
        let fulfill = Reaction {
            capability: capability.clone(),
            kind: ReactionKind::Fulfill,
            handler: on_fulfilled,
        };
        let reject = Reaction {
            capability,
            kind: ReactionKind::Reject,
            handler: on_rejected,
        };

        let mut inner = self.inner.borrow_mut();
        let was_handled = std::mem::replace(&mut inner.handled, true);
        match inner.state {
            PromiseState::Pending => {
                inner.fulfill_reactions.push(fulfill);
                inner.reject_reactions.push(reject);
            }
            PromiseState::Fulfilled => {
                let argument = inner.result.clone().unwrap_or(Value::Undefined);
                let event_loop = inner.event_loop.clone();
                drop(inner);
                event_loop.enqueue(Microtask::Reaction(ReactionJob {
                    reaction: fulfill,
                    argument,
                }));
            }
            PromiseState::Rejected => {
                let argument = inner.result.clone().unwrap_or(Value::Undefined);
                let event_loop = inner.event_loop.clone();
                drop(inner);
                if !was_handled {
                    event_loop.track_handled(self);
                }
                event_loop.enqueue(Microtask::Reaction(ReactionJob {
                    reaction: reject,
                    argument,
                }));
            }
        }
    }

    /// Mark as observed without attaching a reaction
    pub(crate) fn mark_handled(&self) {
        let (was_handled, state, event_loop) = {
            let mut inner = self.inner.borrow_mut();
            let was_handled = std::mem::replace(&mut inner.handled, true);
            (was_handled, inner.state, inner.event_loop.clone())
        };
        if !was_handled && state == PromiseState::Rejected {
            event_loop.track_handled(self);
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Promise")
                .field("id", &self.id)
                .field("state", &inner.state)
                .field("result", &inner.result)
                .finish(),
            Err(_) => f.debug_struct("Promise").field("id", &self.id).finish_non_exhaustive(),
        }
    }
}

/// The resolve/reject pair of a promise. Only the first call across the
/// pair has any effect.
#[derive(Clone)]
pub struct ResolvingFunctions {
    promise: Promise,
    already_resolved: Rc<Cell<bool>>,
}

impl ResolvingFunctions {
    pub(crate) fn new(promise: Promise) -> Self {
        Self {
            promise,
            already_resolved: Rc::new(Cell::new(false)),
        }
    }

    /// The promise these functions settle
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Whether resolve or reject has already been called
    pub fn is_resolved(&self) -> bool {
        self.already_resolved.get()
    }

    /// Resolve with `value`, adopting it if it is a thenable
    pub fn resolve(&self, value: Value) {
        if self.already_resolved.replace(true) {
            trace!(promise = self.promise.id, "resolve ignored, already resolved");
            return;
        }
        resolve_promise(&self.promise, value);
    }

    /// Reject with `reason`
    pub fn reject(&self, reason: Value) {
        if self.already_resolved.replace(true) {
            trace!(promise = self.promise.id, "reject ignored, already resolved");
            return;
        }
        reject_promise(&self.promise, reason);
    }

    /// `resolve` as a function value
    pub fn resolve_function(&self) -> Function {
        let functions = self.clone();
        Function::new("resolve", move |args| {
            functions.resolve(first_arg(args));
            Ok(Value::Undefined)
        })
    }

    /// `reject` as a function value
    pub fn reject_function(&self) -> Function {
        let functions = self.clone();
        Function::new("reject", move |args| {
            functions.reject(first_arg(args));
            Ok(Value::Undefined)
        })
    }
}

impl fmt::Debug for ResolvingFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvingFunctions")
            .field("promise", &self.promise.id)
            .field("already_resolved", &self.already_resolved.get())
            .finish()
    }
}

/// How a thenable will be adopted
#[derive(Debug, Clone)]
pub(crate) enum ThenCapability {
    /// One of our own promises; chained directly
    Promise(Promise),
    /// An object whose `then` property is callable
    Callable(Function),
}

/// Returns how to adopt `value` if it is a thenable
pub(crate) fn then_capability(value: &Value) -> Option<ThenCapability> {
    match value {
        Value::Promise(promise) => Some(ThenCapability::Promise(promise.clone())),
        Value::Object(_) => match value.get_property("then") {
            Some(Value::Function(then)) => Some(ThenCapability::Callable(then)),
            _ => None,
        },
        _ => None,
    }
}

/// Resolve `promise` with `resolution` (the promise resolve function body)
pub(crate) fn resolve_promise(promise: &Promise, resolution: Value) {
    if let Value::Promise(p) = &resolution {
        if p.ptr_eq(promise) {
            reject_promise(
                promise,
                Value::error(ErrorKind::TypeError, messages::CHAINING_CYCLE),
            );
            return;
        }
    }

    match then_capability(&resolution) {
        Some(then) => {
            trace!(promise = promise.id, "adopting thenable");
            promise
                .event_loop()
                .enqueue(Microtask::ResolveThenable(ThenableJob {
                    promise: promise.clone(),
                    then,
                }));
        }
        None => fulfill_promise(promise, resolution),
    }
}

/// Fulfill a pending promise and schedule its fulfill reactions
pub(crate) fn fulfill_promise(promise: &Promise, value: Value) {
    let (reactions, event_loop) = {
        let mut inner = promise.inner.borrow_mut();
        debug_assert_eq!(inner.state, PromiseState::Pending, "promise settled twice");
        if inner.state != PromiseState::Pending {
            return;
        }
        inner.state = PromiseState::Fulfilled;
        inner.result = Some(value.clone());
        inner.reject_reactions.clear();
        (
            std::mem::take(&mut inner.fulfill_reactions),
            inner.event_loop.clone(),
        )
    };

    trace!(promise = promise.id, reactions = reactions.len(), "promise fulfilled");
    event_loop.on_promise_settled();
    for reaction in reactions {
        event_loop.enqueue(Microtask::Reaction(ReactionJob {
            reaction,
            argument: value.clone(),
        }));
    }
}

/// Reject a pending promise and schedule its reject reactions
pub(crate) fn reject_promise(promise: &Promise, reason: Value) {
    let (reactions, handled, event_loop) = {
        let mut inner = promise.inner.borrow_mut();
        debug_assert_eq!(inner.state, PromiseState::Pending, "promise settled twice");
        if inner.state != PromiseState::Pending {
            return;
        }
        inner.state = PromiseState::Rejected;
        inner.result = Some(reason.clone());
        inner.fulfill_reactions.clear();
        (
            std::mem::take(&mut inner.reject_reactions),
            inner.handled,
            inner.event_loop.clone(),
        )
    };

    trace!(promise = promise.id, reactions = reactions.len(), "promise rejected");
    event_loop.on_promise_settled();
    if !handled {
        event_loop.track_rejection(promise);
    }
    for reaction in reactions {
        event_loop.enqueue(Microtask::Reaction(ReactionJob {
            reaction,
            argument: reason.clone(),
        }));
    }
}

/// Microtask running one reaction
pub(crate) struct ReactionJob {
    reaction: Reaction,
    argument: Value,
}

impl ReactionJob {
    pub(crate) fn run(self) -> Result<()> {
        let ReactionJob { reaction, argument } = self;
        let outcome = match &reaction.handler {
            Some(handler) => handler.call(&[argument]),
            None => match reaction.kind {
                ReactionKind::Fulfill => Ok(argument),
                ReactionKind::Reject => Err(Error::Thrown(argument)),
            },
        };

        match (reaction.capability, outcome) {
            (Some(capability), Ok(value)) => capability.resolve(value),
            (Some(capability), Err(e)) => capability.reject(e.into_value()),
            (None, Ok(_)) => {}
            (None, Err(e)) if e.is_host_fault() => return Err(e),
            (None, Err(e)) => warn!(error = %e, "internal promise reaction failed"),
        }
        Ok(())
    }
}

impl fmt::Debug for ReactionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionJob")
            .field("kind", &self.reaction.kind)
            .field("handler", &self.reaction.handler)
            .field("argument", &self.argument)
            .finish()
    }
}

/// Microtask adopting a thenable's eventual state into `promise`
#[derive(Debug)]
pub(crate) struct ThenableJob {
    promise: Promise,
    then: ThenCapability,
}

impl ThenableJob {
    pub(crate) fn run(self) -> Result<()> {
        let ThenableJob { promise, then } = self;
        let depth = {
            let mut inner = promise.inner.borrow_mut();
            inner.adoption_depth += 1;
            inner.adoption_depth
        };
        let functions = ResolvingFunctions::new(promise.clone());

        let limit = promise.event_loop().max_adoption_depth();
        if depth > limit {
            warn!(promise = promise.id, depth, "thenable adoption depth exceeded");
            functions.reject(Value::error(
                ErrorKind::TypeError,
                messages::ADOPTION_DEPTH_EXCEEDED,
            ));
            return Ok(());
        }

        match then {
            ThenCapability::Promise(source) => source.perform_then(
                Some(functions.resolve_function()),
                Some(functions.reject_function()),
                None,
            ),
            ThenCapability::Callable(then) => {
                let args = [
                    Value::Function(functions.resolve_function()),
                    Value::Function(functions.reject_function()),
                ];
                if let Err(e) = then.call(&args) {
                    functions.reject(e.into_value());
                }
            }
        }
        Ok(())
    }
}
