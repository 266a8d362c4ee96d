//! Async generator coroutine
//!
//! `next`, `return` and `throw` never block: each call queues a request and
//! returns a promise. Requests are served strictly in order, one at a time.
//! The body awaits like an async function; `yield` awaits its operand before
//! the front request is fulfilled with `{ value, done: false }`.

use super::for_await::{get_async_iterator, AsyncIteratorRecord};
use super::{Continuation, CoroutineBody, Resume, Suspend};
use crate::error::{messages, ErrorKind};
use crate::event_loop::{EventLoop, LoopHandle};
use crate::promise::{Promise, ResolvingFunctions};
use crate::value::{first_arg, Function, IteratorResult, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Async generator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncGeneratorState {
    SuspendedStart,
    SuspendedYield,
    Executing,
    /// Completed, waiting for the operand of a `return` to settle
    AwaitingReturn,
    Completed,
}

/// A queued next/return/throw call
struct AsyncGenRequest {
    completion: Resume,
    capability: ResolvingFunctions,
}

/// What to do once an internal await settles
#[derive(Debug, Clone, Copy)]
enum AwaitKind {
    /// `await` inside the body
    Resume,
    /// Operand of a `return()` request at a yield point
    ReturnInto,
    /// Operand of `yield`
    Yield,
    /// The body's return value
    Complete,
    /// Result of the inner iterator during `yield*`
    Delegate { returning: bool },
}

struct AsyncGenInner {
    name: String,
    state: AsyncGeneratorState,
    continuation: Continuation,
    queue: VecDeque<AsyncGenRequest>,
    delegate: Option<AsyncIteratorRecord>,
    event_loop: LoopHandle,
}

/// An async generator object
#[derive(Clone)]
pub struct AsyncGenerator {
    inner: Rc<RefCell<AsyncGenInner>>,
}

impl AsyncGenerator {
    pub fn new<B>(event_loop: &EventLoop, body: B) -> Self
    where
        B: CoroutineBody + 'static,
    {
        Self::named(event_loop, "anonymous", body)
    }

    pub fn named<B>(event_loop: &EventLoop, name: &str, body: B) -> Self
    where
        B: CoroutineBody + 'static,
    {
        Self {
            inner: Rc::new(RefCell::new(AsyncGenInner {
                name: name.to_string(),
                state: AsyncGeneratorState::SuspendedStart,
                continuation: Continuation::new(Box::new(body)),
                queue: VecDeque::new(),
                delegate: None,
                event_loop: event_loop.handle(),
            })),
        }
    }

    pub fn state(&self) -> AsyncGeneratorState {
        self.inner.borrow().state
    }

    /// Number of requests not yet settled
    pub fn pending_requests(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &AsyncGenerator) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// `gen.next(value)`
    pub fn next(&self, value: Value) -> Promise {
        self.enqueue(Resume::Next(value))
    }

    /// `gen.return(value)`
    pub fn r#return(&self, value: Value) -> Promise {
        self.enqueue(Resume::Return(value))
    }

    /// `gen.throw(exception)`
    pub fn throw(&self, exception: Value) -> Promise {
        self.enqueue(Resume::Throw(exception))
    }

    /// Queue a request. The generator is resumed right away unless it is
    /// already busy with an earlier one.
    pub fn enqueue(&self, completion: Resume) -> Promise {
        let capability = {
            let mut inner = self.inner.borrow_mut();
            let capability = ResolvingFunctions::new(Promise::pending_in(&inner.event_loop));
            inner.queue.push_back(AsyncGenRequest {
                completion,
                capability: capability.clone(),
            });
            capability
        };
        self.resume_next();
        capability.promise().clone()
    }

    pub(crate) fn event_loop(&self) -> LoopHandle {
        self.inner.borrow().event_loop.clone()
    }

    /// Serve queued requests until one leaves the generator busy
    fn resume_next(&self) {
        loop {
            let (state, completion) = {
                let inner = self.inner.borrow();
                if matches!(
                    inner.state,
                    AsyncGeneratorState::Executing | AsyncGeneratorState::AwaitingReturn
                ) {
                    return;
                }
                match inner.queue.front() {
                    Some(request) => (inner.state, request.completion.clone()),
                    None => return,
                }
            };

            let state = match (state, &completion) {
                (AsyncGeneratorState::SuspendedStart, Resume::Return(_) | Resume::Throw(_)) => {
                    self.complete();
                    AsyncGeneratorState::Completed
                }
                _ => state,
            };

            if state == AsyncGeneratorState::Completed {
                match completion {
                    Resume::Next(_) => self.settle_front(Ok(IteratorResult::done(Value::Undefined))),
                    Resume::Throw(exception) => self.settle_front(Err(exception)),
                    Resume::Return(value) => {
                        self.set_state(AsyncGeneratorState::AwaitingReturn);
                        self.await_value(value, AwaitKind::Complete);
                        return;
                    }
                }
                continue;
            }

            self.set_state(AsyncGeneratorState::Executing);
            let delegating = self.inner.borrow().delegate.is_some();
            if delegating {
                self.delegate_step(completion);
            } else {
                match completion {
                    Resume::Next(_) if state == AsyncGeneratorState::SuspendedStart => {
                        self.run_body(Resume::Next(Value::Undefined))
                    }
                    Resume::Return(value) => self.await_value(value, AwaitKind::ReturnInto),
                    other => self.run_body(other),
                }
            }
            return;
        }
    }

    fn run_body(&self, input: Resume) {
        let taken = self.inner.borrow_mut().continuation.take();
        let Some((mut body, mut frame)) = taken else {
            self.await_value(Value::Undefined, AwaitKind::Complete);
            return;
        };
        trace!(generator = %self.inner.borrow().name, resume_point = frame.resume_point, "resuming async generator");
        let outcome = body.resume(&mut frame, input);
        self.inner.borrow_mut().continuation.restore(body, frame);

        match outcome {
            Ok(Suspend::Await(value)) => self.await_value(value, AwaitKind::Resume),
            Ok(Suspend::Yield(value)) => self.await_value(value, AwaitKind::Yield),
            Ok(Suspend::Complete(value)) => {
                self.inner.borrow_mut().continuation.discard();
                self.await_value(value, AwaitKind::Complete);
            }
            Ok(Suspend::Delegate(iterable)) => {
                match get_async_iterator(&self.event_loop(), &iterable) {
                    Ok(iterator) => {
                        self.inner.borrow_mut().delegate = Some(iterator);
                        self.delegate_step(Resume::Next(Value::Undefined));
                    }
                    Err(e) => self.run_body(Resume::Throw(e.into_value())),
                }
            }
            Err(e) => {
                self.complete();
                self.settle_front(Err(e.into_value()));
                self.resume_next();
            }
        }
    }

    /// Forward a request to the inner iterator of a `yield*`
    fn delegate_step(&self, completion: Resume) {
        let delegate = self.inner.borrow_mut().delegate.take();
        let Some(mut iterator) = delegate else {
            self.run_body(completion);
            return;
        };

        let (step, returning) = match completion {
            Resume::Next(value) => (iterator.next(value), false),
            Resume::Throw(exception) => match iterator.throw(exception) {
                Some(step) => (step, false),
                None => {
                    if let Some(Ok(closing)) = iterator.r#return(Value::Undefined) {
                        closing.mark_handled();
                    }
                    self.run_body(Resume::Throw(Value::error(
                        ErrorKind::TypeError,
                        messages::ITERATOR_NO_THROW,
                    )));
                    return;
                }
            },
            Resume::Return(value) => match iterator.r#return(value.clone()) {
                Some(step) => (step, true),
                None => {
                    self.await_value(value, AwaitKind::ReturnInto);
                    return;
                }
            },
        };

        match step {
            Ok(promise) => {
                self.inner.borrow_mut().delegate = Some(iterator);
                self.await_value(Value::Promise(promise), AwaitKind::Delegate { returning });
            }
            Err(e) => self.run_body(Resume::Throw(e.into_value())),
        }
    }

    fn await_value(&self, value: Value, kind: AwaitKind) {
        let promise = Promise::resolve_in(&self.event_loop(), value);
        trace!(promise = promise.id(), ?kind, "async generator awaiting");

        let on_fulfilled = {
            let generator = self.clone();
            Function::new("asyncGeneratorResume", move |args| {
                generator.on_await_settled(kind, Ok(first_arg(args)));
                Ok(Value::Undefined)
            })
        };
        let on_rejected = {
            let generator = self.clone();
            Function::new("asyncGeneratorThrow", move |args| {
                generator.on_await_settled(kind, Err(first_arg(args)));
                Ok(Value::Undefined)
            })
        };
        promise.perform_then(Some(on_fulfilled), Some(on_rejected), None);
    }

    fn on_await_settled(&self, kind: AwaitKind, outcome: std::result::Result<Value, Value>) {
        match (kind, outcome) {
            (AwaitKind::Resume, Ok(value)) => self.run_body(Resume::Next(value)),
            (AwaitKind::ReturnInto, Ok(value)) => self.run_body(Resume::Return(value)),
            (AwaitKind::Resume | AwaitKind::ReturnInto | AwaitKind::Yield, Err(reason)) => {
                self.run_body(Resume::Throw(reason))
            }
            (AwaitKind::Yield, Ok(value)) => {
                self.set_state(AsyncGeneratorState::SuspendedYield);
                self.settle_front(Ok(IteratorResult::yielded(value)));
                self.resume_next();
            }
            (AwaitKind::Complete, outcome) => {
                self.complete();
                self.settle_front(outcome.map(IteratorResult::done));
                self.resume_next();
            }
            (AwaitKind::Delegate { returning }, Ok(result)) => {
                match IteratorResult::from_value(&result) {
                    Ok(step) if step.done => {
                        self.inner.borrow_mut().delegate = None;
                        if returning {
                            self.run_body(Resume::Return(step.value));
                        } else {
                            self.run_body(Resume::Next(step.value));
                        }
                    }
                    Ok(step) => {
                        self.set_state(AsyncGeneratorState::SuspendedYield);
                        self.settle_front(Ok(IteratorResult::yielded(step.value)));
                        self.resume_next();
                    }
                    Err(e) => {
                        self.inner.borrow_mut().delegate = None;
                        self.run_body(Resume::Throw(e.into_value()));
                    }
                }
            }
            (AwaitKind::Delegate { .. }, Err(reason)) => {
                self.inner.borrow_mut().delegate = None;
                self.run_body(Resume::Throw(reason));
            }
        }
    }

    /// Settle the oldest request
    fn settle_front(&self, outcome: std::result::Result<IteratorResult, Value>) {
        let request = self.inner.borrow_mut().queue.pop_front();
        let Some(request) = request else {
            return;
        };
        match outcome {
            Ok(result) => request.capability.resolve(result.to_value()),
            Err(reason) => request.capability.reject(reason),
        }
    }

    fn set_state(&self, state: AsyncGeneratorState) {
        self.inner.borrow_mut().state = state;
    }

    fn complete(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.state = AsyncGeneratorState::Completed;
        inner.delegate = None;
        inner.continuation.discard();
        trace!(generator = %inner.name, "async generator completed");
    }
}

impl fmt::Debug for AsyncGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("AsyncGenerator")
                .field("name", &inner.name)
                .field("state", &inner.state)
                .field("queued", &inner.queue.len())
                .finish(),
            Err(_) => f.debug_struct("AsyncGenerator").finish_non_exhaustive(),
        }
    }
}
