//! Async function coroutine
//!
//! Calling an async function runs its body synchronously up to the first
//! `await` and hands back the outer promise. Each `await` wraps its operand
//! with `Promise.resolve` and registers internal reactions that resume the
//! body from a microtask, with the fulfillment value or as a thrown reason.

use super::{Continuation, CoroutineBody, CoroutineStatus, Resume, Suspend};
use crate::error::{messages, Error, ErrorKind, Result};
use crate::event_loop::{EventLoop, LoopHandle};
use crate::promise::{Promise, ResolvingFunctions, WeakPromise};
use crate::value::{first_arg, Function, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

struct AsyncInner {
    name: String,
    status: CoroutineStatus,
    continuation: Continuation,
    /// Settles the promise returned to the caller
    outer: ResolvingFunctions,
    /// The promise the body is currently suspended on. Only its reactions
    /// keep the coroutine alive, so a promise nobody can settle frees both.
    awaited: Option<WeakPromise>,
    event_loop: LoopHandle,
}

/// A running async function
#[derive(Clone)]
pub struct AsyncCoroutine {
    inner: Rc<RefCell<AsyncInner>>,
}

impl AsyncCoroutine {
    /// Create an async function activation without running it
    pub fn new<B>(event_loop: &EventLoop, name: &str, body: B) -> Self
    where
        B: CoroutineBody + 'static,
    {
        Self::new_in(&event_loop.handle(), name, Box::new(body))
    }

    /// Call an async function: run `body` up to its first `await` and return
    /// the promise for its completion
    pub fn spawn<B>(event_loop: &EventLoop, body: B) -> Promise
    where
        B: CoroutineBody + 'static,
    {
        Self::new(event_loop, "anonymous", body).start()
    }

    pub(crate) fn new_in(event_loop: &LoopHandle, name: &str, body: Box<dyn CoroutineBody>) -> Self {
        let outer = ResolvingFunctions::new(Promise::pending_in(event_loop));
        Self {
            inner: Rc::new(RefCell::new(AsyncInner {
                name: name.to_string(),
                status: CoroutineStatus::SuspendedStart,
                continuation: Continuation::new(body),
                outer,
                awaited: None,
                event_loop: event_loop.clone(),
            })),
        }
    }

    /// Enter the body. Starting twice only returns the promise again.
    pub fn start(&self) -> Promise {
        if self.status() == CoroutineStatus::SuspendedStart {
            self.step(Resume::Next(Value::Undefined));
        }
        self.promise()
    }

    /// The promise for the function's completion
    pub fn promise(&self) -> Promise {
        self.inner.borrow().outer.promise().clone()
    }

    pub fn status(&self) -> CoroutineStatus {
        self.inner.borrow().status
    }

    /// The promise the body is suspended on, while it is still alive
    pub fn awaited(&self) -> Option<Promise> {
        self.inner.borrow().awaited.as_ref().and_then(WeakPromise::upgrade)
    }

    fn step(&self, input: Resume) {
        let taken = {
            let mut inner = self.inner.borrow_mut();
            inner.awaited = None;
            inner.status = CoroutineStatus::Executing;
            inner.continuation.take()
        };
        let Some((mut body, mut frame)) = taken else {
            return;
        };
        trace!(coroutine = %self.inner.borrow().name, resume_point = frame.resume_point, "resuming async function");
        let outcome = body.resume(&mut frame, input);
        self.inner.borrow_mut().continuation.restore(body, frame);

        match outcome {
            Ok(Suspend::Await(value)) => self.await_value(value),
            Ok(Suspend::Complete(value)) => self.finish().resolve(value),
            Ok(Suspend::Yield(_)) | Ok(Suspend::Delegate(_)) => self.finish().reject(Value::error(
                ErrorKind::TypeError,
                messages::YIELD_IN_ASYNC_FUNCTION,
            )),
            Err(e) => self.finish().reject(e.into_value()),
        }
    }

    fn await_value(&self, value: Value) {
        let event_loop = self.inner.borrow().event_loop.clone();
        let awaited = Promise::resolve_in(&event_loop, value);
        {
            let mut inner = self.inner.borrow_mut();
            inner.status = CoroutineStatus::SuspendedYield;
            inner.awaited = Some(awaited.downgrade());
        }
        trace!(promise = awaited.id(), "async function awaiting");

        let on_fulfilled = {
            let coroutine = self.clone();
            Function::new("asyncResume", move |args| {
                coroutine.resume_from_await(Resume::Next(first_arg(args)))
            })
        };
        let on_rejected = {
            let coroutine = self.clone();
            Function::new("asyncThrow", move |args| {
                coroutine.resume_from_await(Resume::Throw(first_arg(args)))
            })
        };
        awaited.perform_then(Some(on_fulfilled), Some(on_rejected), None);
    }

    fn resume_from_await(&self, input: Resume) -> Result<Value> {
        if self.status() != CoroutineStatus::SuspendedYield {
            return Err(Error::internal(format!(
                "async function resumed while {:?}",
                self.status()
            )));
        }
        self.step(input);
        Ok(Value::Undefined)
    }

    fn finish(&self) -> ResolvingFunctions {
        let mut inner = self.inner.borrow_mut();
        inner.status = CoroutineStatus::Completed;
        inner.continuation.discard();
        trace!(coroutine = %inner.name, "async function completed");
        inner.outer.clone()
    }
}

impl fmt::Debug for AsyncCoroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("AsyncCoroutine")
                .field("name", &inner.name)
                .field("status", &inner.status)
                .field("promise", &inner.outer.promise().id())
                .finish(),
            Err(_) => f.debug_struct("AsyncCoroutine").finish_non_exhaustive(),
        }
    }
}
