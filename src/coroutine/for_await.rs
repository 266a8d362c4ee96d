//! Async iteration and `for await ... of`

use super::generator::{get_iterator, IteratorRecord};
use super::{AsyncCoroutine, AsyncGenerator, CoroutineBody, Frame, Resume, Suspend};
use crate::error::{messages, Error, Result};
use crate::event_loop::{EventLoop, LoopHandle};
use crate::promise::Promise;
use crate::value::{create_iterator_result, first_arg, Function, IteratorResult, Value};
use std::cell::RefCell;
use std::ops::ControlFlow;
use tracing::trace;

/// An async iterator obtained from an async iterable (or a sync iterable
/// wrapped so that each produced value is awaited)
#[derive(Debug)]
pub enum AsyncIteratorRecord {
    AsyncGenerator(AsyncGenerator),
    /// An object whose `next` returns a promise for an iterator result
    Object {
        object: Value,
        next: Function,
        event_loop: LoopHandle,
    },
    /// Async-from-sync adapter
    FromSync {
        iterator: IteratorRecord,
        event_loop: LoopHandle,
    },
}

impl AsyncIteratorRecord {
    /// `GetIterator(value, async)`
    pub fn from_value(event_loop: &EventLoop, value: &Value) -> Result<Self> {
        get_async_iterator(&event_loop.handle(), value)
    }

    /// Request the next result. The promise fulfills with an iterator result object.
    pub fn next(&mut self, value: Value) -> Result<Promise> {
        match self {
            AsyncIteratorRecord::AsyncGenerator(generator) => Ok(generator.next(value)),
            AsyncIteratorRecord::Object {
                next, event_loop, ..
            } => {
                let result = next.call(&[value])?;
                Ok(Promise::resolve_in(event_loop, result))
            }
            AsyncIteratorRecord::FromSync {
                iterator,
                event_loop,
            } => {
                let result = iterator.next(value)?;
                Ok(unwrap_sync_result(event_loop, result, Some(&*iterator)))
            }
        }
    }

    /// Call `return`, or `None` if the iterator has none
    pub fn r#return(&mut self, value: Value) -> Option<Result<Promise>> {
        match self {
            AsyncIteratorRecord::AsyncGenerator(generator) => Some(Ok(generator.r#return(value))),
            AsyncIteratorRecord::Object {
                object, event_loop, ..
            } => invoke(object, "return", value, event_loop),
            AsyncIteratorRecord::FromSync {
                iterator,
                event_loop,
            } => iterator
                .r#return(value)
                .map(|step| step.map(|result| unwrap_sync_result(event_loop, result, None))),
        }
    }

    /// Call `throw`, or `None` if the iterator has none
    pub fn throw(&mut self, exception: Value) -> Option<Result<Promise>> {
        match self {
            AsyncIteratorRecord::AsyncGenerator(generator) => Some(Ok(generator.throw(exception))),
            AsyncIteratorRecord::Object {
                object, event_loop, ..
            } => invoke(object, "throw", exception, event_loop),
            AsyncIteratorRecord::FromSync {
                iterator,
                event_loop,
            } => {
                let step = iterator.throw(exception)?;
                Some(step.map(|result| unwrap_sync_result(event_loop, result, Some(&*iterator))))
            }
        }
    }
}

fn invoke(object: &Value, method: &str, argument: Value, event_loop: &LoopHandle) -> Option<Result<Promise>> {
    match object.get_property(method) {
        Some(Value::Function(f)) => Some(
            f.call(&[argument])
                .map(|result| Promise::resolve_in(event_loop, result)),
        ),
        _ => None,
    }
}

/// Await the value of a sync iterator result and rebuild `{ value, done }`.
///
/// When `close_on_rejection` is given and the result is not done, a rejected
/// value closes the sync iterator before the rejection is passed on.
fn unwrap_sync_result(
    event_loop: &LoopHandle,
    result: IteratorResult,
    close_on_rejection: Option<&IteratorRecord>,
) -> Promise {
    let done = result.done;
    let value_wrapper = Promise::resolve_in(event_loop, result.value);
    let unwrap = Function::new("asyncFromSyncIteratorUnwrap", move |args| {
        Ok(create_iterator_result(first_arg(args), done))
    });
    let close = if done {
        None
    } else {
        close_on_rejection.and_then(closer)
    };
    value_wrapper.then(Some(unwrap), close)
}

/// A reject handler that calls the sync iterator's `return` and rethrows.
/// Errors from `return` are dropped in favour of the original reason.
fn closer(iterator: &IteratorRecord) -> Option<Function> {
    let closable = match iterator {
        IteratorRecord::Generator(generator) => IteratorRecord::Generator(generator.clone()),
        IteratorRecord::Object { object, next } => IteratorRecord::Object {
            object: object.clone(),
            next: next.clone(),
        },
        IteratorRecord::List { .. } => return None,
    };
    let closable = RefCell::new(closable);
    Some(Function::new("asyncFromSyncIteratorClose", move |args| {
        let reason = first_arg(args);
        if let Err(e) = closable.borrow_mut().close() {
            trace!(error = %e, "closing sync iterator after rejection failed");
        }
        Err(Error::Thrown(reason))
    }))
}

pub(crate) fn get_async_iterator(event_loop: &LoopHandle, value: &Value) -> Result<AsyncIteratorRecord> {
    match value {
        Value::AsyncGenerator(generator) => Ok(AsyncIteratorRecord::AsyncGenerator(generator.clone())),
        Value::Object(_) => match value.get_property("next") {
            Some(Value::Function(next)) => Ok(AsyncIteratorRecord::Object {
                object: value.clone(),
                next,
                event_loop: event_loop.clone(),
            }),
            _ => Err(Error::type_error(messages::not_iterable(&value.to_js_string()))),
        },
        _ => Ok(AsyncIteratorRecord::FromSync {
            iterator: get_iterator(value)?,
            event_loop: event_loop.clone(),
        }),
    }
}

/// What the loop body asks for after handling one value
#[derive(Debug, Clone, PartialEq)]
pub enum LoopControl {
    Continue,
    /// `break`: the iterator is closed
    Break,
    /// `return value` from the enclosing async function: the iterator is closed
    Return(Value),
    /// `await value` inside the body. The body is resumed with the outcome at
    /// the frame's resume point.
    Await(Value),
}

/// The body of a `for await` loop.
///
/// Each iteration starts with a fresh [`Frame`] and `Resume::Next(value)`.
/// After an [`LoopControl::Await`] the body is resumed with the settled
/// value, or with `Resume::Throw` for a rejection. Implemented for any
/// `FnMut(&mut Frame, Resume) -> Result<LoopControl>`.
pub trait LoopBody {
    fn step(&mut self, frame: &mut Frame, input: Resume) -> Result<LoopControl>;
}

impl<F> LoopBody for F
where
    F: FnMut(&mut Frame, Resume) -> Result<LoopControl>,
{
    fn step(&mut self, frame: &mut Frame, input: Resume) -> Result<LoopControl> {
        self(frame, input)
    }
}

/// `for await (const x of iterable) { body }` inside an async function.
///
/// Returns the promise of that async function. Breaking out or failing in
/// `body` closes the iterator before the promise settles; a rejected `next`
/// does not. An error from `body` wins over an error from closing.
///
/// ```
/// use mercury::prelude::*;
///
/// let event_loop = EventLoop::new();
/// let items = Value::new_array(vec![Value::from(1), Value::from(2)]);
/// let done = for_await_of(&event_loop, items, |frame: &mut Frame, input: Resume| -> Result<LoopControl> {
///     match frame.resume_point {
///         0 => {
///             frame.resume_point = 1;
///             Ok(LoopControl::Await(input.value().clone()))
///         }
///         _ => Ok(LoopControl::Continue),
///     }
/// });
/// assert_eq!(event_loop.run_until_settled(&done).unwrap(), Value::Undefined);
/// ```
pub fn for_await_of<B>(event_loop: &EventLoop, iterable: Value, body: B) -> Promise
where
    B: LoopBody + 'static,
{
    let state_machine = ForAwait {
        event_loop: event_loop.handle(),
        iterable,
        iterator: None,
        body,
        body_frame: Frame::new(),
        completion: Value::Undefined,
        pending_error: None,
    };
    AsyncCoroutine::new_in(&event_loop.handle(), "for await", Box::new(state_machine)).start()
}

const START: u32 = 0;
const AWAIT_NEXT: u32 = 1;
const AWAIT_BODY: u32 = 2;
const AWAIT_CLOSE: u32 = 3;
const AWAIT_CLOSE_AFTER_ERROR: u32 = 4;

struct ForAwait<B> {
    event_loop: LoopHandle,
    iterable: Value,
    iterator: Option<AsyncIteratorRecord>,
    body: B,
    /// Frame of the current iteration's body
    body_frame: Frame,
    completion: Value,
    pending_error: Option<Error>,
}

impl<B: LoopBody> ForAwait<B> {
    fn request_next(&mut self, frame: &mut Frame) -> Result<Suspend> {
        let iterator = self
            .iterator
            .as_mut()
            .ok_or_else(|| Error::internal("for await resumed without an iterator"))?;
        let promise = iterator.next(Value::Undefined)?;
        frame.suspend_at(AWAIT_NEXT, Suspend::Await(Value::Promise(promise)))
    }

    /// Run the body until it finishes the iteration or awaits
    fn run_body(&mut self, frame: &mut Frame, input: Resume) -> Result<Suspend> {
        match self.body.step(&mut self.body_frame, input) {
            Ok(LoopControl::Await(value)) => frame.suspend_at(AWAIT_BODY, Suspend::Await(value)),
            Ok(LoopControl::Continue) => self.request_next(frame),
            Ok(LoopControl::Break) => self.close(frame, None),
            Ok(LoopControl::Return(value)) => {
                self.completion = value;
                self.close(frame, None)
            }
            Err(e) => self.close(frame, Some(e)),
        }
    }

    fn close(&mut self, frame: &mut Frame, error: Option<Error>) -> Result<Suspend> {
        let closing = self
            .iterator
            .as_mut()
            .and_then(|iterator| iterator.r#return(Value::Undefined));
        match (closing, error) {
            (None, None) => Ok(Suspend::Complete(std::mem::replace(&mut self.completion, Value::Undefined))),
            (None, Some(e)) | (Some(Err(_)), Some(e)) => Err(e),
            (Some(Err(e)), None) => Err(e),
            (Some(Ok(promise)), None) => {
                frame.suspend_at(AWAIT_CLOSE, Suspend::Await(Value::Promise(promise)))
            }
            (Some(Ok(promise)), Some(e)) => {
                self.pending_error = Some(e);
                frame.suspend_at(AWAIT_CLOSE_AFTER_ERROR, Suspend::Await(Value::Promise(promise)))
            }
        }
    }
}

impl<B: LoopBody> CoroutineBody for ForAwait<B> {
    fn resume(&mut self, frame: &mut Frame, input: Resume) -> Result<Suspend> {
        match frame.resume_point {
            START => {
                self.iterator = Some(get_async_iterator(&self.event_loop, &self.iterable)?);
                self.request_next(frame)
            }
            AWAIT_NEXT => {
                let result = match input.into_flow()? {
                    ControlFlow::Continue(result) => result,
                    ControlFlow::Break(done) => return Ok(done),
                };
                let step = IteratorResult::from_value(&result)?;
                if step.done {
                    return Ok(Suspend::Complete(Value::Undefined));
                }
                self.body_frame = Frame::new();
                self.run_body(frame, Resume::Next(step.value))
            }
            AWAIT_BODY => self.run_body(frame, input),
            AWAIT_CLOSE => {
                let result = match input.into_flow()? {
                    ControlFlow::Continue(result) => result,
                    ControlFlow::Break(done) => return Ok(done),
                };
                if !result.is_object() {
                    return Err(Error::type_error(messages::ITERATOR_RESULT_NOT_OBJECT));
                }
                Ok(Suspend::Complete(std::mem::replace(&mut self.completion, Value::Undefined)))
            }
            AWAIT_CLOSE_AFTER_ERROR => Err(self
                .pending_error
                .take()
                .unwrap_or_else(|| Error::internal("for await lost its pending error"))),
            point => Err(Error::internal(format!(
                "for await resumed at unknown point {}",
                point
            ))),
        }
    }
}
