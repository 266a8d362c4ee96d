//! Coroutines: generators, async functions and async generators
//!
//! A coroutine body is an explicit state machine. Each call to
//! [`CoroutineBody::resume`] runs from the frame's `resume_point` until the
//! next suspension and reports why it stopped with a [`Suspend`]. The value
//! or exception delivered at resumption arrives as a [`Resume`], so an
//! injected `throw` or `return` surfaces exactly at the suspension point.
//!
//! ```
//! use mercury::prelude::*;
//! use std::ops::ControlFlow;
//!
//! // function* counter() { const x = yield 1; yield x + 1; }
//! let gen = Generator::new(|frame: &mut Frame, input: Resume| -> Result<Suspend> {
//!     let sent = match input.into_flow()? {
//!         ControlFlow::Continue(value) => value,
//!         ControlFlow::Break(done) => return Ok(done),
//!     };
//!     match frame.resume_point {
//!         0 => frame.suspend_at(1, Suspend::Yield(Value::from(1))),
//!         1 => {
//!             let x = sent.as_number().unwrap_or(0.0);
//!             frame.suspend_at(2, Suspend::Yield(Value::from(x + 1.0)))
//!         }
//!         _ => Ok(Suspend::Complete(Value::Undefined)),
//!     }
//! });
//!
//! assert_eq!(gen.next(Value::Undefined).unwrap().value, Value::from(1));
//! assert_eq!(gen.next(Value::from(41)).unwrap().value, Value::from(42));
//! assert!(gen.next(Value::Undefined).unwrap().done);
//! ```

mod async_fn;
mod async_generator;
mod for_await;
mod generator;

pub use async_fn::AsyncCoroutine;
pub use async_generator::{AsyncGenerator, AsyncGeneratorState};
pub use for_await::{for_await_of, AsyncIteratorRecord, LoopBody, LoopControl};
pub use generator::{get_iterator, Generator, IteratorRecord};

use crate::error::{Error, Result};
use crate::value::Value;
use std::fmt;
use std::ops::ControlFlow;

/// Lifecycle of a generator or async function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// Created, body not entered yet
    SuspendedStart,
    /// Paused at a `yield` (or, for async functions, an `await`)
    SuspendedYield,
    /// Body currently running
    Executing,
    /// Returned or threw; can never resume
    Completed,
}

/// How a suspended coroutine is resumed
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// Continue normally; the value is the result of the suspending expression
    Next(Value),
    /// Raise the value as an exception at the suspension point
    Throw(Value),
    /// Perform a `return` at the suspension point (running `finally` blocks)
    Return(Value),
}

impl Resume {
    pub fn value(&self) -> &Value {
        match self {
            Resume::Next(v) | Resume::Throw(v) | Resume::Return(v) => v,
        }
    }

    /// Default handling for bodies without `try`/`finally` at this point:
    /// a sent value continues, a throw propagates, a return completes.
    pub fn into_flow(self) -> Result<ControlFlow<Suspend, Value>> {
        match self {
            Resume::Next(value) => Ok(ControlFlow::Continue(value)),
            Resume::Throw(exception) => Err(Error::Thrown(exception)),
            Resume::Return(value) => Ok(ControlFlow::Break(Suspend::Complete(value))),
        }
    }
}

/// Why a coroutine body stopped running
#[derive(Debug, Clone, PartialEq)]
pub enum Suspend {
    /// `yield value`
    Yield(Value),
    /// `await value`
    Await(Value),
    /// `yield* iterable`
    Delegate(Value),
    /// The body returned
    Complete(Value),
}

/// Saved execution context of a coroutine body
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Where the body continues on the next resume
    pub resume_point: u32,
    /// Locals that live across suspension points
    pub locals: Vec<Value>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locals(locals: Vec<Value>) -> Self {
        Self {
            resume_point: 0,
            locals,
        }
    }

    /// Read a local slot; unset slots read as `undefined`
    pub fn local(&self, slot: usize) -> Value {
        self.locals.get(slot).cloned().unwrap_or(Value::Undefined)
    }

    pub fn set_local(&mut self, slot: usize, value: Value) {
        if slot >= self.locals.len() {
            self.locals.resize(slot + 1, Value::Undefined);
        }
        self.locals[slot] = value;
    }

    /// Record where to continue and suspend
    pub fn suspend_at(&mut self, point: u32, suspend: Suspend) -> Result<Suspend> {
        self.resume_point = point;
        Ok(suspend)
    }
}

/// A resumable coroutine body.
///
/// Implemented for any `FnMut(&mut Frame, Resume) -> Result<Suspend>`, so a
/// closure matching on `frame.resume_point` is enough for most bodies.
/// Returning `Err` completes the coroutine with that exception.
pub trait CoroutineBody {
    fn resume(&mut self, frame: &mut Frame, input: Resume) -> Result<Suspend>;
}

impl<F> CoroutineBody for F
where
    F: FnMut(&mut Frame, Resume) -> Result<Suspend>,
{
    fn resume(&mut self, frame: &mut Frame, input: Resume) -> Result<Suspend> {
        self(frame, input)
    }
}

/// Body plus frame of a coroutine. Both are moved out while the body runs,
/// so a re-entrant resume finds nothing to run.
pub(crate) struct Continuation {
    frame: Frame,
    body: Option<Box<dyn CoroutineBody>>,
}

impl Continuation {
    pub(crate) fn new(body: Box<dyn CoroutineBody>) -> Self {
        Self {
            frame: Frame::new(),
            body: Some(body),
        }
    }

    pub(crate) fn take(&mut self) -> Option<(Box<dyn CoroutineBody>, Frame)> {
        let body = self.body.take()?;
        Some((body, std::mem::take(&mut self.frame)))
    }

    pub(crate) fn restore(&mut self, body: Box<dyn CoroutineBody>, frame: Frame) {
        self.body = Some(body);
        self.frame = frame;
    }

    /// Drop the body and its locals once the coroutine completes
    pub(crate) fn discard(&mut self) {
        self.body = None;
        self.frame = Frame::new();
    }

    pub(crate) fn resume_point(&self) -> u32 {
        self.frame.resume_point
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("resume_point", &self.frame.resume_point)
            .field("live", &self.body.is_some())
            .finish()
    }
}
