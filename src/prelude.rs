//! Prelude module for convenient imports
//!
//! ```
//! use mercury::prelude::*;
//!
//! let event_loop = EventLoop::new();
//! let all = Promise::all(&event_loop, vec![Value::from(1), Value::from(2)]);
//! event_loop.run().unwrap();
//! assert_eq!(all.state(), PromiseState::Fulfilled);
//! ```

// Values
pub use crate::value::{create_iterator_result, Function, IteratorResult, Value};

// Error handling
pub use crate::error::{Error, ErrorKind, Result};

// Scheduling
pub use crate::event_loop::{
    EventLoop, EventLoopConfig, EventLoopStats, LoopState, MacrotaskId, RunResult,
    UnhandledRejection,
};

// Promises
pub use crate::promise::{Promise, PromiseState, PromiseWithResolvers, ResolvingFunctions};

// Coroutines
pub use crate::coroutine::{
    for_await_of, get_iterator, AsyncCoroutine, AsyncGenerator, AsyncGeneratorState,
    AsyncIteratorRecord, CoroutineBody, CoroutineStatus, Frame, Generator, IteratorRecord,
    LoopBody, LoopControl, Resume, Suspend,
};
