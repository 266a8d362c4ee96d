//! Mercury: the asynchronous execution core of a JavaScript-compatible runtime
//!
//! Mercury provides the pieces an interpreter needs to run asynchronous
//! code with JavaScript semantics: a single-threaded event loop with
//! microtask and macrotask queues, Promises with their combinators, and
//! resumable coroutines backing generators, async functions, async
//! generators and `for await ... of`.
//!
//! # Quick Start
//!
//! ```
//! use mercury::prelude::*;
//!
//! fn main() -> mercury::Result<()> {
//!     let event_loop = EventLoop::new();
//!     let doubled = Promise::resolved(&event_loop, Value::from(21)).then(
//!         Some(Function::new("double", |args| {
//!             let n = args.first().and_then(Value::as_number).unwrap_or(0.0);
//!             Ok(Value::from(n * 2.0))
//!         })),
//!         None,
//!     );
//!     assert_eq!(event_loop.run_until_settled(&doubled)?, Value::from(42));
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Scheduling** | [`event_loop`] |
//! | **Promises** | [`promise`] |
//! | **Coroutines** | [`coroutine`] |
//! | **Values** | [`value`], [`error`](Error) |
//!
//! Everything is single-threaded: values are `Rc`-based and none of the
//! types are `Send`.
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]
#![allow(clippy::should_implement_trait)]

pub mod coroutine;
pub mod event_loop;
pub mod prelude;
pub mod promise;
pub mod value;

mod error;

pub use error::{messages, Error, ErrorKind, Result};
pub use event_loop::{EventLoop, EventLoopConfig};
pub use promise::{Promise, PromiseState};
pub use value::Value;

/// Mercury version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
