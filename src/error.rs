//! Error types for the Mercury execution engine

use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// Main error type for Mercury
///
/// Language-level exceptions travel as [`Error::Thrown`]; everything else is
/// raised by the engine itself. Promise and coroutine machinery converts any
/// of these into a rejection reason with [`Error::into_value`], except the
/// host faults reported by [`Error::is_host_fault`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A thrown language value (`throw x`, a rejection reason re-thrown at an
    /// `await`, or an exception injected through `Generator.prototype.throw`)
    #[error("Uncaught {0}")]
    Thrown(Value),

    /// Runtime error raised by the engine - TypeError, RangeError, etc.
    #[error("{kind}: {message}")]
    RuntimeError { kind: ErrorKind, message: String },

    /// `next`/`return`/`throw` called on a coroutine that is already executing
    #[error("TypeError: {0} is already running")]
    AlreadyRunning(&'static str),

    /// `run_until_settled` ran out of queued work while the promise was still pending
    #[error("InternalError: event loop went idle before the promise settled")]
    Unsettled,

    /// Scheduler invariant violation or event loop misuse
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Invalid event loop configuration
    #[error("ConfigError: {0}")]
    ConfigError(String),
}

/// JavaScript error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum ErrorKind {
    /// TypeError - wrong type for operation
    TypeError,
    /// ReferenceError - undefined variable
    ReferenceError,
    /// RangeError - value out of range
    RangeError,
    /// AggregateError - several errors wrapped together (`Promise.any`)
    AggregateError,
    /// Generic Error - user-thrown Error objects
    GenericError,
    /// InternalError - internal engine error
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::ReferenceError => write!(f, "ReferenceError"),
            ErrorKind::RangeError => write!(f, "RangeError"),
            ErrorKind::AggregateError => write!(f, "AggregateError"),
            ErrorKind::GenericError => write!(f, "Error"),
            ErrorKind::InternalError => write!(f, "InternalError"),
        }
    }
}

impl Error {
    /// Wrap a language value as a thrown exception
    pub fn thrown(value: impl Into<Value>) -> Self {
        Error::Thrown(value.into())
    }

    /// Create a TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Error::RuntimeError {
            kind: ErrorKind::TypeError,
            message: message.into(),
        }
    }

    /// Create a RangeError
    pub fn range_error(message: impl Into<String>) -> Self {
        Error::RuntimeError {
            kind: ErrorKind::RangeError,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::InternalError(message.into())
    }

    /// Errors that signal a broken coroutine or scheduler invariant rather
    /// than a language exception. These propagate out of the event loop.
    pub fn is_host_fault(&self) -> bool {
        matches!(self, Error::AlreadyRunning(_) | Error::InternalError(_))
    }

    /// The language value this error stands for when it becomes a rejection
    /// reason or is injected at a suspension point.
    pub fn into_value(self) -> Value {
        match self {
            Error::Thrown(value) => value,
            Error::RuntimeError { kind, message } => Value::error(kind, message),
            Error::AlreadyRunning(what) => {
                Value::error(ErrorKind::TypeError, format!("{} is already running", what))
            }
            Error::Unsettled => Value::error(
                ErrorKind::InternalError,
                "event loop went idle before the promise settled",
            ),
            Error::InternalError(message) => Value::error(ErrorKind::InternalError, message),
            Error::ConfigError(message) => Value::error(ErrorKind::GenericError, message),
        }
    }

    /// The thrown value, if this is a language-level exception
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Error::Thrown(value) => Some(value),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ConfigError(e.to_string())
    }
}

/// Result type alias for Mercury
pub type Result<T> = std::result::Result<T, Error>;

/// Standardized error message templates
pub mod messages {
    pub const CHAINING_CYCLE: &str = "Chaining cycle detected for promise";
    pub const ADOPTION_DEPTH_EXCEEDED: &str = "Maximum thenable adoption depth exceeded";
    pub const ALL_PROMISES_REJECTED: &str = "All promises were rejected";
    pub const NOT_ITERABLE: &str = "is not iterable";
    pub const ITERATOR_RESULT_NOT_OBJECT: &str = "Iterator result is not an object";
    pub const ITERATOR_NO_THROW: &str = "The iterator does not provide a 'throw' method";
    pub const AWAIT_OUTSIDE_ASYNC: &str = "await is only valid in async functions and async generators";
    pub const YIELD_IN_ASYNC_FUNCTION: &str = "yield is not valid in an async function";
    pub const NESTED_RUN: &str = "event loop entered while it is already running";

    /// Format a "X is not iterable" error message
    pub fn not_iterable(what: &str) -> String {
        format!("{} {}", what, NOT_ITERABLE)
    }
}
