//! Generator coroutine and the iterator protocol
//!
//! Implements the generator object operations:
//! - `Generator.prototype.next(value)`
//! - `Generator.prototype.return(value)`
//! - `Generator.prototype.throw(exception)`
//! - `yield*` delegation to any iterable

use super::{Continuation, CoroutineBody, CoroutineStatus, Frame, Resume, Suspend};
use crate::error::{messages, Error, ErrorKind, Result};
use crate::value::{Function, IteratorResult, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

struct GeneratorInner {
    name: String,
    status: CoroutineStatus,
    continuation: Continuation,
    /// Inner iterator while suspended inside `yield*`
    delegate: Option<IteratorRecord>,
}

/// A generator object
#[derive(Clone)]
pub struct Generator {
    inner: Rc<RefCell<GeneratorInner>>,
}

/// What a `yield*` step produced
enum DelegateStep {
    /// The inner iterator yielded; the outer generator suspends with it
    Yielded(Value),
    /// Delegation ended; continue the outer body with this completion
    Resume(Resume),
}

impl Generator {
    /// Create a suspended generator. The body does not run until the first `next`.
    pub fn new<B>(body: B) -> Self
    where
        B: CoroutineBody + 'static,
    {
        Self::named("anonymous", body)
    }

    pub fn named<B>(name: &str, body: B) -> Self
    where
        B: CoroutineBody + 'static,
    {
        Self {
            inner: Rc::new(RefCell::new(GeneratorInner {
                name: name.to_string(),
                status: CoroutineStatus::SuspendedStart,
                continuation: Continuation::new(Box::new(body)),
                delegate: None,
            })),
        }
    }

    /// A generator yielding each of `values` in turn
    pub fn from_values(values: Vec<Value>) -> Self {
        Self::named(
            "values",
            move |frame: &mut Frame, input: Resume| -> Result<Suspend> {
                match input {
                    Resume::Throw(exception) => return Err(Error::Thrown(exception)),
                    Resume::Return(value) => return Ok(Suspend::Complete(value)),
                    Resume::Next(_) => {}
                }
                let index = frame.resume_point as usize;
                match values.get(index) {
                    Some(value) => frame.suspend_at(frame.resume_point + 1, Suspend::Yield(value.clone())),
                    None => Ok(Suspend::Complete(Value::Undefined)),
                }
            },
        )
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn status(&self) -> CoroutineStatus {
        self.inner.borrow().status
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Generator) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// `gen.next(value)`
    pub fn next(&self, value: Value) -> Result<IteratorResult> {
        self.resume(Resume::Next(value))
    }

    /// `gen.return(value)`
    pub fn r#return(&self, value: Value) -> Result<IteratorResult> {
        self.resume(Resume::Return(value))
    }

    /// `gen.throw(exception)`. On a completed generator the exception is
    /// rethrown rather than ignored.
    pub fn throw(&self, exception: Value) -> Result<IteratorResult> {
        self.resume(Resume::Throw(exception))
    }

    /// Resume with an arbitrary completion.
    ///
    /// Fails with [`Error::AlreadyRunning`] when called from inside the
    /// generator's own body.
    pub fn resume(&self, input: Resume) -> Result<IteratorResult> {
        let status = self.status();
        match status {
            CoroutineStatus::Executing => Err(Error::AlreadyRunning("generator")),
            CoroutineStatus::Completed => match input {
                Resume::Next(_) => Ok(IteratorResult::done(Value::Undefined)),
                Resume::Return(value) => Ok(IteratorResult::done(value)),
                Resume::Throw(exception) => Err(Error::Thrown(exception)),
            },
            CoroutineStatus::SuspendedStart => match input {
                Resume::Next(_) => self.drive(Resume::Next(Value::Undefined)),
                Resume::Return(value) => {
                    self.complete();
                    Ok(IteratorResult::done(value))
                }
                Resume::Throw(exception) => {
                    self.complete();
                    Err(Error::Thrown(exception))
                }
            },
            CoroutineStatus::SuspendedYield => self.drive(input),
        }
    }

    /// Drain the generator, collecting every yielded value
    pub fn collect_values(&self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        loop {
            let result = self.next(Value::Undefined)?;
            if result.done {
                return Ok(values);
            }
            values.push(result.value);
        }
    }

    fn drive(&self, mut input: Resume) -> Result<IteratorResult> {
        self.set_status(CoroutineStatus::Executing);
        loop {
            let delegate = self.inner.borrow_mut().delegate.take();
            if let Some(mut iterator) = delegate {
                match Self::delegate_step(&mut iterator, input) {
                    DelegateStep::Yielded(value) => {
                        let mut inner = self.inner.borrow_mut();
                        inner.delegate = Some(iterator);
                        inner.status = CoroutineStatus::SuspendedYield;
                        return Ok(IteratorResult::yielded(value));
                    }
                    DelegateStep::Resume(next) => input = next,
                }
            }

            match self.run_body(input) {
                Ok(Suspend::Yield(value)) => {
                    self.set_status(CoroutineStatus::SuspendedYield);
                    return Ok(IteratorResult::yielded(value));
                }
                Ok(Suspend::Complete(value)) => {
                    self.complete();
                    return Ok(IteratorResult::done(value));
                }
                Ok(Suspend::Delegate(iterable)) => match get_iterator(&iterable) {
                    Ok(iterator) => {
                        self.inner.borrow_mut().delegate = Some(iterator);
                        input = Resume::Next(Value::Undefined);
                    }
                    Err(e) => input = Resume::Throw(e.into_value()),
                },
                Ok(Suspend::Await(_)) => {
                    self.complete();
                    return Err(Error::type_error(messages::AWAIT_OUTSIDE_ASYNC));
                }
                Err(e) => {
                    self.complete();
                    return Err(e);
                }
            }
        }
    }

    fn run_body(&self, input: Resume) -> Result<Suspend> {
        let taken = self.inner.borrow_mut().continuation.take();
        let Some((mut body, mut frame)) = taken else {
            return Ok(Suspend::Complete(Value::Undefined));
        };
        trace!(generator = %self.name(), resume_point = frame.resume_point, "resuming generator");
        let outcome = body.resume(&mut frame, input);
        self.inner.borrow_mut().continuation.restore(body, frame);
        outcome
    }

    /// Forward one completion to the inner iterator of a `yield*`
    fn delegate_step(iterator: &mut IteratorRecord, input: Resume) -> DelegateStep {
        match input {
            Resume::Next(value) => match iterator.next(value) {
                Ok(result) if result.done => DelegateStep::Resume(Resume::Next(result.value)),
                Ok(result) => DelegateStep::Yielded(result.value),
                Err(e) => DelegateStep::Resume(Resume::Throw(e.into_value())),
            },
            Resume::Throw(exception) => match iterator.throw(exception) {
                Some(Ok(result)) if result.done => DelegateStep::Resume(Resume::Next(result.value)),
                Some(Ok(result)) => DelegateStep::Yielded(result.value),
                Some(Err(e)) => DelegateStep::Resume(Resume::Throw(e.into_value())),
                None => {
                    // No `throw` method: close the inner iterator, then fail the delegation.
                    if let Err(e) = iterator.close() {
                        return DelegateStep::Resume(Resume::Throw(e.into_value()));
                    }
                    DelegateStep::Resume(Resume::Throw(Value::error(
                        ErrorKind::TypeError,
                        messages::ITERATOR_NO_THROW,
                    )))
                }
            },
            Resume::Return(value) => match iterator.r#return(value.clone()) {
                None => DelegateStep::Resume(Resume::Return(value)),
                Some(Ok(result)) if result.done => DelegateStep::Resume(Resume::Return(result.value)),
                Some(Ok(result)) => DelegateStep::Yielded(result.value),
                Some(Err(e)) => DelegateStep::Resume(Resume::Throw(e.into_value())),
            },
        }
    }

    fn set_status(&self, status: CoroutineStatus) {
        self.inner.borrow_mut().status = status;
    }

    fn complete(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.status = CoroutineStatus::Completed;
        inner.delegate = None;
        inner.continuation.discard();
        trace!(generator = %inner.name, "generator completed");
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Generator")
                .field("name", &inner.name)
                .field("status", &inner.status)
                .field("resume_point", &inner.continuation.resume_point())
                .finish(),
            Err(_) => f.debug_struct("Generator").finish_non_exhaustive(),
        }
    }
}

/// An iterator obtained from an iterable value
#[derive(Debug)]
pub enum IteratorRecord {
    Generator(Generator),
    /// Snapshot of an array or the characters of a string
    List { values: Vec<Value>, index: usize },
    /// An object with a callable `next`; `return` and `throw` are looked up on demand
    Object { object: Value, next: Function },
}

impl IteratorRecord {
    pub fn next(&mut self, value: Value) -> Result<IteratorResult> {
        match self {
            IteratorRecord::Generator(generator) => generator.next(value),
            IteratorRecord::List { values, index } => match values.get(*index) {
                Some(item) => {
                    *index += 1;
                    Ok(IteratorResult::yielded(item.clone()))
                }
                None => Ok(IteratorResult::done(Value::Undefined)),
            },
            IteratorRecord::Object { next, .. } => {
                let result = next.call(&[value])?;
                IteratorResult::from_value(&result)
            }
        }
    }

    /// Call the iterator's `return`, or `None` if it has none
    pub fn r#return(&mut self, value: Value) -> Option<Result<IteratorResult>> {
        match self {
            IteratorRecord::Generator(generator) => Some(generator.r#return(value)),
            IteratorRecord::List { .. } => None,
            IteratorRecord::Object { object, .. } => Self::invoke(object, "return", value),
        }
    }

    /// Call the iterator's `throw`, or `None` if it has none
    pub fn throw(&mut self, exception: Value) -> Option<Result<IteratorResult>> {
        match self {
            IteratorRecord::Generator(generator) => Some(generator.throw(exception)),
            IteratorRecord::List { .. } => None,
            IteratorRecord::Object { object, .. } => Self::invoke(object, "throw", exception),
        }
    }

    /// `IteratorClose`: call `return()` if present
    pub fn close(&mut self) -> Result<()> {
        match self.r#return(Value::Undefined) {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    fn invoke(object: &Value, method: &str, argument: Value) -> Option<Result<IteratorResult>> {
        match object.get_property(method) {
            Some(Value::Function(f)) => Some(
                f.call(&[argument])
                    .and_then(|result| IteratorResult::from_value(&result)),
            ),
            _ => None,
        }
    }
}

/// `GetIterator(value)` for the iterables this runtime knows about
pub fn get_iterator(value: &Value) -> Result<IteratorRecord> {
    match value {
        Value::Generator(generator) => Ok(IteratorRecord::Generator(generator.clone())),
        Value::Array(items) => Ok(IteratorRecord::List {
            values: items.borrow().clone(),
            index: 0,
        }),
        Value::String(s) => Ok(IteratorRecord::List {
            values: s.chars().map(|c| Value::String(c.to_string())).collect(),
            index: 0,
        }),
        Value::Object(_) => match value.get_property("next") {
            Some(Value::Function(next)) => Ok(IteratorRecord::Object {
                object: value.clone(),
                next,
            }),
            _ => Err(not_iterable(value)),
        },
        _ => Err(not_iterable(value)),
    }
}

fn not_iterable(value: &Value) -> Error {
    Error::type_error(messages::not_iterable(&value.to_js_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_values() {
        let gen = Generator::from_values(vec![Value::from(1), Value::from(2)]);
        assert_eq!(gen.status(), CoroutineStatus::SuspendedStart);
        assert_eq!(
            gen.collect_values().unwrap(),
            vec![Value::from(1), Value::from(2)]
        );
        assert_eq!(gen.status(), CoroutineStatus::Completed);
    }

    #[test]
    fn test_completed_generator_behaviour() {
        let gen = Generator::from_values(Vec::new());
        assert!(gen.next(Value::Undefined).unwrap().done);
        assert_eq!(
            gen.r#return(Value::from(3)).unwrap(),
            IteratorResult::done(Value::from(3))
        );
        let err = gen.throw(Value::from("late")).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("late")));
    }

    #[test]
    fn test_return_before_start_skips_body() {
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let gen = Generator::new(move |_: &mut Frame, _: Resume| -> Result<Suspend> {
            *flag.borrow_mut() = true;
            Ok(Suspend::Complete(Value::Undefined))
        });
        assert_eq!(
            gen.r#return(Value::from(9)).unwrap(),
            IteratorResult::done(Value::from(9))
        );
        assert!(!*ran.borrow());
        assert_eq!(gen.status(), CoroutineStatus::Completed);
    }

    #[test]
    fn test_await_in_sync_generator_is_type_error() {
        let gen = Generator::new(|_: &mut Frame, _: Resume| -> Result<Suspend> {
            Ok(Suspend::Await(Value::from(1)))
        });
        let err = gen.next(Value::Undefined).unwrap_err();
        assert!(matches!(err, Error::RuntimeError { kind: ErrorKind::TypeError, .. }));
        assert_eq!(gen.status(), CoroutineStatus::Completed);
    }

    #[test]
    fn test_get_iterator_string() {
        let mut iterator = get_iterator(&Value::from("ab")).unwrap();
        assert_eq!(iterator.next(Value::Undefined).unwrap().value, Value::from("a"));
        assert_eq!(iterator.next(Value::Undefined).unwrap().value, Value::from("b"));
        assert!(iterator.next(Value::Undefined).unwrap().done);
    }

    #[test]
    fn test_get_iterator_rejects_numbers() {
        let err = get_iterator(&Value::from(5)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 5 is not iterable");
    }
}
