//! Promise combinators: `all`, `race`, `any`, `allSettled`, `withResolvers`
//!
//! Every input is passed through `Promise.resolve` first, so plain values
//! and foreign thenables are accepted. Results keep input order regardless
//! of settlement order.

use super::{Promise, ResolvingFunctions};
use crate::error::messages;
use crate::event_loop::EventLoop;
use crate::value::{first_arg, Function, Value};
use rustc_hash::FxHashMap as HashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Result of `Promise.withResolvers()`
#[derive(Debug, Clone)]
pub struct PromiseWithResolvers {
    pub promise: Promise,
    pub resolve: Function,
    pub reject: Function,
}

impl PromiseWithResolvers {
    /// Materialize as a `{ promise, resolve, reject }` object
    pub fn to_value(&self) -> Value {
        let mut props = HashMap::default();
        props.insert("promise".to_string(), Value::Promise(self.promise.clone()));
        props.insert("resolve".to_string(), Value::Function(self.resolve.clone()));
        props.insert("reject".to_string(), Value::Function(self.reject.clone()));
        Value::new_object_with_properties(props)
    }
}

/// Shared bookkeeping for `all`, `any` and `allSettled`
struct Collector {
    values: RefCell<Vec<Value>>,
    /// Starts at 1 so the combinator cannot finish while still iterating
    remaining: Cell<usize>,
}

impl Collector {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            values: RefCell::new(Vec::new()),
            remaining: Cell::new(1),
        })
    }

    /// Reserve a slot for the next input, returning its index
    fn reserve(&self) -> usize {
        let mut values = self.values.borrow_mut();
        values.push(Value::Undefined);
        self.remaining.set(self.remaining.get() + 1);
        values.len() - 1
    }

    /// Store a result; returns the full list once every slot is filled
    fn store(&self, index: usize, value: Value) -> Option<Vec<Value>> {
        self.values.borrow_mut()[index] = value;
        self.finish_one()
    }

    fn finish_one(&self) -> Option<Vec<Value>> {
        self.remaining.set(self.remaining.get() - 1);
        if self.remaining.get() == 0 {
            Some(self.values.borrow().clone())
        } else {
            None
        }
    }
}

fn settled_record(status: &str, key: &str, value: Value) -> Value {
    let mut props = HashMap::default();
    props.insert("status".to_string(), Value::from(status));
    props.insert(key.to_string(), value);
    Value::new_object_with_properties(props)
}

impl Promise {
    /// `Promise.all(iterable)`
    ///
    /// Fulfills with the array of results in input order once every input
    /// fulfills; rejects with the first rejection reason. An empty input
    /// fulfills with an empty array.
    pub fn all<I>(event_loop: &EventLoop, values: I) -> Promise
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let capability = ResolvingFunctions::new(Promise::pending_in(&handle));
        let collector = Collector::new();

        for value in values {
            let index = collector.reserve();
            let on_fulfilled = {
                let collector = collector.clone();
                let capability = capability.clone();
                let already_called = Cell::new(false);
                Function::new("resolveElement", move |args| {
                    if already_called.replace(true) {
                        return Ok(Value::Undefined);
                    }
                    if let Some(results) = collector.store(index, first_arg(args)) {
                        capability.resolve(Value::new_array(results));
                    }
                    Ok(Value::Undefined)
                })
            };
            Promise::resolve_in(&handle, value)
                .then(Some(on_fulfilled), Some(capability.reject_function()));
        }

        if let Some(results) = collector.finish_one() {
            capability.resolve(Value::new_array(results));
        }
        capability.promise
    }

    /// `Promise.race(iterable)`
    ///
    /// Settles like the first input to settle. An empty input stays pending
    /// forever.
    pub fn race<I>(event_loop: &EventLoop, values: I) -> Promise
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let capability = ResolvingFunctions::new(Promise::pending_in(&handle));
        for value in values {
            Promise::resolve_in(&handle, value).then(
                Some(capability.resolve_function()),
                Some(capability.reject_function()),
            );
        }
        capability.promise
    }

    /// `Promise.any(iterable)`
    ///
    /// Fulfills with the first fulfillment. If every input rejects, rejects
    /// with an `AggregateError` whose `errors` are the reasons in input
    /// order. An empty input rejects immediately.
    pub fn any<I>(event_loop: &EventLoop, values: I) -> Promise
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let capability = ResolvingFunctions::new(Promise::pending_in(&handle));
        let collector = Collector::new();

        for value in values {
            let index = collector.reserve();
            let on_rejected = {
                let collector = collector.clone();
                let capability = capability.clone();
                let already_called = Cell::new(false);
                Function::new("rejectElement", move |args| {
                    if already_called.replace(true) {
                        return Ok(Value::Undefined);
                    }
                    if let Some(errors) = collector.store(index, first_arg(args)) {
                        capability.reject(aggregate(errors));
                    }
                    Ok(Value::Undefined)
                })
            };
            Promise::resolve_in(&handle, value)
                .then(Some(capability.resolve_function()), Some(on_rejected));
        }

        if let Some(errors) = collector.finish_one() {
            capability.reject(aggregate(errors));
        }
        capability.promise
    }

    /// `Promise.allSettled(iterable)`
    ///
    /// Fulfills once every input settles with `{ status: "fulfilled", value }`
    /// or `{ status: "rejected", reason }` records in input order. Never
    /// rejects.
    pub fn all_settled<I>(event_loop: &EventLoop, values: I) -> Promise
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let capability = ResolvingFunctions::new(Promise::pending_in(&handle));
        let collector = Collector::new();

        for value in values {
            let index = collector.reserve();
            let already_called = Rc::new(Cell::new(false));
            let on_fulfilled = settle_element(
                &collector,
                &capability,
                &already_called,
                index,
                "fulfilled",
                "value",
            );
            let on_rejected = settle_element(
                &collector,
                &capability,
                &already_called,
                index,
                "rejected",
                "reason",
            );
            Promise::resolve_in(&handle, value).then(Some(on_fulfilled), Some(on_rejected));
        }

        if let Some(results) = collector.finish_one() {
            capability.resolve(Value::new_array(results));
        }
        capability.promise
    }

    /// `Promise.withResolvers()`
    pub fn with_resolvers(event_loop: &EventLoop) -> PromiseWithResolvers {
        let functions = Promise::deferred(event_loop);
        PromiseWithResolvers {
            resolve: functions.resolve_function(),
            reject: functions.reject_function(),
            promise: functions.promise,
        }
    }
}

fn aggregate(errors: Vec<Value>) -> Value {
    Value::aggregate_error(errors, messages::ALL_PROMISES_REJECTED)
}

fn settle_element(
    collector: &Rc<Collector>,
    capability: &ResolvingFunctions,
    already_called: &Rc<Cell<bool>>,
    index: usize,
    status: &'static str,
    key: &'static str,
) -> Function {
    let collector = collector.clone();
    let capability = capability.clone();
    let already_called = already_called.clone();
    Function::new("settleElement", move |args| {
        if already_called.replace(true) {
            return Ok(Value::Undefined);
        }
        let record = settled_record(status, key, first_arg(args));
        if let Some(results) = collector.store(index, record) {
            capability.resolve(Value::new_array(results));
        }
        Ok(Value::Undefined)
    })
}
