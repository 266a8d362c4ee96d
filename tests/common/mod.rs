//! Shared test helpers for integration tests

use mercury::prelude::*;
use mercury::value::first_arg;
use std::cell::RefCell;
use std::rc::Rc;

/// Route `tracing` output through the test harness. Set `RUST_LOG=mercury=trace`
/// to see scheduler activity for a failing test.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh event loop with logging set up
#[allow(dead_code)]
pub fn new_loop() -> EventLoop {
    init_tracing();
    EventLoop::new()
}

/// Ordered record of observable side effects
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

#[allow(dead_code)]
impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// A handler that records `tag` and returns its argument unchanged
    pub fn recorder(&self, tag: &str) -> Function {
        let log = self.clone();
        let tag = tag.to_string();
        Function::new(&tag.clone(), move |args| {
            log.push(tag.clone());
            Ok(first_arg(args))
        })
    }

    /// A handler that records `tag:value` and returns its argument unchanged
    pub fn value_recorder(&self, tag: &str) -> Function {
        let log = self.clone();
        let tag = tag.to_string();
        Function::new(&tag.clone(), move |args| {
            let value = first_arg(args);
            log.push(format!("{}:{}", tag, value));
            Ok(value)
        })
    }

    /// A host callback that records `tag`, for the event loop queues
    pub fn task(&self, tag: &str) -> impl FnOnce() -> Result<()> + 'static {
        let log = self.clone();
        let tag = tag.to_string();
        move || {
            log.push(tag);
            Ok(())
        }
    }
}

/// Wrap a one-argument closure as a handler function
#[allow(dead_code)]
pub fn handler<F>(f: F) -> Function
where
    F: Fn(Value) -> Result<Value> + 'static,
{
    Function::new("handler", move |args| f(first_arg(args)))
}

/// Strings to `Vec<String>`, for comparing against a [`Log`]
#[allow(dead_code)]
pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
