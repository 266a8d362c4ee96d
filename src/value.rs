//! Value representation
//!
//! The engine treats values as opaque except where the async protocols need
//! to look inside them: promises, generators, `then`-able objects, iterator
//! result objects and error objects. Hosts embed their own values through
//! plain objects and native [`Function`]s.

use crate::coroutine::{AsyncGenerator, Generator};
use crate::error::{ErrorKind, Result};
use crate::promise::Promise;
use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Type alias for native function implementations
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// A host callable. Calling it is the `invoke(callable, args)` hook: an
/// `Err` return is a thrown exception.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    func: NativeFn,
}

impl Function {
    /// Wrap a closure as a callable value
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    /// Function name (may be empty for anonymous functions)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function with the given arguments
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// A plain object: a bag of named properties
#[derive(Debug, Clone, Default)]
pub struct Object {
    pub properties: HashMap<String, Value>,
}

/// An error object (`TypeError`, `AggregateError`, ...)
#[derive(Debug, Clone)]
pub struct ErrorObject {
    pub kind: ErrorKind,
    pub message: String,
    /// Wrapped errors, in input order. Only populated for `AggregateError`.
    pub errors: Vec<Value>,
}

/// A JavaScript value
#[derive(Debug, Clone)]
pub enum Value {
    /// undefined
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Array
    Array(Rc<RefCell<Vec<Value>>>),
    /// Ordinary object
    Object(Rc<RefCell<Object>>),
    /// Callable
    Function(Function),
    /// Error object
    Error(Rc<ErrorObject>),
    /// Promise
    Promise(Promise),
    /// Generator object
    Generator(Generator),
    /// Async generator object
    AsyncGenerator(AsyncGenerator),
}

impl Value {
    /// Create a new empty object
    pub fn new_object() -> Value {
        Value::Object(Rc::new(RefCell::new(Object::default())))
    }

    /// Create an object with the given properties
    pub fn new_object_with_properties(properties: HashMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(Object { properties })))
    }

    /// Create an array
    pub fn new_array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    /// Create an error object
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Value {
        Value::Error(Rc::new(ErrorObject {
            kind,
            message: message.into(),
            errors: Vec::new(),
        }))
    }

    /// Create an `AggregateError` wrapping `errors`
    pub fn aggregate_error(errors: Vec<Value>, message: impl Into<String>) -> Value {
        Value::Error(Rc::new(ErrorObject {
            kind: ErrorKind::AggregateError,
            message: message.into(),
            errors,
        }))
    }

    /// Wrap a closure as a function value
    pub fn function<F>(name: &str, func: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Value::Function(Function::new(name, func))
    }

    /// Check if value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if value is null or undefined
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Check if value can be called
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Check if value is an object in the language sense (not a primitive)
    pub fn is_object(&self) -> bool {
        !matches!(
            self,
            Value::Undefined | Value::Null | Value::Boolean(_) | Value::Number(_) | Value::String(_)
        )
    }

    /// Callable view of this value
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Promise view of this value
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Number view of this value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert to boolean (truthiness)
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Convert to JavaScript string representation
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(true) => "true".to_string(),
            Value::Boolean(false) => "false".to_string(),
            Value::Number(n) => {
                if n.is_nan() {
                    "NaN".to_string()
                } else if n.is_infinite() {
                    if *n > 0.0 {
                        "Infinity".to_string()
                    } else {
                        "-Infinity".to_string()
                    }
                } else if *n == 0.0 {
                    "0".to_string()
                } else {
                    format!("{}", n)
                }
            }
            Value::String(s) => s.clone(),
            Value::Array(items) => {
                let elements: Vec<String> = items.borrow().iter().map(|v| v.to_js_string()).collect();
                elements.join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(f) => format!("function {}() {{ [native code] }}", f.name()),
            Value::Error(e) => {
                if e.message.is_empty() {
                    e.kind.to_string()
                } else {
                    format!("{}: {}", e.kind, e.message)
                }
            }
            Value::Promise(_) => "[object Promise]".to_string(),
            Value::Generator(_) => "[object Generator]".to_string(),
            Value::AsyncGenerator(_) => "[object AsyncGenerator]".to_string(),
        }
    }

    /// Get the typeof string
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            _ => "object",
        }
    }

    /// Strict equality (===)
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Generator(a), Value::Generator(b)) => a.ptr_eq(b),
            (Value::AsyncGenerator(a), Value::AsyncGenerator(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Read a named property. Missing properties read as `undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.get_property(key).unwrap_or(Value::Undefined)
    }

    /// Read a named property if present
    pub fn get_property(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(obj) => obj.borrow().properties.get(key).cloned(),
            Value::Array(items) => match key {
                "length" => Some(Value::Number(items.borrow().len() as f64)),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.borrow().get(i).cloned()),
            },
            Value::String(s) if key == "length" => Some(Value::Number(s.chars().count() as f64)),
            Value::Error(e) => match key {
                "name" => Some(Value::String(e.kind.to_string())),
                "message" => Some(Value::String(e.message.clone())),
                "errors" if e.kind == ErrorKind::AggregateError => {
                    Some(Value::new_array(e.errors.clone()))
                }
                _ => None,
            },
            Value::Function(f) if key == "name" => Some(Value::String(f.name().to_string())),
            _ => None,
        }
    }

    /// Set a property on an object. Returns false for non-objects.
    pub fn set_property(&self, key: &str, value: Value) -> bool {
        match self {
            Value::Object(obj) => {
                obj.borrow_mut().properties.insert(key.to_string(), value);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the elements of an array value
    pub fn array_elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }
}

/// Structural equality, used by embeddings and tests to compare results.
/// Arrays, plain objects and error objects compare by contents; promises,
/// functions and generators by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || a.borrow().properties == b.borrow().properties
            }
            (Value::Error(a), Value::Error(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.kind == b.kind && a.message == b.message && a.errors == b.errors)
            }
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_js_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(elements: Vec<Value>) -> Self {
        Value::new_array(elements)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<Generator> for Value {
    fn from(g: Generator) -> Self {
        Value::Generator(g)
    }
}

impl From<AsyncGenerator> for Value {
    fn from(g: AsyncGenerator) -> Self {
        Value::AsyncGenerator(g)
    }
}

/// The `{ value, done }` pair produced by iterators
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorResult {
    pub value: Value,
    pub done: bool,
}

impl IteratorResult {
    /// A produced value
    pub fn yielded(value: Value) -> Self {
        Self { value, done: false }
    }

    /// The final result of a finished iterator
    pub fn done(value: Value) -> Self {
        Self { value, done: true }
    }

    /// Materialize as a `{ value, done }` object
    pub fn to_value(&self) -> Value {
        create_iterator_result(self.value.clone(), self.done)
    }

    /// Destructure a `{ value, done }` object
    pub fn from_value(result: &Value) -> Result<Self> {
        if !result.is_object() {
            return Err(crate::Error::type_error(format!(
                "{}: {}",
                crate::error::messages::ITERATOR_RESULT_NOT_OBJECT,
                result.to_js_string()
            )));
        }
        Ok(Self {
            value: result.get("value"),
            done: result.get("done").to_boolean(),
        })
    }
}

/// First argument of a native call, `undefined` when absent
pub fn first_arg(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Undefined)
}

/// Create an IteratorResult object { value, done }
pub fn create_iterator_result(value: Value, done: bool) -> Value {
    let mut props = HashMap::default();
    props.insert("value".to_string(), value);
    props.insert("done".to_string(), Value::Boolean(done));
    Value::new_object_with_properties(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(Value::from(3).to_js_string(), "3");
        assert_eq!(Value::from(2.5).to_js_string(), "2.5");
        assert_eq!(Value::Number(f64::NAN).to_js_string(), "NaN");
    }

    #[test]
    fn test_structural_equality() {
        let a = Value::new_array(vec![Value::from(1), Value::from("x")]);
        let b = Value::new_array(vec![Value::from(1), Value::from("x")]);
        assert_eq!(a, b);
        assert!(!a.strict_equals(&b));
    }

    #[test]
    fn test_iterator_result_round_trip() {
        let obj = create_iterator_result(Value::from(7), false);
        let result = IteratorResult::from_value(&obj).unwrap();
        assert_eq!(result, IteratorResult::yielded(Value::from(7)));
    }

    #[test]
    fn test_iterator_result_rejects_primitives() {
        assert!(IteratorResult::from_value(&Value::from(1)).is_err());
    }

    #[test]
    fn test_aggregate_error_properties() {
        let err = Value::aggregate_error(vec![Value::from("a"), Value::from("b")], "all failed");
        assert_eq!(err.get("name"), Value::from("AggregateError"));
        assert_eq!(
            err.get("errors"),
            Value::new_array(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[test]
    fn test_function_call() {
        let f = Function::new("double", |args| {
            let n = args.first().and_then(Value::as_number).unwrap_or(0.0);
            Ok(Value::Number(n * 2.0))
        });
        assert_eq!(f.call(&[Value::from(21)]).unwrap(), Value::from(42));
        assert_eq!(f.name(), "double");
    }
}
