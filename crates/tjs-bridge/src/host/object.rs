//! Host object model
//!
//! Everything the host library exposes is either a plain value or an
//! object implementing [`HostObject`]. Objects advertise what the guest
//! may do with them through a [`Capabilities`] set; the proxy layer
//! checks it before dispatching.

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{HostError, HostResult};
use crate::marshal::TypedBuffer;

/// Shared reference to a host object
pub type HostRef = Arc<dyn HostObject>;

/// Pending host computation
pub type HostFuture = BoxFuture<'static, HostResult<HostValue>>;

/// Host callback for native functions
pub type HostCallback = Arc<dyn Fn(Vec<HostValue>) -> HostResult<HostReturn> + Send + Sync>;

/// Operations a host object supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Get,
    Set,
    Call,
    Construct,
    Index,
    Iterate,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Get => write!(f, "get"),
            Capability::Set => write!(f, "set"),
            Capability::Call => write!(f, "call"),
            Capability::Construct => write!(f, "construct"),
            Capability::Index => write!(f, "index"),
            Capability::Iterate => write!(f, "iterate"),
        }
    }
}

/// Set of [`Capability`] flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(Vec<Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().fold(Self::new(), |set, cap| set.with(*cap))
    }

    pub fn with(mut self, cap: Capability) -> Self {
        if !self.0.contains(&cap) {
            self.0.push(cap);
        }
        self
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

/// Subscript used for `obj[key]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Int(i64),
    Key(String),
    /// Half-open range with step 1; missing bounds cover the whole axis
    Range {
        start: Option<i64>,
        end: Option<i64>,
    },
    /// One entry per axis
    Tuple(Vec<IndexKey>),
}

impl IndexKey {
    pub fn range(start: Option<i64>, end: Option<i64>) -> Self {
        IndexKey::Range { start, end }
    }

    pub fn full() -> Self {
        IndexKey::Range {
            start: None,
            end: None,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Int(i) => write!(f, "{}", i),
            IndexKey::Key(k) => write!(f, "'{}'", k),
            IndexKey::Range { start, end } => {
                if let Some(s) = start {
                    write!(f, "{}", s)?;
                }
                write!(f, ":")?;
                if let Some(e) = end {
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
            IndexKey::Tuple(keys) => {
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", key)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for IndexKey {
    fn from(i: i64) -> Self {
        IndexKey::Int(i)
    }
}

impl From<i32> for IndexKey {
    fn from(i: i32) -> Self {
        IndexKey::Int(i as i64)
    }
}

impl From<&str> for IndexKey {
    fn from(key: &str) -> Self {
        IndexKey::Key(key.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(key: String) -> Self {
        IndexKey::Key(key)
    }
}

impl From<std::ops::Range<i64>> for IndexKey {
    fn from(r: std::ops::Range<i64>) -> Self {
        IndexKey::range(Some(r.start), Some(r.end))
    }
}

impl From<std::ops::RangeFrom<i64>> for IndexKey {
    fn from(r: std::ops::RangeFrom<i64>) -> Self {
        IndexKey::range(Some(r.start), None)
    }
}

impl From<std::ops::RangeTo<i64>> for IndexKey {
    fn from(r: std::ops::RangeTo<i64>) -> Self {
        IndexKey::range(None, Some(r.end))
    }
}

impl From<std::ops::RangeFull> for IndexKey {
    fn from(_: std::ops::RangeFull) -> Self {
        IndexKey::full()
    }
}

impl From<Vec<IndexKey>> for IndexKey {
    fn from(keys: Vec<IndexKey>) -> Self {
        IndexKey::Tuple(keys)
    }
}

/// Value as seen by the host runtime
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Exact 64-bit integer, as read from int64 and uint64 tensors
    BigInt(i64),
    String(String),
    Array(Vec<HostValue>),
    /// Plain record; member order is kept
    Record(Vec<(String, HostValue)>),
    TypedArray(TypedBuffer),
    Object(HostRef),
}

impl HostValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::BigInt(_) => "bigint",
            HostValue::String(_) => "string",
            HostValue::Array(_) => "array",
            HostValue::Record(_) => "record",
            HostValue::TypedArray(_) => "typed array",
            HostValue::Object(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            HostValue::BigInt(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostRef> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Downcast an object value to a concrete host type
    pub fn downcast<T: HostObject>(&self) -> Option<&T> {
        self.as_object()
            .and_then(|obj| obj.as_any().downcast_ref::<T>())
    }

    /// Member of a record value
    pub fn field(&self, name: &str) -> Option<&HostValue> {
        match self {
            HostValue::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Numbers of an array or typed array
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            HostValue::Array(items) => items.iter().map(HostValue::as_f64).collect(),
            HostValue::TypedArray(buffer) => Some(buffer.to_f64_vec()),
            _ => None,
        }
    }

    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        HostValue::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn object<T: HostObject>(object: T) -> Self {
        HostValue::Object(Arc::new(object))
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => write!(f, "undefined"),
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Number(n) => write!(f, "{}", n),
            HostValue::BigInt(n) => write!(f, "{}n", n),
            HostValue::String(s) => write!(f, "{:?}", s),
            HostValue::Array(items) => f.debug_list().entries(items).finish(),
            HostValue::Record(fields) => f
                .debug_map()
                .entries(fields.iter().map(|(k, v)| (k, v)))
                .finish(),
            HostValue::TypedArray(buffer) => write!(f, "{:?}", buffer),
            HostValue::Object(obj) => write!(f, "[object {}]", obj.class_name()),
        }
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Number(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

/// Result of invoking a host function
pub enum HostReturn {
    /// Completed synchronously
    Value(HostValue),
    /// Completes later; the async bridge drives it
    Deferred(HostFuture),
}

impl HostReturn {
    pub fn deferred<F>(future: F) -> Self
    where
        F: std::future::Future<Output = HostResult<HostValue>> + Send + 'static,
    {
        HostReturn::Deferred(Box::pin(future))
    }
}

/// An object living in the host runtime
///
/// Every default method reports the operation as unsupported, so
/// implementors only override what their [`Capabilities`] advertise.
pub trait HostObject: Send + Sync + 'static {
    fn class_name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn get(&self, name: &str) -> HostResult<HostValue> {
        Err(HostError::missing(self.class_name(), name))
    }

    fn set(&self, name: &str, _value: HostValue) -> HostResult<()> {
        Err(HostError::type_error(format!(
            "Cannot assign to property '{}' of {}",
            name,
            self.class_name()
        )))
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn call(&self, _args: Vec<HostValue>) -> HostResult<HostReturn> {
        Err(HostError::type_error(format!("{} is not a function", self.class_name())))
    }

    /// Call a method by name
    ///
    /// Defaults to reading the member and calling it.
    fn invoke(&self, method: &str, args: Vec<HostValue>) -> HostResult<HostReturn> {
        match self.get(method)? {
            HostValue::Object(function) => function.call(args),
            _ => Err(HostError::type_error(format!(
                "{}.{} is not a function",
                self.class_name(),
                method
            ))),
        }
    }

    fn construct(&self, _args: Vec<HostValue>) -> HostResult<HostValue> {
        Err(HostError::type_error(format!("{} is not a constructor", self.class_name())))
    }

    fn index(&self, key: &IndexKey) -> HostResult<HostValue> {
        Err(HostError::type_error(format!(
            "{} cannot be indexed with [{}]",
            self.class_name(),
            key
        )))
    }

    fn set_item(&self, key: &IndexKey, _value: HostValue) -> HostResult<()> {
        Err(HostError::type_error(format!(
            "{} does not support item assignment [{}]",
            self.class_name(),
            key
        )))
    }

    fn iterate(&self) -> HostResult<Vec<HostValue>> {
        Err(HostError::type_error(format!("{} is not iterable", self.class_name())))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Mutable object with ordered members
pub struct PlainObject {
    class: String,
    members: RwLock<Vec<(String, HostValue)>>,
}

impl PlainObject {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            members: RwLock::new(Vec::new()),
        }
    }

    pub fn with_member(self, name: &str, value: HostValue) -> Self {
        self.members.write().push((name.to_string(), value));
        self
    }

    pub fn member(&self, name: &str) -> Option<HostValue> {
        self.members
            .read()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, name: &str, value: HostValue) {
        let mut members = self.members.write();
        match members.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => members.push((name.to_string(), value)),
        }
    }
}

impl HostObject for PlainObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[
            Capability::Get,
            Capability::Set,
            Capability::Index,
            Capability::Iterate,
        ])
    }

    fn get(&self, name: &str) -> HostResult<HostValue> {
        Ok(self.member(name).unwrap_or(HostValue::Undefined))
    }

    fn set(&self, name: &str, value: HostValue) -> HostResult<()> {
        self.insert(name, value);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.members.read().iter().map(|(k, _)| k.clone()).collect()
    }

    fn index(&self, key: &IndexKey) -> HostResult<HostValue> {
        match key {
            IndexKey::Key(name) => self.get(name),
            other => Err(HostError::type_error(format!(
                "{} members are indexed by name, got [{}]",
                self.class, other
            ))),
        }
    }

    fn set_item(&self, key: &IndexKey, value: HostValue) -> HostResult<()> {
        match key {
            IndexKey::Key(name) => self.set(name, value),
            other => Err(HostError::type_error(format!(
                "{} members are indexed by name, got [{}]",
                self.class, other
            ))),
        }
    }

    fn iterate(&self) -> HostResult<Vec<HostValue>> {
        Ok(self.keys().into_iter().map(HostValue::String).collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host function backed by a Rust closure
pub struct NativeFunction {
    name: String,
    callback: HostCallback,
}

impl NativeFunction {
    pub fn new<F>(name: &str, callback: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> HostResult<HostReturn> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            callback: Arc::new(callback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl HostObject for NativeFunction {
    fn class_name(&self) -> &str {
        "Function"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Capability::Get, Capability::Call])
    }

    fn get(&self, name: &str) -> HostResult<HostValue> {
        match name {
            "name" => Ok(HostValue::String(self.name.clone())),
            _ => Ok(HostValue::Undefined),
        }
    }

    fn keys(&self) -> Vec<String> {
        vec!["name".to_string()]
    }

    fn call(&self, args: Vec<HostValue>) -> HostResult<HostReturn> {
        (self.callback)(args)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Positional argument helper for host functions
pub(crate) fn arg(args: &[HostValue], index: usize) -> &HostValue {
    static UNDEFINED: HostValue = HostValue::Undefined;
    args.get(index).unwrap_or(&UNDEFINED)
}
