//! Dynamic value model shared by both sides of a connection.
//!
//! A service is a tree of [`Value`]s: plain data, [`Object`]s whose members
//! may be functions or other objects, and [`Function`]s. The same type is used
//! for call arguments and for decoded results, where live handles appear as
//! [`Value::Remote`].

use crate::config::ProtocolConfig;
use crate::error::{Result, RpcError};
use crate::proxy::Proxy;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// A native value: data, an object, a function, or a handle to a remote object.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    Function(Function),
    Remote(Proxy),
}

impl Value {
    /// Wrap an async closure as a function value.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Value::Function(Function::new(f))
    }

    /// Wrap a synchronous closure as a function value.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Value::Function(Function::from_fn(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Remote(_) => "remote handle",
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&Proxy> {
        match self {
            Value::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn into_remote(self) -> Option<Proxy> {
        match self {
            Value::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Field `name` of an object value.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|object| object.get(name))
    }

    /// Export as plain JSON. `None` when the value holds functions, remote
    /// handles, streams, or a reference cycle.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        self.export_static(&mut HashSet::new())
    }

    /// Cycle-guarded plain-data export; `visiting` holds the objects on the
    /// current path.
    pub(crate) fn export_static(&self, visiting: &mut HashSet<usize>) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Number(n) => Some(serde_json::Value::Number(n.clone())),
            Value::String(s) => Some(serde_json::Value::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| item.export_static(visiting))
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Object(object) => object.export_static(visiting),
            Value::Function(_) | Value::Remote(_) => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(object) => object.fmt(f),
            Value::Function(function) => function.fmt(f),
            Value::Remote(proxy) => proxy.fmt(f),
        }
    }
}

impl PartialEq<serde_json::Value> for Value {
    fn eq(&self, other: &serde_json::Value) -> bool {
        self.to_json().as_ref() == Some(other)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_json(map)),
        }
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

/// NaN and the infinities have no JSON form and become [`Value::Null`].
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl From<Proxy> for Value {
    fn from(proxy: Proxy) -> Self {
        Value::Remote(proxy)
    }
}

// ============================================================================
// Objects
// ============================================================================

struct ObjectInner {
    fields: RwLock<Vec<(String, Value)>>,
    stream: Option<tokio::sync::Mutex<BoxStream<'static, Value>>>,
}

/// Shared object with ordered, mutable fields.
///
/// Clones share state. A stream-backed object additionally answers the
/// `next` member with a function yielding `{value, done}` steps.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl Object {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                fields: RwLock::new(Vec::new()),
                stream: None,
            }),
        }
    }

    /// Object backed by an async stream of values.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        Self {
            inner: Arc::new(ObjectInner {
                fields: RwLock::new(Vec::new()),
                stream: Some(tokio::sync::Mutex::new(stream.boxed())),
            }),
        }
    }

    pub fn from_fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let object = Self::new();
        for (name, value) in fields {
            object.set(name, value);
        }
        object
    }

    pub(crate) fn from_json(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::from_fields(map.into_iter().map(|(k, v)| (k, Value::from(v))))
    }

    /// Builder-style [`Object::set`].
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a field, keeping the original position on replace.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        let mut fields = self.inner.fields.write().unwrap_or_else(PoisonError::into_inner);
        match fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let fields = self.inner.fields.read().unwrap_or_else(PoisonError::into_inner);
        fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    /// Snapshot of all fields in insertion order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        self.inner
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.inner
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stream(&self) -> bool {
        self.inner.stream.is_some()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Member lookup used when walking a call path.
    pub(crate) fn member(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.get(name) {
            return Some(value);
        }
        if self.is_stream() && name == ProtocolConfig::STREAM_NEXT_MEMBER {
            let object = self.clone();
            return Some(Value::function(move |_args| {
                let object = object.clone();
                async move { object.next_step().await }
            }));
        }
        None
    }

    /// Pull one item from the backing stream as a `{value, done}` object.
    async fn next_step(&self) -> Result<Value> {
        let stream = self.inner.stream.as_ref().ok_or_else(|| RpcError::NotCallable {
            path: ProtocolConfig::STREAM_NEXT_MEMBER.to_string(),
        })?;
        let item = stream.lock().await.next().await;
        let step = match item {
            Some(value) => Object::new().with("value", value).with("done", false),
            None => Object::new().with("value", Value::Null).with("done", true),
        };
        Ok(Value::Object(step))
    }

    fn export_static(&self, visiting: &mut HashSet<usize>) -> Option<serde_json::Value> {
        if self.is_stream() || !visiting.insert(self.addr()) {
            return None;
        }
        let mut map = serde_json::Map::new();
        let mut exported = true;
        for (name, value) in self.fields() {
            match value.export_static(visiting) {
                Some(json) => {
                    map.insert(name, json);
                }
                None => {
                    exported = false;
                    break;
                }
            }
        }
        visiting.remove(&self.addr());
        exported.then_some(serde_json::Value::Object(map))
    }

    /// Static JSON for each field, `None` for fields that need a live handle.
    /// `self` counts as already visited so self-references disqualify.
    pub(crate) fn inline_fields(&self) -> Vec<(String, Option<serde_json::Value>)> {
        let mut visiting = HashSet::from([self.addr()]);
        self.fields()
            .into_iter()
            .map(|(name, value)| {
                let json = value.export_static(&mut visiting);
                (name, json)
            })
            .collect()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("fields", &self.field_names())
            .field("stream", &self.is_stream())
            .finish()
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Something that can be invoked through the protocol.
///
/// `receiver` is the object the function was read from when it was reached
/// through a member path, `None` when it was invoked directly.
#[async_trait]
pub trait Callable: Send + Sync {
    async fn call(&self, receiver: Option<Object>, args: Vec<Value>) -> Result<Value>;
}

struct FnCallable<F>(F);

#[async_trait]
impl<F, Fut> Callable for FnCallable<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, _receiver: Option<Object>, args: Vec<Value>) -> Result<Value> {
        (self.0)(args).await
    }
}

struct MethodCallable<F>(F);

#[async_trait]
impl<F, Fut> Callable for MethodCallable<F>
where
    F: Fn(Object, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, receiver: Option<Object>, args: Vec<Value>) -> Result<Value> {
        match receiver {
            Some(this) => (self.0)(this, args).await,
            None => Err(RpcError::service("method invoked without a receiver")),
        }
    }
}

/// Shared handle to a [`Callable`].
#[derive(Clone)]
pub struct Function {
    inner: Arc<dyn Callable>,
}

impl Function {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_callable(FnCallable(f))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |args| futures::future::ready(f(args)))
    }

    /// Function that receives the object it was read from as its first argument.
    pub fn method<F, Fut>(f: F) -> Self
    where
        F: Fn(Object, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_callable(MethodCallable(f))
    }

    pub fn from_callable(callable: impl Callable + 'static) -> Self {
        Self {
            inner: Arc::new(callable),
        }
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.inner.call(None, args).await
    }

    pub async fn call_with_receiver(
        &self,
        receiver: Option<Object>,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.inner.call(receiver, args).await
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitives_export_unchanged() {
        assert_eq!(Value::from("a"), json!("a"));
        assert_eq!(Value::from(1), json!(1));
        assert_eq!(Value::from(true), json!(true));
        assert_eq!(Value::from(()), json!(null));
        assert_eq!(Value::from(1.5), json!(1.5));
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        assert!(Value::from(f64::NAN).is_null());
        assert!(Value::from(f64::INFINITY).is_null());
        assert!(Value::from(f64::NEG_INFINITY).is_null());
        assert_eq!(Value::from(-0.5), json!(-0.5));
    }

    #[test]
    fn test_json_conversion_builds_objects() {
        let value = Value::from(json!({"a": {"b": [1, 2]}}));
        let inner = value.get("a").unwrap();
        assert!(inner.as_object().is_some());
        assert_eq!(value, json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let object = Object::new().with("a", 1).with("b", 2);
        object.set("a", 3);
        assert_eq!(object.field_names(), vec!["a", "b"]);
        assert_eq!(object.get("a").unwrap(), json!(3));
    }

    #[test]
    fn test_functions_and_streams_are_not_plain_data() {
        let with_fn = Object::new().with("f", Value::from_fn(|_| Ok(Value::Null)));
        assert!(Value::Object(with_fn).to_json().is_none());

        let stream = Object::stream(futures::stream::empty());
        assert!(Value::Object(stream).to_json().is_none());
    }

    #[test]
    fn test_self_reference_is_not_plain_data() {
        let object = Object::new().with("a", 1);
        object.set("me", object.clone());
        assert!(Value::Object(object.clone()).to_json().is_none());

        let inline = object.inline_fields();
        assert_eq!(inline[0], ("a".to_string(), Some(json!(1))));
        assert_eq!(inline[1], ("me".to_string(), None));
    }

    #[test]
    fn test_shared_subobject_is_not_a_cycle() {
        let shared = Object::new().with("x", 1);
        let object = Object::new()
            .with("left", shared.clone())
            .with("right", shared);
        assert_eq!(
            Value::Object(object),
            json!({"left": {"x": 1}, "right": {"x": 1}})
        );
    }

    #[tokio::test]
    async fn test_stream_object_next_steps() {
        let object = Object::stream(futures::stream::iter(vec![Value::from(1)]));
        let next = object.member("next").unwrap();
        let next = next.as_function().unwrap();

        let first = next.call(vec![]).await.unwrap();
        assert_eq!(first, json!({"value": 1, "done": false}));

        let second = next.call(vec![]).await.unwrap();
        assert_eq!(second, json!({"value": null, "done": true}));
    }

    #[tokio::test]
    async fn test_method_receives_receiver() {
        let method = Function::method(|this, _args| async move {
            Ok::<_, RpcError>(this.get("name").unwrap_or(Value::Null))
        });
        let object = Object::new().with("name", "svc");

        let result = method
            .call_with_receiver(Some(object), vec![])
            .await
            .unwrap();
        assert_eq!(result, json!("svc"));

        assert!(method.call(vec![]).await.is_err());
    }
}
