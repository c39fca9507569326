//! Client-side dynamic proxy.
//!
//! A [`Proxy`] records member accesses as a path and turns an invocation into
//! a single `(path, args)` call on its [`Invoke`] capability. Member access
//! never causes a round trip; only [`Proxy::call`] does.
//!
//! ```rust,ignore
//! let zip = endpoint.target().get("zip").call(vec![]).await?;
//! let zip = zip.into_remote().unwrap();
//! let echoed = zip.get("bar").call(vec!["hello".into()]).await?;
//! ```

use crate::config::ProtocolConfig;
use crate::engine::HandleLease;
use crate::error::{Result, RpcError};
use crate::value::Value;
use crate::wire::CallId;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// The capability a proxy delegates invocations to.
pub trait Invoke: Send + Sync {
    fn invoke(&self, path: &[String], args: Vec<Value>) -> BoxFuture<'static, Result<Value>>;
}

impl<F> Invoke for F
where
    F: Fn(&[String], Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync,
{
    fn invoke(&self, path: &[String], args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        self(path, args)
    }
}

/// A member key. Only names address members; the other variants exist so
/// callers with dynamic keys get a proper error instead of a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Name(String),
    Index(usize),
    /// The async-iteration entry point of stream handles.
    AsyncIterator,
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(index) => write!(f, "[{}]", index),
            Key::AsyncIterator => f.write_str("[asyncIterator]"),
        }
    }
}

/// What reading a member of a proxy produced.
#[derive(Debug, Clone)]
pub enum Member {
    /// An inline field delivered with the handle.
    Field(serde_json::Value),
    /// A child handle; invoking it performs the round trip.
    Handle(Proxy),
    /// The member deliberately does not exist (thenable probe).
    Absent,
}

struct ProxyNode {
    path: Vec<String>,
    invoker: Arc<dyn Invoke>,
    seed: serde_json::Map<String, serde_json::Value>,
    stream: bool,
    lease: Option<Arc<HandleLease>>,
    children: Mutex<HashMap<String, Proxy>>,
}

/// Handle to a remote object or to a member path on it.
///
/// Clones share identity; `==` compares identity, not paths.
#[derive(Clone)]
pub struct Proxy {
    node: Arc<ProxyNode>,
}

impl Proxy {
    /// Create a root proxy for `path_prefix`, optionally seeded with inline fields.
    pub fn create(
        path_prefix: Vec<String>,
        invoke: Arc<dyn Invoke>,
        seed: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self::build(path_prefix, invoke, seed.unwrap_or_default(), false, None)
    }

    pub(crate) fn handle(
        invoke: Arc<dyn Invoke>,
        seed: serde_json::Map<String, serde_json::Value>,
        stream: bool,
        lease: Arc<HandleLease>,
    ) -> Self {
        Self::build(Vec::new(), invoke, seed, stream, Some(lease))
    }

    fn build(
        path: Vec<String>,
        invoker: Arc<dyn Invoke>,
        seed: serde_json::Map<String, serde_json::Value>,
        stream: bool,
        lease: Option<Arc<HandleLease>>,
    ) -> Self {
        Self {
            node: Arc::new(ProxyNode {
                path,
                invoker,
                seed,
                stream,
                lease,
                children: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Child handle for member `name`, memoized so repeated reads return the
    /// identical handle.
    pub fn get(&self, name: &str) -> Proxy {
        let mut children = self
            .node
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        children
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut path = self.node.path.clone();
                path.push(name.to_string());
                Self::build(
                    path,
                    self.node.invoker.clone(),
                    serde_json::Map::new(),
                    false,
                    self.node.lease.clone(),
                )
            })
            .clone()
    }

    /// Read a member by key.
    pub fn member(&self, key: impl Into<Key>) -> Result<Member> {
        match key.into() {
            Key::Name(name) if name == ProtocolConfig::THENABLE_PROBE_MEMBER => Ok(Member::Absent),
            Key::Name(name) => match self.node.seed.get(&name) {
                Some(field) => Ok(Member::Field(field.clone())),
                None => Ok(Member::Handle(self.get(&name))),
            },
            Key::AsyncIterator if self.node.stream => Ok(Member::Handle(self.clone())),
            other => Err(RpcError::UnsupportedKey {
                key: other.to_string(),
            }),
        }
    }

    /// Inline field delivered with this handle, if any.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.node.seed.get(name)
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.node.seed
    }

    /// Invoke this handle. The returned future keeps the handle alive until
    /// the result arrives.
    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        let pending = self.node.invoker.invoke(&self.node.path, args);
        let lease = self.node.lease.clone();
        async move {
            let result = pending.await;
            drop(lease);
            result
        }
        .boxed()
    }

    /// Release the remote object now. Resolves to whether the peer still
    /// held it; repeated releases resolve to `false` without a round trip.
    pub fn release(&self) -> BoxFuture<'static, Result<bool>> {
        match &self.node.lease {
            Some(lease) => lease.release(),
            None => future::ready(Ok(false)).boxed(),
        }
    }

    pub fn is_stream(&self) -> bool {
        self.node.stream
    }

    /// The async-iteration entry point: the same handle for stream handles.
    pub fn async_iter(&self) -> Option<Proxy> {
        self.node.stream.then(|| self.clone())
    }

    /// Iterate a stream handle by calling `next` until it reports `done`.
    pub fn into_stream(self) -> BoxStream<'static, Result<Value>> {
        stream::try_unfold(self, next_item).boxed()
    }

    /// Call id of the remote object this proxy addresses (`None` for the root).
    pub fn call_id(&self) -> Option<&CallId> {
        self.node.lease.as_ref().map(|lease| lease.call_id())
    }

    /// Dotted member path relative to the addressed object.
    pub fn path(&self) -> String {
        self.node.path.join(".")
    }

    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

async fn next_item(handle: Proxy) -> Result<Option<(Value, Proxy)>> {
    let step = handle
        .get(ProtocolConfig::STREAM_NEXT_MEMBER)
        .call(Vec::new())
        .await?;
    Ok(read_step(step).await?.map(|value| (value, handle)))
}

/// Unpack one `{value, done}` iterator step, static or handle-backed.
async fn read_step(step: Value) -> Result<Option<Value>> {
    match step {
        Value::Object(object) => {
            let done = object.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
            Ok((!done).then(|| object.get("value").unwrap_or(Value::Null)))
        }
        Value::Remote(handle) => {
            let done = handle
                .field("done")
                .and_then(|d| d.as_bool())
                .unwrap_or(false);
            if done {
                return Ok(None);
            }
            let value = match handle.field("value") {
                Some(value) => Value::from(value.clone()),
                None => handle.get("value").call(Vec::new()).await?,
            };
            Ok(Some(value))
        }
        other => Err(RpcError::UnsupportedValue {
            reason: format!("iterator step must be an object, got {}", other.kind()),
        }),
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("call_id", &self.call_id())
            .field("path", &self.path())
            .field("stream", &self.node.stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Calls = Arc<Mutex<Vec<(String, usize)>>>;

    fn recording_proxy() -> (Proxy, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let invoke = move |path: &[String], args: Vec<Value>| -> BoxFuture<'static, Result<Value>> {
            log.lock().unwrap().push((path.join("."), args.len()));
            future::ready(Ok(Value::from(path.join(".")))).boxed()
        };
        (Proxy::create(Vec::new(), Arc::new(invoke), None), calls)
    }

    #[test]
    fn test_return_existing_proxy_for_subsequent_reads() {
        let (proxy, _) = recording_proxy();
        let t1 = proxy.get("foo");
        let t2 = proxy.get("foo");
        assert_eq!(t1, t2);
        assert_ne!(t1, proxy.get("bar"));
    }

    #[test]
    fn test_member_access_does_not_invoke() {
        let (proxy, calls) = recording_proxy();
        let _ = proxy.get("foo").get("bar");
        let _ = proxy.member("baz").unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_string_key_is_rejected() {
        let (proxy, _) = recording_proxy();
        let err = proxy.member(0usize).unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedKey { .. }));

        // Not a stream, so the iterator entry point does not exist either.
        assert!(proxy.member(Key::AsyncIterator).is_err());
    }

    #[test]
    fn test_thenable_probe_is_absent() {
        let (proxy, _) = recording_proxy();
        assert!(matches!(proxy.member("then").unwrap(), Member::Absent));
    }

    #[tokio::test]
    async fn test_nested_path() {
        let (proxy, calls) = recording_proxy();
        let result = proxy.get("foo").get("bar").call(vec![]).await.unwrap();
        assert_eq!(result, json!("foo.bar"));
        assert_eq!(calls.lock().unwrap()[0], ("foo.bar".to_string(), 0));
    }

    #[tokio::test]
    async fn test_handler_includes_args() {
        let (proxy, calls) = recording_proxy();
        proxy
            .call(vec![Value::from(1), Value::Object(Default::default())])
            .await
            .unwrap();
        assert_eq!(calls.lock().unwrap()[0], (String::new(), 2));
    }

    #[tokio::test]
    async fn test_can_invoke_root() {
        let (proxy, calls) = recording_proxy();
        let result = proxy.call(vec![]).await.unwrap();
        assert_eq!(result, json!(""));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_seeded_fields_are_readable_without_a_call() {
        let mut seed = serde_json::Map::new();
        seed.insert("staticString".into(), json!("x"));
        let invoke = |_: &[String], _: Vec<Value>| -> BoxFuture<'static, Result<Value>> {
            panic!("seeded reads must not invoke")
        };
        let proxy = Proxy::create(Vec::new(), Arc::new(invoke), Some(seed));

        assert_eq!(proxy.field("staticString"), Some(&json!("x")));
        match proxy.member("staticString").unwrap() {
            Member::Field(value) => assert_eq!(value, json!("x")),
            other => panic!("expected a field, got {:?}", other),
        }
        assert!(matches!(proxy.member("bar").unwrap(), Member::Handle(_)));
    }

    #[tokio::test]
    async fn test_root_release_is_a_no_op() {
        let (proxy, calls) = recording_proxy();
        assert!(!proxy.release().await.unwrap());
        assert!(calls.lock().unwrap().is_empty());
        assert!(proxy.call_id().is_none());
    }
}
