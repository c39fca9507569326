//! Serving inbound calls.
//!
//! Every request is answered with a `Result`; failures become `Error` bodies
//! and never escape the dispatcher.

use super::lifecycle::CallbackScope;
use super::Engine;
use crate::error::{Result, RpcError};
use crate::value::{Callable, Function, Object, Value};
use crate::wire::{Arg, Call, CallId, Finalize, FunctionCall, FunctionId, ResultBody, ResultMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Local stand-in for a callback the caller passed as an argument.
struct RemoteCallback {
    scope: Arc<CallbackScope>,
    function_id: FunctionId,
}

#[async_trait]
impl Callable for RemoteCallback {
    async fn call(&self, _receiver: Option<Object>, args: Vec<Value>) -> Result<Value> {
        let engine = self.scope.engine()?;
        engine
            .invoke_callback(self.scope.parent().clone(), self.function_id, args)
            .await
    }
}

/// Turns wire args back into native values.
///
/// Callback stand-ins share one lazily created scope; without a parent call
/// id (arguments of a callback invocation) function refs are rejected.
struct ArgDecoder<'a> {
    engine: &'a Engine,
    parent: Option<&'a CallId>,
    scope: Option<Arc<CallbackScope>>,
}

impl<'a> ArgDecoder<'a> {
    fn decode(&mut self, arg: Arg) -> Result<Value> {
        match arg {
            Arg::Value { v } => Ok(Value::from(v)),
            Arg::Array { e } => e
                .into_iter()
                .map(|element| self.decode(element))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Arg::Object { p } => {
                let object = Object::new();
                for (name, arg) in p {
                    object.set(name, self.decode(arg)?);
                }
                Ok(Value::Object(object))
            }
            Arg::Function { id } => {
                let parent = self.parent.ok_or(RpcError::NestedFunctionArgument)?;
                let engine = self.engine;
                let scope = self
                    .scope
                    .get_or_insert_with(|| CallbackScope::new(parent.clone(), engine.downgrade()))
                    .clone();
                Ok(Value::Function(Function::from_callable(RemoteCallback {
                    scope,
                    function_id: id,
                })))
            }
        }
    }

    fn decode_all(mut self, args: Vec<Arg>) -> Result<Vec<Value>> {
        args.into_iter().map(|arg| self.decode(arg)).collect()
    }
}

fn describe(path: &[String]) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        path.join(".")
    }
}

fn member_of(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(object) => object.member(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index).cloned()),
        _ => None,
    }
}

/// Walk `path` from `start`. Returns the target and the object the final
/// segment was read from.
fn resolve_path(start: Value, path: &[String]) -> Result<(Value, Option<Object>)> {
    let mut current = start;
    let mut receiver = None;
    for (depth, segment) in path.iter().enumerate() {
        let next = member_of(&current, segment).ok_or_else(|| RpcError::PropertyNotFound {
            segment: segment.clone(),
            path: describe(&path[..depth]),
        })?;
        receiver = current.as_object().cloned();
        current = next;
    }
    Ok((current, receiver))
}

impl Engine {
    pub(crate) async fn dispatch(&self, call: Call) -> ResultMessage {
        let call_id = call.call_id.clone();
        match self.serve_call(call).await {
            Ok(body) => ResultMessage::new(call_id, body),
            Err(e) => {
                debug!("Call {} failed: {}", call_id, e);
                ResultMessage::error(call_id, e.to_string())
            }
        }
    }

    async fn serve_call(&self, call: Call) -> Result<ResultBody> {
        // Rehydrate first: the callback scope must exist before anything can
        // fail, so its drop tells the caller to forget the function table.
        let args = ArgDecoder {
            engine: self,
            parent: Some(&call.call_id),
            scope: None,
        }
        .decode_all(call.args)?;

        let start = match &call.parent_call_id {
            None => self.inner.service.clone(),
            Some(parent) => {
                self.inner
                    .registry
                    .get(parent)
                    .ok_or_else(|| RpcError::ObjectNotFound {
                        call_id: parent.to_string(),
                    })?
            }
        };

        let path = describe(&call.path);
        debug!("Invoking: {}", path);
        let (target, receiver) = resolve_path(start, &call.path)?;

        let outcome = match target {
            Value::Function(function) => function.call_with_receiver(receiver, args).await?,
            value if args.is_empty() => value,
            _ => return Err(RpcError::NotCallable { path }),
        };
        self.classify(&call.call_id, outcome)
    }

    pub(crate) async fn dispatch_function_call(&self, call: FunctionCall) -> ResultMessage {
        let call_id = call.call_id.clone();
        match self.serve_function_call(call).await {
            Ok(body) => ResultMessage::new(call_id, body),
            Err(e) => {
                debug!("Callback call {} failed: {}", call_id, e);
                ResultMessage::error(call_id, e.to_string())
            }
        }
    }

    async fn serve_function_call(&self, call: FunctionCall) -> Result<ResultBody> {
        let function = self
            .inner
            .functions
            .get(&call.parent_call_id, call.function_id)?;
        debug!(
            "Invoking callback {} of call {}",
            call.function_id, call.parent_call_id
        );

        let args = ArgDecoder {
            engine: self,
            parent: None,
            scope: None,
        }
        .decode_all(call.args)?;

        let outcome = function.call(args).await?;
        self.classify(&call.call_id, outcome)
    }

    pub(crate) fn handle_finalize(&self, finalize: Finalize) -> ResultMessage {
        let had_entry = self.inner.registry.remove(&finalize.call_id);
        let had_table = self.inner.functions.remove(&finalize.call_id);
        let existed = had_entry || had_table;
        debug!("Finalize {} (existed: {})", finalize.call_id, existed);
        ResultMessage::new(
            finalize.call_id,
            ResultBody::Value {
                v: serde_json::Value::Bool(existed),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> Value {
        Value::Object(
            Object::new()
                .with("name", "svc")
                .with("items", vec![Value::from("a"), Value::from("b")])
                .with("inner", Object::new().with("flag", false)),
        )
    }

    #[test]
    fn test_resolve_nested_path() {
        let path = vec!["inner".to_string(), "flag".to_string()];
        let (target, receiver) = resolve_path(service(), &path).unwrap();
        assert_eq!(target, json!(false));
        assert_eq!(receiver.unwrap().get("flag").unwrap(), json!(false));
    }

    #[test]
    fn test_resolve_array_index_segment() {
        let path = vec!["items".to_string(), "1".to_string()];
        let (target, receiver) = resolve_path(service(), &path).unwrap();
        assert_eq!(target, json!("b"));
        assert!(receiver.is_none());
    }

    #[test]
    fn test_missing_segment_names_path_so_far() {
        let path = vec!["inner".to_string(), "missing".to_string()];
        let err = resolve_path(service(), &path).unwrap_err();
        assert_eq!(err.to_string(), "Property missing does not exist on inner");

        let err = resolve_path(service(), &["nope".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "Property nope does not exist on root");
    }

    #[test]
    fn test_falsy_member_still_exists() {
        let path = vec!["inner".to_string(), "flag".to_string()];
        assert!(resolve_path(service(), &path).is_ok());
    }

    #[test]
    fn test_empty_path_has_no_receiver() {
        let (target, receiver) = resolve_path(service(), &[]).unwrap();
        assert!(target.as_object().is_some());
        assert!(receiver.is_none());
    }
}
