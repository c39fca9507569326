//! Outbound calls.
//!
//! Arguments are classified synchronously, in the caller's frame, so that a
//! structural failure never puts a message on the wire.

use super::registry::FunctionTable;
use super::Engine;
use crate::error::{Result, RpcError};
use crate::value::{Object, Value};
use crate::wire::{Arg, Call, CallId, FunctionCall, FunctionId, Message};
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashSet;

/// Walks native argument values into wire [`Arg`]s.
///
/// Functions are stored in `functions` when present; without a table (the
/// arguments of a callback invocation) a function is an error.
struct ArgEncoder<'a> {
    functions: Option<&'a mut FunctionTable>,
    visiting: HashSet<usize>,
}

impl<'a> ArgEncoder<'a> {
    fn new(functions: Option<&'a mut FunctionTable>) -> Self {
        Self {
            functions,
            visiting: HashSet::new(),
        }
    }

    fn encode(&mut self, value: &Value) -> Result<Arg> {
        match value {
            Value::Null => Ok(Arg::Value {
                v: serde_json::Value::Null,
            }),
            Value::Bool(b) => Ok(Arg::Value {
                v: serde_json::Value::Bool(*b),
            }),
            Value::Number(n) => Ok(Arg::Value {
                v: serde_json::Value::Number(n.clone()),
            }),
            Value::String(s) => Ok(Arg::Value {
                v: serde_json::Value::String(s.clone()),
            }),
            Value::Array(items) => {
                let e = items
                    .iter()
                    .map(|item| self.encode(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arg::Array { e })
            }
            Value::Object(object) => self.encode_object(object),
            Value::Function(function) => match self.functions.as_deref_mut() {
                Some(table) => Ok(Arg::Function {
                    id: table.register(function.clone()),
                }),
                None => Err(RpcError::NestedFunctionArgument),
            },
            Value::Remote(handle) => Err(RpcError::unsupported_argument(format!(
                "remote handles cannot be passed back as arguments ({:?})",
                handle
            ))),
        }
    }

    fn encode_object(&mut self, object: &Object) -> Result<Arg> {
        if object.is_stream() {
            return Err(RpcError::unsupported_argument(
                "stream-backed objects cannot be passed as arguments",
            ));
        }
        if !self.visiting.insert(object.addr()) {
            return Err(RpcError::unsupported_argument(
                "cyclic object graphs cannot be passed as arguments",
            ));
        }
        let mut p = Vec::new();
        for (name, value) in object.fields() {
            let arg = self.encode(&value)?;
            p.push((name, arg));
        }
        self.visiting.remove(&object.addr());
        Ok(Arg::Object { p })
    }
}

fn encode_args(args: &[Value], functions: Option<&mut FunctionTable>) -> Result<Vec<Arg>> {
    let mut encoder = ArgEncoder::new(functions);
    args.iter().map(|arg| encoder.encode(arg)).collect()
}

impl Engine {
    /// Invoke `path` on the peer's root service.
    pub fn remote_invoke(&self, path: &[String], args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        self.invoke_scoped(None, path, args)
    }

    /// Invoke `path` on the root (`parent = None`) or on the live handle
    /// `parent`, and decode the result.
    pub(crate) fn invoke_scoped(
        &self,
        parent: Option<CallId>,
        path: &[String],
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value>> {
        if let Err(e) = self.ensure_open() {
            return future::ready(Err(e)).boxed();
        }

        let mut table = FunctionTable::default();
        let args = match encode_args(&args, Some(&mut table)) {
            Ok(args) => args,
            Err(e) => return future::ready(Err(e)).boxed(),
        };

        let call_id = CallId::generate();
        if !table.is_empty() {
            self.inner.functions.insert(call_id.clone(), table);
        }
        let message = Message::Call(Call {
            call_id: call_id.clone(),
            parent_call_id: parent,
            path: path.to_vec(),
            args,
        });

        let engine = self.clone();
        async move {
            let result = match engine.round_trip(&call_id, message).await {
                Ok(result) => result,
                Err(e) => {
                    engine.inner.functions.remove(&call_id);
                    return Err(e);
                }
            };
            engine.decode(result.call_id, result.body)
        }
        .boxed()
    }

    /// Invoke callback `function_id` that the peer passed with call `parent`.
    pub(crate) fn invoke_callback(
        &self,
        parent: CallId,
        function_id: FunctionId,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value>> {
        if let Err(e) = self.ensure_open() {
            return future::ready(Err(e)).boxed();
        }
        let args = match encode_args(&args, None) {
            Ok(args) => args,
            Err(e) => return future::ready(Err(e)).boxed(),
        };

        let call_id = CallId::generate();
        let message = Message::FunctionCall(FunctionCall {
            call_id: call_id.clone(),
            parent_call_id: parent,
            function_id,
            args,
        });

        let engine = self.clone();
        async move {
            let result = engine.round_trip(&call_id, message).await?;
            engine.decode(result.call_id, result.body)
        }
        .boxed()
    }
}
