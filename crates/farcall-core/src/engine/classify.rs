//! Outcome classification: native values into result bodies.
//!
//! Plain data is inlined. Anything that needs a live handle (functions,
//! objects with non-static fields, streams) is registered under the CallId
//! of the call that produced it, or the derived element id for array items.

use super::Engine;
use crate::error::{Result, RpcError};
use crate::value::Value;
use crate::wire::{CallId, InlineField, ResultBody};

/// Registrations are collected first and committed only when the whole
/// outcome classified, so a failing array element leaves nothing behind.
#[derive(Default)]
struct Classification {
    pending: Vec<(CallId, Value)>,
}

impl Classification {
    fn classify(&mut self, call_id: &CallId, value: Value) -> Result<ResultBody> {
        match value {
            Value::Null => Ok(ResultBody::Value {
                v: serde_json::Value::Null,
            }),
            Value::Bool(b) => Ok(ResultBody::Value {
                v: serde_json::Value::Bool(b),
            }),
            Value::Number(n) => Ok(ResultBody::Value {
                v: serde_json::Value::Number(n),
            }),
            Value::String(s) => Ok(ResultBody::Value {
                v: serde_json::Value::String(s),
            }),
            Value::Array(items) => {
                let e = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| self.classify(&call_id.element(index), item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ResultBody::Array { e })
            }
            Value::Object(object) => {
                let stream = object.is_stream();
                let mut is_static = !stream;
                let mut fields = Vec::new();
                for (k, json) in object.inline_fields() {
                    match json {
                        Some(v) => fields.push(InlineField { k, v }),
                        None => is_static = false,
                    }
                }
                if !is_static {
                    self.pending.push((call_id.clone(), Value::Object(object)));
                }
                Ok(ResultBody::Object {
                    is_static,
                    fields,
                    stream,
                })
            }
            Value::Function(function) => {
                self.pending.push((call_id.clone(), Value::Function(function)));
                Ok(ResultBody::Function)
            }
            Value::Remote(handle) => Err(RpcError::UnsupportedValue {
                reason: format!("cannot return a remote handle to its peer ({:?})", handle),
            }),
        }
    }
}

impl Engine {
    /// Classify the outcome of call `call_id`, registering live values.
    pub(crate) fn classify(&self, call_id: &CallId, outcome: Value) -> Result<ResultBody> {
        let mut classification = Classification::default();
        let body = classification.classify(call_id, outcome)?;
        for (id, value) in classification.pending {
            self.inner.registry.insert(id, value);
        }
        Ok(body)
    }
}
