//! Result bodies into native values and remote handles.

use super::lifecycle::HandleLease;
use super::Engine;
use crate::error::{Result, RpcError};
use crate::proxy::Proxy;
use crate::value::{Object, Value};
use crate::wire::{CallId, InlineField, ResultBody};

impl Engine {
    /// Decode the result of call `call_id`.
    pub(crate) fn decode(&self, call_id: CallId, body: ResultBody) -> Result<Value> {
        match body {
            ResultBody::Value { v } => Ok(Value::from(v)),
            ResultBody::Array { e } => e
                .into_iter()
                .enumerate()
                .map(|(index, element)| self.decode(call_id.element(index), element))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            ResultBody::Object {
                is_static: true,
                fields,
                ..
            } => Ok(Value::Object(Object::from_fields(
                fields.into_iter().map(|InlineField { k, v }| (k, Value::from(v))),
            ))),
            ResultBody::Object { fields, stream, .. } => {
                let seed = fields.into_iter().map(|field| (field.k, field.v)).collect();
                Ok(Value::Remote(self.remote_handle(call_id, seed, stream)))
            }
            ResultBody::Function => Ok(Value::Remote(self.remote_handle(
                call_id,
                serde_json::Map::new(),
                false,
            ))),
            ResultBody::Error { m } => Err(RpcError::Remote { message: m }),
            ResultBody::Unsupported { tag } => Err(RpcError::UnsupportedResult { tag }),
        }
    }

    /// Handle addressing the live peer object registered under `call_id`.
    fn remote_handle(
        &self,
        call_id: CallId,
        seed: serde_json::Map<String, serde_json::Value>,
        stream: bool,
    ) -> Proxy {
        let lease = HandleLease::new(call_id.clone(), self.downgrade());
        Proxy::handle(self.scoped_invoker(Some(call_id)), seed, stream, lease)
    }
}
