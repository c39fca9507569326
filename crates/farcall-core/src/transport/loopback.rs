//! In-process transport pair.
//!
//! Every message crossing a [`LoopbackTransport`] is serialized to JSON and
//! parsed back, both on the way in and on the way out, so nothing but wire
//! data is shared between the two engines.

use super::{PushHandler, Transport};
use crate::endpoint::Endpoint;
use crate::error::{Result, RpcError};
use crate::value::Value;
use crate::wire::Message;
use async_trait::async_trait;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};
use tracing::debug;

/// One side of an in-process transport pair.
pub struct LoopbackTransport {
    handler: RwLock<Option<PushHandler>>,
    peer: OnceLock<Weak<LoopbackTransport>>,
}

impl LoopbackTransport {
    fn unlinked() -> Arc<Self> {
        Arc::new(Self {
            handler: RwLock::new(None),
            peer: OnceLock::new(),
        })
    }

    /// Create two linked transports. Each side holds its peer weakly.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Self::unlinked();
        let b = Self::unlinked();
        let _ = a.peer.set(Arc::downgrade(&b));
        let _ = b.peer.set(Arc::downgrade(&a));
        (a, b)
    }

    fn peer(&self) -> Result<Arc<LoopbackTransport>> {
        self.peer
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| RpcError::transport("loopback peer is gone"))
    }

    fn handler(&self) -> Option<PushHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver a message to this side's handler, as if the peer sent it.
    pub async fn push(&self, message: Message) -> Result<Message> {
        let handler = self
            .handler()
            .ok_or_else(|| RpcError::transport("no handler registered on loopback transport"))?;
        let request = clone_through_json(&message)?;
        let response = handler(request).await;
        clone_through_json(&response)
    }
}

fn clone_through_json(message: &Message) -> Result<Message> {
    let bytes = serde_json::to_vec(message)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn invoke(&self, message: Message) -> Result<Message> {
        debug!("Loopback send: {} {}", message.kind(), message.call_id());
        let peer = self.peer()?;
        peer.push(message).await
    }

    fn set_push_handler(&self, handler: PushHandler) -> bool {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        true
    }
}

/// Wire two services to each other in-process. Each endpoint's target
/// addresses the other side's service.
pub fn connect(service_a: impl Into<Value>, service_b: impl Into<Value>) -> (Endpoint, Endpoint) {
    let (a, b) = LoopbackTransport::pair();
    (Endpoint::connect(a, service_a), Endpoint::connect(b, service_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Finalize, ResultBody, ResultMessage};
    use futures::future::{BoxFuture, FutureExt};
    use serde_json::json;

    fn echo_handler() -> PushHandler {
        Arc::new(|message: Message| -> BoxFuture<'static, Message> {
            async move {
                Message::Result(ResultMessage::new(
                    message.call_id().clone(),
                    ResultBody::Value {
                        v: json!(message.kind()),
                    },
                ))
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_invoke_reaches_peer_handler() {
        let (a, b) = LoopbackTransport::pair();
        assert!(b.set_push_handler(echo_handler()));

        let response = a
            .invoke(Message::Finalize(Finalize {
                call_id: "x".into(),
            }))
            .await
            .unwrap();
        let Message::Result(result) = response else {
            panic!("expected a result");
        };
        assert_eq!(result.call_id.as_str(), "x");
        assert_eq!(result.body, ResultBody::Value { v: json!("Finalize") });
    }

    #[tokio::test]
    async fn test_missing_handler_is_a_transport_error() {
        let (a, _b) = LoopbackTransport::pair();
        let err = a
            .invoke(Message::Finalize(Finalize {
                call_id: "x".into(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_dropped_peer_is_a_transport_error() {
        let (a, b) = LoopbackTransport::pair();
        drop(b);
        let err = a
            .invoke(Message::Finalize(Finalize {
                call_id: "x".into(),
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("peer is gone"));
    }
}
