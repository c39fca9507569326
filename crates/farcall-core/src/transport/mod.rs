//! The channel between two engines.
//!
//! The protocol only needs request/response delivery: [`Transport::invoke`]
//! carries one request to the peer and returns its response. Transports that
//! can also receive unsolicited requests from the peer accept a
//! [`PushHandler`], which the engine registers at construction.

pub mod loopback;

use crate::error::Result;
use crate::wire::Message;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

pub use loopback::LoopbackTransport;

/// Receives requests the peer sends on its own initiative and produces the
/// response to send back.
pub type PushHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, Message> + Send + Sync>;

/// Opaque request/response channel to the peer engine.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `message` to the peer and wait for its response.
    async fn invoke(&self, message: Message) -> Result<Message>;

    /// Register the handler for peer-initiated requests. Returns `false`
    /// when the transport has no push channel.
    fn set_push_handler(&self, _handler: PushHandler) -> bool {
        false
    }
}
