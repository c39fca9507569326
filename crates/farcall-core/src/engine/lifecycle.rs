//! Handle lifetimes.
//!
//! A [`HandleLease`] is shared by a decoded handle and every child proxy
//! derived from it. Releasing it (explicitly, or by dropping the last clone)
//! tells the peer to drop the object behind the CallId.
//!
//! A [`CallbackScope`] is the serving-side mirror: it is shared by the
//! callback stand-ins rehydrated from one inbound call, and dropping the last
//! of them tells the originator its function table is no longer needed.

use super::{Engine, EngineInner};
use crate::error::{Result, RpcError};
use crate::wire::{CallId, Finalize, Message, ResultBody};
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Release guard for one remote handle.
pub(crate) struct HandleLease {
    call_id: CallId,
    engine: Weak<EngineInner>,
    released: AtomicBool,
}

impl HandleLease {
    pub(crate) fn new(call_id: CallId, engine: Weak<EngineInner>) -> Arc<Self> {
        Arc::new(Self {
            call_id,
            engine,
            released: AtomicBool::new(false),
        })
    }

    pub(crate) fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Send `Finalize` now. Only the first release talks to the peer.
    pub(crate) fn release(self: &Arc<Self>) -> BoxFuture<'static, Result<bool>> {
        if self.released.swap(true, Ordering::SeqCst) {
            return future::ready(Ok(false)).boxed();
        }
        match self.engine.upgrade() {
            Some(inner) => {
                let call_id = self.call_id.clone();
                async move { Engine::from_inner(inner).finalize_remote(call_id).await }.boxed()
            }
            None => future::ready(Ok(false)).boxed(),
        }
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.engine.upgrade() {
            Engine::from_inner(inner).finalize_in_background(self.call_id.clone());
        }
    }
}

/// Shared by the callback stand-ins of one inbound call.
pub(crate) struct CallbackScope {
    parent: CallId,
    engine: Weak<EngineInner>,
}

impl CallbackScope {
    pub(crate) fn new(parent: CallId, engine: Weak<EngineInner>) -> Arc<Self> {
        Arc::new(Self { parent, engine })
    }

    pub(crate) fn parent(&self) -> &CallId {
        &self.parent
    }

    pub(crate) fn engine(&self) -> Result<Engine> {
        self.engine
            .upgrade()
            .map(Engine::from_inner)
            .ok_or_else(|| RpcError::transport("engine is shut down"))
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        if let Some(inner) = self.engine.upgrade() {
            Engine::from_inner(inner).finalize_in_background(self.parent.clone());
        }
    }
}

impl Engine {
    /// Tell the peer to drop `call_id`, and forget the callbacks sent with it.
    /// Resolves to whether the peer still held an entry.
    pub(crate) async fn finalize_remote(&self, call_id: CallId) -> Result<bool> {
        self.inner.functions.remove(&call_id);
        if self.is_closed() {
            return Ok(false);
        }

        let message = Message::Finalize(Finalize {
            call_id: call_id.clone(),
        });
        let result = self.round_trip(&call_id, message).await?;
        match result.body {
            ResultBody::Value {
                v: serde_json::Value::Bool(existed),
            } => {
                debug!("Finalized {} (existed: {})", call_id, existed);
                Ok(existed)
            }
            ResultBody::Error { m } => Err(RpcError::Remote { message: m }),
            other => Err(RpcError::UnsupportedResult {
                tag: other.tag().to_string(),
            }),
        }
    }

    /// Best-effort finalize for handles that were dropped without release.
    pub(crate) fn finalize_in_background(&self, call_id: CallId) {
        if self.is_closed() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let engine = self.clone();
                runtime.spawn(async move {
                    if let Err(e) = engine.finalize_remote(call_id.clone()).await {
                        debug!("Background finalize of {} failed: {}", call_id, e);
                    }
                });
            }
            Err(_) => {
                debug!("No runtime available, skipping finalize of {}", call_id);
            }
        }
    }
}
