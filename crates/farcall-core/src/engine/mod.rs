//! The protocol engine.
//!
//! One [`Engine`] serves one side of a connection. It is both a client
//! (encoding outbound calls, decoding results into values and handles) and a
//! server (dispatching inbound calls against its local service tree, serving
//! callbacks, and tracking every handle it has handed out).
//!
//! # Architecture
//!
//! - **encode**: outbound calls, argument classification, function tables
//! - **decode**: result bodies into values or handles
//! - **dispatch**: inbound `Call` / `FunctionCall` / `Finalize` handling
//! - **classify**: outcome values into result bodies, registering live objects
//! - **registry**: handle registry and function tables
//! - **lifecycle**: handle leases, callback scopes, finalize and teardown
//!
//! # Thread Safety
//!
//! `Engine` is a cheap `Clone` over shared state. The registry and function
//! tables are guarded by std mutexes that are never held across an `.await`.

mod classify;
mod decode;
mod dispatch;
mod encode;
mod lifecycle;
mod registry;

pub(crate) use lifecycle::HandleLease;

use crate::config::EngineConfig;
use crate::error::{Result, RpcError};
use crate::proxy::{Invoke, Proxy};
use crate::transport::{PushHandler, Transport};
use crate::value::Value;
use crate::wire::{CallId, Message, ResultMessage};
use futures::future::{BoxFuture, FutureExt};
use registry::{FunctionTables, HandleRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

pub(crate) struct EngineInner {
    transport: Arc<dyn Transport>,
    service: Value,
    config: EngineConfig,
    registry: HandleRegistry,
    functions: FunctionTables,
    closed: AtomicBool,
}

/// Protocol engine bound to one transport and one local service tree.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with default configuration.
    pub fn new(transport: Arc<dyn Transport>, service: impl Into<Value>) -> Self {
        Self::builder(transport, service).build()
    }

    /// Create a builder for more control over engine options.
    pub fn builder(transport: Arc<dyn Transport>, service: impl Into<Value>) -> EngineBuilder {
        EngineBuilder::new(transport, service)
    }

    fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Root proxy: invocations address the peer's root service.
    pub fn root_proxy(&self) -> Proxy {
        Proxy::create(Vec::new(), self.scoped_invoker(None), None)
    }

    fn scoped_invoker(&self, parent: Option<CallId>) -> Arc<dyn Invoke> {
        Arc::new(ScopedInvoker {
            engine: self.clone(),
            parent,
        })
    }

    /// Handle one inbound message and produce its response.
    ///
    /// Transports that deliver peer requests call this (directly or through
    /// the registered push handler). It never fails: every problem is
    /// reported as an `Error` result.
    pub async fn handle(&self, message: Message) -> Message {
        if self.is_closed() {
            return Message::Result(ResultMessage::error(
                message.call_id().clone(),
                "engine is shut down",
            ));
        }
        let response = match message {
            Message::Call(call) => self.dispatch(call).await,
            Message::FunctionCall(call) => self.dispatch_function_call(call).await,
            Message::Finalize(finalize) => self.handle_finalize(finalize),
            Message::Result(result) => {
                debug!("Unsolicited result for call {}", result.call_id);
                ResultMessage::error(result.call_id, "Unexpected Result message without a pending call")
            }
        };
        Message::Result(response)
    }

    /// Number of live registry entries.
    pub fn live_handles(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of retained callback tables.
    pub fn function_tables(&self) -> usize {
        self.inner.functions.len()
    }

    /// Drop registry entries idle past the configured timeout. Returns how
    /// many were reclaimed.
    pub fn reap_idle_handles(&self) -> usize {
        self.inner.registry.reap_idle()
    }

    /// Stop serving and drop every live handle and callback table without
    /// notifying the peer. Outbound calls fail afterwards.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles = self.inner.registry.clear();
        let tables = self.inner.functions.clear();
        info!(
            "Engine shut down, dropped {} live handles and {} callback tables",
            handles, tables
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::transport("engine is shut down"));
        }
        Ok(())
    }

    /// Send one request and unwrap the correlated result.
    async fn round_trip(&self, call_id: &CallId, message: Message) -> Result<ResultMessage> {
        let response = self.inner.transport.invoke(message).await?;
        match response {
            Message::Result(result) if &result.call_id == call_id => Ok(result),
            Message::Result(result) => Err(RpcError::transport(format!(
                "response correlates to call {}, expected {}",
                result.call_id, call_id
            ))),
            other => Err(RpcError::transport(format!(
                "expected a Result response, got {}",
                other.kind()
            ))),
        }
    }

    fn push_handler(&self) -> PushHandler {
        let engine = self.downgrade();
        Arc::new(move |message: Message| -> BoxFuture<'static, Message> {
            let engine = engine.upgrade().map(Engine::from_inner);
            async move {
                match engine {
                    Some(engine) => engine.handle(message).await,
                    None => Message::Result(ResultMessage::error(
                        message.call_id().clone(),
                        "engine is shut down",
                    )),
                }
            }
            .boxed()
        })
    }
}

/// Invoke capability scoped to one parent handle (or the root).
struct ScopedInvoker {
    engine: Engine,
    parent: Option<CallId>,
}

impl Invoke for ScopedInvoker {
    fn invoke(&self, path: &[String], args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        self.engine.invoke_scoped(self.parent.clone(), path, args)
    }
}

/// Builder for configuring an [`Engine`].
///
/// # Example
///
/// ```rust,ignore
/// let engine = Engine::builder(transport, service)
///     .max_live_handles(1_000)
///     .handle_idle_timeout(Some(Duration::from_secs(60)))
///     .build();
/// ```
pub struct EngineBuilder {
    transport: Arc<dyn Transport>,
    service: Value,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(transport: Arc<dyn Transport>, service: impl Into<Value>) -> Self {
        Self {
            transport,
            service: service.into(),
            config: EngineConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum live registry entries before the least recently used one is
    /// evicted (0 = unlimited).
    ///
    /// Default: `ProtocolConfig::DEFAULT_MAX_LIVE_HANDLES`
    pub fn max_live_handles(mut self, max: usize) -> Self {
        self.config.max_live_handles = max;
        self
    }

    /// Idle timeout after which registry entries may be reclaimed.
    ///
    /// Default: `ProtocolConfig::DEFAULT_HANDLE_IDLE_TIMEOUT`
    pub fn handle_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.handle_idle_timeout = timeout;
        self
    }

    /// Build the engine and register it with the transport's push channel.
    pub fn build(self) -> Engine {
        let registry = HandleRegistry::new(&self.config);
        let engine = Engine::from_inner(Arc::new(EngineInner {
            transport: self.transport,
            service: self.service,
            config: self.config,
            registry,
            functions: FunctionTables::default(),
            closed: AtomicBool::new(false),
        }));

        if !engine.inner.transport.set_push_handler(engine.push_handler()) {
            debug!("Transport has no push channel; inbound messages must be fed to Engine::handle");
        }
        engine
    }
}
