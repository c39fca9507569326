//! Endpoint: an engine plus the root proxy addressing the peer's service.

use crate::engine::Engine;
use crate::proxy::Proxy;
use crate::transport::Transport;
use crate::value::Value;
use std::sync::Arc;

/// One side of a connection as seen by application code.
///
/// `target()` addresses the peer's root service; the local service given at
/// construction is what the peer's target reaches.
#[derive(Clone)]
pub struct Endpoint {
    engine: Engine,
    target: Proxy,
}

impl Endpoint {
    /// Bind an existing engine.
    pub fn bind(engine: Engine) -> Self {
        let target = engine.root_proxy();
        Self { engine, target }
    }

    /// Build an engine with default configuration over `transport` and bind it.
    pub fn connect(transport: Arc<dyn Transport>, service: impl Into<Value>) -> Self {
        Self::bind(Engine::new(transport, service))
    }

    /// Root proxy for the peer's service.
    pub fn target(&self) -> &Proxy {
        &self.target
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Tear down: drop local handles and callback tables and stop serving.
    pub fn close(&self) {
        self.engine.shutdown();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("live_handles", &self.engine.live_handles())
            .field("closed", &self.engine.is_closed())
            .finish()
    }
}
