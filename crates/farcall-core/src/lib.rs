//! Farcall Core - invoke methods on a remote object graph as if it were local.
//!
//! Member accesses and calls on a [`Proxy`] are captured as a path, shipped to
//! the peer as a `Call`, executed against a real object there, and the outcome
//! is shipped back: plain data inline, or a handle to a new remote object.
//! Functions passed as arguments can be called back from the far side.
//!
//! Both sides run the same [`Engine`]; the transport between them is
//! pluggable (see [`Transport`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use farcall_core::{loopback, Object, Value};
//!
//! #[tokio::main]
//! async fn main() -> farcall_core::Result<()> {
//!     let service = Object::new().with(
//!         "greet",
//!         Value::from_fn(|args| {
//!             let name = args.first().and_then(|v| v.as_str()).unwrap_or("world");
//!             Ok(format!("hello {}", name).into())
//!         }),
//!     );
//!     let (client, _server) = loopback::connect(Value::Null, service);
//!
//!     let greeting = client.target().get("greet").call(vec!["farcall".into()]).await?;
//!     println!("{:?}", greeting);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod proxy;
pub mod transport;
pub mod value;
pub mod wire;

// Re-export commonly used types
pub use config::{EngineConfig, ProtocolConfig};
pub use endpoint::Endpoint;
pub use engine::{Engine, EngineBuilder};
pub use error::{Result, RpcError};
pub use proxy::{Invoke, Key, Member, Proxy};
pub use transport::{loopback, LoopbackTransport, PushHandler, Transport};
pub use value::{Callable, Function, Object, Value};
pub use wire::{
    Arg, Call, CallId, Finalize, FunctionCall, FunctionId, InlineField, Message, ResultBody,
    ResultMessage,
};
