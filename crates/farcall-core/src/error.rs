//! Error types for the farcall protocol engine.
//!
//! Client-side structural failures (bad keys, unclassifiable arguments) are
//! raised before any message leaves the engine. Serving-side failures are
//! converted into `Error` results by the dispatcher and surface on the caller
//! as [`RpcError::Remote`].

use thiserror::Error;

/// Leading text of [`RpcError::ObjectNotFound`]. A peer's copy of that error
/// arrives as a plain message, so [`RpcError::is_stale_handle`] matches on it.
const STALE_HANDLE_PREFIX: &str = "No live object for call";

/// Main error type for farcall operations.
#[derive(Debug, Error)]
pub enum RpcError {
    // Proxy / encode errors
    #[error("Unsupported member key on a remote handle: {key}")]
    UnsupportedKey { key: String },

    #[error("Unsupported argument: {reason}")]
    UnsupportedArgument { reason: String },

    #[error("Unsupported value: {reason}")]
    UnsupportedValue { reason: String },

    // Dispatch errors
    #[error("Property {segment} does not exist on {path}")]
    PropertyNotFound { segment: String, path: String },

    #[error("Args given but {path} is not a function")]
    NotCallable { path: String },

    #[error("{} {} (stale or finalized handle)", STALE_HANDLE_PREFIX, .call_id)]
    ObjectNotFound { call_id: String },

    #[error("No callbacks registered for call {call_id}")]
    UnknownFunctionSet { call_id: String },

    #[error("Unknown callback {function_id} for call {call_id}")]
    UnknownFunction { call_id: String, function_id: u32 },

    #[error("Callback arguments must not contain functions")]
    NestedFunctionArgument,

    // Decode errors
    #[error("Response type {tag} not implemented")]
    UnsupportedResult { tag: String },

    #[error("Remote Error: {message}")]
    Remote { message: String },

    // Channel errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Raised by service code
    #[error("{message}")]
    Service { message: String },
}

/// Result type alias for farcall operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    /// Error raised by service code, reported to the caller verbatim.
    pub fn service(message: impl Into<String>) -> Self {
        RpcError::Service {
            message: message.into(),
        }
    }

    /// Opaque channel failure.
    pub fn transport(message: impl Into<String>) -> Self {
        RpcError::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_argument(reason: impl Into<String>) -> Self {
        RpcError::UnsupportedArgument {
            reason: reason.into(),
        }
    }

    /// True when the error means the addressed handle no longer exists on the
    /// serving side (finalized, evicted, or never registered).
    pub fn is_stale_handle(&self) -> bool {
        match self {
            RpcError::ObjectNotFound { .. } => true,
            RpcError::Remote { message } => message.starts_with(STALE_HANDLE_PREFIX),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::PropertyNotFound {
            segment: "bar".into(),
            path: "foo".into(),
        };
        assert_eq!(err.to_string(), "Property bar does not exist on foo");

        let err = RpcError::Remote {
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Remote Error: boom");
    }

    #[test]
    fn test_service_error_is_verbatim() {
        assert_eq!(RpcError::service("nope").to_string(), "nope");
    }

    #[test]
    fn test_stale_handle_detection() {
        let local = RpcError::ObjectNotFound {
            call_id: "abc".into(),
        };
        assert!(local.is_stale_handle());

        let remote = RpcError::Remote {
            message: local.to_string(),
        };
        assert!(remote.is_stale_handle());

        assert_eq!(
            local.to_string(),
            "No live object for call abc (stale or finalized handle)"
        );
        assert!(local.to_string().starts_with(STALE_HANDLE_PREFIX));
        assert!(!RpcError::NestedFunctionArgument.is_stale_handle());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: RpcError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, RpcError::Json { .. }));
    }
}
