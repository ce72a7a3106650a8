//! Unified error types.

use crate::method::Method;

/// Error type for handlers and middleware.
///
/// Anything that implements `std::error::Error` converts into it, so `?`
/// works on any error inside a handler. Its `Display` output becomes the
/// message of the JSON error envelope.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by tupa's fallible operations.
///
/// Application-level failures (middleware rejections, handler errors) are
/// answered as HTTP responses, not as `Error`s. This type surfaces
/// infrastructure and configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address `{addr}`: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A route that cannot be registered.
///
/// These are operator mistakes, found while the route table is being built.
/// [`Router::register`](crate::Router::register) treats them as fatal.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("HTTP method {method} is not allowed for route `{path}`; use one of GET, POST, PUT, DELETE, PATCH")]
    MethodNotAllowed { method: Method, path: String },

    #[error("route {method} `{path}` is already registered")]
    Duplicate { method: Method, path: String },

    #[error("invalid route `{path}`: {source}")]
    InvalidPath {
        path: String,
        source: matchit::InsertError,
    },
}
