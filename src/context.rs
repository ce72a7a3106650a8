//! Request-scoped context handed to every middleware and handler.
//!
//! A [`Context`] is a cheap, clonable handle around one in-flight request.
//! Clones share the same request, response sink and extensions, which is how
//! a value inserted by a middleware becomes visible to the handler that runs
//! after it, even though the middleware chain runs on its own task.
//!
//! Request-lifetime values are stored by type, not by string key:
//!
//! ```rust
//! use bytes::Bytes;
//! use tupa::{Context, Request};
//!
//! #[derive(Clone)]
//! struct UserId(String);
//!
//! let ctx = Context::new(Request::new(http::Request::new(Bytes::new())));
//! ctx.insert(UserId("2602".into()));
//! assert_eq!(ctx.get::<UserId>().map(|u| u.0).as_deref(), Some("2602"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use http::{Extensions, StatusCode};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::request::Request;
use crate::response::{ContentType, ResponseWriter};

#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    request: Request,
    response: Mutex<ResponseWriter>,
    extensions: Mutex<Extensions>,
    cancel: CancellationToken,
}

impl Context {
    /// A context with a fresh, unparented cancellation token.
    pub fn new(request: Request) -> Self {
        Self::with_token(request, CancellationToken::new())
    }

    pub(crate) fn with_token(request: Request, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                request,
                response: Mutex::new(ResponseWriter::new()),
                extensions: Mutex::new(Extensions::new()),
                cancel,
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Locks the response sink.
    ///
    /// Do not hold the guard across an `.await`.
    pub fn response(&self) -> MutexGuard<'_, ResponseWriter> {
        self.inner.response.lock()
    }

    /// Appends `s` to the response body. Status stays `200 OK` unless
    /// something set it earlier.
    pub fn send_string(&self, s: impl AsRef<str>) {
        self.response().write(s.as_ref().as_bytes());
    }

    /// Writes `body` with an explicit content type.
    pub fn send_bytes(&self, content_type: ContentType, body: &[u8]) {
        let mut res = self.response();
        res.content_type(content_type);
        res.write(body);
    }

    pub fn html(&self, s: impl AsRef<str>) {
        self.send_bytes(ContentType::Html, s.as_ref().as_bytes());
    }

    /// Writes `value` as a JSON body with `status`.
    pub fn json<T: Serialize + ?Sized>(&self, status: StatusCode, value: &T) -> Result<(), Error> {
        self.response().json(status, value)
    }

    /// Path parameter `name`, or `""` when the route has no such parameter.
    pub fn param(&self, name: &str) -> &str {
        self.inner.request.param(name).unwrap_or_default()
    }

    /// First query value for `name`, or `""` when absent.
    pub fn query_param(&self, name: &str) -> &str {
        self.inner.request.query(name).unwrap_or_default()
    }

    /// All query values grouped by key. Empty when the URI has no query.
    pub fn query_params(&self) -> HashMap<String, Vec<String>> {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in self.inner.request.query_pairs() {
            params.entry(k.clone()).or_default().push(v.clone());
        }
        params
    }

    /// Stores a request-scoped value, returning the previous value of that type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.inner.extensions.lock().insert(value)
    }

    /// A clone of the request-scoped value of type `T`, if any.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner.extensions.lock().get::<T>().cloned()
    }

    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner.extensions.lock().remove::<T>()
    }

    /// Cancelled once the dispatcher is done with this request, or when the
    /// server gives up on in-flight work at the end of the shutdown grace
    /// period. Long-running handlers can `select!` on it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Takes the buffered response, leaving an empty writer behind.
    pub(crate) fn take_response(&self) -> ResponseWriter {
        std::mem::take(&mut *self.response())
    }
}
