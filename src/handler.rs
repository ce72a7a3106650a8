//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! Routes and middleware layers hold handlers of *different* concrete types,
//! so every handler is erased behind one trait object:
//!
//! ```text
//! async fn hello(ctx: Context) -> Result<(), E> { … }  ← user writes this
//!        ↓ RouteInfo::new(Method::Get, "/", hello)
//! hello.into_boxed_handler()                        ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                        ← stored as BoxedHandler
//!        ↓
//! handler.call(ctx) at request time                 ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(ctx).await.map_err(Into::into) })
//! ```
//!
//! [`Next`] is the same erased handler seen from inside a middleware: the
//! rest of the chain, ready to be called (or not).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;

// ── Internal types ────────────────────────────────────────────────────────────

/// What every handler and middleware layer resolves to.
pub type HandlerResult = Result<(), BoxError>;

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` because the middleware chain is driven on a spawned task.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<HandlerResult>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any function or closure of the shape
///
/// ```text
/// async fn name(ctx: Context) -> Result<(), E>   where E: Into<BoxError>
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, E> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
}

impl<F, Fut, E> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, E> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn call(&self, ctx: Context) -> BoxFuture<HandlerResult> {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The remainder of a middleware chain, as seen by one middleware.
///
/// A middleware receives a `Next` and returns a new `Next` that decides
/// whether (and when) to call the one it was given:
///
/// ```rust
/// use tupa::{Context, Next};
///
/// fn audit(next: Next) -> Next {
///     Next::new(move |ctx: Context| {
///         let next = next.clone();
///         async move {
///             tracing::info!(path = ctx.request().path(), "audit");
///             next.run(ctx).await
///         }
///     })
/// }
/// ```
#[derive(Clone)]
pub struct Next(BoxedHandler);

impl Next {
    pub fn new(handler: impl Handler) -> Self {
        Self(handler.into_boxed_handler())
    }

    /// A `Next` that does nothing and succeeds. Terminates a chain.
    pub fn noop() -> Self {
        Self::new(|_ctx: Context| async { Ok::<(), BoxError>(()) })
    }

    pub fn run(&self, ctx: Context) -> BoxFuture<HandlerResult> {
        self.0.call(ctx)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}
