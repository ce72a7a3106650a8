//! Middleware layer.
//!
//! A middleware is a decorator: it takes the rest of the chain as a [`Next`]
//! and returns a new [`Next`] that wraps it. Inside, it can inspect or mutate
//! the [`Context`](crate::Context), stop the request by returning an error,
//! or call `next.run(ctx)` to continue.
//!
//! Any `fn(Next) -> Next` (or closure of that shape) is a middleware:
//!
//! ```rust
//! use tupa::{Context, MiddlewareChain, Next};
//!
//! fn require_token(next: Next) -> Next {
//!     Next::new(move |ctx: Context| {
//!         let next = next.clone();
//!         async move {
//!             if ctx.request().header("authorization").is_none() {
//!                 return Err("missing authorization header".into());
//!             }
//!             next.run(ctx).await
//!         }
//!     })
//! }
//!
//! let mut chain = MiddlewareChain::new();
//! chain.push(require_token);
//! assert_eq!(chain.len(), 1);
//! ```
//!
//! For a request, the effective chain is the router's global chain followed
//! by the route's own chain. [`execute`] runs it.

mod executor;

use std::fmt;
use std::sync::Arc;

use crate::handler::Next;

pub use executor::{ChainFailure, execute};

/// A request interceptor in decorator shape.
pub trait Middleware: Send + Sync + 'static {
    /// Wraps `next`, returning the handler that runs in its place.
    fn wrap(&self, next: Next) -> Next;

    /// Name used in logs and in [`ChainFailure`]. Defaults to the type name,
    /// which for a plain `fn` item is its path.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> Middleware for F
where
    F: Fn(Next) -> Next + Send + Sync + 'static,
{
    fn wrap(&self, next: Next) -> Next {
        self(next)
    }
}

/// A shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An ordered sequence of middlewares. Insertion order is execution order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<BoxedMiddleware>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` to the end of the chain.
    pub fn push(&mut self, middleware: impl Middleware) {
        self.layers.push(Arc::new(middleware));
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.push(middleware);
        self
    }

    pub fn extend(&mut self, other: &MiddlewareChain) {
        self.layers.extend(other.layers.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.layers.iter().map(|m| m.name())
    }

    /// `global ++ route`, global always first.
    pub fn effective(global: &MiddlewareChain, route: &MiddlewareChain) -> MiddlewareChain {
        let mut layers = Vec::with_capacity(global.len() + route.len());
        layers.extend(global.layers.iter().cloned());
        layers.extend(route.layers.iter().cloned());
        MiddlewareChain { layers }
    }

    /// Folds the chain around `terminal`: the first middleware ends up
    /// outermost, so it runs first.
    pub fn compose(&self, terminal: Next) -> Next {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, layer| layer.wrap(next))
    }

    pub(crate) fn layers(&self) -> &[BoxedMiddleware] {
        &self.layers
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
