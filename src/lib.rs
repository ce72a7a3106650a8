//! # tupa
//!
//! A minimal HTTP dispatch framework: register routes, wrap them in
//! middleware chains, and let the framework turn every failure into a JSON
//! error envelope.
//!
//! ## The contract
//!
//! tupa does not parse HTTP or match URL patterns itself: `hyper` owns the
//! wire and [`matchit`] owns the radix tree. What tupa adds on top:
//!
//! - **Routes**: `(path, method, handler, middlewares)`, validated when they
//!   are registered. Only GET, POST, PUT, DELETE and PATCH are accepted.
//! - **Middleware chains**: decorators of shape `fn(Next) -> Next`. The
//!   router's global chain always runs before a route's own chain.
//! - **Chain execution**: the chain runs on its own task; the first failure
//!   stops it and becomes a `500` with `{"Error": "<message>"}`. The handler
//!   never runs after a middleware failure.
//! - **Graceful shutdown**: SIGTERM / Ctrl-C stop the listener, in-flight
//!   requests get a bounded grace period (10 s by default).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tupa::{BoxError, Context, Method, Next, RouteInfo, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut app = Router::new();
//!     app.use_middleware(log_requests);
//!     app.register([
//!         RouteInfo::new(Method::Get, "/users/{id}", get_user),
//!         RouteInfo::new(Method::Post, "/users", create_user),
//!     ]);
//!
//!     Server::bind(":6969").serve(app).await.unwrap();
//! }
//!
//! fn log_requests(next: Next) -> Next {
//!     Next::new(move |ctx: Context| {
//!         let next = next.clone();
//!         async move {
//!             tracing::info!(path = ctx.request().path(), "request");
//!             next.run(ctx).await
//!         }
//!     })
//! }
//!
//! async fn get_user(ctx: Context) -> Result<(), BoxError> {
//!     ctx.send_string(format!("user {}", ctx.param("id")));
//!     Ok(())
//! }
//!
//! async fn create_user(ctx: Context) -> Result<(), BoxError> {
//!     let name: String = ctx.request().json_body()?;
//!     ctx.json(http::StatusCode::CREATED, &name)?;
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod dispatcher;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use config::{DEFAULT_GRACE_PERIOD, DEFAULT_LISTEN_ADDR, ServerConfig, resolve_listen_addr};
pub use context::Context;
pub use dispatcher::ApiError;
pub use error::{BoxError, Error, RouteError};
pub use handler::{BoxFuture, Handler, HandlerResult, Next};
pub use method::{Method, UnknownMethod};
pub use middleware::{ChainFailure, Middleware, MiddlewareChain};
pub use request::Request;
pub use response::{ContentType, ResponseWriter};
pub use router::{RouteInfo, Router};
pub use server::{Lifecycle, Server};
