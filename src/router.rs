//! Route registry.
//!
//! One radix tree over paths ([`matchit`]), each leaf holding a small table of
//! method → route. Keeping a single tree is what lets a request for a known
//! path with the wrong method be answered with `405` instead of `404`.
//!
//! The registry is built once, before serving. [`Server::serve`] takes the
//! [`Router`] by value, so nothing can be registered once requests flow.
//!
//! [`Server::serve`]: crate::Server::serve

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use matchit::Router as MatchitRouter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::dispatcher::{self, METHOD_NOT_ALLOWED, NOT_FOUND};
use crate::error::{BoxError, RouteError};
use crate::handler::{Handler, Next};
use crate::method::Method;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::request::Request;
use crate::response::ResponseWriter;

// ── RouteInfo ─────────────────────────────────────────────────────────────────

/// A `(path, method)` pair bound to a handler and its own middlewares.
///
/// ```rust
/// use tupa::{BoxError, Context, Method, RouteInfo};
///
/// async fn get_user(ctx: Context) -> Result<(), BoxError> {
///     ctx.send_string(format!("user {}", ctx.param("id")));
///     Ok(())
/// }
///
/// let route = RouteInfo::new(Method::Get, "/users/{id}", get_user);
/// assert_eq!(route.path(), "/users/{id}");
/// ```
#[derive(Clone, Debug)]
pub struct RouteInfo {
    pub(crate) path: String,
    pub(crate) method: Method,
    pub(crate) handler: Next,
    pub(crate) middlewares: MiddlewareChain,
}

impl RouteInfo {
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            path: path.into(),
            method,
            handler: Next::new(handler),
            middlewares: MiddlewareChain::new(),
        }
    }

    /// Appends a route-specific middleware. Runs after every global one.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn path(&self) -> &str { &self.path }
    pub fn method(&self) -> Method { self.method }
    pub fn middlewares(&self) -> &MiddlewareChain { &self.middlewares }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application router: route registry plus the global middleware chain.
#[derive(Default)]
pub struct Router {
    tree: MatchitRouter<usize>,
    /// Path pattern → index into `endpoints`.
    index: HashMap<String, usize>,
    endpoints: Vec<Vec<Arc<RouteInfo>>>,
    order: Vec<(Method, String)>,
    global: MiddlewareChain,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the global chain.
    ///
    /// The effective chain is resolved per request, so this also applies to
    /// routes registered earlier.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.global.push(middleware);
        self
    }

    pub fn global_middlewares(&self) -> &MiddlewareChain {
        &self.global
    }

    /// Registers `routes`, aborting on the first invalid one.
    ///
    /// # Panics
    ///
    /// Panics on a disallowed method, a duplicate `(path, method)` or an
    /// invalid path pattern. These are configuration bugs; startup should
    /// not continue past them. Use [`try_register`](Self::try_register) to
    /// handle them yourself.
    pub fn register(&mut self, routes: impl IntoIterator<Item = RouteInfo>) -> &mut Self {
        if let Err(e) = self.try_register(routes) {
            error!(error = %e, "route registration failed");
            panic!("{e}");
        }
        self
    }

    /// Registers `routes`, stopping at the first invalid one. Routes before
    /// it stay registered.
    pub fn try_register(&mut self, routes: impl IntoIterator<Item = RouteInfo>) -> Result<(), RouteError> {
        for route in routes {
            self.insert(route)?;
        }
        Ok(())
    }

    /// Registers `routes` under `prefix`, appending `middlewares` after each
    /// route's own.
    ///
    /// # Panics
    ///
    /// Same conditions as [`register`](Self::register).
    pub fn group(
        &mut self,
        prefix: &str,
        middlewares: &MiddlewareChain,
        routes: impl IntoIterator<Item = RouteInfo>,
    ) -> &mut Self {
        let prefix = prefix.trim_end_matches('/');
        let routes = routes.into_iter().map(|mut route| {
            route.path = match route.path.as_str() {
                "" | "/" if !prefix.is_empty() => prefix.to_owned(),
                "" => "/".to_owned(),
                path => format!("{prefix}{path}"),
            };
            route.middlewares.extend(middlewares);
            route
        });
        self.register(routes.collect::<Vec<_>>())
    }

    /// Registered `(method, path)` pairs, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (Method, &str)> + '_ {
        self.order.iter().map(|(m, p)| (*m, p.as_str()))
    }

    fn insert(&mut self, route: RouteInfo) -> Result<(), RouteError> {
        if !route.method.is_allowed() {
            return Err(RouteError::MethodNotAllowed { method: route.method, path: route.path });
        }

        let slot = match self.index.get(&route.path) {
            Some(&slot) => slot,
            None => {
                let slot = self.endpoints.len();
                self.tree
                    .insert(route.path.clone(), slot)
                    .map_err(|source| RouteError::InvalidPath { path: route.path.clone(), source })?;
                self.index.insert(route.path.clone(), slot);
                self.endpoints.push(Vec::new());
                slot
            }
        };

        let table = &mut self.endpoints[slot];
        if table.iter().any(|r| r.method == route.method) {
            return Err(RouteError::Duplicate { method: route.method, path: route.path });
        }

        debug!(method = %route.method, path = %route.path, middlewares = route.middlewares.len(), "route registered");
        self.order.push((route.method, route.path.clone()));
        table.push(Arc::new(route));
        Ok(())
    }

    /// Registers the `GET /` welcome handler unless `/` is already claimed
    /// under any method. Calling it again is a no-op.
    pub(crate) fn ensure_root(&mut self) {
        if self.index.contains_key("/") {
            return;
        }
        self.register([RouteInfo::new(Method::Get, "/", welcome)]);
    }

    /// Dispatches one request in-process and returns the finished response.
    ///
    /// This is what the server calls for every request; tests can call it
    /// directly without a socket.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        self.handle_with_token(req, &CancellationToken::new()).await
    }

    pub(crate) async fn handle_with_token<B>(
        &self,
        req: http::Request<B>,
        shutdown: &CancellationToken,
    ) -> http::Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let Ok(matched) = self.tree.at(parts.uri.path()) else {
            return error_response(StatusCode::NOT_FOUND, NOT_FOUND);
        };
        let route = Method::from_http(&parts.method).and_then(|method| {
            self.endpoints[*matched.value].iter().find(|r| r.method == method)
        });
        let Some(route) = route else {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED);
        };
        let params: HashMap<String, String> = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let e: BoxError = e.into();
                warn!(path = parts.uri.path(), error = %e, "failed to read request body");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read request body");
            }
        };

        let request = Request::new(http::Request::from_parts(parts, body)).with_params(params);
        let token = shutdown.child_token();
        let ctx = Context::with_token(request, token.clone());
        {
            // Cancelled when this request is done, whichever way it ends.
            let _guard = token.drop_guard();
            dispatcher::dispatch(&self.global, route, ctx.clone()).await;
        }
        ctx.take_response().into_http()
    }
}

fn error_response(status: StatusCode, message: &str) -> http::Response<Full<Bytes>> {
    let mut res = ResponseWriter::new();
    dispatcher::write_envelope(&mut res, status, message);
    res.into_http()
}

async fn welcome(ctx: Context) -> Result<(), BoxError> {
    ctx.json(StatusCode::OK, "Welcome to the tupa framework!")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(_ctx: Context) -> Result<(), BoxError> {
        Ok(())
    }

    #[test]
    fn rejects_disallowed_method() {
        let mut router = Router::new();
        let err = router
            .try_register([RouteInfo::new(Method::Options, "/x", ok)])
            .unwrap_err();
        assert!(matches!(err, RouteError::MethodNotAllowed { method: Method::Options, .. }));
        assert_eq!(router.routes().count(), 0);
    }

    #[test]
    #[should_panic(expected = "not allowed")]
    fn register_panics_on_disallowed_method() {
        Router::new().register([RouteInfo::new(Method::Head, "/x", ok)]);
    }

    #[test]
    fn rejects_duplicate_path_and_method() {
        let mut router = Router::new();
        router.register([RouteInfo::new(Method::Get, "/x", ok), RouteInfo::new(Method::Post, "/x", ok)]);
        let err = router.try_register([RouteInfo::new(Method::Get, "/x", ok)]).unwrap_err();
        assert!(matches!(err, RouteError::Duplicate { method: Method::Get, .. }));
    }

    #[test]
    fn rejects_conflicting_patterns() {
        let mut router = Router::new();
        router.register([RouteInfo::new(Method::Get, "/users/{id}", ok)]);
        let err = router
            .try_register([RouteInfo::new(Method::Get, "/users/{name}", ok)])
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidPath { .. }));
    }

    #[test]
    fn routes_are_listed_in_registration_order() {
        let mut router = Router::new();
        router.register([
            RouteInfo::new(Method::Post, "/contrA", ok),
            RouteInfo::new(Method::Get, "/contrA", ok),
            RouteInfo::new(Method::Delete, "/contrC/{id}", ok),
        ]);
        let routes: Vec<_> = router.routes().collect();
        assert_eq!(
            routes,
            [(Method::Post, "/contrA"), (Method::Get, "/contrA"), (Method::Delete, "/contrC/{id}")]
        );
    }

    #[test]
    fn group_prefixes_paths_and_appends_middlewares() {
        fn route_mw(next: Next) -> Next { next }
        fn group_mw(next: Next) -> Next { next }

        let mut router = Router::new();
        router.group(
            "/api/v1/",
            &MiddlewareChain::new().with(group_mw),
            [RouteInfo::new(Method::Get, "/cats", ok).middleware(route_mw), RouteInfo::new(Method::Get, "/", ok)],
        );

        let routes: Vec<_> = router.routes().collect();
        assert_eq!(routes, [(Method::Get, "/api/v1/cats"), (Method::Get, "/api/v1")]);

        let cats = &router.endpoints[router.index["/api/v1/cats"]][0];
        let names: Vec<_> = cats.middlewares.names().collect();
        assert!(names[0].ends_with("route_mw"));
        assert!(names[1].ends_with("group_mw"));
    }

    #[test]
    fn empty_group_and_empty_path_register_root() {
        let mut router = Router::new();
        router.group("", &MiddlewareChain::new(), [RouteInfo::new(Method::Get, "", ok)]);
        router.group("/", &MiddlewareChain::new(), [RouteInfo::new(Method::Post, "", ok)]);
        assert_eq!(router.routes().collect::<Vec<_>>(), [(Method::Get, "/"), (Method::Post, "/")]);
    }

    #[test]
    fn ensure_root_respects_existing_root() {
        let mut router = Router::new();
        router.register([RouteInfo::new(Method::Post, "/", ok)]);
        router.ensure_root();
        assert_eq!(router.routes().collect::<Vec<_>>(), [(Method::Post, "/")]);

        let mut router = Router::new();
        router.ensure_root();
        router.ensure_root();
        assert_eq!(router.routes().collect::<Vec<_>>(), [(Method::Get, "/")]);
    }
}
