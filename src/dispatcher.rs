//! Per-route dispatch: middleware chain, method re-check, handler, error
//! envelope.
//!
//! Every path through [`dispatch`] leaves exactly one response in the
//! context's writer. Failures always end up as
//!
//! ```text
//! {"Error":"<message>"}      content-type: application/json
//! ```

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use http::StatusCode;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::method::Method;
use crate::response::ResponseWriter;
use crate::middleware::{self, MiddlewareChain};
use crate::router::RouteInfo;

pub(crate) const METHOD_NOT_ALLOWED: &str = "method not allowed";
pub(crate) const NOT_FOUND: &str = "not found";
pub(crate) const HANDLER_PANICKED: &str = "handler panicked";

/// The JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ApiError<'a> {
    #[serde(rename = "Error")]
    pub error: &'a str,
}

/// Runs one request through `global ++ route.middlewares` and then the
/// route handler.
pub(crate) async fn dispatch(global: &MiddlewareChain, route: &RouteInfo, ctx: Context) {
    let chain = MiddlewareChain::effective(global, &route.middlewares);
    let failures = middleware::execute(chain, ctx.clone()).await;

    if let Some(first) = failures.first() {
        write_error(&ctx, StatusCode::INTERNAL_SERVER_ERROR, &first.message);
        return;
    }

    debug!(method = %ctx.request().method(), path = ctx.request().path(), route = %route.path, "dispatch");

    // The router already matched on method; this guards direct callers.
    if Method::from_http(ctx.request().method()) != Some(route.method) {
        write_error(&ctx, StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED);
        return;
    }

    match AssertUnwindSafe(route.handler.run(ctx.clone())).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(method = %route.method, route = %route.path, error = %e, "handler failed");
            write_error(&ctx, StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
        Err(panic) => {
            error!(method = %route.method, route = %route.path, panic = panic_message(&*panic), "handler panicked");
            write_error(&ctx, StatusCode::INTERNAL_SERVER_ERROR, HANDLER_PANICKED);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

/// Replaces whatever is buffered with an error envelope.
///
/// An encoding failure is logged and the response is left with the status
/// only; it is never propagated.
pub(crate) fn write_error(ctx: &Context, status: StatusCode, message: &str) {
    write_envelope(&mut ctx.response(), status, message);
}

pub(crate) fn write_envelope(res: &mut ResponseWriter, status: StatusCode, message: &str) {
    res.reset();
    if let Err(e) = res.json(status, &ApiError { error: message }) {
        error!(%status, error = %e, "failed to write error envelope");
        res.write_header(status);
    }
}
