//! Minimal tupa example: a global middleware, a route group with its own
//! middleware, path and query parameters, and a failing handler.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:6969/
//!   curl http://localhost:6969/api/v1/users/42
//!   curl 'http://localhost:6969/api/v1/hello?name=Victor'
//!   curl -X POST http://localhost:6969/api/v1/echo -d '"tupa"'
//!   curl http://localhost:6969/api/v1/broken        # 500 {"Error":...}
//!   curl -X DELETE http://localhost:6969/api/v1/hello  # 405 {"Error":...}

use std::process::ExitCode;
use std::time::Instant;

use http::StatusCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tupa::{BoxError, Context, Method, MiddlewareChain, Next, RouteInfo, Router, Server, ServerConfig};

#[derive(Clone)]
struct RequestStart(Instant);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut app = Router::new();
    app.use_middleware(timing);
    app.group(
        "/api/v1",
        &MiddlewareChain::new().with(require_json_for_post),
        [
            RouteInfo::new(Method::Get, "/users/{id}", get_user),
            RouteInfo::new(Method::Get, "/hello", hello),
            RouteInfo::new(Method::Post, "/echo", echo),
            RouteInfo::new(Method::Get, "/broken", broken),
        ],
    );

    // A bind failure is fatal: report and exit non-zero.
    if let Err(e) = Server::with_config(config).serve(app).await {
        tracing::error!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

// Global: records when the request entered the chain.
fn timing(next: Next) -> Next {
    Next::new(move |ctx: Context| {
        let next = next.clone();
        async move {
            ctx.insert(RequestStart(Instant::now()));
            next.run(ctx).await
        }
    })
}

// Group: POST bodies must be JSON.
fn require_json_for_post(next: Next) -> Next {
    Next::new(move |ctx: Context| {
        let next = next.clone();
        async move {
            let req = ctx.request();
            if *req.method() == http::Method::POST && serde_json::from_slice::<serde_json::Value>(req.body()).is_err() {
                return Err("request body is not valid JSON".into());
            }
            next.run(ctx).await
        }
    })
}

async fn get_user(ctx: Context) -> Result<(), BoxError> {
    let id = ctx.param("id");
    ctx.json(StatusCode::OK, &serde_json::json!({ "id": id, "name": "alice" }))?;
    Ok(())
}

async fn hello(ctx: Context) -> Result<(), BoxError> {
    let name = match ctx.query_param("name") {
        "" => "stranger",
        name => name,
    };
    ctx.send_string(format!("Hello {name}"));
    if let Some(RequestStart(start)) = ctx.get::<RequestStart>() {
        info!(elapsed = ?start.elapsed(), "hello served");
    }
    Ok(())
}

async fn echo(ctx: Context) -> Result<(), BoxError> {
    let value: String = ctx.request().json_body()?;
    ctx.json(StatusCode::OK, &value)?;
    Ok(())
}

async fn broken(_ctx: Context) -> Result<(), BoxError> {
    Err("something went wrong".into())
}
