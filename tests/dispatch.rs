//! In-process dispatch through `Router::handle`: no socket involved.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use tupa::{BoxError, Context, Method, MiddlewareChain, Next, RouteError, RouteInfo, Router};

type Log = Arc<Mutex<Vec<&'static str>>>;

async fn send(router: &Router, method: http::Method, uri: &str, body: &str) -> (StatusCode, String) {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::from(body.to_owned())))
        .unwrap();
    let res = router.handle(req).await;
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    send(router, http::Method::GET, uri, "").await
}

/// Middleware that appends `label` to `log` and continues.
fn recording(label: &'static str, log: &Log) -> impl Fn(Next) -> Next + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |next: Next| {
        let log = Arc::clone(&log);
        Next::new(move |ctx: Context| {
            let next = next.clone();
            let log = Arc::clone(&log);
            async move {
                log.lock().push(label);
                next.run(ctx).await
            }
        })
    }
}

/// Middleware that records `label` and rejects every request.
fn rejecting(label: &'static str, log: &Log) -> impl Fn(Next) -> Next + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |_next: Next| {
        let log = Arc::clone(&log);
        Next::new(move |_ctx: Context| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(label);
                Err::<(), BoxError>(format!("{label} rejected the request").into())
            }
        })
    }
}

type Ready = std::future::Ready<Result<(), BoxError>>;

fn recording_handler(log: &Log) -> impl Fn(Context) -> Ready + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |ctx: Context| -> Ready {
        log.lock().push("handler");
        ctx.send_string("done");
        std::future::ready(Ok(()))
    }
}

async fn hello(ctx: Context) -> Result<(), BoxError> {
    ctx.send_string("hello");
    Ok(())
}

#[test]
fn registration_accepts_only_the_five_routable_methods() {
    let mut router = Router::new();
    router.register([
        RouteInfo::new(Method::Get, "/x", hello),
        RouteInfo::new(Method::Post, "/x", hello),
        RouteInfo::new(Method::Put, "/x", hello),
        RouteInfo::new(Method::Delete, "/x", hello),
        RouteInfo::new(Method::Patch, "/x", hello),
    ]);
    assert_eq!(router.routes().count(), 5);

    for method in [Method::Head, Method::Options, Method::Connect, Method::Trace] {
        let err = router.try_register([RouteInfo::new(method, "/y", hello)]).unwrap_err();
        assert!(matches!(err, RouteError::MethodNotAllowed { .. }), "{method} was accepted");
    }
    assert_eq!(router.routes().count(), 5);
}

#[tokio::test]
async fn global_middleware_runs_before_route_middleware() {
    let log = Log::default();
    let mut router = Router::new();
    router.use_middleware(recording("A", &log));
    router.use_middleware(recording("B", &log));
    router.register([RouteInfo::new(Method::Get, "/x", recording_handler(&log)).middleware(recording("C", &log))]);

    let (status, body) = get(&router, "/x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "done");
    assert_eq!(*log.lock(), ["A", "B", "C", "handler"]);
}

#[tokio::test]
async fn failing_middleware_stops_the_chain_and_skips_the_handler() {
    let log = Log::default();
    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/x", recording_handler(&log))
        .middleware(recording("ok", &log))
        .middleware(rejecting("fail", &log))
        .middleware(recording("ok2", &log))]);

    let (status, body) = get(&router, "/x").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, r#"{"Error":"fail rejected the request"}"#);
    assert_eq!(*log.lock(), ["ok", "fail"]);
}

#[tokio::test]
async fn failure_in_global_middleware_skips_route_middleware() {
    let log = Log::default();
    let mut router = Router::new();
    router.use_middleware(rejecting("global", &log));
    router.register([RouteInfo::new(Method::Get, "/x", recording_handler(&log)).middleware(recording("route", &log))]);

    let (status, _) = get(&router, "/x").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(*log.lock(), ["global"]);
}

#[tokio::test]
async fn swallowed_middleware_failure_still_fails_the_request() {
    fn swallow(next: Next) -> Next {
        Next::new(move |ctx: Context| {
            let next = next.clone();
            async move {
                let _ = next.run(ctx).await;
                Ok::<(), BoxError>(())
            }
        })
    }

    let log = Log::default();
    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/x", recording_handler(&log))
        .middleware(swallow)
        .middleware(rejecting("inner", &log))]);

    let (status, body) = get(&router, "/x").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, r#"{"Error":"inner rejected the request"}"#);
    assert!(!log.lock().contains(&"handler"));
}

#[derive(Clone)]
struct Tag(String);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_do_not_share_state() {
    fn tag_from_header(next: Next) -> Next {
        Next::new(move |ctx: Context| {
            let next = next.clone();
            async move {
                let tag = ctx.request().header("x-tag").unwrap_or_default().to_owned();
                ctx.insert(Tag(tag));
                tokio::task::yield_now().await;
                next.run(ctx).await
            }
        })
    }

    async fn echo_tag(ctx: Context) -> Result<(), BoxError> {
        let Tag(tag) = ctx.get::<Tag>().ok_or("no tag")?;
        tokio::task::yield_now().await;
        ctx.send_string(format!("{}:{tag}", ctx.param("id")));
        Ok(())
    }

    let mut router = Router::new();
    router.use_middleware(tag_from_header);
    router.register([RouteInfo::new(Method::Get, "/items/{id}", echo_tag)]);
    let router = Arc::new(router);

    let mut handles = Vec::with_capacity(1000);
    for i in 0..1000 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let req = http::Request::builder()
                .uri(format!("/items/{i}"))
                .header("x-tag", format!("tag-{i}"))
                .body(Full::new(Bytes::new()))
                .unwrap();
            let res = router.handle(req).await;
            assert_eq!(res.status(), StatusCode::OK);
            let body = res.into_body().collect().await.unwrap().to_bytes();
            (i, body)
        }));
    }

    for handle in handles {
        let (i, body) = handle.await.unwrap();
        assert_eq!(body, format!("{i}:tag-{i}").as_bytes());
    }
}

#[tokio::test]
async fn wrong_method_on_known_path_is_405() {
    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/x", hello)]);

    let (status, body) = send(&router, http::Method::POST, "/x", "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, r#"{"Error":"method not allowed"}"#);

    // Methods that can never be routed get the same answer.
    let (status, _) = send(&router, http::Method::OPTIONS, "/x", "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/x", hello)]);

    let (status, body) = get(&router, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"Error":"not found"}"#);
}

#[tokio::test]
async fn send_string_round_trips() {
    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/hello", hello)]);

    let (status, body) = get(&router, "/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn handler_error_replaces_partial_output() {
    async fn half_done(ctx: Context) -> Result<(), BoxError> {
        ctx.send_string("partial ");
        Err("disk on fire".into())
    }

    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/x", half_done)]);

    let res = router
        .handle(http::Request::builder().uri("/x").body(Full::new(Bytes::new())).unwrap())
        .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.headers()[http::header::CONTENT_TYPE], "application/json");
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, r#"{"Error":"disk on fire"}"#.as_bytes());
}

#[tokio::test]
async fn path_and_query_parameters_reach_the_handler() {
    async fn show(ctx: Context) -> Result<(), BoxError> {
        let tags = ctx.query_params().remove("tag").unwrap_or_default();
        ctx.send_string(format!(
            "{} {} [{}] missing={:?}",
            ctx.param("id"),
            ctx.query_param("name"),
            tags.join(","),
            ctx.query_param("absent"),
        ));
        Ok(())
    }

    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/users/{id}", show)]);

    let (status, body) = get(&router, "/users/42?name=Victor%20Hugo&tag=a&tag=b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"42 Victor Hugo [a,b] missing="""#);
}

#[tokio::test]
async fn json_bodies_are_decoded_and_encoded() {
    #[derive(serde::Deserialize, serde::Serialize)]
    struct Cat {
        name: String,
    }

    async fn create(ctx: Context) -> Result<(), BoxError> {
        let cat: Cat = ctx.request().json_body()?;
        ctx.json(StatusCode::CREATED, &cat)?;
        Ok(())
    }

    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Post, "/cats", create)]);

    let (status, body) = send(&router, http::Method::POST, "/cats", r#"{"name":"Tom"}"#).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, r#"{"name":"Tom"}"#);

    let (status, body) = send(&router, http::Method::POST, "/cats", "not json").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with(r#"{"Error":"#));
}

#[tokio::test]
async fn group_middlewares_run_after_route_middlewares() {
    let log = Log::default();
    let mut router = Router::new();
    router.use_middleware(recording("global", &log));
    router.group(
        "/api/v1",
        &MiddlewareChain::new().with(recording("group", &log)),
        [RouteInfo::new(Method::Get, "/cats", recording_handler(&log)).middleware(recording("route", &log))],
    );

    let (status, _) = get(&router, "/api/v1/cats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(*log.lock(), ["global", "route", "group", "handler"]);

    let (status, _) = get(&router, "/cats").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn global_middleware_added_after_registration_still_applies() {
    let log = Log::default();
    let mut router = Router::new();
    router.register([RouteInfo::new(Method::Get, "/x", recording_handler(&log))]);
    router.use_middleware(recording("late", &log));

    get(&router, "/x").await;
    assert_eq!(*log.lock(), ["late", "handler"]);
}
