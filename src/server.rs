//! HTTP server and graceful shutdown.
//!
//! A [`Server`] moves through four states, observable with
//! [`Server::lifecycle`]:
//!
//! ```text
//! Created ──bind──▶ Listening ──signal──▶ ShuttingDown ──drained / grace expired──▶ Stopped
//! ```
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Stops calling `listener.accept()`, so no new connections are made.
//! 2. Asks every open connection to finish its in-flight request and close.
//! 3. Waits up to the grace period (10 s by default). Connections still open
//!    after that are aborted and their request contexts cancelled.
//! 4. Returns from [`Server::serve`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ServerConfig, resolve_listen_addr};
use crate::error::Error;
use crate::router::Router;

/// Where a [`Server`] is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
}

/// The HTTP server.
pub struct Server {
    config: ServerConfig,
    listener: Option<TcpListener>,
    state: watch::Sender<Lifecycle>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. `":6969"` listens on every interface.
    ///
    /// ```rust,no_run
    /// use tupa::Server;
    /// let server = Server::bind(":6969");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self::with_config(ServerConfig {
            listen_addr: addr.to_owned(),
            ..ServerConfig::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(Lifecycle::Created);
        Self { config, listener: None, state }
    }

    /// Serves on an already-bound listener instead of binding at start.
    pub fn from_listener(listener: TcpListener) -> Self {
        let mut server = Self::with_config(ServerConfig::default());
        server.listener = Some(listener);
        server
    }

    /// How long shutdown waits for in-flight requests.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.state.subscribe()
    }

    /// Serves `router` until SIGTERM or Ctrl-C, then shuts down gracefully.
    ///
    /// Returns `Err` only if the listener cannot be bound; in that case the
    /// server never reaches [`Lifecycle::Listening`].
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Like [`serve`](Self::serve), but shutdown starts when `signal`
    /// resolves instead of on an OS signal.
    pub async fn serve_with_shutdown(
        self,
        mut router: Router,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let Server { config, listener, state } = self;

        let listener = match listener {
            Some(listener) => listener,
            None => TcpListener::bind(resolve_listen_addr(&config.listen_addr).await?).await?,
        };
        let local_addr = listener.local_addr()?;

        router.ensure_root();
        for (method, path) in router.routes() {
            debug!(%method, path, "route");
        }
        let router = Arc::new(router);

        // Parent of every request's cancellation token.
        let requests = CancellationToken::new();
        // Flipped once to ask open connections to wind down.
        let (drain_tx, drain_rx) = watch::channel(false);

        state.send_replace(Lifecycle::Listening);
        info!(addr = %local_addr, "tupa listening");

        let mut tasks = JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting right away,
                // even if more connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    tasks.spawn(serve_connection(
                        TokioIo::new(stream),
                        remote_addr,
                        Arc::clone(&router),
                        requests.clone(),
                        drain_rx.clone(),
                    ));
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        state.send_replace(Lifecycle::ShuttingDown);
        drop(listener);
        drain_tx.send_replace(true);

        let grace = config.grace_period;
        match tokio::time::timeout(grace, drain(&mut tasks)).await {
            Ok(()) => info!("all connections drained"),
            Err(_) => {
                warn!(remaining = tasks.len(), ?grace, "grace period elapsed, aborting connections");
                requests.cancel();
                tasks.shutdown().await;
            }
        }

        state.send_replace(Lifecycle::Stopped);
        info!(addr = %local_addr, "tupa stopped");
        Ok(())
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

async fn serve_connection(
    io: TokioIo<tokio::net::TcpStream>,
    remote_addr: SocketAddr,
    router: Arc<Router>,
    requests: CancellationToken,
    mut drain_rx: watch::Receiver<bool>,
) {
    // `service_fn` is called once per request on the connection, not once
    // per connection.
    let svc = service_fn(move |req| {
        let router = Arc::clone(&router);
        let requests = requests.clone();
        async move { dispatch(router, req, requests).await }
    });

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    error!(peer = %remote_addr, "connection error: {e}");
                }
                break;
            }
            _ = drain_rx.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Every failure becomes a response inside the router, so hyper never sees
/// an error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
    requests: CancellationToken,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    Ok(router.handle_with_token(req, &requests).await)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C) the process receives.
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
