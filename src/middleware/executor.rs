//! Chain executor.
//!
//! Runs an effective middleware chain on its own task and reports back over a
//! oneshot channel. The caller waits for that report before deciding whether
//! the route handler runs.
//!
//! Failure policy is **stop at first failure**. A middleware that returns an
//! error without calling `next` ends the chain there. Every layer is observed
//! individually, and a failure is recorded at the layer it originates from:
//! when an outer layer passes an inner failure along (or replaces it with its
//! own), no second entry is added. A failure that an outer layer swallows is
//! still recorded, so the request still fails.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, warn};

use super::{BoxedMiddleware, MiddlewareChain};
use crate::context::Context;
use crate::handler::Next;

/// One middleware failure, in chain order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainFailure {
    /// Index in the effective chain (global first). `None` when the chain
    /// task itself died.
    pub position: Option<usize>,
    pub middleware: &'static str,
    pub message: String,
}

type Recorder = Arc<Mutex<Vec<ChainFailure>>>;

/// Runs `chain` against `ctx` on a spawned task and waits for its report.
///
/// Returns every recorded failure, empty when the whole chain let the request
/// through. Dropping the returned future aborts the chain task, so an aborted
/// connection does not leave middlewares running behind it.
pub async fn execute(chain: MiddlewareChain, ctx: Context) -> Vec<ChainFailure> {
    let (tx, rx) = oneshot::channel();

    let _task = AbortOnDropHandle::new(tokio::spawn(async move {
        let failures = run(&chain, ctx).await;
        let _ = tx.send(failures);
    }));

    match rx.await {
        Ok(failures) => failures,
        Err(_) => {
            error!("middleware chain task ended without reporting");
            vec![ChainFailure {
                position: None,
                middleware: "<chain>",
                message: "middleware chain aborted".to_owned(),
            }]
        }
    }
}

async fn run(chain: &MiddlewareChain, ctx: Context) -> Vec<ChainFailure> {
    let recorder: Recorder = Arc::default();

    let entry = chain
        .layers()
        .iter()
        .enumerate()
        .rev()
        .fold(Next::noop(), |next, (position, layer)| {
            observe(position, layer, layer.wrap(next), &recorder)
        });

    // Every layer is observed, so an error reaching the top has already been
    // recorded on the way out.
    let _ = entry.run(ctx).await;

    let failures = std::mem::take(&mut *recorder.lock());
    for f in &failures {
        warn!(middleware = f.middleware, position = ?f.position, error = %f.message, "middleware rejected request");
    }
    failures
}

/// Wraps one layer so that an error it produces is recorded, unless a deeper
/// layer already recorded one during this call.
fn observe(position: usize, layer: &BoxedMiddleware, wrapped: Next, recorder: &Recorder) -> Next {
    let middleware = layer.name();
    let recorder = Arc::clone(recorder);

    Next::new(move |ctx: Context| {
        let wrapped = wrapped.clone();
        let recorder = Arc::clone(&recorder);
        async move {
            let before = recorder.lock().len();
            let result = wrapped.run(ctx).await;
            if let Err(e) = &result {
                let mut failures = recorder.lock();
                if failures.len() == before {
                    failures.push(ChainFailure {
                        position: Some(position),
                        middleware,
                        message: e.to_string(),
                    });
                }
            }
            result
        }
    })
}
