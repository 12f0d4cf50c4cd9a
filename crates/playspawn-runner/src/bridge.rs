//! Bridge from the blocking engine into async code.
//!
//! The engine runs on a dedicated named OS thread. Its outcome comes back
//! through a oneshot channel, so the awaiting task yields to the runtime until
//! the run is over. Event hooks run on the worker thread.

use std::any::Any;

use tokio::sync::oneshot;
use tracing::{Instrument, Span, debug};

use crate::engine::{EngineHooks, EngineOutcome, EngineRequest, SharedEngine};
use crate::error::EngineError;

/// Name given to engine worker threads.
const WORKER_THREAD_NAME: &str = "playspawn-engine";

/// Run `request` on a worker thread and await its outcome.
///
/// `span` is entered on the worker so everything the engine and its hooks log
/// stays attached to the caller's run.
pub async fn run_on_worker(
    engine: SharedEngine,
    request: EngineRequest,
    hooks: EngineHooks,
    span: Span,
) -> Result<EngineOutcome, EngineError> {
    let (tx, rx) = oneshot::channel();
    let worker_span = span.clone();

    let worker = std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let _entered = worker_span.enter();
            debug!(engine = engine.name(), playbook = %request.playbook.display(), "Engine run starting");
            let outcome = engine.run(request, hooks);
            // Receiver gone means the caller was cancelled; nothing to report to.
            let _ = tx.send(outcome);
        })?;

    let received = rx.await;

    // The worker has already sent (or died), so joining does not block long,
    // but it still must not happen on a runtime thread.
    let joined = tokio::task::spawn_blocking(move || worker.join())
        .instrument(span)
        .await;

    match (received, joined) {
        (Ok(outcome), _) => outcome,
        (Err(_), Ok(Err(payload))) => Err(EngineError::Crashed(panic_message(payload.as_ref()))),
        (Err(_), Ok(Ok(()))) => Err(EngineError::Crashed(
            "worker exited without reporting an outcome".to_string(),
        )),
        (Err(_), Err(join_err)) => Err(EngineError::Crashed(format!(
            "failed to join worker: {join_err}"
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
