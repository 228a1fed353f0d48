// src/core/pipeline/mod.rs

//! The deferred-action pipeline abstraction.
//!
//! A pipeline is an ordered list of [`Step`]s. Each step optionally carries a
//! deferred cleanup. The runner's one rule is what makes cleanup reliable
//! even when a step only partially succeeds: *the cleanup is pushed onto the
//! stack before the step's forward action runs*, not after it returns. A
//! step like `pause` can have effect on some agents before ultimately
//! failing; its `resume` cleanup must still run.
//!
//! An explicit `Vec` cleanup stack is used here rather than a host-language
//! scope-exit/RAII construct, because forward progress and cleanup run under
//! two different cancellation scopes (`exec_ctx` and `defer_ctx`) — a single
//! defer/drop-based construct would tie cleanup's lifetime to the same scope
//! as the forward action, which is exactly what must not happen: an aborted
//! operator request still needs `resume` and lock release to complete.

pub mod failover;
pub mod steps;

use crate::core::errors::{FailoverError, Result};
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One pipeline step: a name (used in logs and the cleanup stack), a forward
/// action, and an optional deferred cleanup.
pub struct Step {
    name: &'static str,
    action: Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>,
    cleanup: Option<Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>>,
}

impl Step {
    pub fn new<A, AF>(name: &'static str, action: A) -> Self
    where
        A: FnOnce() -> AF + Send + 'static,
        AF: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            action: Box::new(move || Box::pin(action())),
            cleanup: None,
        }
    }

    pub fn with_cleanup<C, CF>(mut self, cleanup: C) -> Self
    where
        C: FnOnce() -> CF + Send + 'static,
        CF: Future<Output = ()> + Send + 'static,
    {
        self.cleanup = Some(Box::new(move || Box::pin(cleanup())));
        self
    }
}

/// Runs an ordered sequence of [`Step`]s, maintaining the LIFO cleanup stack
/// described above. Step *k+1* begins only after step *k* returns.
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Runs every step in order. On the first forward failure (or after the
    /// last step succeeds), drains the cleanup stack LIFO. Cleanup failures
    /// are the caller's concern (each cleanup closure is expected to log its
    /// own failures) — this runner never lets a cleanup panic or error mask
    /// the forward result.
    pub async fn run(self) -> Result<()> {
        let mut cleanup_stack: Vec<(&'static str, BoxFuture<'static, ()>)> = Vec::new();
        let mut forward_result = Ok(());

        for step in self.steps {
            if let Some(cleanup) = step.cleanup {
                cleanup_stack.push((step.name, cleanup()));
            }
            match (step.action)().await {
                Ok(()) => {}
                Err(error) => {
                    warn!(event = "pipeline_step_failed", step = step.name, %error);
                    forward_result = Err(error);
                    break;
                }
            }
        }

        while let Some((name, cleanup)) = cleanup_stack.pop() {
            debug!(event = "pipeline_cleanup_running", step = name);
            cleanup.await;
        }

        forward_result
    }
}

/// Races a forward action against `exec_ctx` cancellation. A cancelled
/// `exec_ctx` aborts the action immediately rather than waiting out its own
/// internal timeout.
pub async fn run_forward<F>(exec_ctx: &CancellationToken, action: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        biased;
        _ = exec_ctx.cancelled() => Err(FailoverError::Internal(
            "step aborted: exec_ctx cancelled".to_string(),
        )),
        result = action => result,
    }
}

/// Races a cleanup action against `defer_ctx` cancellation. `defer_ctx` is
/// independent of `exec_ctx` specifically so that an aborted forward
/// operation does not also abort its own cleanup.
pub async fn run_cleanup<F>(defer_ctx: &CancellationToken, cleanup: F)
where
    F: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = defer_ctx.cancelled() => {
            warn!(event = "pipeline_cleanup_aborted", "defer_ctx cancelled before cleanup completed");
        }
        _ = cleanup => {}
    }
}
