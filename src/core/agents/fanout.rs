// src/core/agents/fanout.rs

//! Parallel fan-out of one RPC to every configured agent.
//!
//! `each_client` is the single primitive all three agent operations
//! (`health_check_all`, `pause_all`, `resume_all`) are built on. True
//! parallel dispatch matters most for `pause`: serial execution would
//! accumulate each agent's own lock-wait time into the client-visible
//! outage window.

use super::client::AgentHandle;
use crate::core::errors::{FailoverError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// The seam `FailoverPipeline` drives instead of the free functions below
/// directly: production wires [`RealAgentFanout`] over the configured
/// `AgentHandle` map; tests inject a scripted fake to assert call order and
/// count without a live agent to dial (mirroring the `LockProvider` seam in
/// `core::lock`).
#[async_trait]
pub trait AgentFanout: Send + Sync {
    async fn health_check_all(&self, timeout: Duration) -> Result<()>;
    async fn pause_all(&self, timeout: Duration, expiry: Duration) -> Result<()>;
    async fn resume_all(&self, timeout: Duration) -> Result<()>;
}

/// The production [`AgentFanout`]: a thin wrapper over the free functions
/// below and the configured `AgentHandle` map.
pub struct RealAgentFanout {
    agents: HashMap<String, AgentHandle>,
}

impl RealAgentFanout {
    pub fn new(agents: HashMap<String, AgentHandle>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl AgentFanout for RealAgentFanout {
    async fn health_check_all(&self, timeout: Duration) -> Result<()> {
        health_check_all(&self.agents, timeout).await
    }

    async fn pause_all(&self, timeout: Duration, expiry: Duration) -> Result<()> {
        pause_all(&self.agents, timeout, expiry).await
    }

    async fn resume_all(&self, timeout: Duration) -> Result<()> {
        resume_all(&self.agents, timeout).await
    }
}

/// Invokes `action(endpoint, handle)` concurrently against every configured
/// agent, waits for all of them, and returns one error if any failed.
///
/// No agent is abandoned with a running call: the join point always waits
/// for every spawned task. If multiple agents fail, the error returned is
/// one of them, unspecified which — each individual failure is still logged
/// with its `endpoint` tag, so the aggregate error is only a single abort
/// signal, not a loss of diagnostic information.
pub async fn each_client<F, Fut>(agents: &HashMap<String, AgentHandle>, action: F) -> Result<()>
where
    F: Fn(String, AgentHandle) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (endpoint, handle) in agents {
        let fut = action(endpoint.clone(), handle.clone());
        let endpoint = endpoint.clone();
        tasks.spawn(async move {
            let start = Instant::now();
            let result = fut.await;
            (endpoint, result, start.elapsed())
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((endpoint, Ok(()), elapsed)) => {
                debug!(event = "agent_call_ok", endpoint = %endpoint, ?elapsed);
            }
            Ok((endpoint, Err(error), elapsed)) => {
                warn!(event = "agent_call_failed", endpoint = %endpoint, %error, ?elapsed);
                first_error.get_or_insert(error);
            }
            Err(join_error) => {
                warn!(event = "agent_task_panicked", error = %join_error);
                first_error
                    .get_or_insert(FailoverError::Internal(format!("agent task panicked: {join_error}")));
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Health-checks every agent; fails if any agent's reported status is not
/// `HEALTHY`.
pub async fn health_check_all(
    agents: &HashMap<String, AgentHandle>,
    timeout: Duration,
) -> Result<()> {
    each_client(agents, move |endpoint, mut handle| async move {
        let resp = handle.health_check(timeout).await?;
        use super::proto::agent::HealthStatus;
        if resp.status != HealthStatus::Healthy as i32 {
            return Err(FailoverError::AgentUnhealthy {
                endpoint,
                detail: format!("status = {:?}", resp.status),
            });
        }
        Ok(())
    })
    .await
}

/// Pauses every agent. `timeout` is how long an agent may block waiting for
/// PgBouncer to quiesce; `expiry` is how long until the agent auto-resumes
/// without a follow-up `resume` call. Per the pause/expiry timing contract,
/// the RPC's own deadline is `expiry + 1s` of network slack.
///
/// Per spec §7, a fan-out failure here is surfaced as `PauseFailed` —
/// `each_client`'s own aggregated error (a raw `Rpc`/`Transport`/`Internal`
/// timeout from whichever agent failed first) is wrapped rather than
/// propagated as-is, so callers can distinguish "pause itself failed" from
/// the other named error kinds in that table.
pub async fn pause_all(
    agents: &HashMap<String, AgentHandle>,
    timeout: Duration,
    expiry: Duration,
) -> Result<()> {
    let rpc_deadline = expiry + Duration::from_secs(1);
    each_client(agents, move |_endpoint, mut handle| async move {
        handle
            .pause(timeout.as_millis() as u64, expiry.as_millis() as u64, rpc_deadline)
            .await?;
        Ok(())
    })
    .await
    .map_err(|error| FailoverError::PauseFailed(error.to_string()))
}

/// Resumes every agent. Used both on the pipeline's happy path and as the
/// deferred cleanup for `pause`.
pub async fn resume_all(agents: &HashMap<String, AgentHandle>, timeout: Duration) -> Result<()> {
    each_client(agents, move |_endpoint, mut handle| async move {
        handle.resume(timeout).await?;
        Ok(())
    })
    .await
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agents::client::AgentHandle;

    fn handles(n: usize) -> HashMap<String, AgentHandle> {
        (0..n)
            .map(|i| {
                let endpoint = format!("http://127.0.0.1:{}", 10_000 + i);
                (endpoint.clone(), AgentHandle::new(endpoint).unwrap())
            })
            .collect()
    }

    #[tokio::test]
    async fn succeeds_iff_every_action_succeeds() {
        let agents = handles(3);
        let ok = each_client(&agents, |_, _| async { Ok(()) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn returns_an_error_if_any_action_fails() {
        let agents = handles(3);
        let result = each_client(&agents, |endpoint, _| async move {
            if endpoint.ends_with("10001") {
                Err(FailoverError::Internal("boom".to_string()))
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn waits_for_every_agent_even_after_first_failure() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let agents = handles(5);
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_clone = completed.clone();
        let result = each_client(&agents, move |endpoint, _| {
            let completed = completed_clone.clone();
            async move {
                if endpoint.ends_with("10000") {
                    return Err(FailoverError::Internal("boom".to_string()));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }

    /// `pause_all` must surface a failed fan-out as `PauseFailed`, per spec
    /// §7's named error-kind table — not the raw transport/timeout error
    /// `each_client` aggregates.
    #[tokio::test]
    async fn pause_all_wraps_fanout_failures_as_pause_failed() {
        let mut agents = HashMap::new();
        // Port 1 is a reserved, never-listened-on port; the connection is
        // refused immediately rather than timing out.
        let endpoint = "http://127.0.0.1:1".to_string();
        agents.insert(endpoint.clone(), AgentHandle::new(endpoint).unwrap());

        let result = pause_all(&agents, Duration::from_millis(50), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(FailoverError::PauseFailed(_))));
    }

    #[tokio::test]
    async fn real_agent_fanout_delegates_to_the_free_functions() {
        let fanout = RealAgentFanout::new(handles(0));
        assert!(fanout.health_check_all(Duration::from_millis(50)).await.is_ok());
        assert!(
            fanout
                .pause_all(Duration::from_millis(50), Duration::from_millis(50))
                .await
                .is_ok()
        );
        assert!(fanout.resume_all(Duration::from_millis(50)).await.is_ok());
    }
}
