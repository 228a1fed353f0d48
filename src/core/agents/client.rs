// src/core/agents/client.rs

//! A thin, per-deadline wrapper around the generated `PauseAgent` gRPC
//! client, used by the fan-out (see `fanout.rs`) to talk to one proxy agent.

use super::proto::agent::{
    HealthCheckRequest, HealthCheckResponse, PauseRequest, PauseResponse, ResumeRequest,
    ResumeResponse, pause_agent_client::PauseAgentClient,
};
use crate::core::errors::{FailoverError, Result};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// A lazily-connected handle to one agent's gRPC endpoint.
#[derive(Clone)]
pub struct AgentHandle {
    endpoint: String,
    client: PauseAgentClient<Channel>,
}

impl AgentHandle {
    /// Builds a handle for `endpoint` (e.g. `http://10.0.1.4:7070`).
    ///
    /// The underlying channel connects lazily on first use, so constructing
    /// a handle never blocks on network I/O; the fan-out's per-call
    /// timeouts are what actually bound connection time.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())?.connect_lazy();
        Ok(Self {
            endpoint,
            client: PauseAgentClient::new(channel),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn health_check(&mut self, deadline: Duration) -> Result<HealthCheckResponse> {
        let call = self.client.health_check(HealthCheckRequest {});
        run_with_deadline(deadline, call).await
    }

    pub async fn pause(
        &mut self,
        timeout_ms: u64,
        expiry_ms: u64,
        deadline: Duration,
    ) -> Result<PauseResponse> {
        let call = self.client.pause(PauseRequest {
            timeout_ms,
            expiry_ms,
        });
        run_with_deadline(deadline, call).await
    }

    pub async fn resume(&mut self, deadline: Duration) -> Result<ResumeResponse> {
        let call = self.client.resume(ResumeRequest {});
        run_with_deadline(deadline, call).await
    }
}

async fn run_with_deadline<F, T>(deadline: Duration, call: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(resp)) => Ok(resp.into_inner()),
        Ok(Err(status)) => Err(FailoverError::Rpc(status)),
        Err(_) => Err(FailoverError::Internal(format!(
            "agent rpc timed out after {deadline:?}"
        ))),
    }
}
