// src/core/errors.rs

//! Defines the primary error type for the failover orchestrator.

use thiserror::Error;

/// The error kinds a failover run can surface.
///
/// Every variant here is a *forward* error: it aborts the pipeline and is
/// returned to the caller of [`crate::core::pipeline::failover::FailoverPipeline::run`].
/// Cleanup failures (a failed `resume` or a failed lock release during
/// teardown) are never represented here — they are logged at the call site
/// and do not mask the forward error that triggered them.
#[derive(Error, Debug)]
pub enum FailoverError {
    /// The pre-flight health check found at least one unhealthy agent.
    #[error("agent {endpoint} is unhealthy: {detail}")]
    AgentUnhealthy { endpoint: String, detail: String },

    /// The cluster-wide failover lock could not be acquired within `lock_timeout`.
    #[error("failed to acquire failover lock: {0}")]
    LockUnavailable(String),

    /// At least one agent's `pause` RPC failed.
    #[error("pause failed on one or more agents: {0}")]
    PauseFailed(String),

    /// The `stolonctl failkeeper` subprocess exited non-zero or could not be spawned.
    #[error("stolonctl failkeeper failed: {0}")]
    FailkeeperFailed(String),

    /// The recovery watcher did not observe a healthy new primary before
    /// `pause_expiry` elapsed.
    #[error("timed out waiting for cluster recovery after {0:?}")]
    RecoveryTimeout(std::time::Duration),

    /// The clusterdata snapshot read from the KV store was structurally
    /// invalid (e.g. an empty `master.keeper_uid`).
    #[error("corrupt or uninitialised cluster snapshot: {0}")]
    InvalidClusterState(String),

    /// A failure talking to the KV store outside the lock/watch-specific
    /// paths above (e.g. the initial snapshot read).
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// A transport-level failure reaching an agent (connect, not RPC status).
    #[error("agent transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// An RPC returned by an agent itself (non-OK status).
    #[error("agent rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to deserialise cluster state: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FailoverError>;
