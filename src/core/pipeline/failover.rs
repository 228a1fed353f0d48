// src/core/pipeline/failover.rs

//! `FailoverPipeline`: the concrete four-step failover wired onto the
//! generic [`super::Pipeline`] runner.
//!
//! Step sequence, per the data model's deferred-action ordering:
//! 1. `health_check_clients` — no defer.
//! 2. `acquire_lock` — defer `release_lock`.
//! 3. `pause` — defer `resume`.
//! 4. `failkeeper` (with embedded recovery wait) — no defer.

use super::steps::{EtcdFailkeeperRunner, FailkeeperRunner};
use super::{Pipeline, Step, run_cleanup, run_forward};
use crate::config::FailoverConfig;
use crate::core::agents::{AgentFanout, AgentHandle, RealAgentFanout};
use crate::core::cluster::ClusterState;
use crate::core::errors::{FailoverError, Result};
use crate::core::lock::LockProvider;
use etcd_client::Client;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct FailoverPipeline {
    config: FailoverConfig,
    lock_provider: Arc<dyn LockProvider>,
    agents: Arc<dyn AgentFanout>,
    failkeeper_runner: Arc<dyn FailkeeperRunner>,
}

impl FailoverPipeline {
    pub fn new(
        config: FailoverConfig,
        etcd_client: Client,
        lock_provider: Arc<dyn LockProvider>,
    ) -> Result<Self> {
        let mut agent_handles = HashMap::new();
        for endpoint in &config.agents {
            agent_handles.insert(endpoint.clone(), AgentHandle::new(endpoint.clone())?);
        }
        let failkeeper_runner = Arc::new(EtcdFailkeeperRunner::new(
            etcd_client,
            config.clusterdata_key.clone(),
            config.stolonctl_timeout,
            config.pause_expiry,
            config.poll_interval,
            config.get_timeout,
        ));
        Ok(Self {
            config,
            lock_provider,
            agents: Arc::new(RealAgentFanout::new(agent_handles)),
            failkeeper_runner,
        })
    }

    /// Runs one failover to completion. `exec_ctx` governs forward progress
    /// and is the scope an operator cancels to abort; `defer_ctx` governs
    /// cleanup and must be a distinct token so an aborted `exec_ctx` still
    /// lets `resume` and lock release complete. On success, returns the
    /// recovered cluster snapshot the recovery watcher settled on.
    pub async fn run(
        &self,
        exec_ctx: CancellationToken,
        defer_ctx: CancellationToken,
    ) -> Result<ClusterState> {
        let recovered: Arc<Mutex<Option<ClusterState>>> = Arc::new(Mutex::new(None));
        let mut steps = Vec::new();

        {
            let agents = self.agents.clone();
            let timeout = self.config.health_check_timeout;
            let exec_ctx = exec_ctx.clone();
            steps.push(Step::new("health_check_clients", move || async move {
                run_forward(&exec_ctx, agents.health_check_all(timeout)).await
            }));
        }

        {
            let lock_provider = self.lock_provider.clone();
            let clusterdata_key = self.config.clusterdata_key.clone();
            let lock_timeout = self.config.lock_timeout;
            let held_lock = Arc::new(Mutex::new(None));
            let held_lock_action = held_lock.clone();
            let exec_ctx_action = exec_ctx.clone();
            let defer_ctx_cleanup = defer_ctx.clone();
            steps.push(
                Step::new("acquire_lock", move || async move {
                    run_forward(&exec_ctx_action, async {
                        let lock = lock_provider
                            .acquire(&clusterdata_key, lock_timeout)
                            .await?;
                        *held_lock_action.lock() = Some(lock);
                        Ok(())
                    })
                    .await
                })
                .with_cleanup(move || async move {
                    run_cleanup(&defer_ctx_cleanup, async {
                        if let Some(lock) = held_lock.lock().take() {
                            if let Err(error) = lock.release().await {
                                warn!(event = "lock_release_failed", %error);
                            }
                        }
                    })
                    .await
                }),
            );
        }

        {
            let agents = self.agents.clone();
            let agents_cleanup = agents.clone();
            let pause_timeout = self.config.pause_timeout;
            let pause_expiry = self.config.pause_expiry;
            let resume_timeout = self.config.resume_timeout;
            let exec_ctx_action = exec_ctx.clone();
            let defer_ctx_cleanup = defer_ctx.clone();
            steps.push(
                Step::new("pause", move || async move {
                    run_forward(
                        &exec_ctx_action,
                        agents.pause_all(pause_timeout, pause_expiry),
                    )
                    .await
                })
                .with_cleanup(move || async move {
                    run_cleanup(&defer_ctx_cleanup, async {
                        if let Err(error) = agents_cleanup.resume_all(resume_timeout).await {
                            warn!(event = "resume_failed", %error);
                        }
                    })
                    .await
                }),
            );
        }

        {
            let failkeeper_runner = self.failkeeper_runner.clone();
            let recovered = recovered.clone();
            let exec_ctx_action = exec_ctx.clone();
            steps.push(Step::new("failkeeper", move || async move {
                let outcome = failkeeper_runner.run(exec_ctx_action).await?;
                *recovered.lock() = Some(outcome.new_state);
                Ok(())
            }));
        }

        Pipeline::new(steps).run().await?;

        recovered.lock().take().ok_or_else(|| {
            FailoverError::Internal(
                "failkeeper step reported success without recording a recovered state".to_string(),
            )
        })
    }
}
