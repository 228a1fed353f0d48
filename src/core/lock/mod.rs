// src/core/lock/mod.rs

//! The distributed failover lock: exactly one orchestrator cluster-wide may
//! run a failover for a given cluster at a time.
//!
//! The protocol is the standard etcd lock pattern — a lease-backed session,
//! a well-known key created conditional on absence, contenders watching the
//! existing key and retrying once it is deleted — which `etcd-client`'s
//! `LeaseClient`/`LockClient` already implement, so this module is a thin
//! wrapper rather than a hand-rolled compare-and-put loop. `LockProvider` is
//! the seam: production wires `EtcdLockProvider`, tests inject an in-memory
//! fake to exercise contention (`LockUnavailable`) without a live etcd.

use crate::core::errors::{FailoverError, Result};
use async_trait::async_trait;
use etcd_client::{Client, LockOptions};
use std::time::Duration;
use tracing::warn;

/// A held failover lock. Dropping it without calling [`FailoverLock::release`]
/// leaves cleanup to the lease's TTL expiry, per the spec's liveness
/// guarantee for a crashed orchestrator.
#[async_trait]
pub trait FailoverLock: Send + Sync {
    /// Releases the lock. Best-effort: release timeouts/errors are logged
    /// by the caller and never surfaced as a pipeline error — the lease
    /// will clean up regardless.
    async fn release(&self) -> Result<()>;
}

/// Acquires a [`FailoverLock`] scoped to one cluster's clusterdata key.
#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn acquire(
        &self,
        clusterdata_key: &str,
        timeout: Duration,
    ) -> Result<Box<dyn FailoverLock>>;
}

/// The resource path a failover lock is held under, per the data model:
/// `{clusterdata_key}/failover`.
pub fn lock_resource(clusterdata_key: &str) -> String {
    format!("{clusterdata_key}/failover")
}

/// The production `LockProvider`, backed by an etcd lease + lock.
pub struct EtcdLockProvider {
    client: Client,
    lease_ttl_secs: i64,
}

impl EtcdLockProvider {
    pub fn new(client: Client, lease_ttl_secs: i64) -> Self {
        Self {
            client,
            lease_ttl_secs,
        }
    }
}

#[async_trait]
impl LockProvider for EtcdLockProvider {
    async fn acquire(
        &self,
        clusterdata_key: &str,
        timeout: Duration,
    ) -> Result<Box<dyn FailoverLock>> {
        let resource = lock_resource(clusterdata_key);
        let mut client = self.client.clone();
        let attempt = async {
            let lease = client.lease_grant(self.lease_ttl_secs, None).await?;
            let lease_id = lease.id();
            let lock_opts = LockOptions::new().with_lease(lease_id);
            let lock_resp = client.lock(resource.as_str(), Some(lock_opts)).await?;
            Ok::<_, FailoverError>(EtcdLock {
                client: client.clone(),
                lease_id,
                lock_key: lock_resp.key().to_vec(),
            })
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(lock)) => Ok(Box::new(lock)),
            Ok(Err(e)) => Err(FailoverError::LockUnavailable(e.to_string())),
            Err(_) => Err(FailoverError::LockUnavailable(format!(
                "no lock on '{resource}' within {timeout:?}"
            ))),
        }
    }
}

struct EtcdLock {
    client: Client,
    lease_id: i64,
    lock_key: Vec<u8>,
}

#[async_trait]
impl FailoverLock for EtcdLock {
    async fn release(&self) -> Result<()> {
        let mut client = self.client.clone();
        client.unlock(self.lock_key.clone()).await?;
        if let Err(e) = client.lease_revoke(self.lease_id).await {
            warn!(event = "lock_release_lease_revoke_failed", error = %e);
        }
        Ok(())
    }
}
