// src/core/cluster/client.rs

//! Reads the Stolon clusterdata snapshot from etcd.

use super::state::ClusterState;
use crate::core::errors::Result;
use async_trait::async_trait;
use etcd_client::Client;

/// The seam `steps::run_failkeeper_step` reads the pre-failover snapshot
/// through. Production wires [`ClusterStateClient`]; tests inject a fake
/// (see `cluster::fake`) to drive the recovery predicate against a scripted
/// sequence without a live etcd.
#[async_trait]
pub trait ClusterStateSource: Send {
    async fn get_snapshot(&mut self) -> Result<ClusterState>;
}

/// A thin, read-only client over one etcd key holding the cluster manager's
/// JSON snapshot.
#[derive(Clone)]
pub struct ClusterStateClient {
    etcd: Client,
    clusterdata_key: String,
}

impl ClusterStateClient {
    pub fn new(etcd: Client, clusterdata_key: String) -> Self {
        Self {
            etcd,
            clusterdata_key,
        }
    }

    pub fn clusterdata_key(&self) -> &str {
        &self.clusterdata_key
    }

    /// Fetches and parses the current clusterdata snapshot.
    pub async fn get(&mut self) -> Result<ClusterState> {
        let resp = self.etcd.get(self.clusterdata_key.as_str(), None).await?;
        let kv = resp.kvs().first().ok_or_else(|| {
            crate::core::errors::FailoverError::InvalidClusterState(format!(
                "no value at clusterdata key '{}'",
                self.clusterdata_key
            ))
        })?;
        ClusterState::parse(kv.value(), kv.mod_revision())
    }
}

#[async_trait]
impl ClusterStateSource for ClusterStateClient {
    async fn get_snapshot(&mut self) -> Result<ClusterState> {
        self.get().await
    }
}

#[cfg(test)]
pub mod fake {
    //! A scripted [`ClusterStateSource`] for pipeline-level recovery tests.

    use super::*;

    pub struct FakeClusterStateSource {
        pub snapshots: Vec<Result<ClusterState>>,
        next: usize,
    }

    impl FakeClusterStateSource {
        pub fn new(snapshots: Vec<ClusterState>) -> Self {
            Self {
                snapshots: snapshots.into_iter().map(Ok).collect(),
                next: 0,
            }
        }
    }

    #[async_trait]
    impl ClusterStateSource for FakeClusterStateSource {
        async fn get_snapshot(&mut self) -> Result<ClusterState> {
            let idx = self.next.min(self.snapshots.len() - 1);
            self.next += 1;
            match &self.snapshots[idx] {
                Ok(state) => Ok(state.clone()),
                Err(_) => Err(crate::core::errors::FailoverError::Internal(
                    "fake cluster state source error".to_string(),
                )),
            }
        }
    }

    #[tokio::test]
    async fn yields_the_first_snapshot_then_sticks_on_the_last() {
        let a = ClusterState::parse(
            br#"{"cluster":{"master":{"keeper_uid":"a","status":{"healthy":true}},"synchronous_standbys":[]}}"#,
            1,
        )
        .unwrap();
        let b = ClusterState::parse(
            br#"{"cluster":{"master":{"keeper_uid":"b","status":{"healthy":true}},"synchronous_standbys":[]}}"#,
            2,
        )
        .unwrap();
        let mut source = FakeClusterStateSource::new(vec![a, b]);
        assert_eq!(source.get_snapshot().await.unwrap().master.keeper_uid, "a");
        assert_eq!(source.get_snapshot().await.unwrap().master.keeper_uid, "b");
        assert_eq!(source.get_snapshot().await.unwrap().master.keeper_uid, "b");
    }
}
