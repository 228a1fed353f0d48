// src/core/cluster/state.rs

//! The read-only cluster snapshot produced by the Stolon cluster manager and
//! stored under one known key in etcd.
//!
//! The manager's JSON document carries many sibling fields this crate never
//! reads (keeper metadata, proxy lists, cluster-wide settings, ...). Every
//! type here tolerates unknown fields so a Stolon upgrade that adds a new
//! field to the document never breaks deserialisation.

use serde::Deserialize;

/// The health sub-document nested under a keeper record (`.status.healthy`
/// in the JSON schema).
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperStatus {
    pub healthy: bool,
}

/// A single keeper record, as it appears for both `master` and each entry of
/// `synchronous_standbys`.
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperRecord {
    pub keeper_uid: String,
    pub status: KeeperStatus,
}

impl KeeperRecord {
    pub fn healthy(&self) -> bool {
        self.status.healthy
    }
}

/// The `.cluster` sub-document: the master keeper plus its synchronous
/// standbys.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDocument {
    pub master: KeeperRecord,
    #[serde(default)]
    pub synchronous_standbys: Vec<KeeperRecord>,
}

/// The top-level clusterdata JSON document read from etcd.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDataDocument {
    pub cluster: ClusterDocument,
}

/// A cluster snapshot paired with the etcd revision it was read at.
///
/// `revision` is assigned by etcd on every write to the clusterdata key, not
/// by the document itself — it is attached here rather than parsed from the
/// JSON body.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub master: KeeperRecord,
    pub synchronous_standbys: Vec<KeeperRecord>,
    pub revision: i64,
}

impl ClusterState {
    /// Parses a raw clusterdata JSON blob, rejecting snapshots that fail the
    /// crate's one structural invariant: `master.keeper_uid` must be
    /// non-empty, or the snapshot is corrupt or not-yet-initialised.
    pub fn parse(raw: &[u8], revision: i64) -> crate::core::errors::Result<Self> {
        let doc: ClusterDataDocument = serde_json::from_slice(raw)?;
        if doc.cluster.master.keeper_uid.is_empty() {
            return Err(crate::core::errors::FailoverError::InvalidClusterState(
                "master.keeper_uid is empty".to_string(),
            ));
        }
        Ok(Self {
            master: doc.cluster.master,
            synchronous_standbys: doc.cluster.synchronous_standbys,
            revision,
        })
    }

    /// The predicate the recovery watcher evaluates against each incoming
    /// revision: a different, healthy master, with every synchronous
    /// standby also healthy.
    pub fn is_recovered_from(&self, old_master_keeper_uid: &str) -> bool {
        self.master.keeper_uid != old_master_keeper_uid
            && self.master.healthy()
            && self
                .synchronous_standbys
                .iter()
                .all(|standby| standby.healthy())
    }
}
