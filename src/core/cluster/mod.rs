// src/core/cluster/mod.rs

//! Reads and watches the Stolon cluster manager's state in etcd.

pub mod client;
pub mod state;
pub mod watch;

pub use client::{ClusterStateClient, ClusterStateSource};
pub use state::{ClusterDataDocument, ClusterState, KeeperRecord, KeeperStatus};
pub use watch::{WatchRecord, revision_filter, watch_clusterdata};
