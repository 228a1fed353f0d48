// src/core/pipeline/steps.rs

//! The `failkeeper` step's internals: the `stolonctl failkeeper` subprocess
//! invocation and the recovery watcher it embeds.
//!
//! This is kept separate from `failover.rs`'s step wiring because it is the
//! one step whose forward action is itself multi-phase (subprocess, then a
//! bounded wait on a watch stream) and benefits from being exercised in
//! isolation against a synthetic watch source. Three seams make that
//! possible, mirroring the `LockProvider`/`ClusterStateSource` pattern used
//! elsewhere in this crate: [`FailkeeperInvoker`] (the subprocess call),
//! [`RecoveryWatcher`] (the bounded wait), and [`FailkeeperRunner`] (the
//! two composed, as `FailoverPipeline` drives them).

use crate::core::cluster::{ClusterState, ClusterStateClient, ClusterStateSource, WatchRecord, revision_filter, watch_clusterdata};
use crate::core::errors::{FailoverError, Result};
use async_trait::async_trait;
use etcd_client::Client;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the `failkeeper` step produced: the pre-failover master's uid (for
/// logging) and the recovered snapshot the watcher settled on.
pub struct FailkeeperOutcome {
    pub old_master_keeper_uid: String,
    pub new_state: ClusterState,
}

/// Invokes `stolonctl failkeeper <uid>`. Production wires [`StolonctlInvoker`];
/// tests inject a fake that never spawns a subprocess.
#[async_trait]
pub trait FailkeeperInvoker: Send {
    async fn invoke(&mut self, keeper_uid: &str) -> Result<()>;
}

/// Waits for the cluster to report a healthy new primary, given the
/// pre-failover master's uid. Production wires [`EtcdRecoveryWatcher`];
/// tests inject a fake driven by a scripted stream or a canned result.
#[async_trait]
pub trait RecoveryWatcher: Send {
    async fn wait_for_recovery(&mut self, old_master_keeper_uid: &str) -> Result<ClusterState>;
}

/// Runs the full `failkeeper` step: read the current master, invoke
/// `stolonctl failkeeper <uid>`, then block until the watch reports a
/// healthy new primary or `pause_expiry` elapses.
pub async fn run_failkeeper_step(
    cluster_source: &mut dyn ClusterStateSource,
    invoker: &mut dyn FailkeeperInvoker,
    watcher: &mut dyn RecoveryWatcher,
) -> Result<FailkeeperOutcome> {
    let pre_state = cluster_source.get_snapshot().await?;
    let old_master_keeper_uid = pre_state.master.keeper_uid.clone();

    invoker.invoke(&old_master_keeper_uid).await?;

    let new_state = watcher.wait_for_recovery(&old_master_keeper_uid).await?;

    Ok(FailkeeperOutcome {
        old_master_keeper_uid,
        new_state,
    })
}

/// The production [`FailkeeperRunner`] (see `failover.rs`) composes a
/// [`ClusterStateClient`], this, and an [`EtcdRecoveryWatcher`] through
/// [`run_failkeeper_step`] on every call.
pub struct StolonctlInvoker {
    timeout: Duration,
}

impl StolonctlInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl FailkeeperInvoker for StolonctlInvoker {
    async fn invoke(&mut self, keeper_uid: &str) -> Result<()> {
        invoke_failkeeper(keeper_uid, self.timeout).await
    }
}

async fn invoke_failkeeper(keeper_uid: &str, timeout: Duration) -> Result<()> {
    let mut child = Command::new("stolonctl")
        .arg("failkeeper")
        .arg(keeper_uid)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(FailoverError::FailkeeperFailed(format!(
            "stolonctl failkeeper {keeper_uid} exited with {status}"
        ))),
        Ok(Err(error)) => Err(FailoverError::FailkeeperFailed(format!(
            "waiting on stolonctl failkeeper {keeper_uid}: {error}"
        ))),
        Err(_) => {
            let _ = child.kill().await;
            Err(FailoverError::FailkeeperFailed(format!(
                "stolonctl failkeeper {keeper_uid} timed out after {timeout:?}"
            )))
        }
    }
}

/// The production [`RecoveryWatcher`]: opens a real etcd watch on
/// `clusterdata_key` and drives it through [`watch_until_recovered`].
pub struct EtcdRecoveryWatcher {
    etcd_client: Client,
    clusterdata_key: String,
    pause_expiry: Duration,
    poll_interval: Duration,
    get_timeout: Duration,
    exec_ctx: CancellationToken,
}

impl EtcdRecoveryWatcher {
    pub fn new(
        etcd_client: Client,
        clusterdata_key: String,
        pause_expiry: Duration,
        poll_interval: Duration,
        get_timeout: Duration,
        exec_ctx: CancellationToken,
    ) -> Self {
        Self {
            etcd_client,
            clusterdata_key,
            pause_expiry,
            poll_interval,
            get_timeout,
            exec_ctx,
        }
    }
}

#[async_trait]
impl RecoveryWatcher for EtcdRecoveryWatcher {
    /// `exec_ctx` cancellation (an operator-triggered abort of the whole
    /// run) also aborts the wait, so the watch task is never left running
    /// after this returns.
    async fn wait_for_recovery(&mut self, old_master_keeper_uid: &str) -> Result<ClusterState> {
        let watch_cancel = self.exec_ctx.child_token();
        let stream = revision_filter(watch_clusterdata(
            self.etcd_client.clone(),
            self.clusterdata_key.clone(),
            self.poll_interval,
            self.get_timeout,
            watch_cancel.clone(),
        ));
        tokio::pin!(stream);
        let result = watch_until_recovered(
            stream.as_mut(),
            &self.clusterdata_key,
            old_master_keeper_uid,
            self.pause_expiry,
        )
        .await;
        watch_cancel.cancel();
        result
    }
}

/// The recovery predicate loop itself: drains `stream` until a revision
/// satisfies §4.4's predicate, or `deadline` elapses. Generic over any
/// revision-carrying stream so it can be driven directly by a synthetic
/// source in tests, independent of etcd.
///
/// Edge cases handled here: a record keyed for a different watch is
/// skipped (defensive, since the watch is itself keyed); a record that
/// fails to deserialise is logged and skipped rather than aborting
/// recovery; a record whose master uid has not changed yet is logged as
/// `pending_failover` and skipped.
async fn watch_until_recovered<S>(
    mut stream: Pin<&mut S>,
    clusterdata_key: &str,
    old_master_keeper_uid: &str,
    deadline: Duration,
) -> Result<ClusterState>
where
    S: Stream<Item = Result<WatchRecord>>,
{
    let wait = async {
        while let Some(item) = stream.next().await {
            let record = match item {
                Ok(record) => record,
                Err(error) => {
                    warn!(event = "recovery_watch_error", %error);
                    continue;
                }
            };
            if record.key != clusterdata_key {
                continue;
            }
            let state = match ClusterState::parse(&record.value, record.revision) {
                Ok(state) => state,
                Err(error) => {
                    warn!(event = "recovery_watch_deserialize_failed", revision = record.revision, %error);
                    continue;
                }
            };
            if state.master.keeper_uid == old_master_keeper_uid {
                debug!(event = "pending_failover", revision = record.revision);
                continue;
            }
            if state.is_recovered_from(old_master_keeper_uid) {
                return Ok(state);
            }
            debug!(
                event = "recovery_candidate_not_ready",
                revision = record.revision,
                new_master = %state.master.keeper_uid,
            );
        }
        Err(FailoverError::Internal(
            "watch stream ended before a recovered revision was observed".to_string(),
        ))
    };

    match tokio::time::timeout(deadline, wait).await {
        Ok(inner) => inner,
        Err(_) => Err(FailoverError::RecoveryTimeout(deadline)),
    }
}

/// Composes a [`ClusterStateClient`], a [`StolonctlInvoker`], and an
/// [`EtcdRecoveryWatcher`] through [`run_failkeeper_step`] on every call —
/// the seam `FailoverPipeline` drives instead of the constituent pieces
/// directly, so its own tests can substitute [`fake::FakeFailkeeperRunner`].
#[async_trait]
pub trait FailkeeperRunner: Send + Sync {
    async fn run(&self, exec_ctx: CancellationToken) -> Result<FailkeeperOutcome>;
}

pub struct EtcdFailkeeperRunner {
    etcd_client: Client,
    clusterdata_key: String,
    stolonctl_timeout: Duration,
    pause_expiry: Duration,
    poll_interval: Duration,
    get_timeout: Duration,
}

impl EtcdFailkeeperRunner {
    pub fn new(
        etcd_client: Client,
        clusterdata_key: String,
        stolonctl_timeout: Duration,
        pause_expiry: Duration,
        poll_interval: Duration,
        get_timeout: Duration,
    ) -> Self {
        Self {
            etcd_client,
            clusterdata_key,
            stolonctl_timeout,
            pause_expiry,
            poll_interval,
            get_timeout,
        }
    }
}

#[async_trait]
impl FailkeeperRunner for EtcdFailkeeperRunner {
    async fn run(&self, exec_ctx: CancellationToken) -> Result<FailkeeperOutcome> {
        let mut cluster_source =
            ClusterStateClient::new(self.etcd_client.clone(), self.clusterdata_key.clone());
        let mut invoker = StolonctlInvoker::new(self.stolonctl_timeout);
        let mut watcher = EtcdRecoveryWatcher::new(
            self.etcd_client.clone(),
            self.clusterdata_key.clone(),
            self.pause_expiry,
            self.poll_interval,
            self.get_timeout,
            exec_ctx,
        );
        run_failkeeper_step(&mut cluster_source, &mut invoker, &mut watcher).await
    }
}

#[cfg(test)]
pub mod fake {
    //! A scripted [`FailkeeperRunner`] for pipeline tests: returns a canned
    //! result without a live etcd, subprocess, or watch stream.

    use super::*;

    pub struct FakeFailkeeperRunner {
        result: parking_lot::Mutex<Option<Result<FailkeeperOutcome>>>,
        pub was_called: std::sync::atomic::AtomicBool,
    }

    impl FakeFailkeeperRunner {
        pub fn succeeding(new_state: ClusterState, old_master_keeper_uid: &str) -> Self {
            Self::scripted(Ok(FailkeeperOutcome {
                old_master_keeper_uid: old_master_keeper_uid.to_string(),
                new_state,
            }))
        }

        pub fn failing(error: FailoverError) -> Self {
            Self::scripted(Err(error))
        }

        pub fn never_called() -> Self {
            Self {
                result: parking_lot::Mutex::new(None),
                was_called: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn scripted(result: Result<FailkeeperOutcome>) -> Self {
            Self {
                result: parking_lot::Mutex::new(Some(result)),
                was_called: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl FailkeeperRunner for FakeFailkeeperRunner {
        async fn run(&self, _exec_ctx: CancellationToken) -> Result<FailkeeperOutcome> {
            self.was_called
                .store(true, std::sync::atomic::Ordering::SeqCst);
            self.result
                .lock()
                .take()
                .expect("FakeFailkeeperRunner invoked with no scripted result")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::client::fake::FakeClusterStateSource;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn snapshot(master_uid: &str, master_healthy: bool, standbys: &[(&str, bool)]) -> Vec<u8> {
        let standbys_json: Vec<String> = standbys
            .iter()
            .map(|(uid, healthy)| {
                format!(r#"{{"keeper_uid":"{uid}","status":{{"healthy":{healthy}}}}}"#)
            })
            .collect();
        format!(
            r#"{{"cluster":{{"master":{{"keeper_uid":"{master_uid}","status":{{"healthy":{master_healthy}}}}},"synchronous_standbys":[{}]}}}}"#,
            standbys_json.join(",")
        )
        .into_bytes()
    }

    /// Drives the actual predicate loop `EtcdRecoveryWatcher` uses against a
    /// synthetic revision sequence (boundary scenario 6), rather than a
    /// hand-duplicated copy of its control flow.
    #[tokio::test]
    async fn watch_until_recovered_skips_pending_then_unhealthy_then_partial_before_accepting() {
        let old_uid = "keeper-a";
        let records: Vec<Result<WatchRecord>> = vec![
            Ok(WatchRecord {
                key: "k".into(),
                value: snapshot(old_uid, true, &[("keeper-c", true)]),
                revision: 1,
            }), // pending_failover, skipped
            Ok(WatchRecord {
                key: "k".into(),
                value: snapshot("keeper-b", false, &[("keeper-c", true)]),
                revision: 2,
            }), // new master unhealthy, skipped
            Ok(WatchRecord {
                key: "k".into(),
                value: snapshot("keeper-b", true, &[("keeper-c", false)]),
                revision: 3,
            }), // standby unhealthy, skipped
            Ok(WatchRecord {
                key: "k".into(),
                value: snapshot("keeper-b", true, &[("keeper-c", true)]),
                revision: 4,
            }), // fully healthy, accepted
        ];

        let stream = futures::stream::iter(records);
        tokio::pin!(stream);
        let result = watch_until_recovered(stream.as_mut(), "k", old_uid, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.master.keeper_uid, "keeper-b");
        assert_eq!(result.revision, 4);
    }

    #[tokio::test]
    async fn watch_until_recovered_skips_records_for_a_different_key() {
        let old_uid = "keeper-a";
        let records: Vec<Result<WatchRecord>> = vec![
            Ok(WatchRecord {
                key: "other-key".into(),
                value: snapshot("keeper-b", true, &[]),
                revision: 1,
            }),
            Ok(WatchRecord {
                key: "k".into(),
                value: snapshot("keeper-b", true, &[]),
                revision: 2,
            }),
        ];

        let stream = futures::stream::iter(records);
        tokio::pin!(stream);
        let result = watch_until_recovered(stream.as_mut(), "k", old_uid, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.revision, 2);
    }

    #[tokio::test]
    async fn watch_until_recovered_times_out_if_the_deadline_elapses_first() {
        let stream = futures::stream::pending::<Result<WatchRecord>>();
        tokio::pin!(stream);
        let result =
            watch_until_recovered(stream.as_mut(), "k", "keeper-a", Duration::from_millis(20))
                .await;
        assert!(matches!(result, Err(FailoverError::RecoveryTimeout(_))));
    }

    struct FakeInvoker {
        invoked_with: Arc<Mutex<Option<String>>>,
        result: Option<FailoverError>,
    }

    #[async_trait]
    impl FailkeeperInvoker for FakeInvoker {
        async fn invoke(&mut self, keeper_uid: &str) -> Result<()> {
            *self.invoked_with.lock() = Some(keeper_uid.to_string());
            match self.result.take() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    struct FakeWatcher {
        state: Option<ClusterState>,
    }

    #[async_trait]
    impl RecoveryWatcher for FakeWatcher {
        async fn wait_for_recovery(&mut self, _old_master_keeper_uid: &str) -> Result<ClusterState> {
            self.state
                .take()
                .ok_or_else(|| FailoverError::Internal("no recovered state scripted".to_string()))
        }
    }

    /// Wires `FakeClusterStateSource` into an actual `run_failkeeper_step`
    /// call: the pre-failover uid it reports must be both the one passed to
    /// the invoker and the one the outcome carries.
    #[tokio::test]
    async fn run_failkeeper_step_reads_pre_state_then_invokes_and_waits() {
        let pre = ClusterState::parse(&snapshot("keeper-a", true, &[]), 1).unwrap();
        let recovered =
            ClusterState::parse(&snapshot("keeper-b", true, &[("keeper-c", true)]), 5).unwrap();
        let mut cluster_source = FakeClusterStateSource::new(vec![pre]);
        let invoked_with = Arc::new(Mutex::new(None));
        let mut invoker = FakeInvoker {
            invoked_with: invoked_with.clone(),
            result: None,
        };
        let mut watcher = FakeWatcher {
            state: Some(recovered),
        };

        let outcome = run_failkeeper_step(&mut cluster_source, &mut invoker, &mut watcher)
            .await
            .unwrap();

        assert_eq!(outcome.old_master_keeper_uid, "keeper-a");
        assert_eq!(outcome.new_state.master.keeper_uid, "keeper-b");
        assert_eq!(*invoked_with.lock(), Some("keeper-a".to_string()));
    }

    #[tokio::test]
    async fn run_failkeeper_step_aborts_before_waiting_if_the_subprocess_fails() {
        let pre = ClusterState::parse(&snapshot("keeper-a", true, &[]), 1).unwrap();
        let mut cluster_source = FakeClusterStateSource::new(vec![pre]);
        let mut invoker = FakeInvoker {
            invoked_with: Arc::new(Mutex::new(None)),
            result: Some(FailoverError::FailkeeperFailed("exit 1".to_string())),
        };
        let mut watcher = FakeWatcher { state: None };

        let result = run_failkeeper_step(&mut cluster_source, &mut invoker, &mut watcher).await;
        assert!(matches!(result, Err(FailoverError::FailkeeperFailed(_))));
    }
}
