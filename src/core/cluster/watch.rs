// src/core/cluster/watch.rs

//! A lazy, revision-ordered stream of clusterdata changes read from etcd.
//!
//! Two stages compose here, deliberately kept separate (see design note in
//! `SPEC_FULL.md` §9 "Stream revision filter"): [`watch_clusterdata`] is the
//! raw, etcd-backed source, which can reorder or repeat revisions across a
//! watch re-establishment; [`revision_filter`] wraps any such stream and
//! guarantees strictly increasing revisions to its consumer. Keeping them
//! distinct makes the monotonicity property testable against a synthetic
//! source, without a live etcd.

use crate::core::errors::{FailoverError, Result};
use etcd_client::{Client, EventType, GetOptions, WatchOptions};
use futures::Stream;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One `(key, value, revision)` record observed on the watched key.
#[derive(Debug, Clone)]
pub struct WatchRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: i64,
}

/// Wraps any revision-carrying stream so that only strictly-increasing
/// revisions reach the consumer. A revision re-delivered after a watch
/// re-establishment (or a stale full read from the polling fallback) is
/// silently dropped rather than re-processed.
pub fn revision_filter<S>(source: S) -> impl Stream<Item = Result<WatchRecord>>
where
    S: Stream<Item = Result<WatchRecord>>,
{
    async_stream::try_stream! {
        tokio::pin!(source);
        let mut highest_seen: i64 = i64::MIN;
        while let Some(item) = futures::StreamExt::next(&mut source).await {
            let record = item?;
            if record.revision <= highest_seen {
                debug!(
                    revision = record.revision,
                    highest_seen, "dropping non-monotonic revision from watch stream"
                );
                continue;
            }
            highest_seen = record.revision;
            yield record;
        }
    }
}

/// The raw etcd-backed source: a long-lived watch on `key`, augmented with a
/// periodic forced full read (`poll_interval`/`get_timeout`) to recover from
/// watch events missed during a transient disconnect. Delivery is
/// cooperative — the producer blocks on consumer backpressure inherent to
/// the underlying channel-backed stream. Cancelling `cancel` terminates the
/// stream cleanly (no error is yielded for a clean cancellation).
pub fn watch_clusterdata(
    mut client: Client,
    key: String,
    poll_interval: Duration,
    get_timeout: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<WatchRecord>> {
    async_stream::try_stream! {
        let (mut watcher, mut watch_stream) = client.watch(key.clone(), Some(WatchOptions::new())).await?;
        let mut poll_timer = tokio::time::interval(poll_interval);
        poll_timer.reset();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("watch stream cancelled");
                    let _ = watcher.cancel().await;
                    break;
                }

                _ = poll_timer.tick() => {
                    match tokio::time::timeout(get_timeout, client.get(key.as_str(), Some(GetOptions::new()))).await {
                        Ok(Ok(resp)) => {
                            if let Some(kv) = resp.kvs().first() {
                                yield WatchRecord {
                                    key: key.clone(),
                                    value: kv.value().to_vec(),
                                    revision: kv.mod_revision(),
                                };
                            }
                        }
                        Ok(Err(e)) => warn!(error = %e, "polling fallback GET failed"),
                        Err(_) => warn!(?get_timeout, "polling fallback GET timed out"),
                    }
                }

                message = watch_stream.message() => {
                    match message {
                        Ok(Some(resp)) => {
                            if resp.canceled() {
                                warn!("etcd watch canceled by server");
                                continue;
                            }
                            for event in resp.events() {
                                if event.event_type() != EventType::Put {
                                    continue;
                                }
                                let Some(kv) = event.kv() else { continue };
                                if kv.key_str().unwrap_or_default() != key {
                                    continue;
                                }
                                yield WatchRecord {
                                    key: key.clone(),
                                    value: kv.value().to_vec(),
                                    revision: kv.mod_revision(),
                                };
                            }
                        }
                        Ok(None) => {
                            Err(FailoverError::Internal("watch stream closed by server".to_string()))?;
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "watch stream error, relying on polling fallback");
                        }
                    }
                }
            }
        }
    }
}
