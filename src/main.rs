// src/main.rs

//! The failover orchestrator's entrypoint: load configuration, connect to
//! etcd, run one failover pass, report the result. This binary does not own
//! `stolonctl`, PgBouncer, or agent packaging, and is not a long-running
//! service supervisor — each invocation drives exactly one failover.

use anyhow::{Context, Result};
use etcd_client::Client;
use std::env;
use std::sync::Arc;
use stolon_pgbouncer_failover::FailoverPipeline;
use stolon_pgbouncer_failover::config::FailoverConfig;
use stolon_pgbouncer_failover::core::lock::EtcdLockProvider;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .init();

    let args: Vec<String> = env::args().collect();
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = FailoverConfig::from_file(config_path)
        .with_context(|| format!("failed to load configuration from '{config_path}'"))?;

    info!(
        event = "failover_starting",
        version = env!("CARGO_PKG_VERSION"),
        clusterdata_key = %config.clusterdata_key,
    );

    let etcd_client = Client::connect(config.etcd_endpoints.clone(), None)
        .await
        .context("failed to connect to etcd")?;

    let lock_provider = Arc::new(EtcdLockProvider::new(
        etcd_client.clone(),
        config.lock_lease_ttl_secs,
    ));

    let pipeline = FailoverPipeline::new(config, etcd_client, lock_provider)
        .context("failed to construct failover pipeline")?;

    // `exec_ctx` is cancelled by the operator (Ctrl-C / SIGINT); `defer_ctx`
    // is a distinct scope that outlives it so `resume` and lock release
    // still run after an aborted run.
    let exec_ctx = CancellationToken::new();
    let defer_ctx = CancellationToken::new();

    let exec_ctx_signal = exec_ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event = "failover_abort_requested");
            exec_ctx_signal.cancel();
        }
    });

    match pipeline.run(exec_ctx, defer_ctx).await {
        Ok(state) => {
            info!(
                event = "failover_succeeded",
                new_master = %state.master.keeper_uid,
                revision = state.revision,
            );
            Ok(())
        }
        Err(error) => {
            error!(event = "failover_failed", %error);
            Err(error.into())
        }
    }
}
