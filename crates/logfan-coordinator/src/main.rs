#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tonic::transport::Server;
use tracing::{info, info_span, Instrument};

use logfan_coordinator::coordinator::{Coordinator, CoordinatorConfig};
use logfan_coordinator::rpc::GrpcWorkerRpc;
use logfan_coordinator::scheduler::Scheduler;
use logfan_coordinator::service::CoordinatorSvc;
use logfan_proto::v0::coordinator_server::CoordinatorServer;

#[derive(Debug, Parser)]
#[command(name = "logfan-coordinator")]
struct Args {
    /// Address to bind the coordinator gRPC server.
    #[arg(long, env = "LOGFAN_COORD_BIND_ADDR", default_value = "0.0.0.0:50061")]
    addr: SocketAddr,

    /// Log file to analyze. Workers must see it at the same path.
    #[arg(long, env = "LOGFAN_INPUT")]
    input: PathBuf,

    /// Bytes per chunk.
    #[arg(long, env = "LOGFAN_CHUNK_SIZE", default_value_t = 64 * 1024 * 1024)]
    chunk_size: u64,

    /// Heartbeat interval returned to workers.
    #[arg(long, env = "LOGFAN_HEARTBEAT_INTERVAL_MS", default_value_t = 1000)]
    heartbeat_interval_ms: u32,

    /// Silence after which a worker stops receiving new chunks.
    #[arg(long, env = "LOGFAN_SUSPECT_AFTER_MS", default_value_t = 3000)]
    suspect_after_ms: u64,

    /// Silence after which a worker is dead and its chunk is reassigned.
    #[arg(long, env = "LOGFAN_DEAD_AFTER_MS", default_value_t = 10_000)]
    dead_after_ms: u64,

    /// Per-chunk RPC deadline; expiry counts as a failed attempt.
    #[arg(long, env = "LOGFAN_CHUNK_TIMEOUT_MS", default_value_t = 60_000)]
    chunk_timeout_ms: u64,

    /// Attempts before a chunk is given up on (0 = retry forever).
    #[arg(long, env = "LOGFAN_MAX_ATTEMPTS", default_value_t = 0)]
    max_attempts: u32,

    /// Control loop tick.
    #[arg(long, env = "LOGFAN_TICK_INTERVAL_MS", default_value_t = 500)]
    tick_interval_ms: u64,

    /// Take a worker out of rotation as soon as a call to it fails.
    #[arg(
        long,
        env = "LOGFAN_SUSPECT_ON_RPC_FAILURE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    suspect_on_rpc_failure: bool,

    /// Optional: periodically emit a metrics snapshot to logs.
    #[arg(long, env = "LOGFAN_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    metrics_snapshot_interval_ms: u64,
}

impl Args {
    fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            file_path: self.input.clone(),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            heartbeat_interval: Duration::from_millis(u64::from(self.heartbeat_interval_ms)),
            suspect_after: Duration::from_millis(self.suspect_after_ms),
            dead_after: Duration::from_millis(self.dead_after_ms),
            chunk_timeout: Duration::from_millis(self.chunk_timeout_ms),
            suspect_on_rpc_failure: self.suspect_on_rpc_failure,
            metrics_snapshot_interval: (self.metrics_snapshot_interval_ms > 0)
                .then(|| Duration::from_millis(self.metrics_snapshot_interval_ms)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logfan_observe::logging::init_tracing();

    let args = Args::parse();
    let span = info_span!(
        "logfan-coordinator",
        addr = %args.addr,
        input = %args.input.display(),
        chunk_size = args.chunk_size
    );

    async move {
        let config = args.config();
        config.validate()?;

        let file_size = std::fs::metadata(&args.input)
            .with_context(|| format!("stat {}", args.input.display()))?
            .len();
        let max_attempts = (args.max_attempts > 0).then_some(args.max_attempts);
        let scheduler = Scheduler::for_file(file_size, args.chunk_size, max_attempts)?;
        info!(
            file_size,
            chunks = scheduler.len() as u64,
            max_attempts = args.max_attempts,
            "starting coordinator"
        );

        let rpc = Arc::new(GrpcWorkerRpc::new(Duration::from_secs(2)));
        let heartbeat_interval = config.heartbeat_interval;
        let coordinator = Coordinator::new(config, scheduler, rpc);
        let svc = CoordinatorSvc::new(coordinator.handle(), heartbeat_interval);

        let server = tokio::spawn(
            Server::builder()
                .add_service(CoordinatorServer::new(svc))
                .serve(args.addr),
        );

        let report = coordinator.run().await?;
        server.abort();

        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_into_valid_config() {
        let args = Args::try_parse_from(["logfan-coordinator", "--input", "/tmp/app.log"]).unwrap();
        let config = args.config();
        config.validate().unwrap();
        assert!(config.suspect_on_rpc_failure);
        assert_eq!(config.metrics_snapshot_interval, None);
        assert_eq!(config.dead_after, Duration::from_secs(10));
    }

    #[test]
    fn heartbeat_interval_flag_reaches_config() {
        let args = Args::try_parse_from([
            "logfan-coordinator",
            "--input",
            "/tmp/app.log",
            "--heartbeat-interval-ms",
            "400",
        ])
        .unwrap();
        assert_eq!(args.config().heartbeat_interval, Duration::from_millis(400));
    }

    #[test]
    fn suspect_on_rpc_failure_can_be_disabled() {
        let args = Args::try_parse_from([
            "logfan-coordinator",
            "--input",
            "/tmp/app.log",
            "--suspect-on-rpc-failure",
            "false",
        ])
        .unwrap();
        assert!(!args.config().suspect_on_rpc_failure);
    }
}
