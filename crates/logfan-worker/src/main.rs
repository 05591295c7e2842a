#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

mod analyze;
mod membership;
mod service;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tonic::transport::{Channel, Server};
use tracing::{info, info_span, Instrument};

use logfan_proto::v0::coordinator_client::CoordinatorClient;
use logfan_proto::v0::worker_server::WorkerServer;

use crate::membership::Membership;
use crate::service::WorkerSvc;

#[derive(Debug, Parser)]
#[command(name = "logfan-worker")]
struct Args {
    /// Coordinator address, e.g. http://127.0.0.1:50061
    #[arg(long, env = "LOGFAN_COORD_URL", default_value = "http://127.0.0.1:50061")]
    coord_url: String,

    #[arg(long, env = "LOGFAN_WORKER_ID")]
    worker_id: String,

    /// Address to bind the worker gRPC server.
    #[arg(long, env = "LOGFAN_WORKER_BIND_ADDR", default_value = "0.0.0.0:50071")]
    addr: SocketAddr,

    /// URL the coordinator should dial. Defaults to http://127.0.0.1:<port of --addr>.
    #[arg(long, env = "LOGFAN_ADVERTISE_URL")]
    advertise_url: Option<String>,

    /// Override the heartbeat interval handed out by the coordinator (0 = use it).
    #[arg(long, env = "LOGFAN_WORKER_HEARTBEAT_INTERVAL_MS", default_value_t = 0)]
    heartbeat_interval_ms: u64,

    /// Optional: periodically emit a metrics snapshot to logs.
    #[arg(long, env = "LOGFAN_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    metrics_snapshot_interval_ms: u64,
}

impl Args {
    fn advertise_url(&self) -> String {
        self.advertise_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.addr.port()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logfan_observe::logging::init_tracing();

    let args = Args::parse();
    anyhow::ensure!(!args.worker_id.trim().is_empty(), "worker id must be non-empty");
    let advertise_url = args.advertise_url();
    let span = info_span!(
        "logfan-worker",
        worker_id = %args.worker_id,
        coord_url = %args.coord_url,
        advertise_url = %advertise_url
    );

    async move {
        info!("starting worker");
        // Lazy so the worker can come up before the coordinator does.
        let channel = Channel::from_shared(args.coord_url.clone())?.connect_lazy();
        let membership = Membership {
            client: CoordinatorClient::new(channel),
            worker_id: args.worker_id.clone(),
            advertise_url,
            heartbeat_override: (args.heartbeat_interval_ms > 0)
                .then(|| Duration::from_millis(args.heartbeat_interval_ms)),
        };
        tokio::spawn(membership.run().in_current_span());

        let svc = WorkerSvc::new(args.worker_id.clone());
        if args.metrics_snapshot_interval_ms > 0 {
            let metrics = svc.metrics();
            let interval_ms = args.metrics_snapshot_interval_ms;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    let analyze = metrics.analyze_time.snapshot();
                    tracing::info!(
                        target: "logfan_metrics",
                        chunks_served_total = metrics.chunks_served_total.get(),
                        chunk_errors_total = metrics.chunk_errors_total.get(),
                        bytes_read_total = metrics.bytes_read_total.get(),
                        analyze_avg_ms = analyze.avg_ms(),
                        analyze_max_ms = analyze.max_ms(),
                        "metrics"
                    );
                }
            });
        }
        Server::builder()
            .add_service(WorkerServer::new(svc))
            .serve(args.addr)
            .await?;
        Ok(())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertise_url_defaults_to_bind_port() {
        let args = Args::try_parse_from([
            "logfan-worker",
            "--worker-id",
            "w1",
            "--addr",
            "0.0.0.0:6001",
        ])
        .unwrap();
        assert_eq!(args.advertise_url(), "http://127.0.0.1:6001");
    }
}
