use std::time::Duration;

use tonic::transport::Channel;

use logfan_proto::v0::coordinator_client::CoordinatorClient;
use logfan_proto::v0::{HeartbeatRequest, RegisterWorkerRequest};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const FALLBACK_HEARTBEAT: Duration = Duration::from_secs(1);

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

/// Keeps this worker registered with the coordinator and heartbeating.
pub struct Membership {
    pub client: CoordinatorClient<Channel>,
    pub worker_id: String,
    pub advertise_url: String,
    pub heartbeat_override: Option<Duration>,
}

impl Membership {
    pub async fn run(mut self) {
        let mut interval = self.register_until_ok().await;
        loop {
            tokio::time::sleep(interval).await;
            let req = HeartbeatRequest {
                worker_id: self.worker_id.clone(),
            };
            match self.client.heartbeat(req).await {
                Ok(_) => tracing::debug!("heartbeat ok"),
                Err(status) if status.code() == tonic::Code::NotFound => {
                    // Pruned after being declared dead, or the coordinator restarted.
                    tracing::warn!("coordinator does not know this worker; registering again");
                    interval = self.register_until_ok().await;
                }
                Err(status) => {
                    tracing::warn!(code = ?status.code(), message = %status.message(), "heartbeat failed");
                }
            }
        }
    }

    /// Retries `RegisterWorker` with capped exponential backoff and returns the
    /// heartbeat interval to use.
    async fn register_until_ok(&mut self) -> Duration {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let req = RegisterWorkerRequest {
                worker_id: self.worker_id.clone(),
                address: self.advertise_url.clone(),
            };
            match self.client.register_worker(req).await {
                Ok(resp) => {
                    let granted = resp.into_inner().heartbeat_interval_ms;
                    let interval = self.heartbeat_override.unwrap_or_else(|| {
                        if granted == 0 {
                            FALLBACK_HEARTBEAT
                        } else {
                            Duration::from_millis(u64::from(granted))
                        }
                    });
                    tracing::info!(
                        heartbeat_interval_ms = interval.as_millis() as u64,
                        "registered with coordinator"
                    );
                    return interval;
                }
                Err(status) => {
                    tracing::warn!(
                        code = ?status.code(),
                        message = %status.message(),
                        retry_in_ms = backoff.as_millis() as u64,
                        "RegisterWorker failed"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        }
    }
}
