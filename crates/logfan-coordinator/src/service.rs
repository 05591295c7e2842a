use std::time::Duration;

use tonic::{Request, Response, Status};

use logfan_proto::v0::coordinator_server::Coordinator;
use logfan_proto::v0::*;
use logfan_wire::TryToCore;

use crate::coordinator::CoordinatorHandle;
use crate::registry::{HeartbeatAck, RegisterAck};

/// `Coordinator` gRPC service. Every call is forwarded to the coordination loop.
#[derive(Debug, Clone)]
pub struct CoordinatorSvc {
    handle: CoordinatorHandle,
    heartbeat_interval_ms: u32,
}

impl CoordinatorSvc {
    /// `heartbeat_interval` is what workers are told to use; see
    /// [`CoordinatorConfig::heartbeat_interval`](crate::coordinator::CoordinatorConfig).
    pub fn new(handle: CoordinatorHandle, heartbeat_interval: Duration) -> Self {
        Self {
            handle,
            heartbeat_interval_ms: u32::try_from(heartbeat_interval.as_millis()).unwrap_or(u32::MAX),
        }
    }
}

#[tonic::async_trait]
impl Coordinator for CoordinatorSvc {
    async fn register_worker(
        &self,
        request: Request<RegisterWorkerRequest>,
    ) -> Result<Response<RegisterWorkerResponse>, Status> {
        let (worker_id, address) = request
            .into_inner()
            .try_to_core()
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        let ack = self
            .handle
            .register(worker_id.clone(), address.clone())
            .await
            .map_err(|err| Status::unavailable(err.to_string()))?;

        tracing::info!(
            worker_id = %worker_id,
            address = %address,
            reregistered = ack == RegisterAck::Reregistered,
            "RegisterWorker accepted"
        );
        Ok(Response::new(RegisterWorkerResponse {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let worker_id = request
            .into_inner()
            .try_to_core()
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        match self
            .handle
            .heartbeat(worker_id)
            .await
            .map_err(|err| Status::unavailable(err.to_string()))?
        {
            HeartbeatAck::Ack => Ok(Response::new(HeartbeatResponse {})),
            HeartbeatAck::NotRegistered => Err(Status::not_found(
                "worker must RegisterWorker before sending heartbeats",
            )),
        }
    }
}
