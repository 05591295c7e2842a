use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

use logfan_core::types::MetricsRecord;
use logfan_proto::v0::worker_client::WorkerClient;
use logfan_wire::{ChunkTask, ToWire, TryToCore};

use crate::error::RpcError;

/// Coordinator-to-worker call. Implementations report any failure as `RpcError`;
/// the caller applies its own per-chunk timeout.
#[async_trait]
pub trait WorkerRpc: Send + Sync + 'static {
    async fn assign_chunk(&self, address: &str, task: ChunkTask) -> Result<MetricsRecord, RpcError>;
}

/// gRPC binding: calls the `Worker` service at the address the worker registered.
pub struct GrpcWorkerRpc {
    connect_timeout: Duration,
    channels: Mutex<HashMap<String, Channel>>,
}

impl GrpcWorkerRpc {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            channels: Mutex::new(HashMap::new()),
        }
    }

    async fn channel(&self, address: &str) -> Result<Channel, RpcError> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(address) {
            return Ok(channel.clone());
        }
        let channel = Endpoint::from_shared(address.to_string())?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();
        channels.insert(address.to_string(), channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl WorkerRpc for GrpcWorkerRpc {
    async fn assign_chunk(&self, address: &str, task: ChunkTask) -> Result<MetricsRecord, RpcError> {
        let mut client = WorkerClient::new(self.channel(address).await?);
        let resp = client.assign_chunk(task.to_wire()).await?.into_inner();
        if resp.chunk_id != task.chunk_id.0 {
            return Err(RpcError::Malformed(format!(
                "response for chunk_id {} to request for {}",
                resp.chunk_id, task.chunk_id
            )));
        }
        resp.try_to_core()
            .map_err(|err| RpcError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use logfan_core::types::{ByteRange, ChunkId};

    #[tokio::test]
    async fn invalid_address_is_transport_error() {
        let rpc = GrpcWorkerRpc::new(Duration::from_millis(100));
        let task = ChunkTask {
            chunk_id: ChunkId(0),
            attempt: 1,
            file_path: "/tmp/app.log".into(),
            range: ByteRange { start: 0, size: 1 },
        };
        let err = rpc.assign_chunk("not a uri", task).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)), "{err:?}");
    }
}
