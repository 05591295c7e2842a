use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tonic::{Request, Response, Status};

use logfan_core::types::{ByteRange, MetricsRecord};
use logfan_observe::metrics::{Counter, DurationAgg, ScopedTimer};
use logfan_proto::v0::worker_server::Worker;
use logfan_proto::v0::{AssignChunkRequest, AssignChunkResponse};
use logfan_wire::{ToWire, TryToCore};

use crate::analyze::analyze;

#[derive(Debug, Error)]
pub enum ChunkReadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short read: wanted {expected} bytes, got {got}")]
    ShortRead { expected: u64, got: u64 },
}

impl From<ChunkReadError> for Status {
    fn from(err: ChunkReadError) -> Self {
        match &err {
            ChunkReadError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Status::not_found(err.to_string())
            }
            ChunkReadError::ShortRead { .. } => Status::out_of_range(err.to_string()),
            ChunkReadError::Io(_) => Status::internal(err.to_string()),
        }
    }
}

pub async fn read_range(path: &Path, range: ByteRange) -> Result<Vec<u8>, ChunkReadError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut buf = Vec::with_capacity(usize::try_from(range.size).unwrap_or(0));
    let got = file.take(range.size).read_to_end(&mut buf).await? as u64;
    if got != range.size {
        return Err(ChunkReadError::ShortRead {
            expected: range.size,
            got,
        });
    }
    Ok(buf)
}

#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub chunks_served_total: Counter,
    pub chunk_errors_total: Counter,
    pub bytes_read_total: Counter,
    pub analyze_time: DurationAgg,
}

/// `Worker` gRPC service: reads the assigned range and returns its metrics.
#[derive(Debug, Clone)]
pub struct WorkerSvc {
    worker_id: String,
    metrics: Arc<WorkerMetrics>,
}

impl WorkerSvc {
    pub fn new(worker_id: String) -> Self {
        Self {
            worker_id,
            metrics: Arc::new(WorkerMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    async fn process(&self, req: &AssignChunkRequest) -> Result<MetricsRecord, Status> {
        let task = req
            .try_to_core()
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        let bytes = read_range(&task.file_path, task.range).await?;
        self.metrics.bytes_read_total.inc_by(bytes.len() as u64);

        let metrics = self.metrics.clone();
        let record = tokio::task::spawn_blocking(move || {
            let _timer = ScopedTimer::new(&metrics.analyze_time);
            analyze(&bytes)
        })
        .await
        .map_err(|err| Status::internal(format!("analysis task failed: {err}")))?;

        tracing::info!(
            worker_id = %self.worker_id,
            chunk_id = task.chunk_id.0,
            attempt = task.attempt,
            start = task.range.start,
            size = task.range.size,
            error_count = record.error_count,
            request_count = record.request_count,
            "chunk processed"
        );
        Ok(record)
    }
}

#[tonic::async_trait]
impl Worker for WorkerSvc {
    async fn assign_chunk(
        &self,
        request: Request<AssignChunkRequest>,
    ) -> Result<Response<AssignChunkResponse>, Status> {
        let req = request.into_inner();
        match self.process(&req).await {
            Ok(record) => {
                self.metrics.chunks_served_total.inc();
                Ok(Response::new(AssignChunkResponse {
                    chunk_id: req.chunk_id,
                    metrics: Some(record.to_wire()),
                }))
            }
            Err(status) => {
                self.metrics.chunk_errors_total.inc();
                tracing::warn!(
                    worker_id = %self.worker_id,
                    chunk_id = req.chunk_id,
                    code = ?status.code(),
                    message = %status.message(),
                    "chunk rejected"
                );
                Err(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;

    use super::*;

    const SAMPLE: &str = "\
2024-01-24 10:15:32.123 INFO Request processed in 127ms
2024-01-24 10:15:33.001 ERROR Database connection failed
2024-01-24 10:15:34.042 INFO Request processed in 95ms
";

    fn temp_log(test_name: &str) -> Result<PathBuf> {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "logfan-worker-{test_name}-{}.log",
            std::process::id()
        ));
        std::fs::write(&path, SAMPLE)?;
        Ok(path)
    }

    fn request(path: &Path, start: u64, size: u64) -> Request<AssignChunkRequest> {
        Request::new(AssignChunkRequest {
            chunk_id: 7,
            attempt: 1,
            file_path: path.to_string_lossy().into_owned(),
            range: Some(logfan_proto::v0::ByteRange { start, size }),
        })
    }

    #[tokio::test]
    async fn assign_chunk_analyzes_range() -> Result<()> {
        let path = temp_log("range")?;
        let svc = WorkerSvc::new("w1".to_string());

        let resp = svc
            .assign_chunk(request(&path, 0, SAMPLE.len() as u64))
            .await?
            .into_inner();
        assert_eq!(resp.chunk_id, 7);
        let m = resp.metrics.unwrap();
        assert_eq!((m.error_count, m.request_count, m.total_latency_ms), (1, 2, 222));

        // Second line only.
        let second = SAMPLE.find("2024-01-24 10:15:33").unwrap() as u64;
        let third = SAMPLE.find("2024-01-24 10:15:34").unwrap() as u64;
        let resp = svc
            .assign_chunk(request(&path, second, third - second))
            .await?
            .into_inner();
        let m = resp.metrics.unwrap();
        assert_eq!((m.error_count, m.request_count), (1, 0));
        assert_eq!(svc.metrics().chunks_served_total.get(), 2);

        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[tokio::test]
    async fn range_past_eof_is_out_of_range() -> Result<()> {
        let path = temp_log("eof")?;
        let svc = WorkerSvc::new("w1".to_string());
        let err = svc
            .assign_chunk(request(&path, 0, SAMPLE.len() as u64 + 10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::OutOfRange);
        assert_eq!(svc.metrics().chunk_errors_total.get(), 1);
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let svc = WorkerSvc::new("w1".to_string());
        let err = svc
            .assign_chunk(request(Path::new("/nonexistent/logfan/app.log"), 0, 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }
}
