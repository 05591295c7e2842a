#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;

use logfan_core::types as core;
use logfan_proto::v0 as wire;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("{field} must be non-empty")]
    EmptyField { field: &'static str },
    #[error("{field} is required")]
    MissingField { field: &'static str },
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ConvertError> {
    if value.trim().is_empty() {
        return Err(ConvertError::EmptyField { field });
    }
    Ok(())
}

pub trait ToWire<T> {
    fn to_wire(&self) -> T;
}

pub trait ToCore<T> {
    fn to_core(&self) -> T;
}

pub trait TryToCore<T> {
    type Error;
    fn try_to_core(&self) -> Result<T, Self::Error>;
}

/// A decoded `AssignChunk` call, as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTask {
    pub chunk_id: core::ChunkId,
    pub attempt: u32,
    pub file_path: PathBuf,
    pub range: core::ByteRange,
}

impl ToWire<wire::ByteRange> for core::ByteRange {
    fn to_wire(&self) -> wire::ByteRange {
        wire::ByteRange {
            start: self.start,
            size: self.size,
        }
    }
}

impl ToCore<core::ByteRange> for wire::ByteRange {
    fn to_core(&self) -> core::ByteRange {
        core::ByteRange {
            start: self.start,
            size: self.size,
        }
    }
}

impl ToWire<wire::Metrics> for core::MetricsRecord {
    fn to_wire(&self) -> wire::Metrics {
        wire::Metrics {
            error_count: self.error_count,
            request_count: self.request_count,
            total_latency_ms: self.total_latency_ms,
        }
    }
}

impl ToCore<core::MetricsRecord> for wire::Metrics {
    fn to_core(&self) -> core::MetricsRecord {
        core::MetricsRecord {
            error_count: self.error_count,
            request_count: self.request_count,
            total_latency_ms: self.total_latency_ms,
        }
    }
}

impl TryToCore<core::MetricsRecord> for wire::AssignChunkResponse {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<core::MetricsRecord, Self::Error> {
        self.metrics
            .as_ref()
            .map(ToCore::to_core)
            .ok_or(ConvertError::MissingField { field: "metrics" })
    }
}

impl TryToCore<ChunkTask> for wire::AssignChunkRequest {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<ChunkTask, Self::Error> {
        non_empty("file_path", &self.file_path)?;
        let range = self
            .range
            .as_ref()
            .ok_or(ConvertError::MissingField { field: "range" })?;

        Ok(ChunkTask {
            chunk_id: core::ChunkId(self.chunk_id),
            attempt: self.attempt,
            file_path: PathBuf::from(&self.file_path),
            range: range.to_core(),
        })
    }
}

impl ToWire<wire::AssignChunkRequest> for ChunkTask {
    fn to_wire(&self) -> wire::AssignChunkRequest {
        wire::AssignChunkRequest {
            chunk_id: self.chunk_id.0,
            attempt: self.attempt,
            file_path: self.file_path.to_string_lossy().into_owned(),
            range: Some(self.range.to_wire()),
        }
    }
}

impl TryToCore<core::WorkerId> for wire::HeartbeatRequest {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<core::WorkerId, Self::Error> {
        core::WorkerId::parse(&self.worker_id)
            .map_err(|_| ConvertError::EmptyField { field: "worker_id" })
    }
}

impl TryToCore<(core::WorkerId, String)> for wire::RegisterWorkerRequest {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<(core::WorkerId, String), Self::Error> {
        let worker_id = core::WorkerId::parse(&self.worker_id)
            .map_err(|_| ConvertError::EmptyField { field: "worker_id" })?;
        non_empty("address", &self.address)?;
        Ok((worker_id, self.address.trim().to_string()))
    }
}
