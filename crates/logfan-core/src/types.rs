use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index of a chunk in the job's partition. Ids are dense: `0..chunk_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque worker identity chosen by the worker itself.
///
/// Workers are keyed by this id rather than by address, since an address can be
/// reused by a different process after a restart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("worker_id must be non-empty")]
pub struct EmptyWorkerId;

impl WorkerId {
    pub fn parse(value: &str) -> Result<Self, EmptyWorkerId> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EmptyWorkerId);
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub size: u64, // half-open [start, start + size)
}

impl ByteRange {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }
}

/// Partial analysis result for one chunk.
///
/// Merging is a field-wise sum, so records for disjoint chunks can be combined in
/// any order. Guarding against merging the same chunk twice is the aggregator's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub error_count: u64,
    pub request_count: u64,
    pub total_latency_ms: u64,
}

impl MetricsRecord {
    pub fn merge(&self, other: &MetricsRecord) -> MetricsRecord {
        MetricsRecord {
            error_count: self.error_count.saturating_add(other.error_count),
            request_count: self.request_count.saturating_add(other.request_count),
            total_latency_ms: self.total_latency_ms.saturating_add(other.total_latency_ms),
        }
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.request_count == 0 {
            return None;
        }
        Some(self.total_latency_ms as f64 / self.request_count as f64)
    }
}

impl Add for MetricsRecord {
    type Output = MetricsRecord;

    fn add(self, rhs: MetricsRecord) -> MetricsRecord {
        self.merge(&rhs)
    }
}

impl AddAssign for MetricsRecord {
    fn add_assign(&mut self, rhs: MetricsRecord) {
        *self = self.merge(&rhs);
    }
}

impl<'a> std::iter::Sum<&'a MetricsRecord> for MetricsRecord {
    fn sum<I: Iterator<Item = &'a MetricsRecord>>(iter: I) -> MetricsRecord {
        iter.fold(MetricsRecord::default(), |acc, m| acc.merge(m))
    }
}
