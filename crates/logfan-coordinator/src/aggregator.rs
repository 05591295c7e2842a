use std::collections::BTreeMap;

use logfan_core::types::{ChunkId, MetricsRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Ack,
    DuplicateIgnored,
}

/// Per-chunk results for one job.
///
/// Results are keyed by chunk so a replayed completion cannot be counted twice; the
/// total is always derived from the map.
#[derive(Debug)]
pub struct Aggregator {
    total_chunks: usize,
    by_chunk: BTreeMap<ChunkId, MetricsRecord>,
}

impl Aggregator {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            by_chunk: BTreeMap::new(),
        }
    }

    /// Call only after the scheduler accepted the completion for `chunk_id`.
    pub fn record(&mut self, chunk_id: ChunkId, metrics: MetricsRecord) -> RecordOutcome {
        if self.by_chunk.contains_key(&chunk_id) {
            return RecordOutcome::DuplicateIgnored;
        }
        self.by_chunk.insert(chunk_id, metrics);
        RecordOutcome::Ack
    }

    pub fn total(&self) -> MetricsRecord {
        self.by_chunk.values().sum()
    }

    pub fn coverage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        self.by_chunk.len() as f64 / self.total_chunks as f64
    }

    pub fn contribution(&self, chunk_id: ChunkId) -> Option<&MetricsRecord> {
        self.by_chunk.get(&chunk_id)
    }

    pub fn len(&self) -> usize {
        self.by_chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chunk.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(errors: u64) -> MetricsRecord {
        MetricsRecord {
            error_count: errors,
            request_count: 1,
            total_latency_ms: 10,
        }
    }

    #[test]
    fn duplicate_record_counts_once() {
        let mut agg = Aggregator::new(2);
        assert_eq!(agg.record(ChunkId(0), rec(3)), RecordOutcome::Ack);
        assert_eq!(agg.record(ChunkId(0), rec(3)), RecordOutcome::DuplicateIgnored);
        assert_eq!(agg.total(), rec(3));
        assert_eq!(agg.coverage(), 0.5);

        assert_eq!(agg.record(ChunkId(1), rec(4)), RecordOutcome::Ack);
        assert_eq!(agg.total().error_count, 7);
        assert_eq!(agg.total().request_count, 2);
        assert_eq!(agg.coverage(), 1.0);
    }

    #[test]
    fn empty_aggregate() {
        let agg = Aggregator::new(4);
        assert_eq!(agg.total(), MetricsRecord::default());
        assert_eq!(agg.coverage(), 0.0);
        assert!(agg.is_empty());
        assert_eq!(Aggregator::new(0).coverage(), 1.0);
    }
}
