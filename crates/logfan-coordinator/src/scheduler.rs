use std::collections::BTreeSet;

use logfan_core::types::{ByteRange, ChunkId, WorkerId};

use crate::error::{PartitionError, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Assigned,
    Completed,
    /// Attempts exhausted. Terminal, reported as partial coverage.
    Failed,
}

impl ChunkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Completed | ChunkState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub range: ByteRange,
    pub state: ChunkState,
    pub assigned_worker: Option<WorkerId>,
    pub attempt_count: u32,
    /// Worker of the most recent attempt, kept after a requeue.
    pub last_worker: Option<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub chunk_id: ChunkId,
    pub range: ByteRange,
    pub worker_id: WorkerId,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessOutcome {
    Ack,
    AlreadyTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `Pending`, eligible on the next assignment pass.
    Requeued,
    /// `max_attempts` reached; the chunk is now `Failed`.
    Exhausted,
    /// Chunk was not `Assigned`; nothing changed.
    Ignored,
}

/// Splits `[0, file_size)` into contiguous chunks of `chunk_size` bytes.
/// The last chunk may be shorter.
pub fn partition(file_size: u64, chunk_size: u64) -> Result<Vec<Chunk>, PartitionError> {
    if file_size == 0 {
        return Err(PartitionError::InvalidInput("file_size must be > 0"));
    }
    if chunk_size == 0 {
        return Err(PartitionError::InvalidInput("chunk_size must be > 0"));
    }

    let mut chunks = Vec::with_capacity(file_size.div_ceil(chunk_size) as usize);
    let mut start = 0u64;
    while start < file_size {
        let size = chunk_size.min(file_size - start);
        chunks.push(Chunk {
            id: ChunkId(chunks.len() as u64),
            range: ByteRange { start, size },
            state: ChunkState::Pending,
            assigned_worker: None,
            attempt_count: 0,
            last_worker: None,
        });
        start += size;
    }
    Ok(chunks)
}

/// Owns every chunk state transition for one job.
#[derive(Debug)]
pub struct Scheduler {
    chunks: Vec<Chunk>,
    max_attempts: Option<u32>,
}

impl Scheduler {
    /// `chunks` must be indexed by id, as produced by [`partition`].
    pub fn new(chunks: Vec<Chunk>, max_attempts: Option<u32>) -> Self {
        Self {
            chunks,
            max_attempts: max_attempts.filter(|m| *m > 0),
        }
    }

    pub fn for_file(
        file_size: u64,
        chunk_size: u64,
        max_attempts: Option<u32>,
    ) -> Result<Self, PartitionError> {
        Ok(Self::new(partition(file_size, chunk_size)?, max_attempts))
    }

    fn get(&self, chunk_id: ChunkId) -> Result<&Chunk, SchedulerError> {
        usize::try_from(chunk_id.0)
            .ok()
            .and_then(|i| self.chunks.get(i))
            .ok_or(SchedulerError::UnknownChunk(chunk_id))
    }

    fn get_mut(&mut self, chunk_id: ChunkId) -> Result<&mut Chunk, SchedulerError> {
        usize::try_from(chunk_id.0)
            .ok()
            .and_then(|i| self.chunks.get_mut(i))
            .ok_or(SchedulerError::UnknownChunk(chunk_id))
    }

    /// Matches `Pending` chunks to idle live workers, one chunk in flight per worker.
    ///
    /// Chunks go in ascending id order, each to the lowest idle worker id. A retried
    /// chunk skips the worker of its previous attempt unless that is the only idle
    /// worker left. Unmatched chunks stay `Pending`.
    pub fn next_assignment(&mut self, live_workers: &BTreeSet<WorkerId>) -> Vec<Assignment> {
        let busy: BTreeSet<WorkerId> = self
            .chunks
            .iter()
            .filter(|c| c.state == ChunkState::Assigned)
            .filter_map(|c| c.assigned_worker.clone())
            .collect();
        let mut idle: Vec<WorkerId> = live_workers.difference(&busy).cloned().collect();

        let mut out = Vec::new();
        for chunk in self.chunks.iter_mut() {
            if idle.is_empty() {
                break;
            }
            if chunk.state != ChunkState::Pending {
                continue;
            }
            let pos = idle
                .iter()
                .position(|w| chunk.last_worker.as_ref() != Some(w))
                .unwrap_or(0);
            let worker_id = idle.remove(pos);

            chunk.state = ChunkState::Assigned;
            chunk.assigned_worker = Some(worker_id.clone());
            chunk.last_worker = Some(worker_id.clone());
            chunk.attempt_count = chunk.attempt_count.saturating_add(1);
            out.push(Assignment {
                chunk_id: chunk.id,
                range: chunk.range,
                worker_id,
                attempt: chunk.attempt_count,
            });
        }
        out
    }

    /// The `Completed` transition is the duplicate gate: only the first success wins.
    ///
    /// A success for a chunk that was already requeued is still accepted, since the
    /// result describes the same byte range.
    pub fn on_success(&mut self, chunk_id: ChunkId) -> Result<SuccessOutcome, SchedulerError> {
        let chunk = self.get_mut(chunk_id)?;
        if chunk.state.is_terminal() {
            return Ok(SuccessOutcome::AlreadyTerminal);
        }
        chunk.state = ChunkState::Completed;
        chunk.assigned_worker = None;
        Ok(SuccessOutcome::Ack)
    }

    pub fn on_failure(&mut self, chunk_id: ChunkId) -> Result<FailureOutcome, SchedulerError> {
        let max_attempts = self.max_attempts;
        let chunk = self.get_mut(chunk_id)?;
        if chunk.state != ChunkState::Assigned {
            return Ok(FailureOutcome::Ignored);
        }
        chunk.assigned_worker = None;
        if max_attempts.is_some_and(|max| chunk.attempt_count >= max) {
            chunk.state = ChunkState::Failed;
            return Ok(FailureOutcome::Exhausted);
        }
        chunk.state = ChunkState::Pending;
        Ok(FailureOutcome::Requeued)
    }

    /// True if `assignment` is still the live attempt for its chunk.
    pub fn is_current_attempt(&self, assignment: &Assignment) -> bool {
        self.get(assignment.chunk_id).is_ok_and(|c| {
            c.state == ChunkState::Assigned
                && c.attempt_count == assignment.attempt
                && c.assigned_worker.as_ref() == Some(&assignment.worker_id)
        })
    }

    pub fn assigned_to(&self, worker_id: &WorkerId) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Assigned && c.assigned_worker.as_ref() == Some(worker_id))
            .map(|c| c.id)
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.chunks.iter().all(|c| c.state.is_terminal())
    }

    pub fn chunk(&self, chunk_id: ChunkId) -> Option<&Chunk> {
        self.get(chunk_id).ok()
    }

    pub fn failed_chunks(&self) -> Vec<ChunkId> {
        self.ids_in(ChunkState::Failed)
    }

    pub fn count(&self, state: ChunkState) -> usize {
        self.chunks.iter().filter(|c| c.state == state).count()
    }

    fn ids_in(&self, state: ChunkState) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|c| c.state == state)
            .map(|c| c.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
