use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use logfan_core::types::{ChunkId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Heartbeat overdue, or an RPC to the worker failed. Not offered new work.
    Suspect,
    /// Silent past the grace period. Pruned once it holds no chunk.
    Dead,
}

#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub address: String,
    pub liveness: Liveness,
    pub last_heartbeat: Instant,
    /// Outstanding `AssignChunk` call as `(chunk, attempt)`. Cleared only by the
    /// response for that same attempt, or when the worker is declared dead.
    pub in_flight: Option<(ChunkId, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAck {
    Registered,
    /// Known id registered again, e.g. a restarted worker process.
    Reregistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAck {
    Ack,
    NotRegistered,
}

/// Known workers keyed by their self-chosen id.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerEntry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker_id: WorkerId, address: String, now: Instant) -> RegisterAck {
        match self.workers.get_mut(&worker_id) {
            Some(entry) => {
                if entry.address != address {
                    tracing::warn!(
                        worker_id = %worker_id,
                        old_address = %entry.address,
                        new_address = %address,
                        "RegisterWorker updated address for existing worker_id"
                    );
                }
                entry.address = address;
                entry.liveness = Liveness::Alive;
                entry.last_heartbeat = now;
                RegisterAck::Reregistered
            }
            None => {
                tracing::info!(worker_id = %worker_id, address = %address, "worker registered");
                self.workers.insert(
                    worker_id,
                    WorkerEntry {
                        address,
                        liveness: Liveness::Alive,
                        last_heartbeat: now,
                        in_flight: None,
                    },
                );
                RegisterAck::Registered
            }
        }
    }

    pub fn heartbeat(&mut self, worker_id: &WorkerId, now: Instant) -> HeartbeatAck {
        let Some(entry) = self.workers.get_mut(worker_id) else {
            return HeartbeatAck::NotRegistered;
        };
        if entry.liveness != Liveness::Alive {
            tracing::info!(worker_id = %worker_id, from = ?entry.liveness, "worker alive again");
        }
        entry.last_heartbeat = now;
        entry.liveness = Liveness::Alive;
        HeartbeatAck::Ack
    }

    /// Applies silence thresholds and returns the workers that just became `Dead`.
    ///
    /// Workers that were already `Dead` are not reported again.
    pub fn sweep(&mut self, now: Instant, suspect_after: Duration, dead_after: Duration) -> Vec<WorkerId> {
        let mut newly_dead = Vec::new();
        for (worker_id, entry) in self.workers.iter_mut() {
            let silence = now.saturating_duration_since(entry.last_heartbeat);
            match entry.liveness {
                Liveness::Dead => {}
                _ if silence > dead_after => {
                    entry.liveness = Liveness::Dead;
                    newly_dead.push(worker_id.clone());
                }
                Liveness::Alive if silence > suspect_after => {
                    tracing::debug!(
                        worker_id = %worker_id,
                        silence_ms = silence.as_millis() as u64,
                        "worker heartbeat overdue"
                    );
                    entry.liveness = Liveness::Suspect;
                }
                _ => {}
            }
        }
        newly_dead
    }

    pub fn live_workers(&self) -> BTreeSet<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, entry)| entry.liveness == Liveness::Alive)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Takes an `Alive` worker out of rotation until its next heartbeat.
    pub fn mark_suspect(&mut self, worker_id: &WorkerId) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(entry) if entry.liveness == Liveness::Alive => {
                entry.liveness = Liveness::Suspect;
                true
            }
            _ => false,
        }
    }

    pub fn assign(&mut self, worker_id: &WorkerId, chunk_id: ChunkId, attempt: u32) {
        if let Some(entry) = self.workers.get_mut(worker_id) {
            entry.in_flight = Some((chunk_id, attempt));
        }
    }

    /// Clears the worker's in-flight call if it is this chunk at this attempt.
    pub fn release(&mut self, worker_id: &WorkerId, chunk_id: ChunkId, attempt: u32) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(entry) if entry.in_flight == Some((chunk_id, attempt)) => {
                entry.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Forgets whatever the worker was running. Used once it is declared dead.
    pub fn clear_in_flight(&mut self, worker_id: &WorkerId) -> Option<ChunkId> {
        self.workers
            .get_mut(worker_id)
            .and_then(|e| e.in_flight.take())
            .map(|(chunk_id, _)| chunk_id)
    }

    /// `Alive` workers with no outstanding call.
    pub fn idle_workers(&self) -> BTreeSet<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, e)| e.liveness == Liveness::Alive && e.in_flight.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Removes `Dead` workers that no longer hold a chunk.
    pub fn prune_dead(&mut self) -> Vec<WorkerId> {
        let pruned: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, e)| e.liveness == Liveness::Dead && e.in_flight.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        for worker_id in &pruned {
            self.workers.remove(worker_id);
        }
        pruned
    }

    pub fn current_chunk(&self, worker_id: &WorkerId) -> Option<ChunkId> {
        self.workers
            .get(worker_id)
            .and_then(|e| e.in_flight)
            .map(|(chunk_id, _)| chunk_id)
    }

    pub fn address(&self, worker_id: &WorkerId) -> Option<&str> {
        self.workers.get(worker_id).map(|e| e.address.as_str())
    }

    pub fn liveness(&self, worker_id: &WorkerId) -> Option<Liveness> {
        self.workers.get(worker_id).map(|e| e.liveness)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
