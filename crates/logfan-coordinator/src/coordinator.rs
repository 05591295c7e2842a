use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{info_span, Instrument};

use logfan_core::types::{ChunkId, MetricsRecord, WorkerId};
use logfan_observe::metrics::{Counter, DurationAgg, Gauge};
use logfan_wire::ChunkTask;

use crate::aggregator::{Aggregator, RecordOutcome};
use crate::error::RpcError;
use crate::registry::{HeartbeatAck, RegisterAck, WorkerRegistry};
use crate::rpc::WorkerRpc;
use crate::scheduler::{Assignment, ChunkState, FailureOutcome, Scheduler, SuccessOutcome};

const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Sent to workers verbatim; they read their byte ranges from it.
    pub file_path: PathBuf,
    pub tick_interval: Duration,
    pub heartbeat_interval: Duration,
    pub suspect_after: Duration,
    pub dead_after: Duration,
    pub chunk_timeout: Duration,
    pub suspect_on_rpc_failure: bool,
    pub metrics_snapshot_interval: Option<Duration>,
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.tick_interval.is_zero(), "tick interval must be > 0");
        anyhow::ensure!(
            !self.heartbeat_interval.is_zero(),
            "heartbeat interval must be > 0"
        );
        anyhow::ensure!(
            self.suspect_after < self.dead_after,
            "suspect threshold ({:?}) must be below dead threshold ({:?})",
            self.suspect_after,
            self.dead_after
        );
        anyhow::ensure!(!self.chunk_timeout.is_zero(), "chunk timeout must be > 0");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub register_total: Counter,
    pub heartbeat_total: Counter,
    pub heartbeat_unknown_total: Counter,
    pub dispatch_total: Counter,
    pub completed_total: Counter,
    pub duplicate_total: Counter,
    pub rpc_failure_total: Counter,
    pub timeout_total: Counter,
    pub requeued_total: Counter,
    pub exhausted_total: Counter,
    pub worker_dead_total: Counter,
    pub live_workers: Gauge,
    pub inflight_chunks: Gauge,
    pub dispatch_latency: DurationAgg,
}

pub enum Event {
    Register {
        worker_id: WorkerId,
        address: String,
        reply: oneshot::Sender<RegisterAck>,
    },
    Heartbeat {
        worker_id: WorkerId,
        reply: oneshot::Sender<HeartbeatAck>,
    },
    ChunkSucceeded {
        assignment: Assignment,
        metrics: MetricsRecord,
        elapsed: Duration,
    },
    ChunkFailed {
        assignment: Assignment,
        error: RpcError,
        elapsed: Duration,
    },
}

/// One chunk ready to go out over the RPC channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub assignment: Assignment,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub total: MetricsRecord,
    pub mean_latency_ms: Option<f64>,
    pub coverage: f64,
    pub chunk_count: usize,
    pub completed_chunks: usize,
    pub failed_chunks: Vec<ChunkId>,
}

/// Sender side of the loop's event queue, for the gRPC service.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Event>,
}

impl CoordinatorHandle {
    pub async fn register(&self, worker_id: WorkerId, address: String) -> Result<RegisterAck> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Event::Register {
                worker_id,
                address,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("coordinator loop has stopped"))?;
        Ok(rx.await?)
    }

    pub async fn heartbeat(&self, worker_id: WorkerId) -> Result<HeartbeatAck> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Event::Heartbeat { worker_id, reply })
            .await
            .map_err(|_| anyhow::anyhow!("coordinator loop has stopped"))?;
        Ok(rx.await?)
    }
}

/// Single owner of registry, scheduler and aggregator state for one job.
///
/// All mutation happens on the task that runs [`Coordinator::run`]; dispatches and
/// worker calls reach it as [`Event`]s.
pub struct Coordinator<R: WorkerRpc> {
    config: CoordinatorConfig,
    registry: WorkerRegistry,
    scheduler: Scheduler,
    aggregator: Aggregator,
    rpc: Arc<R>,
    metrics: Arc<CoordinatorMetrics>,
    tx: mpsc::Sender<Event>,
    rx: Option<mpsc::Receiver<Event>>,
}

impl<R: WorkerRpc> Coordinator<R> {
    pub fn new(config: CoordinatorConfig, scheduler: Scheduler, rpc: Arc<R>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let aggregator = Aggregator::new(scheduler.len());
        Self {
            config,
            registry: WorkerRegistry::new(),
            scheduler,
            aggregator,
            rpc,
            metrics: Arc::new(CoordinatorMetrics::default()),
            tx,
            rx: Some(rx),
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        self.metrics.clone()
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn is_done(&self) -> bool {
        self.scheduler.is_done()
    }

    pub fn register_worker(&mut self, worker_id: WorkerId, address: String, now: Instant) -> RegisterAck {
        self.metrics.register_total.inc();
        self.registry.register(worker_id, address, now)
    }

    pub fn heartbeat(&mut self, worker_id: &WorkerId, now: Instant) -> HeartbeatAck {
        self.metrics.heartbeat_total.inc();
        let ack = self.registry.heartbeat(worker_id, now);
        if ack == HeartbeatAck::NotRegistered {
            self.metrics.heartbeat_unknown_total.inc();
            tracing::info!(worker_id = %worker_id, "heartbeat from unregistered worker");
        }
        ack
    }

    /// Liveness sweep, reclaim of chunks held by dead workers, then an assignment pass.
    pub fn tick(&mut self, now: Instant) -> Vec<Dispatch> {
        self.reclaim_dead(now);
        self.assign_idle()
    }

    fn reclaim_dead(&mut self, now: Instant) {
        let newly_dead =
            self.registry
                .sweep(now, self.config.suspect_after, self.config.dead_after);
        for worker_id in newly_dead {
            self.metrics.worker_dead_total.inc();
            let held = self.scheduler.assigned_to(&worker_id);
            tracing::warn!(
                target: "logfan_proof",
                event = "worker_dead",
                worker_id = %worker_id,
                held_chunks = held.len() as u64,
                "worker marked dead"
            );
            for chunk_id in held {
                self.apply_failure(chunk_id, &worker_id);
            }
            // Its outstanding call, if any, can no longer block pruning.
            self.registry.clear_in_flight(&worker_id);
        }
        for worker_id in self.registry.prune_dead() {
            tracing::info!(worker_id = %worker_id, "dead worker pruned");
        }
    }

    /// Assigns pending chunks to idle live workers without waiting for a tick.
    ///
    /// A worker is idle only once the response to its last dispatch has come back,
    /// even if another attempt already settled that chunk.
    pub fn assign_idle(&mut self) -> Vec<Dispatch> {
        self.metrics
            .live_workers
            .set(self.registry.live_workers().len() as u64);
        let idle = self.registry.idle_workers();

        let mut out = Vec::new();
        for assignment in self.scheduler.next_assignment(&idle) {
            self.registry
                .assign(&assignment.worker_id, assignment.chunk_id, assignment.attempt);
            let address = self
                .registry
                .address(&assignment.worker_id)
                .unwrap_or_default()
                .to_string();
            tracing::info!(
                target: "logfan_proof",
                event = "chunk_assigned",
                chunk_id = assignment.chunk_id.0,
                worker_id = %assignment.worker_id,
                attempt = assignment.attempt,
                start = assignment.range.start,
                size = assignment.range.size,
                "chunk assigned"
            );
            out.push(Dispatch {
                assignment,
                address,
            });
        }
        self.metrics
            .inflight_chunks
            .set(self.scheduler.count(ChunkState::Assigned) as u64);
        out
    }

    /// Applies one event. Register/heartbeat replies are sent from here.
    pub fn apply(&mut self, event: Event, now: Instant) {
        match event {
            Event::Register {
                worker_id,
                address,
                reply,
            } => {
                let ack = self.register_worker(worker_id, address, now);
                let _ = reply.send(ack);
            }
            Event::Heartbeat { worker_id, reply } => {
                let ack = self.heartbeat(&worker_id, now);
                let _ = reply.send(ack);
            }
            Event::ChunkSucceeded {
                assignment,
                metrics,
                elapsed,
            } => {
                self.metrics.dispatch_latency.record(elapsed);
                self.on_chunk_success(&assignment, metrics);
            }
            Event::ChunkFailed {
                assignment,
                error,
                elapsed,
            } => {
                self.metrics.dispatch_latency.record(elapsed);
                self.on_chunk_failure(&assignment, &error);
            }
        }
    }

    fn on_chunk_success(&mut self, assignment: &Assignment, metrics: MetricsRecord) {
        self.registry
            .release(&assignment.worker_id, assignment.chunk_id, assignment.attempt);
        match self.scheduler.on_success(assignment.chunk_id) {
            Ok(SuccessOutcome::Ack) => match self.aggregator.record(assignment.chunk_id, metrics) {
                RecordOutcome::Ack => {
                    self.metrics.completed_total.inc();
                    tracing::info!(
                        target: "logfan_proof",
                        event = "chunk_completed",
                        chunk_id = assignment.chunk_id.0,
                        worker_id = %assignment.worker_id,
                        attempt = assignment.attempt,
                        error_count = metrics.error_count,
                        request_count = metrics.request_count,
                        "chunk completed"
                    );
                }
                RecordOutcome::DuplicateIgnored => {
                    self.metrics.duplicate_total.inc();
                    tracing::warn!(
                        chunk_id = assignment.chunk_id.0,
                        "aggregate already holds chunk; result ignored"
                    );
                }
            },
            Ok(SuccessOutcome::AlreadyTerminal) => {
                self.metrics.duplicate_total.inc();
                tracing::debug!(
                    chunk_id = assignment.chunk_id.0,
                    worker_id = %assignment.worker_id,
                    attempt = assignment.attempt,
                    "duplicate completion ignored"
                );
            }
            Err(err) => {
                tracing::warn!(worker_id = %assignment.worker_id, error = %err, "completion rejected");
            }
        }
    }

    fn on_chunk_failure(&mut self, assignment: &Assignment, error: &RpcError) {
        self.metrics.rpc_failure_total.inc();
        if matches!(error, RpcError::Timeout(_)) {
            self.metrics.timeout_total.inc();
        }
        self.registry
            .release(&assignment.worker_id, assignment.chunk_id, assignment.attempt);
        tracing::warn!(
            chunk_id = assignment.chunk_id.0,
            worker_id = %assignment.worker_id,
            attempt = assignment.attempt,
            error = %error,
            "chunk dispatch failed"
        );

        if self.config.suspect_on_rpc_failure && self.registry.mark_suspect(&assignment.worker_id) {
            tracing::info!(worker_id = %assignment.worker_id, "worker suspect after rpc failure");
        }

        if !self.scheduler.is_current_attempt(assignment) {
            tracing::debug!(
                chunk_id = assignment.chunk_id.0,
                attempt = assignment.attempt,
                "stale failure ignored"
            );
            return;
        }
        self.apply_failure(assignment.chunk_id, &assignment.worker_id);
    }

    fn apply_failure(&mut self, chunk_id: ChunkId, worker_id: &WorkerId) {
        match self.scheduler.on_failure(chunk_id) {
            Ok(FailureOutcome::Requeued) => {
                self.metrics.requeued_total.inc();
                tracing::info!(
                    target: "logfan_proof",
                    event = "chunk_requeued",
                    chunk_id = chunk_id.0,
                    worker_id = %worker_id,
                    "chunk requeued"
                );
            }
            Ok(FailureOutcome::Exhausted) => {
                self.metrics.exhausted_total.inc();
                tracing::warn!(
                    target: "logfan_proof",
                    event = "chunk_exhausted",
                    chunk_id = chunk_id.0,
                    worker_id = %worker_id,
                    "chunk failed permanently; job continues with partial coverage"
                );
            }
            Ok(FailureOutcome::Ignored) => {}
            Err(err) => tracing::warn!(error = %err, "failure for unknown chunk"),
        }
    }

    /// Spawns one task per dispatch. Each task reports back exactly one event.
    pub fn dispatch(&self, dispatches: Vec<Dispatch>) {
        for Dispatch {
            assignment,
            address,
        } in dispatches
        {
            self.metrics.dispatch_total.inc();
            let rpc = self.rpc.clone();
            let tx = self.tx.clone();
            let timeout = self.config.chunk_timeout;
            let task = ChunkTask {
                chunk_id: assignment.chunk_id,
                attempt: assignment.attempt,
                file_path: self.config.file_path.clone(),
                range: assignment.range,
            };
            let span = info_span!(
                "dispatch",
                chunk_id = assignment.chunk_id.0,
                worker_id = %assignment.worker_id,
                attempt = assignment.attempt
            );
            tokio::spawn(
                async move {
                    let started = Instant::now();
                    let outcome = tokio::time::timeout(timeout, rpc.assign_chunk(&address, task)).await;
                    let elapsed = started.elapsed();
                    let event = match outcome {
                        Ok(Ok(metrics)) => Event::ChunkSucceeded {
                            assignment,
                            metrics,
                            elapsed,
                        },
                        Ok(Err(error)) => Event::ChunkFailed {
                            assignment,
                            error,
                            elapsed,
                        },
                        Err(_) => Event::ChunkFailed {
                            assignment,
                            error: RpcError::Timeout(timeout),
                            elapsed,
                        },
                    };
                    // A closed queue means the job already finished.
                    let _ = tx.send(event).await;
                }
                .instrument(span),
            );
        }
    }

    pub fn report(&self) -> JobReport {
        let total = self.aggregator.total();
        JobReport {
            total,
            mean_latency_ms: total.mean_latency_ms(),
            coverage: self.aggregator.coverage(),
            chunk_count: self.scheduler.len(),
            completed_chunks: self.aggregator.len(),
            failed_chunks: self.scheduler.failed_chunks(),
        }
    }

    pub fn emit_metrics_snapshot(&self) {
        let latency = self.metrics.dispatch_latency.snapshot();
        tracing::info!(
            target: "logfan_metrics",
            register_total = self.metrics.register_total.get(),
            heartbeat_total = self.metrics.heartbeat_total.get(),
            heartbeat_unknown_total = self.metrics.heartbeat_unknown_total.get(),
            dispatch_total = self.metrics.dispatch_total.get(),
            completed_total = self.metrics.completed_total.get(),
            duplicate_total = self.metrics.duplicate_total.get(),
            rpc_failure_total = self.metrics.rpc_failure_total.get(),
            timeout_total = self.metrics.timeout_total.get(),
            requeued_total = self.metrics.requeued_total.get(),
            exhausted_total = self.metrics.exhausted_total.get(),
            worker_dead_total = self.metrics.worker_dead_total.get(),
            live_workers = self.metrics.live_workers.get(),
            inflight_chunks = self.metrics.inflight_chunks.get(),
            dispatch_avg_ms = latency.avg_ms(),
            dispatch_max_ms = latency.max_ms(),
            coverage = self.aggregator.coverage(),
            "metrics"
        );
    }

    /// Drives the job until every chunk is `Completed` or `Failed`.
    pub async fn run(mut self) -> Result<JobReport> {
        let Some(mut rx) = self.rx.take() else {
            anyhow::bail!("coordinator loop already started");
        };
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_snapshot = Instant::now();

        tracing::info!(
            chunks = self.scheduler.len() as u64,
            file_path = %self.config.file_path.display(),
            "coordination loop started"
        );

        while !self.scheduler.is_done() {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dispatches = self.tick(now);
                    self.dispatch(dispatches);
                    if let Some(every) = self.config.metrics_snapshot_interval {
                        if now.duration_since(last_snapshot) >= every {
                            self.emit_metrics_snapshot();
                            last_snapshot = now;
                        }
                    }
                }
                Some(event) = rx.recv() => {
                    let completion = matches!(
                        event,
                        Event::ChunkSucceeded { .. } | Event::ChunkFailed { .. }
                    );
                    self.apply(event, Instant::now());
                    if completion && !self.scheduler.is_done() {
                        let dispatches = self.assign_idle();
                        self.dispatch(dispatches);
                    }
                }
            }
        }

        let report = self.report();
        if report.failed_chunks.is_empty() {
            tracing::info!(coverage = report.coverage, "job complete");
        } else {
            tracing::warn!(
                coverage = report.coverage,
                failed_chunks = report.failed_chunks.len() as u64,
                "job complete with partial coverage"
            );
        }
        if self.config.metrics_snapshot_interval.is_some() {
            self.emit_metrics_snapshot();
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl WorkerRpc for NeverCalled {
        async fn assign_chunk(&self, _: &str, _: ChunkTask) -> Result<MetricsRecord, RpcError> {
            Err(RpcError::Transport("unused".to_string()))
        }
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            file_path: PathBuf::from("/tmp/app.log"),
            tick_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_secs(1),
            suspect_after: Duration::from_secs(3),
            dead_after: Duration::from_secs(10),
            chunk_timeout: Duration::from_secs(5),
            suspect_on_rpc_failure: true,
            metrics_snapshot_interval: None,
        }
    }

    fn wid(s: &str) -> WorkerId {
        WorkerId(s.to_string())
    }

    #[test]
    fn config_rejects_inverted_thresholds() {
        let mut cfg = config();
        cfg.suspect_after = Duration::from_secs(20);
        assert!(cfg.validate().is_err());
        assert!(config().validate().is_ok());
    }

    #[test]
    fn rpc_failure_marks_worker_suspect_and_requeues() {
        let t0 = Instant::now();
        let scheduler = Scheduler::for_file(512, 256, None).unwrap();
        let mut coord = Coordinator::new(config(), scheduler, Arc::new(NeverCalled));
        coord.register_worker(wid("w1"), "http://w1".into(), t0);
        coord.register_worker(wid("w2"), "http://w2".into(), t0);

        let dispatches = coord.tick(t0);
        assert_eq!(dispatches.len(), 2);
        assert_eq!(dispatches[0].address, "http://w1");

        coord.apply(
            Event::ChunkFailed {
                assignment: dispatches[0].assignment.clone(),
                error: RpcError::Transport("connection refused".into()),
                elapsed: Duration::ZERO,
            },
            t0,
        );
        assert_eq!(
            coord.scheduler().chunk(ChunkId(0)).unwrap().state,
            ChunkState::Pending
        );
        assert!(!coord.registry().live_workers().contains(&wid("w1")));
        assert_eq!(coord.registry().current_chunk(&wid("w1")), None);

        // w1 is suspect and w2 busy, so nothing moves until one of them frees up.
        assert!(coord.assign_idle().is_empty());
        coord.heartbeat(&wid("w1"), t0);
        let retry = coord.assign_idle();
        assert_eq!(retry[0].assignment.chunk_id, ChunkId(0));
        assert_eq!(retry[0].assignment.attempt, 2);
    }

    #[test]
    fn stale_failure_does_not_requeue_new_attempt() {
        let t0 = Instant::now();
        let scheduler = Scheduler::for_file(256, 256, None).unwrap();
        let mut cfg = config();
        cfg.suspect_on_rpc_failure = false;
        let mut coord = Coordinator::new(cfg, scheduler, Arc::new(NeverCalled));
        coord.register_worker(wid("w1"), "a".into(), t0);
        coord.register_worker(wid("w2"), "b".into(), t0);

        let first = coord.tick(t0).remove(0).assignment;
        coord.apply(
            Event::ChunkFailed {
                assignment: first.clone(),
                error: RpcError::Timeout(Duration::from_secs(5)),
                elapsed: Duration::from_secs(5),
            },
            t0,
        );
        let second = coord.assign_idle().remove(0).assignment;
        assert_eq!(second.worker_id, wid("w2"));

        // A second failure report for the first attempt arrives late.
        coord.apply(
            Event::ChunkFailed {
                assignment: first,
                error: RpcError::Transport("reset".into()),
                elapsed: Duration::ZERO,
            },
            t0,
        );
        assert!(coord.scheduler().is_current_attempt(&second));
        assert_eq!(coord.metrics().timeout_total.get(), 1);
    }

    #[test]
    fn stale_failure_keeps_the_retry_in_flight() {
        let t0 = Instant::now();
        let scheduler = Scheduler::for_file(256, 256, None).unwrap();
        let mut cfg = config();
        cfg.suspect_on_rpc_failure = false;
        let mut coord = Coordinator::new(cfg, scheduler, Arc::new(NeverCalled));
        coord.register_worker(wid("w1"), "a".into(), t0);

        let first = coord.tick(t0).remove(0).assignment;
        let failed = |assignment: Assignment| Event::ChunkFailed {
            assignment,
            error: RpcError::Transport("reset".into()),
            elapsed: Duration::ZERO,
        };
        coord.apply(failed(first.clone()), t0);
        // The only worker left takes the retry.
        let second = coord.assign_idle().remove(0).assignment;
        assert_eq!(second.worker_id, wid("w1"));
        assert_eq!(second.attempt, 2);

        // Duplicate report for attempt 1.
        coord.apply(failed(first), t0);
        assert_eq!(coord.registry().current_chunk(&wid("w1")), Some(ChunkId(0)));
        assert!(coord.scheduler().is_current_attempt(&second));
        assert!(coord.assign_idle().is_empty());
    }

    #[tokio::test]
    async fn handle_round_trips_through_loop() {
        let scheduler = Scheduler::for_file(256, 256, None).unwrap();
        let coord = Coordinator::new(config(), scheduler, Arc::new(NeverCalled));
        let handle = coord.handle();
        let loop_task = tokio::spawn(coord.run());

        assert_eq!(
            handle.heartbeat(wid("w1")).await.unwrap(),
            HeartbeatAck::NotRegistered
        );
        assert_eq!(
            handle.register(wid("w1"), "http://w1".into()).await.unwrap(),
            RegisterAck::Registered
        );
        assert_eq!(handle.heartbeat(wid("w1")).await.unwrap(), HeartbeatAck::Ack);
        loop_task.abort();
    }
}
