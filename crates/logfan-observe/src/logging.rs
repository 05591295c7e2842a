use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `LOGFAN_LOG` first, then `RUST_LOG`, then a default.
///
/// Log field contract for logfan daemons:
/// - Always include `worker_id` on worker-scoped events.
/// - Include `chunk_id` and `attempt` on any assignment/completion event.
/// - Chunk lifecycle events go to target `logfan_proof` with an `event` field
///   (`chunk_assigned`, `chunk_completed`, `chunk_requeued`, `chunk_exhausted`, `worker_dead`).
/// - Periodic counter snapshots go to target `logfan_metrics`, message `metrics`.
///
/// `LOGFAN_LOG=logfan_proof=info,warn` isolates the chunk lifecycle.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("LOGFAN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
