use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use jobrelay_channel::{ChannelError, InMemoryChannel, InMemoryChannelConfig, JobChannel};
use jobrelay_core::Compute;
use jobrelay_infra::{
    InMemoryJobRecordStore, JobCoordinator, JobRecordStore, StoreError, WorkerPool, WorkerPoolConfig,
    WorkerPoolHandle, WorkerPoolStats,
};

use crate::config::{ApiConfig, BackendConfig};

pub type SharedStore = Arc<dyn JobRecordStore>;
pub type SharedChannel = Arc<dyn JobChannel>;
pub type SharedCoordinator = JobCoordinator<SharedStore, SharedChannel>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("failed to start worker threads: {0}")]
    Workers(#[from] io::Error),
}

/// Record store and channel shared by submitters and workers.
#[derive(Clone)]
pub struct Backend {
    pub store: SharedStore,
    pub channel: SharedChannel,
    pub persistent: bool,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        if self.persistent { "redis" } else { "in-memory" }
    }
}

/// Open the configured backend. Deliveries stay hidden from other
/// consumers for `visibility_timeout`; see
/// [`WorkerPoolConfig::visibility_timeout`].
///
/// Without the `redis` feature a persistent configuration falls back to the
/// in-process backend with a warning.
pub fn connect_backend(config: &BackendConfig, visibility_timeout: Duration) -> Result<Backend, ServicesError> {
    if config.persistent {
        #[cfg(feature = "redis")]
        {
            return connect_redis(config, visibility_timeout);
        }

        #[cfg(not(feature = "redis"))]
        {
            warn!("USE_PERSISTENT_STORES=true but built without `redis`; using in-memory backend");
        }
    }

    let store: SharedStore = InMemoryJobRecordStore::arc();
    let channel: SharedChannel = Arc::new(InMemoryChannel::with_config(InMemoryChannelConfig {
        visibility_timeout,
        ..InMemoryChannelConfig::default()
    }));
    Ok(Backend {
        store,
        channel,
        persistent: false,
    })
}

#[cfg(feature = "redis")]
fn connect_redis(config: &BackendConfig, visibility_timeout: Duration) -> Result<Backend, ServicesError> {
    use jobrelay_infra::store::{RedisJobRecordStore, RedisStoreConfig};
    use jobrelay_infra::transport::{RedisStreamsChannel, RedisStreamsConfig};

    let store = RedisJobRecordStore::new(RedisStoreConfig::new(&config.redis_url).with_ttl(config.result_ttl))?;
    let channel = RedisStreamsChannel::new(
        RedisStreamsConfig::new(&config.redis_url)
            .with_stream_key(&config.stream_key)
            .with_group(&config.group)
            .with_visibility_timeout(visibility_timeout),
    )?;

    info!(stream = %config.stream_key, group = %config.group, "connected to redis backend");

    Ok(Backend {
        store: Arc::new(store),
        channel: Arc::new(channel),
        persistent: true,
    })
}

/// Everything the HTTP handlers need.
pub struct AppServices {
    coordinator: SharedCoordinator,
    backend: &'static str,
    workers: Mutex<Option<WorkerPoolHandle>>,
    worker_count: usize,
    worker_stats: Option<Arc<Mutex<WorkerPoolStats>>>,
}

impl AppServices {
    /// Services over `backend` with no workers in this process.
    pub fn new(backend: Backend) -> Self {
        Self {
            coordinator: JobCoordinator::new(backend.store.clone(), backend.channel.clone()),
            backend: backend.name(),
            workers: Mutex::new(None),
            worker_count: 0,
            worker_stats: None,
        }
    }

    fn with_workers(mut self, handle: WorkerPoolHandle) -> Self {
        self.worker_count = handle.worker_count();
        self.worker_stats = Some(handle.stats_source());
        self.workers = Mutex::new(Some(handle));
        self
    }

    pub fn coordinator(&self) -> &SharedCoordinator {
        &self.coordinator
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Workers hosted by this process (0 when they run elsewhere).
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn worker_stats(&self) -> Option<WorkerPoolStats> {
        self.worker_stats
            .as_ref()
            .map(|stats| stats.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Stop the embedded worker pool, if any. Blocks until workers finish
    /// their current job.
    pub fn shutdown_workers(&self) {
        let handle = self.workers.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.shutdown();
            info!(stats = ?self.worker_stats(), "embedded workers stopped");
        }
    }
}

/// Wire the backend, the coordinator and, for the in-memory backend, an
/// embedded worker pool running `compute`.
pub fn build_services(config: &ApiConfig, compute: Arc<dyn Compute>) -> Result<AppServices, ServicesError> {
    let visibility_timeout = config
        .workers
        .as_ref()
        .map_or_else(|| WorkerPoolConfig::default().visibility_timeout(), WorkerPoolConfig::visibility_timeout);
    let backend = connect_backend(&config.backend, visibility_timeout)?;
    let services = AppServices::new(backend.clone());

    match (&config.workers, backend.persistent) {
        (Some(pool_config), false) => {
            let handle = WorkerPool::new(backend.store, backend.channel, compute).spawn(pool_config.clone())?;
            info!(workers = handle.worker_count(), "embedded worker pool started");
            Ok(services.with_workers(handle))
        }
        (None, false) => {
            warn!("in-memory backend without embedded workers; submitted jobs stay PENDING");
            Ok(services)
        }
        (_, true) => {
            info!("persistent backend; jobs are run by jobrelay-worker processes");
            Ok(services)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrelay_core::{FnCompute, JobArgs, JobState};
    use jobrelay_infra::PollOptions;
    use serde_json::json;

    fn config(lookup: &[(&str, &str)]) -> ApiConfig {
        let vars: Vec<(String, String)> = lookup.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ApiConfig::from_lookup(|var| vars.iter().find(|(k, _)| k == var).map(|(_, v)| v.clone())).unwrap()
    }

    fn echo() -> Arc<dyn Compute> {
        Arc::new(FnCompute::new(|args: &JobArgs| Ok(json!(args.len()))))
    }

    #[test]
    fn in_memory_backend_hosts_workers() {
        let services = build_services(&config(&[("WORKER_CONCURRENCY", "2")]), echo()).unwrap();
        assert_eq!(services.backend(), "in-memory");
        assert_eq!(services.worker_count(), 2);

        let id = services.coordinator().submit(JobArgs::new().with("a", "1")).unwrap();
        let outcome = services
            .coordinator()
            .poll_result(id, PollOptions::new(Duration::from_secs(5), Duration::from_millis(5)))
            .unwrap();
        assert_eq!(outcome.output(), Some(&json!(1)));

        services.shutdown_workers();
        assert_eq!(services.worker_stats().unwrap().succeeded, 1);
        // second call is a no-op
        services.shutdown_workers();
    }

    #[test]
    fn slow_compute_is_not_redelivered_while_running() {
        let compute: Arc<dyn Compute> = Arc::new(FnCompute::new(|_: &JobArgs| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(json!("slow"))
        }));
        let services = build_services(
            &config(&[("WORKER_CONCURRENCY", "2"), ("COMPUTE_TIMEOUT_MS", "1000")]),
            compute,
        )
        .unwrap();

        let id = services.coordinator().submit(JobArgs::new()).unwrap();
        services
            .coordinator()
            .poll_result(id, PollOptions::new(Duration::from_secs(5), Duration::from_millis(5)))
            .unwrap();

        services.shutdown_workers();
        let stats = services.worker_stats().unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.duplicates_skipped, 0);
    }

    #[test]
    fn zero_concurrency_leaves_jobs_pending() {
        let services = build_services(&config(&[("WORKER_CONCURRENCY", "0")]), echo()).unwrap();
        assert_eq!(services.worker_count(), 0);
        assert!(services.worker_stats().is_none());

        let id = services.coordinator().submit(JobArgs::new()).unwrap();
        assert_eq!(services.coordinator().status(id).unwrap(), JobState::Pending);
    }
}
