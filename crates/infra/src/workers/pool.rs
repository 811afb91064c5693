//! Worker pool: threads pulling jobs off a channel and running them.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use jobrelay_channel::{ChannelError, Delivery, JobChannel};
use jobrelay_core::{ClaimDecision, Compute, JobRecord, JobState, Outcome, TransitionError};

use super::guard::run_compute;
use crate::store::{JobRecordStore, StoreError};

/// Failure reason recorded for jobs that keep coming back.
pub const POISON_REASON: &str = "exceeded maximum attempts";

/// Extra time a delivery stays hidden past the compute timeout.
const VISIBILITY_MARGIN: Duration = Duration::from_secs(5);

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Prefix for worker thread and consumer names
    pub name: String,
    /// Number of worker threads
    pub concurrency: usize,
    /// How long one dequeue waits before re-checking for shutdown
    pub dequeue_wait: Duration,
    /// Wall-clock limit per compute call (`None` = unbounded)
    pub compute_timeout: Option<Duration>,
    /// Age after which another worker's STARTED claim is taken over
    pub stale_after: Duration,
    /// Claims after which a job whose claim went stale again is failed as
    /// poison instead of re-run
    pub max_attempts: u32,
    /// Pause after a channel error
    pub error_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "jobrelay-worker".to_string(),
            concurrency: 4,
            dequeue_wait: Duration::from_millis(250),
            compute_timeout: Some(Duration::from_secs(300)),
            stale_after: Duration::from_secs(600),
            max_attempts: 5,
            error_backoff: Duration::from_millis(100),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dequeue_wait(mut self, wait: Duration) -> Self {
        self.dequeue_wait = wait;
        self
    }

    pub fn with_compute_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.compute_timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// How long a delivery must stay hidden from other workers while one of
    /// ours is computing it: past the compute timeout, or until the claim
    /// goes stale when compute is unbounded.
    pub fn visibility_timeout(&self) -> Duration {
        match self.compute_timeout {
            Some(limit) => limit.saturating_add(VISIBILITY_MARGIN),
            None => self.stale_after,
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// This worker ran the job and recorded its outcome.
    Completed {
        state: JobState,
        attempt: u32,
        reclaimed: bool,
    },
    /// Duplicate delivery of a finished job.
    SkippedTerminal(JobState),
    /// Another worker holds a live claim.
    SkippedInFlight,
    /// No record for the job (evicted, or the submission was rolled back).
    Dropped,
    /// Claimed too many times by workers that never finished; failed
    /// without running.
    Poisoned,
    /// The store could not be reached; try again later.
    Deferred,
    /// Our claim was taken over while computing; the result was discarded.
    Superseded,
}

/// How a delivery is settled with the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Release,
}

impl Processed {
    pub fn settlement(&self) -> Settlement {
        match self {
            Processed::SkippedInFlight | Processed::Deferred => Settlement::Release,
            _ => Settlement::Ack,
        }
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerPoolStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub duplicates_skipped: u64,
    pub reclaimed: u64,
    pub released: u64,
    pub poisoned: u64,
    pub dropped: u64,
}

impl WorkerPoolStats {
    fn record(&mut self, processed: &Processed) {
        self.processed += 1;
        match processed {
            Processed::Completed { state, reclaimed, .. } => {
                match state {
                    JobState::Success => self.succeeded += 1,
                    _ => self.failed += 1,
                }
                if *reclaimed {
                    self.reclaimed += 1;
                }
            }
            Processed::SkippedTerminal(_) | Processed::SkippedInFlight => self.duplicates_skipped += 1,
            Processed::Poisoned => self.poisoned += 1,
            Processed::Dropped => self.dropped += 1,
            Processed::Deferred | Processed::Superseded => {}
        }
        if processed.settlement() == Settlement::Release {
            self.released += 1;
        }
    }
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerPoolStats>>,
}

impl WorkerPoolHandle {
    /// Stop every worker after its current job and wait for the threads.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> WorkerPoolStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Shared view of the counters, for reporting after the handle moves.
    pub fn stats_source(&self) -> Arc<Mutex<WorkerPoolStats>> {
        self.stats.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.joins.len()
    }
}

/// Pulls jobs from a channel, runs them through an injected [`Compute`] and
/// records the outcome in the store.
///
/// Deliveries are at-least-once, so every step is checked against the stored
/// record:
/// - terminal record: skip and ack
/// - live STARTED claim held elsewhere: release for later
/// - stale STARTED claim: take it over and re-run
/// - no record: ack and drop
/// - completion only lands if our claim (attempt) is still current
pub struct WorkerPool<S, C> {
    store: S,
    channel: C,
    compute: Arc<dyn Compute>,
}

impl<S, C> WorkerPool<S, C>
where
    S: JobRecordStore + 'static,
    C: JobChannel + 'static,
{
    pub fn new(store: S, channel: C, compute: Arc<dyn Compute>) -> Self {
        Self {
            store,
            channel,
            compute,
        }
    }

    /// Start `config.concurrency` worker threads.
    pub fn spawn(self, config: WorkerPoolConfig) -> io::Result<WorkerPoolHandle> {
        let pool = Arc::new(self);
        let config = Arc::new(config);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(WorkerPoolStats::default()));
        let mut joins = Vec::with_capacity(config.concurrency);

        for index in 0..config.concurrency.max(1) {
            let worker = format!("{}-{index}", config.name);
            let pool = pool.clone();
            let config = config.clone();
            let shutdown_flag = shutdown.clone();
            let stats = stats.clone();

            let spawned = thread::Builder::new()
                .name(worker.clone())
                .spawn(move || worker_loop(&*pool, &worker, &config, &shutdown_flag, &stats));

            match spawned {
                Ok(join) => joins.push(join),
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    for join in joins {
                        let _ = join.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(pool = %config.name, workers = joins.len(), "worker pool started");

        Ok(WorkerPoolHandle {
            shutdown,
            joins,
            stats,
        })
    }

    /// Dequeue one delivery (waiting up to `config.dequeue_wait`), process
    /// it and settle it with the channel.
    pub fn process_next(
        &self,
        worker: &str,
        config: &WorkerPoolConfig,
    ) -> Result<Option<Processed>, ChannelError> {
        let Some(delivery) = self.channel.dequeue(worker, config.dequeue_wait)? else {
            return Ok(None);
        };

        let processed = self.process(worker, &delivery, config);
        self.settle(worker, &delivery, &processed);
        Ok(Some(processed))
    }

    /// Decide and run one delivery against the store. Does not ack or
    /// release; see [`Processed::settlement`].
    pub fn process(&self, worker: &str, delivery: &Delivery, config: &WorkerPoolConfig) -> Processed {
        let id = delivery.job_id();

        // Poison is counted in claims, not deliveries: releases of a live
        // claim raise the delivery count without anyone running the job.
        let mut step = None;
        let claimed = self.store.update(id, &mut |record: &mut JobRecord| {
            let now = Utc::now();
            let needs_claim = !record.is_terminal() && !record.has_live_claim(now, config.stale_after);
            step = Some(if needs_claim && record.attempt >= config.max_attempts {
                record.abandon(POISON_REASON, now);
                Step::Poisoned
            } else {
                Step::Claim(record.claim(worker, now, config.stale_after))
            });
            Ok(())
        });

        let step = match (claimed, step) {
            (Ok(_), Some(step)) => step,
            (Ok(_), None) => return Processed::Deferred,
            (Err(StoreError::NotFound(_)), _) => {
                warn!(worker, job_id = %id, "no record for delivered job; dropping");
                return Processed::Dropped;
            }
            (Err(e), _) => {
                error!(worker, job_id = %id, error = %e, "claim failed; deferring");
                return Processed::Deferred;
            }
        };

        match step {
            Step::Poisoned => {
                warn!(
                    worker,
                    job_id = %id,
                    max_attempts = config.max_attempts,
                    "job exceeded maximum attempts; failed"
                );
                Processed::Poisoned
            }
            Step::Claim(ClaimDecision::Finished(state)) => {
                debug!(worker, job_id = %id, %state, "duplicate delivery of finished job");
                Processed::SkippedTerminal(state)
            }
            Step::Claim(ClaimDecision::InFlight { worker: holder }) => {
                debug!(worker, job_id = %id, holder = ?holder, "job is running elsewhere");
                Processed::SkippedInFlight
            }
            Step::Claim(ClaimDecision::Run { attempt, reclaimed }) => {
                if reclaimed {
                    info!(worker, job_id = %id, attempt, "took over stale claim");
                }
                self.run(worker, delivery, attempt, reclaimed, config)
            }
        }
    }

    fn run(
        &self,
        worker: &str,
        delivery: &Delivery,
        attempt: u32,
        reclaimed: bool,
        config: &WorkerPoolConfig,
    ) -> Processed {
        let id = delivery.job_id();
        let outcome = Outcome::from(run_compute(
            &self.compute,
            &delivery.message.args,
            config.compute_timeout,
        ));

        if let Some(reason) = outcome.failure_reason() {
            warn!(worker, job_id = %id, attempt, reason, "job failed");
        }

        let completed = self.store.update(id, &mut |record: &mut JobRecord| {
            record.complete(attempt, outcome.clone(), Utc::now())
        });

        match completed {
            Ok(record) => {
                debug!(worker, job_id = %id, attempt, state = %record.state, "job completed");
                Processed::Completed {
                    state: record.state,
                    attempt,
                    reclaimed,
                }
            }
            Err(StoreError::Rejected(
                e @ (TransitionError::StaleAttempt { .. } | TransitionError::AlreadyTerminal { .. }),
            )) => {
                info!(worker, job_id = %id, attempt, reason = %e, "claim superseded; result discarded");
                Processed::Superseded
            }
            Err(StoreError::NotFound(_)) => {
                warn!(worker, job_id = %id, "record vanished while computing; dropping");
                Processed::Dropped
            }
            Err(e @ StoreError::Rejected(_)) => {
                error!(worker, job_id = %id, attempt, error = %e, "completion rejected");
                Processed::Superseded
            }
            Err(e) => {
                error!(worker, job_id = %id, attempt, error = %e, "could not record outcome; deferring");
                Processed::Deferred
            }
        }
    }

    fn settle(&self, worker: &str, delivery: &Delivery, processed: &Processed) {
        let settled = match processed.settlement() {
            Settlement::Ack => self.channel.ack(delivery),
            Settlement::Release => self.channel.release(delivery),
        };

        // An unsettled delivery comes back after the visibility timeout and
        // is resolved against the record then.
        if let Err(e) = settled {
            warn!(worker, job_id = %delivery.job_id(), error = %e, "could not settle delivery");
        }
    }
}

enum Step {
    Claim(ClaimDecision),
    Poisoned,
}

fn worker_loop<S, C>(
    pool: &WorkerPool<S, C>,
    worker: &str,
    config: &WorkerPoolConfig,
    shutdown: &AtomicBool,
    stats: &Mutex<WorkerPoolStats>,
) where
    S: JobRecordStore + 'static,
    C: JobChannel + 'static,
{
    info!(worker, "worker started");

    while !shutdown.load(Ordering::Acquire) {
        match pool.process_next(worker, config) {
            Ok(Some(processed)) => {
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&processed);
            }
            Ok(None) => continue,
            Err(ChannelError::Closed) => {
                info!(worker, "channel closed");
                break;
            }
            Err(e) => {
                error!(worker, error = %e, "dequeue failed");
                thread::sleep(config.error_backoff);
            }
        }
    }

    info!(worker, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use jobrelay_channel::{DeliveryTag, InMemoryChannel, InMemoryChannelConfig, JobMessage};
    use jobrelay_core::{ComputeError, FnCompute, JobArgs, JobId};
    use proptest::prelude::*;
    use serde_json::{Value as JsonValue, json};

    use crate::coordinator::{JobCoordinator, PollOptions};
    use crate::store::InMemoryJobRecordStore;

    type Store = Arc<InMemoryJobRecordStore>;
    type Channel = Arc<InMemoryChannel>;

    struct Fixture {
        store: Store,
        channel: Channel,
        coordinator: JobCoordinator<Store, Channel>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_channel(InMemoryChannelConfig {
                redelivery_delay: Duration::from_millis(10),
                ..InMemoryChannelConfig::default()
            })
        }

        fn with_channel(channel_config: InMemoryChannelConfig) -> Self {
            let store = InMemoryJobRecordStore::arc();
            let channel = Arc::new(InMemoryChannel::with_config(channel_config));
            Self {
                coordinator: JobCoordinator::new(store.clone(), channel.clone()),
                store,
                channel,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn pool<F>(&self, f: F) -> WorkerPool<Store, Channel>
        where
            F: Fn(&JobArgs) -> Result<JsonValue, ComputeError> + Send + Sync + 'static,
        {
            let calls = self.calls.clone();
            let compute = FnCompute::new(move |args: &JobArgs| {
                calls.fetch_add(1, Ordering::SeqCst);
                f(args)
            });
            WorkerPool::new(self.store.clone(), self.channel.clone(), Arc::new(compute))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn args() -> JobArgs {
        JobArgs::new().with("item_a", "Bread").with("item_b", "Acme")
    }

    fn echo(args: &JobArgs) -> Result<JsonValue, ComputeError> {
        Ok(json!({ "product": args.get("item_a") }))
    }

    fn config() -> WorkerPoolConfig {
        WorkerPoolConfig::default()
            .with_dequeue_wait(Duration::from_millis(20))
            .with_compute_timeout(Some(Duration::from_secs(5)))
    }

    fn failure_reason(fx: &Fixture, id: JobId) -> String {
        fx.coordinator
            .result(id)
            .unwrap()
            .failure_reason()
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn successful_job_is_recorded_and_acked() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();

        let processed = pool.process_next("w-0", &config()).unwrap().unwrap();
        assert_eq!(
            processed,
            Processed::Completed {
                state: JobState::Success,
                attempt: 1,
                reclaimed: false
            }
        );

        let record = fx.coordinator.record(id).unwrap();
        assert_eq!(record.state, JobState::Success);
        assert_eq!(record.worker.as_deref(), Some("w-0"));
        assert_eq!(fx.coordinator.result(id).unwrap(), Outcome::success(json!({ "product": "Bread" })));
        assert_eq!(fx.channel.ready_len() + fx.channel.in_flight_len(), 0);
    }

    #[test]
    fn empty_channel_yields_nothing() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        assert_eq!(pool.process_next("w-0", &config()).unwrap(), None);
    }

    #[test]
    fn compute_error_becomes_failure() {
        let fx = Fixture::new();
        let pool = fx.pool(|_| Err(ComputeError::failed("model exploded")));
        let id = fx.coordinator.submit(args()).unwrap();

        let processed = pool.process_next("w-0", &config()).unwrap().unwrap();
        assert!(matches!(processed, Processed::Completed { state: JobState::Failure, .. }));
        assert_eq!(failure_reason(&fx, id), "compute failed: model exploded");
    }

    #[test]
    fn panicking_compute_becomes_failure() {
        let fx = Fixture::new();
        let pool = fx.pool(|_| panic!("tensor shape mismatch"));
        let id = fx.coordinator.submit(args()).unwrap();

        pool.process_next("w-0", &config()).unwrap();
        assert_eq!(fx.coordinator.status(id).unwrap(), JobState::Failure);
        assert!(failure_reason(&fx, id).contains("tensor shape mismatch"));
    }

    #[test]
    fn hung_compute_times_out() {
        let fx = Fixture::new();
        let pool = fx.pool(|_| {
            thread::sleep(Duration::from_millis(500));
            Ok(json!("late"))
        });
        let id = fx.coordinator.submit(args()).unwrap();
        let config = config().with_compute_timeout(Some(Duration::from_millis(20)));

        pool.process_next("w-0", &config).unwrap();
        assert_eq!(fx.coordinator.status(id).unwrap(), JobState::Failure);
        assert!(failure_reason(&fx, id).contains("timed out"));
    }

    #[test]
    fn duplicate_delivery_of_finished_job_is_skipped() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();
        pool.process_next("w-0", &config()).unwrap();

        fx.channel.enqueue(JobMessage::new(id, args())).unwrap();
        let processed = pool.process_next("w-1", &config()).unwrap().unwrap();

        assert_eq!(processed, Processed::SkippedTerminal(JobState::Success));
        assert_eq!(fx.calls(), 1);
        assert_eq!(fx.channel.in_flight_len(), 0);
    }

    #[test]
    fn live_claim_elsewhere_is_released() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();
        fx.store
            .update(id, &mut |r: &mut JobRecord| {
                r.claim("other", Utc::now(), Duration::from_secs(600));
                Ok(())
            })
            .unwrap();

        let processed = pool.process_next("w-0", &config()).unwrap().unwrap();
        assert_eq!(processed, Processed::SkippedInFlight);
        assert_eq!(processed.settlement(), Settlement::Release);
        assert_eq!(fx.calls(), 0);
        assert_eq!(fx.coordinator.record(id).unwrap().worker.as_deref(), Some("other"));

        // Released, not acked: it comes back.
        thread::sleep(Duration::from_millis(30));
        let again = pool.process_next("w-0", &config()).unwrap().unwrap();
        assert_eq!(again, Processed::SkippedInFlight);
    }

    #[test]
    fn stale_claim_is_taken_over() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();
        let long_ago = Utc::now() - chrono::Duration::seconds(3600);
        fx.store
            .update(id, &mut |r: &mut JobRecord| {
                r.claim("crashed", long_ago, Duration::from_secs(600));
                Ok(())
            })
            .unwrap();

        let processed = pool.process_next("w-0", &config()).unwrap().unwrap();
        assert_eq!(
            processed,
            Processed::Completed {
                state: JobState::Success,
                attempt: 2,
                reclaimed: true
            }
        );
        assert_eq!(fx.coordinator.record(id).unwrap().worker.as_deref(), Some("w-0"));
    }

    #[test]
    fn missing_record_is_dropped() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        fx.channel.enqueue(JobMessage::new(JobId::new(), args())).unwrap();

        assert_eq!(pool.process_next("w-0", &config()).unwrap(), Some(Processed::Dropped));
        assert_eq!(fx.calls(), 0);
        assert_eq!(fx.channel.in_flight_len(), 0);
    }

    fn delivery(id: JobId, delivery_count: u32) -> Delivery {
        Delivery {
            message: JobMessage::new(id, args()),
            tag: DeliveryTag::new("test-1"),
            delivery_count,
        }
    }

    /// Claim `id` for "crashed" `claims` times, each claim long stale.
    fn crash_repeatedly(fx: &Fixture, id: JobId, claims: i64) {
        for hours_ago in (1..=claims).rev() {
            let at = Utc::now() - chrono::Duration::hours(hours_ago);
            fx.store
                .update(id, &mut |r: &mut JobRecord| {
                    r.claim("crashed", at, Duration::from_secs(600));
                    Ok(())
                })
                .unwrap();
        }
    }

    #[test]
    fn poison_job_is_failed_without_running() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();
        crash_repeatedly(&fx, id, 3);
        assert_eq!(fx.coordinator.record(id).unwrap().attempt, 3);

        let processed = pool.process("w-0", &delivery(id, 1), &config().with_max_attempts(3));
        assert_eq!(processed, Processed::Poisoned);
        assert_eq!(fx.calls(), 0);
        assert_eq!(fx.coordinator.status(id).unwrap(), JobState::Failure);
        assert_eq!(failure_reason(&fx, id), POISON_REASON);
    }

    #[test]
    fn many_deliveries_alone_never_poison() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();

        let processed = pool.process("w-0", &delivery(id, 500), &config().with_max_attempts(1));
        assert!(matches!(processed, Processed::Completed { state: JobState::Success, attempt: 1, .. }));
    }

    #[test]
    fn stale_claim_is_rerun_after_many_deliveries() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();
        crash_repeatedly(&fx, id, 1);

        let processed = pool.process("w-0", &delivery(id, 50), &config());
        assert_eq!(
            processed,
            Processed::Completed {
                state: JobState::Success,
                attempt: 2,
                reclaimed: true
            }
        );
        assert_eq!(fx.calls(), 1);
    }

    #[test]
    fn crashed_worker_job_is_recovered_by_redelivery() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();
        fx.store
            .update(id, &mut |r: &mut JobRecord| {
                r.claim("crashed", Utc::now(), Duration::from_secs(600));
                Ok(())
            })
            .unwrap();

        // The message bounces off the live claim until the claim goes stale.
        let config = config().with_stale_after(Duration::from_millis(300));
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut deliveries = 0;
        let last = loop {
            assert!(std::time::Instant::now() < deadline, "job never recovered");
            match pool.process_next("survivor", &config).unwrap() {
                Some(Processed::SkippedInFlight) => deliveries += 1,
                Some(other) => break other,
                None => {}
            }
        };

        assert!(deliveries > 0);
        assert_eq!(
            last,
            Processed::Completed {
                state: JobState::Success,
                attempt: 2,
                reclaimed: true
            }
        );
        assert!(fx.coordinator.result(id).unwrap().is_success());
    }

    #[test]
    fn live_claim_is_never_poisoned() {
        let fx = Fixture::new();
        let pool = fx.pool(echo);
        let id = fx.coordinator.submit(args()).unwrap();
        fx.store
            .update(id, &mut |r: &mut JobRecord| {
                r.claim("busy", Utc::now(), Duration::from_secs(600));
                Ok(())
            })
            .unwrap();

        let processed = pool.process("w-0", &delivery(id, 50), &config().with_max_attempts(1));
        assert_eq!(processed, Processed::SkippedInFlight);
        assert_eq!(fx.coordinator.status(id).unwrap(), JobState::Started);
    }

    #[test]
    fn long_compute_sees_bounded_redeliveries() {
        // Visibility far shorter than the compute: the message resurfaces
        // while the first worker is still busy.
        let fx = Fixture::with_channel(InMemoryChannelConfig {
            visibility_timeout: Duration::from_millis(50),
            redelivery_delay: Duration::from_millis(10),
            ..InMemoryChannelConfig::default()
        });
        let handle = fx
            .pool(|args| {
                thread::sleep(Duration::from_millis(400));
                echo(args)
            })
            .spawn(config().with_concurrency(2))
            .unwrap();

        let id = fx.coordinator.submit(args()).unwrap();
        let outcome = fx
            .coordinator
            .poll_result(id, PollOptions::new(Duration::from_secs(10), Duration::from_millis(5)))
            .unwrap();

        let stats = handle.stats_source();
        handle.shutdown();
        let stats = stats.lock().unwrap().clone();

        assert!(outcome.is_success());
        assert_eq!(fx.calls(), 1);
        // Released deliveries back off; a fixed 10ms delay would give ~35.
        assert!(stats.duplicates_skipped <= 15, "{stats:?}");
    }

    #[test]
    fn visibility_outlasts_compute_timeout() {
        let config = WorkerPoolConfig::default();
        assert!(config.visibility_timeout() > config.compute_timeout.unwrap());

        let unbounded = config.with_compute_timeout(None).with_stale_after(Duration::from_secs(42));
        assert_eq!(unbounded.visibility_timeout(), Duration::from_secs(42));
    }

    #[test]
    fn superseded_attempt_cannot_overwrite() {
        let fx = Fixture::new();
        let store = fx.store.clone();
        let taken_over: Arc<Mutex<Option<JobId>>> = Arc::new(Mutex::new(None));
        let target = taken_over.clone();

        // While "computing", another worker takes the claim over.
        let pool = fx.pool(move |_| {
            if let Some(id) = *target.lock().unwrap() {
                let later = Utc::now() + chrono::Duration::seconds(3600);
                store
                    .update(id, &mut |r: &mut JobRecord| {
                        r.claim("usurper", later, Duration::from_secs(600));
                        Ok(())
                    })
                    .unwrap();
            }
            Ok(json!("stale"))
        });

        let id = fx.coordinator.submit(args()).unwrap();
        *taken_over.lock().unwrap() = Some(id);

        let processed = pool.process_next("w-0", &config()).unwrap().unwrap();
        assert_eq!(processed, Processed::Superseded);

        let record = fx.coordinator.record(id).unwrap();
        assert_eq!(record.state, JobState::Started);
        assert_eq!(record.attempt, 2);
        assert!(record.outcome.is_none());
    }

    #[test]
    fn stats_count_each_kind() {
        let mut stats = WorkerPoolStats::default();
        stats.record(&Processed::Completed {
            state: JobState::Success,
            attempt: 2,
            reclaimed: true,
        });
        stats.record(&Processed::Completed {
            state: JobState::Failure,
            attempt: 1,
            reclaimed: false,
        });
        stats.record(&Processed::SkippedInFlight);
        stats.record(&Processed::Poisoned);

        assert_eq!(
            stats,
            WorkerPoolStats {
                processed: 4,
                succeeded: 1,
                failed: 1,
                duplicates_skipped: 1,
                reclaimed: 1,
                released: 1,
                poisoned: 1,
                dropped: 0,
            }
        );
    }

    #[test]
    fn spawned_pool_runs_each_job_once() {
        let fx = Fixture::new();
        let handle = fx.pool(echo).spawn(config().with_concurrency(4)).unwrap();
        assert_eq!(handle.worker_count(), 4);

        let ids: Vec<JobId> = (0..50).map(|_| fx.coordinator.submit(args()).unwrap()).collect();
        let poll = PollOptions::new(Duration::from_secs(10), Duration::from_millis(5));

        for id in &ids {
            let outcome = fx.coordinator.poll_result(*id, poll).unwrap();
            assert!(outcome.is_success());
            assert!(outcome.output().is_some_and(|o| !o.is_null()));
        }

        // Counters are bumped after the outcome is stored; read them once
        // the workers are joined.
        let stats = handle.stats_source();
        handle.shutdown();
        let stats = stats.lock().unwrap().clone();

        assert_eq!(fx.calls(), 50);
        assert_eq!(stats.succeeded, 50);
    }

    #[test]
    fn always_failing_compute_yields_failure_outcomes() {
        let fx = Fixture::new();
        let handle = fx
            .pool(|_| Err(ComputeError::invalid_input("unreadable product text")))
            .spawn(config().with_concurrency(2))
            .unwrap();

        let id = fx.coordinator.submit(args()).unwrap();
        let outcome = fx
            .coordinator
            .poll_result(id, PollOptions::new(Duration::from_secs(10), Duration::from_millis(5)))
            .unwrap();
        handle.shutdown();

        assert_eq!(outcome.state(), JobState::Failure);
        assert_eq!(outcome.failure_reason(), Some("invalid input: unreadable product text"));
    }

    #[test]
    fn workers_exit_when_channel_closes() {
        let fx = Fixture::new();
        let handle = fx.pool(echo).spawn(config().with_concurrency(3)).unwrap();

        fx.channel.close();
        // Joins promptly: every worker sees Closed on its next dequeue.
        handle.shutdown();
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: however many times each job is delivered, it is computed
        /// once and ends terminal.
        #[test]
        fn duplicate_deliveries_compute_each_job_once(copies in prop::collection::vec(1usize..4, 1..12)) {
            let fx = Fixture::new();
            let pool = fx.pool(echo);
            let config = config().with_dequeue_wait(Duration::ZERO);

            let mut ids = Vec::new();
            for extra in &copies {
                let id = fx.coordinator.submit(args()).unwrap();
                for _ in 0..*extra {
                    fx.channel.enqueue(JobMessage::new(id, args())).unwrap();
                }
                ids.push(id);
            }

            while pool.process_next("w-0", &config).unwrap().is_some() {}

            prop_assert_eq!(fx.calls(), ids.len());
            for id in ids {
                prop_assert_eq!(fx.coordinator.status(id).unwrap(), JobState::Success);
            }
        }
    }
}
