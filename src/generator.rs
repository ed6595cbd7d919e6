//! The `WorkloadGenerator`: open-loop pacing, a token pool decoupling
//! admission from execution, and a worker pool draining it.
//!
//! # High-level flow
//! 1. A harness builds a generator around a zero-argument async work
//!    function and calls [`start`](WorkloadGenerator::start) to spawn the
//!    worker pool.
//! 2. The harness drives [`fire_wait`](WorkloadGenerator::fire_wait) in a
//!    loop. Each call admits exactly one token into a shared pool
//!    (implemented via `tokio::sync::Semaphore`), samples an inter-arrival
//!    delay at the current rate, and sleeps for the sampled delay minus the
//!    time already spent on bookkeeping.
//! 3. Each worker repeatedly acquires one token, invokes the work function
//!    once, and appends the returned record to the shared [`Collector`].
//! 4. [`stop`](WorkloadGenerator::stop) signals every worker and joins them;
//!    idle workers wake immediately, busy ones finish their in-flight
//!    invocation first.
//!
//! Because admission never waits for execution, a slow work function makes
//! tokens accumulate in the pool instead of slowing the pacing loop: the
//! offered load stays open-loop. When bookkeeping overhead exceeds the
//! sampled delay the loop free-runs at whatever rate the host can manage;
//! it never fires extra tokens to compensate for past lag.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::arrival::{self, DelayFn};
use crate::collector::Collector;

/// Floor for the target rate: one request per minute.
///
/// The rate is clamped here on every write so the sampled mean inter-arrival
/// time stays bounded (at most 60s); a zero rate would make it unbounded.
pub const MIN_RATE_RPS: f64 = 1.0 / 60.0;

/// Default target rate: ten requests per minute.
pub const DEFAULT_RATE_RPS: f64 = 10.0 / 60.0;

/// Target rate shared between the rate-control caller and the pacing loop.
///
/// Single writer, many readers: stored as `f64` bits in an `AtomicU64` so
/// sampling reads never block behind worker activity. Staleness tolerance is
/// one sampling interval — a new rate takes effect on the next sample, and
/// sleeps already computed from the old rate are not revisited.
#[derive(Clone, Debug)]
pub struct SharedRate(Arc<AtomicU64>);

impl SharedRate {
    /// Clamps to [`MIN_RATE_RPS`].
    pub fn new(rps: f64) -> Self {
        Self(Arc::new(AtomicU64::new(rps.max(MIN_RATE_RPS).to_bits())))
    }

    /// Clamps to [`MIN_RATE_RPS`]; visible to the next [`get`](Self::get).
    pub fn set(&self, rps: f64) {
        self.0.store(rps.max(MIN_RATE_RPS).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Open-loop workload generator.
///
/// Construct with [`builder`](WorkloadGenerator::builder): `work` is
/// required, everything else has defaults (`rate` = [`DEFAULT_RATE_RPS`],
/// `workers` = 10, `delay` = [`arrival::poisson`]).
///
/// Dropping the generator signals shutdown and aborts any workers still
/// running, so no worker task outlives it. For a graceful drain — letting
/// in-flight invocations finish and their records land — call
/// [`stop`](WorkloadGenerator::stop) first.
#[derive(TypedBuilder)]
pub struct WorkloadGenerator<F, R> {
    /// The work function: called exactly once per admitted token, from
    /// worker tasks, concurrently.
    work: F,
    /// Target admission rate in requests per second.
    #[builder(
        default = SharedRate::new(DEFAULT_RATE_RPS),
        setter(transform = |rps: f64| SharedRate::new(rps))
    )]
    rate: SharedRate,
    /// Number of worker tasks spawned by [`start`](WorkloadGenerator::start).
    #[builder(default = 10)]
    workers: usize,
    /// Inter-arrival sampler; defaults to Poisson arrivals.
    #[builder(default = Arc::new(arrival::poisson) as DelayFn)]
    delay: DelayFn,
    #[builder(default = Arc::new(Semaphore::new(0)), setter(skip))]
    tokens: Arc<Semaphore>,
    #[builder(default = Collector::new(), setter(skip))]
    collector: Collector<R>,
    #[builder(default = None, setter(skip))]
    pool: Option<WorkerPool>,
}

/// One running generation of workers.
struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl<F, R> WorkloadGenerator<F, R> {
    /// Admit one token: some worker will eventually invoke the work function
    /// once for it. Non-blocking, no timing side effect.
    ///
    /// Tokens are counted, not ordered payloads; a backlog at the semaphore's
    /// permit limit saturates rather than panicking.
    pub fn fire(&self) {
        if self.tokens.available_permits() < Semaphore::MAX_PERMITS {
            self.tokens.add_permits(1);
        }
    }

    /// Admit one token, then sleep out the rest of a sampled inter-arrival
    /// delay.
    ///
    /// The stopwatch starts before the token is enqueued, so the time spent
    /// on admission and sampling is subtracted from the sampled delay: under
    /// light overhead the realized inter-arrival distribution converges to
    /// the sampled one. If bookkeeping already exceeded the sampled delay
    /// this returns immediately — the loop falls behind the target rate
    /// instead of bursting to catch up.
    pub async fn fire_wait(&self) {
        let admitted = Instant::now();
        self.fire();
        let delay = (self.delay)(self.rate.get());
        let remaining = delay.saturating_sub(admitted.elapsed());
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }

    /// Set the target rate, clamped to [`MIN_RATE_RPS`]. Never rejects.
    ///
    /// Takes effect on the next sample; an in-flight
    /// [`fire_wait`](Self::fire_wait) sleep computed from the previous rate
    /// is not altered. There is no upper clamp — achievable throughput is
    /// bounded only by worker count and work-function latency.
    pub fn set_rate(&self, rps: f64) {
        self.rate.set(rps);
    }

    /// The effective (post-clamp) target rate.
    pub fn rate(&self) -> f64 {
        self.rate.get()
    }

    /// Worker count used by the next [`start`](Self::start).
    pub fn set_workers(&mut self, count: usize) {
        self.workers = count;
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    /// Workers spawned and not yet exited.
    pub fn active_workers(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| {
            pool.handles.iter().filter(|h| !h.is_finished()).count()
        })
    }

    /// Admitted tokens not yet picked up by a worker.
    pub fn backlog(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Snapshot of all records collected so far, in completion order.
    pub fn results(&self) -> Vec<R>
    where
        R: Clone,
    {
        self.collector.snapshot()
    }

    /// Clear collected records. Appends racing the clear land before or
    /// after it; see [`Collector::reset`].
    pub fn reset_results(&self) {
        self.collector.reset();
    }

    /// Stop the worker pool: signal every worker, then wait for all of them
    /// to exit. Idle workers wake immediately; a worker mid-invocation
    /// finishes that invocation (and records its result) before exiting.
    ///
    /// No-op when no pool is running, and safe to call repeatedly. A worker
    /// that died to a panicking work function is reported here via
    /// `tracing::error!`; the stop itself still completes normally.
    pub async fn stop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        pool.shutdown.send_replace(true);
        for result in join_all(pool.handles).await {
            if let Err(err) = result {
                tracing::error!("worker task panicked: {err}");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

impl<F, Fut, R> WorkloadGenerator<F, R>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    /// Start the worker pool.
    ///
    /// If a pool is already running it is fully stopped (signaled and
    /// joined) first, so two generations of workers never overlap and a
    /// repeated `start` settles at exactly the configured count.
    pub async fn start(&mut self) {
        self.stop().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(workers = self.workers, "spawning worker pool");
        let handles = spawn_workers(
            self.workers,
            shutdown_rx,
            Arc::clone(&self.tokens),
            self.collector.clone(),
            self.work.clone(),
        );
        self.pool = Some(WorkerPool {
            shutdown: shutdown_tx,
            handles,
        });
    }
}

impl<F, R> Drop for WorkloadGenerator<F, R> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown.send_replace(true);
            for handle in &pool.handles {
                handle.abort();
            }
        }
    }
}

/// Spawns `count` worker tasks.
///
/// Each worker loops: acquire one token, run the work function once, append
/// the record. The shutdown signal is raced only against the token *wait* —
/// an invocation that already started always runs to completion. A panic in
/// the work function kills that worker task alone; it is detected and logged
/// when the pool is joined.
fn spawn_workers<F, Fut, R>(
    count: usize,
    shutdown: watch::Receiver<bool>,
    tokens: Arc<Semaphore>,
    collector: Collector<R>,
    work: F,
) -> Vec<JoinHandle<()>>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    (0..count)
        .map(|id| {
            let mut shutdown = shutdown.clone();
            let tokens = Arc::clone(&tokens);
            let collector = collector.clone();
            let work = work.clone();
            tokio::spawn(async move {
                tracing::debug!("worker {id} started");
                loop {
                    tokio::select! {
                        biased;
                        _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                        permit = tokens.clone().acquire_owned() => {
                            let Ok(permit) = permit else { break };
                            // The pacing loop is the only permit producer;
                            // consumed tokens must not flow back.
                            permit.forget();
                            let record = work().await;
                            collector.append(record);
                        }
                    }
                }
                tracing::debug!("worker {id} stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn idle_generator() -> WorkloadGenerator<impl Fn() -> std::future::Ready<()> + Clone, ()> {
        WorkloadGenerator::builder()
            .work(|| std::future::ready(()))
            .build()
    }

    #[test]
    fn rate_defaults_and_clamping() {
        let wg = idle_generator();
        assert_eq!(wg.rate(), DEFAULT_RATE_RPS);

        wg.set_rate(5.0);
        assert_eq!(wg.rate(), 5.0);

        // below the floor: clamped, never rejected
        wg.set_rate(0.0001);
        assert_eq!(wg.rate(), MIN_RATE_RPS);
        wg.set_rate(-3.0);
        assert_eq!(wg.rate(), MIN_RATE_RPS);
    }

    #[test]
    fn builder_clamps_initial_rate() {
        let wg = WorkloadGenerator::<_, ()>::builder()
            .work(|| std::future::ready(()))
            .rate(0.0)
            .build();
        assert_eq!(wg.rate(), MIN_RATE_RPS);
    }

    #[tokio::test]
    async fn set_rate_applies_to_next_sample() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sampled = Arc::clone(&seen);
        let wg = WorkloadGenerator::<_, ()>::builder()
            .work(|| std::future::ready(()))
            .rate(5.0)
            .delay(Arc::new(move |rps| {
                sampled.lock().unwrap().push(rps);
                Duration::ZERO
            }))
            .build();

        wg.fire_wait().await;
        wg.set_rate(42.0);
        wg.fire_wait().await;

        assert_eq!(*seen.lock().unwrap(), vec![5.0, 42.0]);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let mut wg = idle_generator();
        wg.stop().await;
        wg.stop().await;
        assert!(!wg.is_running());
        assert_eq!(wg.active_workers(), 0);
    }

    #[tokio::test]
    async fn start_spawns_configured_worker_count() {
        let mut wg = idle_generator();
        wg.start().await;
        assert!(wg.is_running());
        assert_eq!(wg.active_workers(), 10);
        wg.stop().await;
    }

    #[tokio::test]
    async fn restart_replaces_the_pool_without_overlap() {
        let mut wg = WorkloadGenerator::<_, ()>::builder()
            .work(|| std::future::ready(()))
            .workers(3)
            .build();

        wg.start().await;
        assert_eq!(wg.active_workers(), 3);

        // start joins the previous generation before spawning the next one
        wg.set_workers(2);
        wg.start().await;
        assert_eq!(wg.active_workers(), 2);

        wg.stop().await;
        assert_eq!(wg.active_workers(), 0);
        assert!(!wg.is_running());
    }

    #[tokio::test]
    async fn fire_without_wait_has_no_timing_side_effect() {
        let wg = idle_generator();
        let begin = Instant::now();
        for _ in 0..100 {
            wg.fire();
        }
        assert!(begin.elapsed() < Duration::from_millis(50));
        assert_eq!(wg.backlog(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_wait_subtracts_overhead_from_the_sampled_delay() {
        let wg = WorkloadGenerator::<_, ()>::builder()
            .work(|| std::future::ready(()))
            .rate(10.0)
            .delay(Arc::new(arrival::uniform_spacing))
            .build();

        // paused clock: bookkeeping takes zero virtual time, so ten waits at
        // 100ms spacing advance the clock by exactly one second
        let begin = Instant::now();
        for _ in 0..10 {
            wg.fire_wait().await;
        }
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1050));
        assert_eq!(wg.backlog(), 10);
    }

    #[tokio::test]
    async fn reset_then_results_is_empty() {
        let mut wg = WorkloadGenerator::builder()
            .work(|| std::future::ready(1u32))
            .build();
        wg.start().await;
        wg.fire();
        while wg.results().is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        wg.stop().await;

        wg.reset_results();
        assert!(wg.results().is_empty());
    }

    #[tokio::test]
    async fn in_flight_work_finishes_before_stop_returns() {
        let mut wg = WorkloadGenerator::builder()
            .work(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                "done"
            })
            .workers(1)
            .build();

        wg.start().await;
        wg.fire();
        // let the worker pick the token up before signaling
        tokio::time::sleep(Duration::from_millis(10)).await;
        wg.stop().await;

        assert_eq!(wg.results(), vec!["done"]);
    }

    #[tokio::test]
    async fn panicking_work_kills_only_its_worker() {
        let mut wg = WorkloadGenerator::<_, ()>::builder()
            .work(|| async { panic!("boom") })
            .workers(2)
            .build();

        wg.start().await;
        wg.fire();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(wg.active_workers(), 1);

        // stop still joins cleanly and reports success
        wg.stop().await;
        assert!(!wg.is_running());
    }
}
