//! Openloop — an open-loop workload generator for driving benchmark and
//! stress-test harnesses.
//!
//! Openloop issues synthetic requests (invocations of a user-supplied work
//! function) at a target average rate, with randomized inter-arrival times
//! approximating a Poisson arrival process. Because the pacing is open-loop,
//! the offered load never depends on how fast the system under test responds:
//! a slow backend makes admission tokens pile up in front of the worker pool,
//! it does not slow the pacing loop down.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`WorkloadGenerator`]: the orchestrator. Owns the target rate, the token
//!   pool that decouples pacing from execution, the worker pool, and the
//!   collected results. [`fire_wait`](WorkloadGenerator::fire_wait) is the
//!   pacing primitive a harness drives in a loop.
//! - [`arrival`]: inter-arrival samplers. The default models a Poisson
//!   process (exponential inter-arrival times); any `Fn(rate) -> Duration`
//!   can be plugged in, e.g. fixed spacing for reproducible runs.
//! - [`Collector`]: shared append-only store receiving one result record per
//!   completed work invocation, in completion order.
//!
//! # Design goals
//!
//! - Statistical convergence to the target rate, not hard real-time delivery:
//!   per-call bookkeeping overhead is measured and subtracted from the
//!   sampled delay, and the loop free-runs rather than bursting to catch up.
//! - The work function is opaque. It takes no arguments and returns whatever
//!   record type the harness wants to analyze later.
//! - Prompt, cooperative shutdown: idle workers wake on the stop signal
//!   immediately, in-flight invocations run to completion.
//!
//! # Example
//!
//! ```no_run
//! use openloop::WorkloadGenerator;
//!
//! #[derive(Clone, Debug)]
//! struct Sample {
//!     ok: bool,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut wg = WorkloadGenerator::builder()
//!         .work(|| async { Sample { ok: true } })
//!         .rate(5.0)
//!         .workers(4)
//!         .build();
//!
//!     wg.start().await;
//!     for _ in 0..50 {
//!         wg.fire_wait().await;
//!     }
//!     wg.stop().await;
//!
//!     println!("collected {} samples", wg.results().len());
//! }
//! ```

/// Inter-arrival time samplers
pub mod arrival;
/// Shared result collection
pub mod collector;
/// The workload generator: pacing loop, worker pool, rate control
pub mod generator;

pub use arrival::DelayFn;
pub use collector::Collector;
pub use generator::{WorkloadGenerator, DEFAULT_RATE_RPS, MIN_RATE_RPS};
