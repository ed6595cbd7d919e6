//! Inter-arrival time samplers.
//!
//! A sampler maps the current target rate (requests per second) to a single
//! non-negative delay: the gap the pacing loop should leave before admitting
//! the next request. The default, [`poisson`], draws exponentially
//! distributed delays, which makes the admission stream a Poisson arrival
//! process at the given rate. Anything matching [`DelayFn`] can be plugged
//! into the generator instead, e.g. [`uniform_spacing`] for deterministic,
//! reproducible pacing in tests.

use std::sync::Arc;
use std::time::Duration;

use rand_distr::{Distribution, Exp};

/// A pluggable inter-arrival sampler: target rate in, one delay out.
///
/// The generator guarantees the rate passed in is positive (it is clamped to
/// [`MIN_RATE_RPS`](crate::MIN_RATE_RPS) at every write), so samplers do not
/// need to defend against zero or negative rates.
pub type DelayFn = Arc<dyn Fn(f64) -> Duration + Send + Sync>;

/// One draw from `Exp(λ = rps)`: exponentially distributed inter-arrival
/// times with mean `1/rps`, i.e. a Poisson arrival process at `rps`.
pub fn poisson(rps: f64) -> Duration {
    let exp = Exp::new(rps).expect("rate is clamped positive before sampling");
    Duration::from_secs_f64(exp.sample(&mut rand::rng()))
}

/// Deterministic `1/rps` spacing. Same average rate as [`poisson`], no
/// randomness, so realized timings are reproducible.
pub fn uniform_spacing(rps: f64) -> Duration {
    Duration::from_secs_f64(1.0 / rps)
}
