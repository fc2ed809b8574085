//! Minimum spacing between consecutive calls in one chain.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Lets one call through per `interval`, measured from the previous call's start. A zero
/// interval disables limiting.
pub struct MinIntervalLimiter {
    limiter: Option<DefaultDirectRateLimiter>,
    clock: DefaultClock,
}

impl MinIntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval)
            .map(|q| RateLimiter::direct(q.allow_burst(NonZeroU32::MIN)));
        Self {
            limiter,
            clock: DefaultClock::default(),
        }
    }

    /// Block until the next call may start. Returns the time spent waiting.
    pub fn wait(&self) -> Duration {
        let Some(ref limiter) = self.limiter else {
            return Duration::ZERO;
        };
        let mut waited = Duration::ZERO;
        while let Err(not_until) = limiter.check() {
            let delay = not_until.wait_time_from(self.clock.now());
            std::thread::sleep(delay);
            waited += delay;
        }
        waited
    }
}
