//! The exponential backoff shared by subchannel reconnection (§4.7) and the
//! resolving load balancer's re-resolution retries (§4.8): same shape,
//! different owners, so it lives in one place rather than two copies.

use std::time::Duration;

use rand::Rng;

use crate::options::ChannelOptions;

/// Tracks the next delay to use and grows it geometrically (with full
/// jitter) on every consecutive failure; [`Backoff::reset`] snaps back to
/// the initial delay, called whenever the thing being retried succeeds.
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(options: &ChannelOptions) -> Self {
        Backoff {
            initial: options.initial_backoff,
            max: options.max_backoff,
            multiplier: options.backoff_multiplier,
            current: options.initial_backoff,
        }
    }

    /// The delay to wait before the next attempt, with full jitter applied
    /// (a uniformly random duration in `[0, current]`) so that many clients
    /// retrying the same backend don't all wake up in lockstep.
    pub fn next_delay(&mut self) -> Duration {
        let jittered = if self.current.is_zero() {
            Duration::ZERO
        } else {
            let millis = self.current.as_millis().max(1) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        };
        let grown = self.current.mul_f64(self.multiplier);
        self.current = grown.min(self.max);
        jittered
    }

    /// Resets the growth back to the initial delay. Called on success (a
    /// subchannel reaching `Ready`, or a resolver producing a good result).
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(initial_ms: u64, max_ms: u64) -> ChannelOptions {
        ChannelOptions::builder()
            .backoff(Duration::from_millis(initial_ms), Duration::from_millis(max_ms), 2.0)
            .build()
    }

    #[test]
    fn delay_never_exceeds_the_current_ceiling() {
        let mut backoff = Backoff::new(&options(100, 10_000));
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_millis(10_000));
        }
    }

    #[test]
    fn growth_is_capped_at_max() {
        let mut backoff = Backoff::new(&options(100, 400));
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert!(backoff.current <= Duration::from_millis(400));
    }

    #[test]
    fn reset_returns_to_initial_ceiling() {
        let mut backoff = Backoff::new(&options(100, 10_000));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current, Duration::from_millis(100));
    }
}
