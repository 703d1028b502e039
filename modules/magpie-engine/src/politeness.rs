use std::time::Duration;

use rand::Rng;

use magpie_common::RateLimits;

/// Self-imposed rate limiting for one source. Each source owns its own
/// controller — timers are never shared across sources, so one struggling
/// site cannot slow the others down.
///
/// Inter-request delay is drawn uniformly from `[min_delay, max_delay]`;
/// fixed delays get crawlers fingerprinted and blocked. Backoff after a
/// failure doubles per attempt up to a cap, so retries against an
/// already-struggling endpoint thin out instead of herding.
pub struct Politeness {
    min_delay: Duration,
    max_delay: Duration,
    base_backoff: Duration,
    cap_backoff: Duration,
}

impl Politeness {
    pub fn new(limits: &RateLimits) -> Self {
        Self {
            min_delay: Duration::from_millis(limits.min_delay_ms),
            max_delay: Duration::from_millis(limits.max_delay_ms.max(limits.min_delay_ms)),
            base_backoff: Duration::from_millis(limits.base_backoff_ms),
            cap_backoff: Duration::from_millis(limits.cap_backoff_ms),
        }
    }

    /// Block until the next request to this source is allowed.
    pub async fn wait(&self) {
        let delay = self.request_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Block for the backoff interval after a failure at `attempt`
    /// (zero-based: the first retry backs off by `base_backoff`).
    pub async fn backoff(&self, attempt: u32) {
        let delay = self.backoff_delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Uniform jitter in `[min_delay, max_delay]`.
    pub fn request_delay(&self) -> Duration {
        if self.max_delay == self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// `min(base_backoff * 2^attempt, cap_backoff)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_backoff.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor);
        Duration::from_millis(delay).min(self.cap_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(min: u64, max: u64, base: u64, cap: u64) -> RateLimits {
        RateLimits {
            min_delay_ms: min,
            max_delay_ms: max,
            base_backoff_ms: base,
            cap_backoff_ms: cap,
            ..RateLimits::default()
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = Politeness::new(&limits(0, 0, 1_000, 600_000));
        assert_eq!(p.backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(8_000));
    }

    #[test]
    fn backoff_is_capped() {
        let p = Politeness::new(&limits(0, 0, 1_000, 5_000));
        assert_eq!(p.backoff_delay(10), Duration::from_millis(5_000));
        // Large attempt counts must not overflow
        assert_eq!(p.backoff_delay(200), Duration::from_millis(5_000));
    }

    #[test]
    fn request_delay_stays_in_bounds() {
        let p = Politeness::new(&limits(100, 300, 1_000, 5_000));
        for _ in 0..100 {
            let d = p.request_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_blocks_at_least_min_delay() {
        let p = Politeness::new(&limits(500, 800, 1_000, 5_000));
        let start = tokio::time::Instant::now();
        p.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
