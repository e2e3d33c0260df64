//! Reconnect backoff: exponential doubling from a base delay, capped at a
//! ceiling, with a bounded attempt budget. Exhausting the budget is the
//! caller's cue to escalate a fatal stream-unavailable error.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_ms,
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next attempt: `min(base * 2^(k-1), ceiling)` for
    /// attempt k. `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let exp = self.attempts.min(32);
        let delay = self
            .base_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_ms);
        self.attempts += 1;
        Some(Duration::from_millis(delay))
    }

    /// Clear the attempt count after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let mut p = ReconnectPolicy::new(1000, 60_000, 10);
        assert_eq!(p.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(p.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(p.next_delay(), Some(Duration::from_millis(4000)));
        assert_eq!(p.next_delay(), Some(Duration::from_millis(8000)));
    }

    #[test]
    fn delays_capped_at_ceiling() {
        let mut p = ReconnectPolicy::new(1000, 60_000, 10);
        let mut last = Duration::ZERO;
        while let Some(d) = p.next_delay() {
            last = d;
            assert!(d <= Duration::from_millis(60_000));
        }
        assert_eq!(last, Duration::from_millis(60_000));
    }

    #[test]
    fn budget_exhaustion_yields_none() {
        let mut p = ReconnectPolicy::new(100, 1000, 3);
        assert!(p.next_delay().is_some());
        assert!(p.next_delay().is_some());
        assert!(p.next_delay().is_some());
        assert_eq!(p.next_delay(), None);
        assert_eq!(p.attempts(), 3);
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut p = ReconnectPolicy::new(100, 1000, 2);
        let _ = p.next_delay();
        let _ = p.next_delay();
        assert_eq!(p.next_delay(), None);
        p.reset();
        assert_eq!(p.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn matches_closed_form() {
        let (base, ceiling) = (250u64, 8000u64);
        let mut p = ReconnectPolicy::new(base, ceiling, 12);
        for k in 1..=12u32 {
            let expected = base.saturating_mul(1 << (k - 1)).min(ceiling);
            assert_eq!(
                p.next_delay(),
                Some(Duration::from_millis(expected)),
                "attempt {}",
                k
            );
        }
        assert_eq!(p.next_delay(), None);
    }
}
