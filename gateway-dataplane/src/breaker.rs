//! Per-slug circuit breaker (C6, spec §4.6). Grounded on the gateway's
//! existing health-tracking idiom (a shared map of per-target state), here
//! made lock-free with `DashMap` since breaker transitions must tolerate
//! concurrent probes without a global mutex (spec §5).

use dashmap::DashMap;
use gateway_core::model::{BreakerState, CircuitBreakerState};
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(30);

pub struct CircuitBreaker {
    states: DashMap<String, CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self { states: DashMap::new() }
    }

    /// `true` if a dispatch for `slug` may proceed. Transitions an expired
    /// OPEN breaker to HALF_OPEN as a side effect of the check.
    pub fn allow(&self, slug: &str) -> bool {
        let mut entry = self.states.entry(slug.to_string()).or_default();
        match entry.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let now = Instant::now();
                if entry.next_probe_at.is_some_and(|at| now >= at) {
                    entry.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, slug: &str) {
        let mut entry = self.states.entry(slug.to_string()).or_default();
        entry.state = BreakerState::Closed;
        entry.failures = 0;
        entry.last_failure_at = None;
        entry.next_probe_at = None;
    }

    pub fn record_failure(&self, slug: &str) {
        let mut entry = self.states.entry(slug.to_string()).or_default();
        entry.last_failure_at = Some(Instant::now());
        match entry.state {
            BreakerState::HalfOpen => {
                entry.state = BreakerState::Open;
                entry.next_probe_at = Some(Instant::now() + OPEN_DURATION);
            }
            BreakerState::Closed | BreakerState::Open => {
                entry.failures += 1;
                if entry.failures >= FAILURE_THRESHOLD {
                    entry.state = BreakerState::Open;
                    entry.next_probe_at = Some(Instant::now() + OPEN_DURATION);
                }
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_consecutive_failures_opens_the_breaker() {
        let breaker = CircuitBreaker::new();
        for _ in 0..5 {
            breaker.record_failure("openai");
        }
        assert!(!breaker.allow("openai"));
    }

    #[test]
    fn fewer_than_five_failures_keeps_closed() {
        let breaker = CircuitBreaker::new();
        for _ in 0..4 {
            breaker.record_failure("openai");
        }
        assert!(breaker.allow("openai"));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new();
        for _ in 0..4 {
            breaker.record_failure("openai");
        }
        breaker.record_success("openai");
        for _ in 0..4 {
            breaker.record_failure("openai");
        }
        assert!(breaker.allow("openai"));
    }

    #[test]
    fn half_open_probe_failure_reopens_the_breaker() {
        let breaker = CircuitBreaker::new();
        for _ in 0..5 {
            breaker.record_failure("openai");
        }
        {
            let mut entry = breaker.states.get_mut("openai").unwrap();
            entry.next_probe_at = Some(Instant::now());
        }
        assert!(breaker.allow("openai"));
        breaker.record_failure("openai");
        assert!(!breaker.allow("openai"));
    }

    #[test]
    fn unknown_slug_defaults_to_closed() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.allow("never-seen"));
    }
}
