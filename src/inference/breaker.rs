use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant },
    /// Cooldown elapsed; a single trial call is in flight. A trial that never reports back
    /// (cancelled caller) expires after another cooldown.
    HalfOpen { since: Instant },
}

/// Consecutive-failure circuit breaker. Time is passed in so behaviour is deterministic.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    phase: Phase,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            phase: Phase::Closed { failures: 0 },
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.phase {
            Phase::Closed { .. } => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// True when a regular call made at `now` would be let through.
    pub fn is_available(&self, now: Instant) -> bool {
        match self.phase {
            Phase::Closed { .. } => true,
            Phase::Open { since } | Phase::HalfOpen { since } => {
                now.saturating_duration_since(since) >= self.cooldown
            }
        }
    }

    /// Ask permission for a regular call. After the cooldown the first caller becomes the
    /// half-open trial; everyone else is rejected until it reports back.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Closed { .. } => true,
            Phase::Open { since } | Phase::HalfOpen { since }
                if now.saturating_duration_since(since) >= self.cooldown =>
            {
                self.phase = Phase::HalfOpen { since: now };
                true
            }
            Phase::Open { .. } | Phase::HalfOpen { .. } => false,
        }
    }

    pub fn record_success(&mut self) {
        self.phase = Phase::Closed { failures: 0 };
    }

    /// Returns true when this failure opened (or re-opened) the breaker.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.failure_threshold {
                    self.phase = Phase::Open { since: now };
                    true
                } else {
                    self.phase = Phase::Closed { failures };
                    false
                }
            }
            Phase::HalfOpen { .. } => {
                self.phase = Phase::Open { since: now };
                true
            }
            // A late failure from a call admitted before the breaker opened.
            Phase::Open { .. } => false,
        }
    }

    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        match self.phase {
            Phase::Open { since } => (since + self.cooldown).saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self.phase {
            Phase::Closed { failures } => failures,
            _ => self.failure_threshold,
        }
    }
}
