use std::time::{Duration, Instant};

use super::SourceHealth;

/// Enforces a minimum spacing between accepted frames. Early calls are dropped, never queued.
#[derive(Debug, Clone)]
pub struct CadenceGovernor {
    min_spacing: Duration,
    last_accepted: Option<Instant>,
}

impl CadenceGovernor {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_accepted: None,
        }
    }

    /// Whether a frame taken at or after `now` would be far enough from the last accepted one.
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_spacing,
        }
    }

    pub fn mark_accepted(&mut self, at: Instant) {
        self.last_accepted = Some(at);
    }

    /// `ready` + `mark_accepted` in one step.
    pub fn admit(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.mark_accepted(now);
            true
        } else {
            false
        }
    }

    pub fn time_until_ready(&self, now: Instant) -> Duration {
        match self.last_accepted {
            None => Duration::ZERO,
            Some(last) => (last + self.min_spacing).saturating_duration_since(now),
        }
    }
}

/// Maps consecutive acquisition failures onto a health signal.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    offline_after: u32,
    consecutive_failures: u32,
}

impl HealthTracker {
    pub fn new(offline_after: u32) -> Self {
        Self {
            offline_after: offline_after.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self) -> SourceHealth {
        self.consecutive_failures = 0;
        self.health()
    }

    pub fn record_failure(&mut self) -> SourceHealth {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.health()
    }

    pub fn health(&self) -> SourceHealth {
        if self.consecutive_failures == 0 {
            SourceHealth::Ok
        } else if self.consecutive_failures >= self.offline_after {
            SourceHealth::Offline
        } else {
            SourceHealth::Degraded
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rapid_polling_keeps_accepted_frames_spaced() {
        let spacing = Duration::from_millis(100);
        let mut governor = CadenceGovernor::new(spacing);
        let start = Instant::now();

        let accepted: Vec<Instant> = (0..50)
            .map(|i| start + Duration::from_millis(i * 30))
            .filter(|&now| governor.admit(now))
            .collect();

        assert!(accepted.len() > 1);
        for pair in accepted.windows(2) {
            assert!(pair[1] - pair[0] >= spacing);
        }
    }

    #[test]
    fn repeated_polls_at_same_instant_accept_once() {
        let mut governor = CadenceGovernor::new(Duration::from_millis(100));
        let now = Instant::now();
        assert!(governor.admit(now));
        assert!(!governor.admit(now));
        assert!(!governor.admit(now));
        assert_eq!(governor.time_until_ready(now), Duration::from_millis(100));
    }

    #[test]
    fn zero_spacing_accepts_everything() {
        let mut governor = CadenceGovernor::new(Duration::ZERO);
        let now = Instant::now();
        assert!(governor.admit(now));
        assert!(governor.admit(now));
    }

    #[test]
    fn health_degrades_then_goes_offline() {
        let mut tracker = HealthTracker::new(3);
        assert_eq!(tracker.health(), SourceHealth::Ok);
        assert_eq!(tracker.record_failure(), SourceHealth::Degraded);
        assert_eq!(tracker.record_failure(), SourceHealth::Degraded);
        assert_eq!(tracker.record_failure(), SourceHealth::Offline);
        assert_eq!(tracker.consecutive_failures(), 3);
        assert_eq!(tracker.record_success(), SourceHealth::Ok);
        assert_eq!(tracker.consecutive_failures(), 0);
    }
}
