use std::time::{Duration, Instant};

use crate::frames::CadenceGovernor;

/// At most one accepted request per `min_interval`. Rejected requests do not move the window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    governor: CadenceGovernor,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            governor: CadenceGovernor::new(min_interval),
        }
    }

    /// `Err` carries how long until the next request would be accepted.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        if self.governor.admit(now) {
            Ok(())
        } else {
            Err(self.governor.time_until_ready(now))
        }
    }
}
