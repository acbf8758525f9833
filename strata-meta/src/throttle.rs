//! Time-based log throttling.
//!
//! Several cache events can fire once per request (replica failures,
//! permit denials, terminal lookup errors); logging each occurrence would
//! flood the log during an outage. [`LogThrottle`] gates such sites to one
//! record per period.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Allows at most one event per period.
#[derive(Debug)]
pub(crate) struct LogThrottle {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogThrottle {
    /// Creates a throttle with the given minimum period between events.
    pub(crate) const fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
        }
    }

    /// Returns true if the caller should log now, consuming the slot.
    pub(crate) fn should_log(&self) -> bool {
        self.should_log_at(Instant::now())
    }

    fn should_log_at(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap();
        match *last {
            Some(prev) if now.duration_since(prev) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
