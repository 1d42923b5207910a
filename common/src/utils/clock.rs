use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of wall-clock time for job bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.current
            .lock()
            .map(|current| *current)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Milliseconds between two instants, zero when `end` precedes `start`.
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_only_on_request() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(3));
        assert_eq!(elapsed_ms(start, clock.now()), 3_000);
    }

    #[test]
    fn elapsed_ms_clamps_negative_spans() {
        let now = Utc::now();
        assert_eq!(elapsed_ms(now, now - Duration::seconds(1)), 0);
    }
}
