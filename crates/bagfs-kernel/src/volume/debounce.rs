//! Quiescence detection for bursts of device-change events.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Fires once after events stop arriving for `window`.
///
/// Timestamps are passed in so callers (and tests) control the clock.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_event: Mutex<Option<Instant>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Note an event. Out-of-order timestamps never move the window back.
    pub fn record(&self, at: Instant) {
        let mut last = self.last_event.lock();
        match *last {
            Some(prev) if prev >= at => {}
            _ => *last = Some(at),
        }
    }

    /// True exactly once per burst, when `now` is at least `window` past the
    /// latest recorded event.
    pub fn ready(&self, now: Instant) -> bool {
        let mut last = self.last_event.lock();
        match *last {
            Some(at) if now.saturating_duration_since(at) >= self.window => {
                *last = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_event.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_after_quiet_window() {
        let debouncer = Debouncer::new(Duration::from_secs(3));
        let start = Instant::now();

        debouncer.record(start);
        debouncer.record(start + Duration::from_secs(1));
        debouncer.record(start + Duration::from_secs(2));

        assert!(!debouncer.ready(start + Duration::from_secs(4)));
        assert!(debouncer.ready(start + Duration::from_secs(5)));
        assert!(!debouncer.ready(start + Duration::from_secs(9)));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_idle_never_fires() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(!debouncer.ready(Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn test_late_event_restarts_window() {
        let debouncer = Debouncer::new(Duration::from_secs(3));
        let start = Instant::now();

        debouncer.record(start);
        debouncer.record(start + Duration::from_secs(2));
        debouncer.record(start + Duration::from_secs(1));

        assert!(!debouncer.ready(start + Duration::from_secs(4)));
        assert!(debouncer.ready(start + Duration::from_secs(5)));
    }
}
