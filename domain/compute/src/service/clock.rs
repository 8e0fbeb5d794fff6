use chrono::{DateTime, Utc};

/// Source of the current time, injected so schedulers can be driven by tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Seconds since the epoch.
    fn timestamp(&self) -> f64 {
        self.now().timestamp_millis() as f64 / 1000.0
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
