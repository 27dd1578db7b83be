use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock used for scrape telemetry. Deadlines run on the tokio clock instead.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
    fn since(&self, t: SystemTime) -> Duration;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn since(&self, t: SystemTime) -> Duration {
        t.elapsed().unwrap_or_default()
    }
}

/// Whole seconds since the unix epoch, floored, negative before it.
pub fn unix_seconds(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as f64,
        Err(e) => -(e.duration().as_secs_f64().ceil()),
    }
}
