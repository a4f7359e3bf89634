use std::time::{Duration, Instant};

/// How often aggregated state is republished while events keep arriving.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(500);

/// Trailing-edge coalescing of update signals.
///
/// Tap events arrive in bursts far faster than anything can render them. The
/// first signal after a quiet period arms a deadline one interval out; every
/// signal until then folds into that single publish. With no signals nothing
/// is ever due. The caller drives time: it reports signals with `on_signal`
/// and asks `poll` whether a publish is due, so no timer lives in here.
#[derive(Debug)]
pub struct SnapshotScheduler {
    interval: Duration,
    deadline: Option<Instant>,
    shut_down: bool,
}

impl SnapshotScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
            shut_down: false,
        }
    }

    /// Note that state changed. Returns the deadline of the publish that
    /// will carry the change, or `None` once shut down.
    pub fn on_signal(&mut self, now: Instant) -> Option<Instant> {
        if self.shut_down {
            return None;
        }
        Some(*self.deadline.get_or_insert(now + self.interval))
    }

    /// True exactly once per armed deadline, when `now` has reached it.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if !self.shut_down && now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Take the pending publish immediately, if one is armed.
    pub fn flush(&mut self) -> bool {
        !self.shut_down && self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        if self.shut_down { None } else { self.deadline }
    }

    /// Drop any armed publish; later signals arm a new one.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Drop any armed publish and ignore all later signals.
    pub fn shutdown(&mut self) {
        self.deadline = None;
        self.shut_down = true;
    }
}

impl Default for SnapshotScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_INTERVAL)
    }
}
