use std::time::{Duration, SystemTime};

/// Lifecycle events published on the [`Bus`](crate::bus::Bus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A process config was accepted and a task materialised.
    ProcessAdded,
    /// A task was removed from the registry.
    ProcessRemoved,
    /// The supervisor is spawning the worker.
    ProcessStarting,
    /// The worker produced its first progress line or survived the grace
    /// interval.
    ProcessRunning,
    /// The worker exited cleanly.
    ProcessFinished,
    /// The worker exited abnormally or could not be spawned.
    ProcessFailed,
    /// The worker ignored the terminate request and was force-killed.
    ProcessKilled,
    /// A reconnect attempt was scheduled after a failure.
    ReconnectScheduled,
    /// No progress was observed for the configured stale timeout.
    StaleDetected,
}

/// A single runtime event with optional context attached builder-style.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub at: SystemTime,
    /// Publish order, stamped by the [`Bus`](crate::bus::Bus). Lagging
    /// subscribers see a gap here instead of silently missing events.
    pub seq: u64,
    pub process: Option<String>,
    pub error: Option<String>,
    pub delay: Option<Duration>,
    pub exit_code: Option<i32>,
}

impl Event {
    pub fn now(kind: EventKind) -> Self {
        Self {
            kind,
            at: SystemTime::now(),
            seq: 0,
            process: None,
            error: None,
            delay: None,
            exit_code: None,
        }
    }

    pub fn with_process(mut self, id: impl Into<String>) -> Self {
        self.process = Some(id.into());
        self
    }

    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}
