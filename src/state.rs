//! # Order, exec state, and the publishable process projection.
//!
//! `Order` is what the operator asked for; `ExecState` is what the worker is
//! observed doing. The two are owned by different sides: the registry is the
//! only writer of `Order`, the per-process supervisor is the only writer of
//! `ExecState`.

use serde::{Deserialize, Serialize};

use crate::log_ring::LogLine;
use crate::progress::Progress;

/// Operator-requested desired state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Start,
    Stop,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Start => "start",
            Order::Stop => "stop",
        }
    }
}

/// Observed execution state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecState {
    /// Worker exited cleanly, or has never been started.
    Finished,
    /// Spawn in flight, no progress observed yet.
    Starting,
    /// Worker alive and producing output.
    Running,
    /// Terminate requested, waiting for the worker to exit.
    Finishing,
    /// Worker exited abnormally or could not be spawned.
    Failed,
    /// Worker ignored the terminate request and was force-killed.
    Killed,
}

impl ExecState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecState::Finished => "finished",
            ExecState::Starting => "starting",
            ExecState::Running => "running",
            ExecState::Finishing => "finishing",
            ExecState::Failed => "failed",
            ExecState::Killed => "killed",
        }
    }
}

impl Default for ExecState {
    fn default() -> Self {
        ExecState::Finished
    }
}

/// Publishable snapshot of a managed process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessState {
    /// Operator-requested order.
    pub order: Order,
    /// Observed exec state.
    pub state: ExecState,
    /// Seconds until the next reconnect attempt, -1 when none is pending.
    pub reconnect_seconds: i64,
    /// Seconds spent in the current exec state.
    pub duration_seconds: u64,
    /// Unix timestamp of the last exec state transition.
    pub time: u64,
    /// Resident memory of the worker in bytes (0 when not running).
    pub memory_bytes: u64,
    /// CPU usage of the worker in percent (0 when not running).
    pub cpu_percent: f32,
    /// Parsed worker progress; zeroed fields when not reported.
    pub progress: Progress,
    /// Worker binary version observed at the last spawn.
    pub ffversion: String,
    /// The argument vector the worker is invoked with.
    pub command: Vec<String>,
}

/// Log report of a managed process.
#[derive(Debug, Clone)]
pub struct ProcessLog {
    /// When the task was created.
    pub created_at: std::time::SystemTime,
    /// Lines captured before the first progress line of a run.
    pub prelude: Vec<LogLine>,
    /// Rolling runtime log, oldest first.
    pub log: Vec<LogLine>,
}
