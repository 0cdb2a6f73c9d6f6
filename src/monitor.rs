//! # Shared runtime cell of one managed process.
//!
//! A [`Monitor`] is the single place where the supervisor records what it
//! observes: exec state, progress, resource usage, the log ring, and the
//! worker version seen at the last spawn. The registry reads it to project
//! [`ProcessState`](crate::state::ProcessState) and the log report.
//!
//! The supervisor is the only writer; registry handlers only read. Both go
//! through the same lock, which also serialises log appends against reads.

use std::time::SystemTime;

use tokio::sync::RwLock;

use crate::log_ring::LogRing;
use crate::progress::Progress;
use crate::state::ExecState;

/// Mutable runtime data of one process.
pub(crate) struct Runtime {
    pub state: ExecState,
    /// When `state` last changed.
    pub changed_at: SystemTime,
    pub progress: Progress,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    /// Worker binary version observed at the last spawn.
    pub ffversion: String,
    /// Deadline of a pending reconnect attempt.
    pub reconnect_at: Option<SystemTime>,
    pub log: LogRing,
}

/// Lock around [`Runtime`], shared between one supervisor and the registry.
pub(crate) struct Monitor {
    inner: RwLock<Runtime>,
}

impl Monitor {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Runtime {
                state: ExecState::default(),
                changed_at: SystemTime::now(),
                progress: Progress::default(),
                cpu_percent: 0.0,
                memory_bytes: 0,
                ffversion: String::new(),
                reconnect_at: None,
                log: LogRing::new(log_capacity),
            }),
        }
    }

    pub async fn read<R>(&self, f: impl FnOnce(&Runtime) -> R) -> R {
        let rt = self.inner.read().await;
        f(&rt)
    }

    pub async fn write<R>(&self, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let mut rt = self.inner.write().await;
        f(&mut rt)
    }

    /// Transitions the exec state, stamping the transition time.
    pub async fn set_state(&self, state: ExecState) {
        let mut rt = self.inner.write().await;
        if rt.state != state {
            rt.state = state;
            rt.changed_at = SystemTime::now();
        }
    }
}
