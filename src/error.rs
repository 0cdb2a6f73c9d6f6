//! # Error types used by the registry and the per-process supervisors.
//!
//! A single [`Error`] enum covers every synchronous failure the crate can
//! surface. Asynchronous worker failures (a crashed or stale worker) are
//! never returned from the call that triggered them; they are recorded in
//! the process state and log ring and handled by the reconnect policy.
//!
//! `as_label` returns a short stable snake_case name for logs and metrics.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by registry operations and configuration resolution.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// The submitted process config failed validation or resolution.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What exactly was rejected.
        reason: String,
    },

    /// A process, input, or output with the given id is not known.
    #[error("{what} '{id}' not found")]
    NotFound {
        /// The kind of thing that was looked up ("process", "input", ...).
        what: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// The operation clashes with existing state (duplicate id, delete while
    /// running, update to an already-taken id).
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// A required resource is not available (port range exhausted, store
    /// write failure).
    #[error("unavailable: {reason}")]
    Unavailable { reason: String },

    /// The worker could not be spawned or exited abnormally.
    ///
    /// Mostly recorded in process state rather than returned; the probe path
    /// returns it directly.
    #[error("worker failed: {reason}")]
    WorkerFailed { reason: String },

    /// A hard wall-clock deadline was exceeded.
    #[error("deadline of {timeout:?} exceeded")]
    Timeout { timeout: Duration },
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::InvalidConfig { .. } => "invalid_config",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Unavailable { .. } => "unavailable",
            Error::WorkerFailed { .. } => "worker_failed",
            Error::Timeout { .. } => "timeout",
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            id: id.into(),
        }
    }

    pub(crate) fn conflict(reason: impl Into<String>) -> Self {
        Error::Conflict {
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Error::Unavailable {
            reason: reason.into(),
        }
    }

    pub(crate) fn worker_failed(reason: impl Into<String>) -> Self {
        Error::WorkerFailed {
            reason: reason.into(),
        }
    }
}
