//! # Bounded capture of a worker's prelude and rolling output.
//!
//! A [`LogRing`] keeps two sequences of timestamped lines per process:
//!
//! - the *prelude*: everything the worker printed before its first progress
//!   line, retained for diagnostics across stop/start cycles;
//! - the *log*: the rolling runtime output, capped at a fixed number of
//!   lines with the oldest dropped first.
//!
//! The ring is not synchronised itself; the owning supervisor serialises
//! appends and the shared [`Monitor`](crate::monitor::Monitor) lock guards
//! reads.

use std::collections::VecDeque;
use std::time::SystemTime;

/// A single captured output line.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub at: SystemTime,
    pub text: String,
}

/// Bounded prelude + rolling log of a single process.
#[derive(Debug)]
pub struct LogRing {
    prelude: Vec<LogLine>,
    lines: VecDeque<LogLine>,
    capacity: usize,
    seen_progress: bool,
    fresh_prelude: bool,
}

impl LogRing {
    /// Creates an empty ring where each section holds at most `capacity`
    /// lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            prelude: Vec::new(),
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            seen_progress: false,
            fresh_prelude: false,
        }
    }

    /// Marks the start of a new worker run.
    ///
    /// The rolling log is cleared immediately; the previous run's prelude is
    /// replaced lazily, only once the new run produces pre-progress lines.
    pub fn begin_run(&mut self) {
        self.lines.clear();
        self.seen_progress = false;
        self.fresh_prelude = false;
    }

    /// Appends one output line.
    ///
    /// `progress` flags lines in the worker's progress format; the first one
    /// closes the prelude for this run.
    pub fn push(&mut self, text: impl Into<String>, progress: bool) {
        if progress {
            self.seen_progress = true;
        }

        let line = LogLine {
            at: SystemTime::now(),
            text: text.into(),
        };

        if !self.seen_progress {
            if !self.fresh_prelude {
                self.prelude.clear();
                self.fresh_prelude = true;
            }
            if self.prelude.len() < self.capacity {
                self.prelude.push(line);
            }
            return;
        }

        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Snapshot of the prelude section.
    pub fn prelude(&self) -> Vec<LogLine> {
        self.prelude.clone()
    }

    /// Snapshot of the rolling log section.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }
}
