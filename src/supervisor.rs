//! # Per-process lifecycle loop.
//!
//! One [`ProcessActor`] owns the worker of one task. The registry spawns it
//! when the order flips to start and cancels its token when the order flips
//! to stop; everything in between (spawning, draining output, detecting
//! staleness, restarting with the reconnect delay) happens here.
//!
//! ```text
//!           start order             spawn ok
//! stopped ─────────────▶ starting ─────────▶ running
//!    ▲                      │ spawn fail       │
//!    │                      ▼                  │ exit ok
//!    │                   failed                ▼
//!    │     reconnect=true   │               finishing
//!    │  after reconnect     │                  │
//!    │  delay               ▼                  ▼
//!    │                   starting ◀───── finished
//!    │ stop order (any state)
//!    └──────────────────────────────────────────
//! ```
//!
//! The actor is the only writer of the exec state; the order lives in the
//! registry and is only observed here through the cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;
use crate::event::{Event, EventKind};
use crate::monitor::Monitor;
use crate::progress;
use crate::state::ExecState;
use crate::worker::{self, Worker};

/// How long a worker may live without output before it counts as running.
const START_GRACE: Duration = Duration::from_secs(1);

/// Supervision parameters of one task, frozen at actor spawn.
#[derive(Clone)]
pub(crate) struct ActorParams {
    pub binary: String,
    pub command: Vec<String>,
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    /// Zero disables the stale check.
    pub stale_timeout: Duration,
    /// Time between terminate and kill.
    pub grace: Duration,
    /// Semver requirement on the worker binary, empty for any.
    pub ffversion: String,
}

/// Why one worker run ended.
enum RunOutcome {
    /// The worker exited on its own.
    Exited(Option<std::process::ExitStatus>),
    /// The registry requested a stop.
    StopRequested,
    /// No progress for the configured stale timeout.
    Stale,
}

/// The lifecycle loop of one managed process.
pub(crate) struct ProcessActor {
    id: String,
    params: ActorParams,
    monitor: Arc<Monitor>,
    bus: Bus,
}

impl ProcessActor {
    pub fn new(id: impl Into<String>, params: ActorParams, monitor: Arc<Monitor>, bus: Bus) -> Self {
        Self {
            id: id.into(),
            params,
            monitor,
            bus,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }

            self.monitor
                .write(|rt| {
                    rt.log.begin_run();
                    rt.reconnect_at = None;
                })
                .await;
            self.monitor.set_state(ExecState::Starting).await;
            self.publish(Event::now(EventKind::ProcessStarting));

            if !self.check_version().await {
                // A version mismatch is permanent; retrying cannot fix it.
                break;
            }

            let mut worker = match worker::spawn(&self.params.binary, &self.params.command) {
                Ok(worker) => worker,
                Err(e) => {
                    self.monitor
                        .write(|rt| rt.log.push(format!("spawn failed: {e}"), false))
                        .await;
                    self.monitor.set_state(ExecState::Failed).await;
                    self.publish(Event::now(EventKind::ProcessFailed).with_error(e.to_string()));
                    if self.reconnect_after_failure(&token).await {
                        continue;
                    }
                    break;
                }
            };

            match self.drive(&mut worker, &token).await {
                RunOutcome::Exited(status) => {
                    let success = status.map(|s| s.success()).unwrap_or(false);
                    let code = status.and_then(|s| s.code());

                    if success {
                        self.monitor.set_state(ExecState::Finishing).await;
                        self.monitor.set_state(ExecState::Finished).await;
                        let mut ev = Event::now(EventKind::ProcessFinished);
                        if let Some(code) = code {
                            ev = ev.with_exit_code(code);
                        }
                        self.publish(ev);
                        break;
                    }

                    self.monitor
                        .write(|rt| {
                            rt.log
                                .push(format!("worker exited with code {code:?}"), false);
                        })
                        .await;
                    self.monitor.set_state(ExecState::Failed).await;
                    let mut ev =
                        Event::now(EventKind::ProcessFailed).with_error("abnormal exit");
                    if let Some(code) = code {
                        ev = ev.with_exit_code(code);
                    }
                    self.publish(ev);

                    if self.reconnect_after_failure(&token).await {
                        continue;
                    }
                    break;
                }
                RunOutcome::StopRequested => {
                    let killed = self.shutdown(&mut worker).await;
                    if killed {
                        self.monitor.set_state(ExecState::Killed).await;
                        self.publish(Event::now(EventKind::ProcessKilled));
                    } else {
                        self.monitor.set_state(ExecState::Finished).await;
                        self.publish(Event::now(EventKind::ProcessFinished));
                    }
                    break;
                }
                RunOutcome::Stale => {
                    self.publish(
                        Event::now(EventKind::StaleDetected).with_delay(self.params.stale_timeout),
                    );
                    let _ = self.shutdown(&mut worker).await;
                    self.monitor
                        .write(|rt| rt.log.push("no progress within stale timeout", false))
                        .await;
                    self.monitor.set_state(ExecState::Failed).await;
                    self.publish(
                        Event::now(EventKind::ProcessFailed).with_error("stale timeout"),
                    );

                    if self.reconnect_after_failure(&token).await {
                        continue;
                    }
                    break;
                }
            }
        }
    }

    /// Verifies the worker binary version against the config requirement.
    async fn check_version(&self) -> bool {
        let observed = worker::binary_version(&self.params.binary).await;
        if let Some(v) = &observed {
            let v = v.clone();
            self.monitor.write(move |rt| rt.ffversion = v).await;
        }

        if self.params.ffversion.is_empty() {
            return true;
        }

        let satisfied = match (
            semver::VersionReq::parse(&self.params.ffversion),
            observed.as_deref().and_then(worker::parse_version),
        ) {
            (Ok(req), Some(version)) => req.matches(&version),
            _ => false,
        };

        if !satisfied {
            let requirement = self.params.ffversion.clone();
            let seen = observed.unwrap_or_else(|| "unknown".to_string());
            self.monitor
                .write(move |rt| {
                    rt.log.push(
                        format!("worker version {seen} does not satisfy {requirement}"),
                        false,
                    );
                })
                .await;
            self.monitor.set_state(ExecState::Failed).await;
            self.publish(
                Event::now(EventKind::ProcessFailed).with_error("worker version mismatch"),
            );
        }

        satisfied
    }

    /// Drives one worker run until it exits, goes stale, or a stop arrives.
    async fn drive(&self, worker: &mut Worker, token: &CancellationToken) -> RunOutcome {
        let mut running = false;
        let mut grace_fired = false;
        let mut last_progress = Instant::now();
        let mut cpu_sample: Option<worker::CpuSample> = None;

        let start_grace = tokio::time::sleep(START_GRACE);
        tokio::pin!(start_grace);

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let (child, lines) = worker.split_mut();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return RunOutcome::StopRequested;
                }
                maybe = lines.recv() => match maybe {
                    Some(line) => {
                        if self.ingest_line(&line, &mut running).await {
                            last_progress = Instant::now();
                        }
                    }
                    None => {
                        // Both streams hit EOF; the worker is gone or going.
                        let status = child.wait().await.ok();
                        return RunOutcome::Exited(status);
                    }
                },
                status = child.wait() => {
                    flush_lines(lines, &mut running, self).await;
                    return RunOutcome::Exited(status.ok());
                }
                _ = &mut start_grace, if !grace_fired => {
                    grace_fired = true;
                    if !running {
                        running = true;
                        self.monitor.set_state(ExecState::Running).await;
                        self.publish(Event::now(EventKind::ProcessRunning));
                    }
                }
                _ = tick.tick() => {
                    if let Some(pid) = child.id() {
                        if let Some((usage, sample)) = worker::sample_usage(pid, cpu_sample) {
                            cpu_sample = Some(sample);
                            self.monitor
                                .write(|rt| {
                                    rt.cpu_percent = usage.cpu_percent;
                                    rt.memory_bytes = usage.memory_bytes;
                                })
                                .await;
                        }
                    }

                    if !self.params.stale_timeout.is_zero()
                        && last_progress.elapsed() >= self.params.stale_timeout
                    {
                        return RunOutcome::Stale;
                    }
                }
            }
        }
    }

    /// Records one output line; returns true for progress lines.
    async fn ingest_line(&self, line: &str, running: &mut bool) -> bool {
        let is_progress = progress::is_progress_line(line);

        self.monitor
            .write(|rt| {
                rt.log.push(line, is_progress);
                if is_progress {
                    rt.progress.apply_line(line);
                }
            })
            .await;

        if is_progress && !*running {
            *running = true;
            self.monitor.set_state(ExecState::Running).await;
            self.publish(Event::now(EventKind::ProcessRunning));
        }

        is_progress
    }

    /// Terminate, wait out the grace period, kill if needed.
    ///
    /// Returns true if the worker had to be killed.
    async fn shutdown(&self, worker: &mut Worker) -> bool {
        self.monitor.set_state(ExecState::Finishing).await;
        worker.terminate();

        let (child, lines) = worker.split_mut();
        let graceful = tokio::select! {
            _ = child.wait() => true,
            _ = tokio::time::sleep(self.params.grace) => false,
        };

        if !graceful {
            let _ = child.kill().await;
        }

        let mut running = true;
        flush_lines(lines, &mut running, self).await;
        !graceful
    }

    /// Schedules a reconnect after a failure.
    ///
    /// Returns true once the delay elapsed; false when reconnect is disabled
    /// or the sleep was interrupted by a stop.
    async fn reconnect_after_failure(&self, token: &CancellationToken) -> bool {
        if !self.params.reconnect || token.is_cancelled() {
            return false;
        }

        let delay = self.params.reconnect_delay;
        self.monitor
            .write(|rt| rt.reconnect_at = Some(SystemTime::now() + delay))
            .await;
        self.publish(Event::now(EventKind::ReconnectScheduled).with_delay(delay));

        let interrupted = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = token.cancelled() => true,
        };

        self.monitor.write(|rt| rt.reconnect_at = None).await;
        !interrupted
    }

    fn publish(&self, event: Event) {
        self.bus.publish(event.with_process(self.id.as_str()));
    }
}

/// Drains whatever output is still buffered after the worker exited.
async fn flush_lines(
    lines: &mut mpsc::Receiver<String>,
    running: &mut bool,
    actor: &ProcessActor,
) {
    loop {
        match tokio::time::timeout(Duration::from_millis(200), lines.recv()).await {
            Ok(Some(line)) => {
                actor.ingest_line(&line, running).await;
            }
            Ok(None) | Err(_) => break,
        }
    }
}
