//! # Child-process handling for the worker binary.
//!
//! [`spawn`] starts the worker with both output streams piped; two auxiliary
//! tasks drain stdout and stderr line by line into a single channel the
//! supervisor consumes. Termination is two-staged: [`Worker::terminate`]
//! delivers the polite signal, the supervisor escalates to a kill after the
//! grace period.
//!
//! The module also hosts the worker version probe and `/proc` usage
//! sampling.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Buffered lines from both output streams, interleaved in arrival order.
const LINE_BUFFER: usize = 256;

/// A spawned worker process plus its merged output stream.
pub(crate) struct Worker {
    child: Child,
    lines: mpsc::Receiver<String>,
}

impl Worker {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Splits the worker into its process handle and line stream so both can
    /// be driven from one select loop.
    pub fn split_mut(&mut self) -> (&mut Child, &mut mpsc::Receiver<String>) {
        (&mut self.child, &mut self.lines)
    }

    /// Requests a graceful stop (SIGTERM on unix).
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            return;
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }
}

/// Spawns the worker with the given argument vector.
pub(crate) fn spawn(binary: &str, args: &[String]) -> std::io::Result<Worker> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let (tx, lines) = mpsc::channel(LINE_BUFFER);

    if let Some(stdout) = child.stdout.take() {
        drain_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        drain_lines(stderr, tx);
    }

    Ok(Worker { child, lines })
}

fn drain_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

/// Runs `<binary> -version` and extracts the reported version number.
pub(crate) async fn binary_version(binary: &str) -> Option<String> {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    extract_version(&text)
}

/// Pulls the first dotted version number out of the banner text.
pub(crate) fn extract_version(text: &str) -> Option<String> {
    use std::sync::OnceLock;

    use regex::Regex;

    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+){0,2})").unwrap());
    re.captures(text).map(|cap| cap[1].to_string())
}

/// Parses a possibly partial version ("4", "4.4") into a full semver
/// version.
pub(crate) fn parse_version(text: &str) -> Option<semver::Version> {
    let mut parts = text.split('.');
    let major: u64 = parts.next()?.parse().ok()?;
    let minor: u64 = parts.next().unwrap_or("0").parse().ok()?;
    let patch: u64 = parts.next().unwrap_or("0").parse().ok()?;
    Some(semver::Version::new(major, minor, patch))
}

/// Point-in-time resource usage of a worker.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Usage {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// CPU accounting carried between two samples.
pub(crate) type CpuSample = (u64, Instant);

/// Samples cpu/memory of `pid` from `/proc`.
///
/// CPU percent needs a previous sample to compute a delta; the first call
/// reports 0.
#[cfg(target_os = "linux")]
pub(crate) fn sample_usage(pid: u32, prev: Option<CpuSample>) -> Option<(Usage, CpuSample)> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Skip past the parenthesised comm field, which may contain spaces.
    let rest = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15 of stat; 11 and 12 after comm.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let ticks = utime + stime;
    let now = Instant::now();

    let cpu_percent = match prev {
        Some((prev_ticks, prev_at)) => {
            let elapsed = now.duration_since(prev_at).as_secs_f64();
            if elapsed > 0.0 {
                let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(1) as f64;
                ((ticks.saturating_sub(prev_ticks) as f64 / hz) / elapsed * 100.0) as f32
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(0) as u64;

    Some((
        Usage {
            cpu_percent,
            memory_bytes: rss_pages * page_size,
        },
        (ticks, now),
    ))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn sample_usage(_pid: u32, _prev: Option<CpuSample>) -> Option<(Usage, CpuSample)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_version_from_banner() {
        let banner = "ffmpeg version 4.4.1-static https://johnvansickle.com/ffmpeg/";
        assert_eq!(extract_version(banner).as_deref(), Some("4.4.1"));

        let banner = "ffmpeg version n5.1 Copyright (c) 2000-2022";
        assert_eq!(extract_version(banner).as_deref(), Some("5.1"));

        assert_eq!(extract_version("no version here"), None);
    }

    #[test]
    fn pads_partial_versions() {
        assert_eq!(parse_version("4"), Some(semver::Version::new(4, 0, 0)));
        assert_eq!(parse_version("4.4"), Some(semver::Version::new(4, 4, 0)));
        assert_eq!(parse_version("4.4.1"), Some(semver::Version::new(4, 4, 1)));
        assert_eq!(parse_version("x"), None);
    }

    #[tokio::test]
    async fn spawns_and_drains_both_streams() {
        let mut worker = spawn(
            "sh",
            &["-c".to_string(), "echo out; echo err 1>&2".to_string()],
        )
        .unwrap();

        let (child, lines) = worker.split_mut();
        let mut seen = Vec::new();
        while let Some(line) = lines.recv().await {
            seen.push(line);
        }
        let status = child.wait().await.unwrap();

        assert!(status.success());
        seen.sort();
        assert_eq!(seen, vec!["err".to_string(), "out".to_string()]);
    }
}
