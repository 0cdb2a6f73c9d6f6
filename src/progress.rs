//! # Parsing of the worker's progress lines.
//!
//! The worker reports progress as `key=value` pairs on a single line:
//!
//! ```text
//! frame=  123 fps= 25 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 1677.7kbits/s dup=1 drop=2 speed=1.01x
//! ```
//!
//! [`Progress::apply_line`] recognises such lines and folds the parsed pairs
//! into the running counters. Fields the worker does not report stay zero.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z_]+)=\s*(\S+)").unwrap())
}

/// Per-input/per-output progress counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressIO {
    pub id: String,
    pub address: String,
    pub frame: u64,
    pub packet: u64,
    pub size_kbytes: u64,
}

/// Aggregated worker progress.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub input: Vec<ProgressIO>,
    pub output: Vec<ProgressIO>,
    pub frame: u64,
    pub packet: u64,
    pub fps: f64,
    pub quantizer: f64,
    pub bitrate_kbit: f64,
    pub size_kbytes: u64,
    pub time_seconds: f64,
    pub drop: u64,
    pub dup: u64,
    pub speed: f64,
}

impl Progress {
    /// Folds one worker output line into the counters.
    ///
    /// Returns false (and changes nothing) when the line is not in the
    /// progress format.
    pub fn apply_line(&mut self, line: &str) -> bool {
        if !is_progress_line(line) {
            return false;
        }

        for cap in pair_re().captures_iter(line) {
            let key = &cap[1];
            let value = &cap[2];
            match key {
                "frame" => self.frame = parse_u64(value),
                "packet" => self.packet = parse_u64(value),
                "fps" => self.fps = parse_f64(value),
                "q" => self.quantizer = parse_f64(value),
                "size" | "Lsize" => self.size_kbytes = parse_u64(trim_suffix(value, "kB")),
                "time" => self.time_seconds = parse_clock(value),
                "bitrate" => self.bitrate_kbit = parse_f64(trim_suffix(value, "kbits/s")),
                "drop" => self.drop = parse_u64(value),
                "dup" => self.dup = parse_u64(value),
                "speed" => self.speed = parse_f64(trim_suffix(value, "x")),
                _ => {}
            }
        }

        true
    }
}

/// Whether a worker output line is a progress report.
pub(crate) fn is_progress_line(line: &str) -> bool {
    line.trim_start().starts_with("frame=")
}

fn trim_suffix<'a>(value: &'a str, suffix: &str) -> &'a str {
    value.strip_suffix(suffix).unwrap_or(value)
}

fn parse_u64(value: &str) -> u64 {
    value.parse().unwrap_or(0)
}

fn parse_f64(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

/// Parses `HH:MM:SS.cc` into seconds.
fn parse_clock(value: &str) -> f64 {
    let mut parts = value.splitn(3, ':');
    let (h, m, s) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(s)) => (h, m, s),
        _ => return parse_f64(value),
    };

    let hours: f64 = h.parse().unwrap_or(0.0);
    let minutes: f64 = m.parse().unwrap_or(0.0);
    let seconds: f64 = s.parse().unwrap_or(0.0);
    hours * 3600.0 + minutes * 60.0 + seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_progress_line() {
        let mut p = Progress::default();
        let ok = p.apply_line(
            "frame=  123 fps= 25 q=28.0 size=    1024kB time=00:00:05.50 bitrate= 1677.7kbits/s dup=1 drop=2 speed=1.01x",
        );

        assert!(ok);
        assert_eq!(p.frame, 123);
        assert_eq!(p.fps, 25.0);
        assert_eq!(p.quantizer, 28.0);
        assert_eq!(p.size_kbytes, 1024);
        assert_eq!(p.time_seconds, 5.5);
        assert_eq!(p.bitrate_kbit, 1677.7);
        assert_eq!(p.dup, 1);
        assert_eq!(p.drop, 2);
        assert_eq!(p.speed, 1.01);
    }

    #[test]
    fn ignores_non_progress_lines() {
        let mut p = Progress::default();
        assert!(!p.apply_line("Input #0, lavfi, from 'testsrc':"));
        assert!(!p.apply_line("Press [q] to stop, [?] for help"));
        assert_eq!(p.frame, 0);
    }

    #[test]
    fn missing_fields_stay_zero() {
        let mut p = Progress::default();
        assert!(p.apply_line("frame=7 fps=30"));
        assert_eq!(p.frame, 7);
        assert_eq!(p.fps, 30.0);
        assert_eq!(p.bitrate_kbit, 0.0);
        assert_eq!(p.drop, 0);
    }
}
