//! # One-shot probe results.
//!
//! A probe runs the worker against a process config's inputs only and parses
//! the stream descriptors the worker prints to stderr:
//!
//! ```text
//! Stream #0:0: Video: h264 (High), yuv420p, 1280x720, 25 fps
//! Stream #0:1: Audio: aac (LC), 44100 Hz, stereo
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

fn stream_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Stream #(\d+):(\d+)[^:]*: (Video|Audio|Subtitle|Data): ([A-Za-z0-9_]+)")
            .unwrap()
    })
}

fn resolution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{2,5})x(\d{2,5})").unwrap())
}

fn sampling_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) Hz").unwrap())
}

/// One stream the probe discovered.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeStream {
    /// Index of the input the stream belongs to.
    pub input_index: u64,
    /// Stream index within the input.
    pub stream_index: u64,
    /// Stream type: "video", "audio", "subtitle", or "data".
    pub kind: String,
    /// Codec name as reported by the worker.
    pub codec: String,
    /// Video width, 0 for non-video streams.
    pub width: u64,
    /// Video height, 0 for non-video streams.
    pub height: u64,
    /// Audio sampling rate in Hz, 0 for non-audio streams.
    pub sampling_hz: u64,
}

/// Result of probing a process config.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Probe {
    pub streams: Vec<ProbeStream>,
    /// The raw lines the probe captured, for diagnostics.
    pub log: Vec<String>,
}

impl Probe {
    /// Parses the captured worker output into stream descriptors.
    pub(crate) fn from_lines(lines: Vec<String>) -> Self {
        let mut streams = Vec::new();

        for line in &lines {
            let Some(cap) = stream_re().captures(line) else {
                continue;
            };

            let kind = cap[3].to_ascii_lowercase();
            let mut stream = ProbeStream {
                input_index: cap[1].parse().unwrap_or(0),
                stream_index: cap[2].parse().unwrap_or(0),
                codec: cap[4].to_string(),
                kind: kind.clone(),
                width: 0,
                height: 0,
                sampling_hz: 0,
            };

            if kind == "video" {
                if let Some(res) = resolution_re().captures(line) {
                    stream.width = res[1].parse().unwrap_or(0);
                    stream.height = res[2].parse().unwrap_or(0);
                }
            } else if kind == "audio" {
                if let Some(hz) = sampling_re().captures(line) {
                    stream.sampling_hz = hz[1].parse().unwrap_or(0);
                }
            }

            streams.push(stream);
        }

        Self { streams, log: lines }
    }
}

#[cfg(test)]
mod tests {
    use super::Probe;

    #[test]
    fn parses_stream_descriptors() {
        let probe = Probe::from_lines(vec![
            "Input #0, lavfi, from 'testsrc':".to_string(),
            "  Stream #0:0: Video: rawvideo (RGB[24] / 0x18424752), rgb24, 1280x720, 25 fps".to_string(),
            "  Stream #0:1: Audio: pcm_s16le, 44100 Hz, stereo".to_string(),
            "  Stream #1:0: Audio: aac (LC), 48000 Hz, 5.1".to_string(),
        ]);

        assert_eq!(probe.streams.len(), 3);

        let video = &probe.streams[0];
        assert_eq!(video.kind, "video");
        assert_eq!(video.codec, "rawvideo");
        assert_eq!((video.width, video.height), (1280, 720));

        let audio = &probe.streams[1];
        assert_eq!(audio.kind, "audio");
        assert_eq!(audio.sampling_hz, 44100);
        assert_eq!((audio.input_index, audio.stream_index), (0, 1));

        assert_eq!(probe.streams[2].input_index, 1);
    }

    #[test]
    fn keeps_raw_lines() {
        let probe = Probe::from_lines(vec!["whatever".to_string()]);
        assert!(probe.streams.is_empty());
        assert_eq!(probe.log.len(), 1);
    }
}
