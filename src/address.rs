//! # Canonicalisation and policy checks for io addresses.
//!
//! Input addresses are matched against an optional regex allowlist after a
//! `playout:` prefix is stripped (and remembered). Output addresses are
//! split on the top-level `|` into sub-addresses, each optionally carrying a
//! bracketed option prefix `[k=v,...]`:
//!
//! - `-` becomes `pipe:`;
//! - anything with a URL scheme is checked against the output allowlist and
//!   passed through;
//! - everything else is a filesystem path: lexically cleaned, resolved
//!   against the data root, rejected if it escapes the root (paths under
//!   `/dev/` are exempt), and prefixed with `file:`.
//!
//! A single violating sub-address rejects the whole address.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Error;

/// Address prefix marking an input as a playout channel.
pub(crate) const PLAYOUT_PREFIX: &str = "playout:";

fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap())
}

/// Regex allowlist over address strings.
///
/// An empty allowlist accepts everything.
pub struct FormatValidator {
    allow: Vec<Regex>,
}

impl FormatValidator {
    /// Compiles the allowlist patterns.
    pub fn new(patterns: &[&str]) -> Result<Self, Error> {
        let mut allow = Vec::with_capacity(patterns.len());
        for p in patterns {
            let re = Regex::new(p)
                .map_err(|e| Error::invalid_config(format!("invalid allowlist pattern: {e}")))?;
            allow.push(re);
        }
        Ok(Self { allow })
    }

    /// Returns true if the address matches at least one allowlist entry.
    pub fn validate(&self, address: &str) -> bool {
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|re| re.is_match(address))
    }
}

/// Validates an input address.
///
/// Returns the address with a `playout:` prefix stripped and a flag telling
/// whether the prefix was present.
pub(crate) fn validate_input_address(
    address: &str,
    validator: Option<&FormatValidator>,
) -> Result<(String, bool), Error> {
    let (address, playout) = match address.strip_prefix(PLAYOUT_PREFIX) {
        Some(rest) => (rest, true),
        None => (address, false),
    };

    if address.is_empty() {
        return Err(Error::invalid_config("empty input address"));
    }

    if let Some(v) = validator {
        if !v.validate(address) {
            return Err(Error::invalid_config(format!(
                "input address '{address}' is not allowed"
            )));
        }
    }

    Ok((address.to_string(), playout))
}

/// Validates an output address and rewrites it into canonical form.
///
/// The canonical form is returned even when the address is rejected, so
/// callers can report exactly what was refused: a single rejected path
/// comes back cleaned, a rejected group comes back verbatim. The second
/// slot carries whether any sub-address refers to a file below the data
/// root, or the rejection.
pub(crate) fn validate_output_address(
    address: &str,
    base: &str,
    validator: Option<&FormatValidator>,
) -> (String, Result<bool, Error>) {
    if !address.contains('|') && !address.starts_with('[') {
        return validate_single_output(address, base, validator);
    }

    let mut is_file = false;
    let mut groups = Vec::new();

    for group in split_groups(address) {
        let (prefix, rest) = match split_bracket_prefix(&group) {
            Ok(parts) => parts,
            Err(e) => return (address.to_string(), Err(e)),
        };
        let (canonical, result) = validate_single_output(rest, base, validator);
        match result {
            Ok(file) => is_file |= file,
            // A single violation fails the whole address.
            Err(e) => return (address.to_string(), Err(e)),
        }
        groups.push(format!("{prefix}{canonical}"));
    }

    (groups.join("|"), Ok(is_file))
}

fn validate_single_output(
    address: &str,
    base: &str,
    validator: Option<&FormatValidator>,
) -> (String, Result<bool, Error>) {
    let address = address.strip_prefix("file:").unwrap_or(address);

    if scheme_re().is_match(address) {
        if let Some(v) = validator {
            if !v.validate(address) {
                return (
                    address.to_string(),
                    Err(Error::invalid_config(format!(
                        "output address '{address}' is not allowed"
                    ))),
                );
            }
        }
        return (address.to_string(), Ok(false));
    }

    if address == "-" {
        return ("pipe:".to_string(), Ok(false));
    }

    let path = if address.starts_with('/') {
        clean_path(address)
    } else {
        clean_path(&format!("{base}/{address}"))
    };

    if path.starts_with("/dev/") {
        return (format!("file:{path}"), Ok(false));
    }

    let base = clean_path(base);
    let inside = base == "/" || path == base || path.starts_with(&format!("{base}/"));
    if !inside {
        let err = Error::invalid_config(format!(
            "output path '{path}' is outside the data directory"
        ));
        return (path, Err(err));
    }

    (format!("file:{path}"), Ok(true))
}

/// Splits an output address on `|`, treating bracketed prefixes as opaque.
fn split_groups(address: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in address.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '|' if depth == 0 => {
                groups.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    groups.push(current);
    groups
}

/// Splits a leading `[k=v,...]` prefix off a sub-address.
fn split_bracket_prefix(group: &str) -> Result<(&str, &str), Error> {
    if !group.starts_with('[') {
        return Ok(("", group));
    }
    match group.find(']') {
        Some(end) => Ok((&group[..=end], &group[end + 1..])),
        None => Err(Error::invalid_config(format!(
            "unterminated option prefix in '{group}'"
        ))),
    }
}

/// Lexically cleans an absolute path: resolves `.` and `..`, collapses
/// slashes. `..` at the root stays at the root.
pub(crate) fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }

    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_resolves_dots() {
        assert_eq!(clean_path("/dev/../etc/passwd"), "/etc/passwd");
        assert_eq!(clean_path("/core/data/../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean_path("/core/data/./etc/passwd"), "/core/data/etc/passwd");
        assert_eq!(clean_path("/a//b///c"), "/a/b/c");
        assert_eq!(clean_path("/../.."), "/");
    }

    #[test]
    fn output_canonicalisation_table() {
        let base = "/core/data";

        let accepted = [
            ("/dev/null", "file:/dev/null"),
            ("/dev/fb0", "file:/dev/fb0"),
            ("/core/data/./etc/passwd", "file:/core/data/etc/passwd"),
            ("file:/core/data/foobar", "file:/core/data/foobar"),
            ("http://example.com", "http://example.com"),
            ("-", "pipe:"),
            (
                "/core/data/foobar|http://example.com",
                "file:/core/data/foobar|http://example.com",
            ),
            ("[f=mpegts]udp://10.0.1.255:1234/", "[f=mpegts]udp://10.0.1.255:1234/"),
            ("[f=null]-|[f=null]-", "[f=null]pipe:|[f=null]pipe:"),
            (
                "[onfail=ignore]/core/data/archive-20121107.mkv|[f=mpegts]udp://10.0.1.255:1234/",
                "[onfail=ignore]file:/core/data/archive-20121107.mkv|[f=mpegts]udp://10.0.1.255:1234/",
            ),
        ];

        for (input, expected) in accepted {
            let (canonical, result) = validate_output_address(input, base, None);
            if let Err(e) = result {
                panic!("'{input}' rejected: {e}");
            }
            assert_eq!(canonical, expected, "canonical form of '{input}'");
        }

        // Rejected addresses still report the cleaned path; a rejected
        // group reports the whole address verbatim.
        let rejected = [
            ("/dev/../etc/passwd", "/etc/passwd"),
            ("/etc/passwd", "/etc/passwd"),
            ("/core/data/../../etc/passwd", "/etc/passwd"),
            ("/core/data/foobar|/etc/passwd", "/core/data/foobar|/etc/passwd"),
        ];

        for (input, expected) in rejected {
            let (canonical, result) = validate_output_address(input, base, None);
            assert!(result.is_err(), "'{input}' should be rejected");
            assert_eq!(canonical, expected, "reported form of '{input}'");
        }
    }

    #[test]
    fn output_flags_data_root_files() {
        let (_, file) = validate_output_address("/core/data/x.mkv", "/core/data", None);
        assert!(file.unwrap());

        let (_, file) = validate_output_address("/dev/null", "/core/data", None);
        assert!(!file.unwrap());

        let (_, file) = validate_output_address("http://example.com", "/core/data", None);
        assert!(!file.unwrap());

        let (_, file) = validate_output_address(
            "/core/data/foobar|http://example.com",
            "/core/data",
            None,
        );
        assert!(file.unwrap());
    }

    #[test]
    fn output_allowlist_applies_per_group() {
        let v = FormatValidator::new(&["^https?://", "^rtmp://"]).unwrap();

        let (_, result) = validate_output_address("http://example.com/x", "/core/data", Some(&v));
        assert!(result.is_ok());

        let (_, result) = validate_output_address(
            "[f=hls]http://example.com/a|[f=flv]rtmp://example.com/b",
            "/core/data",
            Some(&v),
        );
        assert!(result.is_ok());

        let (_, result) = validate_output_address("udp://example.com/x", "/core/data", Some(&v));
        assert!(result.is_err());
    }

    #[test]
    fn input_playout_prefix_is_stripped_and_flagged() {
        let (addr, playout) = validate_input_address("playout:rtsp://cam/1", None).unwrap();
        assert!(playout);
        assert_eq!(addr, "rtsp://cam/1");

        let (addr, playout) = validate_input_address("rtsp://cam/1", None).unwrap();
        assert!(!playout);
        assert_eq!(addr, "rtsp://cam/1");
    }

    #[test]
    fn input_allowlist_matches_after_strip() {
        let v = FormatValidator::new(&["^https?://"]).unwrap();
        assert!(validate_input_address("playout:http://cam/1", Some(&v)).is_ok());
        assert!(validate_input_address("playout:rtsp://cam/1", Some(&v)).is_err());
        assert!(validate_input_address("testsrc=size=1280x720:rate=25", Some(&v)).is_err());
    }
}
