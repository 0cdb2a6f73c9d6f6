//! # User-authored process definitions.
//!
//! A [`ProcessConfig`] declares one worker invocation: global options, an
//! ordered set of inputs and outputs, and the supervision knobs (reconnect,
//! stale timeout, autostart). Configs are immutable once accepted by the
//! registry; what the registry stores and runs is a resolved copy.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Declarative description of one supervised worker process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Unique id within the registry.
    pub id: String,
    /// Free-form group tag, matchable via glob queries.
    pub reference: String,
    /// Semver requirement on the worker binary version, empty for any.
    pub ffversion: String,
    pub input: Vec<ProcessIO>,
    pub output: Vec<ProcessIO>,
    /// Global worker flags, prepended to the argument vector.
    pub options: Vec<String>,
    /// Restart the worker after an abnormal exit.
    pub reconnect: bool,
    /// Seconds to wait before a reconnect attempt.
    pub reconnect_delay_seconds: u64,
    /// Start the process right after it is added.
    pub autostart: bool,
    /// Seconds without progress before the worker counts as stale,
    /// 0 disables the check.
    pub stale_timeout_seconds: u64,
}

/// One input or output of a process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessIO {
    /// Unique id within the input or output list.
    pub id: String,
    /// Source or destination address.
    pub address: String,
    /// Worker flags placed before this io on the command line.
    pub options: Vec<String>,
    /// Cleanup rules; only meaningful on outputs.
    pub cleanup: Vec<CleanupRule>,
}

/// Cleanup rule attached to an output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupRule {
    /// Glob pattern over paths below the data root.
    pub pattern: String,
    /// Keep at most this many matching files, 0 for no limit.
    pub max_files: u64,
    /// Delete matching files older than this, 0 for no limit.
    pub max_file_age_seconds: u64,
    /// Delete matching files when the process is deleted.
    pub purge_on_delete: bool,
}

impl ProcessConfig {
    /// Checks the structural rules every config must satisfy before any
    /// resolution happens.
    pub(crate) fn validate_structure(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::invalid_config("empty process id"));
        }

        validate_io_list(&self.input, "input")?;
        validate_io_list(&self.output, "output")?;

        Ok(())
    }

    /// Builds the worker argument vector from a resolved config.
    pub(crate) fn build_command(&self) -> Vec<String> {
        let mut command = self.options.clone();

        for input in &self.input {
            command.extend(input.options.iter().cloned());
            command.push("-i".to_string());
            command.push(input.address.clone());
        }

        for output in &self.output {
            command.extend(output.options.iter().cloned());
            command.push(output.address.clone());
        }

        command
    }
}

fn validate_io_list(list: &[ProcessIO], section: &str) -> Result<(), Error> {
    if list.is_empty() {
        return Err(Error::invalid_config(format!("at least one {section} is required")));
    }

    for (i, io) in list.iter().enumerate() {
        if io.id.is_empty() {
            return Err(Error::invalid_config(format!("{section} #{i} has no id")));
        }
        if io.address.is_empty() {
            return Err(Error::invalid_config(format!(
                "{section} '{}' has no address",
                io.id
            )));
        }
        if list.iter().filter(|other| other.id == io.id).count() > 1 {
            return Err(Error::invalid_config(format!(
                "duplicate {section} id '{}'",
                io.id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() -> ProcessConfig {
        ProcessConfig {
            id: "process".to_string(),
            input: vec![ProcessIO {
                id: "in".to_string(),
                address: "testsrc=size=1280x720:rate=25".to_string(),
                options: vec!["-f".into(), "lavfi".into(), "-re".into()],
                ..Default::default()
            }],
            output: vec![ProcessIO {
                id: "out".to_string(),
                address: "-".to_string(),
                options: vec!["-codec".into(), "copy".into(), "-f".into(), "null".into()],
                ..Default::default()
            }],
            options: vec!["-loglevel".into(), "info".into()],
            reconnect: true,
            reconnect_delay_seconds: 10,
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(dummy().validate_structure().is_ok());
    }

    #[test]
    fn structural_rules() {
        let mut cfg = dummy();
        cfg.id = String::new();
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        cfg.input[0].id = String::new();
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        cfg.input[0].address = String::new();
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        let dup = cfg.input[0].clone();
        cfg.input.push(dup);
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        cfg.input.clear();
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        cfg.output[0].id = String::new();
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        cfg.output[0].address = String::new();
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        let dup = cfg.output[0].clone();
        cfg.output.push(dup);
        assert!(cfg.validate_structure().is_err());

        let mut cfg = dummy();
        cfg.output.clear();
        assert!(cfg.validate_structure().is_err());
    }

    #[test]
    fn command_layout() {
        let cfg = dummy();
        let command = cfg.build_command();

        assert_eq!(
            command,
            vec![
                "-loglevel",
                "info",
                "-f",
                "lavfi",
                "-re",
                "-i",
                "testsrc=size=1280x720:rate=25",
                "-codec",
                "copy",
                "-f",
                "null",
                "-",
            ]
        );
    }

    #[test]
    fn serde_round_trip() {
        let cfg = dummy();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ProcessConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
