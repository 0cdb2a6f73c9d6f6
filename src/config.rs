//! # Registry-wide runtime configuration.
//!
//! [`Config`] collects everything one [`Registry`](crate::registry::Registry)
//! instance needs: the worker binary, the data root outputs are confined to,
//! the optional playout port range, the address allowlists, the template
//! function table, the persistence seam, and the supervision defaults.
//!
//! Multiple registries can coexist as long as they do not share a store,
//! data root, or port range.

use std::sync::Arc;
use std::time::Duration;

use crate::address::FormatValidator;
use crate::store::Store;
use crate::template::Replacer;

/// Configuration for one registry instance.
pub struct Config {
    /// Path to the worker binary.
    pub binary: String,
    /// Directory filesystem outputs are confined to.
    pub data_root: String,
    /// Inclusive loopback port range for playout channels; `None` disables
    /// playout.
    pub port_range: Option<(u16, u16)>,
    /// Allowlist applied to input addresses.
    pub validator_input: Option<FormatValidator>,
    /// Allowlist applied to output addresses.
    pub validator_output: Option<FormatValidator>,
    /// Host-registered template functions.
    pub replacer: Replacer,
    /// Persistence seam; `None` keeps everything in memory.
    pub store: Option<Arc<dyn Store>>,
    /// Time a worker gets between terminate and kill.
    pub grace: Duration,
    /// Lines kept per log ring section.
    pub log_capacity: usize,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `binary = "ffmpeg"`
    /// - `data_root = "/"`
    /// - no port range, no allowlists, no store
    /// - `grace = 5s`
    /// - `log_capacity = 100`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            data_root: "/".to_string(),
            port_range: None,
            validator_input: None,
            validator_output: None,
            replacer: Replacer::new(),
            store: None,
            grace: Duration::from_secs(5),
            log_capacity: 100,
            bus_capacity: 1024,
        }
    }
}
