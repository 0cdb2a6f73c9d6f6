//! # streamvisor
//!
//! **Streamvisor** supervises fleets of long-running media-transcoding
//! worker processes. Operators declare processes by configuration; the
//! registry validates each config, resolves template placeholders and
//! cross-process references, spawns and keeps the worker alive under
//! failure, and exposes liveness state, log tails, and playout addresses.
//!
//! ## Features
//!
//! | Area              | Description                                                          | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------------|---------------------------------------------|
//! | **Registry**      | Add/update/delete processes, flip orders, query state and logs.      | [`Registry`], [`Config`]                    |
//! | **Configs**       | Declarative process definitions with inputs, outputs, cleanup rules. | [`ProcessConfig`], [`ProcessIO`]            |
//! | **Templates**     | `{name}` placeholders and `$variable` expansion inside configs.      | [`Replacer`], [`Section`]                   |
//! | **Addresses**     | Allowlists, output canonicalisation, data-root confinement.          | [`FormatValidator`]                         |
//! | **Supervision**   | Reconnect with delay, stale-timeout detection, graceful stop.        | [`ProcessState`], [`ExecState`], [`Order`]  |
//! | **Persistence**   | Original configs, orders, and metadata survive restarts.             | [`Store`], [`JsonStore`], [`MemoryStore`]   |
//! | **Observability** | Lifecycle events on a broadcast bus, log ring per process.           | [`Observer`], [`Event`], [`ProcessLog`]     |
//!
//! ```no_run
//! use streamvisor::{Config, ProcessConfig, ProcessIO, Registry};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.binary = "ffmpeg".to_string();
//!     cfg.data_root = "/var/lib/streamvisor".to_string();
//!
//!     let registry = Registry::new(cfg).await?;
//!
//!     registry
//!         .add_process(ProcessConfig {
//!             id: "cam1".to_string(),
//!             input: vec![ProcessIO {
//!                 id: "in".to_string(),
//!                 address: "rtsp://cam1.local/stream".to_string(),
//!                 ..Default::default()
//!             }],
//!             output: vec![ProcessIO {
//!                 id: "out".to_string(),
//!                 address: "rtmp://ingest.local/live/cam1".to_string(),
//!                 options: vec!["-codec".into(), "copy".into(), "-f".into(), "flv".into()],
//!                 ..Default::default()
//!             }],
//!             reconnect: true,
//!             reconnect_delay_seconds: 10,
//!             autostart: true,
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let state = registry.get_process_state("cam1").await?;
//!     println!("cam1 is {}", state.state.as_str());
//!     Ok(())
//! }
//! ```
//!
//! ---

mod address;
mod bus;
mod config;
mod error;
mod event;
mod glob;
mod log_ring;
mod monitor;
mod observer;
mod ports;
mod probe;
mod process;
mod progress;
mod registry;
mod state;
mod store;
mod supervisor;
mod template;
mod worker;

// ---- Public re-exports ----

pub use address::FormatValidator;
pub use bus::Bus;
pub use config::Config;
pub use error::Error;
pub use event::{Event, EventKind};
pub use log_ring::{LogLine, LogRing};
pub use observer::{LoggerObserver, Observer};
pub use ports::PortPool;
pub use probe::{Probe, ProbeStream};
pub use process::{CleanupRule, ProcessConfig, ProcessIO};
pub use progress::{Progress, ProgressIO};
pub use registry::Registry;
pub use state::{ExecState, Order, ProcessLog, ProcessState};
pub use store::{JsonStore, MemoryStore, Store, StoreData, StoredProcess};
pub use template::{Replacer, Section, TemplateFn};
