//! # Process registry - the public surface of the crate.
//!
//! The registry owns the map of managed tasks and every operation against
//! them: accepting and resolving configs, flipping orders, projecting state,
//! and resolving playout addresses.
//!
//! ## Architecture
//! ```text
//! operator ──► Registry ──► resolve (templates → references → addresses)
//!                 │
//!                 ├─► Task { resolved config, command, order, monitor }
//!                 │        │
//!                 │        └─► ProcessActor (one per started task)
//!                 │                 │ publishes
//!                 │                 ▼
//!                 └────────────── Bus ──► Observer
//! ```
//!
//! ## Rules
//! - Mutating operations take the exclusive task-map lock; projections take
//!   the shared lock. Operations against one id are linearisable.
//! - The registry is the only writer of `order`; the actor is the only
//!   writer of the exec state.
//! - The store receives the original configs after every accepted mutation;
//!   resolved forms are recomputed on load.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use regex::Regex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::address;
use crate::bus::Bus;
use crate::config::Config;
use crate::error::Error;
use crate::event::{Event, EventKind};
use crate::glob::glob_match;
use crate::monitor::Monitor;
use crate::observer::Observer;
use crate::ports::PortPool;
use crate::probe::Probe;
use crate::process::ProcessConfig;
use crate::progress::ProgressIO;
use crate::state::{Order, ProcessLog, ProcessState};
use crate::store::{StoreData, StoredProcess};
use crate::supervisor::{ActorParams, ProcessActor};
use crate::template::{unresolved_placeholder, Section, Vars};
use crate::worker;

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#([^\s:#|]+):output=([^\s|]+)").unwrap())
}

/// Handle to a started actor.
struct ActorHandle {
    join: JoinHandle<()>,
    cancel: CancellationToken,
}

/// One managed process.
struct Task {
    /// The config as submitted; this is what gets persisted.
    original: ProcessConfig,
    /// The resolved config the worker actually runs.
    config: ProcessConfig,
    command: Vec<String>,
    order: Order,
    /// Playout input id → leased loopback port (None without a port range).
    playout: HashMap<String, Option<u16>>,
    metadata: HashMap<String, serde_json::Value>,
    monitor: Arc<Monitor>,
    actor: Option<ActorHandle>,
    created_at: SystemTime,
}

/// Outcome of resolving one config.
struct Resolved {
    config: ProcessConfig,
    command: Vec<String>,
    playout: HashMap<String, Option<u16>>,
}

/// Registry of managed processes.
pub struct Registry {
    config: Config,
    ports: Option<PortPool>,
    tasks: RwLock<HashMap<String, Task>>,
    metadata: DashMap<String, serde_json::Value>,
    bus: Bus,
}

impl Registry {
    /// Creates a registry and replays the persisted state, restarting tasks
    /// that were running at shutdown.
    pub async fn new(config: Config) -> Result<Self, Error> {
        let ports = match config.port_range {
            Some((low, high)) => Some(PortPool::new(low, high)?),
            None => None,
        };
        let bus = Bus::new(config.bus_capacity);

        let registry = Self {
            ports,
            bus,
            tasks: RwLock::new(HashMap::new()),
            metadata: DashMap::new(),
            config,
        };
        registry.replay().await?;
        Ok(registry)
    }

    /// The event bus this registry publishes on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Attaches an observer consuming all events from now on.
    pub fn observe<O: Observer>(&self, observer: O) {
        let mut rx = self.bus.subscribe();
        let observer = Arc::new(observer);

        tokio::spawn(async move {
            while let Ok(ev) = rx.recv().await {
                observer.on_event(&ev).await;
            }
        });
    }

    // ---------------------------
    // Process lifecycle
    // ---------------------------

    /// Validates, resolves, and materialises a process in order=stop, then
    /// starts it if the config asks for autostart.
    pub async fn add_process(&self, cfg: ProcessConfig) -> Result<(), Error> {
        let autostart = cfg.autostart;
        let id = cfg.id.clone();

        let mut tasks = self.tasks.write().await;
        self.insert_locked(&mut tasks, cfg, HashMap::new())?;

        if let Err(e) = self.save_locked(&tasks).await {
            if let Some(task) = tasks.remove(&id) {
                self.release_ports(&task);
            }
            return Err(e);
        }
        self.bus.process(EventKind::ProcessAdded, &id);

        if autostart {
            self.start_locked(&mut tasks, &id)?;
            self.save_locked(&tasks).await?;
        }

        Ok(())
    }

    /// Replaces a process with a new config in one critical section.
    ///
    /// The new task starts iff the old one was ordered to start or the new
    /// config asks for autostart. Task metadata carries over.
    pub async fn update_process(&self, id: &str, cfg: ProcessConfig) -> Result<(), Error> {
        let mut tasks = self.tasks.write().await;

        if !tasks.contains_key(id) {
            return Err(Error::not_found("process", id));
        }
        cfg.validate_structure()?;
        if cfg.id != id && tasks.contains_key(&cfg.id) {
            return Err(Error::conflict(format!(
                "process '{}' already exists",
                cfg.id
            )));
        }

        let old_ports: Vec<u16> = tasks
            .get(id)
            .map(|t| t.playout.values().flatten().copied().collect())
            .unwrap_or_default();
        let resolved = self.resolve_config(&tasks, &cfg, &old_ports)?;

        let was_started = tasks
            .get(id)
            .map(|t| t.order == Order::Start)
            .unwrap_or(false);
        self.stop_locked(&mut tasks, id).await?;
        let old = match tasks.remove(id) {
            Some(old) => old,
            None => return Err(Error::not_found("process", id)),
        };
        self.release_replaced_ports(&old.playout, &resolved.playout);

        let autostart = cfg.autostart;
        let new_id = cfg.id.clone();
        tasks.insert(
            new_id.clone(),
            Task {
                original: cfg,
                config: resolved.config,
                command: resolved.command,
                order: Order::Stop,
                playout: resolved.playout,
                metadata: old.metadata,
                monitor: Arc::new(Monitor::new(self.config.log_capacity)),
                actor: None,
                created_at: SystemTime::now(),
            },
        );

        self.bus.process(EventKind::ProcessRemoved, id);
        self.bus.process(EventKind::ProcessAdded, &new_id);

        if was_started || autostart {
            self.start_locked(&mut tasks, &new_id)?;
        }
        self.save_locked(&tasks).await
    }

    /// Removes a stopped process and purges outputs marked for cleanup.
    pub async fn delete_process(&self, id: &str) -> Result<(), Error> {
        let task = {
            let mut tasks = self.tasks.write().await;

            match tasks.get(id) {
                None => return Err(Error::not_found("process", id)),
                Some(task) if task.order == Order::Start => {
                    return Err(Error::conflict(format!(
                        "process '{id}' is ordered to start; stop it first"
                    )));
                }
                Some(_) => {}
            }

            let task = match tasks.remove(id) {
                Some(task) => task,
                None => return Err(Error::not_found("process", id)),
            };
            self.release_ports(&task);
            self.save_locked(&tasks).await?;
            task
        };

        self.bus.process(EventKind::ProcessRemoved, id);

        // Patterns that still carry template placeholders are a no-op. The
        // tree walk can be large, so it runs off the registry lock and off
        // the runtime threads.
        let patterns: Vec<String> = task
            .config
            .output
            .iter()
            .flat_map(|o| o.cleanup.iter())
            .filter(|rule| rule.purge_on_delete && !rule.pattern.contains('{'))
            .map(|rule| rule.pattern.clone())
            .collect();
        if !patterns.is_empty() {
            let root = self.config.data_root.clone();
            let _ = tokio::task::spawn_blocking(move || {
                for pattern in &patterns {
                    purge_pattern(&root, pattern);
                }
            })
            .await;
        }

        Ok(())
    }

    /// Orders a process to start. Starting a started process is a no-op.
    pub async fn start_process(&self, id: &str) -> Result<(), Error> {
        let mut tasks = self.tasks.write().await;
        if tasks.get(id).map(|t| t.order) == Some(Order::Start) {
            return Ok(());
        }
        self.start_locked(&mut tasks, id)?;
        self.save_locked(&tasks).await
    }

    /// Orders a process to stop. Stopping a stopped process is a no-op.
    pub async fn stop_process(&self, id: &str) -> Result<(), Error> {
        let mut tasks = self.tasks.write().await;
        if tasks.get(id).map(|t| t.order) == Some(Order::Stop) {
            return Ok(());
        }
        self.stop_locked(&mut tasks, id).await?;
        self.save_locked(&tasks).await
    }

    /// Restarts a started process; a stopped process stays stopped.
    pub async fn restart_process(&self, id: &str) -> Result<(), Error> {
        let mut tasks = self.tasks.write().await;

        match tasks.get(id) {
            None => return Err(Error::not_found("process", id)),
            Some(task) if task.order == Order::Stop => return Ok(()),
            Some(_) => {}
        }

        self.stop_locked(&mut tasks, id).await?;
        self.start_locked(&mut tasks, id)
    }

    /// Re-resolves the stored config, picking up new template expansions and
    /// referenced outputs, and restarts iff the process was started.
    pub async fn reload_process(&self, id: &str) -> Result<(), Error> {
        let mut tasks = self.tasks.write().await;

        let (original, old_ports) = match tasks.get(id) {
            Some(task) => (
                task.original.clone(),
                task.playout.values().flatten().copied().collect::<Vec<u16>>(),
            ),
            None => return Err(Error::not_found("process", id)),
        };

        let resolved = self.resolve_config(&tasks, &original, &old_ports)?;

        let was_started = tasks
            .get(id)
            .map(|t| t.order == Order::Start)
            .unwrap_or(false);
        if was_started {
            self.stop_locked(&mut tasks, id).await?;
        }

        if let Some(task) = tasks.get_mut(id) {
            let old = std::mem::replace(&mut task.playout, resolved.playout);
            self.release_replaced_ports(&old, &task.playout);
            task.config = resolved.config;
            task.command = resolved.command;
        }

        if was_started {
            self.start_locked(&mut tasks, id)?;
        }
        Ok(())
    }

    /// Stops every running actor without touching orders, so a reloaded
    /// registry resumes the same processes.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.write().await;
        let handles: Vec<ActorHandle> =
            tasks.values_mut().filter_map(|t| t.actor.take()).collect();

        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let _ = handle.join.await;
        }
    }

    // ---------------------------
    // Projections
    // ---------------------------

    /// Returns the resolved config of a process.
    pub async fn get_process(&self, id: &str) -> Result<ProcessConfig, Error> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(id).ok_or_else(|| Error::not_found("process", id))?;
        Ok(task.config.clone())
    }

    /// Projects the publishable state of a process.
    pub async fn get_process_state(&self, id: &str) -> Result<ProcessState, Error> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(id).ok_or_else(|| Error::not_found("process", id))?;

        let (state, changed_at, mut progress, cpu, memory, ffversion, reconnect_at) = task
            .monitor
            .read(|rt| {
                (
                    rt.state,
                    rt.changed_at,
                    rt.progress.clone(),
                    rt.cpu_percent,
                    rt.memory_bytes,
                    rt.ffversion.clone(),
                    rt.reconnect_at,
                )
            })
            .await;

        progress.input = task
            .config
            .input
            .iter()
            .map(|io| ProgressIO {
                id: io.id.clone(),
                address: io.address.clone(),
                ..Default::default()
            })
            .collect();
        progress.output = task
            .config
            .output
            .iter()
            .map(|io| ProgressIO {
                id: io.id.clone(),
                address: io.address.clone(),
                ..Default::default()
            })
            .collect();

        let now = SystemTime::now();
        Ok(ProcessState {
            order: task.order,
            state,
            reconnect_seconds: reconnect_at
                .map(|at| {
                    at.duration_since(now)
                        .map(|d| d.as_secs() as i64)
                        .unwrap_or(0)
                })
                .unwrap_or(-1),
            duration_seconds: now.duration_since(changed_at).unwrap_or_default().as_secs(),
            time: changed_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            memory_bytes: memory,
            cpu_percent: cpu,
            progress,
            ffversion,
            command: task.command.clone(),
        })
    }

    /// Returns the prelude and rolling log of a process.
    pub async fn get_process_log(&self, id: &str) -> Result<ProcessLog, Error> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(id).ok_or_else(|| Error::not_found("process", id))?;

        let (prelude, log) = task.monitor.read(|rt| (rt.log.prelude(), rt.log.lines())).await;
        Ok(ProcessLog {
            created_at: task.created_at,
            prelude,
            log,
        })
    }

    /// Returns ids of processes whose id and reference match the given
    /// globs. An empty glob matches everything.
    pub async fn get_process_ids(&self, id_glob: &str, reference_glob: &str) -> Vec<String> {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .filter(|t| id_glob.is_empty() || glob_match(id_glob, &t.config.id))
            .filter(|t| {
                reference_glob.is_empty() || glob_match(reference_glob, &t.config.reference)
            })
            .map(|t| t.config.id.clone())
            .collect()
    }

    // ---------------------------
    // Metadata
    // ---------------------------

    /// Stores an arbitrary value under a key of a process. Null deletes.
    pub async fn set_process_metadata(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), Error> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("process", id))?;

        if value.is_null() {
            task.metadata.remove(key);
        } else {
            task.metadata.insert(key.to_string(), value);
        }
        self.save_locked(&tasks).await
    }

    /// Reads a metadata value of a process; missing keys read as `None`.
    pub async fn get_process_metadata(
        &self,
        id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(id).ok_or_else(|| Error::not_found("process", id))?;
        Ok(task.metadata.get(key).cloned())
    }

    /// Stores an arbitrary value under a registry-scoped key. Null deletes.
    pub async fn set_metadata(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        if value.is_null() {
            self.metadata.remove(key);
        } else {
            self.metadata.insert(key.to_string(), value);
        }
        let tasks = self.tasks.read().await;
        self.save_locked(&tasks).await
    }

    /// Reads a registry-scoped metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.metadata.get(key).map(|v| v.value().clone())
    }

    // ---------------------------
    // Probe and playout
    // ---------------------------

    /// Runs a one-shot probe of the process inputs under a hard wall-clock
    /// deadline and parses the discovered streams.
    pub async fn probe_with_timeout(&self, id: &str, timeout: Duration) -> Result<Probe, Error> {
        let (binary, args) = {
            let tasks = self.tasks.read().await;
            let task = tasks.get(id).ok_or_else(|| Error::not_found("process", id))?;

            let mut args = task.config.options.clone();
            for input in &task.config.input {
                args.extend(input.options.iter().cloned());
                args.push("-i".to_string());
                args.push(input.address.clone());
            }
            (self.config.binary.clone(), args)
        };

        let mut probe_worker = worker::spawn(&binary, &args)
            .map_err(|e| Error::worker_failed(format!("spawning probe: {e}")))?;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut collected = Vec::new();
        let (child, lines) = probe_worker.split_mut();

        loop {
            tokio::select! {
                maybe = lines.recv() => match maybe {
                    Some(line) => collected.push(line),
                    None => {
                        let _ = child.wait().await;
                        return Ok(Probe::from_lines(collected));
                    }
                },
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(Error::Timeout { timeout });
                }
            }
        }
    }

    /// Resolves the playout address of an input.
    ///
    /// Empty when the input is not a playout channel or no port range is
    /// configured; an error only for unknown process or input.
    pub async fn get_playout(&self, id: &str, input_id: &str) -> Result<String, Error> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(id).ok_or_else(|| Error::not_found("process", id))?;

        if !task.config.input.iter().any(|io| io.id == input_id) {
            return Err(Error::not_found("input", input_id));
        }

        Ok(match task.playout.get(input_id) {
            Some(Some(port)) => format!("127.0.0.1:{port}"),
            _ => String::new(),
        })
    }

    // ---------------------------
    // Internals
    // ---------------------------

    fn insert_locked(
        &self,
        tasks: &mut HashMap<String, Task>,
        cfg: ProcessConfig,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), Error> {
        cfg.validate_structure()?;
        if tasks.contains_key(&cfg.id) {
            return Err(Error::conflict(format!(
                "process '{}' already exists",
                cfg.id
            )));
        }

        let resolved = self.resolve_config(tasks, &cfg, &[])?;
        let id = cfg.id.clone();
        tasks.insert(
            id,
            Task {
                original: cfg,
                config: resolved.config,
                command: resolved.command,
                order: Order::Stop,
                playout: resolved.playout,
                metadata,
                monitor: Arc::new(Monitor::new(self.config.log_capacity)),
                actor: None,
                created_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn start_locked(&self, tasks: &mut HashMap<String, Task>, id: &str) -> Result<(), Error> {
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("process", id))?;
        if task.order == Order::Start {
            return Ok(());
        }
        task.order = Order::Start;

        let params = ActorParams {
            binary: self.config.binary.clone(),
            command: task.command.clone(),
            reconnect: task.config.reconnect,
            reconnect_delay: Duration::from_secs(task.config.reconnect_delay_seconds),
            stale_timeout: Duration::from_secs(task.config.stale_timeout_seconds),
            grace: self.config.grace,
            ffversion: task.config.ffversion.clone(),
        };
        let actor = ProcessActor::new(id, params, task.monitor.clone(), self.bus.clone());
        let cancel = CancellationToken::new();
        let join = tokio::spawn(actor.run(cancel.clone()));
        task.actor = Some(ActorHandle { join, cancel });
        Ok(())
    }

    async fn stop_locked(&self, tasks: &mut HashMap<String, Task>, id: &str) -> Result<(), Error> {
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("process", id))?;
        if task.order == Order::Stop {
            return Ok(());
        }
        task.order = Order::Stop;

        if let Some(handle) = task.actor.take() {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
        Ok(())
    }

    /// Resolves templates, references, and addresses of one config and
    /// leases playout ports.
    ///
    /// `reuse_ports` are leases the caller is replacing (update/reload of
    /// the same process); they are handed to the new config before the pool
    /// is asked for fresh ones, so re-resolving a process never fails on a
    /// pool it is itself filling.
    fn resolve_config(
        &self,
        tasks: &HashMap<String, Task>,
        cfg: &ProcessConfig,
        reuse_ports: &[u16],
    ) -> Result<Resolved, Error> {
        if !cfg.ffversion.is_empty() {
            semver::VersionReq::parse(&cfg.ffversion)
                .map_err(|e| Error::invalid_config(format!("invalid ffversion requirement: {e}")))?;
        }

        let replacer = &self.config.replacer;
        let mut resolved = cfg.clone();
        let mut playout: HashMap<String, Option<u16>> = HashMap::new();

        let base_vars = Vars {
            process_id: &cfg.id,
            reference: &cfg.reference,
            input_id: None,
            output_id: None,
        };

        for opt in &mut resolved.options {
            *opt = replacer.resolve(opt, cfg, Section::Global, &base_vars);
        }

        for i in 0..resolved.input.len() {
            resolved.input[i].id =
                replacer.resolve(&resolved.input[i].id, cfg, Section::Input, &base_vars);
            let io_id = resolved.input[i].id.clone();
            let vars = Vars {
                input_id: Some(&io_id),
                ..base_vars
            };

            let mut addr = replacer.resolve(&resolved.input[i].address, cfg, Section::Input, &vars);
            addr = resolve_reference(&addr, &cfg.id, tasks)?;
            if let Some(token) = unresolved_placeholder(&addr) {
                return Err(Error::invalid_config(format!(
                    "unresolved placeholder {token} in input address"
                )));
            }

            let (canonical, is_playout) =
                address::validate_input_address(&addr, self.config.validator_input.as_ref())?;
            resolved.input[i].address = canonical;
            if is_playout {
                playout.insert(io_id.clone(), None);
            }

            for opt in &mut resolved.input[i].options {
                *opt = replacer.resolve(opt, cfg, Section::Input, &vars);
            }
        }

        for i in 0..resolved.output.len() {
            resolved.output[i].id =
                replacer.resolve(&resolved.output[i].id, cfg, Section::Output, &base_vars);
            let io_id = resolved.output[i].id.clone();
            let vars = Vars {
                output_id: Some(&io_id),
                ..base_vars
            };

            let addr = replacer.resolve(&resolved.output[i].address, cfg, Section::Output, &vars);
            if let Some(token) = unresolved_placeholder(&addr) {
                return Err(Error::invalid_config(format!(
                    "unresolved placeholder {token} in output address"
                )));
            }

            let (canonical, is_file) = address::validate_output_address(
                &addr,
                &self.config.data_root,
                self.config.validator_output.as_ref(),
            );
            is_file?;
            resolved.output[i].address = canonical;

            for opt in &mut resolved.output[i].options {
                *opt = replacer.resolve(opt, cfg, Section::Output, &vars);
            }
            for rule in &mut resolved.output[i].cleanup {
                rule.pattern = replacer.resolve(&rule.pattern, cfg, Section::Output, &vars);
            }
        }

        // Template expansion may have collapsed two io ids into one.
        resolved.validate_structure()?;

        if let Some(pool) = &self.ports {
            let mut reuse: Vec<u16> = reuse_ports.to_vec();
            reuse.sort_unstable();
            reuse.reverse();

            let mut leased = Vec::new();
            let mut ids: Vec<String> = playout.keys().cloned().collect();
            ids.sort();
            for id in ids {
                // Lowest replaced lease first, the pool only for growth.
                if let Some(port) = reuse.pop() {
                    playout.insert(id, Some(port));
                    continue;
                }
                match pool.lease() {
                    Some(port) => {
                        leased.push(port);
                        playout.insert(id, Some(port));
                    }
                    None => {
                        // Reused ports still belong to the old task.
                        for port in leased {
                            pool.release(port);
                        }
                        return Err(Error::unavailable("playout port range exhausted"));
                    }
                }
            }
        }

        let command = resolved.build_command();
        Ok(Resolved {
            config: resolved,
            command,
            playout,
        })
    }

    async fn replay(&self) -> Result<(), Error> {
        let Some(store) = self.config.store.clone() else {
            return Ok(());
        };
        let data = store.load().await?;

        for (key, value) in data.metadata {
            self.metadata.insert(key, value);
        }

        // A config may reference a process stored after it; retry the
        // failures until a pass makes no progress.
        let mut pending = data.processes;
        loop {
            let before = pending.len();
            let mut failed = Vec::new();

            for stored in pending {
                if self.replay_one(&stored).await.is_err() {
                    failed.push(stored);
                }
            }

            if failed.is_empty() || failed.len() == before {
                for stored in failed {
                    self.bus.publish(
                        Event::now(EventKind::ProcessFailed)
                            .with_process(stored.config.id.as_str())
                            .with_error("stored config no longer resolves"),
                    );
                }
                return Ok(());
            }
            pending = failed;
        }
    }

    async fn replay_one(&self, stored: &StoredProcess) -> Result<(), Error> {
        let mut tasks = self.tasks.write().await;
        self.insert_locked(&mut tasks, stored.config.clone(), stored.metadata.clone())?;
        if stored.order == Order::Start {
            self.start_locked(&mut tasks, &stored.config.id)?;
        }
        Ok(())
    }

    async fn save_locked(&self, tasks: &HashMap<String, Task>) -> Result<(), Error> {
        let Some(store) = &self.config.store else {
            return Ok(());
        };

        let mut processes: Vec<StoredProcess> = tasks
            .values()
            .map(|t| StoredProcess {
                config: t.original.clone(),
                order: t.order,
                metadata: t.metadata.clone(),
            })
            .collect();
        processes.sort_by(|a, b| a.config.id.cmp(&b.config.id));

        let metadata = self
            .metadata
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        store.store(&StoreData { processes, metadata }).await
    }

    fn release_ports(&self, task: &Task) {
        if let Some(pool) = &self.ports {
            for port in task.playout.values().flatten() {
                pool.release(*port);
            }
        }
    }

    /// Releases old leases that the replacing lease set did not take over.
    fn release_replaced_ports(
        &self,
        old: &HashMap<String, Option<u16>>,
        new: &HashMap<String, Option<u16>>,
    ) {
        let Some(pool) = &self.ports else {
            return;
        };
        let kept: std::collections::HashSet<u16> = new.values().flatten().copied().collect();
        for port in old.values().flatten() {
            if !kept.contains(port) {
                pool.release(*port);
            }
        }
    }
}

/// Rewrites `#pid:output=oid` tokens to the referenced resolved output
/// address.
fn resolve_reference(
    address: &str,
    own_id: &str,
    tasks: &HashMap<String, Task>,
) -> Result<String, Error> {
    if !address.contains('#') {
        return Ok(address.to_string());
    }

    let re = reference_re();
    if address.starts_with('#') && !re.is_match(address) {
        return Err(Error::invalid_config(format!(
            "invalid address reference '{address}'"
        )));
    }

    let mut out = String::with_capacity(address.len());
    let mut last = 0;

    for cap in re.captures_iter(address) {
        let token = cap.get(0).expect("capture 0 always present");
        let pid = &cap[1];
        let oid = &cap[2];

        if pid == own_id {
            return Err(Error::invalid_config(
                "process cannot reference its own output",
            ));
        }
        let task = tasks.get(pid).ok_or_else(|| {
            Error::invalid_config(format!("reference to unknown process '{pid}'"))
        })?;
        let output = task
            .config
            .output
            .iter()
            .find(|o| o.id == oid)
            .ok_or_else(|| {
                Error::invalid_config(format!("process '{pid}' has no output '{oid}'"))
            })?;

        out.push_str(&address[last..token.start()]);
        out.push_str(&output.address);
        last = token.end();
    }

    out.push_str(&address[last..]);
    Ok(out)
}

/// Removes files under `root` whose path matches `pattern`.
fn purge_pattern(root: &str, pattern: &str) {
    let root = address::clean_path(root);
    let mut stack = vec![std::path::PathBuf::from(&root)];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }

            let full = path.to_string_lossy();
            let relative = full
                .strip_prefix(root.as_str())
                .map(|s| s.trim_start_matches('/'))
                .unwrap_or(&full);
            if glob_match(pattern, &full) || glob_match(pattern, relative) {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}
