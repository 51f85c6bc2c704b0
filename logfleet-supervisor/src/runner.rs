//! The reconciliation and supervision core.
//!
//! A [`LoggerRunner`] tracks a set of named loggers. An external controller
//! pushes the desired configuration map; the runner starts, restarts and
//! stops isolated OS processes to match, and aggregates a per-logger status
//! view for whoever polls it.
//!
//! All shared state lives in a private [`RunnerState`] behind one mutex.
//! Single-unit operations are plain methods that take the state by `&mut`;
//! every public entry point locks once and calls in, so bulk operations can
//! reuse the single-unit paths without any re-entrant locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{LoggerConfig, runnable};
use crate::launcher::Launcher;
use crate::output::{ErrorLog, spawn_classifier};
use crate::process::LoggerProcess;

/// Construction-time options for a [`LoggerRunner`].
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Delay between health-check passes of the supervision loop.
    pub interval: Duration,
    /// Process starts allowed per config assignment; 0 means retry forever.
    pub max_tries: u32,
    /// Cancelled to request shutdown, either by [`LoggerRunner::quit`] or by
    /// an OS-signal adapter.
    pub shutdown: CancellationToken,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_tries: 3,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Snapshot of one logger's state, as returned by the check calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggerStatus {
    /// Display name of the current config, or `None` for a null config.
    pub config: Option<String>,
    /// Recent errors: launch failures, crash warnings, ERROR/FATAL output.
    pub errors: Vec<String>,
    /// `Some(true)`/`Some(false)` when the logger should be running; `None`
    /// when its config says it should not.
    pub running: Option<bool>,
    /// The restart budget is exhausted; only a config change clears this.
    pub failed: bool,
    /// OS process id, when a process handle exists.
    pub pid: Option<u32>,
}

/// Everything tracked for one named logger.
struct Unit {
    config: Option<LoggerConfig>,
    process: Option<LoggerProcess>,
    errors: ErrorLog,
    num_tries: u32,
    failed: bool,
}

impl Unit {
    fn new() -> Self {
        Self {
            config: None,
            process: None,
            errors: ErrorLog::default(),
            num_tries: 0,
            failed: false,
        }
    }

    fn config_name(&self) -> Option<String> {
        self.config.as_ref().map(|c| c.display_name().to_string())
    }

    fn process_alive(&mut self) -> bool {
        self.process.as_mut().is_some_and(|p| p.is_alive())
    }
}

/// The tracked units plus the names awaiting one final "not running" status
/// report after being dropped from a push.
#[derive(Default)]
struct RunnerState {
    units: HashMap<String, Unit>,
    disappeared: HashSet<String>,
}

/// Supervises a dynamic set of logger processes against a desired
/// configuration map.
pub struct LoggerRunner {
    state: Mutex<RunnerState>,
    /// Serializes health-check passes so they never overlap.
    check_lock: Mutex<()>,
    launcher: Arc<dyn Launcher>,
    interval: Duration,
    max_tries: u32,
    shutdown: CancellationToken,
}

impl LoggerRunner {
    pub fn new(options: RunnerOptions, launcher: Arc<dyn Launcher>) -> Self {
        info!(
            "starting logger runner, interval {:?}, max tries {}",
            options.interval, options.max_tries
        );
        Self {
            state: Mutex::new(RunnerState::default()),
            check_lock: Mutex::new(()),
            launcher,
            interval: options.interval,
            max_tries: options.max_tries,
            shutdown: options.shutdown,
        }
    }

    /// Token observed by the supervision loop. Cancelling it is equivalent
    /// to calling [`quit`](Self::quit) once the loop notices.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Move the fleet from its current configs to `new_configs`: loggers no
    /// longer mentioned are killed and deleted (and remembered for one final
    /// status report), everything else is reconciled per logger.
    ///
    /// Note the difference between a logger missing from the map (deleted)
    /// and one present with a `None` config (kept tracked, but stopped).
    pub async fn set_configs(&self, new_configs: HashMap<String, Option<LoggerConfig>>) {
        let mut state = self.state.lock().await;

        let disappeared: Vec<String> = state
            .units
            .keys()
            .filter(|name| !new_configs.contains_key(*name))
            .cloned()
            .collect();
        if !disappeared.is_empty() {
            info!(
                "new configuration contains no mention of some loggers; \
                 shutting down and deleting: {disappeared:?}"
            );
        }
        state.disappeared = disappeared.iter().cloned().collect();
        for name in &disappeared {
            Self::kill_and_delete(&mut state, name).await;
        }

        for (name, config) in new_configs {
            self.apply_config(&mut state, &name, config).await;
        }
    }

    /// Reconcile a single logger against `new_config`. Idempotent: pushing
    /// an unchanged config performs no process actions.
    pub async fn set_config(&self, name: &str, new_config: Option<LoggerConfig>) {
        let mut state = self.state.lock().await;
        self.apply_config(&mut state, name, new_config).await;
    }

    /// Single-unit reconciler: replace the config wholesale, reset the retry
    /// bookkeeping, and perform the minimal kill/start to match. Only a
    /// config *value* change acts here; a silently dead process under an
    /// unchanged config is the health-check engine's business.
    async fn apply_config(
        &self,
        state: &mut RunnerState,
        name: &str,
        new_config: Option<LoggerConfig>,
    ) {
        let unit = state.units.entry(name.to_string()).or_insert_with(Unit::new);

        if unit.config == new_config {
            debug!(logger = %name, "config didn't change, skipping");
            return;
        }

        let config_name = new_config.as_ref().map(|c| c.display_name().to_string());
        info!(logger = %name, "setting config to {config_name:?}");

        let was_runnable = runnable(unit.config.as_ref());
        unit.config = new_config;
        unit.num_tries = 0;
        unit.errors.clear();

        // Wasn't running and shouldn't be: nothing to start or kill.
        if !was_runnable && !runnable(unit.config.as_ref()) {
            return;
        }

        // The configs differ, so any existing process is for the wrong one.
        Self::kill_unit(unit, name).await;

        if runnable(unit.config.as_ref()) {
            debug!(logger = %name, "starting process for {config_name:?}");
            self.start_unit(unit, name).await;
            unit.num_tries = 1;
        }
    }

    /// Start a process for the unit's current config. Launch failures are
    /// recorded on the unit's error list, never propagated; the unit is left
    /// process-less and the next health-check pass takes it from there.
    async fn start_unit(&self, unit: &mut Unit, name: &str) {
        let Some(config) = unit.config.clone() else {
            return;
        };
        match self.launcher.launch(name, &config).await {
            Ok(mut spawned) => {
                let classifier = spawned
                    .output
                    .take()
                    .map(|stream| spawn_classifier(name.to_string(), stream, unit.errors.clone()));
                unit.process = Some(LoggerProcess::new(spawned.child, classifier));
                unit.failed = false;
            }
            Err(e) => {
                error!(logger = %name, "launch failed: {e}");
                unit.errors.push(e.to_string());
                unit.process = None;
            }
        }
    }

    /// Kill the unit's process, if any, and clean out the debris: errors
    /// emptied, failed flag off.
    async fn kill_unit(unit: &mut Unit, name: &str) {
        match unit.process.take() {
            Some(process) => {
                debug!(logger = %name, "shutting down pid {:?}", process.pid());
                process.kill(name).await;
            }
            None => debug!(logger = %name, "no process to kill"),
        }
        unit.errors.clear();
        unit.failed = false;
    }

    /// Remove all trace of a logger after killing its process.
    async fn kill_and_delete(state: &mut RunnerState, name: &str) {
        if let Some(mut unit) = state.units.remove(name) {
            Self::kill_unit(&mut unit, name).await;
        }
    }

    /// Check whether one logger is in the state its config says it should
    /// be, restarting or stopping it when `manage` is set, and return its
    /// status record. `clear_errors` empties the error list after the record
    /// is built, so the returned record still carries the pre-clear errors.
    pub async fn check_logger(&self, name: &str, manage: bool, clear_errors: bool) -> LoggerStatus {
        let mut state = self.state.lock().await;
        self.check_unit(&mut state, name, manage, clear_errors).await
    }

    async fn check_unit(
        &self,
        state: &mut RunnerState,
        name: &str,
        manage: bool,
        clear_errors: bool,
    ) -> LoggerStatus {
        let Some(unit) = state.units.get_mut(name) else {
            // Disappeared (or never tracked): one last "not running" record.
            return LoggerStatus {
                config: None,
                errors: Vec::new(),
                running: None,
                failed: false,
                pid: None,
            };
        };

        let should_run = runnable(unit.config.as_ref());
        let alive = unit.process_alive();

        let running = match (should_run, alive) {
            // Not running and shouldn't be. A clean rest state: reset the
            // warnings and the retry budget.
            (false, false) => {
                unit.failed = false;
                unit.errors.clear();
                unit.num_tries = 0;
                None
            }
            // Running and supposed to be.
            (true, true) => {
                unit.failed = false;
                Some(true)
            }
            // Shouldn't be running, but is.
            (false, true) => {
                if manage {
                    Self::kill_unit(unit, name).await;
                }
                Some(true)
            }
            // Should be running, but isn't.
            (true, false) => {
                if manage {
                    self.retry_unit(unit, name).await;
                }
                Some(false)
            }
        };

        let status = LoggerStatus {
            config: unit.config_name(),
            errors: unit.errors.snapshot(),
            running,
            failed: unit.failed,
            pid: unit.process.as_ref().and_then(|p| p.pid()),
        };
        if clear_errors {
            unit.errors.clear();
        }
        status
    }

    /// Restart an unexpectedly dead logger, within the retry budget. Once
    /// the budget is spent the unit is marked failed and left alone until
    /// its config changes.
    async fn retry_unit(&self, unit: &mut Unit, name: &str) {
        let config_name = unit.config_name().unwrap_or_else(|| "unknown".to_string());
        if unit.failed {
            debug!(
                logger = %name,
                "config {config_name} has failed {} times; not retrying", self.max_tries
            );
        } else if self.max_tries > 0 && unit.num_tries == self.max_tries {
            unit.failed = true;
            warn!(
                logger = %name,
                "config {config_name} has failed {} times; not retrying", self.max_tries
            );
            warn!(logger = %name, "errors: {:?}", unit.errors.snapshot());
        } else {
            let warning =
                format!("Process for {name} (config {config_name}) unexpectedly dead; restarting");
            warn!("{warning}");
            unit.errors.push(warning);
            self.start_unit(unit, name).await;
            unit.num_tries += 1;
        }
    }

    /// Check every tracked logger and return the status map. Names dropped
    /// by the latest push are included exactly once more, with a guaranteed
    /// "not running" record; passing `clear_errors` consumes them (the
    /// caller is presumed to be recording statuses, so the final report is
    /// now on the books).
    ///
    /// Passes are serialized by a dedicated lock so a slow pass and an
    /// impatient caller can't double-restart anything.
    pub async fn check_loggers(
        &self,
        manage: bool,
        clear_errors: bool,
    ) -> HashMap<String, LoggerStatus> {
        let _pass = self.check_lock.lock().await;
        let mut state = self.state.lock().await;

        let mut names: HashSet<String> = state.units.keys().cloned().collect();
        names.extend(state.disappeared.iter().cloned());
        if clear_errors {
            state.disappeared.clear();
        }

        let mut status = HashMap::with_capacity(names.len());
        for name in names {
            let record = self.check_unit(&mut state, &name, manage, clear_errors).await;
            status.insert(name, record);
        }
        debug!("check_loggers got status: {status:?}");
        status
    }

    /// Drive managed health-check passes until shutdown is requested, then
    /// shut the whole fleet down. The interval sleep is interruptible, so
    /// shutdown latency is bounded by one pass plus one interval.
    pub async fn run(&self) {
        info!("logger runner running");
        while !self.shutdown.is_cancelled() {
            let _ = self.check_loggers(true, false).await;
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("logger runner loop exiting");
        self.quit().await;
    }

    /// Shut everything down: stop the loop, push a null config to every
    /// tracked logger, and as a final safety net force-kill any process that
    /// still reports alive afterward.
    pub async fn quit(&self) {
        self.shutdown.cancel();
        info!("received quit request, shutting loggers down");

        let mut state = self.state.lock().await;
        let names: Vec<String> = state.units.keys().cloned().collect();
        for name in &names {
            info!(logger = %name, "shutting down");
            self.apply_config(&mut state, name, None).await;
        }

        for (name, unit) in state.units.iter_mut() {
            if unit.process_alive() {
                warn!(logger = %name, "process survived shutdown, force killing");
                if let Some(process) = unit.process.take() {
                    process.kill(name).await;
                }
            }
        }
    }
}
