//! Shared test utilities for logfleet-supervisor integration tests.

// Each test file compiles separately, so not every helper is used in each binary
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use logfleet_supervisor::{
    CommandLauncher, Launcher, LoggerConfig, LoggerRunner, LoggerStatus, RunnerOptions,
    SpawnedProcess,
};
use miette::bail;
use serde_json::json;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a runner whose launcher runs `script` through `bash -c` for every
/// logger, standing in for the real pipeline listener. The config JSON still
/// arrives on the script's stdin, so scripts can branch on marker strings
/// embedded in a config.
pub fn runner_with_script(script: &str, max_tries: u32) -> LoggerRunner {
    let listener = format!("bash -c {}", shell_escape::escape(script.into()));
    LoggerRunner::new(
        RunnerOptions {
            interval: Duration::from_millis(100),
            max_tries,
            ..Default::default()
        },
        Arc::new(CommandLauncher::new(listener, "warning")),
    )
}

/// Runnable config: a single writer stage whose class carries `marker`.
pub fn writer_config(display: &str, marker: &str) -> Option<LoggerConfig> {
    Some(LoggerConfig {
        name: Some(display.to_string()),
        writers: Some(json!({"class": marker, "kwargs": {"port": 6224}})),
        ..Default::default()
    })
}

/// Tracked-but-idle config: a display name and no stages.
pub fn idle_config(display: &str) -> Option<LoggerConfig> {
    Some(LoggerConfig {
        name: Some(display.to_string()),
        ..Default::default()
    })
}

pub fn fleet<I>(entries: I) -> HashMap<String, Option<LoggerConfig>>
where
    I: IntoIterator<Item = (&'static str, Option<LoggerConfig>)>,
{
    entries
        .into_iter()
        .map(|(name, config)| (name.to_string(), config))
        .collect()
}

/// Poll unmanaged status until `pred` holds, or panic after `SETTLE_TIMEOUT`.
pub async fn wait_for<F>(
    runner: &LoggerRunner,
    what: &str,
    mut pred: F,
) -> HashMap<String, LoggerStatus>
where
    F: FnMut(&HashMap<String, LoggerStatus>) -> bool,
{
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let status = runner.check_loggers(false, false).await;
        if pred(&status) {
            return status;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {what}; last status: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

pub fn kill_pid(pid: u32) {
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
}

/// Count "unexpectedly dead" restart warnings in a status record.
pub fn dead_warnings(status: &LoggerStatus) -> usize {
    status
        .errors
        .iter()
        .filter(|e| e.contains("unexpectedly dead"))
        .count()
}

/// Launcher that always fails; exercises the launch-failure path.
pub struct FailingLauncher;

#[async_trait]
impl Launcher for FailingLauncher {
    async fn launch(&self, name: &str, _config: &LoggerConfig) -> miette::Result<SpawnedProcess> {
        bail!("no listener available for {name}")
    }
}
